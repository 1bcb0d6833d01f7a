//! Handle images and the slot tables behind them.
//!
//! A handle is 4 bytes: the low 24 bits pick a slot, the high 8 bits carry
//! the slot's generation at allocation time. Freeing an object bumps its
//! slot's generation, so a handle kept past its release no longer matches
//! and is reported as dangling instead of reaching the slot's next owner.

use std::collections::VecDeque;

use crate::descriptor::HANDLE_SIZE;
use crate::error::{trap, Result, RuntimeError};

const SLOT_BITS: u32 = 24;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const MAX_SLOTS: usize = 1 << SLOT_BITS;

fn pack(slot: u32, generation: u8) -> u32 {
    slot | (u32::from(generation) << SLOT_BITS)
}

fn unpack(raw: u32) -> (u32, u8) {
    (raw & SLOT_MASK, (raw >> SLOT_BITS) as u8)
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub const NULL: $name = $name(0);
            pub(crate) const KIND: &'static str = $kind;

            /// Rebuild a handle from its 4-byte image read as a little-endian
            /// `u32`.
            pub fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            pub fn raw(self) -> u32 {
                self.0
            }

            pub fn slot(self) -> u32 {
                unpack(self.0).0
            }

            pub fn generation(self) -> u8 {
                unpack(self.0).1
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            pub fn to_bytes(self) -> [u8; HANDLE_SIZE] {
                self.0.to_le_bytes()
            }

            pub fn from_bytes(b: &[u8]) -> Result<Self> {
                let raw: [u8; HANDLE_SIZE] = b.try_into().map_err(|_| {
                    RuntimeError::compiler_logic(format!(
                        "{} handle image is {} bytes",
                        Self::KIND,
                        b.len()
                    ))
                })?;
                Ok($name(u32::from_le_bytes(raw)))
            }

            pub(crate) fn dangling(self) -> RuntimeError {
                RuntimeError::DanglingHandle {
                    kind: Self::KIND,
                    slot: self.slot(),
                    generation: self.generation(),
                }
            }
        }
    };
}

handle_type!(
    /// Strong handle to a runtime string.
    StrRef,
    "string"
);
handle_type!(
    /// Strong handle to a dynamic array.
    ArrayRef,
    "array"
);
handle_type!(
    /// Strong handle to a callable.
    CallableRef,
    "callable"
);

#[derive(Debug)]
struct Entry<T> {
    generation: u8,
    value: Option<T>,
}

/// Slot table backing one kind of heap object. Slot 0 is never handed out,
/// so an all-zero handle image is the null handle. Freed slots are reused
/// oldest first.
#[derive(Debug)]
pub(crate) struct Slots<T> {
    kind: &'static str,
    entries: Vec<Entry<T>>,
    free: VecDeque<u32>,
    live: usize,
}

impl<T> Slots<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Slots {
            kind,
            entries: vec![Entry {
                generation: 0,
                value: None,
            }],
            free: VecDeque::new(),
            live: 0,
        }
    }

    /// Store `value` and return its raw handle. Running out of the 24-bit
    /// slot space is fatal, like allocation failure.
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        let slot = match self.free.pop_front() {
            Some(slot) => slot,
            None => {
                if self.entries.len() >= MAX_SLOTS {
                    trap(&RuntimeError::HandleSpaceExhausted { kind: self.kind });
                }
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[slot as usize];
        entry.value = Some(value);
        self.live += 1;
        pack(slot, entry.generation)
    }

    fn entry(&self, raw: u32) -> Option<&Entry<T>> {
        let (slot, generation) = unpack(raw);
        if slot == 0 {
            return None;
        }
        self.entries
            .get(slot as usize)
            .filter(|e| e.generation == generation)
    }

    fn entry_mut(&mut self, raw: u32) -> Option<&mut Entry<T>> {
        let (slot, generation) = unpack(raw);
        if slot == 0 {
            return None;
        }
        self.entries
            .get_mut(slot as usize)
            .filter(|e| e.generation == generation)
    }

    pub(crate) fn get(&self, raw: u32) -> Option<&T> {
        self.entry(raw)?.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, raw: u32) -> Option<&mut T> {
        self.entry_mut(raw)?.value.as_mut()
    }

    pub(crate) fn take(&mut self, raw: u32) -> Option<T> {
        let entry = self.entry_mut(raw)?;
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.live -= 1;
        self.free.push_back(unpack(raw).0);
        Some(value)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_is_reserved() {
        let mut slots: Slots<&str> = Slots::new("test");
        let a = slots.insert("a");
        assert_eq!(unpack(a), (1, 0));
        assert!(slots.get(0).is_none());
        assert!(slots.take(0).is_none());
        assert_eq!(slots.get(a), Some(&"a"));
    }

    #[test]
    fn reused_slots_get_a_new_generation() {
        let mut slots: Slots<u8> = Slots::new("test");
        let a = slots.insert(1);
        let b = slots.insert(2);
        assert_eq!(slots.live(), 2);
        assert_eq!(slots.take(a), Some(1));
        assert_eq!(slots.take(a), None);
        assert_eq!(slots.live(), 1);

        let c = slots.insert(3);
        assert_eq!(unpack(c), (unpack(a).0, 1));
        assert_ne!(c, a);
        assert!(slots.get(a).is_none());
        assert!(slots.take(a).is_none());
        assert_eq!(slots.get(c), Some(&3));
        assert_eq!(slots.get(b), Some(&2));
        assert_eq!(slots.live(), 2);
    }

    #[test]
    fn freed_slots_are_reused_oldest_first() {
        let mut slots: Slots<u8> = Slots::new("test");
        let a = slots.insert(1);
        let b = slots.insert(2);
        slots.take(a);
        slots.take(b);
        assert_eq!(unpack(slots.insert(3)).0, unpack(a).0);
        assert_eq!(unpack(slots.insert(4)).0, unpack(b).0);
    }

    #[test]
    fn handle_images() {
        let h = ArrayRef::from_raw(0x0102_0304);
        assert_eq!(h.to_bytes(), [4, 3, 2, 1]);
        assert_eq!(h.slot(), 0x02_0304);
        assert_eq!(h.generation(), 1);
        assert_eq!(ArrayRef::from_bytes(&h.to_bytes()).expect("decode"), h);
        assert!(ArrayRef::from_bytes(&[1, 2]).is_err());
        assert!(StrRef::from_bytes(&[0; 4]).expect("decode").is_null());
    }
}
