use std::cmp::Ordering;

use crate::error::Result;
use crate::heap::StrRef;
use crate::runtime::{ReleaseEvent, Runtime};

#[derive(Debug)]
pub(crate) enum StrBacking {
    Owned(Vec<u8>),
    /// Literal text baked into the program image; never freed.
    Static(&'static [u8]),
}

#[derive(Debug)]
pub(crate) struct StringObj {
    backing: StrBacking,
    strong: u32,
}

impl StringObj {
    fn bytes(&self) -> &[u8] {
        match &self.backing {
            StrBacking::Owned(v) => v,
            StrBacking::Static(s) => s,
        }
    }
}

/// Memcmp over the shared prefix, then shorter-first.
pub fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        ord => ord,
    }
}

impl Runtime {
    fn string_new(&mut self, backing: StrBacking) -> StrRef {
        StrRef::from_raw(self.strings.insert(StringObj { backing, strong: 1 }))
    }

    /// Borrow literal text. The bytes are never freed by the runtime.
    pub fn string_from_static(&mut self, bytes: &'static [u8]) -> StrRef {
        self.string_new(StrBacking::Static(bytes))
    }

    pub fn string_from_vec(&mut self, bytes: Vec<u8>) -> StrRef {
        self.string_new(StrBacking::Owned(bytes))
    }

    fn string_obj(&self, s: StrRef) -> Result<&StringObj> {
        self.strings.get(s.raw()).ok_or_else(|| s.dangling())
    }

    pub fn string_bytes(&self, s: StrRef) -> Result<&[u8]> {
        Ok(self.string_obj(s)?.bytes())
    }

    pub fn string_len(&self, s: StrRef) -> Result<usize> {
        Ok(self.string_bytes(s)?.len())
    }

    /// Always allocates a fresh owning string.
    pub fn string_concat(&mut self, a: StrRef, b: StrRef) -> Result<StrRef> {
        let (lhs, rhs) = (self.string_bytes(a)?, self.string_bytes(b)?);
        let mut out = Vec::with_capacity(lhs.len() + rhs.len());
        out.extend_from_slice(lhs);
        out.extend_from_slice(rhs);
        Ok(self.string_from_vec(out))
    }

    pub fn string_compare(&self, a: StrRef, b: StrRef) -> Result<Ordering> {
        Ok(compare_bytes(self.string_bytes(a)?, self.string_bytes(b)?))
    }

    pub fn string_ref_count(&self, s: StrRef) -> Result<u32> {
        Ok(self.string_obj(s)?.strong)
    }

    pub fn string_add_ref(&mut self, s: StrRef) -> Result<()> {
        let obj = self.strings.get_mut(s.raw()).ok_or_else(|| s.dangling())?;
        obj.strong += 1;
        Ok(())
    }

    pub fn string_release(&mut self, s: StrRef) -> Result<()> {
        let obj = self.strings.get_mut(s.raw()).ok_or_else(|| s.dangling())?;
        obj.strong -= 1;
        if obj.strong > 0 {
            return Ok(());
        }
        let Some(obj) = self.strings.take(s.raw()) else {
            return Err(s.dangling());
        };
        let freed_backing = matches!(obj.backing, StrBacking::Owned(_));
        drop(obj);
        self.record(ReleaseEvent::String {
            handle: s,
            freed_backing,
        });
        Ok(())
    }
}
