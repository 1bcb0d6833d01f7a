use crate::descriptor::TypeDescriptor;
use crate::error::{Result, RuntimeError};
use crate::heap::ArrayRef;
use crate::runtime::{ReleaseEvent, Runtime};
use crate::value::Value;

pub const MIN_CAPACITY: usize = 8;

/// Capacity chosen for an array created with `count` elements.
pub fn initial_capacity(count: usize) -> usize {
    count.next_power_of_two().max(MIN_CAPACITY)
}

#[derive(Debug)]
pub(crate) struct ArrayObj {
    elem: &'static TypeDescriptor,
    len: usize,
    cap: usize,
    /// Exactly `len * elem.size()` bytes of live elements.
    data: Vec<u8>,
    strong: u32,
}

impl ArrayObj {
    fn slot_range(&self, index: usize) -> Result<std::ops::Range<usize>> {
        if index >= self.len {
            return Err(RuntimeError::OutOfRange {
                index,
                len: self.len,
            });
        }
        let size = self.elem.size();
        Ok(index * size..(index + 1) * size)
    }

    fn check_image(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.elem.size() {
            return Err(RuntimeError::compiler_logic(format!(
                "array of {} expects {}-byte elements, got {}",
                self.elem.tag().as_str(),
                self.elem.size(),
                bytes.len()
            )));
        }
        Ok(())
    }
}

impl Runtime {
    /// Create an array holding a bulk copy of `count` element images.
    pub fn array_new(
        &mut self,
        elem: &'static TypeDescriptor,
        initial: &[u8],
        count: usize,
    ) -> Result<ArrayRef> {
        let size = elem.size();
        if initial.len() != count * size {
            return Err(RuntimeError::compiler_logic(format!(
                "array_new: {} bytes for {count} elements of {size} bytes",
                initial.len()
            )));
        }
        let cap = initial_capacity(count);
        let mut data = Vec::with_capacity(cap * size);
        data.extend_from_slice(initial);
        let raw = self.arrays.insert(ArrayObj {
            elem,
            len: count,
            cap,
            data,
            strong: 1,
        });
        Ok(ArrayRef::from_raw(raw))
    }

    pub fn array_from_values(
        &mut self,
        elem: &'static TypeDescriptor,
        values: &[Value],
    ) -> Result<ArrayRef> {
        let mut images = Vec::with_capacity(values.len() * elem.size());
        for v in values {
            images.extend_from_slice(&v.encode(elem)?);
        }
        self.array_new(elem, &images, values.len())
    }

    fn array_obj(&self, a: ArrayRef) -> Result<&ArrayObj> {
        self.arrays.get(a.raw()).ok_or_else(|| a.dangling())
    }

    fn array_obj_mut(&mut self, a: ArrayRef) -> Result<&mut ArrayObj> {
        self.arrays.get_mut(a.raw()).ok_or_else(|| a.dangling())
    }

    pub fn array_len(&self, a: ArrayRef) -> Result<usize> {
        Ok(self.array_obj(a)?.len)
    }

    pub fn array_capacity(&self, a: ArrayRef) -> Result<usize> {
        Ok(self.array_obj(a)?.cap)
    }

    pub fn array_element_type(&self, a: ArrayRef) -> Result<&'static TypeDescriptor> {
        Ok(self.array_obj(a)?.elem)
    }

    /// Copy one element image onto the end, doubling capacity when full.
    pub fn array_append(&mut self, a: ArrayRef, value: &[u8]) -> Result<()> {
        let obj = self.array_obj_mut(a)?;
        obj.check_image(value)?;
        if obj.len == obj.cap {
            obj.cap *= 2;
            let want = obj.cap * obj.elem.size();
            obj.data.reserve_exact(want - obj.data.len());
        }
        obj.data.extend_from_slice(value);
        obj.len += 1;
        Ok(())
    }

    pub fn array_push_value(&mut self, a: ArrayRef, value: &Value) -> Result<()> {
        let image = value.encode(self.array_element_type(a)?)?;
        self.array_append(a, &image)
    }

    pub fn array_index(&self, a: ArrayRef, index: usize) -> Result<&[u8]> {
        let obj = self.array_obj(a)?;
        let range = obj.slot_range(index)?;
        Ok(&obj.data[range])
    }

    /// Writable element slot. Whatever the slot held is overwritten without
    /// being dropped; the caller owns that decision.
    pub fn array_index_mut(&mut self, a: ArrayRef, index: usize) -> Result<&mut [u8]> {
        let obj = self.array_obj_mut(a)?;
        let range = obj.slot_range(index)?;
        Ok(&mut obj.data[range])
    }

    pub fn array_get(&self, a: ArrayRef, index: usize) -> Result<Value> {
        let elem = self.array_element_type(a)?;
        Value::decode(elem, self.array_index(a, index)?)
    }

    /// Remove the last element and hand its image to the caller. Nested
    /// reference counts are left alone: the caller now owns them.
    pub fn array_pop(&mut self, a: ArrayRef) -> Result<Vec<u8>> {
        let obj = self.array_obj_mut(a)?;
        if obj.len == 0 {
            return Err(RuntimeError::Underflow);
        }
        obj.len -= 1;
        let at = obj.len * obj.elem.size();
        Ok(obj.data.split_off(at))
    }

    pub fn array_pop_value(&mut self, a: ArrayRef) -> Result<Value> {
        let elem = self.array_element_type(a)?;
        let image = self.array_pop(a)?;
        Value::decode(elem, &image)
    }

    pub fn array_ref_count(&self, a: ArrayRef) -> Result<u32> {
        Ok(self.array_obj(a)?.strong)
    }

    pub fn array_add_ref(&mut self, a: ArrayRef) -> Result<()> {
        self.array_obj_mut(a)?.strong += 1;
        Ok(())
    }

    /// Drop one reference. At zero every live element is dropped in index
    /// order (when the element type owns anything) before the storage goes.
    pub fn array_release(&mut self, a: ArrayRef) -> Result<()> {
        let obj = self.array_obj_mut(a)?;
        obj.strong -= 1;
        if obj.strong > 0 {
            return Ok(());
        }
        let Some(obj) = self.arrays.take(a.raw()) else {
            return Err(a.dangling());
        };
        // Keep going past a failed element so the rest are still released.
        let mut first_err = None;
        if obj.elem.needs_drop() {
            for image in obj.data.chunks_exact(obj.elem.size()) {
                if let Err(err) = self.drop_value(obj.elem, image) {
                    first_err.get_or_insert(err);
                }
            }
        }
        self.record(ReleaseEvent::Array {
            handle: a,
            len: obj.len,
        });
        first_err.map_or(Ok(()), Err)
    }
}
