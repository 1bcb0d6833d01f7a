use crate::descriptor::{TypeDescriptor, TypeTag, BOOL_SIZE, INT_SIZE};
use crate::error::{Result, RuntimeError};
use crate::heap::{ArrayRef, CallableRef, StrRef};

/// Typed view of a value image.
///
/// Handles inside a `Value` are plain copies: building or decoding a
/// `Value` never changes a reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Str(StrRef),
    Array(ArrayRef),
    Callable(CallableRef),
    Struct(Vec<Value>),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Bool(_) => TypeTag::Bool,
            Value::Str(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Callable(_) => TypeTag::Callable,
            Value::Struct(_) => TypeTag::Struct,
        }
    }

    pub fn encode(&self, ty: &TypeDescriptor) -> Result<Vec<u8>> {
        let mut out = vec![0u8; ty.size()];
        self.write_to(ty, &mut out)?;
        Ok(out)
    }

    pub fn write_to(&self, ty: &TypeDescriptor, out: &mut [u8]) -> Result<()> {
        if out.len() != ty.size() {
            return Err(RuntimeError::compiler_logic(format!(
                "{} slot is {} bytes, descriptor expects {}",
                ty.tag().as_str(),
                out.len(),
                ty.size()
            )));
        }
        match (self, ty) {
            (Value::Int(v), TypeDescriptor::Int) => out.copy_from_slice(&v.to_le_bytes()),
            (Value::Bool(v), TypeDescriptor::Bool) => out[0] = u8::from(*v),
            (Value::Str(h), TypeDescriptor::String) => out.copy_from_slice(&h.to_bytes()),
            (Value::Array(h), TypeDescriptor::Array) => out.copy_from_slice(&h.to_bytes()),
            (Value::Callable(h), TypeDescriptor::Callable) => out.copy_from_slice(&h.to_bytes()),
            (Value::Struct(items), TypeDescriptor::Struct(layout)) => {
                if items.len() != layout.num_fields() {
                    return Err(RuntimeError::compiler_logic(format!(
                        "struct value has {} fields, layout has {}",
                        items.len(),
                        layout.num_fields()
                    )));
                }
                for (item, field) in items.iter().zip(layout.fields()) {
                    item.write_to(field.ty, &mut out[field.range()])?;
                }
            }
            _ => return Err(mismatch(self.tag(), ty.tag())),
        }
        Ok(())
    }

    pub fn decode(ty: &TypeDescriptor, bytes: &[u8]) -> Result<Value> {
        if bytes.len() != ty.size() {
            return Err(RuntimeError::compiler_logic(format!(
                "{} image is {} bytes, descriptor expects {}",
                ty.tag().as_str(),
                bytes.len(),
                ty.size()
            )));
        }
        Ok(match ty {
            TypeDescriptor::Int => {
                let mut raw = [0u8; INT_SIZE];
                raw.copy_from_slice(bytes);
                Value::Int(i32::from_le_bytes(raw))
            }
            TypeDescriptor::Bool => Value::Bool(bytes[..BOOL_SIZE] != [0]),
            TypeDescriptor::String => Value::Str(StrRef::from_bytes(bytes)?),
            TypeDescriptor::Array => Value::Array(ArrayRef::from_bytes(bytes)?),
            TypeDescriptor::Callable => Value::Callable(CallableRef::from_bytes(bytes)?),
            TypeDescriptor::Struct(layout) => Value::Struct(
                layout
                    .fields()
                    .iter()
                    .map(|f| Value::decode(f.ty, &bytes[f.range()]))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<StrRef> {
        match self {
            Value::Str(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<ArrayRef> {
        match self {
            Value::Array(h) => Some(*h),
            _ => None,
        }
    }

    pub fn into_fields(self) -> Option<Vec<Value>> {
        match self {
            Value::Struct(items) => Some(items),
            _ => None,
        }
    }
}

fn mismatch(have: TypeTag, want: TypeTag) -> RuntimeError {
    RuntimeError::compiler_logic(format!(
        "{} value stored into {} slot",
        have.as_str(),
        want.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{StructBuilder, INT, STRING};

    #[test]
    fn struct_images_use_field_offsets() {
        let row = StructBuilder::new()
            .field("id", &INT)
            .field("name", &STRING)
            .build();
        let v = Value::Struct(vec![Value::Int(7), Value::Str(StrRef::from_raw(3))]);
        let bytes = v.encode(&row).expect("encode");
        assert_eq!(bytes, vec![7, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(Value::decode(&row, &bytes).expect("decode"), v);
    }

    #[test]
    fn wrong_shapes_are_compiler_errors() {
        let row = StructBuilder::new().field("id", &INT).build();
        assert!(Value::Struct(vec![]).encode(&row).is_err());
        assert!(Value::Bool(true).encode(&INT).is_err());
        assert!(Value::decode(&INT, &[1, 2]).is_err());
    }
}
