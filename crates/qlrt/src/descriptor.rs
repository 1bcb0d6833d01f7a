//! Runtime type descriptors.
//!
//! A descriptor is plain metadata: it says how many bytes a value occupies
//! and, for records, where each field lives and what it is. Descriptors are
//! never reference counted; generated code keeps them in statics and tests
//! build them with [`StructBuilder::leak`].

use crate::error::{Result, RuntimeError};
use crate::value::Value;

pub const INT_SIZE: usize = 4;
pub const BOOL_SIZE: usize = 1;
pub const HANDLE_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Bool,
    String,
    Array,
    Struct,
    Callable,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Bool => "bool",
            TypeTag::String => "string",
            TypeTag::Array => "array",
            TypeTag::Struct => "struct",
            TypeTag::Callable => "callable",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TypeDescriptor {
    Int,
    Bool,
    String,
    Array,
    Callable,
    Struct(StructLayout),
}

pub static INT: TypeDescriptor = TypeDescriptor::Int;
pub static BOOL: TypeDescriptor = TypeDescriptor::Bool;
pub static STRING: TypeDescriptor = TypeDescriptor::String;
pub static ARRAY: TypeDescriptor = TypeDescriptor::Array;
pub static CALLABLE: TypeDescriptor = TypeDescriptor::Callable;

impl TypeDescriptor {
    pub fn tag(&self) -> TypeTag {
        match self {
            TypeDescriptor::Int => TypeTag::Int,
            TypeDescriptor::Bool => TypeTag::Bool,
            TypeDescriptor::String => TypeTag::String,
            TypeDescriptor::Array => TypeTag::Array,
            TypeDescriptor::Callable => TypeTag::Callable,
            TypeDescriptor::Struct(_) => TypeTag::Struct,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            TypeDescriptor::Int => INT_SIZE,
            TypeDescriptor::Bool => BOOL_SIZE,
            TypeDescriptor::String | TypeDescriptor::Array | TypeDescriptor::Callable => {
                HANDLE_SIZE
            }
            TypeDescriptor::Struct(layout) => layout.size,
        }
    }

    /// Whether releasing a value of this type has to do anything.
    pub fn needs_drop(&self) -> bool {
        match self {
            TypeDescriptor::Int | TypeDescriptor::Bool => false,
            TypeDescriptor::String | TypeDescriptor::Array | TypeDescriptor::Callable => true,
            TypeDescriptor::Struct(layout) => layout.fields.iter().any(|f| f.ty.needs_drop()),
        }
    }

    pub fn as_struct(&self) -> Option<&StructLayout> {
        match self {
            TypeDescriptor::Struct(layout) => Some(layout),
            _ => None,
        }
    }

    pub(crate) fn expect_struct(&self, what: &str) -> Result<&StructLayout> {
        self.as_struct().ok_or_else(|| {
            RuntimeError::compiler_logic(format!(
                "{what} requires a struct descriptor, got {}",
                self.tag().as_str()
            ))
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: Box<str>,
    pub offset: usize,
    pub ty: &'static TypeDescriptor,
}

impl FieldLayout {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.ty.size()
    }
}

/// Packed record layout: fields follow each other in declaration order.
#[derive(Debug, PartialEq, Eq)]
pub struct StructLayout {
    size: usize,
    fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Result<&FieldLayout> {
        self.fields.get(index).ok_or(RuntimeError::OutOfRange {
            index,
            len: self.fields.len(),
        })
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &*f.name == name)
    }

    /// Generic "read field N" hook used by the query layer.
    pub fn read_field(&self, record: &[u8], index: usize) -> Result<Value> {
        self.check_record(record)?;
        let field = self.field(index)?;
        Value::decode(field.ty, &record[field.range()])
    }

    /// Generic "write field N" hook used by the query layer.
    pub fn write_field(&self, record: &mut [u8], index: usize, value: &Value) -> Result<()> {
        self.check_record(record)?;
        let field = self.field(index)?;
        value.write_to(field.ty, &mut record[field.range()])
    }

    pub(crate) fn check_record(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.size {
            return Err(RuntimeError::compiler_logic(format!(
                "record image is {} bytes, layout expects {}",
                record.len(),
                self.size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StructBuilder {
    size: usize,
    fields: Vec<FieldLayout>,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, ty: &'static TypeDescriptor) -> Self {
        self.fields.push(FieldLayout {
            name: name.into(),
            offset: self.size,
            ty,
        });
        self.size += ty.size();
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor::Struct(StructLayout {
            size: self.size,
            fields: self.fields,
        })
    }

    /// Build and give the descriptor process lifetime.
    pub fn leak(self) -> &'static TypeDescriptor {
        Box::leak(Box::new(self.build()))
    }
}
