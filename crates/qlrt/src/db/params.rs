//! Placeholder numbering for generated statements.
//!
//! Placeholders are handed out left to right in clause order. A literal
//! always takes a fresh number and is bound once at prepare time. A logical
//! parameter takes a fresh number the first time it shows up; any later
//! reference to the same parameter index reuses that number, so SQLite fans
//! a single bind out to every position. Equal runtime values under
//! different parameter indices are never merged.

use crate::descriptor::StructLayout;
use crate::error::{Result, RuntimeError};
use crate::value::Value;

/// A value slot in a query plan: either known now, or an index into the
/// arguments of the callable that will run the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Literal(Value),
    Param(u32),
}

impl QueryValue {
    pub fn int(v: i32) -> Self {
        QueryValue::Literal(Value::Int(v))
    }

    pub fn param(index: u32) -> Self {
        QueryValue::Param(index)
    }
}

/// Placeholders owned by one logical parameter: `width` consecutive numbers
/// starting at `position` (width is 1 for scalars, the field count for rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    pub position: u32,
    pub width: u32,
}

#[derive(Debug)]
pub(crate) struct PlaceholderAllocator {
    next: u32,
    params: Vec<Option<ParamSlot>>,
    literals: Vec<(u32, Value)>,
}

pub(crate) struct Allocation {
    pub(crate) params: Vec<Option<ParamSlot>>,
    pub(crate) literals: Vec<(u32, Value)>,
}

fn check_scalar_literal(v: &Value) -> Result<()> {
    match v {
        Value::Int(_) | Value::Bool(_) | Value::Str(_) => Ok(()),
        other => Err(RuntimeError::compiler_logic(format!(
            "{} literal in a query plan",
            other.tag().as_str()
        ))),
    }
}

impl PlaceholderAllocator {
    pub(crate) fn new(num_params: u32) -> Self {
        PlaceholderAllocator {
            next: 1,
            params: vec![None; num_params as usize],
            literals: Vec::new(),
        }
    }

    fn fresh(&mut self, width: u32) -> u32 {
        let p = self.next;
        self.next += width;
        p
    }

    fn param_entry(&mut self, index: u32) -> Result<&mut Option<ParamSlot>> {
        let declared = self.params.len();
        self.params.get_mut(index as usize).ok_or_else(|| {
            RuntimeError::compiler_logic(format!(
                "logical parameter {index} out of range ({declared} declared)"
            ))
        })
    }

    fn claim(&mut self, index: u32, width: u32) -> Result<u32> {
        if let Some(slot) = *self.param_entry(index)? {
            if slot.width != width {
                return Err(RuntimeError::compiler_logic(format!(
                    "logical parameter {index} used with width {} and {width}",
                    slot.width
                )));
            }
            return Ok(slot.position);
        }
        let position = self.fresh(width);
        *self.param_entry(index)? = Some(ParamSlot { position, width });
        Ok(position)
    }

    /// Placeholder number for one scalar value slot.
    pub(crate) fn scalar(&mut self, value: &QueryValue) -> Result<u32> {
        match value {
            QueryValue::Literal(v) => {
                check_scalar_literal(v)?;
                let p = self.fresh(1);
                self.literals.push((p, v.clone()));
                Ok(p)
            }
            QueryValue::Param(index) => self.claim(*index, 1),
        }
    }

    /// First placeholder of the run owned by a row-shaped parameter.
    pub(crate) fn row_param(&mut self, index: u32, layout: &StructLayout) -> Result<u32> {
        self.claim(index, layout.num_fields() as u32)
    }

    /// Fresh run for a literal row; each field is bound at prepare time.
    pub(crate) fn literal_row(&mut self, layout: &StructLayout, record: &[u8]) -> Result<u32> {
        let start = self.fresh(layout.num_fields() as u32);
        for i in 0..layout.num_fields() {
            let v = layout.read_field(record, i)?;
            check_scalar_literal(&v)?;
            self.literals.push((start + i as u32, v));
        }
        Ok(start)
    }

    /// Fresh run bound by the caller on every execution.
    pub(crate) fn per_call_row(&mut self, layout: &StructLayout) -> u32 {
        self.fresh(layout.num_fields() as u32)
    }

    pub(crate) fn finish(self) -> Allocation {
        Allocation {
            params: self.params,
            literals: self.literals,
        }
    }
}

/// Append `?n`.
pub(crate) fn push_placeholder(sql: &mut String, n: u32) {
    let mut buf = itoa::Buffer::new();
    sql.push('?');
    sql.push_str(buf.format(n));
}
