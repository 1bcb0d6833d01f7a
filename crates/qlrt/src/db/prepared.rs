use crate::db::conn::Connection;
use crate::db::engine::{ColumnType, RawStatement, SQLITE_MISMATCH, SQLITE_TOOBIG};
use crate::db::params::{Allocation, ParamSlot, QueryValue};
use crate::descriptor::{FieldLayout, StructLayout, TypeDescriptor};
use crate::error::{Result, RuntimeError};
use crate::heap::ArrayRef;
use crate::runtime::Runtime;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// A compiled statement plus the table telling which placeholder each
/// logical parameter feeds. Reusable: executions reset it, and only the
/// parameters are rebound between runs.
#[derive(Debug)]
pub struct PreparedStatement {
    raw: RawStatement,
    kind: StatementKind,
    sql: String,
    params: Vec<Option<ParamSlot>>,
    /// Shape of the rows a SELECT produces.
    result: Option<&'static TypeDescriptor>,
    /// Shape of the rows fed to a per-call INSERT.
    input: Option<&'static TypeDescriptor>,
}

pub(crate) struct StatementParts {
    pub(crate) kind: StatementKind,
    pub(crate) sql: String,
    pub(crate) alloc: Allocation,
    pub(crate) result: Option<&'static TypeDescriptor>,
    pub(crate) input: Option<&'static TypeDescriptor>,
}

fn bind_value(raw: &mut RawStatement, rt: &Runtime, position: u32, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => raw.bind_int(position, *v),
        Value::Bool(v) => raw.bind_int(position, i32::from(*v)),
        Value::Str(s) => raw.bind_text(position, rt.string_bytes(*s)?),
        other => Err(RuntimeError::compiler_logic(format!(
            "cannot bind a {} value to placeholder {position}",
            other.tag().as_str()
        ))),
    }
}

fn bind_row(
    raw: &mut RawStatement,
    rt: &Runtime,
    start: u32,
    layout: &StructLayout,
    record: &[u8],
) -> Result<()> {
    for i in 0..layout.num_fields() {
        let v = layout.read_field(record, i)?;
        bind_value(raw, rt, start + i as u32, &v)?;
    }
    Ok(())
}

impl PreparedStatement {
    pub(crate) fn compile(rt: &Runtime, conn: &Connection, parts: StatementParts) -> Result<Self> {
        let limit = rt.config().max_sql_bytes as usize;
        if parts.sql.len() > limit {
            return Err(RuntimeError::Statement {
                op: "prepare",
                rc: SQLITE_TOOBIG,
                message: format!("statement text is {} bytes (limit {limit})", parts.sql.len()),
            });
        }
        tracing::debug!(kind = ?parts.kind, sql = %parts.sql, "prepare");
        let mut raw = conn.prepare_raw(&parts.sql)?;
        for (position, value) in &parts.alloc.literals {
            bind_value(&mut raw, rt, *position, value)?;
        }
        Ok(PreparedStatement {
            raw,
            kind: parts.kind,
            sql: parts.sql,
            params: parts.alloc.params,
            result: parts.result,
            input: parts.input,
        })
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn num_params(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn param_slot(&self, index: u32) -> Option<ParamSlot> {
        self.params.get(index as usize).copied().flatten()
    }

    pub fn param_position(&self, index: u32) -> Option<u32> {
        self.param_slot(index).map(|s| s.position)
    }

    /// Largest placeholder number in the statement text.
    pub fn placeholder_count(&self) -> usize {
        self.raw.bind_parameter_count()
    }

    pub fn result_type(&self) -> Option<&'static TypeDescriptor> {
        self.result
    }

    /// `None` for parameters the statement never references.
    fn lookup(&self, index: u32, width: u32) -> Result<Option<u32>> {
        let Some(entry) = self.params.get(index as usize) else {
            return Err(RuntimeError::compiler_logic(format!(
                "logical parameter {index} out of range ({} declared)",
                self.params.len()
            )));
        };
        let Some(slot) = entry else {
            tracing::trace!(index, sql = %self.sql, "parameter not referenced; bind skipped");
            return Ok(None);
        };
        if slot.width != width {
            return Err(RuntimeError::compiler_logic(format!(
                "logical parameter {index} spans {} placeholders, bound with {width}",
                slot.width
            )));
        }
        Ok(Some(slot.position))
    }

    /// Bind one logical parameter. A parameter marker here means the code
    /// generator forgot to resolve an argument.
    pub fn bind_scalar_param(&mut self, rt: &Runtime, index: u32, value: &QueryValue) -> Result<()> {
        match value {
            QueryValue::Literal(v) => self.bind_param(rt, index, v),
            QueryValue::Param(_) => Err(RuntimeError::compiler_logic(
                "unexpected parameter marker in scalar bind",
            )),
        }
    }

    pub fn bind_param(&mut self, rt: &Runtime, index: u32, value: &Value) -> Result<()> {
        let Some(position) = self.lookup(index, 1)? else {
            return Ok(());
        };
        bind_value(&mut self.raw, rt, position, value)
    }

    /// Bind a row-shaped parameter: one placeholder per field, in field
    /// order, starting at the parameter's recorded position.
    pub fn bind_row_param(
        &mut self,
        rt: &Runtime,
        index: u32,
        row: &TypeDescriptor,
        record: &[u8],
    ) -> Result<()> {
        let layout = row.expect_struct("row parameter")?;
        let Some(start) = self.lookup(index, layout.num_fields() as u32)? else {
            return Ok(());
        };
        bind_row(&mut self.raw, rt, start, layout, record)
    }

    /// Insert one row through a per-call INSERT.
    pub fn exec_row(&mut self, rt: &Runtime, record: &[u8]) -> Result<()> {
        let Some(row) = self.input else {
            return Err(RuntimeError::compiler_logic(format!(
                "exec_row on a statement without per-call rows: {}",
                self.sql
            )));
        };
        let layout = row.expect_struct("insert row")?;
        bind_row(&mut self.raw, rt, 1, layout, record)?;
        self.step_once()
    }

    /// Insert every element of `rows`, in index order.
    pub fn exec_array(&mut self, rt: &Runtime, rows: ArrayRef) -> Result<()> {
        let elem = rt.array_element_type(rows)?;
        if self.input != Some(elem) {
            return Err(RuntimeError::compiler_logic(format!(
                "array of {} fed to {}",
                elem.tag().as_str(),
                self.sql
            )));
        }
        for i in 0..rt.array_len(rows)? {
            self.exec_row(rt, rt.array_index(rows, i)?)?;
        }
        Ok(())
    }

    fn step_once(&mut self) -> Result<()> {
        let res = self.raw.step().map(|_| ());
        self.raw.reset();
        res
    }

    /// Run the statement with whatever is currently bound. Statements
    /// without a result shape step once; SELECTs collect every row into a
    /// fresh array. The statement is reset either way and stays usable.
    pub fn execute(&mut self, rt: &mut Runtime) -> Result<Option<ArrayRef>> {
        let Some(row) = self.result else {
            self.step_once()?;
            return Ok(None);
        };
        let out = rt.array_new(row, &[], 0)?;
        let res = self.collect_rows(rt, row, out);
        self.raw.reset();
        match res {
            Ok(()) => Ok(Some(out)),
            Err(err) => {
                rt.array_release(out)?;
                Err(err)
            }
        }
    }

    fn collect_rows(
        &mut self,
        rt: &mut Runtime,
        row: &'static TypeDescriptor,
        out: ArrayRef,
    ) -> Result<()> {
        let layout = row.expect_struct("result row")?;
        let ncols = self.raw.column_count();
        let mut record = vec![0u8; layout.size()];
        while self.raw.step()? {
            record.fill(0);
            // Fields past the last result column read as NULL.
            for (i, field) in layout.fields().iter().enumerate() {
                let filled = self
                    .read_column(rt, i, ncols, field)
                    .and_then(|v| v.write_to(field.ty, &mut record[field.range()]));
                if let Err(err) = filled {
                    rt.drop_value(row, &record)?;
                    return Err(err);
                }
            }
            rt.array_append(out, &record)?;
        }
        Ok(())
    }

    fn read_column(
        &self,
        rt: &mut Runtime,
        i: usize,
        ncols: usize,
        field: &FieldLayout,
    ) -> Result<Value> {
        let column = if i < ncols {
            self.raw.column_type(i)
        } else {
            ColumnType::Null
        };
        Ok(match (column, field.ty) {
            (ColumnType::Integer, TypeDescriptor::Int) => Value::Int(self.raw.column_int(i)),
            (ColumnType::Integer, TypeDescriptor::Bool) => Value::Bool(self.raw.column_int(i) != 0),
            (ColumnType::Text, TypeDescriptor::String) => {
                Value::Str(rt.string_from_vec(self.raw.column_text(i)))
            }
            (ColumnType::Null, TypeDescriptor::Int) => Value::Int(0),
            (ColumnType::Null, TypeDescriptor::Bool) => Value::Bool(false),
            (ColumnType::Null, TypeDescriptor::String) => Value::Str(rt.string_from_vec(Vec::new())),
            (column, ty) => {
                return Err(RuntimeError::Statement {
                    op: "column",
                    rc: SQLITE_MISMATCH,
                    message: format!(
                        "column {i} ({column:?}) does not fit field `{}` ({})",
                        field.name,
                        ty.tag().as_str()
                    ),
                })
            }
        })
    }

    pub fn finalize(self) {
        tracing::debug!(kind = ?self.kind, sql = %self.sql, "finalize");
    }
}
