use crate::db::conn::Connection;
use crate::db::params::{push_placeholder, PlaceholderAllocator};
use crate::db::prepared::{PreparedStatement, StatementKind, StatementParts};
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;

/// Where an INSERT's row comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InsertValues {
    /// Every `exec_row` / `exec_array` call supplies the row.
    #[default]
    PerCall,
    /// A row image fixed into the plan and bound at prepare time.
    Row(Vec<u8>),
    /// The whole row is logical parameter `k`, bound per call with
    /// `bind_row_param`.
    Param(u32),
}

#[derive(Debug)]
pub struct InsertPlan {
    table: String,
    row: &'static TypeDescriptor,
    num_params: u32,
    values: InsertValues,
}

impl InsertPlan {
    pub fn new(table: impl Into<String>, row: &'static TypeDescriptor, num_params: u32) -> Self {
        InsertPlan {
            table: table.into(),
            row,
            num_params,
            values: InsertValues::PerCall,
        }
    }

    pub fn set_values(&mut self, values: InsertValues) {
        self.values = values;
    }

    /// `INSERT INTO <table> VALUES (?1, ?2, ..., ?n);`
    pub fn prepare(self, rt: &Runtime, conn: &Connection) -> Result<PreparedStatement> {
        let layout = self.row.expect_struct("insert row")?;
        let width = layout.num_fields() as u32;
        if width == 0 {
            return Err(RuntimeError::compiler_logic(format!(
                "insert into `{}` with an empty row type",
                self.table
            )));
        }
        let mut alloc = PlaceholderAllocator::new(self.num_params);
        let (start, input) = match &self.values {
            InsertValues::PerCall => (alloc.per_call_row(layout), Some(self.row)),
            InsertValues::Row(record) => (alloc.literal_row(layout, record)?, None),
            InsertValues::Param(k) => (alloc.row_param(*k, layout)?, None),
        };

        let mut sql = String::from("INSERT INTO ");
        sql.push_str(&self.table);
        sql.push_str(" VALUES (");
        for i in 0..width {
            if i > 0 {
                sql.push_str(", ");
            }
            push_placeholder(&mut sql, start + i);
        }
        sql.push_str(");");

        PreparedStatement::compile(
            rt,
            conn,
            StatementParts {
                kind: StatementKind::Insert,
                sql,
                alloc: alloc.finish(),
                result: None,
                input,
            },
        )
    }
}
