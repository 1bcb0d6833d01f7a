use crate::db::conn::Connection;
use crate::db::params::{push_placeholder, PlaceholderAllocator, QueryValue};
use crate::db::prepared::{PreparedStatement, StatementKind, StatementParts};
use crate::db::{check_column, push_where, WhereClause};
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// `<column> = <value>`
    Column { column: String, value: QueryValue },
    /// One `<field> = ?` per row field, fed by row-shaped parameter `param`.
    Row { param: u32 },
}

#[derive(Debug)]
pub struct UpdatePlan {
    table: String,
    row: &'static TypeDescriptor,
    num_params: u32,
    assignments: Vec<Assignment>,
    filter: Option<WhereClause>,
}

impl UpdatePlan {
    pub fn new(table: impl Into<String>, row: &'static TypeDescriptor, num_params: u32) -> Self {
        UpdatePlan {
            table: table.into(),
            row,
            num_params,
            assignments: Vec::new(),
            filter: None,
        }
    }

    pub fn add_assignment(&mut self, column: impl Into<String>, value: QueryValue) {
        self.assignments.push(Assignment::Column {
            column: column.into(),
            value,
        });
    }

    pub fn assign_row(&mut self, param: u32) {
        self.assignments.push(Assignment::Row { param });
    }

    pub fn set_where(&mut self, column: impl Into<String>, value: QueryValue) {
        self.filter = Some(WhereClause {
            column: column.into(),
            value,
        });
    }

    /// `UPDATE <table> SET c1 = ?i1, c2 = ?i2, ... [WHERE cw = ?iw];`
    pub fn prepare(self, rt: &Runtime, conn: &Connection) -> Result<PreparedStatement> {
        let layout = self.row.expect_struct("update row")?;
        if self.assignments.is_empty() {
            return Err(RuntimeError::compiler_logic(format!(
                "update of `{}` without assignments",
                self.table
            )));
        }
        let mut alloc = PlaceholderAllocator::new(self.num_params);
        let mut sql = String::from("UPDATE ");
        sql.push_str(&self.table);
        sql.push_str(" SET ");
        let mut first = true;
        let mut set = |sql: &mut String, column: &str, p: u32| {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            sql.push_str(column);
            sql.push_str(" = ");
            push_placeholder(sql, p);
        };
        for assignment in &self.assignments {
            match assignment {
                Assignment::Column { column, value } => {
                    check_column(&self.table, layout, column)?;
                    let p = alloc.scalar(value)?;
                    set(&mut sql, column.as_str(), p);
                }
                Assignment::Row { param } => {
                    let start = alloc.row_param(*param, layout)?;
                    for (i, field) in layout.fields().iter().enumerate() {
                        set(&mut sql, &*field.name, start + i as u32);
                    }
                }
            }
        }
        if let Some(filter) = &self.filter {
            check_column(&self.table, layout, &filter.column)?;
        }
        push_where(&mut sql, &mut alloc, self.filter.as_ref())?;
        sql.push(';');

        PreparedStatement::compile(
            rt,
            conn,
            StatementParts {
                kind: StatementKind::Update,
                sql,
                alloc: alloc.finish(),
                result: None,
                input: None,
            },
        )
    }
}
