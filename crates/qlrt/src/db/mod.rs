//! Query plans and prepared statements over SQLite.
//!
//! Every plan is a one-way builder: construct it, attach clauses, then
//! `prepare` consumes it and yields a [`PreparedStatement`]. Table and
//! column names come from the compiler and are interpolated unescaped.

mod conn;
mod delete;
mod engine;
mod insert;
mod params;
mod prepared;
mod select;
mod update;

pub use conn::{Connection, ConnectionSet};
pub use delete::DeletePlan;
pub use engine::ColumnType;
pub use insert::{InsertPlan, InsertValues};
pub use params::{ParamSlot, QueryValue};
pub use prepared::{PreparedStatement, StatementKind};
pub use select::SelectPlan;
pub use update::{Assignment, UpdatePlan};

use crate::descriptor::StructLayout;
use crate::error::{Result, RuntimeError};
use params::{push_placeholder, PlaceholderAllocator};

/// `WHERE <column> = <value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereClause {
    pub column: String,
    pub value: QueryValue,
}

fn push_where(
    sql: &mut String,
    alloc: &mut PlaceholderAllocator,
    filter: Option<&WhereClause>,
) -> Result<()> {
    let Some(filter) = filter else {
        return Ok(());
    };
    let p = alloc.scalar(&filter.value)?;
    sql.push_str(" WHERE ");
    sql.push_str(&filter.column);
    sql.push_str(" = ");
    push_placeholder(sql, p);
    Ok(())
}

fn check_column(table: &str, layout: &StructLayout, column: &str) -> Result<()> {
    if layout.field_index(column).is_none() {
        return Err(RuntimeError::compiler_logic(format!(
            "table `{table}` has no column `{column}`"
        )));
    }
    Ok(())
}
