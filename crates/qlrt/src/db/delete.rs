use crate::db::conn::Connection;
use crate::db::params::{PlaceholderAllocator, QueryValue};
use crate::db::prepared::{PreparedStatement, StatementKind, StatementParts};
use crate::db::{push_where, WhereClause};
use crate::error::Result;
use crate::runtime::Runtime;

#[derive(Debug)]
pub struct DeletePlan {
    table: String,
    num_params: u32,
    filter: Option<WhereClause>,
}

impl DeletePlan {
    pub fn new(table: impl Into<String>, num_params: u32) -> Self {
        DeletePlan {
            table: table.into(),
            num_params,
            filter: None,
        }
    }

    pub fn set_where(&mut self, column: impl Into<String>, value: QueryValue) {
        self.filter = Some(WhereClause {
            column: column.into(),
            value,
        });
    }

    /// `DELETE FROM <table> [WHERE <column> = ?1];`
    pub fn prepare(self, rt: &Runtime, conn: &Connection) -> Result<PreparedStatement> {
        let mut alloc = PlaceholderAllocator::new(self.num_params);
        let mut sql = String::from("DELETE FROM ");
        sql.push_str(&self.table);
        push_where(&mut sql, &mut alloc, self.filter.as_ref())?;
        sql.push(';');
        PreparedStatement::compile(
            rt,
            conn,
            StatementParts {
                kind: StatementKind::Delete,
                sql,
                alloc: alloc.finish(),
                result: None,
                input: None,
            },
        )
    }
}
