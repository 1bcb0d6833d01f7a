use crate::db::conn::Connection;
use crate::db::params::{PlaceholderAllocator, QueryValue};
use crate::db::prepared::{PreparedStatement, StatementKind, StatementParts};
use crate::db::{check_column, push_where, WhereClause};
use crate::descriptor::TypeDescriptor;
use crate::error::Result;
use crate::runtime::Runtime;

#[derive(Debug)]
pub struct SelectPlan {
    table: String,
    row: &'static TypeDescriptor,
    num_params: u32,
    filter: Option<WhereClause>,
}

impl SelectPlan {
    pub fn new(table: impl Into<String>, row: &'static TypeDescriptor, num_params: u32) -> Self {
        SelectPlan {
            table: table.into(),
            row,
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

    /// `SELECT * FROM <table> [WHERE <column> = ?1];`
    pub fn prepare(self, rt: &Runtime, conn: &Connection) -> Result<PreparedStatement> {
        let layout = self.row.expect_struct("select row")?;
        let mut alloc = PlaceholderAllocator::new(self.num_params);
        let mut sql = String::from("SELECT * FROM ");
        sql.push_str(&self.table);
        if let Some(filter) = &self.filter {
            check_column(&self.table, layout, &filter.column)?;
        }
        push_where(&mut sql, &mut alloc, self.filter.as_ref())?;
        sql.push(';');
        PreparedStatement::compile(
            rt,
            conn,
            StatementParts {
                kind: StatementKind::Select,
                sql,
                alloc: alloc.finish(),
                result: Some(self.row),
                input: None,
            },
        )
    }
}
