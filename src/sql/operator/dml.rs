use std::sync::Arc;

use crate::common::{DbResult, Rid, Value};
use crate::sql::expr::tuple::Tuple;
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};
use crate::storage::table::Table;

/// INSERT does all its work at open; the iterator yields nothing.
pub struct InsertOper {
    table: Arc<Table>,
    rows: Vec<Vec<Value>>,
    inserted: usize,
}

impl InsertOper {
    pub fn new(table: Arc<Table>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            table,
            rows,
            inserted: 0,
        }
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }
}

impl PhysicalOperator for InsertOper {
    fn name(&self) -> String {
        format!("INSERT({})", self.table.name())
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        for row in &self.rows {
            let mut record = self.table.make_record(row)?;
            ctx.trx.insert_record(&self.table, &mut record)?;
            self.inserted += 1;
        }
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        Ok(None)
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}

/// DELETE buffers every victim's rid before touching any of them, so
/// the scan below never sees its own deletions.
pub struct DeleteOper {
    table: Arc<Table>,
    child: BoxedOperator,
    deleted: usize,
}

impl DeleteOper {
    pub fn new(table: Arc<Table>, child: BoxedOperator) -> Self {
        Self {
            table,
            child,
            deleted: 0,
        }
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }
}

impl PhysicalOperator for DeleteOper {
    fn name(&self) -> String {
        format!("DELETE({})", self.table.name())
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.open(ctx)?;
        let mut rids: Vec<Rid> = Vec::new();
        while let Some(tuple) = self.child.next(ctx)? {
            if let Some(rid) = tuple.rid() {
                rids.push(rid);
            }
        }
        self.child.close(ctx)?;

        for rid in rids {
            ctx.trx.delete_record(&self.table, &rid)?;
            self.deleted += 1;
        }
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        Ok(None)
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
