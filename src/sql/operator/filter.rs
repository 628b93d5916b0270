use crate::common::{AttrType, DbResult};
use crate::sql::expr::chunk::Chunk;
use crate::sql::expr::expression::Expression;
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};

/// Row filter: forwards only tuples the predicate accepts.
pub struct PredicateOper {
    expr: Expression,
    child: BoxedOperator,
}

impl PredicateOper {
    pub fn new(expr: Expression, child: BoxedOperator) -> Self {
        Self { expr, child }
    }
}

impl PhysicalOperator for PredicateOper {
    fn name(&self) -> String {
        "PREDICATE".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        while let Some(tuple) = self.child.next(ctx)? {
            if self.expr.get_value(&tuple)?.get_boolean() {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.close(ctx)
    }
}

/// Chunk filter: no copying, the predicate only narrows the selection
/// vector.
pub struct PredicateVecOper {
    expr: Expression,
    child: BoxedOperator,
}

impl PredicateVecOper {
    pub fn new(expr: Expression, child: BoxedOperator) -> Self {
        Self { expr, child }
    }
}

impl PhysicalOperator for PredicateVecOper {
    fn name(&self) -> String {
        "PREDICATE_VEC".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        Err(crate::common::DbError::Unsupported(
            "vectorized predicate has no row path".to_string(),
        ))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.close(ctx)
    }

    fn next_chunk(&mut self, ctx: &mut ExecutionContext, chunk: &mut Chunk) -> DbResult<bool> {
        if !self.child.next_chunk(ctx, chunk)? {
            return Ok(false);
        }
        let mut select = std::mem::take(&mut chunk.select);
        self.expr.eval_predicate(chunk, &mut select)?;
        chunk.select = select;
        Ok(true)
    }

    fn chunk_schema(&self) -> Option<(Vec<TupleCellSpec>, Vec<AttrType>)> {
        self.child.chunk_schema()
    }
}
