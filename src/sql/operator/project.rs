use std::sync::Arc;

use crate::common::{AttrType, DbError, DbResult};
use crate::sql::expr::chunk::Chunk;
use crate::sql::expr::expression::Expression;
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};

/// Applies the select list to each child tuple.
pub struct ProjectOper {
    exprs: Vec<Expression>,
    specs: Arc<Vec<TupleCellSpec>>,
    child: BoxedOperator,
}

impl ProjectOper {
    pub fn new(exprs: Vec<Expression>, child: BoxedOperator) -> Self {
        let specs = Arc::new(exprs.iter().map(|e| e.result_spec()).collect::<Vec<_>>());
        Self {
            exprs,
            specs,
            child,
        }
    }
}

impl PhysicalOperator for ProjectOper {
    fn name(&self) -> String {
        "PROJECT".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        let Some(tuple) = self.child.next(ctx)? else {
            return Ok(None);
        };
        let cells = self
            .exprs
            .iter()
            .map(|e| e.get_value(&tuple))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Some(Tuple::ValueList {
            specs: self.specs.clone(),
            cells,
        }))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.close(ctx)
    }
}

/// Vectorized projection: evaluates the select list column-wise over
/// each child chunk, carrying the selection vector through.
pub struct ProjectVecOper {
    exprs: Vec<Expression>,
    specs: Vec<TupleCellSpec>,
    child: BoxedOperator,
    child_chunk: Option<Chunk>,
}

impl ProjectVecOper {
    pub fn new(exprs: Vec<Expression>, child: BoxedOperator) -> Self {
        let specs = exprs.iter().map(|e| e.result_spec()).collect::<Vec<_>>();
        Self {
            exprs,
            specs,
            child,
            child_chunk: None,
        }
    }
}

impl PhysicalOperator for ProjectVecOper {
    fn name(&self) -> String {
        "PROJECT_VEC".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let (specs, types) = self
            .child
            .chunk_schema()
            .ok_or_else(|| DbError::Internal("vectorized child without schema".to_string()))?;
        self.child_chunk = Some(Chunk::new(
            Arc::new(specs),
            &types,
            crate::config::CHUNK_CAPACITY,
        )?);
        self.child.open(ctx)
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        Err(DbError::Unsupported(
            "vectorized project has no row path".to_string(),
        ))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child_chunk = None;
        self.child.close(ctx)
    }

    fn next_chunk(&mut self, ctx: &mut ExecutionContext, chunk: &mut Chunk) -> DbResult<bool> {
        let child_chunk = self
            .child_chunk
            .as_mut()
            .ok_or_else(|| DbError::Internal("project next before open".to_string()))?;
        if !self.child.next_chunk(ctx, child_chunk)? {
            return Ok(false);
        }
        chunk.reset();
        chunk.columns = self
            .exprs
            .iter()
            .map(|e| e.get_column(child_chunk))
            .collect::<DbResult<Vec<_>>>()?;
        chunk.select = child_chunk.select.clone();
        Ok(true)
    }

    fn chunk_schema(&self) -> Option<(Vec<TupleCellSpec>, Vec<AttrType>)> {
        let types = self.exprs.iter().map(|e| e.value_type()).collect();
        Some((self.specs.clone(), types))
    }
}

/// FROM-less SELECT: one row of computed constants.
pub struct CalcOper {
    exprs: Vec<Expression>,
    specs: Arc<Vec<TupleCellSpec>>,
    done: bool,
}

impl CalcOper {
    pub fn new(exprs: Vec<Expression>) -> Self {
        let specs = Arc::new(exprs.iter().map(|e| e.result_spec()).collect::<Vec<_>>());
        Self {
            exprs,
            specs,
            done: false,
        }
    }
}

impl PhysicalOperator for CalcOper {
    fn name(&self) -> String {
        "CALC".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let empty = Tuple::empty();
        let cells = self
            .exprs
            .iter()
            .map(|e| e.get_value(&empty))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Some(Tuple::ValueList {
            specs: self.specs.clone(),
            cells,
        }))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
