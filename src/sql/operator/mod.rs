pub mod dml;
pub mod explain;
pub mod filter;
pub mod group_by;
pub mod join;
pub mod project;
pub mod scan;

use crate::common::{AttrType, DbError, DbResult};
use crate::sql::expr::chunk::Chunk;
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::transaction::MvccTrx;

pub use dml::{DeleteOper, InsertOper};
pub use explain::ExplainOper;
pub use filter::{PredicateOper, PredicateVecOper};
pub use group_by::{HashGroupByOper, ScalarGroupByOper};
pub use join::NestedLoopJoinOper;
pub use project::{CalcOper, ProjectOper, ProjectVecOper};
pub use scan::{IndexScanOper, TableScanOper, TableScanVecOper};

/// Everything an operator needs at run time besides its own state.
pub struct ExecutionContext<'a> {
    pub trx: &'a mut MvccTrx,
}

pub type BoxedOperator = Box<dyn PhysicalOperator>;

/// Pull-based physical operator.
///
/// Row contract: `open`, then `next` until it yields None, then
/// `close`. Operators that also run in the vectorized path implement
/// `next_chunk` and report their chunk schema.
pub trait PhysicalOperator: Send {
    /// Label used by EXPLAIN.
    fn name(&self) -> String;

    fn children(&self) -> Vec<&dyn PhysicalOperator>;

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>>;

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// Vectorized pull: refill the chunk, false at end of stream.
    fn next_chunk(&mut self, _ctx: &mut ExecutionContext, _chunk: &mut Chunk) -> DbResult<bool> {
        Err(DbError::Unsupported(format!(
            "{} has no vectorized path",
            self.name()
        )))
    }

    /// Schema of the chunks this operator produces, when it has a
    /// vectorized path.
    fn chunk_schema(&self) -> Option<(Vec<TupleCellSpec>, Vec<AttrType>)> {
        None
    }
}
