use std::sync::Arc;

use crate::common::{DbError, DbResult, ExecutionMode, Value};
use crate::sql::expr::expression::{CompOp, Expression};
use crate::sql::operator::{
    BoxedOperator, CalcOper, DeleteOper, ExplainOper, HashGroupByOper, IndexScanOper, InsertOper,
    NestedLoopJoinOper, PredicateOper, PredicateVecOper, ProjectOper, ProjectVecOper,
    ScalarGroupByOper, TableScanOper, TableScanVecOper,
};
use crate::sql::plan::logical::LogicalOperator;
use crate::storage::index::BplusTreeIndex;
use crate::storage::table::Table;

/// Logical to physical. The vectorized path is taken only when the
/// session asked for it and every operator in the tree can vectorize;
/// otherwise this silently falls back to the row path, which must
/// produce identical results.
pub fn create_physical_plan(
    logical: &LogicalOperator,
    mode: ExecutionMode,
) -> DbResult<BoxedOperator> {
    if mode == ExecutionMode::ChunkIterator && vectorizable(logical) {
        return create_vec(logical);
    }
    create_row(logical, mode)
}

fn create_row(logical: &LogicalOperator, mode: ExecutionMode) -> DbResult<BoxedOperator> {
    match logical {
        LogicalOperator::TableGet {
            table,
            predicates,
            mode: rw_mode,
        } => {
            if let Some((index, index_name, key)) = pick_index(table, predicates) {
                return Ok(Box::new(IndexScanOper::new(
                    table.clone(),
                    index,
                    index_name,
                    *rw_mode,
                    key.clone(),
                    key,
                    predicates.clone(),
                )));
            }
            Ok(Box::new(TableScanOper::new(
                table.clone(),
                *rw_mode,
                predicates.clone(),
            )))
        }
        LogicalOperator::Predicate { expr, children } => Ok(Box::new(PredicateOper::new(
            expr.clone(),
            create_row(&children[0], mode)?,
        ))),
        LogicalOperator::Project { exprs, children } => Ok(Box::new(ProjectOper::new(
            exprs.clone(),
            create_row(&children[0], mode)?,
        ))),
        LogicalOperator::Join { children } => {
            if children.len() != 2 {
                return Err(DbError::Internal(format!(
                    "join with {} children",
                    children.len()
                )));
            }
            Ok(Box::new(NestedLoopJoinOper::new(
                create_row(&children[0], mode)?,
                create_row(&children[1], mode)?,
            )))
        }
        LogicalOperator::Insert { table, rows } => {
            Ok(Box::new(InsertOper::new(table.clone(), rows.clone())))
        }
        LogicalOperator::Delete { table, children } => Ok(Box::new(DeleteOper::new(
            table.clone(),
            create_row(&children[0], mode)?,
        ))),
        LogicalOperator::GroupBy {
            group_exprs,
            agg_exprs,
            children,
        } => {
            let child = create_row(&children[0], mode)?;
            if group_exprs.is_empty() {
                Ok(Box::new(ScalarGroupByOper::new(agg_exprs.clone(), child)))
            } else {
                Ok(Box::new(HashGroupByOper::new(
                    group_exprs.clone(),
                    agg_exprs.clone(),
                    child,
                )))
            }
        }
        LogicalOperator::Explain { children } => Ok(Box::new(ExplainOper::new(
            create_physical_plan(&children[0], mode)?,
        ))),
        LogicalOperator::Calc { exprs } => Ok(Box::new(CalcOper::new(exprs.clone()))),
    }
}

/// An equality conjunct between a single-column indexed field and a
/// constant selects an index scan over the `[value, value]` range.
fn pick_index(
    table: &Arc<Table>,
    predicates: &[Expression],
) -> Option<(Arc<BplusTreeIndex>, String, Value)> {
    for predicate in predicates {
        let Expression::Comparison {
            op: CompOp::EqualTo,
            left,
            right,
        } = predicate
        else {
            continue;
        };
        let (field_name, value) = match (&**left, &**right) {
            (Expression::Field { field, .. }, Expression::Value(v)) => (&field.name, v),
            (Expression::Value(v), Expression::Field { field, .. }) => (&field.name, v),
            _ => continue,
        };
        if let Some(index) = table.find_index_on(field_name) {
            let index_name = table
                .index_name_on(field_name)
                .unwrap_or_else(|| field_name.clone());
            return Some((index, index_name, value.clone()));
        }
    }
    None
}

fn vectorizable(logical: &LogicalOperator) -> bool {
    match logical {
        LogicalOperator::TableGet {
            table,
            predicates,
            mode,
        } => {
            *mode == crate::common::ReadWriteMode::ReadOnly
                && pick_index(table, predicates).is_none()
                && predicates.iter().all(|p| p.vectorizable())
        }
        LogicalOperator::Predicate { expr, children } => {
            expr.vectorizable() && vectorizable(&children[0])
        }
        LogicalOperator::Project { exprs, children } => {
            exprs.iter().all(|e| e.vectorizable()) && vectorizable(&children[0])
        }
        _ => false,
    }
}

fn create_vec(logical: &LogicalOperator) -> DbResult<BoxedOperator> {
    match logical {
        LogicalOperator::TableGet {
            table, predicates, ..
        } => Ok(Box::new(TableScanVecOper::new(
            table.clone(),
            predicates.clone(),
        ))),
        LogicalOperator::Predicate { expr, children } => Ok(Box::new(PredicateVecOper::new(
            expr.clone(),
            create_vec(&children[0])?,
        ))),
        LogicalOperator::Project { exprs, children } => Ok(Box::new(ProjectVecOper::new(
            exprs.clone(),
            create_vec(&children[0])?,
        ))),
        _ => Err(DbError::Internal(
            "operator has no vectorized form".to_string(),
        )),
    }
}
