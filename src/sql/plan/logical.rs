use std::sync::Arc;

use crate::common::{DbError, DbResult, ReadWriteMode, Value};
use crate::sql::expr::expression::{self, ConjunctionType, Expression};
use crate::sql::stmt::{CalcStmt, DeleteStmt, InsertStmt, SelectStmt, Stmt};
use crate::storage::table::Table;

/// Logical operator tree. Single owner, children boxed in order.
pub enum LogicalOperator {
    TableGet {
        table: Arc<Table>,
        /// conjuncts the rewriter pushed down to the scan
        predicates: Vec<Expression>,
        mode: ReadWriteMode,
    },
    Predicate {
        expr: Expression,
        children: Vec<LogicalOperator>,
    },
    Project {
        exprs: Vec<Expression>,
        children: Vec<LogicalOperator>,
    },
    Join {
        children: Vec<LogicalOperator>,
    },
    Insert {
        table: Arc<Table>,
        rows: Vec<Vec<Value>>,
    },
    Delete {
        table: Arc<Table>,
        children: Vec<LogicalOperator>,
    },
    GroupBy {
        group_exprs: Vec<Expression>,
        agg_exprs: Vec<Expression>,
        children: Vec<LogicalOperator>,
    },
    Explain {
        children: Vec<LogicalOperator>,
    },
    Calc {
        exprs: Vec<Expression>,
    },
}

impl LogicalOperator {
    pub fn children(&self) -> &[LogicalOperator] {
        match self {
            LogicalOperator::Predicate { children, .. }
            | LogicalOperator::Project { children, .. }
            | LogicalOperator::Join { children }
            | LogicalOperator::Delete { children, .. }
            | LogicalOperator::GroupBy { children, .. }
            | LogicalOperator::Explain { children } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [LogicalOperator] {
        match self {
            LogicalOperator::Predicate { children, .. }
            | LogicalOperator::Project { children, .. }
            | LogicalOperator::Join { children }
            | LogicalOperator::Delete { children, .. }
            | LogicalOperator::GroupBy { children, .. }
            | LogicalOperator::Explain { children } => children,
            _ => &mut [],
        }
    }
}

pub fn create_logical_plan(stmt: &Stmt) -> DbResult<LogicalOperator> {
    match stmt {
        Stmt::Select(select) => plan_select(select),
        Stmt::Calc(calc) => plan_calc(calc),
        Stmt::Insert(insert) => plan_insert(insert),
        Stmt::Delete(delete) => plan_delete(delete),
        Stmt::Explain(inner) => Ok(LogicalOperator::Explain {
            children: vec![create_logical_plan(inner)?],
        }),
        _ => Err(DbError::Internal(
            "statement has no logical plan".to_string(),
        )),
    }
}

/// Bottom-up: scans, join chain, predicate, optional group-by,
/// projection.
fn plan_select(select: &SelectStmt) -> DbResult<LogicalOperator> {
    let mut plan: Option<LogicalOperator> = None;
    for table in &select.tables {
        let get = LogicalOperator::TableGet {
            table: table.clone(),
            predicates: Vec::new(),
            mode: ReadWriteMode::ReadOnly,
        };
        plan = Some(match plan {
            None => get,
            Some(left) => LogicalOperator::Join {
                children: vec![left, get],
            },
        });
    }
    let mut plan = plan.ok_or_else(|| DbError::Internal("select without tables".to_string()))?;

    if let Some(predicate) = &select.predicate {
        plan = LogicalOperator::Predicate {
            expr: predicate.clone(),
            children: vec![plan],
        };
    }

    let agg_exprs = collect_aggregations(select);
    if !agg_exprs.is_empty() || !select.group_by.is_empty() {
        validate_grouping(select)?;
        plan = LogicalOperator::GroupBy {
            group_exprs: select.group_by.clone(),
            agg_exprs,
            children: vec![plan],
        };
    }

    Ok(LogicalOperator::Project {
        exprs: select.projects.clone(),
        children: vec![plan],
    })
}

/// Every distinct aggregate expression in the select list.
fn collect_aggregations(select: &SelectStmt) -> Vec<Expression> {
    let mut aggs: Vec<Expression> = Vec::new();
    for project in &select.projects {
        expression::walk(project, &mut |e| {
            if matches!(e, Expression::Aggregation { .. })
                && !aggs.iter().any(|seen| seen == e)
            {
                aggs.push(e.clone());
            }
        });
    }
    aggs
}

/// With aggregates present, any column a select expression touches
/// must either sit inside an aggregate or be one of the group keys.
fn validate_grouping(select: &SelectStmt) -> DbResult<()> {
    for project in &select.projects {
        if let Some(offender) = find_ungrouped_field(project, &select.group_by) {
            return Err(DbError::InvalidArgument(format!(
                "field {} must appear in GROUP BY or inside an aggregate",
                offender
            )));
        }
    }
    Ok(())
}

fn find_ungrouped_field(expr: &Expression, group_by: &[Expression]) -> Option<String> {
    if group_by.iter().any(|g| g == expr) {
        return None;
    }
    match expr {
        Expression::Aggregation { .. } => None,
        Expression::Field { table, field } => Some(format!("{}.{}", table, field.name)),
        _ => {
            let mut offender = None;
            expression::for_each_child(expr, &mut |child| {
                if offender.is_none() {
                    offender = find_ungrouped_field(child, group_by);
                }
            });
            offender
        }
    }
}

fn plan_calc(calc: &CalcStmt) -> DbResult<LogicalOperator> {
    Ok(LogicalOperator::Calc {
        exprs: calc.exprs.clone(),
    })
}

fn plan_insert(insert: &InsertStmt) -> DbResult<LogicalOperator> {
    Ok(LogicalOperator::Insert {
        table: insert.table.clone(),
        rows: insert.rows.clone(),
    })
}

/// Delete reads its victims through a read-write scan so conflicting
/// writers fail fast.
fn plan_delete(delete: &DeleteStmt) -> DbResult<LogicalOperator> {
    let mut plan = LogicalOperator::TableGet {
        table: delete.table.clone(),
        predicates: Vec::new(),
        mode: ReadWriteMode::ReadWrite,
    };
    if let Some(predicate) = &delete.predicate {
        plan = LogicalOperator::Predicate {
            expr: predicate.clone(),
            children: vec![plan],
        };
    }
    Ok(LogicalOperator::Delete {
        table: delete.table.clone(),
        children: vec![plan],
    })
}

/// Flatten a predicate into its AND-ed conjuncts.
pub fn conjuncts_of(expr: &Expression) -> Vec<Expression> {
    match expr {
        Expression::Conjunction {
            conj: ConjunctionType::And,
            children,
        } => children.iter().flat_map(conjuncts_of).collect(),
        other => vec![other.clone()],
    }
}

/// The inverse: rebuild a predicate from conjuncts.
pub fn conjunction_of(mut conjuncts: Vec<Expression>) -> Option<Expression> {
    match conjuncts.len() {
        0 => None,
        1 => Some(conjuncts.remove(0)),
        _ => Some(Expression::Conjunction {
            conj: ConjunctionType::And,
            children: conjuncts,
        }),
    }
}
