use tracing::trace;

use crate::common::{DbResult, Value};
use crate::sql::expr::expression::{ConjunctionType, Expression, referenced_fields};
use crate::sql::plan::logical::{LogicalOperator, conjunction_of, conjuncts_of};

/// One rewrite rule: transform the plan in place and report whether
/// anything changed.
pub trait RewriteRule {
    fn name(&self) -> &'static str;
    fn rewrite(&self, plan: &mut LogicalOperator, changed: &mut bool) -> DbResult<()>;
}

/// Rule-driven rewriting, iterated to a fixed point.
pub struct Rewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(ComparisonSimplificationRule),
                Box::new(ConjunctionSimplificationRule),
                Box::new(PredicatePushdownRule),
            ],
        }
    }

    pub fn rewrite(&self, plan: &mut LogicalOperator) -> DbResult<()> {
        // a small bound in case two rules ever chase each other
        for _ in 0..8 {
            let mut changed = false;
            for rule in &self.rules {
                let mut rule_changed = false;
                rule.rewrite(plan, &mut rule_changed)?;
                if rule_changed {
                    trace!("rewrite rule {} changed the plan", rule.name());
                }
                changed = changed || rule_changed;
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }
}

fn rewrite_expressions<F>(plan: &mut LogicalOperator, f: &mut F) -> DbResult<()>
where
    F: FnMut(&mut Expression, &mut bool) -> DbResult<()>,
{
    let mut ignored = false;
    match plan {
        LogicalOperator::Predicate { expr, .. } => f(expr, &mut ignored)?,
        LogicalOperator::TableGet { predicates, .. } => {
            for expr in predicates {
                f(expr, &mut ignored)?;
            }
        }
        LogicalOperator::Project { exprs, .. } | LogicalOperator::Calc { exprs } => {
            for expr in exprs {
                f(expr, &mut ignored)?;
            }
        }
        _ => {}
    }
    for child in plan.children_mut() {
        rewrite_expressions(child, f)?;
    }
    Ok(())
}

/// Fold `Comparison(const, const)` into a boolean literal.
pub struct ComparisonSimplificationRule;

impl RewriteRule for ComparisonSimplificationRule {
    fn name(&self) -> &'static str {
        "comparison_simplification"
    }

    fn rewrite(&self, plan: &mut LogicalOperator, changed: &mut bool) -> DbResult<()> {
        let mut any = false;
        rewrite_expressions(plan, &mut |expr, _| {
            simplify_comparisons(expr, &mut any);
            Ok(())
        })?;
        *changed = any;
        Ok(())
    }
}

fn simplify_comparisons(expr: &mut Expression, changed: &mut bool) {
    if let Expression::Comparison { .. } = expr
        && let Ok(value) = expr.try_get_value()
    {
        *expr = Expression::Value(value);
        *changed = true;
        return;
    }
    match expr {
        Expression::Conjunction { children, .. } => {
            for child in children {
                simplify_comparisons(child, changed);
            }
        }
        Expression::Comparison { left, right, .. } => {
            simplify_comparisons(left, changed);
            simplify_comparisons(right, changed);
        }
        Expression::Cast { child, .. } => simplify_comparisons(child, changed),
        _ => {}
    }
}

/// Drop identity constants out of conjunctions, short-circuit on the
/// absorbing constant, collapse single-child conjunctions.
pub struct ConjunctionSimplificationRule;

impl RewriteRule for ConjunctionSimplificationRule {
    fn name(&self) -> &'static str {
        "conjunction_simplification"
    }

    fn rewrite(&self, plan: &mut LogicalOperator, changed: &mut bool) -> DbResult<()> {
        let mut any = false;
        rewrite_expressions(plan, &mut |expr, _| {
            simplify_conjunction(expr, &mut any);
            Ok(())
        })?;
        *changed = any;
        Ok(())
    }
}

fn simplify_conjunction(expr: &mut Expression, changed: &mut bool) {
    let Expression::Conjunction { conj, children } = expr else {
        return;
    };
    for child in children.iter_mut() {
        simplify_conjunction(child, changed);
    }
    let identity = matches!(conj, ConjunctionType::And);

    // an absorbing constant decides the whole conjunction
    let absorbed = children.iter().any(|c| {
        matches!(c, Expression::Value(v) if v.get_boolean() != identity)
    });
    if absorbed {
        *expr = Expression::Value(Value::Bool(!identity));
        *changed = true;
        return;
    }

    let before = children.len();
    children.retain(|c| !matches!(c, Expression::Value(v) if v.get_boolean() == identity));
    if children.len() != before {
        *changed = true;
    }
    match children.len() {
        0 => {
            *expr = Expression::Value(Value::Bool(identity));
            *changed = true;
        }
        1 => {
            let only_child = children.remove(0);
            *expr = only_child;
            *changed = true;
        }
        _ => {}
    }
}

/// Move each conjunct of a predicate into the one table scan that owns
/// every field it references.
pub struct PredicatePushdownRule;

impl RewriteRule for PredicatePushdownRule {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn rewrite(&self, plan: &mut LogicalOperator, changed: &mut bool) -> DbResult<()> {
        push_down(plan, changed)
    }
}

fn push_down(plan: &mut LogicalOperator, changed: &mut bool) -> DbResult<()> {
    for child in plan.children_mut() {
        push_down(child, changed)?;
    }

    let LogicalOperator::Predicate { expr, children } = plan else {
        return Ok(());
    };
    let conjuncts = conjuncts_of(expr);
    // OR predicates arrive as a single conjunct and stay where they are
    let mut remaining = Vec::new();
    let mut pushed_any = false;
    for conjunct in conjuncts {
        let fields = referenced_fields(&conjunct);
        let target = single_table_of(&fields);
        let pushed = match target {
            Some(table_name) => try_push_into(&mut children[0], &table_name, &conjunct),
            None => false,
        };
        if pushed {
            pushed_any = true;
        } else {
            remaining.push(conjunct);
        }
    }
    if !pushed_any {
        return Ok(());
    }
    *changed = true;

    match conjunction_of(remaining) {
        Some(new_expr) => *expr = new_expr,
        None => {
            // nothing left to filter here, splice the child up
            let child = children.remove(0);
            *plan = child;
        }
    }
    Ok(())
}

fn single_table_of(fields: &[(String, String)]) -> Option<String> {
    let first = fields.first()?;
    let table = &first.0;
    if fields.iter().all(|(t, _)| t == table) {
        Some(table.clone())
    } else {
        None
    }
}

fn try_push_into(plan: &mut LogicalOperator, table_name: &str, conjunct: &Expression) -> bool {
    match plan {
        LogicalOperator::TableGet {
            table, predicates, ..
        } => {
            if table.name() == table_name {
                predicates.push(conjunct.clone());
                true
            } else {
                false
            }
        }
        _ => {
            for child in plan.children_mut() {
                if try_push_into(child, table_name, conjunct) {
                    return true;
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::AttrType;
    use crate::sql::expr::expression::CompOp;
    use crate::sql::parser::parse_command;
    use crate::sql::plan::logical::create_logical_plan;
    use crate::sql::stmt::bind_command;
    use crate::storage::db::Db;
    use crate::utils;
    use std::sync::Arc;

    fn plan_of(db: &Arc<Db>, sql: &str) -> LogicalOperator {
        let stmt = bind_command(db, parse_command(sql).unwrap()).unwrap();
        let mut plan = create_logical_plan(&stmt).unwrap();
        Rewriter::new().rewrite(&mut plan).unwrap();
        plan
    }

    fn test_db(annot: &str) -> Arc<Db> {
        let dir = utils::test_dir(annot);
        let db = Db::open(&dir).unwrap();
        db.create_table(
            "t",
            &[
                ("id".to_string(), AttrType::Ints, 4),
                ("v".to_string(), AttrType::Ints, 4),
            ],
        )
        .unwrap();
        db.create_table(
            "s",
            &[
                ("id".to_string(), AttrType::Ints, 4),
                ("w".to_string(), AttrType::Ints, 4),
            ],
        )
        .unwrap();
        db
    }

    #[test]
    fn test_constant_comparison_folds() {
        let db = test_db("rw_fold");
        let plan = plan_of(&db, "SELECT id FROM t WHERE 1 = 1");
        // the predicate disappeared entirely: 1=1 folds to true, the
        // conjunction collapses, and an always-true predicate pushes
        // nothing, leaving Project over TableGet
        let LogicalOperator::Project { children, .. } = &plan else {
            panic!("expected project on top");
        };
        match &children[0] {
            LogicalOperator::Predicate { expr, .. } => {
                assert_eq!(*expr, Expression::Value(Value::Bool(true)));
            }
            LogicalOperator::TableGet { predicates, .. } => {
                assert!(predicates.is_empty());
            }
            _ => panic!("unexpected child"),
        }
    }

    #[test]
    fn test_pushdown_single_table() {
        let db = test_db("rw_push");
        let plan = plan_of(&db, "SELECT id FROM t WHERE id = 2 AND v > 1");
        let LogicalOperator::Project { children, .. } = &plan else {
            panic!("expected project on top");
        };
        // both conjuncts moved into the scan, the predicate is gone
        let LogicalOperator::TableGet { predicates, .. } = &children[0] else {
            panic!("expected table get under project, predicate should be gone");
        };
        assert_eq!(predicates.len(), 2);
    }

    #[test]
    fn test_pushdown_splits_across_join() {
        let db = test_db("rw_join");
        let plan = plan_of(
            &db,
            "SELECT t.id FROM t, s WHERE t.v = 1 AND s.w = 2 AND t.id = s.id",
        );
        let LogicalOperator::Project { children, .. } = &plan else {
            panic!("expected project on top");
        };
        // the cross-table conjunct stays, the per-table ones moved
        let LogicalOperator::Predicate { expr, children } = &children[0] else {
            panic!("expected a remaining predicate");
        };
        assert!(matches!(expr, Expression::Comparison { .. }));
        let LogicalOperator::Join { children } = &children[0] else {
            panic!("expected join");
        };
        for child in children {
            let LogicalOperator::TableGet { predicates, .. } = child else {
                panic!("expected table get");
            };
            assert_eq!(predicates.len(), 1);
        }
    }

    #[test]
    fn test_or_predicate_stays_put() {
        let db = test_db("rw_or");
        let plan = plan_of(&db, "SELECT id FROM t WHERE id = 1 OR v = 2");
        let LogicalOperator::Project { children, .. } = &plan else {
            panic!("expected project on top");
        };
        // OR references one table... it is still a single conjunct and
        // may be pushed as a whole into t's scan
        match &children[0] {
            LogicalOperator::TableGet { predicates, .. } => {
                assert_eq!(predicates.len(), 1);
                assert!(matches!(
                    predicates[0],
                    Expression::Conjunction {
                        conj: ConjunctionType::Or,
                        ..
                    }
                ));
            }
            other => panic!(
                "expected pushdown of the whole OR, got {}",
                match other {
                    LogicalOperator::Predicate { .. } => "predicate",
                    _ => "something else",
                }
            ),
        }
    }

    #[test]
    fn test_folding_preserves_semantics() {
        // eval(rewrite(e)) == eval(e) spot check
        let expr = Expression::Comparison {
            op: CompOp::LessThan,
            left: Box::new(Expression::Value(Value::Int(3))),
            right: Box::new(Expression::Value(Value::Int(5))),
        };
        let before = expr.try_get_value().unwrap();
        let mut rewritten = expr.clone();
        let mut changed = false;
        simplify_comparisons(&mut rewritten, &mut changed);
        assert!(changed);
        assert_eq!(rewritten, Expression::Value(before));
    }
}
