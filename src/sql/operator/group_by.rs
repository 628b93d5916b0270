use std::sync::Arc;

use crate::common::{DbError, DbResult};
use crate::sql::expr::aggregator::{Aggregator, make_aggregator};
use crate::sql::expr::expression::Expression;
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};

fn make_aggregators(agg_exprs: &[Expression]) -> DbResult<Vec<Box<dyn Aggregator>>> {
    agg_exprs
        .iter()
        .map(|expr| match expr {
            Expression::Aggregation { agg, child } => make_aggregator(*agg, child.value_type()),
            other => Err(DbError::Internal(format!(
                "{} in an aggregate list",
                other.name()
            ))),
        })
        .collect()
}

fn accumulate_row(
    agg_exprs: &[Expression],
    aggregators: &mut [Box<dyn Aggregator>],
    tuple: &Tuple,
) -> DbResult<()> {
    for (expr, aggregator) in agg_exprs.iter().zip(aggregators.iter_mut()) {
        let Expression::Aggregation { child, .. } = expr else {
            return Err(DbError::Internal("aggregate list corrupted".to_string()));
        };
        let value = child.get_value(tuple)?;
        aggregator.accumulate(&value)?;
    }
    Ok(())
}

/// GROUP BY with no keys: the whole input collapses into one row.
/// Zero input rows still produce one output row (COUNT is 0 there).
pub struct ScalarGroupByOper {
    agg_exprs: Vec<Expression>,
    specs: Arc<Vec<TupleCellSpec>>,
    child: BoxedOperator,
    done: bool,
}

impl ScalarGroupByOper {
    pub fn new(agg_exprs: Vec<Expression>, child: BoxedOperator) -> Self {
        let specs = Arc::new(
            agg_exprs
                .iter()
                .map(|e| TupleCellSpec::with_alias(&e.name()))
                .collect::<Vec<_>>(),
        );
        Self {
            agg_exprs,
            specs,
            child,
            done: false,
        }
    }
}

impl PhysicalOperator for ScalarGroupByOper {
    fn name(&self) -> String {
        "SCALAR_GROUP_BY".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.done = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut aggregators = make_aggregators(&self.agg_exprs)?;
        while let Some(tuple) = self.child.next(ctx)? {
            accumulate_row(&self.agg_exprs, &mut aggregators, &tuple)?;
        }
        let cells = aggregators
            .iter()
            .map(|a| a.evaluate())
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

struct Group {
    key: Vec<crate::common::Value>,
    aggregators: Vec<Box<dyn Aggregator>>,
}

/// GROUP BY with keys. Groups live in a probed vector of
/// (key values, aggregators); lookup is linear, which is fine until
/// group counts grow far beyond a teaching workload.
pub struct HashGroupByOper {
    group_exprs: Vec<Expression>,
    agg_exprs: Vec<Expression>,
    specs: Arc<Vec<TupleCellSpec>>,
    child: BoxedOperator,
    groups: Vec<Group>,
    emitted: usize,
    aggregated: bool,
}

impl HashGroupByOper {
    pub fn new(
        group_exprs: Vec<Expression>,
        agg_exprs: Vec<Expression>,
        child: BoxedOperator,
    ) -> Self {
        let specs = Arc::new(
            group_exprs
                .iter()
                .map(|e| e.result_spec())
                .chain(agg_exprs.iter().map(|e| TupleCellSpec::with_alias(&e.name())))
                .collect::<Vec<_>>(),
        );
        Self {
            group_exprs,
            agg_exprs,
            specs,
            child,
            groups: Vec::new(),
            emitted: 0,
            aggregated: false,
        }
    }

    fn aggregate_all(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        while let Some(tuple) = self.child.next(ctx)? {
            let key = self
                .group_exprs
                .iter()
                .map(|e| e.get_value(&tuple))
                .collect::<DbResult<Vec<_>>>()?;

            let group_index = match self.groups.iter().position(|g| g.key == key) {
                Some(index) => index,
                None => {
                    self.groups.push(Group {
                        key,
                        aggregators: make_aggregators(&self.agg_exprs)?,
                    });
                    self.groups.len() - 1
                }
            };
            accumulate_row(
                &self.agg_exprs,
                &mut self.groups[group_index].aggregators,
                &tuple,
            )?;
        }
        Ok(())
    }
}

impl PhysicalOperator for HashGroupByOper {
    fn name(&self) -> String {
        "GROUP_BY".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.groups.clear();
        self.emitted = 0;
        self.aggregated = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if !self.aggregated {
            self.aggregate_all(ctx)?;
            self.aggregated = true;
        }
        let Some(group) = self.groups.get(self.emitted) else {
            return Ok(None);
        };
        self.emitted += 1;

        let mut cells = group.key.clone();
        for aggregator in &group.aggregators {
            cells.push(aggregator.evaluate()?);
        }
        Ok(Some(Tuple::ValueList {
            specs: self.specs.clone(),
            cells,
        }))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.groups.clear();
        self.child.close(ctx)
    }
}
