use crate::common::DbResult;
use crate::sql::expr::tuple::Tuple;
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};

/// Nested-loop join: the outer side is read once; for each outer row
/// the inner side is reopened and drained.
pub struct NestedLoopJoinOper {
    left: BoxedOperator,
    right: BoxedOperator,
    left_tuple: Option<Tuple>,
    right_open: bool,
}

impl NestedLoopJoinOper {
    pub fn new(left: BoxedOperator, right: BoxedOperator) -> Self {
        Self {
            left,
            right,
            left_tuple: None,
            right_open: false,
        }
    }
}

impl PhysicalOperator for NestedLoopJoinOper {
    fn name(&self) -> String {
        "NESTED_LOOP_JOIN".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.left_tuple = None;
        self.right_open = false;
        self.left.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        loop {
            if self.left_tuple.is_none() {
                match self.left.next(ctx)? {
                    Some(tuple) => {
                        self.left_tuple = Some(tuple);
                        if self.right_open {
                            self.right.close(ctx)?;
                        }
                        self.right.open(ctx)?;
                        self.right_open = true;
                    }
                    None => return Ok(None),
                }
            }
            match self.right.next(ctx)? {
                Some(right_tuple) => {
                    let left_tuple = self.left_tuple.clone().unwrap();
                    return Ok(Some(Tuple::Joined {
                        left: Box::new(left_tuple),
                        right: Box::new(right_tuple),
                    }));
                }
                None => {
                    // inner side exhausted, advance the outer row
                    self.left_tuple = None;
                }
            }
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        if self.right_open {
            self.right.close(ctx)?;
            self.right_open = false;
        }
        self.left.close(ctx)
    }
}
