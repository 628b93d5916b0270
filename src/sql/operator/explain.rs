use std::sync::Arc;

use crate::common::{DbResult, Value};
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::sql::operator::{BoxedOperator, ExecutionContext, PhysicalOperator};

/// EXPLAIN renders its child tree as text instead of running it. The
/// result is one row with one cell named "Query Plan".
pub struct ExplainOper {
    child: BoxedOperator,
    done: bool,
}

impl ExplainOper {
    pub fn new(child: BoxedOperator) -> Self {
        Self { child, done: false }
    }
}

impl PhysicalOperator for ExplainOper {
    fn name(&self) -> String {
        "EXPLAIN".to_string()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
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
        let text = render_plan(self.child.as_ref());
        Ok(Some(Tuple::ValueList {
            specs: Arc::new(vec![TupleCellSpec::with_alias("Query Plan")]),
            cells: vec![Value::Chars(text)],
        }))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}

/// Tree rendering with the usual box glyphs:
/// ```text
/// OPERATOR(NAME)
/// PROJECT
/// └─TABLE_SCAN(t)
/// ```
pub fn render_plan(root: &dyn PhysicalOperator) -> String {
    let mut out = String::from("OPERATOR(NAME)\n");
    out.push_str(&root.name());
    out.push('\n');
    render_children(root, "", &mut out);
    // no trailing newline: the cell is printed as one line block
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

fn render_children(op: &dyn PhysicalOperator, prefix: &str, out: &mut String) {
    let children = op.children();
    let count = children.len();
    for (i, child) in children.into_iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(prefix);
        out.push_str(if last { "└─" } else { "├─" });
        out.push_str(&child.name());
        out.push('\n');
        let child_prefix = format!("{}{}", prefix, if last { "  " } else { "│ " });
        render_children(child, &child_prefix, out);
    }
}
