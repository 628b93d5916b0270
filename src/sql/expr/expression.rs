use std::cmp::Ordering;
use std::fmt;

use crate::common::{AttrType, DbError, DbResult, Value};
use crate::sql::expr::chunk::{Chunk, Column};
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::storage::table::FieldMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    EqualTo,
    NotEqual,
    LessThan,
    LessEqual,
    GreatThan,
    GreatEqual,
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompOp::EqualTo => "=",
            CompOp::NotEqual => "<>",
            CompOp::LessThan => "<",
            CompOp::LessEqual => "<=",
            CompOp::GreatThan => ">",
            CompOp::GreatEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctionType {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticType {
    Add,
    Sub,
    Mul,
    Div,
    Negative,
}

impl fmt::Display for ArithmeticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithmeticType::Add => "+",
            ArithmeticType::Sub => "-",
            ArithmeticType::Mul => "*",
            ArithmeticType::Div => "/",
            ArithmeticType::Negative => "-",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateType::Count),
            "SUM" => Some(AggregateType::Sum),
            "AVG" => Some(AggregateType::Avg),
            "MAX" => Some(AggregateType::Max),
            "MIN" => Some(AggregateType::Min),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateType::Count => "COUNT",
            AggregateType::Sum => "SUM",
            AggregateType::Avg => "AVG",
            AggregateType::Max => "MAX",
            AggregateType::Min => "MIN",
        };
        write!(f, "{}", s)
    }
}

/// The expression tree.
///
/// `Star`, `UnboundField` and `UnboundAggregation` only exist between
/// the parser and the binder; the binder replaces them with `Field` and
/// `Aggregation` or rejects the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Star {
        table: Option<String>,
    },
    UnboundField {
        table: Option<String>,
        field: String,
    },
    Field {
        table: String,
        field: FieldMeta,
    },
    Value(Value),
    Cast {
        child: Box<Expression>,
        target: AttrType,
    },
    Comparison {
        op: CompOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        conj: ConjunctionType,
        children: Vec<Expression>,
    },
    Arithmetic {
        op: ArithmeticType,
        left: Box<Expression>,
        right: Option<Box<Expression>>,
    },
    UnboundAggregation {
        name: String,
        child: Box<Expression>,
    },
    Aggregation {
        agg: AggregateType,
        child: Box<Expression>,
    },
}

impl Expression {
    pub fn value_type(&self) -> AttrType {
        match self {
            Expression::Star { .. } | Expression::UnboundField { .. } => AttrType::Undefined,
            Expression::Field { field, .. } => field.attr_type,
            Expression::Value(v) => v.attr_type(),
            Expression::Cast { target, .. } => *target,
            Expression::Comparison { .. } | Expression::Conjunction { .. } => AttrType::Booleans,
            Expression::Arithmetic { op, left, right } => match op {
                ArithmeticType::Negative => left.value_type(),
                ArithmeticType::Div => AttrType::Floats,
                _ => {
                    let right_type = right
                        .as_ref()
                        .map(|r| r.value_type())
                        .unwrap_or(AttrType::Undefined);
                    if left.value_type() == AttrType::Ints && right_type == AttrType::Ints {
                        AttrType::Ints
                    } else {
                        AttrType::Floats
                    }
                }
            },
            Expression::UnboundAggregation { .. } => AttrType::Undefined,
            Expression::Aggregation { agg, child } => match agg {
                AggregateType::Count => AttrType::Ints,
                AggregateType::Avg => AttrType::Floats,
                _ => child.value_type(),
            },
        }
    }

    /// Printable name, also the header text of a projected column.
    pub fn name(&self) -> String {
        match self {
            Expression::Star { table } => match table {
                Some(t) => format!("{}.*", t),
                None => "*".to_string(),
            },
            Expression::UnboundField { table, field } => match table {
                Some(t) => format!("{}.{}", t, field),
                None => field.clone(),
            },
            Expression::Field { field, .. } => field.name.clone(),
            Expression::Value(v) => v.to_string(),
            Expression::Cast { child, .. } => child.name(),
            Expression::Comparison { op, left, right } => {
                format!("{}{}{}", left.name(), op, right.name())
            }
            Expression::Conjunction { conj, children } => {
                let sep = match conj {
                    ConjunctionType::And => " AND ",
                    ConjunctionType::Or => " OR ",
                };
                children
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(sep)
            }
            Expression::Arithmetic { op, left, right } => match right {
                Some(right) => format!("{}{}{}", left.name(), op, right.name()),
                None => format!("{}{}", op, left.name()),
            },
            Expression::UnboundAggregation { name, child } => {
                format!("{}({})", name.to_ascii_uppercase(), child.name())
            }
            Expression::Aggregation { agg, child } => format!("{}({})", agg, child.name()),
        }
    }

    /// The spec a consumer uses to find this expression's result in a
    /// produced tuple.
    pub fn result_spec(&self) -> TupleCellSpec {
        match self {
            Expression::Field { table, field } => TupleCellSpec::with_table(table, &field.name),
            _ => TupleCellSpec::with_alias(&self.name()),
        }
    }

    /// Evaluate against one row.
    pub fn get_value(&self, tuple: &Tuple) -> DbResult<Value> {
        match self {
            Expression::Field { table, field } => {
                let spec = TupleCellSpec::with_table(table, &field.name);
                tuple.find_cell(&spec).ok_or_else(|| {
                    DbError::Internal(format!("field {}.{} not in tuple", table, field.name))
                })
            }
            Expression::Value(v) => Ok(v.clone()),
            Expression::Cast { child, target } => child.get_value(tuple)?.cast_to(*target),
            Expression::Comparison { op, left, right } => {
                let l = left.get_value(tuple)?;
                let r = right.get_value(tuple)?;
                Ok(Value::Bool(compare_values(*op, &l, &r)?))
            }
            Expression::Conjunction { conj, children } => {
                let mut result = matches!(conj, ConjunctionType::And);
                for child in children {
                    let v = child.get_value(tuple)?.get_boolean();
                    match conj {
                        ConjunctionType::And => result = result && v,
                        ConjunctionType::Or => result = result || v,
                    }
                }
                Ok(Value::Bool(result))
            }
            Expression::Arithmetic { op, left, right } => {
                let l = left.get_value(tuple)?;
                match op {
                    ArithmeticType::Negative => l.negative(),
                    _ => {
                        let r = right
                            .as_ref()
                            .ok_or_else(|| {
                                DbError::Internal("binary arithmetic missing operand".into())
                            })?
                            .get_value(tuple)?;
                        apply_arithmetic(*op, &l, &r)
                    }
                }
            }
            // an aggregation evaluated over a tuple reads the cell the
            // group-by operator produced under this expression's name
            Expression::Aggregation { .. } => {
                let spec = TupleCellSpec::with_alias(&self.name());
                tuple.find_cell(&spec).ok_or_else(|| {
                    DbError::Internal(format!("aggregate {} not in tuple", self.name()))
                })
            }
            Expression::Star { .. }
            | Expression::UnboundField { .. }
            | Expression::UnboundAggregation { .. } => Err(DbError::Internal(format!(
                "evaluating unbound expression {}",
                self.name()
            ))),
        }
    }

    /// Evaluate without any tuple. Succeeds only for constants; the
    /// rewriter uses this for constant folding.
    pub fn try_get_value(&self) -> DbResult<Value> {
        match self {
            Expression::Value(v) => Ok(v.clone()),
            Expression::Cast { child, target } => child.try_get_value()?.cast_to(*target),
            Expression::Comparison { op, left, right } => {
                let l = left.try_get_value()?;
                let r = right.try_get_value()?;
                Ok(Value::Bool(compare_values(*op, &l, &r)?))
            }
            Expression::Arithmetic { op, left, right } => {
                let l = left.try_get_value()?;
                match op {
                    ArithmeticType::Negative => l.negative(),
                    _ => {
                        let r = right
                            .as_ref()
                            .ok_or_else(|| {
                                DbError::Internal("binary arithmetic missing operand".into())
                            })?
                            .try_get_value()?;
                        apply_arithmetic(*op, &l, &r)
                    }
                }
            }
            _ => Err(DbError::Unsupported(format!(
                "{} is not a constant",
                self.name()
            ))),
        }
    }

    /// Vectorized evaluation: produce a whole column from a chunk.
    pub fn get_column(&self, chunk: &Chunk) -> DbResult<Column> {
        match self {
            Expression::Field { table, field } => {
                let spec = TupleCellSpec::with_table(table, &field.name);
                let pos = chunk.column_index_of(&spec).ok_or_else(|| {
                    DbError::Internal(format!("field {}.{} not in chunk", table, field.name))
                })?;
                Ok(chunk.columns[pos].clone())
            }
            Expression::Value(v) => Column::broadcast(v, chunk.rows()),
            Expression::Cast { child, target } => {
                let column = child.get_column(chunk)?;
                let mut out = Column::with_type(*target)?;
                for i in 0..column.len() {
                    out.push(&column.value_at(i).cast_to(*target)?)?;
                }
                Ok(out)
            }
            Expression::Arithmetic { op, left, right } => {
                let l = left.get_column(chunk)?;
                match op {
                    ArithmeticType::Negative => {
                        let mut out = Column::with_type(left.value_type())?;
                        for i in 0..l.len() {
                            out.push(&l.value_at(i).negative()?)?;
                        }
                        Ok(out)
                    }
                    _ => {
                        let r = right
                            .as_ref()
                            .ok_or_else(|| {
                                DbError::Internal("binary arithmetic missing operand".into())
                            })?
                            .get_column(chunk)?;
                        let mut out = Column::with_type(self.value_type())?;
                        for i in 0..l.len() {
                            out.push(&apply_arithmetic(*op, &l.value_at(i), &r.value_at(i))?)?;
                        }
                        Ok(out)
                    }
                }
            }
            Expression::Comparison { .. } | Expression::Conjunction { .. } => {
                let mut select = vec![true; chunk.rows()];
                self.eval_predicate(chunk, &mut select)?;
                Ok(Column::Bools(select))
            }
            _ => Err(DbError::Unsupported(format!(
                "vectorized evaluation of {}",
                self.name()
            ))),
        }
    }

    /// Predicate evaluation against a chunk: each row's verdict is
    /// ANDed into the selection vector.
    pub fn eval_predicate(&self, chunk: &Chunk, select: &mut [bool]) -> DbResult<()> {
        match self {
            Expression::Comparison { op, left, right } => {
                let l = left.get_column(chunk)?;
                let r = right.get_column(chunk)?;
                for (i, sel) in select.iter_mut().enumerate().take(chunk.rows()) {
                    if *sel {
                        *sel = compare_values(*op, &l.value_at(i), &r.value_at(i))?;
                    }
                }
                Ok(())
            }
            Expression::Conjunction { conj, children } => match conj {
                ConjunctionType::And => {
                    for child in children {
                        child.eval_predicate(chunk, select)?;
                    }
                    Ok(())
                }
                ConjunctionType::Or => {
                    let mut any = vec![false; select.len()];
                    for child in children {
                        let mut this = select.to_vec();
                        child.eval_predicate(chunk, &mut this)?;
                        for (a, t) in any.iter_mut().zip(&this) {
                            *a = *a || *t;
                        }
                    }
                    for (s, a) in select.iter_mut().zip(&any) {
                        *s = *s && *a;
                    }
                    Ok(())
                }
            },
            Expression::Value(v) => {
                if !v.get_boolean() {
                    select.iter_mut().for_each(|s| *s = false);
                }
                Ok(())
            }
            _ => {
                let column = self.get_column(chunk)?;
                for (i, sel) in select.iter_mut().enumerate().take(chunk.rows()) {
                    if *sel {
                        *sel = column.value_at(i).get_boolean();
                    }
                }
                Ok(())
            }
        }
    }

    /// Can the vectorized path run this expression?
    pub fn vectorizable(&self) -> bool {
        match self {
            Expression::Field { .. } | Expression::Value(_) => true,
            Expression::Cast { child, .. } => child.vectorizable(),
            Expression::Comparison { left, right, .. } => {
                left.vectorizable() && right.vectorizable()
            }
            Expression::Conjunction { children, .. } => children.iter().all(|c| c.vectorizable()),
            Expression::Arithmetic { left, right, .. } => {
                left.vectorizable() && right.as_ref().is_none_or(|r| r.vectorizable())
            }
            _ => false,
        }
    }
}

/// Recursion helper: visit every direct child of an expression. The
/// one place that has to learn about new variants.
pub fn for_each_child<'a, F>(expr: &'a Expression, f: &mut F)
where
    F: FnMut(&'a Expression),
{
    match expr {
        Expression::Cast { child, .. }
        | Expression::UnboundAggregation { child, .. }
        | Expression::Aggregation { child, .. } => f(child),
        Expression::Comparison { left, right, .. } => {
            f(left);
            f(right);
        }
        Expression::Conjunction { children, .. } => children.iter().for_each(&mut *f),
        Expression::Arithmetic { left, right, .. } => {
            f(left);
            if let Some(right) = right {
                f(right);
            }
        }
        _ => {}
    }
}

/// Depth-first walk over the whole tree, the expression included.
pub fn walk<'a, F>(expr: &'a Expression, f: &mut F)
where
    F: FnMut(&'a Expression),
{
    f(expr);
    for_each_child(expr, &mut |child| walk(child, f));
}

/// Every bound field the expression references, as (table, field name).
pub fn referenced_fields(expr: &Expression) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    walk(expr, &mut |e| {
        if let Expression::Field { table, field } = e {
            fields.push((table.clone(), field.name.clone()));
        }
    });
    fields
}

pub fn has_aggregation(expr: &Expression) -> bool {
    let mut found = false;
    walk(expr, &mut |e| {
        if matches!(
            e,
            Expression::Aggregation { .. } | Expression::UnboundAggregation { .. }
        ) {
            found = true;
        }
    });
    found
}

pub fn compare_values(op: CompOp, left: &Value, right: &Value) -> DbResult<bool> {
    let ordering = left.compare(right).ok_or_else(|| {
        DbError::Unsupported(format!(
            "cannot compare {} with {}",
            left.attr_type(),
            right.attr_type()
        ))
    })?;
    Ok(match op {
        CompOp::EqualTo => ordering == Ordering::Equal,
        CompOp::NotEqual => ordering != Ordering::Equal,
        CompOp::LessThan => ordering == Ordering::Less,
        CompOp::LessEqual => ordering != Ordering::Greater,
        CompOp::GreatThan => ordering == Ordering::Greater,
        CompOp::GreatEqual => ordering != Ordering::Less,
    })
}

fn apply_arithmetic(op: ArithmeticType, left: &Value, right: &Value) -> DbResult<Value> {
    match op {
        ArithmeticType::Add => left.add(right),
        ArithmeticType::Sub => left.subtract(right),
        ArithmeticType::Mul => left.multiply(right),
        ArithmeticType::Div => left.divide(right),
        ArithmeticType::Negative => Err(DbError::Internal(
            "unary negative applied to two operands".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Rid;
    use std::sync::Arc;

    fn field_expr(table: &str, name: &str, attr_type: AttrType, offset: usize, len: usize) -> Expression {
        Expression::Field {
            table: table.to_string(),
            field: FieldMeta {
                name: name.to_string(),
                attr_type,
                offset,
                len,
                visible: true,
            },
        }
    }

    fn sample_tuple() -> Tuple {
        let fields = vec![
            FieldMeta {
                name: "a".to_string(),
                attr_type: AttrType::Ints,
                offset: 0,
                len: 4,
                visible: true,
            },
            FieldMeta {
                name: "b".to_string(),
                attr_type: AttrType::Floats,
                offset: 4,
                len: 4,
                visible: true,
            },
        ];
        let mut record = vec![0u8; 8];
        record[0..4].copy_from_slice(&6i32.to_le_bytes());
        record[4..8].copy_from_slice(&2.5f32.to_le_bytes());
        Tuple::Row {
            table: "t".to_string(),
            fields: Arc::new(fields),
            record,
            rid: Rid::new(1, 0),
        }
    }

    #[test]
    fn test_arithmetic_over_tuple() {
        let tuple = sample_tuple();
        // a + b * 2
        let expr = Expression::Arithmetic {
            op: ArithmeticType::Add,
            left: Box::new(field_expr("t", "a", AttrType::Ints, 0, 4)),
            right: Some(Box::new(Expression::Arithmetic {
                op: ArithmeticType::Mul,
                left: Box::new(field_expr("t", "b", AttrType::Floats, 4, 4)),
                right: Some(Box::new(Expression::Value(Value::Int(2)))),
            })),
        };
        assert_eq!(expr.get_value(&tuple).unwrap(), Value::Float(11.0));
        assert_eq!(expr.name(), "a+b*2");
    }

    #[test]
    fn test_try_get_value_only_for_constants() {
        let constant = Expression::Comparison {
            op: CompOp::LessThan,
            left: Box::new(Expression::Value(Value::Int(1))),
            right: Box::new(Expression::Value(Value::Int(2))),
        };
        assert_eq!(constant.try_get_value().unwrap(), Value::Bool(true));

        let not_constant = field_expr("t", "a", AttrType::Ints, 0, 4);
        assert!(not_constant.try_get_value().is_err());
    }

    #[test]
    fn test_comparison_with_coercion() {
        let tuple = sample_tuple();
        let expr = Expression::Comparison {
            op: CompOp::GreatThan,
            left: Box::new(field_expr("t", "a", AttrType::Ints, 0, 4)),
            right: Box::new(Expression::Value(Value::Float(5.5))),
        };
        assert_eq!(expr.get_value(&tuple).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_conjunction_semantics() {
        let t = Expression::Value(Value::Bool(true));
        let f = Expression::Value(Value::Bool(false));
        let and = Expression::Conjunction {
            conj: ConjunctionType::And,
            children: vec![t.clone(), f.clone()],
        };
        let or = Expression::Conjunction {
            conj: ConjunctionType::Or,
            children: vec![t, f],
        };
        let empty = Tuple::empty();
        assert_eq!(and.get_value(&empty).unwrap(), Value::Bool(false));
        assert_eq!(or.get_value(&empty).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_eval_predicate_ands_into_select_vector() {
        let specs = Arc::new(vec![TupleCellSpec::with_table("t", "a")]);
        let mut chunk = Chunk::new(specs, &[AttrType::Ints], 8).unwrap();
        for i in 0..6 {
            chunk.push_row(&[Value::Int(i)]).unwrap();
        }
        let mut select = vec![true; 6];
        select[0] = false; // already masked by an earlier predicate

        let expr = Expression::Comparison {
            op: CompOp::GreatEqual,
            left: Box::new(field_expr("t", "a", AttrType::Ints, 0, 4)),
            right: Box::new(Expression::Value(Value::Int(2))),
        };
        expr.eval_predicate(&chunk, &mut select).unwrap();
        assert_eq!(select, vec![false, false, true, true, true, true]);
    }

    #[test]
    fn test_referenced_fields() {
        let expr = Expression::Comparison {
            op: CompOp::EqualTo,
            left: Box::new(field_expr("t", "a", AttrType::Ints, 0, 4)),
            right: Box::new(field_expr("s", "b", AttrType::Ints, 0, 4)),
        };
        assert_eq!(
            referenced_fields(&expr),
            vec![
                ("t".to_string(), "a".to_string()),
                ("s".to_string(), "b".to_string())
            ]
        );
    }
}
