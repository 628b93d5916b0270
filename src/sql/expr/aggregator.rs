use crate::common::{AttrType, DbError, DbResult, Value};
use crate::sql::expr::expression::AggregateType;

/// Incremental aggregate state: feed values in, read the result out.
///
/// Accumulation is associative, so any partition of the input rows
/// produces the same result when the partials are summed.
pub trait Aggregator: Send {
    fn accumulate(&mut self, value: &Value) -> DbResult<()>;
    fn evaluate(&self) -> DbResult<Value>;
}

pub fn make_aggregator(agg: AggregateType, input_type: AttrType) -> DbResult<Box<dyn Aggregator>> {
    match agg {
        AggregateType::Count => Ok(Box::new(CountAggregator { count: 0 })),
        AggregateType::Sum | AggregateType::Avg => {
            match input_type {
                AttrType::Ints | AttrType::Floats | AttrType::Chars | AttrType::Undefined => {}
                t => {
                    return Err(DbError::InvalidArgument(format!(
                        "{} over {} values",
                        agg, t
                    )));
                }
            }
            if agg == AggregateType::Sum {
                Ok(Box::new(SumAggregator { value: None }))
            } else {
                Ok(Box::new(AvgAggregator { sum: 0.0, count: 0 }))
            }
        }
        AggregateType::Max => Ok(Box::new(ExtremeAggregator {
            value: None,
            want_max: true,
        })),
        AggregateType::Min => Ok(Box::new(ExtremeAggregator {
            value: None,
            want_max: false,
        })),
    }
}

struct CountAggregator {
    count: i32,
}

impl Aggregator for CountAggregator {
    fn accumulate(&mut self, _value: &Value) -> DbResult<()> {
        self.count += 1;
        Ok(())
    }

    fn evaluate(&self) -> DbResult<Value> {
        Ok(Value::Int(self.count))
    }
}

struct SumAggregator {
    value: Option<Value>,
}

impl Aggregator for SumAggregator {
    fn accumulate(&mut self, value: &Value) -> DbResult<()> {
        self.value = Some(match &self.value {
            None => value.clone(),
            Some(acc) => acc.add(value)?,
        });
        Ok(())
    }

    fn evaluate(&self) -> DbResult<Value> {
        // the sum of nothing is nothing; printed as an empty cell
        Ok(self.value.clone().unwrap_or(Value::Undefined))
    }
}

struct AvgAggregator {
    sum: f32,
    count: i32,
}

impl Aggregator for AvgAggregator {
    fn accumulate(&mut self, value: &Value) -> DbResult<()> {
        self.sum += value.get_float();
        self.count += 1;
        Ok(())
    }

    fn evaluate(&self) -> DbResult<Value> {
        if self.count == 0 {
            return Ok(Value::Undefined);
        }
        Ok(Value::Float(self.sum / self.count as f32))
    }
}

struct ExtremeAggregator {
    value: Option<Value>,
    want_max: bool,
}

impl Aggregator for ExtremeAggregator {
    fn accumulate(&mut self, value: &Value) -> DbResult<()> {
        match &self.value {
            None => self.value = Some(value.clone()),
            Some(current) => {
                let ordering = value.compare(current).ok_or_else(|| {
                    DbError::InvalidArgument(format!(
                        "cannot order {} against {}",
                        value.attr_type(),
                        current.attr_type()
                    ))
                })?;
                let replace = if self.want_max {
                    ordering == std::cmp::Ordering::Greater
                } else {
                    ordering == std::cmp::Ordering::Less
                };
                if replace {
                    self.value = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self) -> DbResult<Value> {
        Ok(self.value.clone().unwrap_or(Value::Undefined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_int_stays_int() {
        let mut sum = make_aggregator(AggregateType::Sum, AttrType::Ints).unwrap();
        for v in [10, 20, 5] {
            sum.accumulate(&Value::Int(v)).unwrap();
        }
        assert_eq!(sum.evaluate().unwrap(), Value::Int(35));
    }

    #[test]
    fn test_sum_is_associative_over_partitions() {
        let values: Vec<Value> = (1..=10).map(Value::Int).collect();

        let mut whole = make_aggregator(AggregateType::Sum, AttrType::Ints).unwrap();
        for v in &values {
            whole.accumulate(v).unwrap();
        }

        let (a, b) = values.split_at(4);
        let mut left = make_aggregator(AggregateType::Sum, AttrType::Ints).unwrap();
        let mut right = make_aggregator(AggregateType::Sum, AttrType::Ints).unwrap();
        for v in a {
            left.accumulate(v).unwrap();
        }
        for v in b {
            right.accumulate(v).unwrap();
        }
        let merged = left
            .evaluate()
            .unwrap()
            .add(&right.evaluate().unwrap())
            .unwrap();
        assert_eq!(whole.evaluate().unwrap(), merged);
    }

    #[test]
    fn test_count_accepts_anything() {
        let mut count = make_aggregator(AggregateType::Count, AttrType::Chars).unwrap();
        count.accumulate(&Value::Chars("x".to_string())).unwrap();
        count.accumulate(&Value::Int(1)).unwrap();
        assert_eq!(count.evaluate().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_avg_promotes_to_float() {
        let mut avg = make_aggregator(AggregateType::Avg, AttrType::Ints).unwrap();
        for v in [1, 2] {
            avg.accumulate(&Value::Int(v)).unwrap();
        }
        assert_eq!(avg.evaluate().unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_min_max_on_chars() {
        let mut min = make_aggregator(AggregateType::Min, AttrType::Chars).unwrap();
        let mut max = make_aggregator(AggregateType::Max, AttrType::Chars).unwrap();
        for s in ["pear", "apple", "quince"] {
            min.accumulate(&Value::Chars(s.to_string())).unwrap();
            max.accumulate(&Value::Chars(s.to_string())).unwrap();
        }
        assert_eq!(min.evaluate().unwrap(), Value::Chars("apple".to_string()));
        assert_eq!(max.evaluate().unwrap(), Value::Chars("quince".to_string()));
    }

    #[test]
    fn test_sum_rejects_booleans() {
        assert!(make_aggregator(AggregateType::Sum, AttrType::Booleans).is_err());
    }
}
