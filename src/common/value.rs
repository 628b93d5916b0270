use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{DbError, DbResult};
use crate::config::EPSILON;

/// Type tag of a [`Value`] and of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Undefined,
    Chars,
    Ints,
    Floats,
    Booleans,
}

impl AttrType {
    pub fn from_keyword(s: &str) -> Option<AttrType> {
        match s.to_ascii_uppercase().as_str() {
            "INT" | "INTS" | "INTEGER" => Some(AttrType::Ints),
            "FLOAT" | "FLOATS" | "REAL" => Some(AttrType::Floats),
            "CHARS" | "CHAR" | "VARCHAR" => Some(AttrType::Chars),
            "BOOL" | "BOOLEAN" => Some(AttrType::Booleans),
            _ => None,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttrType::Undefined => "undefined",
            AttrType::Chars => "chars",
            AttrType::Ints => "ints",
            AttrType::Floats => "floats",
            AttrType::Booleans => "booleans",
        };
        write!(f, "{}", s)
    }
}

/// Runtime value of one cell.
///
/// Conversion rules are deliberately total: a CHARS value that does not
/// parse as a number converts to 0, and dividing by anything closer to
/// zero than EPSILON yields f32::MAX instead of trapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
    Chars(String),
    Undefined,
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Ints,
            Value::Float(_) => AttrType::Floats,
            Value::Bool(_) => AttrType::Booleans,
            Value::Chars(_) => AttrType::Chars,
            Value::Undefined => AttrType::Undefined,
        }
    }

    pub fn get_int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            Value::Float(v) => *v as i32,
            Value::Bool(v) => *v as i32,
            // parse failure yields 0, same as the storage format's codec
            Value::Chars(s) => s.trim().parse::<i32>().unwrap_or_else(|_| {
                s.trim().parse::<f32>().map(|f| f as i32).unwrap_or(0)
            }),
            Value::Undefined => 0,
        }
    }

    pub fn get_float(&self) -> f32 {
        match self {
            Value::Int(v) => *v as f32,
            Value::Float(v) => *v,
            Value::Bool(v) => (*v as i32) as f32,
            Value::Chars(s) => s.trim().parse::<f32>().unwrap_or(0.0),
            Value::Undefined => 0.0,
        }
    }

    pub fn get_boolean(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => v.abs() >= EPSILON,
            Value::Bool(v) => *v,
            Value::Chars(s) => match s.trim().parse::<f32>() {
                Ok(f) => f.abs() >= EPSILON,
                Err(_) => !s.is_empty(),
            },
            Value::Undefined => false,
        }
    }

    pub fn get_string(&self) -> String {
        self.to_string()
    }

    /// Three-way compare with float promotion on mixed numeric types.
    /// Returns None when the two values are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
            (Value::Chars(l), Value::Chars(r)) => Some(l.cmp(r)),
            (Value::Undefined, _) | (_, Value::Undefined) => None,
            // any other combination compares through floats
            _ => Some(compare_float(self.get_float(), other.get_float())),
        }
    }

    /// Cast cost table used to pick a comparison cast direction.
    /// 0 = identity, small = supported widen, i32::MAX = unsupported.
    pub fn cast_cost(from: AttrType, to: AttrType) -> i32 {
        use AttrType::*;
        if from == to {
            return 0;
        }
        match (from, to) {
            (Ints, Floats) => 1,
            (Chars, Ints) | (Chars, Floats) => 2,
            (Ints, Chars) | (Floats, Chars) => 2,
            (Booleans, Ints) | (Booleans, Floats) => 2,
            _ => i32::MAX,
        }
    }

    pub fn cast_to(&self, target: AttrType) -> DbResult<Value> {
        if self.attr_type() == target {
            return Ok(self.clone());
        }
        match target {
            AttrType::Ints => Ok(Value::Int(self.get_int())),
            AttrType::Floats => Ok(Value::Float(self.get_float())),
            AttrType::Booleans => Ok(Value::Bool(self.get_boolean())),
            AttrType::Chars => Ok(Value::Chars(self.to_string())),
            AttrType::Undefined => Err(DbError::Unsupported(format!(
                "cannot cast {} to undefined",
                self.attr_type()
            ))),
        }
    }

    pub fn add(&self, other: &Value) -> DbResult<Value> {
        numeric_pair(self, other, "+")?;
        if self.attr_type() == AttrType::Floats || other.attr_type() == AttrType::Floats {
            Ok(Value::Float(self.get_float() + other.get_float()))
        } else {
            Ok(Value::Int(self.get_int().wrapping_add(other.get_int())))
        }
    }

    pub fn subtract(&self, other: &Value) -> DbResult<Value> {
        numeric_pair(self, other, "-")?;
        if self.attr_type() == AttrType::Floats || other.attr_type() == AttrType::Floats {
            Ok(Value::Float(self.get_float() - other.get_float()))
        } else {
            Ok(Value::Int(self.get_int().wrapping_sub(other.get_int())))
        }
    }

    pub fn multiply(&self, other: &Value) -> DbResult<Value> {
        numeric_pair(self, other, "*")?;
        if self.attr_type() == AttrType::Floats || other.attr_type() == AttrType::Floats {
            Ok(Value::Float(self.get_float() * other.get_float()))
        } else {
            Ok(Value::Int(self.get_int().wrapping_mul(other.get_int())))
        }
    }

    /// Division always produces a float. Near-zero divisors yield
    /// f32::MAX to keep the evaluator total.
    pub fn divide(&self, other: &Value) -> DbResult<Value> {
        numeric_pair(self, other, "/")?;
        let divisor = other.get_float();
        if divisor > -EPSILON && divisor < EPSILON {
            return Ok(Value::Float(f32::MAX));
        }
        Ok(Value::Float(self.get_float() / divisor))
    }

    pub fn negative(&self) -> DbResult<Value> {
        match self {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            _ => Err(DbError::Unsupported(format!(
                "cannot negate a {} value",
                self.attr_type()
            ))),
        }
    }
}

fn numeric_pair(left: &Value, right: &Value, op: &str) -> DbResult<()> {
    for v in [left, right] {
        match v.attr_type() {
            AttrType::Ints | AttrType::Floats | AttrType::Chars => {}
            t => {
                return Err(DbError::Unsupported(format!(
                    "arithmetic '{}' on {} value",
                    op, t
                )));
            }
        }
    }
    Ok(())
}

pub fn compare_float(l: f32, r: f32) -> Ordering {
    let diff = l - r;
    if diff.abs() < EPSILON {
        Ordering::Equal
    } else if diff < 0.0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Bool(v) => write!(f, "{}", *v as i32),
            Value::Chars(s) => write!(f, "{}", s),
            Value::Undefined => write!(f, "undefined"),
        }
    }
}

/// Shortest round-trip text, trailing ".0" trimmed so integral floats
/// print like integers.
fn format_float(v: f32) -> String {
    let s = format!("{}", v);
    match s.strip_suffix(".0") {
        Some(t) => t.to_string(),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_compare_promotes_to_float() {
        assert_eq!(
            Value::Int(1).compare(&Value::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Int(2).compare(&Value::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Chars("3.5".to_string()).compare(&Value::Int(3)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_chars_parse_failure_yields_zero() {
        let v = Value::Chars("not a number".to_string());
        assert_eq!(v.get_int(), 0);
        assert_eq!(v.get_float(), 0.0);
        // but it is truthy, since the string itself is present
        assert!(v.get_boolean());
    }

    #[test]
    fn test_divide_near_zero_yields_float_max() {
        let r = Value::Int(10).divide(&Value::Float(0.0)).unwrap();
        assert_eq!(r, Value::Float(f32::MAX));
        let r = Value::Float(1.0)
            .divide(&Value::Float(EPSILON / 2.0))
            .unwrap();
        assert_eq!(r, Value::Float(f32::MAX));
    }

    #[test]
    fn test_int_arithmetic_stays_int() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(
            Value::Int(2).multiply(&Value::Int(3)).unwrap(),
            Value::Int(6)
        );
        // division is the exception, it always goes through floats
        assert_eq!(
            Value::Int(3).divide(&Value::Int(2)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_to_string_round_trip() {
        for v in [0, 1, -1, 42, i32::MAX, i32::MIN] {
            let s = Value::Int(v).to_string();
            assert_eq!(s.parse::<i32>().unwrap(), v);
        }
        for v in [0.0f32, 1.5, -2.25, 100.0] {
            let s = Value::Float(v).to_string();
            assert_eq!(s.parse::<f32>().unwrap(), v);
        }
    }

    #[test]
    fn test_cast_cost_direction() {
        assert_eq!(Value::cast_cost(AttrType::Ints, AttrType::Ints), 0);
        assert!(
            Value::cast_cost(AttrType::Ints, AttrType::Floats)
                < Value::cast_cost(AttrType::Floats, AttrType::Ints)
        );
        assert_eq!(
            Value::cast_cost(AttrType::Floats, AttrType::Ints),
            i32::MAX
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).get_boolean());
        assert!(Value::Int(-1).get_boolean());
        assert!(!Value::Float(EPSILON / 10.0).get_boolean());
        assert!(Value::Chars("1".to_string()).get_boolean());
        assert!(!Value::Chars("0".to_string()).get_boolean());
    }
}
