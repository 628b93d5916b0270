use std::sync::Arc;

use crate::common::{AttrType, DbError, DbResult, Value};
use crate::sql::expr::tuple::TupleCellSpec;

/// A typed column of values. The vectorized operators move these
/// around instead of row tuples.
#[derive(Debug, Clone)]
pub enum Column {
    Ints(Vec<i32>),
    Floats(Vec<f32>),
    Bools(Vec<bool>),
    Chars(Vec<String>),
}

impl Column {
    pub fn with_type(attr_type: AttrType) -> DbResult<Self> {
        Ok(match attr_type {
            AttrType::Ints => Column::Ints(Vec::new()),
            AttrType::Floats => Column::Floats(Vec::new()),
            AttrType::Booleans => Column::Bools(Vec::new()),
            AttrType::Chars => Column::Chars(Vec::new()),
            AttrType::Undefined => {
                return Err(DbError::Internal(
                    "cannot build a column of undefined type".to_string(),
                ));
            }
        })
    }

    pub fn attr_type(&self) -> AttrType {
        match self {
            Column::Ints(_) => AttrType::Ints,
            Column::Floats(_) => AttrType::Floats,
            Column::Bools(_) => AttrType::Booleans,
            Column::Chars(_) => AttrType::Chars,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Ints(v) => v.len(),
            Column::Floats(v) => v.len(),
            Column::Bools(v) => v.len(),
            Column::Chars(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, value: &Value) -> DbResult<()> {
        match self {
            Column::Ints(v) => v.push(value.get_int()),
            Column::Floats(v) => v.push(value.get_float()),
            Column::Bools(v) => v.push(value.get_boolean()),
            Column::Chars(v) => v.push(value.get_string()),
        }
        Ok(())
    }

    pub fn value_at(&self, index: usize) -> Value {
        match self {
            Column::Ints(v) => Value::Int(v[index]),
            Column::Floats(v) => Value::Float(v[index]),
            Column::Bools(v) => Value::Bool(v[index]),
            Column::Chars(v) => Value::Chars(v[index].clone()),
        }
    }

    /// A column of one repeated constant, the broadcast used when a
    /// constant meets a column in a kernel.
    pub fn broadcast(value: &Value, rows: usize) -> DbResult<Self> {
        let mut column = Column::with_type(value.attr_type())?;
        for _ in 0..rows {
            column.push(value)?;
        }
        Ok(column)
    }

    pub fn clear(&mut self) {
        match self {
            Column::Ints(v) => v.clear(),
            Column::Floats(v) => v.clear(),
            Column::Bools(v) => v.clear(),
            Column::Chars(v) => v.clear(),
        }
    }
}

/// Column-major batch of rows plus the selection vector the predicate
/// operators mask rows with (no copying).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub specs: Arc<Vec<TupleCellSpec>>,
    pub columns: Vec<Column>,
    pub select: Vec<bool>,
    capacity: usize,
}

impl Chunk {
    pub fn new(specs: Arc<Vec<TupleCellSpec>>, types: &[AttrType], capacity: usize) -> DbResult<Self> {
        let columns = types
            .iter()
            .map(|t| Column::with_type(*t))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self {
            specs,
            columns,
            select: Vec::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn is_full(&self) -> bool {
        self.rows() >= self.capacity
    }

    pub fn column_index_of(&self, spec: &TupleCellSpec) -> Option<usize> {
        self.specs
            .iter()
            .position(|s| s.table == spec.table && s.field == spec.field)
    }

    pub fn push_row(&mut self, values: &[Value]) -> DbResult<()> {
        if values.len() != self.columns.len() {
            return Err(DbError::Internal(format!(
                "chunk expects {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value)?;
        }
        self.select.push(true);
        Ok(())
    }

    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.select.clear();
    }

    /// Selected rows only, as value rows; the row-oriented boundary of
    /// the vectorized path.
    pub fn selected_rows(&self) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        for i in 0..self.rows() {
            if self.select[i] {
                rows.push(self.columns.iter().map(|c| c.value_at(i)).collect());
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_mask() {
        let specs = Arc::new(vec![
            TupleCellSpec::with_table("t", "a"),
            TupleCellSpec::with_table("t", "b"),
        ]);
        let mut chunk = Chunk::new(specs, &[AttrType::Ints, AttrType::Floats], 4).unwrap();
        for i in 0..3 {
            chunk
                .push_row(&[Value::Int(i), Value::Float(i as f32 * 0.5)])
                .unwrap();
        }
        assert_eq!(chunk.rows(), 3);
        assert!(!chunk.is_full());

        chunk.select[1] = false;
        let rows = chunk.selected_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int(0));
        assert_eq!(rows[1][0], Value::Int(2));
    }

    #[test]
    fn test_broadcast() {
        let col = Column::broadcast(&Value::Int(9), 3).unwrap();
        assert_eq!(col.len(), 3);
        assert_eq!(col.value_at(2), Value::Int(9));
    }
}
