use std::sync::Arc;

use crate::common::{DbError, DbResult, Rid, Value};
use crate::storage::table::FieldMeta;

/// Identity of one output cell: where it came from and what to print.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleCellSpec {
    pub table: String,
    pub field: String,
    pub alias: String,
}

impl TupleCellSpec {
    pub fn with_table(table: &str, field: &str) -> Self {
        Self {
            table: table.to_string(),
            field: field.to_string(),
            alias: String::new(),
        }
    }

    pub fn with_alias(alias: &str) -> Self {
        Self {
            table: String::new(),
            field: String::new(),
            alias: alias.to_string(),
        }
    }

    /// What a header row prints for this cell.
    pub fn display_name(&self, qualify_table: bool) -> String {
        if !self.alias.is_empty() {
            self.alias.clone()
        } else if qualify_table && !self.table.is_empty() {
            format!("{}.{}", self.table, self.field)
        } else {
            self.field.clone()
        }
    }

    fn matches(&self, other: &TupleCellSpec) -> bool {
        if !other.table.is_empty() {
            self.table == other.table && self.field == other.field
        } else if !other.field.is_empty() {
            self.field == other.field
        } else {
            !other.alias.is_empty() && self.alias == other.alias
        }
    }
}

/// One row flowing through the operator tree.
///
/// A Row tuple stays bound to the raw record and decodes lazily; joins
/// concatenate without copying their children's cells; everything else
/// is an eager value list.
#[derive(Debug, Clone)]
pub enum Tuple {
    Row {
        table: String,
        /// visible fields only, in schema order
        fields: Arc<Vec<FieldMeta>>,
        record: Vec<u8>,
        rid: Rid,
    },
    ValueList {
        specs: Arc<Vec<TupleCellSpec>>,
        cells: Vec<Value>,
    },
    Joined {
        left: Box<Tuple>,
        right: Box<Tuple>,
    },
}

impl Tuple {
    pub fn empty() -> Self {
        Tuple::ValueList {
            specs: Arc::new(Vec::new()),
            cells: Vec::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        match self {
            Tuple::Row { fields, .. } => fields.len(),
            Tuple::ValueList { cells, .. } => cells.len(),
            Tuple::Joined { left, right } => left.cell_count() + right.cell_count(),
        }
    }

    pub fn cell_at(&self, index: usize) -> DbResult<Value> {
        match self {
            Tuple::Row { fields, record, .. } => fields
                .get(index)
                .map(|f| f.get_value(record))
                .ok_or_else(|| cell_out_of_range(index)),
            Tuple::ValueList { cells, .. } => cells
                .get(index)
                .cloned()
                .ok_or_else(|| cell_out_of_range(index)),
            Tuple::Joined { left, right } => {
                let left_count = left.cell_count();
                if index < left_count {
                    left.cell_at(index)
                } else {
                    right.cell_at(index - left_count)
                }
            }
        }
    }

    pub fn spec_at(&self, index: usize) -> DbResult<TupleCellSpec> {
        match self {
            Tuple::Row { table, fields, .. } => fields
                .get(index)
                .map(|f| TupleCellSpec::with_table(table, &f.name))
                .ok_or_else(|| cell_out_of_range(index)),
            Tuple::ValueList { specs, .. } => specs
                .get(index)
                .cloned()
                .ok_or_else(|| cell_out_of_range(index)),
            Tuple::Joined { left, right } => {
                let left_count = left.cell_count();
                if index < left_count {
                    left.spec_at(index)
                } else {
                    right.spec_at(index - left_count)
                }
            }
        }
    }

    /// Look a cell up by spec: qualified lookups match (table, field),
    /// unqualified ones match the field name, aggregate results match
    /// by alias.
    pub fn find_cell(&self, spec: &TupleCellSpec) -> Option<Value> {
        match self {
            Tuple::Row { table, fields, record, .. } => {
                if !spec.table.is_empty() && spec.table != *table {
                    return None;
                }
                fields
                    .iter()
                    .find(|f| f.name == spec.field)
                    .map(|f| f.get_value(record))
            }
            Tuple::ValueList { specs, cells } => specs
                .iter()
                .position(|s| s.matches(spec))
                .map(|i| cells[i].clone()),
            Tuple::Joined { left, right } => {
                left.find_cell(spec).or_else(|| right.find_cell(spec))
            }
        }
    }

    pub fn rid(&self) -> Option<Rid> {
        match self {
            Tuple::Row { rid, .. } => Some(*rid),
            _ => None,
        }
    }
}

fn cell_out_of_range(index: usize) -> DbError {
    DbError::Internal(format!("tuple cell index {} out of range", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::AttrType;

    fn row_tuple() -> Tuple {
        let fields = vec![
            FieldMeta {
                name: "id".to_string(),
                attr_type: AttrType::Ints,
                offset: 0,
                len: 4,
                visible: true,
            },
            FieldMeta {
                name: "name".to_string(),
                attr_type: AttrType::Chars,
                offset: 4,
                len: 8,
                visible: true,
            },
        ];
        let mut record = vec![0u8; 12];
        record[0..4].copy_from_slice(&7i32.to_le_bytes());
        record[4..7].copy_from_slice(b"bob");
        Tuple::Row {
            table: "t".to_string(),
            fields: Arc::new(fields),
            record,
            rid: Rid::new(1, 0),
        }
    }

    #[test]
    fn test_row_tuple_cells() {
        let tuple = row_tuple();
        assert_eq!(tuple.cell_count(), 2);
        assert_eq!(tuple.cell_at(0).unwrap(), Value::Int(7));
        assert_eq!(
            tuple.cell_at(1).unwrap(),
            Value::Chars("bob".to_string())
        );
        assert_eq!(
            tuple.find_cell(&TupleCellSpec::with_table("t", "id")),
            Some(Value::Int(7))
        );
        assert_eq!(tuple.find_cell(&TupleCellSpec::with_table("x", "id")), None);
    }

    #[test]
    fn test_joined_tuple_spans_children() {
        let left = row_tuple();
        let right = Tuple::ValueList {
            specs: Arc::new(vec![TupleCellSpec::with_table("s", "v")]),
            cells: vec![Value::Int(42)],
        };
        let joined = Tuple::Joined {
            left: Box::new(left),
            right: Box::new(right),
        };
        assert_eq!(joined.cell_count(), 3);
        assert_eq!(joined.cell_at(2).unwrap(), Value::Int(42));
        assert_eq!(
            joined.find_cell(&TupleCellSpec::with_table("s", "v")),
            Some(Value::Int(42))
        );
        assert_eq!(
            joined.find_cell(&TupleCellSpec::with_table("t", "name")),
            Some(Value::Chars("bob".to_string()))
        );
    }

    #[test]
    fn test_find_cell_by_alias() {
        let tuple = Tuple::ValueList {
            specs: Arc::new(vec![TupleCellSpec::with_alias("SUM(v)")]),
            cells: vec![Value::Int(30)],
        };
        assert_eq!(
            tuple.find_cell(&TupleCellSpec::with_alias("SUM(v)")),
            Some(Value::Int(30))
        );
    }
}
