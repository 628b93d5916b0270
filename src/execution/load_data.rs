use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use crate::common::error::io_read_err;
use crate::common::{AttrType, DbError, DbResult, Value};
use crate::session::Session;
use crate::storage::table::Table;

/// `LOAD DATA INFILE 'file' INTO TABLE t`: one pipe-delimited row per
/// line, inserted through the session's transaction. The first bad
/// line aborts the load with its line number; the statement-level
/// rollback then undoes the rows inserted before it.
pub fn load_data(session: &mut Session, table: &Arc<Table>, file_path: &str) -> DbResult<usize> {
    let file = File::open(file_path)
        .map_err(|e| DbError::FileNotExist(format!("{}: {}", file_path, e)))?;
    let reader = BufReader::new(file);
    let meta = table.meta();
    let field_types: Vec<(String, AttrType)> = meta
        .visible_fields()
        .map(|f| (f.name.clone(), f.attr_type))
        .collect();

    let mut inserted = 0usize;
    for (line_num, line) in reader.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.map_err(|e| io_read_err(file_path, e))?;
        if line.is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('|').collect();
        if cells.len() != field_types.len() {
            return Err(DbError::InvalidArgument(format!(
                "line {}: expected {} fields, got {}",
                line_num,
                field_types.len(),
                cells.len()
            )));
        }
        let mut values = Vec::with_capacity(cells.len());
        for (cell, (field_name, attr_type)) in cells.iter().zip(&field_types) {
            values.push(parse_cell(cell.trim(), *attr_type).map_err(|e| {
                DbError::InvalidArgument(format!("line {}, field {}: {}", line_num, field_name, e))
            })?);
        }
        let mut record = table.make_record(&values)?;
        session.trx_mut().insert_record(table, &mut record)?;
        inserted += 1;
    }
    Ok(inserted)
}

fn parse_cell(text: &str, attr_type: AttrType) -> Result<Value, String> {
    match attr_type {
        AttrType::Ints => text
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| format!("'{}' is not an integer", text)),
        AttrType::Floats => text
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|_| format!("'{}' is not a float", text)),
        AttrType::Booleans => match text.to_ascii_lowercase().as_str() {
            "1" | "true" | "t" => Ok(Value::Bool(true)),
            "0" | "false" | "f" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", text)),
        },
        AttrType::Chars => Ok(Value::Chars(text.to_string())),
        AttrType::Undefined => Err("field with undefined type".to_string()),
    }
}
