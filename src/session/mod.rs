use std::sync::Arc;

use crate::common::{DbError, DbResult, ExecutionMode, Value};
use crate::config::EPSILON;
use crate::storage::db::Db;
use crate::transaction::{MvccTrx, MvccTrxKit};

/// Per-connection state: the current transaction, the session
/// variables, and the debug lines collected while a statement runs.
pub struct Session {
    db: Arc<Db>,
    trx: MvccTrx,
    trx_multi_operation_mode: bool,
    sql_debug: bool,
    execution_mode: ExecutionMode,
    debug_lines: Vec<String>,
}

impl Session {
    pub fn new(db: Arc<Db>, kit: Arc<MvccTrxKit>) -> Self {
        let trx = MvccTrx::new(kit, db.log_handler().clone(), db.clone());
        Self {
            db,
            trx,
            trx_multi_operation_mode: false,
            sql_debug: false,
            execution_mode: ExecutionMode::TupleIterator,
            debug_lines: Vec::new(),
        }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn trx_mut(&mut self) -> &mut MvccTrx {
        &mut self.trx
    }

    /// BEGIN flips this on; COMMIT/ROLLBACK flip it off. Outside of it
    /// every statement commits (or rolls back) on its own.
    pub fn trx_multi_operation_mode(&self) -> bool {
        self.trx_multi_operation_mode
    }

    pub fn set_trx_multi_operation_mode(&mut self, on: bool) {
        self.trx_multi_operation_mode = on;
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn sql_debug_enabled(&self) -> bool {
        self.sql_debug
    }

    /// Collected only while sql_debug is on; drained into the response
    /// as "# " prefixed lines.
    pub fn sql_debug_line(&mut self, line: impl Into<String>) {
        if self.sql_debug {
            self.debug_lines.push(line.into());
        }
    }

    pub fn take_debug_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.debug_lines)
    }

    pub fn set_variable(&mut self, name: &str, value: &Value) -> DbResult<()> {
        match name.to_ascii_lowercase().as_str() {
            "sql_debug" => {
                self.sql_debug = value_to_bool(value)?;
                Ok(())
            }
            "execution_mode" => {
                let text = value.get_string().to_ascii_uppercase();
                self.execution_mode = match text.as_str() {
                    "TUPLE_ITERATOR" => ExecutionMode::TupleIterator,
                    "CHUNK_ITERATOR" => ExecutionMode::ChunkIterator,
                    _ => {
                        return Err(DbError::VariableNotValid(format!(
                            "execution_mode = {}",
                            value
                        )));
                    }
                };
                Ok(())
            }
            _ => Err(DbError::VariableNotExists(name.to_string())),
        }
    }
}

/// The truthy/falsy vocabulary of session booleans.
fn value_to_bool(value: &Value) -> DbResult<bool> {
    match value {
        Value::Int(v) => Ok(*v != 0),
        Value::Float(v) => Ok(v.abs() >= EPSILON),
        Value::Bool(v) => Ok(*v),
        Value::Chars(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "t" | "1" => Ok(true),
            "false" | "off" | "no" | "f" | "0" => Ok(false),
            _ => Err(DbError::VariableNotValid(s.clone())),
        },
        Value::Undefined => Err(DbError::VariableNotValid("undefined".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    fn session(annot: &str) -> Session {
        let db = Db::open(&utils::test_dir(annot)).unwrap();
        Session::new(db, MvccTrxKit::new())
    }

    #[test]
    fn test_sql_debug_vocabulary() {
        let mut s = session("sess_debug");
        for v in ["true", "on", "yes", "t", "1"] {
            s.set_variable("sql_debug", &Value::Chars(v.to_string()))
                .unwrap();
            assert!(s.sql_debug_enabled());
            s.set_variable("sql_debug", &Value::Chars("off".to_string()))
                .unwrap();
            assert!(!s.sql_debug_enabled());
        }
        s.set_variable("sql_debug", &Value::Int(2)).unwrap();
        assert!(s.sql_debug_enabled());
        assert!(matches!(
            s.set_variable("sql_debug", &Value::Chars("maybe".to_string())),
            Err(DbError::VariableNotValid(_))
        ));
    }

    #[test]
    fn test_execution_mode_values() {
        let mut s = session("sess_mode");
        s.set_variable("execution_mode", &Value::Chars("CHUNK_ITERATOR".to_string()))
            .unwrap();
        assert_eq!(s.execution_mode(), ExecutionMode::ChunkIterator);
        s.set_variable("execution_mode", &Value::Chars("tuple_iterator".to_string()))
            .unwrap();
        assert_eq!(s.execution_mode(), ExecutionMode::TupleIterator);
        assert!(matches!(
            s.set_variable("execution_mode", &Value::Chars("ROW".to_string())),
            Err(DbError::VariableNotValid(_))
        ));
    }

    #[test]
    fn test_unknown_variable() {
        let mut s = session("sess_unknown");
        assert!(matches!(
            s.set_variable("no_such_thing", &Value::Int(1)),
            Err(DbError::VariableNotExists(_))
        ));
    }

    #[test]
    fn test_debug_lines_only_when_enabled() {
        let mut s = session("sess_lines");
        s.sql_debug_line("dropped");
        assert!(s.take_debug_lines().is_empty());
        s.set_variable("sql_debug", &Value::Int(1)).unwrap();
        s.sql_debug_line("kept");
        assert_eq!(s.take_debug_lines(), vec!["kept".to_string()]);
    }
}
