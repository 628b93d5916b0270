use crate::common::{DbError, Value};

/// The materialized outcome of one statement: an optional header, the
/// data rows, and what the status line should say.
pub struct SqlResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub error: Option<DbError>,
    /// the client asked to end the connection
    pub disconnect: bool,
}

impl SqlResult {
    pub fn ok() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            error: None,
            disconnect: false,
        }
    }

    pub fn with_data(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            headers,
            rows,
            error: None,
            disconnect: false,
        }
    }

    pub fn with_error(error: DbError) -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            error: Some(error),
            disconnect: false,
        }
    }

    pub fn exit() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            error: None,
            disconnect: true,
        }
    }

    /// Status line per the wire protocol: `SUCCESS`, bare `FAILURE`
    /// for message-less errors, else `CODE > message`.
    pub fn status_line(&self) -> String {
        match &self.error {
            None => "SUCCESS".to_string(),
            Some(e) => {
                let message = e.to_string();
                if message.is_empty() {
                    "FAILURE".to_string()
                } else {
                    format!("{} > {}", e.code(), message)
                }
            }
        }
    }
}
