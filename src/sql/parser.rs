use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::common::{DbError, DbResult, Value};

/// What the front end hands to the binder.
///
/// The simple commands (transaction control, SHOW/DESC/HELP, SET, LOAD
/// DATA, CREATE INDEX) are recognized by keyword before the grammar and
/// go to dedicated executors; everything else is parsed by sqlparser
/// and bound against the schema.
#[derive(Debug)]
pub enum ParsedCommand {
    Sql(Statement),
    CreateIndex {
        index_name: String,
        table_name: String,
        field_name: String,
    },
    ShowTables,
    DescTable(String),
    Help,
    Exit,
    Begin,
    Commit,
    Rollback,
    SetVariable {
        name: String,
        value: Value,
    },
    LoadData {
        file_path: String,
        table_name: String,
    },
    Explain(Box<ParsedCommand>),
}

pub fn parse_command(sql: &str) -> DbResult<ParsedCommand> {
    let text = sql.trim().trim_end_matches(';').trim();
    if text.is_empty() {
        return Err(DbError::SqlSyntax("empty statement".to_string()));
    }
    let upper = text.to_ascii_uppercase();
    let mut words = upper.split_whitespace();
    let first = words.next().unwrap_or("");

    match first {
        "EXPLAIN" => {
            let rest = &text[text.find(char::is_whitespace).unwrap_or(text.len())..];
            let inner = parse_command(rest)?;
            Ok(ParsedCommand::Explain(Box::new(inner)))
        }
        "BEGIN" => Ok(ParsedCommand::Begin),
        "START" if words.next() == Some("TRANSACTION") => Ok(ParsedCommand::Begin),
        "COMMIT" => Ok(ParsedCommand::Commit),
        "ROLLBACK" => Ok(ParsedCommand::Rollback),
        "HELP" => Ok(ParsedCommand::Help),
        "EXIT" | "BYE" => Ok(ParsedCommand::Exit),
        "SHOW" if words.next() == Some("TABLES") => Ok(ParsedCommand::ShowTables),
        "DESC" | "DESCRIBE" => {
            let table = original_word(text, 1)
                .ok_or_else(|| DbError::SqlSyntax("DESC expects a table name".to_string()))?;
            Ok(ParsedCommand::DescTable(table))
        }
        "SET" => parse_set(text),
        "LOAD" => parse_load_data(text),
        "CREATE" if words.next() == Some("INDEX") => parse_create_index(text),
        _ => {
            let statements = Parser::parse_sql(&GenericDialect {}, text)
                .map_err(|e| DbError::SqlSyntax(e.to_string()))?;
            match statements.into_iter().next() {
                Some(statement) => Ok(ParsedCommand::Sql(statement)),
                None => Err(DbError::SqlSyntax("empty statement".to_string())),
            }
        }
    }
}

/// The n-th whitespace-separated word with its original casing.
fn original_word(text: &str, n: usize) -> Option<String> {
    text.split_whitespace().nth(n).map(|w| w.to_string())
}

/// `SET name = value`; the executor decides whether the variable exists
/// and whether the value fits it.
fn parse_set(text: &str) -> DbResult<ParsedCommand> {
    let rest = text[3..].trim();
    let (name, value_text) = rest
        .split_once('=')
        .ok_or_else(|| DbError::SqlSyntax(format!("malformed SET: {}", text)))?;
    let mut name = name.trim();
    // optional VARIABLE keyword: SET VARIABLE x = 1
    if let Some(stripped) = name.split_whitespace().next()
        && stripped.eq_ignore_ascii_case("variable")
        && name.len() > stripped.len()
    {
        name = name[stripped.len()..].trim();
    }
    if name.is_empty() {
        return Err(DbError::SqlSyntax(format!("malformed SET: {}", text)));
    }
    Ok(ParsedCommand::SetVariable {
        name: name.to_string(),
        value: parse_literal(value_text.trim()),
    })
}

fn parse_literal(text: &str) -> Value {
    let unquoted = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')));
    if let Some(s) = unquoted {
        return Value::Chars(s.to_string());
    }
    if let Ok(i) = text.parse::<i32>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f32>() {
        return Value::Float(f);
    }
    Value::Chars(text.to_string())
}

/// `LOAD DATA INFILE 'file' INTO TABLE t`
fn parse_load_data(text: &str) -> DbResult<ParsedCommand> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let upper: Vec<String> = words.iter().map(|w| w.to_ascii_uppercase()).collect();
    if upper.len() < 7
        || upper[1] != "DATA"
        || upper[2] != "INFILE"
        || upper[4] != "INTO"
        || upper[5] != "TABLE"
    {
        return Err(DbError::SqlSyntax(format!("malformed LOAD DATA: {}", text)));
    }
    let file_path = words[3].trim_matches('\'').trim_matches('"').to_string();
    Ok(ParsedCommand::LoadData {
        file_path,
        table_name: words[6].to_string(),
    })
}

/// `CREATE INDEX i ON t (col)`
fn parse_create_index(text: &str) -> DbResult<ParsedCommand> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let upper: Vec<String> = words.iter().map(|w| w.to_ascii_uppercase()).collect();
    if upper.len() < 5 || upper[1] != "INDEX" || upper[3] != "ON" {
        return Err(DbError::SqlSyntax(format!(
            "malformed CREATE INDEX: {}",
            text
        )));
    }
    let index_name = words[2].to_string();
    // the column list may be glued to the table name or stand alone
    let tail: String = words[4..].join(" ");
    let (open, close) = match (tail.find('('), tail.rfind(')')) {
        (Some(open), Some(close)) if open < close => (open, close),
        _ => {
            return Err(DbError::SqlSyntax(format!(
                "malformed CREATE INDEX: {}",
                text
            )));
        }
    };
    let table_name = tail[..open].trim().to_string();
    let field_name = tail[open + 1..close].trim().to_string();
    if table_name.is_empty() || field_name.is_empty() || field_name.contains(',') {
        return Err(DbError::SqlSyntax(format!(
            "only single-column CREATE INDEX is supported: {}",
            text
        )));
    }
    Ok(ParsedCommand::CreateIndex {
        index_name,
        table_name,
        field_name,
    })
}
