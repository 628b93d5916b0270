use tracing::{debug, warn};

use crate::common::{DbError, DbResult, ExecutionMode, Value};
use crate::config::CHUNK_CAPACITY;
use crate::execution::load_data::load_data;
use crate::execution::sql_result::SqlResult;
use crate::session::Session;
use crate::sql::expr::chunk::Chunk;
use crate::sql::operator::{ExecutionContext, explain::render_plan};
use crate::sql::parser::parse_command;
use crate::sql::plan::{Rewriter, create_logical_plan, create_physical_plan};
use crate::sql::stmt::{Stmt, bind_command};

const HELP_TEXT: &[&str] = &[
    "show tables;",
    "desc `table name`;",
    "create table `table name` (`column name` `column type`, ...);",
    "create index `index name` on `table` (`column`);",
    "insert into `table` values(`value1`, `value2`);",
    "delete from `table` [where `column` = `value`];",
    "select [ * | `columns` ] from `table` [where `condition`] [group by `columns`];",
    "explain `statement`;",
    "begin; commit; rollback;",
    "set `variable` = `value`;",
    "load data infile '`file`' into table `table`;",
    "help;",
    "exit;",
];

/// Run one SQL text through parse, bind, plan, rewrite and execution.
/// Statement-level transaction policy lives here: outside an explicit
/// BEGIN the statement's work is committed on success and rolled back
/// on failure; a failure inside BEGIN also rolls the whole transaction
/// back (conflicts fail fast, nothing blocks).
pub fn execute_sql(session: &mut Session, sql: &str) -> SqlResult {
    session.sql_debug_line(format!("receive sql: {}", sql));
    match execute_internal(session, sql) {
        Ok(result) => result,
        Err(e) => {
            debug!("statement failed: {} > {}", e.code(), e);
            if session.trx_mut().is_started() {
                if let Err(rb) = session.trx_mut().rollback() {
                    warn!("rollback after failure also failed: {}", rb);
                }
            }
            session.set_trx_multi_operation_mode(false);
            SqlResult::with_error(e)
        }
    }
}

fn execute_internal(session: &mut Session, sql: &str) -> DbResult<SqlResult> {
    let command = parse_command(sql)?;
    let stmt = bind_command(&session.db().clone(), command)?;

    match &stmt {
        Stmt::CreateTable(create) => {
            session
                .db()
                .create_table(&create.table_name, &create.fields)?;
            Ok(SqlResult::ok())
        }
        Stmt::DropTable { table_name } => {
            session.db().drop_table(table_name)?;
            Ok(SqlResult::ok())
        }
        Stmt::CreateIndex {
            index_name,
            table_name,
            field_name,
        } => {
            let table = session.db().find_table(table_name)?;
            table.create_index(index_name, field_name)?;
            session.db().sync_all()?;
            Ok(SqlResult::ok())
        }
        Stmt::ShowTables => {
            let rows = session
                .db()
                .table_names()
                .into_iter()
                .map(|name| vec![Value::Chars(name)])
                .collect();
            Ok(SqlResult::with_data(vec!["Tables_in_sys".to_string()], rows))
        }
        Stmt::DescTable { table_name } => {
            let table = session.db().find_table(table_name)?;
            let meta = table.meta();
            let rows = meta
                .visible_fields()
                .map(|f| {
                    vec![
                        Value::Chars(f.name.clone()),
                        Value::Chars(f.attr_type.to_string()),
                        Value::Int(f.len as i32),
                    ]
                })
                .collect();
            Ok(SqlResult::with_data(
                vec![
                    "Field".to_string(),
                    "Type".to_string(),
                    "Length".to_string(),
                ],
                rows,
            ))
        }
        Stmt::Help => {
            let rows = HELP_TEXT
                .iter()
                .map(|line| vec![Value::Chars(line.to_string())])
                .collect();
            Ok(SqlResult::with_data(Vec::new(), rows))
        }
        Stmt::Exit => Ok(SqlResult::exit()),
        Stmt::Begin => {
            session.set_trx_multi_operation_mode(true);
            session.trx_mut().start_if_need();
            Ok(SqlResult::ok())
        }
        Stmt::Commit => {
            session.set_trx_multi_operation_mode(false);
            session.trx_mut().commit()?;
            Ok(SqlResult::ok())
        }
        Stmt::Rollback => {
            session.set_trx_multi_operation_mode(false);
            session.trx_mut().rollback()?;
            Ok(SqlResult::ok())
        }
        Stmt::SetVariable { name, value } => {
            session.set_variable(name, value)?;
            Ok(SqlResult::ok())
        }
        Stmt::LoadData {
            file_path,
            table_name,
        } => {
            let table = session.db().find_table(table_name)?;
            let inserted = load_data(session, &table, file_path)?;
            session.sql_debug_line(format!("loaded {} rows into {}", inserted, table_name));
            finish_statement(session)?;
            Ok(SqlResult::ok())
        }
        Stmt::Select(_) | Stmt::Calc(_) | Stmt::Insert(_) | Stmt::Delete(_) | Stmt::Explain(_) => {
            let result = execute_plan(session, &stmt)?;
            finish_statement(session)?;
            Ok(result)
        }
    }
}

/// Auto-commit boundary: outside BEGIN, the statement's implicit
/// transaction commits here.
fn finish_statement(session: &mut Session) -> DbResult<()> {
    if !session.trx_multi_operation_mode() {
        session.trx_mut().commit()?;
    }
    Ok(())
}

fn execute_plan(session: &mut Session, stmt: &Stmt) -> DbResult<SqlResult> {
    let headers = headers_of(stmt);

    let mut logical = create_logical_plan(stmt)?;
    Rewriter::new().rewrite(&mut logical)?;
    let mut root = create_physical_plan(&logical, session.execution_mode())?;

    if session.sql_debug_enabled() {
        for line in render_plan(root.as_ref()).lines().skip(1) {
            session.sql_debug_line(line.to_string());
        }
    }

    let use_chunks =
        session.execution_mode() == ExecutionMode::ChunkIterator && root.chunk_schema().is_some();
    let trx = session.trx_mut();
    // a statement outside BEGIN runs in its own implicit transaction
    trx.start_if_need();
    let mut ctx = ExecutionContext { trx };

    root.open(&mut ctx)?;
    let collected = if use_chunks {
        collect_chunks(root.as_mut(), &mut ctx)
    } else {
        collect_rows(root.as_mut(), &mut ctx)
    };
    let rows = match collected {
        Ok(rows) => rows,
        Err(e) => {
            let _ = root.close(&mut ctx);
            return Err(e);
        }
    };
    root.close(&mut ctx)?;
    Ok(SqlResult::with_data(headers, rows))
}

fn collect_rows(
    root: &mut dyn crate::sql::operator::PhysicalOperator,
    ctx: &mut ExecutionContext,
) -> DbResult<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    while let Some(tuple) = root.next(ctx)? {
        let mut cells = Vec::with_capacity(tuple.cell_count());
        for i in 0..tuple.cell_count() {
            cells.push(tuple.cell_at(i)?);
        }
        rows.push(cells);
    }
    Ok(rows)
}

fn collect_chunks(
    root: &mut dyn crate::sql::operator::PhysicalOperator,
    ctx: &mut ExecutionContext,
) -> DbResult<Vec<Vec<Value>>> {
    let (specs, types) = root
        .chunk_schema()
        .ok_or_else(|| DbError::Internal("chunk execution without schema".to_string()))?;
    let mut chunk = Chunk::new(std::sync::Arc::new(specs), &types, CHUNK_CAPACITY)?;
    let mut rows = Vec::new();
    while root.next_chunk(ctx, &mut chunk)? {
        rows.extend(chunk.selected_rows());
    }
    Ok(rows)
}

fn headers_of(stmt: &Stmt) -> Vec<String> {
    match stmt {
        Stmt::Select(select) => {
            let qualify = select.tables.len() > 1;
            select
                .projects
                .iter()
                .map(|e| e.result_spec().display_name(qualify))
                .collect()
        }
        Stmt::Calc(calc) => calc.exprs.iter().map(|e| e.name()).collect(),
        Stmt::Explain(_) => vec!["Query Plan".to_string()],
        _ => Vec::new(),
    }
}
