use std::sync::Arc;

use sqlparser::ast::{
    BinaryOperator, CharacterLength, ColumnDef, DataType, Delete, Expr, FromTable,
    FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Insert, ObjectNamePart,
    ObjectType, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value as AstValue,
};

use crate::common::{AttrType, DbError, DbResult, Value};
use crate::sql::expr::expression::{
    AggregateType, ArithmeticType, CompOp, ConjunctionType, Expression,
};
use crate::sql::parser::ParsedCommand;
use crate::storage::db::Db;
use crate::storage::table::Table;

/// A bound, validated statement: every name resolved against the
/// database, every expression typed.
pub enum Stmt {
    Select(SelectStmt),
    Calc(CalcStmt),
    Insert(InsertStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    DropTable {
        table_name: String,
    },
    CreateIndex {
        index_name: String,
        table_name: String,
        field_name: String,
    },
    ShowTables,
    DescTable {
        table_name: String,
    },
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
    Explain(Box<Stmt>),
}

pub struct SelectStmt {
    pub tables: Vec<Arc<Table>>,
    pub projects: Vec<Expression>,
    pub predicate: Option<Expression>,
    pub group_by: Vec<Expression>,
}

pub struct CalcStmt {
    pub exprs: Vec<Expression>,
}

pub struct InsertStmt {
    pub table: Arc<Table>,
    pub rows: Vec<Vec<Value>>,
}

pub struct DeleteStmt {
    pub table: Arc<Table>,
    pub predicate: Option<Expression>,
}

pub struct CreateTableStmt {
    pub table_name: String,
    pub fields: Vec<(String, AttrType, usize)>,
}

pub fn bind_command(db: &Arc<Db>, command: ParsedCommand) -> DbResult<Stmt> {
    match command {
        ParsedCommand::Sql(statement) => bind_statement(db, statement),
        ParsedCommand::CreateIndex {
            index_name,
            table_name,
            field_name,
        } => {
            db.find_table(&table_name)?;
            Ok(Stmt::CreateIndex {
                index_name,
                table_name,
                field_name,
            })
        }
        ParsedCommand::ShowTables => Ok(Stmt::ShowTables),
        ParsedCommand::DescTable(table_name) => {
            db.find_table(&table_name)?;
            Ok(Stmt::DescTable { table_name })
        }
        ParsedCommand::Help => Ok(Stmt::Help),
        ParsedCommand::Exit => Ok(Stmt::Exit),
        ParsedCommand::Begin => Ok(Stmt::Begin),
        ParsedCommand::Commit => Ok(Stmt::Commit),
        ParsedCommand::Rollback => Ok(Stmt::Rollback),
        ParsedCommand::SetVariable { name, value } => Ok(Stmt::SetVariable { name, value }),
        ParsedCommand::LoadData {
            file_path,
            table_name,
        } => {
            db.find_table(&table_name)?;
            Ok(Stmt::LoadData {
                file_path,
                table_name,
            })
        }
        ParsedCommand::Explain(inner) => {
            let inner = bind_command(db, *inner)?;
            match inner {
                Stmt::Select(_) | Stmt::Calc(_) | Stmt::Insert(_) | Stmt::Delete(_) => {
                    Ok(Stmt::Explain(Box::new(inner)))
                }
                _ => Err(DbError::Unsupported(
                    "EXPLAIN supports SELECT, INSERT and DELETE".to_string(),
                )),
            }
        }
    }
}

fn bind_statement(db: &Arc<Db>, statement: Statement) -> DbResult<Stmt> {
    match statement {
        Statement::Query(query) => bind_query(db, &query),
        Statement::Insert(insert) => bind_insert(db, &insert),
        Statement::Delete(delete) => bind_delete(db, &delete),
        Statement::CreateTable(create) => {
            let fields = create
                .columns
                .iter()
                .map(column_def_to_field)
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Stmt::CreateTable(CreateTableStmt {
                table_name: create.name.to_string(),
                fields,
            }))
        }
        Statement::Drop {
            object_type,
            names,
            ..
        } => {
            if object_type != ObjectType::Table || names.len() != 1 {
                return Err(DbError::Unsupported(
                    "only DROP TABLE is supported".to_string(),
                ));
            }
            Ok(Stmt::DropTable {
                table_name: names[0].to_string(),
            })
        }
        Statement::StartTransaction { .. } => Ok(Stmt::Begin),
        Statement::Commit { .. } => Ok(Stmt::Commit),
        Statement::Rollback { .. } => Ok(Stmt::Rollback),
        other => Err(DbError::Unsupported(format!(
            "statement: {}",
            statement_kind(&other)
        ))),
    }
}

fn statement_kind(statement: &Statement) -> String {
    let text = format!("{:?}", statement);
    text.split(['(', ' ', '{'])
        .next()
        .unwrap_or("unknown")
        .to_string()
}

fn bind_query(db: &Arc<Db>, query: &Query) -> DbResult<Stmt> {
    let SetExpr::Select(select) = &*query.body else {
        return Err(DbError::Unsupported(
            "only plain SELECT is supported".to_string(),
        ));
    };
    bind_select(db, select)
}

fn bind_select(db: &Arc<Db>, select: &Select) -> DbResult<Stmt> {
    let tables = resolve_from(db, &select.from)?;

    // FROM-less SELECT is the calculator path
    if tables.is_empty() {
        let mut exprs = Vec::new();
        for item in &select.projection {
            let expr = select_item_expr(item)?;
            let expr = ast_to_expression(expr)?;
            let bound = bind_expression(expr, &tables)?;
            exprs.push(bound);
        }
        if select.selection.is_some() {
            return Err(DbError::Unsupported(
                "WHERE without FROM is not supported".to_string(),
            ));
        }
        return Ok(Stmt::Calc(CalcStmt { exprs }));
    }

    let mut projects = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => expand_star(&tables, None, &mut projects)?,
            SelectItem::QualifiedWildcard(kind, _) => {
                let name = kind.to_string();
                let table_name = name.strip_suffix(".*").unwrap_or(&name).to_string();
                expand_star(&tables, Some(&table_name), &mut projects)?;
            }
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                let expr = ast_to_expression(expr)?;
                projects.push(bind_expression(expr, &tables)?);
            }
        }
    }
    if projects.is_empty() {
        return Err(DbError::InvalidArgument("empty select list".to_string()));
    }

    let predicate = match &select.selection {
        Some(selection) => {
            let expr = ast_to_expression(selection)?;
            Some(bind_expression(expr, &tables)?)
        }
        None => None,
    };

    let group_by = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs
            .iter()
            .map(|e| bind_expression(ast_to_expression(e)?, &tables))
            .collect::<DbResult<Vec<_>>>()?,
        _ => Vec::new(),
    };

    Ok(Stmt::Select(SelectStmt {
        tables,
        projects,
        predicate,
        group_by,
    }))
}

fn resolve_from(db: &Arc<Db>, from: &[TableWithJoins]) -> DbResult<Vec<Arc<Table>>> {
    let mut tables = Vec::new();
    for table_with_joins in from {
        collect_table(db, &table_with_joins.relation, &mut tables)?;
        for join in &table_with_joins.joins {
            collect_table(db, &join.relation, &mut tables)?;
        }
    }
    Ok(tables)
}

fn collect_table(
    db: &Arc<Db>,
    factor: &TableFactor,
    tables: &mut Vec<Arc<Table>>,
) -> DbResult<()> {
    match factor {
        TableFactor::Table { name, .. } => {
            tables.push(db.find_table(&name.to_string())?);
            Ok(())
        }
        _ => Err(DbError::Unsupported(
            "only plain tables are supported in FROM".to_string(),
        )),
    }
}

fn select_item_expr(item: &SelectItem) -> DbResult<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => Ok(expr),
        _ => Err(DbError::Unsupported(
            "wildcard is only supported over tables".to_string(),
        )),
    }
}

fn expand_star(
    tables: &[Arc<Table>],
    table_name: Option<&str>,
    out: &mut Vec<Expression>,
) -> DbResult<()> {
    let mut matched = false;
    for table in tables {
        let name = table.name();
        if let Some(wanted) = table_name
            && wanted != name
        {
            continue;
        }
        matched = true;
        let meta = table.meta();
        for field in meta.visible_fields() {
            out.push(Expression::Field {
                table: name.clone(),
                field: field.clone(),
            });
        }
    }
    if !matched {
        return Err(DbError::SchemaTableNotExist(
            table_name.unwrap_or("*").to_string(),
        ));
    }
    Ok(())
}

/// Translate a sqlparser expression into our (unbound) expression tree.
pub fn ast_to_expression(expr: &Expr) -> DbResult<Expression> {
    match expr {
        Expr::Identifier(ident) => Ok(Expression::UnboundField {
            table: None,
            field: ident.value.clone(),
        }),
        Expr::CompoundIdentifier(idents) => {
            if idents.len() != 2 {
                return Err(DbError::Unsupported(format!(
                    "identifier with {} parts",
                    idents.len()
                )));
            }
            Ok(Expression::UnboundField {
                table: Some(idents[0].value.clone()),
                field: idents[1].value.clone(),
            })
        }
        Expr::Value(value) => match &value.value {
            AstValue::Number(text, _) => parse_number(text),
            AstValue::SingleQuotedString(s) | AstValue::DoubleQuotedString(s) => {
                Ok(Expression::Value(Value::Chars(s.clone())))
            }
            AstValue::Boolean(b) => Ok(Expression::Value(Value::Bool(*b))),
            other => Err(DbError::Unsupported(format!("literal {:?}", other))),
        },
        Expr::BinaryOp { left, op, right } => {
            let left = ast_to_expression(left)?;
            let right = ast_to_expression(right)?;
            if let Some(comp) = comp_op(op) {
                return Ok(Expression::Comparison {
                    op: comp,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            if let Some(conj) = conjunction_type(op) {
                return Ok(Expression::Conjunction {
                    conj,
                    children: vec![left, right],
                });
            }
            if let Some(arith) = arithmetic_type(op) {
                return Ok(Expression::Arithmetic {
                    op: arith,
                    left: Box::new(left),
                    right: Some(Box::new(right)),
                });
            }
            Err(DbError::Unsupported(format!("operator {:?}", op)))
        }
        Expr::UnaryOp { op, expr } => match op {
            UnaryOperator::Minus => Ok(Expression::Arithmetic {
                op: ArithmeticType::Negative,
                left: Box::new(ast_to_expression(expr)?),
                right: None,
            }),
            UnaryOperator::Plus => ast_to_expression(expr),
            other => Err(DbError::Unsupported(format!("operator {:?}", other))),
        },
        Expr::Nested(inner) => ast_to_expression(inner),
        Expr::Function(func) => {
            let name = match func.name.0.first() {
                Some(ObjectNamePart::Identifier(ident)) => ident.value.clone(),
                _ => {
                    return Err(DbError::Unsupported(format!(
                        "function name {}",
                        func.name
                    )));
                }
            };
            let child = match &func.args {
                FunctionArguments::List(list) if list.args.len() == 1 => match &list.args[0] {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => ast_to_expression(e)?,
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                        Expression::Star { table: None }
                    }
                    other => {
                        return Err(DbError::Unsupported(format!(
                            "function argument {:?}",
                            other
                        )));
                    }
                },
                _ => {
                    return Err(DbError::Unsupported(format!(
                        "function {} expects exactly one argument",
                        name
                    )));
                }
            };
            Ok(Expression::UnboundAggregation {
                name,
                child: Box::new(child),
            })
        }
        other => Err(DbError::Unsupported(format!(
            "expression {:?}",
            expression_kind(other)
        ))),
    }
}

fn expression_kind(expr: &Expr) -> String {
    let text = format!("{:?}", expr);
    text.split(['(', ' ', '{'])
        .next()
        .unwrap_or("unknown")
        .to_string()
}

fn parse_number(text: &str) -> DbResult<Expression> {
    if let Ok(i) = text.parse::<i32>() {
        return Ok(Expression::Value(Value::Int(i)));
    }
    if let Ok(f) = text.parse::<f32>() {
        return Ok(Expression::Value(Value::Float(f)));
    }
    Err(DbError::InvalidArgument(format!(
        "cannot parse number: {}",
        text
    )))
}

fn comp_op(op: &BinaryOperator) -> Option<CompOp> {
    match op {
        BinaryOperator::Eq => Some(CompOp::EqualTo),
        BinaryOperator::NotEq => Some(CompOp::NotEqual),
        BinaryOperator::Lt => Some(CompOp::LessThan),
        BinaryOperator::LtEq => Some(CompOp::LessEqual),
        BinaryOperator::Gt => Some(CompOp::GreatThan),
        BinaryOperator::GtEq => Some(CompOp::GreatEqual),
        _ => None,
    }
}

fn conjunction_type(op: &BinaryOperator) -> Option<ConjunctionType> {
    match op {
        BinaryOperator::And => Some(ConjunctionType::And),
        BinaryOperator::Or => Some(ConjunctionType::Or),
        _ => None,
    }
}

fn arithmetic_type(op: &BinaryOperator) -> Option<ArithmeticType> {
    match op {
        BinaryOperator::Plus => Some(ArithmeticType::Add),
        BinaryOperator::Minus => Some(ArithmeticType::Sub),
        BinaryOperator::Multiply => Some(ArithmeticType::Mul),
        BinaryOperator::Divide => Some(ArithmeticType::Div),
        _ => None,
    }
}

/// Resolve unbound names and aggregates against the FROM tables,
/// inserting comparison casts where the two sides disagree on type.
pub fn bind_expression(expr: Expression, tables: &[Arc<Table>]) -> DbResult<Expression> {
    match expr {
        Expression::UnboundField { table, field } => bind_field(table, field, tables),
        Expression::UnboundAggregation { name, child } => {
            let Some(agg) = AggregateType::from_name(&name) else {
                return Err(DbError::Unsupported(format!("function {}", name)));
            };
            // COUNT(*) counts rows: the argument collapses to 1
            let child = match (*child, agg) {
                (Expression::Star { .. }, AggregateType::Count) => {
                    Expression::Value(Value::Int(1))
                }
                (Expression::Star { .. }, _) => {
                    return Err(DbError::InvalidArgument(format!("{}(*)", agg)));
                }
                (child, _) => bind_expression(child, tables)?,
            };
            if matches!(agg, AggregateType::Sum | AggregateType::Avg) {
                match child.value_type() {
                    AttrType::Ints | AttrType::Floats => {}
                    t => {
                        return Err(DbError::InvalidArgument(format!(
                            "{} over {} values",
                            agg, t
                        )));
                    }
                }
            }
            Ok(Expression::Aggregation {
                agg,
                child: Box::new(child),
            })
        }
        Expression::Star { .. } => Err(DbError::InvalidArgument(
            "* is only allowed at the top of a select list".to_string(),
        )),
        Expression::Cast { child, target } => Ok(Expression::Cast {
            child: Box::new(bind_expression(*child, tables)?),
            target,
        }),
        Expression::Comparison { op, left, right } => {
            let left = bind_expression(*left, tables)?;
            let right = bind_expression(*right, tables)?;
            let (left, right) = coerce_comparison(left, right)?;
            Ok(Expression::Comparison {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })
        }
        Expression::Conjunction { conj, children } => Ok(Expression::Conjunction {
            conj,
            children: children
                .into_iter()
                .map(|c| bind_expression(c, tables))
                .collect::<DbResult<Vec<_>>>()?,
        }),
        Expression::Arithmetic { op, left, right } => Ok(Expression::Arithmetic {
            op,
            left: Box::new(bind_expression(*left, tables)?),
            right: match right {
                Some(right) => Some(Box::new(bind_expression(*right, tables)?)),
                None => None,
            },
        }),
        bound => Ok(bound),
    }
}

fn bind_field(
    table: Option<String>,
    field: String,
    tables: &[Arc<Table>],
) -> DbResult<Expression> {
    let table = match table {
        Some(table_name) => {
            let Some(table) = tables.iter().find(|t| t.name() == table_name) else {
                return Err(DbError::SchemaTableNotExist(table_name));
            };
            table.clone()
        }
        None => {
            if tables.len() != 1 {
                return Err(DbError::SchemaFieldMissing(format!(
                    "field {} must be qualified with a table name",
                    field
                )));
            }
            tables[0].clone()
        }
    };
    let meta = table.meta();
    match meta.field(&field) {
        Some(field_meta) if field_meta.visible => Ok(Expression::Field {
            table: table.name(),
            field: field_meta.clone(),
        }),
        _ => Err(DbError::SchemaFieldNotExist(format!(
            "{}.{}",
            table.name(),
            field
        ))),
    }
}

/// When the two sides of a comparison disagree on type, cast the side
/// with the cheaper conversion; a constant is cast eagerly at bind
/// time, anything else gets a Cast node.
fn coerce_comparison(
    left: Expression,
    right: Expression,
) -> DbResult<(Expression, Expression)> {
    let left_type = left.value_type();
    let right_type = right.value_type();
    if left_type == right_type
        || left_type == AttrType::Undefined
        || right_type == AttrType::Undefined
    {
        return Ok((left, right));
    }
    let left_to_right = Value::cast_cost(left_type, right_type);
    let right_to_left = Value::cast_cost(right_type, left_type);
    if left_to_right == i32::MAX && right_to_left == i32::MAX {
        return Err(DbError::SchemaFieldTypeMismatch(format!(
            "cannot compare {} with {}",
            left_type, right_type
        )));
    }
    if left_to_right <= right_to_left {
        Ok((cast_expression(left, right_type)?, right))
    } else {
        let right = cast_expression(right, left_type)?;
        Ok((left, right))
    }
}

fn cast_expression(expr: Expression, target: AttrType) -> DbResult<Expression> {
    match expr {
        // fold the cast into the literal right away
        Expression::Value(v) => Ok(Expression::Value(v.cast_to(target)?)),
        other => Ok(Expression::Cast {
            child: Box::new(other),
            target,
        }),
    }
}

fn column_def_to_field(column: &ColumnDef) -> DbResult<(String, AttrType, usize)> {
    let (attr_type, len) = match &column.data_type {
        DataType::Int(_) | DataType::Integer(_) => (AttrType::Ints, 4),
        DataType::Float(_) | DataType::Real | DataType::Double { .. } => (AttrType::Floats, 4),
        DataType::Bool | DataType::Boolean => (AttrType::Booleans, 1),
        DataType::Char(opt_len) | DataType::Varchar(opt_len) => {
            let len = match opt_len {
                Some(CharacterLength::IntegerLength { length, .. }) => *length as usize,
                Some(CharacterLength::Max) | None => 32,
            };
            (AttrType::Chars, len)
        }
        // type words the grammar does not know, e.g. CHARS(8)
        DataType::Custom(name, args) => {
            let keyword = name.to_string();
            match AttrType::from_keyword(&keyword) {
                Some(AttrType::Ints) => (AttrType::Ints, 4),
                Some(AttrType::Floats) => (AttrType::Floats, 4),
                Some(AttrType::Booleans) => (AttrType::Booleans, 1),
                Some(AttrType::Chars) => {
                    let len = args
                        .first()
                        .and_then(|a| a.parse::<usize>().ok())
                        .unwrap_or(32);
                    (AttrType::Chars, len)
                }
                _ => {
                    return Err(DbError::Unsupported(format!(
                        "column type {} for {}",
                        keyword, column.name
                    )));
                }
            }
        }
        other => {
            return Err(DbError::Unsupported(format!(
                "column type {} for {}",
                other, column.name
            )));
        }
    };
    Ok((column.name.value.clone(), attr_type, len))
}

fn bind_insert(db: &Arc<Db>, insert: &Insert) -> DbResult<Stmt> {
    let table = db.find_table(&insert.table.to_string())?;
    if !insert.columns.is_empty() {
        return Err(DbError::Unsupported(
            "INSERT with a column list is not supported".to_string(),
        ));
    }
    let Some(source) = &insert.source else {
        return Err(DbError::SqlSyntax("INSERT without VALUES".to_string()));
    };
    let SetExpr::Values(values) = &*source.body else {
        return Err(DbError::Unsupported(
            "only INSERT ... VALUES is supported".to_string(),
        ));
    };

    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        let mut cells = Vec::with_capacity(row.len());
        for expr in row {
            let expr = ast_to_expression(expr)?;
            let value = expr.try_get_value().map_err(|_| {
                DbError::InvalidArgument("INSERT values must be constants".to_string())
            })?;
            cells.push(value);
        }
        rows.push(cells);
    }
    Ok(Stmt::Insert(InsertStmt { table, rows }))
}

fn bind_delete(db: &Arc<Db>, delete: &Delete) -> DbResult<Stmt> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    if tables.len() != 1 {
        return Err(DbError::Unsupported(
            "DELETE touches exactly one table".to_string(),
        ));
    }
    let TableFactor::Table { name, .. } = &tables[0].relation else {
        return Err(DbError::Unsupported(
            "only plain tables are supported in DELETE".to_string(),
        ));
    };
    let table = db.find_table(&name.to_string())?;

    let predicate = match &delete.selection {
        Some(selection) => {
            let expr = ast_to_expression(selection)?;
            Some(bind_expression(expr, std::slice::from_ref(&table))?)
        }
        None => None,
    };
    Ok(Stmt::Delete(DeleteStmt { table, predicate }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::parse_command;
    use crate::utils;

    fn test_db(annot: &str) -> Arc<Db> {
        let dir = utils::test_dir(annot);
        let db = Db::open(&dir).unwrap();
        db.create_table(
            "t",
            &[
                ("id".to_string(), AttrType::Ints, 4),
                ("name".to_string(), AttrType::Chars, 16),
                ("score".to_string(), AttrType::Floats, 4),
            ],
        )
        .unwrap();
        db
    }

    fn bind(db: &Arc<Db>, sql: &str) -> DbResult<Stmt> {
        bind_command(db, parse_command(sql)?)
    }

    #[test]
    fn test_star_expands_in_from_order() {
        let db = test_db("stmt_star");
        let Stmt::Select(select) = bind(&db, "SELECT * FROM t").unwrap() else {
            panic!("expected select");
        };
        let names: Vec<String> = select.projects.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["id", "name", "score"]);
    }

    #[test]
    fn test_unknown_table_and_field() {
        let db = test_db("stmt_unknown");
        assert!(matches!(
            bind(&db, "SELECT * FROM missing"),
            Err(DbError::SchemaTableNotExist(_))
        ));
        assert!(matches!(
            bind(&db, "SELECT nope FROM t"),
            Err(DbError::SchemaFieldNotExist(_))
        ));
        // system fields are not visible to queries
        assert!(matches!(
            bind(&db, "SELECT __trx_xid_begin FROM t"),
            Err(DbError::SchemaFieldNotExist(_))
        ));
    }

    #[test]
    fn test_comparison_coercion_casts_the_cheaper_side() {
        let db = test_db("stmt_coerce");
        let Stmt::Select(select) = bind(&db, "SELECT id FROM t WHERE id = 3.5").unwrap() else {
            panic!("expected select");
        };
        // the int field is cast toward the float constant
        let Some(Expression::Comparison { left, right, .. }) = select.predicate else {
            panic!("expected comparison");
        };
        assert!(matches!(*left, Expression::Cast { .. }));
        assert!(matches!(*right, Expression::Value(Value::Float(_))));
    }

    #[test]
    fn test_constant_cast_is_eager() {
        let db = test_db("stmt_eager");
        let Stmt::Select(select) = bind(&db, "SELECT id FROM t WHERE score > 2").unwrap() else {
            panic!("expected select");
        };
        let Some(Expression::Comparison { left, right, .. }) = select.predicate else {
            panic!("expected comparison");
        };
        // the int literal became a float literal at bind time
        assert!(matches!(*left, Expression::Field { .. }));
        assert!(matches!(*right, Expression::Value(Value::Float(_))));
    }

    #[test]
    fn test_count_star_rewrites_to_one() {
        let db = test_db("stmt_count");
        let Stmt::Select(select) = bind(&db, "SELECT COUNT(*) FROM t").unwrap() else {
            panic!("expected select");
        };
        let Expression::Aggregation { agg, child } = &select.projects[0] else {
            panic!("expected aggregation");
        };
        assert_eq!(*agg, AggregateType::Count);
        assert_eq!(**child, Expression::Value(Value::Int(1)));
    }

    #[test]
    fn test_sum_requires_numeric() {
        let db = test_db("stmt_sum");
        assert!(matches!(
            bind(&db, "SELECT SUM(name) FROM t"),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_insert_requires_constants() {
        let db = test_db("stmt_insert");
        let Stmt::Insert(insert) = bind(&db, "INSERT INTO t VALUES (1, 'a', 2.5)").unwrap()
        else {
            panic!("expected insert");
        };
        assert_eq!(insert.rows.len(), 1);
        assert_eq!(
            insert.rows[0],
            vec![
                Value::Int(1),
                Value::Chars("a".to_string()),
                Value::Float(2.5)
            ]
        );
        assert!(bind(&db, "INSERT INTO t VALUES (id, 'a', 1)").is_err());
    }

    #[test]
    fn test_unqualified_field_with_two_tables() {
        let db = test_db("stmt_twotables");
        db.create_table("s", &[("id".to_string(), AttrType::Ints, 4)])
            .unwrap();
        assert!(matches!(
            bind(&db, "SELECT id FROM t, s"),
            Err(DbError::SchemaFieldMissing(_))
        ));
        assert!(bind(&db, "SELECT t.id, s.id FROM t, s").is_ok());
    }
}
