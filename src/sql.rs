use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterRoom {
        id: Ulid,
        name: Option<String>,
        kind: Option<String>,
        capacity: u32,
        building: Option<String>,
    },
    AcquireLock {
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        ttl_ms: Option<Ms>,
        returning: bool,
    },
    ReleaseLock {
        id: Ulid,
    },
    ConfirmBooking {
        id: Ulid,
        lock_id: Ulid,
        returning: bool,
    },
    SelectRooms,
    SelectAvailability {
        /// Candidate rooms; empty means the whole catalog.
        room_ids: Vec<Ulid>,
        start: Ms,
        end: Ms,
    },
    SelectFreeWindows {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    SelectBookings {
        /// None = the session owner's bookings.
        room_id: Option<Ulid>,
    },
    SelectLocks {
        room_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("rooms", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            let kind = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            let capacity = if values.len() >= 4 {
                parse_u32(&values[3])?
            } else {
                1
            };
            let building = if values.len() >= 5 {
                parse_string_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::RegisterRoom {
                id,
                name,
                kind,
                capacity,
                building,
            })
        }
        "locks" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("locks", 4, values.len()));
            }
            let ttl_ms = if values.len() >= 5 {
                parse_i64_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::AcquireLock {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                ttl_ms,
                returning,
            })
        }
        "bookings" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("bookings", 2, values.len()));
            }
            Ok(Command::ConfirmBooking {
                id: parse_ulid(&values[0])?,
                lock_id: parse_ulid(&values[1])?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "locks" => {
            let id = extract_where_id(&delete.selection)?;
            Ok(Command::ReleaseLock { id })
        }
        // Cancellation and catalog administration live elsewhere
        "bookings" | "rooms" => Err(SqlError::Unsupported(format!("DELETE FROM {table}"))),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "availability" => {
            let mut filters = Filters::default();
            if let Some(selection) = &select.selection {
                extract_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectAvailability {
                room_ids: filters.room_ids,
                start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
                end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        "free_windows" => {
            let mut filters = Filters::default();
            if let Some(selection) = &select.selection {
                extract_filters(selection, &mut filters)?;
            }
            let room_id = match filters.room_ids.as_slice() {
                [single] => *single,
                _ => return Err(SqlError::MissingFilter("room_id")),
            };
            Ok(Command::SelectFreeWindows {
                room_id,
                start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
                end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
                min_duration: filters.min_duration,
            })
        }
        "bookings" => {
            let mut filters = Filters::default();
            if let Some(selection) = &select.selection {
                extract_filters(selection, &mut filters)?;
            }
            let room_id = match filters.room_ids.as_slice() {
                [] => None,
                [single] => Some(*single),
                _ => return Err(SqlError::Unsupported("bookings room_id IN (…)".into())),
            };
            Ok(Command::SelectBookings { room_id })
        }
        "locks" => {
            let mut filters = Filters::default();
            if let Some(selection) = &select.selection {
                extract_filters(selection, &mut filters)?;
            }
            let room_id = match filters.room_ids.as_slice() {
                [single] => *single,
                _ => return Err(SqlError::MissingFilter("room_id")),
            };
            Ok(Command::SelectLocks { room_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    room_ids: Vec<Ulid>,
    start: Option<Ms>,
    end: Option<Ms>,
    min_duration: Option<Ms>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("room_id") {
                    filters.room_ids.push(parse_ulid_expr(right)?);
                } else if col.as_deref() == Some("min_duration") {
                    filters.min_duration = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        },
        Expr::InList {
            expr: col,
            list,
            negated: false,
        } => {
            if expr_column_name(col).as_deref() == Some("room_id") {
                for item in list {
                    filters.room_ids.push(parse_ulid_expr(item)?);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            _ => Ok(Some(parse_i64_expr(expr)?)),
        }
    } else {
        Ok(Some(parse_i64_expr(expr)?))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
