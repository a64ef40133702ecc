use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

const ROOM_COLUMNS: &[&str] = &["id", "name", "price", "capacity"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "check_in",
    "check_out",
    "guests",
    "total_price",
    "status",
    "guest_name",
];
const BOOKING_REQUIRED: usize = 5;
const STATUS_COLUMNS: &[&str] = &["id", "status"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    },
    UpdateRoom {
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking(NewBooking),
    BatchInsertBookings {
        bookings: Vec<NewBooking>,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectRooms,
    SelectBookings {
        room_id: Option<Ulid>,
    },
    SelectOverlapping {
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
    },
    SelectAvailableRooms {
        check_in: Ms,
        check_out: Ms,
        guests: u32,
    },
    SelectOccupancy(OccupancyQuery),
    SelectOccupancyReport(OccupancyQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyQuery {
    pub period: Period,
    pub from: Ms,
    pub to: Ms,
    pub room_type: Option<String>,
}

/// Parse exactly one statement. A trailing `;` is fine, a second statement is not.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_statements(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    commands.pop().ok_or(SqlError::Empty)
}

/// Every statement of a `;`-separated script, in order.
pub fn parse_statements(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row with each expression paired to its column name. Without an
/// explicit column list, values are taken in the table's canonical order.
struct Row<'a> {
    table: &'static str,
    fields: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn bind(
        table: &'static str,
        canonical: &'static [&'static str],
        required: usize,
        columns: &[String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let fields: Vec<(String, &Expr)> = if columns.is_empty() {
            if values.len() < required || values.len() > canonical.len() {
                return Err(SqlError::WrongArity(table, required, values.len()));
            }
            canonical
                .iter()
                .map(|c| c.to_string())
                .zip(values.iter())
                .collect()
        } else {
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            if let Some(unknown) = columns.iter().find(|c| !canonical.contains(&c.as_str())) {
                return Err(SqlError::Parse(format!("{table}: unknown column {unknown}")));
            }
            columns.iter().cloned().zip(values.iter()).collect()
        };
        let row = Row { table, fields };
        for &col in &canonical[..required] {
            row.require(col)?;
        }
        Ok(row)
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, expr)| *expr)
            .filter(|expr| !is_null(expr))
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "rooms" | "room_updates" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row room insert".into()));
            }
            let row = Row::bind("rooms", ROOM_COLUMNS, ROOM_COLUMNS.len(), &columns, &rows[0])?;
            let id = parse_ulid(row.require("id")?)?;
            let name = parse_string(row.require("name")?)?;
            let price = parse_f64(row.require("price")?)?;
            let capacity = parse_u32(row.require("capacity")?)?;
            if table == "rooms" {
                Ok(Command::InsertRoom {
                    id,
                    name,
                    price,
                    capacity,
                })
            } else {
                Ok(Command::UpdateRoom {
                    id,
                    name,
                    price,
                    capacity,
                })
            }
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::bind("bookings", BOOKING_COLUMNS, BOOKING_REQUIRED, &columns, values)?;
                let booking = booking_from_row(&row).map_err(|e| match e {
                    SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
                    other => other,
                })?;
                bookings.push(booking);
            }
            if bookings.len() == 1 {
                Ok(Command::InsertBooking(bookings.remove(0)))
            } else {
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        "booking_status" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row status change".into()));
            }
            let row = Row::bind("booking_status", STATUS_COLUMNS, 2, &columns, &rows[0])?;
            Ok(Command::SetBookingStatus {
                id: parse_ulid(row.require("id")?)?,
                status: BookingStatus::parse(&parse_string(row.require("status")?)?),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// An omitted status is `pending`; an unrecognised one is kept as `Unknown`.
fn booking_from_row(row: &Row<'_>) -> Result<NewBooking, SqlError> {
    Ok(NewBooking {
        id: parse_ulid(row.require("id")?)?,
        room_id: parse_ulid(row.require("room_id")?)?,
        check_in: parse_ms(row.require("check_in")?)?,
        check_out: parse_ms(row.require("check_out")?)?,
        guests: parse_u32(row.require("guests")?)?,
        total_price: row.get("total_price").map(parse_f64).transpose()?,
        status: match row.get("status") {
            Some(expr) => BookingStatus::parse(&parse_string(expr)?),
            None => BookingStatus::Pending,
        },
        guest_name: row.get("guest_name").map(parse_string).transpose()?,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;
    let id = parse_ulid(find_filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;
    let required = |col: &'static str| find_filter(&filters, col).ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "bookings" => Ok(Command::SelectBookings {
            room_id: find_filter(&filters, "room_id").map(parse_ulid).transpose()?,
        }),
        "overlapping_bookings" => Ok(Command::SelectOverlapping {
            room_id: parse_ulid(required("room_id")?)?,
            check_in: parse_ms(required("check_in")?)?,
            check_out: parse_ms(required("check_out")?)?,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            check_in: parse_ms(required("check_in")?)?,
            check_out: parse_ms(required("check_out")?)?,
            guests: find_filter(&filters, "guests")
                .map(parse_u32)
                .transpose()?
                .unwrap_or(1),
        }),
        "occupancy" | "occupancy_report" => {
            let from = parse_ms(required("from_date")?)?;
            let to = parse_ms(required("to_date")?)?;
            let period_name = find_filter(&filters, "period")
                .map(parse_string)
                .transpose()?
                .unwrap_or_else(|| "custom".into());
            let period = Period::resolve(&period_name, from, to)
                .ok_or_else(|| SqlError::Parse(format!("unknown period: {period_name}")))?;
            let q = OccupancyQuery {
                period,
                from,
                to,
                room_type: find_filter(&filters, "room_type")
                    .map(parse_string)
                    .transpose()?,
            };
            if table == "occupancy" {
                Ok(Command::SelectOccupancy(q))
            } else {
                Ok(Command::SelectOccupancyReport(q))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten a WHERE clause of `col <op> value` terms joined by AND. Comparison
/// operators are interchangeable; each only binds the column to its value.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_into(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_into<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_into(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                collect_into(left, out)?;
                collect_into(right, out)
            }
            BinaryOperator::Eq
            | BinaryOperator::GtEq
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::Lt => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn find_filter<'a>(filters: &[(String, &'a Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(name, _)| name == col).map(|(_, e)| *e)
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// The literal text of a string or number, with a leading minus folded in.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    match expr {
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Ok(format!("-{}", literal_text(expr)?)),
        _ => match extract_value(expr) {
            Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
            Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
            None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let s = literal_text(expr)?;
    let v: i64 = s
        .trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// A point in time: integer Unix milliseconds, `'YYYY-MM-DD'` (UTC midnight),
/// or an RFC 3339 timestamp.
fn parse_ms(expr: &Expr) -> Result<Ms, SqlError> {
    let s = literal_text(expr)?;
    parse_timestamp(s.trim()).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
}

pub(crate) fn parse_timestamp(s: &str) -> Option<Ms> {
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
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
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
