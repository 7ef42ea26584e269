//! The worker side of the boundary: a loop owning the live SQLite instance.
//!
//! The loop processes one request at a time to completion, which serializes
//! every mutation of the database. The connection is held by the loop itself
//! and handed to each handler; there is no ambient global instance. Any
//! fault inside a handler is caught at the message boundary and marshaled
//! into an error response under the same correlation id; the loop never dies
//! on a handler fault.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use sqlbook_core::{ColumnType, SqlColumn, SqlResult, Value};

use crate::protocol::{Request, RequestOp, Response, ResponseOp};

/// Pages copied per backup step when dumping or loading the database.
const BACKUP_PAGES_PER_STEP: i32 = 64;

/// Faults raised inside the worker.
///
/// These never cross the boundary as values: the loop reduces them to their
/// message text in an error response.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation arrived before the database was opened.
    #[error("database was not initialized")]
    NotInitialized,

    /// SQLite-level failure (prepare, bind, step, backup).
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// A dump was requested but produced no data.
    #[error("serialization produced no data")]
    EmptyDump,

    /// Scratch-file IO failure during dump or load.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the worker loop until the request channel closes.
pub fn run(requests: Receiver<Request>, responses: UnboundedSender<Response>) {
    let mut db: Option<Connection> = None;
    while let Ok(request) = requests.recv() {
        let Request { id, op } = request;
        tracing::debug!(id, kind = op.kind(), "engine request");
        let op = match handle(&mut db, op) {
            Ok(op) => op,
            Err(err) => {
                tracing::warn!(id, "engine request failed: {err}");
                ResponseOp::Error {
                    message: err.to_string(),
                }
            }
        };
        if responses.send(Response { id, op }).is_err() {
            // Proxy side is gone; nobody is left to read responses.
            break;
        }
    }
    tracing::debug!("engine worker shutting down");
}

/// Dispatch one request against the owned connection.
fn handle(db: &mut Option<Connection>, op: RequestOp) -> Result<ResponseOp, EngineError> {
    match op {
        RequestOp::Open => {
            // Replaces any live instance; the previous connection closes on drop.
            *db = Some(Connection::open_in_memory()?);
            Ok(ResponseOp::Open)
        }
        RequestOp::Exec { sql, args } => {
            let conn = db.as_ref().ok_or(EngineError::NotInitialized)?;
            let result = exec_statement(conn, &sql, &args)?;
            Ok(ResponseOp::Exec {
                results: vec![result],
            })
        }
        RequestOp::Serialize => {
            let conn = db.as_ref().ok_or(EngineError::NotInitialized)?;
            let data = serialize_database(conn)?;
            Ok(ResponseOp::Serialize { data })
        }
        RequestOp::Load { data } => {
            if db.is_none() {
                return Err(EngineError::NotInitialized);
            }
            *db = Some(load_database(&data)?);
            Ok(ResponseOp::Load)
        }
    }
}

/// Prepare and run a single statement, draining all rows.
///
/// One statement per call: statement batches are not split here, the store
/// issues one statement at a time.
fn exec_statement(conn: &Connection, sql: &str, args: &[Value]) -> Result<SqlResult, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let mut columns: Vec<SqlColumn> = stmt
        .columns()
        .iter()
        .map(|column| SqlColumn {
            name: column.name().to_string(),
            ty: column
                .decl_type()
                .map_or(ColumnType::Unknown, column_type_from_decl),
        })
        .collect();

    let params: Vec<SqliteValue> = args.iter().map(bind_value).collect();
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut data: Vec<Vec<Value>> = Vec::new();
    while let Some(row) = rows.next()? {
        let mut out = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter_mut().enumerate() {
            let value = row.get_ref(index)?;
            if column.ty == ColumnType::Unknown {
                // No declared type (expression columns): infer from the
                // first value that carries a runtime tag.
                if let Some(inferred) = column_type_from_value(&value) {
                    column.ty = inferred;
                }
            }
            out.push(portable_value(&value));
        }
        data.push(out);
    }

    Ok(SqlResult {
        statement: sql.to_string(),
        columns,
        row_count: data.len(),
        rows: data,
    })
}

/// Dump the live instance to a byte buffer via a scratch file.
fn serialize_database(conn: &Connection) -> Result<Vec<u8>, EngineError> {
    let scratch = tempfile::NamedTempFile::new()?;
    {
        let mut dst = Connection::open(scratch.path())?;
        let backup = Backup::new(conn, &mut dst)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
    }
    let data = std::fs::read(scratch.path())?;
    if data.is_empty() {
        return Err(EngineError::EmptyDump);
    }
    Ok(data)
}

/// Materialize a fresh in-memory instance from a serialized image.
fn load_database(data: &[u8]) -> Result<Connection, EngineError> {
    let scratch = tempfile::NamedTempFile::new()?;
    std::fs::write(scratch.path(), data)?;
    let src = Connection::open(scratch.path())?;
    let mut db = Connection::open_in_memory()?;
    {
        let backup = Backup::new(&src, &mut db)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
    }
    Ok(db)
}

/// Map a declared column type to the portable classification.
///
/// Substring matching in SQLite affinity order, with the date/time names
/// checked longest-first so `DATETIME`/`TIMESTAMP` do not fall into the
/// shorter buckets.
fn column_type_from_decl(decl: &str) -> ColumnType {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("INT") {
        ColumnType::Number
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        ColumnType::String
    } else if decl.contains("BLOB") {
        ColumnType::Unknown
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        ColumnType::Number
    } else if decl.contains("BOOL") {
        ColumnType::Boolean
    } else if decl.contains("DATETIME") || decl.contains("TIMESTAMP") {
        ColumnType::Datetime
    } else if decl.contains("DATE") {
        ColumnType::Date
    } else if decl.contains("TIME") {
        ColumnType::Time
    } else {
        ColumnType::Unknown
    }
}

/// Infer a column type from a runtime value tag, if it carries one.
fn column_type_from_value(value: &ValueRef<'_>) -> Option<ColumnType> {
    match value {
        ValueRef::Integer(_) | ValueRef::Real(_) => Some(ColumnType::Number),
        ValueRef::Text(_) => Some(ColumnType::String),
        ValueRef::Blob(_) | ValueRef::Null => None,
    }
}

/// Convert a stored value into the portable row representation.
///
/// 64-bit integers are widened to `f64`; binary payloads are not surfaced
/// to callers and read back as null.
fn portable_value(value: &ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::Number(*i as f64),
        ValueRef::Real(f) => Value::Number(*f),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
    }
}

/// Convert a positional argument into a SQLite binding.
///
/// Integral numbers bind as INTEGER so they remain valid in positions that
/// require integers (`LIMIT`/`OFFSET` expressions).
fn bind_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Number(n) if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 => {
            SqliteValue::Integer(*n as i64)
        }
        Value::Number(n) => SqliteValue::Real(*n),
        Value::Text(s) => SqliteValue::Text(s.clone()),
    }
}
