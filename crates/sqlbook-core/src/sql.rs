//! Typed tabular results and the executor contract.
//!
//! Executors take a SQL statement plus positional arguments and return typed
//! result sets. The real backend lives in `sqlbook-engine`; [`StaticExecutor`]
//! is a canned stand-in for rendering development and trait-level tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single scalar value in a result row or a positional argument.
///
/// Serialized untagged, as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Text value.
    Text(String),
    /// Numeric value. 64-bit integers are coerced into this representation.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// SQL NULL. Binary payloads are also surfaced as null.
    Null,
}

/// Portable column type classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
    Time,
    Datetime,
    /// Declared type missing or unmapped (includes binary columns).
    #[default]
    Unknown,
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlColumn {
    /// Column name as reported by the statement.
    pub name: String,
    /// Portable column type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// The result of executing one SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResult {
    /// The statement this result belongs to.
    pub statement: String,
    /// Column metadata, in select order.
    pub columns: Vec<SqlColumn>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Row data, one `Value` per column.
    pub rows: Vec<Vec<Value>>,
}

/// A SQL backend: runs statements, optionally dumps and restores the whole
/// database image.
///
/// `save` and `load` have default implementations that fail with
/// [`Error::Unsupported`]; backends with bulk persistence override them.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one statement with positional arguments.
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<Vec<SqlResult>>;

    /// Dump the backing database to a byte buffer.
    async fn save(&self) -> Result<Vec<u8>> {
        Err(Error::Unsupported("save"))
    }

    /// Replace the backing database with the given image.
    async fn load(&self, _data: Vec<u8>) -> Result<()> {
        Err(Error::Unsupported("load"))
    }
}

/// Canned executor returning a fixed two-row result for any statement.
///
/// Lets rendering code and store-independent tests run without a live engine.
#[derive(Debug, Default)]
pub struct StaticExecutor;

#[async_trait]
impl SqlExecutor for StaticExecutor {
    async fn execute(&self, sql: &str, _args: Vec<Value>) -> Result<Vec<SqlResult>> {
        Ok(vec![SqlResult {
            statement: sql.to_string(),
            columns: vec![
                SqlColumn {
                    name: "A".to_string(),
                    ty: ColumnType::String,
                },
                SqlColumn {
                    name: "B".to_string(),
                    ty: ColumnType::String,
                },
            ],
            row_count: 2,
            rows: vec![
                vec![
                    Value::Text("a".to_string()),
                    Value::Text("b".to_string()),
                ],
                vec![Value::Text("c".to_string()), Value::Null],
            ],
        }])
    }
}
