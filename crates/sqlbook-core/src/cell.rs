//! Notebook cell model.
//!
//! A cell is a closed sum type: SQL cells carry a query (and optionally its
//! last results), markdown cells carry text. The persistence key [`CellId`]
//! lives outside the serialized payload: the stored `data` column holds the
//! cell body only, and the id is reattached by the store on read.

use serde::{Deserialize, Serialize};

use crate::sql::SqlResult;

/// Unique identifier for a cell within a notebook.
///
/// Assigned once at creation (uuid v4) and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A notebook cell.
///
/// The serialized form is internally tagged (`"type": "sql"` /
/// `"type": "markdown"`) so stored payloads are self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cell {
    /// A SQL query cell, optionally carrying the results of its last run.
    Sql {
        /// The query text.
        sql: String,
        /// Results from the most recent execution, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Vec<SqlResult>>,
        /// Whether the cell is locked against edits.
        #[serde(default)]
        readonly: bool,
    },

    /// A markdown text cell.
    Markdown {
        /// The markdown source.
        markdown: String,
        /// Whether the cell is locked against edits.
        #[serde(default)]
        readonly: bool,
    },
}

impl Cell {
    /// Convenience constructor for a SQL cell with no results.
    pub fn sql(sql: impl Into<String>) -> Self {
        Self::Sql {
            sql: sql.into(),
            results: None,
            readonly: false,
        }
    }

    /// Convenience constructor for a markdown cell.
    pub fn markdown(markdown: impl Into<String>) -> Self {
        Self::Markdown {
            markdown: markdown.into(),
            readonly: false,
        }
    }

    /// Whether the cell is locked against edits.
    pub fn readonly(&self) -> bool {
        match self {
            Self::Sql { readonly, .. } | Self::Markdown { readonly, .. } => *readonly,
        }
    }
}
