//! Messages crossing the worker boundary.
//!
//! Every request carries a correlation id assigned by the proxy; the worker
//! echoes it on the matching response. Messages stay plain Rust values; the
//! boundary is a thread, not a wire, so no encoding layer is involved.

use sqlbook_core::{SqlResult, Value};

/// Request sent from the proxy into the worker.
#[derive(Debug)]
pub struct Request {
    /// Correlation id, strictly increasing per proxy.
    pub id: u64,
    /// The operation to perform.
    pub op: RequestOp,
}

/// Operations the worker understands.
#[derive(Debug)]
pub enum RequestOp {
    /// Open a fresh in-memory database instance.
    ///
    /// Must complete before any other operation; re-invocation replaces the
    /// live instance.
    Open,

    /// Prepare and run one statement with positional arguments.
    Exec {
        /// Statement text.
        sql: String,
        /// Positional arguments bound in order.
        args: Vec<Value>,
    },

    /// Dump the live instance to a byte buffer.
    Serialize,

    /// Replace the live instance with one materialized from the given image.
    Load {
        /// Serialized database image.
        data: Vec<u8>,
    },
}

/// Response sent from the worker back to the proxy.
#[derive(Debug)]
pub struct Response {
    /// Correlation id echoed from the request.
    pub id: u64,
    /// The outcome payload.
    pub op: ResponseOp,
}

/// Response payloads, one per request kind plus the error envelope.
#[derive(Debug)]
pub enum ResponseOp {
    /// The database was opened.
    Open,

    /// Statement results, one `SqlResult` per executed statement.
    Exec {
        /// Result sets in execution order.
        results: Vec<SqlResult>,
    },

    /// Serialized database image.
    Serialize {
        /// The dumped bytes.
        data: Vec<u8>,
    },

    /// The image was loaded.
    Load,

    /// The request failed; the original fault is reduced to its message.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl RequestOp {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Exec { .. } => "exec",
            Self::Serialize => "serialize",
            Self::Load { .. } => "load",
        }
    }
}

impl ResponseOp {
    /// Short kind label used in protocol mismatch errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Exec { .. } => "exec",
            Self::Serialize { .. } => "serialize",
            Self::Load => "load",
            Self::Error { .. } => "error",
        }
    }
}
