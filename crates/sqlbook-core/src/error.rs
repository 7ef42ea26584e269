//! Error types shared across the SQLBook workspace.

use crate::cell::CellId;
use thiserror::Error;

/// Result type for SQLBook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by notebook and executor operations.
///
/// Faults inside the engine worker are marshaled to text at the message
/// boundary and arrive here as [`Error::Execution`]; their original identity
/// is not preserved across the boundary, only the message.
#[derive(Debug, Error)]
pub enum Error {
    /// No row exists for the requested cell.
    #[error("cell not found: {0}")]
    NotFound(CellId),

    /// A backing query returned a shape other than the operation expects.
    ///
    /// Invariant check, not a recoverable condition.
    #[error("unexpected result shape: {0}")]
    Integrity(String),

    /// RPC bookkeeping violation: unmatched correlation id, response kind
    /// mismatch, or a worker that went away mid-call. Fatal to the call.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Bulk save/load requested against an executor without the capability.
    #[error("{0} is not supported by this executor")]
    Unsupported(&'static str),

    /// Engine-side failure, marshaled to text by the worker.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Cell payload could not be encoded or decoded.
    #[error("cell payload codec error: {0}")]
    Encoding(#[from] serde_json::Error),
}
