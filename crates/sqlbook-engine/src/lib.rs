//! Worker-thread SQLite engine for SQLBook.
//!
//! This crate provides:
//! - The correlated request/response protocol crossing the worker boundary
//! - The worker loop owning the live `rusqlite` connection
//! - [`WorkerExecutor`], the caller-side proxy implementing
//!   `sqlbook_core::SqlExecutor` with single-flight call serialization
//!
//! The isolated execution context is a dedicated `std::thread` with its own
//! blocking inbox; callers reach it only by message passing.

pub mod executor;
pub mod protocol;
pub mod worker;

pub use executor::WorkerExecutor;
pub use protocol::{Request, RequestOp, Response, ResponseOp};
pub use worker::EngineError;
