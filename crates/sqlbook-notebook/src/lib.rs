//! Notebook store for SQLBook.
//!
//! Cells live as rows in a `sqlnb_cell` table inside the backing SQL
//! executor, ordered by a fractional `seq` key so any cell can be moved
//! without renumbering the rest. Mutations fan out to registered listeners.

pub mod listeners;
pub mod store;

pub use listeners::{CellChange, ListenerId, ListenerSet};
pub use store::SqlNotebook;
