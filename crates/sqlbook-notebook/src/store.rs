//! The notebook store: cells as rows, ordered by a fractional key.
//!
//! Every read re-queries the backing table; the store keeps no
//! authoritative in-memory copy between calls, so there is nothing to
//! invalidate. The backing table is bootstrapped lazily on first use and the
//! bootstrap statement is safe to re-run.

use std::sync::Arc;

use tokio::sync::OnceCell;

use sqlbook_core::{Cell, CellId, Error, Result, SqlExecutor, SqlResult, Value};

use crate::listeners::{CellChange, ListenerId, ListenerSet};

/// Table bootstrap, idempotent by construction.
const INIT_SQL: &str = "\
CREATE TABLE IF NOT EXISTS sqlnb_cell (
    id     TEXT NOT NULL PRIMARY KEY,
    seq    FLOAT,
    locked BOOLEAN DEFAULT false,
    data   TEXT
);";

/// An ordered, persistent collection of notebook cells.
///
/// Cells are stored as `(id, seq, locked, data)` rows where `data` is the
/// serialized cell payload (excluding the id) and `seq` is the fractional
/// ordering key: moving a cell rewrites its own `seq` only, never the rest
/// of the table.
pub struct SqlNotebook {
    executor: Arc<dyn SqlExecutor>,
    listeners: ListenerSet,
    init: OnceCell<()>,
}

impl SqlNotebook {
    /// Create a store on top of a SQL backend.
    ///
    /// The backing table is created on first use, not here.
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            executor,
            listeners: ListenerSet::default(),
            init: OnceCell::new(),
        }
    }

    /// The backing executor.
    pub fn executor(&self) -> &Arc<dyn SqlExecutor> {
        &self.executor
    }

    /// All cell ids, ordered by ascending `seq`.
    pub async fn cell_ids(&self) -> Result<Vec<CellId>> {
        self.ensure_init().await?;
        let result = self
            .query("SELECT id FROM sqlnb_cell ORDER BY seq", vec![])
            .await?;
        result
            .rows
            .iter()
            .map(|row| match row.first() {
                Some(Value::Text(id)) => Ok(CellId::from(id.as_str())),
                _ => Err(Error::Integrity("cell id is not text".to_string())),
            })
            .collect()
    }

    /// Reconstruct one cell from its row.
    pub async fn cell(&self, id: &CellId) -> Result<Cell> {
        self.ensure_init().await?;
        let result = self
            .query(
                "SELECT data FROM sqlnb_cell WHERE id = ?",
                vec![Value::Text(id.to_string())],
            )
            .await?;
        let Some(row) = result.rows.first() else {
            return Err(Error::NotFound(id.clone()));
        };
        let Some(Value::Text(data)) = row.first() else {
            return Err(Error::Integrity("cell payload is not text".to_string()));
        };
        Ok(serde_json::from_str(data)?)
    }

    /// Insert a cell, optionally at a display rank.
    ///
    /// The new row is appended (`seq = max + 1`, or `1` on an empty table)
    /// and then, when `index` is given, immediately relocated. The two steps
    /// are separate statements: a failure in between leaves the cell
    /// appended but not repositioned. Known non-atomicity.
    pub async fn add_cell(&self, cell: &Cell, index: Option<usize>) -> Result<CellId> {
        self.ensure_init().await?;
        let id = CellId::generate();
        let data = serde_json::to_string(cell)?;
        self.executor
            .execute(
                "INSERT INTO sqlnb_cell (id, data, seq) VALUES (?, ?, \
                 (SELECT COALESCE((SELECT MAX(seq) FROM sqlnb_cell), 0) + 1))",
                vec![Value::Text(id.to_string()), Value::Text(data)],
            )
            .await?;
        if let Some(index) = index {
            self.relocate(&id, index).await?;
        }
        tracing::debug!(%id, "cell added");
        self.listeners.notify(&CellChange::Refresh);
        Ok(id)
    }

    /// Overwrite a cell's payload, leaving its position untouched.
    pub async fn update_cell(&self, id: &CellId, cell: &Cell) -> Result<()> {
        self.ensure_init().await?;
        let data = serde_json::to_string(cell)?;
        self.executor
            .execute(
                "UPDATE sqlnb_cell SET data = ? WHERE id = ?",
                vec![Value::Text(data), Value::Text(id.to_string())],
            )
            .await?;
        self.listeners.notify(&CellChange::Cell(id.clone()));
        Ok(())
    }

    /// Delete a cell's row. No tombstone remains.
    pub async fn delete_cell(&self, id: &CellId) -> Result<()> {
        self.ensure_init().await?;
        self.executor
            .execute(
                "DELETE FROM sqlnb_cell WHERE id = ?",
                vec![Value::Text(id.to_string())],
            )
            .await?;
        tracing::debug!(%id, "cell deleted");
        self.listeners.notify(&CellChange::Refresh);
        Ok(())
    }

    /// Move a cell to a 0-based display rank (clamped to the ends).
    ///
    /// Emits no listener event, unlike the other mutations. Known asymmetry:
    /// callers that need an event after a bare move must refresh explicitly.
    pub async fn move_cell(&self, id: &CellId, index: usize) -> Result<()> {
        self.ensure_init().await?;
        self.relocate(id, index).await
    }

    /// Re-run the table bootstrap and tell listeners to re-derive everything.
    ///
    /// Used after the backing engine's storage has been replaced wholesale.
    pub async fn reload(&self) -> Result<()> {
        self.ensure_init().await?;
        self.executor.execute(INIT_SQL, vec![]).await?;
        self.listeners.notify(&CellChange::Refresh);
        Ok(())
    }

    /// Replace the backing database with a serialized image.
    ///
    /// Fails with [`Error::Unsupported`] when the active executor has no
    /// bulk-load capability.
    pub async fn load(&self, data: Vec<u8>) -> Result<()> {
        self.ensure_init().await?;
        self.executor.load(data).await?;
        self.executor.execute(INIT_SQL, vec![]).await?;
        Ok(())
    }

    /// Register a mutation listener.
    pub fn add_listener(
        &self,
        callback: impl Fn(&CellChange) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    /// Remove a mutation listener. Absent ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.unsubscribe(id);
    }

    /// Run the table bootstrap at most once per store instance.
    async fn ensure_init(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.executor.execute(INIT_SQL, vec![]).await.map(|_| ())
            })
            .await
            .map(|_| ())
    }

    /// Execute a read and insist on exactly one result set.
    async fn query(&self, sql: &str, args: Vec<Value>) -> Result<SqlResult> {
        let mut results = self.executor.execute(sql, args).await?;
        if results.len() != 1 {
            return Err(Error::Integrity(format!(
                "expected one result set, got {}",
                results.len()
            )));
        }
        Ok(results.remove(0))
    }

    /// Rewrite one cell's `seq` so it lands at the given display rank.
    ///
    /// Fractional positioning: the new key is the predecessor minus one, the
    /// successor plus one, or the midpoint of the two neighbors at the
    /// target rank. The moving cell is not excluded from the neighbor
    /// window, so it may average against its own current position.
    async fn relocate(&self, id: &CellId, index: usize) -> Result<()> {
        if index == 0 {
            let first = self
                .query("SELECT seq FROM sqlnb_cell ORDER BY seq LIMIT 1", vec![])
                .await?;
            let Some(row) = first.rows.first() else {
                // Empty table: nothing to order against.
                return Ok(());
            };
            let new_seq = seq_value(row)? - 1.0;
            return self.set_seq(id, new_seq).await;
        }

        let window = self
            .query(
                "SELECT seq FROM sqlnb_cell ORDER BY seq LIMIT 2 OFFSET ?",
                vec![Value::Number((index - 1) as f64)],
            )
            .await?;
        if window.rows.len() < 2 {
            // Fewer than two rows at or after the preceding rank: the target
            // is past the end, append after the current maximum.
            let last = self
                .query(
                    "SELECT seq FROM sqlnb_cell ORDER BY seq DESC LIMIT 1",
                    vec![],
                )
                .await?;
            let Some(row) = last.rows.first() else {
                return Ok(());
            };
            let new_seq = seq_value(row)? + 1.0;
            return self.set_seq(id, new_seq).await;
        }

        let prev = seq_value(&window.rows[0])?;
        let next = seq_value(&window.rows[1])?;
        self.set_seq(id, (prev + next) / 2.0).await
    }

    async fn set_seq(&self, id: &CellId, seq: f64) -> Result<()> {
        self.executor
            .execute(
                "UPDATE sqlnb_cell SET seq = ? WHERE id = ?",
                vec![Value::Number(seq), Value::Text(id.to_string())],
            )
            .await?;
        Ok(())
    }
}

/// Extract the ordering key from a one-column `seq` row.
fn seq_value(row: &[Value]) -> Result<f64> {
    match row.first() {
        Some(Value::Number(seq)) => Ok(*seq),
        _ => Err(Error::Integrity("seq is not numeric".to_string())),
    }
}
