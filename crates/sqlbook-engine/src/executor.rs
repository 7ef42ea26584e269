//! Caller-side proxy: correlated calls into the worker thread.
//!
//! [`WorkerExecutor`] presents the plain `SqlExecutor` interface while the
//! actual execution happens on the worker thread. Each call allocates a
//! strictly increasing correlation id, registers a one-shot completion
//! handle, sends the request, and awaits the matching response, all inside
//! one mutex-guarded critical section, so at most one cross-boundary call is
//! ever outstanding. Inbound responses are dispatched strictly by looking up
//! the pending handle for their correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, OnceCell, oneshot};

use sqlbook_core::{Error, Result, SqlExecutor, SqlResult, Value};

use crate::protocol::{Request, RequestOp, Response, ResponseOp};
use crate::worker::{self, EngineError};

/// Outstanding calls, keyed by correlation id.
#[derive(Default)]
struct PendingCalls {
    calls: std::sync::Mutex<HashMap<u64, oneshot::Sender<ResponseOp>>>,
}

impl PendingCalls {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<ResponseOp>>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a completion handle under a freshly allocated id.
    fn register(&self, id: u64, handle: oneshot::Sender<ResponseOp>) {
        self.lock().insert(id, handle);
    }

    /// Drop a registration whose request never made it out.
    fn discard(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Complete the pending call matching the response's correlation id.
    ///
    /// A response with no pending match indicates desynchronization; it is
    /// rejected without touching any other pending call.
    fn complete(&self, response: Response) -> Result<()> {
        let Response { id, op } = response;
        let Some(handle) = self.lock().remove(&id) else {
            return Err(Error::Protocol(format!(
                "response for unknown correlation id {id}"
            )));
        };
        if handle.send(op).is_err() {
            tracing::debug!(id, "pending call abandoned before completion");
        }
        Ok(())
    }
}

/// Executor backed by the worker-thread engine.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Dropping every
/// handle closes the request channel, which shuts the worker down.
pub struct WorkerExecutor {
    /// Request channel into the worker thread.
    requests: Sender<Request>,
    /// Outstanding calls awaiting their response.
    pending: Arc<PendingCalls>,
    /// Single-flight gate; the guarded value is the next correlation id.
    gate: Mutex<u64>,
    /// One-time open step awaited by every public operation.
    opened: OnceCell<()>,
}

impl WorkerExecutor {
    /// Spawn the engine worker thread and connect a proxy to it.
    ///
    /// Must be called from within a Tokio runtime: the response dispatcher
    /// runs as a spawned task.
    pub fn spawn() -> std::result::Result<Self, EngineError> {
        Self::connect(worker::run)
    }

    /// Wire a proxy to an arbitrary worker loop (the real engine in
    /// production, a scripted one in tests).
    fn connect<W>(worker: W) -> std::result::Result<Self, EngineError>
    where
        W: FnOnce(Receiver<Request>, UnboundedSender<Response>) + Send + 'static,
    {
        let (req_tx, req_rx) = std::sync::mpsc::channel();
        let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("sqlbook-engine".to_string())
            .spawn(move || worker(req_rx, resp_tx))?;

        let pending = Arc::new(PendingCalls::default());
        let dispatcher = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(response) = resp_rx.recv().await {
                if let Err(err) = dispatcher.complete(response) {
                    tracing::error!("engine response dispatch failed: {err}");
                }
            }
        });

        Ok(Self {
            requests: req_tx,
            pending,
            gate: Mutex::new(0),
            opened: OnceCell::new(),
        })
    }

    /// Issue one correlated call and await its response.
    ///
    /// The gate is held across "allocate id, register handle, send, await",
    /// serializing concurrent callers in lock-acquisition order. An error
    /// response fails the call with the marshaled message text.
    async fn call(&self, op: RequestOp) -> Result<ResponseOp> {
        let mut next_id = self.gate.lock().await;
        let id = *next_id;
        *next_id += 1;
        let (handle, response) = oneshot::channel();
        self.pending.register(id, handle);
        tracing::debug!(id, kind = op.kind(), "engine call");
        if self.requests.send(Request { id, op }).is_err() {
            self.pending.discard(id);
            return Err(Error::Protocol("engine worker is gone".to_string()));
        }
        let op = response
            .await
            .map_err(|_| Error::Protocol("engine worker dropped the call".to_string()))?;
        match op {
            ResponseOp::Error { message } => Err(Error::Execution(message)),
            op => Ok(op),
        }
    }

    /// Await the one-time open step that every operation depends on.
    async fn ensure_open(&self) -> Result<()> {
        self.opened
            .get_or_try_init(|| async {
                match self.call(RequestOp::Open).await? {
                    ResponseOp::Open => Ok(()),
                    other => Err(mismatch("open", &other)),
                }
            })
            .await
            .map(|_| ())
    }
}

/// A response whose kind does not match the issued request is fatal.
fn mismatch(expected: &'static str, got: &ResponseOp) -> Error {
    Error::Protocol(format!(
        "expected {expected} response, got {}",
        got.kind()
    ))
}

#[async_trait]
impl SqlExecutor for WorkerExecutor {
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<Vec<SqlResult>> {
        self.ensure_open().await?;
        match self
            .call(RequestOp::Exec {
                sql: sql.to_string(),
                args,
            })
            .await?
        {
            ResponseOp::Exec { results } => Ok(results),
            other => Err(mismatch("exec", &other)),
        }
    }

    async fn save(&self) -> Result<Vec<u8>> {
        self.ensure_open().await?;
        match self.call(RequestOp::Serialize).await? {
            ResponseOp::Serialize { data } => Ok(data),
            other => Err(mismatch("serialize", &other)),
        }
    }

    async fn load(&self, data: Vec<u8>) -> Result<()> {
        self.ensure_open().await?;
        match self.call(RequestOp::Load { data }).await? {
            ResponseOp::Load => Ok(()),
            other => Err(mismatch("load", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbook_core::ColumnType;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_calls_receive_their_own_results() {
        let executor = Arc::new(WorkerExecutor::spawn().unwrap());

        let mut tasks = Vec::new();
        for caller in 0..8 {
            let executor = Arc::clone(&executor);
            tasks.push(tokio::spawn(async move {
                let sentinel = format!("caller-{caller}");
                let results = executor
                    .execute(&format!("SELECT '{sentinel}'"), vec![])
                    .await
                    .unwrap();
                (sentinel, results)
            }));
        }

        for task in tasks {
            let (sentinel, results) = task.await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].rows, vec![vec![Value::Text(sentinel)]]);
        }
    }

    #[tokio::test]
    async fn test_unknown_correlation_id_is_a_protocol_fault() {
        let pending = PendingCalls::default();
        let (handle, response) = oneshot::channel();
        pending.register(7, handle);

        let err = pending
            .complete(Response {
                id: 99,
                op: ResponseOp::Load,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // The unrelated pending call is untouched and still completes.
        pending
            .complete(Response {
                id: 7,
                op: ResponseOp::Open,
            })
            .unwrap();
        assert!(matches!(response.await.unwrap(), ResponseOp::Open));
    }

    #[tokio::test]
    async fn test_response_kind_mismatch_is_fatal() {
        // A rogue worker that acknowledges every request as a load.
        let executor = WorkerExecutor::connect(|requests, responses| {
            while let Ok(request) = requests.recv() {
                if responses
                    .send(Response {
                        id: request.id,
                        op: ResponseOp::Load,
                    })
                    .is_err()
                {
                    break;
                }
            }
        })
        .unwrap();

        let err = executor.execute("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_engine_errors_arrive_as_marshaled_text() {
        let executor = WorkerExecutor::spawn().unwrap();
        let err = executor.execute("NOT SQL", vec![]).await.unwrap_err();
        match err {
            Error::Execution(message) => assert!(!message.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_execute_reports_declared_types() {
        let executor = WorkerExecutor::spawn().unwrap();
        executor
            .execute("CREATE TABLE t (n INTEGER, s TEXT)", vec![])
            .await
            .unwrap();
        let results = executor.execute("SELECT n, s FROM t", vec![]).await.unwrap();
        assert_eq!(results[0].columns[0].ty, ColumnType::Number);
        assert_eq!(results[0].columns[1].ty, ColumnType::String);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_across_instances() {
        let first = WorkerExecutor::spawn().unwrap();
        first
            .execute("CREATE TABLE t (v TEXT)", vec![])
            .await
            .unwrap();
        first
            .execute(
                "INSERT INTO t VALUES (?)",
                vec![Value::Text("kept".to_string())],
            )
            .await
            .unwrap();
        let image = first.save().await.unwrap();
        assert!(!image.is_empty());

        let second = WorkerExecutor::spawn().unwrap();
        second.load(image).await.unwrap();
        let results = second.execute("SELECT v FROM t", vec![]).await.unwrap();
        assert_eq!(results[0].rows, vec![vec![Value::Text("kept".to_string())]]);
    }
}
