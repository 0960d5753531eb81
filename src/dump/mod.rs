use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use futures::FutureExt;
use tracing::{error, info};

use crate::config::{DumpPlan, DumpTarget};
use crate::progress::{ProgressSender, ProgressSession};
use crate::redis_ops::protocol::Serializer;

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("failed to connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to read TLS material {}: {source}", .path.display())]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("-cert and -key must be given together")]
    IncompleteClientCertificate,

    #[error("failed to write dump output: {0}")]
    Io(#[from] io::Error),

    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<DumpError>,
    },

    #[error("worker task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Destination of serialized commands. Behaves like a line logger: a line
/// break is added after any command that does not already end with one.
pub struct DumpSink {
    out: Box<dyn Write + Send>,
}

impl DumpSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(BufWriter::new(io::stdout()))
    }

    pub fn emit(&mut self, command: &[u8]) -> io::Result<()> {
        self.out.write_all(command)?;
        if !command.ends_with(b"\n") {
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// The component that actually reads the data. Implementations report
/// progress through the lent sender and must not keep it past their return.
pub trait DumpEngine {
    /// Dump every non-empty database of the server.
    fn dump_server(
        &self,
        plan: &DumpPlan,
        sink: &mut DumpSink,
        serializer: Serializer,
        progress: &ProgressSender,
    ) -> impl Future<Output = Result<(), DumpError>> + Send;

    /// Dump only database `db`.
    fn dump_db(
        &self,
        plan: &DumpPlan,
        db: u8,
        sink: &mut DumpSink,
        serializer: Serializer,
        progress: &ProgressSender,
    ) -> impl Future<Output = Result<(), DumpError>> + Send;
}

/// Run the engine once in the mode the plan asks for. Errors are returned
/// untouched and nothing is retried.
pub async fn dispatch<E: DumpEngine>(
    engine: &E,
    plan: &DumpPlan,
    sink: &mut DumpSink,
    progress: &ProgressSender,
) -> Result<(), DumpError> {
    let serializer = plan.serializer();
    match plan.target {
        DumpTarget::AllDatabases => engine.dump_server(plan, sink, serializer, progress).await,
        DumpTarget::SingleDatabase(db) => {
            engine.dump_db(plan, db, sink, serializer, progress).await
        }
    }
}

/// Dispatch with live progress on `status`. The progress session is shut
/// down whatever the engine did, before its result is handed back; an engine
/// panic is resumed only after the status line has been finished.
pub async fn run_dump<E, W>(
    engine: &E,
    plan: &DumpPlan,
    sink: &mut DumpSink,
    status: W,
) -> Result<(), DumpError>
where
    E: DumpEngine,
    W: Write + Send + 'static,
{
    info!(host = %plan.host, port = plan.port, target = ?plan.target, "starting dump");
    let session = ProgressSession::start(status, plan.quiet);

    let outcome = AssertUnwindSafe(dispatch(engine, plan, sink, session.sender()))
        .catch_unwind()
        .await;
    let flushed = sink.flush();

    session.shutdown().await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(payload) => {
            error!("dump engine panicked");
            panic::resume_unwind(payload)
        }
    };
    outcome?;
    flushed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use crate::testing::{plan, SharedBuffer};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Server,
        Db(u8),
    }

    #[derive(Default)]
    struct ScriptedEngine {
        events: Vec<ProgressEvent>,
        fail: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedEngine {
        fn emitting(events: &[(u8, u64)]) -> Self {
            Self {
                events: events
                    .iter()
                    .map(|&(db, dumped)| ProgressEvent { db, dumped })
                    .collect(),
                ..Self::default()
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn play(
            &self,
            call: Call,
            sink: &mut DumpSink,
            serializer: Serializer,
            progress: &ProgressSender,
        ) -> Result<(), DumpError> {
            self.calls.lock().unwrap().push(call);
            for event in &self.events {
                progress.send(*event).await.unwrap();
                sink.emit(&serializer(&[b"PING".to_vec()]))?;
            }
            if self.fail {
                return Err(DumpError::Io(io::Error::other("connection reset")));
            }
            Ok(())
        }
    }

    impl DumpEngine for ScriptedEngine {
        async fn dump_server(
            &self,
            _plan: &DumpPlan,
            sink: &mut DumpSink,
            serializer: Serializer,
            progress: &ProgressSender,
        ) -> Result<(), DumpError> {
            self.play(Call::Server, sink, serializer, progress).await
        }

        async fn dump_db(
            &self,
            _plan: &DumpPlan,
            db: u8,
            sink: &mut DumpSink,
            serializer: Serializer,
            progress: &ProgressSender,
        ) -> Result<(), DumpError> {
            self.play(Call::Db(db), sink, serializer, progress).await
        }
    }

    #[tokio::test]
    async fn test_all_databases_renders_progress_and_trailing_newline() {
        let engine = ScriptedEngine::emitting(&[(0, 5), (1, 1), (0, 9)]);
        let plan = plan(DumpTarget::AllDatabases);
        let status = SharedBuffer::default();
        let mut sink = DumpSink::new(SharedBuffer::default());

        run_dump(&engine, &plan, &mut sink, status.clone())
            .await
            .unwrap();

        assert_eq!(engine.calls(), vec![Call::Server]);
        assert_eq!(
            status.contents(),
            "\rDatabase 0: 5 keys dumped\n\rDatabase 1: 1 keys dumped\n\rDatabase 0: 9 keys dumped\n"
        );
    }

    #[tokio::test]
    async fn test_single_database_zero_is_dispatched_to_dump_db() {
        let engine = ScriptedEngine::default();
        let plan = plan(DumpTarget::SingleDatabase(0));
        let mut sink = DumpSink::new(SharedBuffer::default());

        run_dump(&engine, &plan, &mut sink, SharedBuffer::default())
            .await
            .unwrap();

        assert_eq!(engine.calls(), vec![Call::Db(0)]);
    }

    #[tokio::test]
    async fn test_quiet_mode_drains_without_output() {
        let engine = ScriptedEngine::emitting(&[(0, 5), (1, 1), (0, 9)]);
        let mut plan = plan(DumpTarget::AllDatabases);
        plan.quiet = true;
        let status = SharedBuffer::default();
        let out = SharedBuffer::default();
        let mut sink = DumpSink::new(out.clone());

        run_dump(&engine, &plan, &mut sink, status.clone())
            .await
            .unwrap();

        assert!(status.contents().is_empty());
        assert_eq!(out.contents().matches("PING").count(), 3);
    }

    #[tokio::test]
    async fn test_engine_error_still_drains_and_finishes_line() {
        let engine = ScriptedEngine::emitting(&[(3, 2)]).failing();
        let plan = plan(DumpTarget::SingleDatabase(3));
        let status = SharedBuffer::default();
        let mut sink = DumpSink::new(SharedBuffer::default());

        let err = run_dump(&engine, &plan, &mut sink, status.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Io(_)));
        assert_eq!(status.contents(), "\rDatabase 3: 2 keys dumped\n");
    }

    struct PanickingEngine;

    impl PanickingEngine {
        async fn crash(&self, progress: &ProgressSender) -> Result<(), DumpError> {
            progress.send(ProgressEvent { db: 0, dumped: 4 }).await.unwrap();
            panic!("engine crashed mid-dump");
        }
    }

    impl DumpEngine for PanickingEngine {
        async fn dump_server(
            &self,
            _plan: &DumpPlan,
            _sink: &mut DumpSink,
            _serializer: Serializer,
            progress: &ProgressSender,
        ) -> Result<(), DumpError> {
            self.crash(progress).await
        }

        async fn dump_db(
            &self,
            _plan: &DumpPlan,
            _db: u8,
            _sink: &mut DumpSink,
            _serializer: Serializer,
            progress: &ProgressSender,
        ) -> Result<(), DumpError> {
            self.crash(progress).await
        }
    }

    #[tokio::test]
    async fn test_engine_panic_still_finishes_line_and_propagates() {
        let plan = plan(DumpTarget::AllDatabases);
        let status = SharedBuffer::default();
        let mut sink = DumpSink::new(SharedBuffer::default());

        let dump = run_dump(&PanickingEngine, &plan, &mut sink, status.clone());
        let result = AssertUnwindSafe(dump).catch_unwind().await;

        assert!(result.is_err());
        assert_eq!(status.contents(), "\rDatabase 0: 4 keys dumped\n");
    }

    #[tokio::test]
    async fn test_engine_without_work_leaves_only_line_break() {
        let engine = ScriptedEngine::default();
        let plan = plan(DumpTarget::AllDatabases);
        let status = SharedBuffer::default();
        let mut sink = DumpSink::new(SharedBuffer::default());

        run_dump(&engine, &plan, &mut sink, status.clone())
            .await
            .unwrap();

        assert_eq!(status.contents(), "\n");
    }

    #[tokio::test]
    async fn test_dispatch_uses_selected_serializer() {
        let engine = ScriptedEngine::emitting(&[(0, 1)]);
        let mut plan = plan(DumpTarget::AllDatabases);
        let out = SharedBuffer::default();
        let mut sink = DumpSink::new(out.clone());
        let session = ProgressSession::start(Vec::new(), true);

        dispatch(&engine, &plan, &mut sink, session.sender())
            .await
            .unwrap();
        plan.output = crate::config::OutputFormat::Commands;
        dispatch(&engine, &plan, &mut sink, session.sender())
            .await
            .unwrap();
        session.shutdown().await;
        sink.flush().unwrap();

        assert_eq!(out.contents(), "*1\r\n$4\r\nPING\r\nPING\n");
    }

    #[test]
    fn test_sink_adds_missing_line_breaks_only() {
        let out = SharedBuffer::default();
        let mut sink = DumpSink::new(out.clone());
        sink.emit(b"SET a 1").unwrap();
        sink.emit(b"*1\r\n$4\r\nPING\r\n").unwrap();
        sink.flush().unwrap();
        assert_eq!(out.contents(), "SET a 1\n*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_worker_error_message_includes_cause() {
        let err = DumpError::Worker {
            worker: 3,
            source: Box::new(DumpError::IncompleteClientCertificate),
        };
        assert_eq!(
            err.to_string(),
            "worker 3 failed: -cert and -key must be given together"
        );
    }
}
