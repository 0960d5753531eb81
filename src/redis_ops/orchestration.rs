use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    config::DumpPlan,
    dump::{DumpError, DumpSink},
    progress::{ProgressEvent, ProgressSender},
    redis_ops::{
        connection::{connect_redis, discover_databases, list_keys},
        protocol::Serializer,
        worker::{collect_worker_results, create_worker_contexts, spawn_workers, KeyBatch},
    },
};

async fn report_progress(progress: &ProgressSender, db: u8, dumped: u64) {
    if progress.send(ProgressEvent { db, dumped }).await.is_err() {
        debug!(db, dumped, "progress receiver is gone");
    }
}

/// Single writer for one database: serializes every batch the workers hand
/// over and reports the running total, so counts only ever grow.
async fn write_batches(
    batches: &mut mpsc::Receiver<KeyBatch>,
    db: u8,
    sink: &mut DumpSink,
    serializer: Serializer,
    progress: &ProgressSender,
) -> Result<u64, DumpError> {
    let mut dumped = 0u64;
    while let Some(batch) = batches.recv().await {
        for command in &batch.commands {
            sink.emit(&serializer(command))?;
        }
        dumped += batch.keys as u64;
        report_progress(progress, db, dumped).await;
    }
    Ok(dumped)
}

/// Dump `keys` of `db` with parallel workers.
pub(crate) async fn dump_keys(
    keys: Vec<Vec<u8>>,
    db: u8,
    plan: &DumpPlan,
    sink: &mut DumpSink,
    serializer: Serializer,
    progress: &ProgressSender,
) -> Result<u64, DumpError> {
    let (tx, mut rx) = mpsc::channel(plan.workers.max(1) * 2);
    let contexts = create_worker_contexts(keys, db, Arc::new(plan.clone()), tx);
    debug!(db, workers = contexts.len(), "starting workers");
    let workers = spawn_workers(contexts);

    let written = write_batches(&mut rx, db, sink, serializer, progress).await;
    // Unblocks workers still sending if the writer bailed out early.
    drop(rx);
    let workers_result = collect_worker_results(workers).await;

    let dumped = written?;
    workers_result?;
    Ok(dumped)
}

pub(crate) async fn dump_database(
    plan: &DumpPlan,
    db: u8,
    sink: &mut DumpSink,
    serializer: Serializer,
    progress: &ProgressSender,
) -> Result<(), DumpError> {
    report_progress(progress, db, 0).await;

    let mut connection = connect_redis(plan, db).await?;
    let keys = list_keys(&mut connection, &plan.filter, plan.use_keys_command).await?;
    info!(db, keys = keys.len(), filter = %plan.filter, "dumping database");

    sink.emit(&serializer(&[b"SELECT".to_vec(), db.to_string().into_bytes()]))?;
    let dumped = if keys.is_empty() {
        0
    } else {
        dump_keys(keys, db, plan, sink, serializer, progress).await?
    };
    sink.flush()?;

    info!(db, dumped, "database dumped");
    Ok(())
}

/// Dump every non-empty database of the server, lowest number first.
pub(crate) async fn dump_all_databases(
    plan: &DumpPlan,
    sink: &mut DumpSink,
    serializer: Serializer,
    progress: &ProgressSender,
) -> Result<(), DumpError> {
    let mut connection = connect_redis(plan, 0).await?;
    let databases = discover_databases(&mut connection).await?;
    if databases.is_empty() {
        info!(host = %plan.host, port = plan.port, "server has no keys");
        return Ok(());
    }

    for db in databases {
        dump_database(plan, db, sink, serializer, progress).await?;
    }
    Ok(())
}
