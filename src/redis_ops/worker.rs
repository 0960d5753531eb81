use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::DumpPlan;
use crate::dump::DumpError;

use super::batch::{dump_key_batch, KeyDumpOptions};
use super::commands::Command;
use super::connection::connect_redis;

/// Keys fetched in one pipelined round trip.
const PIPELINE_BATCH_SIZE: usize = 50;

/// Commands for a run of keys, handed from a worker to the writer.
#[derive(Debug)]
pub(crate) struct KeyBatch {
    pub(crate) keys: usize,
    pub(crate) commands: Vec<Command>,
}

pub(crate) struct WorkerContext {
    pub(crate) worker_id: usize,
    pub(crate) db: u8,
    pub(crate) keys: Vec<Vec<u8>>,
    pub(crate) plan: Arc<DumpPlan>,
    pub(crate) batches: mpsc::Sender<KeyBatch>,
}

async fn process_worker_keys(ctx: WorkerContext) -> Result<(), DumpError> {
    let mut connection = connect_redis(&ctx.plan, ctx.db).await?;
    let options = KeyDumpOptions::from(ctx.plan.as_ref());

    for keys in ctx.keys.chunks(PIPELINE_BATCH_SIZE) {
        let commands = dump_key_batch(&mut connection, keys, &options).await?;
        let batch = KeyBatch {
            keys: keys.len(),
            commands,
        };
        if ctx.batches.send(batch).await.is_err() {
            debug!(
                worker = ctx.worker_id,
                db = ctx.db,
                "writer stopped, abandoning remaining keys"
            );
            return Ok(());
        }
    }

    Ok(())
}

/// Spread `keys` over at most `plan.workers` contexts. Every context gets its
/// own handle on `batches`; the writer sees the channel close once all of
/// them are done.
pub(crate) fn create_worker_contexts(
    keys: Vec<Vec<u8>>,
    db: u8,
    plan: Arc<DumpPlan>,
    batches: mpsc::Sender<KeyBatch>,
) -> Vec<WorkerContext> {
    if keys.is_empty() {
        return Vec::new();
    }
    let chunk_size = keys.len().div_ceil(plan.workers.max(1));
    keys.chunks(chunk_size)
        .enumerate()
        .map(|(worker_id, chunk)| WorkerContext {
            worker_id,
            db,
            keys: chunk.to_vec(),
            plan: Arc::clone(&plan),
            batches: batches.clone(),
        })
        .collect()
}

pub(crate) fn spawn_workers(
    contexts: Vec<WorkerContext>,
) -> Vec<JoinHandle<Result<(), DumpError>>> {
    contexts
        .into_iter()
        .map(|ctx| {
            let worker = ctx.worker_id;
            tokio::spawn(async move {
                process_worker_keys(ctx)
                    .await
                    .map_err(|source| DumpError::Worker {
                        worker: worker + 1,
                        source: Box::new(source),
                    })
            })
        })
        .collect()
}

/// Wait for every worker and return the first failure, logging the rest.
pub(crate) async fn collect_worker_results(
    workers: Vec<JoinHandle<Result<(), DumpError>>>,
) -> Result<(), DumpError> {
    let results = futures::future::join_all(workers).await;
    let mut first_error = None;

    for result in results {
        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => DumpError::Join(e),
        };
        if first_error.is_none() {
            first_error = Some(failure);
        } else {
            error!("{failure}");
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
