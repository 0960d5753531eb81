//! Redis implementation of the dump engine: key listing, per-type value
//! retrieval and the worker pool feeding a single output writer.

use crate::config::DumpPlan;
use crate::dump::{DumpEngine, DumpError, DumpSink};
use crate::progress::ProgressSender;

mod batch;
mod commands;
mod connection;
mod orchestration;
pub mod protocol;
mod worker;

use protocol::Serializer;

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisEngine;

impl DumpEngine for RedisEngine {
    async fn dump_server(
        &self,
        plan: &DumpPlan,
        sink: &mut DumpSink,
        serializer: Serializer,
        progress: &ProgressSender,
    ) -> Result<(), DumpError> {
        orchestration::dump_all_databases(plan, sink, serializer, progress).await
    }

    async fn dump_db(
        &self,
        plan: &DumpPlan,
        db: u8,
        sink: &mut DumpSink,
        serializer: Serializer,
        progress: &ProgressSender,
    ) -> Result<(), DumpError> {
        orchestration::dump_database(plan, db, sink, serializer, progress).await
    }
}
