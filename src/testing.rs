use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::config::{DumpPlan, DumpTarget, OutputFormat};

/// Cloneable in-memory writer whose contents stay readable after the writer
/// has been moved into a task or a sink.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn plan(target: DumpTarget) -> DumpPlan {
    DumpPlan {
        target,
        host: "127.0.0.1".to_string(),
        port: 6379,
        credential: None,
        tls: None,
        filter: "*".to_string(),
        workers: 10,
        preserve_ttl: true,
        batch_size: 1000,
        use_keys_command: false,
        output: OutputFormat::Resp,
        quiet: false,
    }
}
