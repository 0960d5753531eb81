use anyhow::{Context, Result};

use cli::parse_cli;
use dump::{run_dump, DumpSink};
use redis_ops::RedisEngine;

mod cli;
mod config;
mod dump;
mod progress;
mod redis_ops;
#[cfg(test)]
mod testing;

/// Log level used when `RUST_LOG` is unset. Anything logged at this level
/// lands on stderr next to the live progress line.
pub(crate) const DEFAULT_LOG_FILTER: &str = "warn";

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let plan = config::resolve(parse_cli()).context("invalid configuration")?;
    let mut sink = DumpSink::stdout();

    run_dump(&RedisEngine, &plan, &mut sink, std::io::stderr())
        .await
        .context("dump failed")
}
