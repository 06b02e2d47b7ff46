#![doc = include_str!("../README.md")]

mod command;
mod config;
mod telemetry;

use clap::Parser;
use command::{Schema, run};
use config::{Backend, CliArgs, CliConfig};
use rollseq::{
    LocalCalendar, MemorySequenceStore, PgSequenceStore, SequenceStore, SqliteSequenceStore,
    SystemCalendar,
};
use telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;
    #[cfg(feature = "tracing")]
    tracing::debug!("Running with config: {:#?}", config);

    let lock_timeout = config.allocator.lock_timeout();
    match &config.backend {
        Backend::Memory => {
            #[cfg(feature = "tracing")]
            tracing::warn!("memory: store selected, counters are discarded on exit");
            dispatch(&MemorySequenceStore::with_lock_timeout(lock_timeout), &config).await
        }
        Backend::Sqlite(url) => {
            let store =
                SqliteSequenceStore::connect_with(url, lock_timeout, config.max_connections).await?;
            let res = dispatch(&store, &config).await;
            store.pool().close().await;
            res
        }
        Backend::Postgres(url) => {
            let store =
                PgSequenceStore::connect_with(url, lock_timeout, config.max_connections).await?;
            let res = dispatch(&store, &config).await;
            store.pool().close().await;
            res
        }
    }
}

async fn dispatch<S>(store: &S, config: &CliConfig) -> anyhow::Result<()>
where
    S: SequenceStore + Schema,
{
    let mut out = std::io::stdout().lock();
    if config.local_time {
        run(store, &LocalCalendar, config, &mut out).await
    } else {
        run(store, &SystemCalendar, config, &mut out).await
    }
}
