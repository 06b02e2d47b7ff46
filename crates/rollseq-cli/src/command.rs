use std::io::Write;

use rollseq::{
    Allocator, AllocatorTokioExt, CalendarSource, MemorySequenceStore, PgSequenceStore, ScopeKey,
    SequenceStore, SqliteSequenceStore, Year2,
};

use crate::config::{CliConfig, Command};

/// Schema setup for the stores the binary can drive.
pub trait Schema {
    fn create_schema(&self) -> impl Future<Output = rollseq::Result<()>>;
}

impl Schema for MemorySequenceStore {
    async fn create_schema(&self) -> rollseq::Result<()> {
        Ok(())
    }
}

impl Schema for SqliteSequenceStore {
    async fn create_schema(&self) -> rollseq::Result<()> {
        self.migrate().await
    }
}

impl Schema for PgSequenceStore {
    async fn create_schema(&self) -> rollseq::Result<()> {
        self.migrate().await
    }
}

/// Executes `config.command` against `store`, writing results to `out`.
pub async fn run<S, C>(
    store: &S,
    calendar: &C,
    config: &CliConfig,
    out: &mut impl Write,
) -> anyhow::Result<()>
where
    S: SequenceStore + Schema,
    C: CalendarSource + Sync,
{
    match &config.command {
        Command::Migrate => {
            store.create_schema().await?;
            #[cfg(feature = "tracing")]
            tracing::info!("counter table ready");
        }
        Command::Allocate {
            dept,
            semester,
            count,
            json,
        } => {
            let allocator = Allocator::from_config(store, calendar, &config.allocator)?;
            let ids = if *count == 1 {
                vec![allocator.allocate(dept, *semester).await?]
            } else {
                allocator.allocate_batch(dept, *semester, *count).await?
            };
            #[cfg(feature = "tracing")]
            tracing::info!(count = ids.len(), "allocated");

            if *json {
                writeln!(out, "{}", serde_json::to_string(&ids)?)?;
            } else {
                for id in &ids {
                    writeln!(out, "{id}")?;
                }
            }
        }
        Command::Peek {
            dept,
            semester,
            year,
        } => {
            let year2 = year.map_or_else(|| calendar.current_year2(), Year2::from_year);
            let scope = ScopeKey::new(dept, *semester, year2)?;
            match store.peek(&scope).await? {
                Some(next) => writeln!(out, "{scope}: next {next}")?,
                None => writeln!(out, "{scope}: nothing allocated")?,
            }
        }
    }
    Ok(())
}
