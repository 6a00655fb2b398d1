use std::fmt::Write as _;

use anyhow::{anyhow, Context, Result};

use crate::migration::{EntityKind, PgSink, Sink, TransactionMode};
use crate::util::db::Db;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct CountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
}

/// Fixed-width table of destination row counts; `-` for a missing table.
pub fn render_counts(counts: &[(EntityKind, Option<i64>)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<22} {:>10}", "table", "rows");
    for (kind, count) in counts {
        let shown = count.map_or_else(|| "-".to_string(), |n| n.to_string());
        let _ = writeln!(out, "{:<22} {:>10}", kind.table(), shown);
    }
    out
}

pub async fn run(cfg: CountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = cfg
        .database_url
        .or_else(env_util::db_url)
        .ok_or_else(|| anyhow!("DATABASE_URL (or NEW_DATABASE_URL) is required"))?;
    let db = Db::connect(&db_url, 1)
        .await
        .context("connecting to destination database")?;

    let mut sink = PgSink::new(db.pool, TransactionMode::PerRow);
    let mut counts = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        counts.push((kind, sink.count(kind).await?));
    }
    print!("{}", render_counts(&counts));
    Ok(())
}
