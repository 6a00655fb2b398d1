use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, warn};

use super::entity::EntityKind;
use super::parser::{logical_lines, parse_line, ParsedLine};
use super::record::{Field, Record};
use crate::util::db::is_undefined_table_error;

/// Records of one kind, ascending by legacy id.
#[derive(Debug, Default, Clone)]
pub struct SourceBatch {
    pub records: Vec<Record>,
    /// Lines or rows that could not be turned into a record.
    pub rejected: usize,
}

impl SourceBatch {
    pub fn new(mut records: Vec<Record>, rejected: usize) -> Self {
        records.sort_by_key(Record::legacy_id);
        Self { records, rejected }
    }

    pub fn total(&self) -> usize {
        self.records.len() + self.rejected
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    async fn load(&self, kind: EntityKind) -> Result<SourceBatch>;
}

/// Flat export files under one directory.
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Parse the contents of one flat file.
pub fn parse_contents(kind: EntityKind, contents: &str) -> SourceBatch {
    let mut records = Vec::new();
    let mut rejected = 0usize;
    for (idx, line) in logical_lines(contents).iter().enumerate() {
        match parse_line(line) {
            ParsedLine::Skip => {}
            ParsedLine::Malformed(reason) => {
                rejected += 1;
                debug!(%kind, line = idx + 1, %reason, "skipping malformed line");
            }
            ParsedLine::Fields(fields) => match Record::from_fields(kind, &fields) {
                Ok(record) => records.push(record),
                Err(e) => {
                    rejected += 1;
                    debug!(%kind, line = idx + 1, error = %e, "skipping unusable line");
                }
            },
        }
    }
    SourceBatch::new(records, rejected)
}

#[async_trait]
impl RecordSource for FileSource {
    fn describe(&self) -> String {
        format!("files in {}", self.dir.display())
    }

    async fn load(&self, kind: EntityKind) -> Result<SourceBatch> {
        let path = self.dir.join(kind.file_name());
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(%kind, path = %path.display(), "file not found");
                return Ok(SourceBatch::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        let batch = parse_contents(kind, &contents);
        if batch.rejected > 0 {
            warn!(%kind, rejected = batch.rejected, "some lines were not usable");
        }
        info!(%kind, records = batch.records.len(), "loaded file");
        Ok(batch)
    }
}

/// Legacy Django tables read directly.
pub struct LegacyDbSource {
    pool: PgPool,
}

impl LegacyDbSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn select_sql(kind: EntityKind) -> String {
    let spec = kind.spec();
    let cols = spec
        .columns
        .iter()
        .map(|c| format!("\"{c}\"::text"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {cols} FROM {} ORDER BY \"id\"",
        spec.legacy_table
    )
}

#[async_trait]
impl RecordSource for LegacyDbSource {
    fn describe(&self) -> String {
        "legacy database".to_string()
    }

    async fn load(&self, kind: EntityKind) -> Result<SourceBatch> {
        let sql = select_sql(kind);
        let rows = match sqlx::query(&sql).persistent(false).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_undefined_table_error(&e) => {
                error!(%kind, table = kind.spec().legacy_table, "legacy table does not exist");
                return Ok(SourceBatch::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("querying {}", kind.spec().legacy_table));
            }
        };

        let width = kind.min_fields();
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = 0usize;
        for row in rows {
            let mut fields: Vec<Field> = Vec::with_capacity(width);
            for idx in 0..width {
                fields.push(row.try_get::<Option<String>, _>(idx)?);
            }
            match Record::from_fields(kind, &fields) {
                Ok(record) => records.push(record),
                Err(e) => {
                    rejected += 1;
                    warn!(%kind, error = %e, "skipping legacy row");
                }
            }
        }
        info!(%kind, records = records.len(), "loaded legacy table");
        Ok(SourceBatch::new(records, rejected))
    }
}

/// Fixed in-memory batches.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySource {
    pub batches: std::collections::HashMap<EntityKind, SourceBatch>,
}

#[cfg(test)]
impl MemorySource {
    pub fn with_lines(mut self, kind: EntityKind, contents: &str) -> Self {
        self.batches.insert(kind, parse_contents(kind, contents));
        self
    }
}

#[cfg(test)]
#[async_trait]
impl RecordSource for MemorySource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self, kind: EntityKind) -> Result<SourceBatch> {
        Ok(self.batches.get(&kind).cloned().unwrap_or_default())
    }
}
