//! Legacy tables to flat files.
//!
//! Files are staged in the system temp directory and then copied into the
//! migration directory, which is often a mount the process may not write to.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::entity::EntityKind;
use super::parser::{file_header, format_line};
use super::record::Record;
use super::source::RecordSource;

static STAGING_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Default)]
pub struct ExportSummary {
    /// Rows written (or counted, in dry-run) per kind.
    pub rows: Vec<(EntityKind, usize)>,
    /// Where the files ended up; `None` in dry-run.
    pub location: Option<PathBuf>,
    /// True when the copy into the migration directory was denied.
    pub staged_only: bool,
}

fn staging_dir() -> PathBuf {
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "content-migration-{}-{}",
        std::process::id(),
        seq
    ))
}

/// Render one kind's batch as a complete flat file.
pub fn render_file(kind: EntityKind, records: &[Record]) -> String {
    let mut out = file_header(kind.label(), Utc::now());
    for record in records {
        out.push_str(&format_line(&record.to_fields()));
        out.push('\n');
    }
    out
}

pub async fn export_all(
    source: &dyn RecordSource,
    kinds: &[EntityKind],
    dir: &Path,
    dry_run: bool,
) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();

    if dry_run {
        for &kind in kinds {
            let batch = source.load(kind).await?;
            info!(%kind, rows = batch.records.len(), "dry-run: would export");
            summary.rows.push((kind, batch.records.len()));
        }
        return Ok(summary);
    }

    let staging = staging_dir();
    tokio::fs::create_dir_all(&staging)
        .await
        .with_context(|| format!("creating staging dir {}", staging.display()))?;

    for &kind in kinds {
        let batch = source
            .load(kind)
            .await
            .with_context(|| format!("exporting {kind}"))?;
        let path = staging.join(kind.file_name());
        tokio::fs::write(&path, render_file(kind, &batch.records))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(%kind, rows = batch.records.len(), file = %path.display(), "exported");
        summary.rows.push((kind, batch.records.len()));
    }

    match copy_into(&staging, dir, kinds).await {
        Ok(()) => {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            summary.location = Some(dir.to_path_buf());
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            warn!(
                dir = %dir.display(),
                staged = %staging.display(),
                "no permission to write migration dir; files left in staging"
            );
            summary.location = Some(staging);
            summary.staged_only = true;
        }
        Err(e) => {
            return Err(e).with_context(|| format!("copying exports into {}", dir.display()));
        }
    }
    Ok(summary)
}

async fn copy_into(staging: &Path, dir: &Path, kinds: &[EntityKind]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for kind in kinds {
        let name = kind.file_name();
        tokio::fs::copy(staging.join(&name), dir.join(&name)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::source::{FileSource, MemorySource};

    fn legacy() -> MemorySource {
        MemorySource::default()
            .with_lines(
                EntityKind::Language,
                "2,'de','german','German','',1,'носитель'\n1,'en','english','English','',0,'носитель'\n",
            )
            .with_lines(
                EntityKind::GrammarLesson,
                "7,'It''s, like, a title',3,'t.html',NULL,'/x','Intro',NULL,4,NULL,'desc'\n",
            )
    }

    #[tokio::test]
    async fn exported_files_import_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = legacy();
        let kinds = [EntityKind::Language, EntityKind::GrammarLesson];
        let summary = export_all(&source, &kinds, dir.path(), false).await.unwrap();

        assert!(!summary.staged_only);
        assert_eq!(summary.location.as_deref(), Some(dir.path()));
        assert_eq!(
            summary.rows,
            vec![(EntityKind::Language, 2), (EntityKind::GrammarLesson, 1)]
        );

        let files = FileSource::new(dir.path());
        for kind in kinds {
            let original = source.load(kind).await.unwrap();
            let reread = files.load(kind).await.unwrap();
            assert_eq!(reread.records, original.records, "{kind}");
            assert_eq!(reread.rejected, 0);
        }

        let text = std::fs::read_to_string(dir.path().join("languages.sql")).unwrap();
        assert!(text.starts_with("-- languages data export\n-- Generated: "));
        let first_row = text.lines().nth(3).unwrap();
        assert!(first_row.starts_with("1,'en'"));
    }

    #[tokio::test]
    async fn dry_run_writes_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("content-migration");
        let summary = export_all(&legacy(), &[EntityKind::Language], &target, true)
            .await
            .unwrap();
        assert_eq!(summary.rows, vec![(EntityKind::Language, 2)]);
        assert!(summary.location.is_none());
        assert!(!target.exists());
    }
}
