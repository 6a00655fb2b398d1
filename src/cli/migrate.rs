use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};
use thiserror::Error;
use tracing::{info, warn};

use crate::migration::export::export_all;
use crate::migration::{
    run_import, DryRun, EntityKind, FileSource, LegacyDbSource, NullSink, PgSink, RecordSource,
    RunReport, TransactionMode,
};
use crate::util::db::Db;
use crate::util::env as env_util;

pub const MIGRATION_SUBDIR: &str = "content-migration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Flat files in the migration directory.
    Files,
    /// Legacy tables, read directly.
    LegacyDb,
}

#[derive(Debug, Clone, Args)]
pub struct MigrateConfig {
    /// Storage box root; flat files live in <root>/content-migration
    #[arg(long, env = "STORAGEBOX_PATH", default_value = "/srv/storagebox")]
    pub storagebox_path: PathBuf,
    /// Destination database (falls back to NEW_DATABASE_URL)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
    /// Legacy database, for export or --source legacy-db
    #[arg(long, env = "LEGACY_DATABASE_URL", hide_env_values = true)]
    pub legacy_database_url: Option<String>,
    /// Where the import reads from
    #[arg(long, value_enum, env = "MIGRATION_SOURCE", default_value_t = SourceKind::Files)]
    pub source: SourceKind,
    /// Transaction granularity (default: per-row for files, per-kind for legacy-db)
    #[arg(long, value_enum, env = "MIGRATION_TRANSACTION")]
    pub transaction: Option<TransactionMode>,
    /// Read and report, write nothing
    #[arg(long, env = "DRY_RUN", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub dry_run: bool,
    /// Skip the export step
    #[arg(long, env = "IMPORT_ONLY", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub import_only: bool,
    /// Skip the import step
    #[arg(long, env = "EXPORT_ONLY", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub export_only: bool,
    /// Also append logs to this file
    #[arg(long, env = "MIGRATION_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--import-only and --export-only are mutually exclusive")]
    ConflictingModes,
    #[error("DATABASE_URL (or NEW_DATABASE_URL) is required to import")]
    MissingDatabaseUrl,
    #[error("LEGACY_DATABASE_URL is required to {0}")]
    MissingLegacyUrl(&'static str),
    #[error("migration directory {} does not exist", .0.display())]
    MissingMigrationDir(PathBuf),
}

/// What a run will do, decided before any connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Steps {
    pub export: bool,
    pub import: bool,
    pub source: SourceKind,
    pub mode: TransactionMode,
    pub migration_dir: PathBuf,
}

impl Steps {
    fn needs_legacy(&self) -> bool {
        self.export || (self.import && self.source == SourceKind::LegacyDb)
    }
}

impl MigrateConfig {
    pub fn migration_dir(&self) -> PathBuf {
        self.storagebox_path.join(MIGRATION_SUBDIR)
    }

    pub fn resolve(&self) -> Result<Steps, ConfigError> {
        if self.import_only && self.export_only {
            return Err(ConfigError::ConflictingModes);
        }
        let has_legacy = self.legacy_database_url.is_some();
        let has_dest = self.database_url.is_some();

        let export = self.export_only
            || (!self.import_only && has_legacy && self.source == SourceKind::Files);
        let import = self.import_only
            || (!self.export_only
                && (has_dest || self.dry_run || self.source == SourceKind::LegacyDb));

        if !export && !import {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if export && !has_legacy {
            return Err(ConfigError::MissingLegacyUrl("export"));
        }
        if import && self.source == SourceKind::LegacyDb && !has_legacy {
            return Err(ConfigError::MissingLegacyUrl("import from the legacy database"));
        }
        if import && !self.dry_run && !has_dest {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let migration_dir = self.migration_dir();
        // A real export creates the directory; anything else needs it up front.
        let dir_created_by_export = export && !self.dry_run;
        if import
            && self.source == SourceKind::Files
            && !dir_created_by_export
            && !migration_dir.is_dir()
        {
            return Err(ConfigError::MissingMigrationDir(migration_dir));
        }

        let mode = self.transaction.unwrap_or(match self.source {
            SourceKind::Files => TransactionMode::PerRow,
            SourceKind::LegacyDb => TransactionMode::PerKind,
        });

        Ok(Steps {
            export,
            import,
            source: self.source,
            mode,
            migration_dir,
        })
    }

    fn log_snapshot(&self) {
        env_util::log_config_snapshot(
            "content-migrate",
            &[
                (
                    "STORAGEBOX_PATH",
                    Some(self.storagebox_path.display().to_string()),
                ),
                ("DATABASE_URL", self.database_url.clone()),
                ("LEGACY_DATABASE_URL", self.legacy_database_url.clone()),
                ("MIGRATION_SOURCE", Some(format!("{:?}", self.source))),
                (
                    "MIGRATION_TRANSACTION",
                    self.transaction.map(|m| format!("{m:?}")),
                ),
                ("DRY_RUN", Some(self.dry_run.to_string())),
                ("IMPORT_ONLY", Some(self.import_only.to_string())),
                ("EXPORT_ONLY", Some(self.export_only.to_string())),
            ],
        );
    }
}

async fn import_into(
    cfg: &MigrateConfig,
    steps: &Steps,
    source: &dyn RecordSource,
) -> Result<RunReport> {
    let kinds = EntityKind::ALL;
    let report = match &cfg.database_url {
        Some(url) => {
            let db = Db::connect(url, 1)
                .await
                .context("connecting to destination database")?;
            let mut sink = PgSink::new(db.pool, steps.mode);
            if cfg.dry_run {
                run_import(&kinds, source, &mut DryRun::new(sink)).await?
            } else {
                run_import(&kinds, source, &mut sink).await?
            }
        }
        None => run_import(&kinds, source, &mut DryRun::new(NullSink)).await?,
    };
    Ok(report)
}

/// Export and/or import as configured.
pub async fn run(mut cfg: MigrateConfig) -> Result<()> {
    if cfg.database_url.is_none() {
        cfg.database_url = env_util::db_url();
    }
    cfg.log_snapshot();
    let steps = cfg.resolve()?;
    info!(
        export = steps.export,
        import = steps.import,
        source = ?steps.source,
        mode = ?steps.mode,
        dry_run = cfg.dry_run,
        dir = %steps.migration_dir.display(),
        "starting content migration"
    );

    let legacy = match (&cfg.legacy_database_url, steps.needs_legacy()) {
        (Some(url), true) => Some(
            Db::connect(url, 1)
                .await
                .context("connecting to legacy database")?,
        ),
        _ => None,
    };

    let mut import_dir = steps.migration_dir.clone();
    if steps.export {
        let db = legacy.as_ref().context("legacy database not connected")?;
        let summary = export_all(
            &LegacyDbSource::new(db.pool.clone()),
            &EntityKind::ALL,
            &steps.migration_dir,
            cfg.dry_run,
        )
        .await?;
        if summary.staged_only {
            if let Some(staged) = summary.location {
                warn!(dir = %staged.display(), "importing from staging directory");
                import_dir = staged;
            }
        }
    }

    if steps.import {
        let report = match steps.source {
            SourceKind::Files => {
                import_into(&cfg, &steps, &FileSource::new(import_dir)).await?
            }
            SourceKind::LegacyDb => {
                let db = legacy.as_ref().context("legacy database not connected")?;
                import_into(&cfg, &steps, &LegacyDbSource::new(db.pool.clone())).await?
            }
        };
        report.log();
        println!("{}", report.render());
        if report.failed() > 0 {
            warn!(failed = report.failed(), "some records failed to import");
        }
    }
    Ok(())
}
