//! Legacy content migration: export legacy tables to flat files and import
//! them (or the legacy tables directly) into the Prisma schema.
pub mod entity;
pub mod export;
pub mod mapping;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod sink;
pub mod source;

pub use entity::{plan, EntityKind};
pub use mapping::Mappings;
pub use pipeline::{import_kind, run_import};
pub use report::{KindReport, RunReport};
pub use sink::{DryRun, InsertError, NullSink, PgSink, Sink, TransactionMode};
pub use source::{FileSource, LegacyDbSource, RecordSource, SourceBatch};
