//! Destinations for remapped records.
//!
//! `PgSink` writes to the Prisma schema with parameterized statements.
//! `DryRun` wraps any sink, answers lookups through it and suppresses every write.
//! Rows that would hit a unique key in the wrapped sink are reported as duplicates.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::debug;

use super::entity::EntityKind;
use super::record::{NaturalKey, Record};
use crate::util::db::{is_undefined_table_error, is_unique_violation, violated_constraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum TransactionMode {
    /// Every insert commits on its own.
    PerRow,
    /// One transaction per kind, one savepoint per row.
    PerKind,
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("unique constraint violated ({})", .constraint.as_deref().unwrap_or("unnamed"))]
    Duplicate { constraint: Option<String> },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<sqlx::Error> for InsertError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            InsertError::Duplicate {
                constraint: violated_constraint(&err),
            }
        } else {
            InsertError::Failed(err.into())
        }
    }
}

#[async_trait]
pub trait Sink: Send {
    fn mode(&self) -> TransactionMode;

    /// False when inserts are simulated.
    fn writes(&self) -> bool {
        true
    }

    async fn begin_kind(&mut self, kind: EntityKind) -> Result<()>;
    async fn commit_kind(&mut self, kind: EntityKind) -> Result<()>;
    async fn rollback_kind(&mut self, kind: EntityKind) -> Result<()>;

    /// Destination id of a row matching `key`, if one exists.
    async fn find_existing(&mut self, key: &NaturalKey) -> Result<Option<i64>>;

    /// Insert a remapped record and return its destination id.
    async fn insert(&mut self, record: &Record) -> Result<i64, InsertError>;

    /// Destination row count; `None` when unknown.
    async fn count(&mut self, kind: EntityKind) -> Result<Option<i64>>;
}

type ScalarQuery<'q> = QueryScalar<'q, Postgres, i64, PgArguments>;

fn insert_query(record: &Record) -> ScalarQuery<'_> {
    let query = match record {
        Record::Language(r) => sqlx::query_scalar(
            r#"INSERT INTO "Language" ("code", "machineName", "name", "iconPath", "order", "speaker")
               VALUES ($1, $2, $3, $4, $5, $6) RETURNING "id"::bigint"#,
        )
        .bind(r.code.as_str())
        .bind(r.machine_name.as_str())
        .bind(r.name.as_str())
        .bind(r.icon_path.as_str())
        .bind(r.order)
        .bind(r.speaker.as_str()),
        Record::GrammarCourse(r) | Record::PhoneticsCourse(r) => {
            let sql = if matches!(record, Record::GrammarCourse(_)) {
                r#"INSERT INTO "GrammarCourse" ("title", "materialLanguage", "metaKeywords", "metaDescription", "languageId")
                   VALUES ($1, $2, $3, $4, $5) RETURNING "id"::bigint"#
            } else {
                r#"INSERT INTO "PhoneticsCourse" ("title", "materialLanguage", "metaKeywords", "metaDescription", "languageId")
                   VALUES ($1, $2, $3, $4, $5) RETURNING "id"::bigint"#
            };
            sqlx::query_scalar(sql)
                .bind(r.title.as_str())
                .bind(r.material_language.as_str())
                .bind(r.meta_keywords.as_deref())
                .bind(r.meta_description.as_deref())
                .bind(r.language_id)
        }
        Record::SongsCourse(r) => sqlx::query_scalar(
            r#"INSERT INTO "SongsCourse" ("title", "materialLanguage", "languageId")
               VALUES ($1, $2, $3) RETURNING "id"::bigint"#,
        )
        .bind(r.title.as_str())
        .bind(r.material_language.as_str())
        .bind(r.language_id),
        Record::GrammarLesson(r) => sqlx::query_scalar(
            r#"INSERT INTO "GrammarLesson" ("title", "courseId", "template", "alias", "url", "section", "teaser", "order", "metaKeywords", "metaDescription")
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING "id"::bigint"#,
        )
        .bind(r.title.as_str())
        .bind(r.course_id)
        .bind(r.template.as_str())
        .bind(r.alias.as_deref())
        .bind(r.url.as_str())
        .bind(r.section.as_deref())
        .bind(r.teaser.as_deref())
        .bind(r.order)
        .bind(r.meta_keywords.as_deref())
        .bind(r.meta_description.as_deref()),
        Record::PhoneticsLesson(r) => sqlx::query_scalar(
            r#"INSERT INTO "PhoneticsLesson" ("title", "courseId", "order", "metaKeywords", "metaDescription")
               VALUES ($1, $2, $3, $4, $5) RETURNING "id"::bigint"#,
        )
        .bind(r.title.as_str())
        .bind(r.course_id)
        .bind(r.order)
        .bind(r.meta_keywords.as_deref())
        .bind(r.meta_description.as_deref()),
        Record::SongsLesson(r) => sqlx::query_scalar(
            r#"INSERT INTO "SongsLesson" ("title", "courseId", "order")
               VALUES ($1, $2, $3) RETURNING "id"::bigint"#,
        )
        .bind(r.title.as_str())
        .bind(r.course_id)
        .bind(r.order),
        Record::Word(r) => sqlx::query_scalar(
            r#"INSERT INTO "Word" ("word", "transcription", "translation", "languageId")
               VALUES ($1, $2, $3, $4) RETURNING "id"::bigint"#,
        )
        .bind(r.word.as_str())
        .bind(r.transcription.as_deref())
        .bind(r.translation.as_deref())
        .bind(r.language_id),
        Record::WordTheme(r) => sqlx::query_scalar(
            r#"INSERT INTO "WordTheme" ("name", "moduleClass", "order")
               VALUES ($1, $2, $3) RETURNING "id"::bigint"#,
        )
        .bind(r.name.as_str())
        .bind(r.module_class.as_str())
        .bind(r.order),
        Record::WordThemeRelation(r) => sqlx::query_scalar(
            r#"INSERT INTO "WordThemeRelation" ("wordId", "themeId", "order")
               VALUES ($1, $2, $3) RETURNING "id"::bigint"#,
        )
        .bind(r.word_id)
        .bind(r.theme_id)
        .bind(r.order),
    };
    query.persistent(false)
}

fn lookup_query(key: &NaturalKey) -> ScalarQuery<'_> {
    let query = match key {
        NaturalKey::LanguageCode(code) => sqlx::query_scalar(
            r#"SELECT "id"::bigint FROM "Language" WHERE "code" = $1 ORDER BY "id" LIMIT 1"#,
        )
        .bind(code.as_str()),
        NaturalKey::ThemeName(name) => sqlx::query_scalar(
            r#"SELECT "id"::bigint FROM "WordTheme" WHERE "name" = $1 ORDER BY "id" LIMIT 1"#,
        )
        .bind(name.as_str()),
        NaturalKey::Word { word, language_id } => sqlx::query_scalar(
            r#"SELECT "id"::bigint FROM "Word" WHERE "word" = $1 AND "languageId" = $2 ORDER BY "id" LIMIT 1"#,
        )
        .bind(word.as_str())
        .bind(*language_id),
        NaturalKey::Relation { word_id, theme_id } => sqlx::query_scalar(
            r#"SELECT "id"::bigint FROM "WordThemeRelation" WHERE "wordId" = $1 AND "themeId" = $2 ORDER BY "id" LIMIT 1"#,
        )
        .bind(*word_id)
        .bind(*theme_id),
    };
    query.persistent(false)
}

/// Postgres destination.
pub struct PgSink {
    pool: PgPool,
    mode: TransactionMode,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSink {
    pub fn new(pool: PgPool, mode: TransactionMode) -> Self {
        Self {
            pool,
            mode,
            tx: None,
        }
    }
}

#[async_trait]
impl Sink for PgSink {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn begin_kind(&mut self, kind: EntityKind) -> Result<()> {
        if self.mode == TransactionMode::PerKind {
            debug!(%kind, "begin transaction");
            self.tx = Some(self.pool.begin().await?);
        }
        Ok(())
    }

    async fn commit_kind(&mut self, kind: EntityKind) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            debug!(%kind, "commit transaction");
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback_kind(&mut self, kind: EntityKind) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            debug!(%kind, "rollback transaction");
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn find_existing(&mut self, key: &NaturalKey) -> Result<Option<i64>> {
        let query = lookup_query(key);
        let found = match self.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(found)
    }

    async fn insert(&mut self, record: &Record) -> Result<i64, InsertError> {
        let query = insert_query(record);
        match self.tx.as_mut() {
            Some(tx) => {
                // A savepoint keeps a failed row from poisoning the kind's transaction.
                let mut sp = sqlx::Connection::begin(&mut **tx).await?;
                match query.fetch_one(&mut *sp).await {
                    Ok(id) => {
                        sp.commit().await?;
                        Ok(id)
                    }
                    Err(e) => {
                        sp.rollback().await?;
                        Err(e.into())
                    }
                }
            }
            None => Ok(query.fetch_one(&self.pool).await?),
        }
    }

    async fn count(&mut self, kind: EntityKind) -> Result<Option<i64>> {
        let sql = format!(r#"SELECT COUNT(*)::bigint FROM "{}""#, kind.table());
        match sqlx::query_scalar::<_, i64>(&sql)
            .persistent(false)
            .fetch_one(&self.pool)
            .await
        {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_undefined_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sink used when there is no destination at all; only meaningful under `DryRun`.
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    fn mode(&self) -> TransactionMode {
        TransactionMode::PerRow
    }

    fn writes(&self) -> bool {
        false
    }

    async fn begin_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn commit_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn rollback_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn find_existing(&mut self, _key: &NaturalKey) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn insert(&mut self, record: &Record) -> Result<i64, InsertError> {
        Err(anyhow!("no destination configured for {}", record.kind()).into())
    }

    async fn count(&mut self, _kind: EntityKind) -> Result<Option<i64>> {
        Ok(None)
    }
}

/// Read-through, write-nothing wrapper.
pub struct DryRun<S> {
    inner: S,
    next_id: i64,
    simulated: usize,
}

impl<S: Sink> DryRun<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            next_id: -1,
            simulated: 0,
        }
    }

    /// Inserts that would have been issued.
    pub fn simulated(&self) -> usize {
        self.simulated
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Sink> Sink for DryRun<S> {
    fn mode(&self) -> TransactionMode {
        self.inner.mode()
    }

    fn writes(&self) -> bool {
        false
    }

    async fn begin_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn commit_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn rollback_kind(&mut self, _kind: EntityKind) -> Result<()> {
        Ok(())
    }

    async fn find_existing(&mut self, key: &NaturalKey) -> Result<Option<i64>> {
        self.inner.find_existing(key).await
    }

    async fn insert(&mut self, record: &Record) -> Result<i64, InsertError> {
        if record.kind().has_unique_key() {
            if let Some(key) = record.natural_key() {
                if self.inner.find_existing(&key).await?.is_some() {
                    return Err(InsertError::Duplicate { constraint: None });
                }
            }
        }
        // Negative ids never collide with real ones and still resolve children.
        let id = self.next_id;
        self.next_id -= 1;
        self.simulated += 1;
        debug!(
            kind = %record.kind(),
            legacy_id = record.legacy_id(),
            synthetic_id = id,
            "dry-run: would insert"
        );
        Ok(id)
    }

    async fn count(&mut self, _kind: EntityKind) -> Result<Option<i64>> {
        Ok(None)
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemorySink;
    use super::*;
    use crate::migration::record::{WordRow, WordThemeRow};

    fn word(legacy_id: i64, text: &str, language_id: i64) -> Record {
        Record::Word(WordRow {
            legacy_id,
            word: text.to_string(),
            transcription: None,
            translation: None,
            language_id,
        })
    }

    #[test]
    fn non_database_error_is_a_failure() {
        let err: InsertError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, InsertError::Failed(_)));
    }

    #[test]
    fn transaction_mode_parses_kebab_case() {
        assert_eq!(
            TransactionMode::from_str("per-kind", false).unwrap(),
            TransactionMode::PerKind
        );
        assert_eq!(
            TransactionMode::from_str("per-row", false).unwrap(),
            TransactionMode::PerRow
        );
    }

    #[tokio::test]
    async fn memory_sink_rejects_duplicate_words() {
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        sink.insert(&word(1, "cat", 7)).await.unwrap();
        let err = sink.insert(&word(2, "cat", 7)).await.unwrap_err();
        assert!(matches!(err, InsertError::Duplicate { .. }));
        sink.insert(&word(3, "cat", 8)).await.unwrap();
        assert_eq!(sink.count(EntityKind::Word).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn dry_run_hands_out_negative_ids_and_reads_through() {
        let mut inner = MemorySink::new(TransactionMode::PerRow);
        let theme = Record::WordTheme(WordThemeRow {
            legacy_id: 1,
            name: "Animals".into(),
            module_class: String::new(),
            order: 0,
        });
        inner.insert(&theme).await.unwrap();

        let mut sink = DryRun::new(inner);
        assert_eq!(
            sink.find_existing(&NaturalKey::ThemeName("Animals".into()))
                .await
                .unwrap(),
            Some(100)
        );
        assert_eq!(sink.insert(&word(1, "dog", 1)).await.unwrap(), -1);
        assert_eq!(sink.insert(&word(2, "cow", 1)).await.unwrap(), -2);
        assert_eq!(sink.simulated(), 2);
        assert_eq!(sink.count(EntityKind::Word).await.unwrap(), None);
        assert_eq!(sink.into_inner().writes, 1);
    }

    #[tokio::test]
    async fn dry_run_reports_existing_word_as_duplicate() {
        let mut inner = MemorySink::new(TransactionMode::PerRow);
        inner.insert(&word(1, "cat", 7)).await.unwrap();

        let mut sink = DryRun::new(inner);
        let err = sink.insert(&word(1, "cat", 7)).await.unwrap_err();
        assert!(matches!(err, InsertError::Duplicate { .. }));
        assert_eq!(sink.insert(&word(2, "cat", 8)).await.unwrap(), -1);
        assert_eq!(sink.simulated(), 1);
    }

    #[tokio::test]
    async fn per_kind_rollback_restores_snapshot() {
        let mut sink = MemorySink::new(TransactionMode::PerKind);
        sink.begin_kind(EntityKind::Word).await.unwrap();
        sink.insert(&word(1, "cat", 7)).await.unwrap();
        sink.rollback_kind(EntityKind::Word).await.unwrap();
        assert!(sink.rows_of(EntityKind::Word).is_empty());
    }
}
