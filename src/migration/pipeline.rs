//! Kind-at-a-time import: load, remap parents, reuse or insert, record new ids.
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::entity::{plan, EntityKind};
use super::mapping::{IdMap, Mappings};
use super::report::{KindReport, RunReport};
use super::sink::{InsertError, Sink, TransactionMode};
use super::source::RecordSource;

struct Progress {
    kind: EntityKind,
    total: usize,
    every: usize,
    start: Instant,
    processed: usize,
}

impl Progress {
    fn new(kind: EntityKind, total: usize) -> Self {
        Self {
            kind,
            total,
            every: kind.spec().progress_every.max(1),
            start: Instant::now(),
            processed: 0,
        }
    }

    fn tick(&mut self) {
        self.processed += 1;
        if self.processed % self.every == 0 && self.processed < self.total {
            self.log(false);
        }
    }

    fn finish(&self) {
        self.log(true);
    }

    fn log(&self, done: bool) {
        let elapsed = self.start.elapsed().as_secs_f64().max(0.001);
        let rate = (self.processed as f64) / elapsed;
        if done {
            info!(target: "progress", kind = %self.kind, processed = self.processed, rate = ?format!("{:.1}/s", rate), took = ?format!("{:.1}s", elapsed), "done");
        } else {
            let pct = 100.0 * (self.processed as f64) / (self.total.max(1) as f64);
            info!(target: "progress", kind = %self.kind, processed = self.processed, total = self.total, pct = ?format!("{:.1}", pct), rate = ?format!("{:.1}/s", rate), "progress");
        }
    }
}

/// Record a per-record failure. In per-kind mode the kind is rolled back and the error returned.
async fn on_failure<S: Sink + ?Sized>(
    sink: &mut S,
    report: &mut KindReport,
    legacy_id: i64,
    err: anyhow::Error,
) -> Result<()> {
    let kind = report.kind;
    match sink.mode() {
        TransactionMode::PerRow => {
            error!(%kind, legacy_id, error = %format!("{err:#}"), "import failed");
            report.failed += 1;
            report.errors.push(format!("{kind} {legacy_id}: {err:#}"));
            Ok(())
        }
        TransactionMode::PerKind => {
            error!(%kind, legacy_id, error = %format!("{err:#}"), "import failed; rolling back kind");
            if let Err(rb) = sink.rollback_kind(kind).await {
                warn!(%kind, error = %rb, "rollback failed");
            }
            Err(err.context(format!("importing {kind} legacy id {legacy_id}")))
        }
    }
}

/// Import every record of one kind and merge its id table into `mappings`.
pub async fn import_kind<S: Sink + ?Sized>(
    kind: EntityKind,
    source: &dyn RecordSource,
    sink: &mut S,
    mappings: &mut Mappings,
) -> Result<KindReport> {
    let start = Instant::now();
    let spec = kind.spec();
    let batch = source
        .load(kind)
        .await
        .with_context(|| format!("loading {kind}"))?;

    let mut report = KindReport::new(kind);
    report.total = batch.total();
    report.rejected = batch.rejected;
    info!(%kind, records = batch.records.len(), rejected = batch.rejected, "importing");

    // Only kinds with children need their ids remembered.
    let keep_ids = kind.is_referenced();
    let mut ids = IdMap::new();
    let mut progress = Progress::new(kind, batch.records.len());

    sink.begin_kind(kind).await?;
    for record in &batch.records {
        progress.tick();
        let legacy_id = record.legacy_id();

        let remapped = match record.remap(mappings) {
            Ok(r) => r,
            Err(missing) => {
                report.skipped += 1;
                warn!(%kind, legacy_id, parent = %missing.parent, parent_id = missing.legacy_id, "skipping: parent not imported");
                continue;
            }
        };

        if spec.reuse_existing {
            if let Some(key) = remapped.natural_key() {
                match sink.find_existing(&key).await {
                    Ok(Some(new_id)) => {
                        ids.insert(legacy_id, new_id);
                        report.reused += 1;
                        debug!(%kind, legacy_id, new_id, "reusing existing row");
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        on_failure(sink, &mut report, legacy_id, e).await?;
                        continue;
                    }
                }
            }
        }

        match sink.insert(&remapped).await {
            Ok(new_id) => {
                if keep_ids {
                    ids.insert(legacy_id, new_id);
                }
                report.imported += 1;
                debug!(%kind, legacy_id, new_id, "inserted");
            }
            Err(InsertError::Duplicate { constraint }) if kind.has_unique_key() => {
                report.duplicates += 1;
                debug!(%kind, legacy_id, constraint = ?constraint, "duplicate, skipping");
                if !keep_ids {
                    continue;
                }
                let Some(key) = remapped.natural_key() else {
                    continue;
                };
                match sink.find_existing(&key).await {
                    Ok(Some(new_id)) => {
                        ids.insert(legacy_id, new_id);
                    }
                    Ok(None) => {
                        warn!(%kind, legacy_id, "duplicate reported but no existing row found");
                    }
                    Err(e) => on_failure(sink, &mut report, legacy_id, e).await?,
                }
            }
            Err(err) => on_failure(sink, &mut report, legacy_id, err.into()).await?,
        }
    }
    sink.commit_kind(kind)
        .await
        .with_context(|| format!("committing {kind}"))?;
    progress.finish();

    mappings.extend(kind, ids);
    report.elapsed = start.elapsed();
    info!(
        %kind,
        imported = report.imported,
        reused = report.reused,
        skipped = report.skipped,
        duplicates = report.duplicates,
        failed = report.failed,
        "kind finished"
    );
    Ok(report)
}

/// Import `kinds` in dependency order and collect destination counts.
pub async fn run_import<S: Sink + ?Sized>(
    kinds: &[EntityKind],
    source: &dyn RecordSource,
    sink: &mut S,
) -> Result<RunReport> {
    let start = Instant::now();
    let order = plan(kinds)?;
    let mut report = RunReport {
        dry_run: !sink.writes(),
        ..Default::default()
    };
    info!(
        source = %source.describe(),
        mode = ?sink.mode(),
        dry_run = report.dry_run,
        kinds = order.len(),
        "starting import"
    );

    for kind in &order {
        let kind_report = import_kind(*kind, source, sink, &mut report.mappings).await?;
        report.errors.extend(kind_report.errors.iter().cloned());
        report.kinds.push(kind_report);
    }

    for kind in &order {
        let count = match sink.count(*kind).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%kind, error = %e, "count failed");
                report.errors.push(format!("counting {kind}: {e:#}"));
                None
            }
        };
        report.dest_counts.insert(*kind, count);
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::record::Record;
    use crate::migration::sink::memory::MemorySink;
    use crate::migration::sink::DryRun;
    use crate::migration::source::MemorySource;

    const LANGUAGES: &str = "\
1,'en','english','English','',0,NULL
2,'de','german','German','',1,NULL
";
    const GRAMMAR_COURSES: &str = "\
10,'English basics','ru',NULL,NULL,1
11,'Lost course','ru',NULL,NULL,99
";
    const GRAMMAR_LESSONS: &str = "\
100,'Articles',10,'lesson.html',NULL,'/articles',NULL,NULL,1,NULL,NULL
101,'Orphan',11,'lesson.html',NULL,'/orphan',NULL,NULL,2,NULL,NULL
";
    const WORDS: &str = "\
1,'cat',NULL,'кошка',1
2,'dog',NULL,'собака',1
3,'Hund',NULL,'собака',2
";
    const WORD_THEMES: &str = "1,'Animals','animals',0\n";
    const RELATIONS: &str = "\
1,1,1,0
2,2,1,1
3,3,1,2
";

    fn fixture() -> MemorySource {
        MemorySource::default()
            .with_lines(EntityKind::Language, LANGUAGES)
            .with_lines(EntityKind::GrammarCourse, GRAMMAR_COURSES)
            .with_lines(EntityKind::GrammarLesson, GRAMMAR_LESSONS)
            .with_lines(EntityKind::Word, WORDS)
            .with_lines(EntityKind::WordTheme, WORD_THEMES)
            .with_lines(EntityKind::WordThemeRelation, RELATIONS)
    }

    #[tokio::test]
    async fn language_import_records_mapping() {
        let source = MemorySource::default().with_lines(
            EntityKind::Language,
            "1,'en','english','English','',0,NULL\n",
        );
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        let report = run_import(&[EntityKind::Language], &source, &mut sink)
            .await
            .unwrap();

        let new_id = report.mappings.get(EntityKind::Language, 1).unwrap();
        let rows = sink.rows_of(EntityKind::Language);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, new_id);
        assert!(matches!(&rows[0].1, Record::Language(l) if l.code == "en"));
        assert_eq!(report.dest_counts.get(&EntityKind::Language), Some(&Some(1)));
    }

    #[tokio::test]
    async fn child_of_missing_parent_is_skipped_once() {
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        let report = run_import(&EntityKind::ALL, &fixture(), &mut sink)
            .await
            .unwrap();

        let courses = report.kind(EntityKind::GrammarCourse).unwrap();
        assert_eq!(courses.imported, 1);
        assert_eq!(courses.skipped, 1);
        assert_eq!(sink.rows_of(EntityKind::GrammarCourse).len(), 1);
        assert_eq!(report.mappings.get(EntityKind::GrammarCourse, 11), None);

        // the lesson under the skipped course cascades into a skip as well
        let lessons = report.kind(EntityKind::GrammarLesson).unwrap();
        assert_eq!((lessons.imported, lessons.skipped), (1, 1));
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn inserted_children_point_at_new_parent_ids() {
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        let report = run_import(&EntityKind::ALL, &fixture(), &mut sink)
            .await
            .unwrap();

        let de = report.mappings.get(EntityKind::Language, 2).unwrap();
        let hund = sink
            .rows_of(EntityKind::Word)
            .iter()
            .find_map(|(_, r)| match r {
                Record::Word(w) if w.word == "Hund" => Some(w.language_id),
                _ => None,
            });
        assert_eq!(hund, Some(de));
        assert_eq!(sink.rows_of(EntityKind::WordThemeRelation).len(), 3);
    }

    #[tokio::test]
    async fn second_run_duplicates_words_and_relations() {
        let source = fixture();
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        run_import(&EntityKind::ALL, &source, &mut sink).await.unwrap();
        let words_before = sink.rows_of(EntityKind::Word).len();
        let relations_before = sink.rows_of(EntityKind::WordThemeRelation).len();

        let report = run_import(&EntityKind::ALL, &source, &mut sink).await.unwrap();

        assert_eq!(sink.rows_of(EntityKind::Word).len(), words_before);
        assert_eq!(
            sink.rows_of(EntityKind::WordThemeRelation).len(),
            relations_before
        );
        let words = report.kind(EntityKind::Word).unwrap();
        assert_eq!((words.imported, words.duplicates, words.failed), (0, 3, 0));
        let relations = report.kind(EntityKind::WordThemeRelation).unwrap();
        assert_eq!(
            (relations.imported, relations.duplicates, relations.skipped),
            (0, 3, 0)
        );
        assert_eq!(report.kind(EntityKind::Language).unwrap().reused, 2);
        assert_eq!(report.kind(EntityKind::WordTheme).unwrap().reused, 1);
        assert_eq!(report.failed(), 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn second_run_in_per_kind_mode_counts_duplicates() {
        let source = fixture();
        let mut sink = MemorySink::new(TransactionMode::PerKind);
        run_import(&EntityKind::ALL, &source, &mut sink).await.unwrap();
        let words_before = sink.rows_of(EntityKind::Word).len();

        let report = run_import(&EntityKind::ALL, &source, &mut sink).await.unwrap();

        assert_eq!(sink.rows_of(EntityKind::Word).len(), words_before);
        let words = report.kind(EntityKind::Word).unwrap();
        assert_eq!((words.imported, words.duplicates, words.failed), (0, 3, 0));
        let relations = report.kind(EntityKind::WordThemeRelation).unwrap();
        assert_eq!(
            (relations.imported, relations.duplicates, relations.failed),
            (0, 3, 0)
        );
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn dry_run_after_real_run_reports_duplicates() {
        let source = fixture();
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        run_import(&EntityKind::ALL, &source, &mut sink).await.unwrap();
        let writes_before = sink.writes;

        let mut dry = DryRun::new(sink);
        let report = run_import(&EntityKind::ALL, &source, &mut dry).await.unwrap();

        let words = report.kind(EntityKind::Word).unwrap();
        assert_eq!((words.imported, words.duplicates), (0, 3));
        let relations = report.kind(EntityKind::WordThemeRelation).unwrap();
        assert_eq!((relations.imported, relations.duplicates), (0, 3));
        assert_eq!(report.kind(EntityKind::Language).unwrap().reused, 2);
        assert_eq!(dry.into_inner().writes, writes_before);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing_but_resolves_children() {
        let mut sink = DryRun::new(MemorySink::new(TransactionMode::PerRow));
        let report = run_import(&EntityKind::ALL, &fixture(), &mut sink)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.kind(EntityKind::WordThemeRelation).unwrap().imported, 3);
        assert!(report.dest_counts.values().all(Option::is_none));
        assert!(sink.simulated() > 0);
        let inner = sink.into_inner();
        assert_eq!(inner.writes, 0);
        assert!(inner.rows.is_empty());
    }

    #[tokio::test]
    async fn per_kind_failure_rolls_back_and_aborts() {
        let mut sink = MemorySink::new(TransactionMode::PerKind);
        sink.fail_on.insert((EntityKind::Word, 2));

        let err = run_import(
            &[EntityKind::Language, EntityKind::Word],
            &fixture(),
            &mut sink,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("words legacy id 2"));
        assert_eq!(sink.rows_of(EntityKind::Language).len(), 2);
        assert!(sink.rows_of(EntityKind::Word).is_empty());
    }

    #[tokio::test]
    async fn per_row_failure_is_counted_and_run_continues() {
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        sink.fail_on.insert((EntityKind::Word, 2));

        let report = run_import(&EntityKind::ALL, &fixture(), &mut sink)
            .await
            .unwrap();

        let words = report.kind(EntityKind::Word).unwrap();
        assert_eq!((words.imported, words.failed), (2, 1));
        let relations = report.kind(EntityKind::WordThemeRelation).unwrap();
        assert_eq!((relations.imported, relations.skipped), (2, 1));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("words 2:"));
    }

    #[tokio::test]
    async fn malformed_lines_are_rejected_without_stopping() {
        let source = MemorySource::default()
            .with_lines(EntityKind::Language, LANGUAGES)
            .with_lines(
                EntityKind::Word,
                "1,'cat',NULL,NULL,1\nnot-a-row,'x'\n2,'dog'\n3,'cow',NULL,NULL,1\n",
            );
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        let report = run_import(&[EntityKind::Language, EntityKind::Word], &source, &mut sink)
            .await
            .unwrap();

        let words = report.kind(EntityKind::Word).unwrap();
        assert_eq!(words.total, 4);
        assert_eq!(words.rejected, 2);
        assert_eq!(words.imported, 2);
    }

    #[tokio::test]
    async fn unordered_request_is_planned() {
        let mut sink = MemorySink::new(TransactionMode::PerRow);
        let report = run_import(
            &[EntityKind::Word, EntityKind::Language],
            &fixture(),
            &mut sink,
        )
        .await
        .unwrap();
        assert_eq!(report.kinds[0].kind, EntityKind::Language);
        assert_eq!(report.kind(EntityKind::Word).unwrap().imported, 3);
    }
}
