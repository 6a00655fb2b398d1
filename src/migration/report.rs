use std::fmt::Write as _;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{info, warn};

use super::entity::EntityKind;
use super::mapping::Mappings;

/// Outcome counters for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: EntityKind,
    /// Records plus rejected lines seen in the source.
    pub total: usize,
    pub rejected: usize,
    pub imported: usize,
    pub reused: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Per-record failure messages.
    pub errors: Vec<String>,
}

impl KindReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            total: 0,
            rejected: 0,
            imported: 0,
            reused: 0,
            skipped: 0,
            duplicates: 0,
            failed: 0,
            elapsed: Duration::ZERO,
            errors: Vec::new(),
        }
    }

    /// Records that reached a final outcome.
    pub fn handled(&self) -> usize {
        self.imported + self.reused + self.skipped + self.duplicates + self.failed
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub kinds: Vec<KindReport>,
    pub dest_counts: IndexMap<EntityKind, Option<i64>>,
    pub mappings: Mappings,
    pub elapsed: Duration,
    pub dry_run: bool,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn failed(&self) -> usize {
        self.kinds.iter().map(|k| k.failed).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<22} {:>7} {:>8} {:>6} {:>7} {:>6} {:>6} {:>8} {:>7}",
            "kind", "legacy", "imported", "reused", "skipped", "dup", "failed", "rejected", "dest"
        );
        let _ = writeln!(out, "{}", "-".repeat(86));
        for k in &self.kinds {
            let dest = self
                .dest_counts
                .get(&k.kind)
                .copied()
                .flatten()
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            let _ = writeln!(
                out,
                "{:<22} {:>7} {:>8} {:>6} {:>7} {:>6} {:>6} {:>8} {:>7}",
                k.kind.label(),
                k.total,
                k.imported,
                k.reused,
                k.skipped,
                k.duplicates,
                k.failed,
                k.rejected,
                dest
            );
        }
        let _ = write!(
            out,
            "took {:.1}s{}",
            self.elapsed.as_secs_f64(),
            if self.dry_run { " (dry run, nothing written)" } else { "" }
        );
        out
    }

    pub fn log(&self) {
        for k in &self.kinds {
            let dest = self.dest_counts.get(&k.kind).copied().flatten();
            info!(
                target: "summary",
                kind = %k.kind,
                legacy = k.total,
                imported = k.imported,
                reused = k.reused,
                skipped = k.skipped,
                duplicates = k.duplicates,
                failed = k.failed,
                rejected = k.rejected,
                dest = ?dest,
                took = ?format!("{:.1}s", k.elapsed.as_secs_f64()),
                "kind summary"
            );
        }
        for err in &self.errors {
            warn!(target: "summary", error = %err, "error during run");
        }
        info!(
            target: "summary",
            dry_run = self.dry_run,
            took = ?format!("{:.1}s", self.elapsed.as_secs_f64()),
            errors = self.errors.len(),
            "import finished"
        );
    }
}
