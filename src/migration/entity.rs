//! Declarative catalog of the content entity kinds and the order they import in.
//!
//! Every kind is one `EntitySpec` entry. The pipeline never hard-codes a
//! sequence: `plan` walks the parent references and yields a stable
//! topological order, so a new kind only needs a new catalog row.
use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Language,
    GrammarCourse,
    PhoneticsCourse,
    SongsCourse,
    GrammarLesson,
    PhoneticsLesson,
    SongsLesson,
    Word,
    WordTheme,
    WordThemeRelation,
}

/// Static description of one entity kind.
#[derive(Debug)]
pub struct EntitySpec {
    pub kind: EntityKind,
    /// snake_case label used in logs, reports and file names.
    pub label: &'static str,
    /// Destination (Prisma) table.
    pub table: &'static str,
    /// Legacy (Django) table the export reads from.
    pub legacy_table: &'static str,
    /// Legacy column layout; also the flat-file field order.
    pub columns: &'static [&'static str],
    pub parents: &'static [EntityKind],
    /// Destination uniqueness contract. A violation of it is a duplicate, not a failure.
    pub unique_key: Option<&'static [&'static str]>,
    /// Existing destination rows are reused by natural key instead of re-inserted.
    pub reuse_existing: bool,
    pub progress_every: usize,
}

pub static CATALOG: [EntitySpec; 10] = [
    EntitySpec {
        kind: EntityKind::Language,
        label: "languages",
        table: "Language",
        legacy_table: "language_language",
        columns: &["id", "code", "machine_name", "name", "icon", "order", "speaker"],
        parents: &[],
        unique_key: None,
        reuse_existing: true,
        progress_every: 10,
    },
    EntitySpec {
        kind: EntityKind::GrammarCourse,
        label: "grammar_courses",
        table: "GrammarCourse",
        legacy_table: "grammar_grammarcourse",
        columns: &[
            "id",
            "title",
            "material_language",
            "meta_keywords",
            "meta_description",
            "language_id",
        ],
        parents: &[EntityKind::Language],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::PhoneticsCourse,
        label: "phonetics_courses",
        table: "PhoneticsCourse",
        legacy_table: "phonetics_phoneticscourse",
        columns: &[
            "id",
            "title",
            "material_language",
            "meta_keywords",
            "meta_description",
            "language_id",
        ],
        parents: &[EntityKind::Language],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::SongsCourse,
        label: "songs_courses",
        table: "SongsCourse",
        legacy_table: "songs_songscourse",
        columns: &["id", "title", "material_language", "language_id"],
        parents: &[EntityKind::Language],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::GrammarLesson,
        label: "grammar_lessons",
        table: "GrammarLesson",
        legacy_table: "grammar_grammarlesson",
        columns: &[
            "id",
            "title",
            "course_id",
            "template",
            "alias",
            "url",
            "section",
            "teaser",
            "order",
            "meta_keywords",
            "meta_description",
        ],
        parents: &[EntityKind::GrammarCourse],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::PhoneticsLesson,
        label: "phonetics_lessons",
        table: "PhoneticsLesson",
        legacy_table: "phonetics_phoneticslesson",
        columns: &[
            "id",
            "title",
            "course_id",
            "order",
            "meta_keywords",
            "meta_description",
        ],
        parents: &[EntityKind::PhoneticsCourse],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::SongsLesson,
        label: "songs_lessons",
        table: "SongsLesson",
        legacy_table: "songs_songslesson",
        columns: &["id", "title", "course_id", "order"],
        parents: &[EntityKind::SongsCourse],
        unique_key: None,
        reuse_existing: false,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::Word,
        label: "words",
        table: "Word",
        legacy_table: "dictionary_word",
        columns: &["id", "word", "transcription", "translation", "language_id"],
        parents: &[EntityKind::Language],
        unique_key: Some(&["word", "languageId"]),
        reuse_existing: false,
        progress_every: 1000,
    },
    EntitySpec {
        kind: EntityKind::WordTheme,
        label: "word_themes",
        table: "WordTheme",
        legacy_table: "dictionary_wordtheme",
        columns: &["id", "name", "module_class", "order"],
        parents: &[],
        unique_key: None,
        reuse_existing: true,
        progress_every: 100,
    },
    EntitySpec {
        kind: EntityKind::WordThemeRelation,
        label: "word_theme_relations",
        table: "WordThemeRelation",
        legacy_table: "dictionary_wordthemerelation",
        columns: &["id", "word_id", "theme_id", "order"],
        parents: &[EntityKind::Word, EntityKind::WordTheme],
        unique_key: Some(&["wordId", "themeId"]),
        reuse_existing: false,
        progress_every: 1000,
    },
];

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Language,
        EntityKind::GrammarCourse,
        EntityKind::PhoneticsCourse,
        EntityKind::SongsCourse,
        EntityKind::GrammarLesson,
        EntityKind::PhoneticsLesson,
        EntityKind::SongsLesson,
        EntityKind::Word,
        EntityKind::WordTheme,
        EntityKind::WordThemeRelation,
    ];

    pub fn spec(self) -> &'static EntitySpec {
        // CATALOG is declared in the same order as the enum.
        &CATALOG[self as usize]
    }

    pub fn label(self) -> &'static str {
        self.spec().label
    }

    pub fn table(self) -> &'static str {
        self.spec().table
    }

    pub fn file_name(self) -> String {
        format!("{}.sql", self.spec().label)
    }

    pub fn min_fields(self) -> usize {
        self.spec().columns.len()
    }

    pub fn parents(self) -> &'static [EntityKind] {
        self.spec().parents
    }

    pub fn has_unique_key(self) -> bool {
        self.spec().unique_key.is_some()
    }

    /// True when some other kind lists this one as a parent, i.e. its id map is consumed later.
    pub fn is_referenced(self) -> bool {
        CATALOG.iter().any(|s| s.parents.contains(&self))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("{kind} depends on {parent}, which is not part of the plan")]
    MissingParent { kind: EntityKind, parent: EntityKind },
    #[error("dependency cycle among {0:?}")]
    Cycle(Vec<EntityKind>),
}

/// Order `kinds` so every parent precedes its children.
pub fn plan(kinds: &[EntityKind]) -> Result<Vec<EntityKind>, PlanError> {
    walk(kinds, EntityKind::parents)
}

/// Kahn walk; among ready kinds the one listed first in `kinds` goes next.
fn walk<F>(kinds: &[EntityKind], parents_of: F) -> Result<Vec<EntityKind>, PlanError>
where
    F: Fn(EntityKind) -> &'static [EntityKind],
{
    let mut seen = HashSet::new();
    let nodes: Vec<EntityKind> = kinds.iter().copied().filter(|k| seen.insert(*k)).collect();

    let mut pending: HashMap<EntityKind, usize> = HashMap::new();
    for &kind in &nodes {
        for &parent in parents_of(kind) {
            if !seen.contains(&parent) {
                return Err(PlanError::MissingParent { kind, parent });
            }
        }
        pending.insert(kind, parents_of(kind).len());
    }

    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let next = nodes
            .iter()
            .copied()
            .find(|k| pending.get(k) == Some(&0));
        let Some(next) = next else {
            let stuck = nodes
                .iter()
                .copied()
                .filter(|k| pending.contains_key(k))
                .collect();
            return Err(PlanError::Cycle(stuck));
        };
        pending.remove(&next);
        for &kind in &nodes {
            if parents_of(kind).contains(&next) {
                if let Some(n) = pending.get_mut(&kind) {
                    *n -= 1;
                }
            }
        }
        order.push(next);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_matches_enum_order() {
        for (idx, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(CATALOG[idx].kind, *kind);
        }
    }

    #[test]
    fn full_plan_puts_parents_first() {
        let order = plan(&EntityKind::ALL).unwrap();
        assert_eq!(order.len(), EntityKind::ALL.len());
        for (pos, kind) in order.iter().enumerate() {
            for parent in kind.parents() {
                let parent_pos = order.iter().position(|k| k == parent).unwrap();
                assert!(parent_pos < pos, "{parent} must precede {kind}");
            }
        }
        assert_eq!(order[0], EntityKind::Language);
        assert_eq!(order.last(), Some(&EntityKind::WordThemeRelation));
    }

    #[test]
    fn plan_is_independent_of_request_order_for_dependencies() {
        let order = plan(&[
            EntityKind::WordThemeRelation,
            EntityKind::WordTheme,
            EntityKind::Word,
            EntityKind::Language,
        ])
        .unwrap();
        assert_eq!(
            order,
            vec![
                EntityKind::WordTheme,
                EntityKind::Language,
                EntityKind::Word,
                EntityKind::WordThemeRelation,
            ]
        );
    }

    #[test]
    fn plan_rejects_orphaned_child() {
        let err = plan(&[EntityKind::GrammarLesson]).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingParent {
                kind: EntityKind::GrammarLesson,
                parent: EntityKind::GrammarCourse,
            }
        );
    }

    #[test]
    fn walk_detects_cycles() {
        fn cyclic(kind: EntityKind) -> &'static [EntityKind] {
            match kind {
                EntityKind::Word => &[EntityKind::WordTheme],
                EntityKind::WordTheme => &[EntityKind::Word],
                _ => &[],
            }
        }
        let err = walk(&[EntityKind::Word, EntityKind::WordTheme], cyclic).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(ref ks) if ks.len() == 2));
    }

    #[test]
    fn referenced_kinds() {
        assert!(EntityKind::Language.is_referenced());
        assert!(EntityKind::Word.is_referenced());
        assert!(EntityKind::WordTheme.is_referenced());
        assert!(!EntityKind::GrammarLesson.is_referenced());
        assert!(!EntityKind::WordThemeRelation.is_referenced());
    }

    #[test]
    fn file_names_follow_labels() {
        assert_eq!(EntityKind::Language.file_name(), "languages.sql");
        assert_eq!(
            EntityKind::WordThemeRelation.file_name(),
            "word_theme_relations.sql"
        );
        assert_eq!(EntityKind::GrammarLesson.min_fields(), 11);
    }
}
