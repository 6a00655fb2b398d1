//! Typed source rows and their flat-file field layouts.
//!
//! A `Record` read from a source carries legacy ids everywhere. `remap`
//! produces the copy that is handed to a sink, with every parent id replaced
//! by the destination id recorded earlier in the run.
use thiserror::Error;

use super::entity::EntityKind;
use super::mapping::Mappings;

pub const DEFAULT_SPEAKER: &str = "носитель";
pub const DEFAULT_MATERIAL_LANGUAGE: &str = "ru";

/// One parsed field; `None` is SQL NULL.
pub type Field = Option<String>;

/// A value as written back to a flat file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Int(i64),
    Text(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageRow {
    pub legacy_id: i64,
    pub code: String,
    pub machine_name: String,
    pub name: String,
    pub icon_path: String,
    pub order: i64,
    pub speaker: String,
}

/// Grammar, phonetics and songs courses share a shape; songs courses never carry meta fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRow {
    pub legacy_id: i64,
    pub title: String,
    pub material_language: String,
    pub meta_keywords: Option<String>,
    pub meta_description: Option<String>,
    pub language_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarLessonRow {
    pub legacy_id: i64,
    pub title: String,
    pub course_id: i64,
    pub template: String,
    pub alias: Option<String>,
    pub url: String,
    pub section: Option<String>,
    pub teaser: Option<String>,
    pub order: i64,
    pub meta_keywords: Option<String>,
    pub meta_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneticsLessonRow {
    pub legacy_id: i64,
    pub title: String,
    pub course_id: i64,
    pub order: i64,
    pub meta_keywords: Option<String>,
    pub meta_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongsLessonRow {
    pub legacy_id: i64,
    pub title: String,
    pub course_id: i64,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordRow {
    pub legacy_id: i64,
    pub word: String,
    pub transcription: Option<String>,
    pub translation: Option<String>,
    pub language_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordThemeRow {
    pub legacy_id: i64,
    pub name: String,
    pub module_class: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordThemeRelationRow {
    pub legacy_id: i64,
    pub word_id: i64,
    pub theme_id: i64,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Language(LanguageRow),
    GrammarCourse(CourseRow),
    PhoneticsCourse(CourseRow),
    SongsCourse(CourseRow),
    GrammarLesson(GrammarLessonRow),
    PhoneticsLesson(PhoneticsLessonRow),
    SongsLesson(SongsLessonRow),
    Word(WordRow),
    WordTheme(WordThemeRow),
    WordThemeRelation(WordThemeRelationRow),
}

/// Lookup key for rows that may already exist in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    LanguageCode(String),
    ThemeName(String),
    Word { word: String, language_id: i64 },
    Relation { word_id: i64, theme_id: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{kind}: expected at least {expected} fields, found {found}")]
    TooFewFields {
        kind: EntityKind,
        expected: usize,
        found: usize,
    },
    #[error("{kind}: column {column} is not an integer: {value:?}")]
    InvalidInteger {
        kind: EntityKind,
        column: &'static str,
        value: String,
    },
    #[error("{kind}: column {column} is required")]
    MissingValue {
        kind: EntityKind,
        column: &'static str,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{parent} {legacy_id} was not imported")]
pub struct MissingParent {
    pub parent: EntityKind,
    pub legacy_id: i64,
}

struct Fields<'a> {
    kind: EntityKind,
    values: &'a [Field],
}

impl<'a> Fields<'a> {
    fn raw(&self, idx: usize) -> Option<&'a str> {
        self.values
            .get(idx)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn column(&self, idx: usize) -> &'static str {
        self.kind.spec().columns[idx]
    }

    fn int(&self, idx: usize) -> Result<i64, RecordError> {
        let value = self.raw(idx).ok_or(RecordError::MissingValue {
            kind: self.kind,
            column: self.column(idx),
        })?;
        value.parse().map_err(|_| RecordError::InvalidInteger {
            kind: self.kind,
            column: self.column(idx),
            value: value.to_string(),
        })
    }

    fn int_or_zero(&self, idx: usize) -> Result<i64, RecordError> {
        match self.raw(idx) {
            None => Ok(0),
            Some(_) => self.int(idx),
        }
    }

    fn text(&self, idx: usize) -> String {
        self.raw(idx).unwrap_or_default().to_string()
    }

    fn text_or(&self, idx: usize, default: &str) -> String {
        self.raw(idx).unwrap_or(default).to_string()
    }

    fn opt(&self, idx: usize) -> Option<String> {
        self.raw(idx).map(str::to_string)
    }
}

fn text(value: &str) -> Cell {
    Cell::Text(Some(value.to_string()))
}

fn opt(value: &Option<String>) -> Cell {
    Cell::Text(value.clone())
}

impl Record {
    /// Build a record from fields laid out as `EntitySpec::columns`.
    pub fn from_fields(kind: EntityKind, values: &[Field]) -> Result<Record, RecordError> {
        let expected = kind.min_fields();
        if values.len() < expected {
            return Err(RecordError::TooFewFields {
                kind,
                expected,
                found: values.len(),
            });
        }
        let f = Fields { kind, values };
        let legacy_id = f.int(0)?;
        let record = match kind {
            EntityKind::Language => Record::Language(LanguageRow {
                legacy_id,
                code: f.text(1),
                machine_name: f.text(2),
                name: f.text(3),
                icon_path: f.text(4),
                order: f.int_or_zero(5)?,
                speaker: f.text_or(6, DEFAULT_SPEAKER),
            }),
            EntityKind::GrammarCourse | EntityKind::PhoneticsCourse => {
                let row = CourseRow {
                    legacy_id,
                    title: f.text(1),
                    material_language: f.text_or(2, DEFAULT_MATERIAL_LANGUAGE),
                    meta_keywords: f.opt(3),
                    meta_description: f.opt(4),
                    language_id: f.int(5)?,
                };
                if kind == EntityKind::GrammarCourse {
                    Record::GrammarCourse(row)
                } else {
                    Record::PhoneticsCourse(row)
                }
            }
            EntityKind::SongsCourse => Record::SongsCourse(CourseRow {
                legacy_id,
                title: f.text(1),
                material_language: f.text_or(2, DEFAULT_MATERIAL_LANGUAGE),
                meta_keywords: None,
                meta_description: None,
                language_id: f.int(3)?,
            }),
            EntityKind::GrammarLesson => Record::GrammarLesson(GrammarLessonRow {
                legacy_id,
                title: f.text(1),
                course_id: f.int(2)?,
                template: f.text(3),
                alias: f.opt(4),
                url: f.text(5),
                section: f.opt(6),
                teaser: f.opt(7),
                order: f.int_or_zero(8)?,
                meta_keywords: f.opt(9),
                meta_description: f.opt(10),
            }),
            EntityKind::PhoneticsLesson => Record::PhoneticsLesson(PhoneticsLessonRow {
                legacy_id,
                title: f.text(1),
                course_id: f.int(2)?,
                order: f.int_or_zero(3)?,
                meta_keywords: f.opt(4),
                meta_description: f.opt(5),
            }),
            EntityKind::SongsLesson => Record::SongsLesson(SongsLessonRow {
                legacy_id,
                title: f.text(1),
                course_id: f.int(2)?,
                order: f.int_or_zero(3)?,
            }),
            EntityKind::Word => Record::Word(WordRow {
                legacy_id,
                word: f.text(1),
                transcription: f.opt(2),
                translation: f.opt(3),
                language_id: f.int(4)?,
            }),
            EntityKind::WordTheme => Record::WordTheme(WordThemeRow {
                legacy_id,
                name: f.text(1),
                module_class: f.text(2),
                order: f.int_or_zero(3)?,
            }),
            EntityKind::WordThemeRelation => Record::WordThemeRelation(WordThemeRelationRow {
                legacy_id,
                word_id: f.int(1)?,
                theme_id: f.int(2)?,
                order: f.int_or_zero(3)?,
            }),
        };
        Ok(record)
    }

    /// Inverse of `from_fields`, in the same column order.
    pub fn to_fields(&self) -> Vec<Cell> {
        match self {
            Record::Language(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.code),
                text(&r.machine_name),
                text(&r.name),
                text(&r.icon_path),
                Cell::Int(r.order),
                text(&r.speaker),
            ],
            Record::GrammarCourse(r) | Record::PhoneticsCourse(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.title),
                text(&r.material_language),
                opt(&r.meta_keywords),
                opt(&r.meta_description),
                Cell::Int(r.language_id),
            ],
            Record::SongsCourse(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.title),
                text(&r.material_language),
                Cell::Int(r.language_id),
            ],
            Record::GrammarLesson(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.title),
                Cell::Int(r.course_id),
                text(&r.template),
                opt(&r.alias),
                text(&r.url),
                opt(&r.section),
                opt(&r.teaser),
                Cell::Int(r.order),
                opt(&r.meta_keywords),
                opt(&r.meta_description),
            ],
            Record::PhoneticsLesson(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.title),
                Cell::Int(r.course_id),
                Cell::Int(r.order),
                opt(&r.meta_keywords),
                opt(&r.meta_description),
            ],
            Record::SongsLesson(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.title),
                Cell::Int(r.course_id),
                Cell::Int(r.order),
            ],
            Record::Word(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.word),
                opt(&r.transcription),
                opt(&r.translation),
                Cell::Int(r.language_id),
            ],
            Record::WordTheme(r) => vec![
                Cell::Int(r.legacy_id),
                text(&r.name),
                text(&r.module_class),
                Cell::Int(r.order),
            ],
            Record::WordThemeRelation(r) => vec![
                Cell::Int(r.legacy_id),
                Cell::Int(r.word_id),
                Cell::Int(r.theme_id),
                Cell::Int(r.order),
            ],
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Language(_) => EntityKind::Language,
            Record::GrammarCourse(_) => EntityKind::GrammarCourse,
            Record::PhoneticsCourse(_) => EntityKind::PhoneticsCourse,
            Record::SongsCourse(_) => EntityKind::SongsCourse,
            Record::GrammarLesson(_) => EntityKind::GrammarLesson,
            Record::PhoneticsLesson(_) => EntityKind::PhoneticsLesson,
            Record::SongsLesson(_) => EntityKind::SongsLesson,
            Record::Word(_) => EntityKind::Word,
            Record::WordTheme(_) => EntityKind::WordTheme,
            Record::WordThemeRelation(_) => EntityKind::WordThemeRelation,
        }
    }

    pub fn legacy_id(&self) -> i64 {
        match self {
            Record::Language(r) => r.legacy_id,
            Record::GrammarCourse(r) | Record::PhoneticsCourse(r) | Record::SongsCourse(r) => {
                r.legacy_id
            }
            Record::GrammarLesson(r) => r.legacy_id,
            Record::PhoneticsLesson(r) => r.legacy_id,
            Record::SongsLesson(r) => r.legacy_id,
            Record::Word(r) => r.legacy_id,
            Record::WordTheme(r) => r.legacy_id,
            Record::WordThemeRelation(r) => r.legacy_id,
        }
    }

    /// Parent references as (parent kind, parent id), in `EntitySpec::parents` order.
    pub fn parent_refs(&self) -> Vec<(EntityKind, i64)> {
        match self {
            Record::Language(_) | Record::WordTheme(_) => Vec::new(),
            Record::GrammarCourse(r) | Record::PhoneticsCourse(r) | Record::SongsCourse(r) => {
                vec![(EntityKind::Language, r.language_id)]
            }
            Record::GrammarLesson(r) => vec![(EntityKind::GrammarCourse, r.course_id)],
            Record::PhoneticsLesson(r) => vec![(EntityKind::PhoneticsCourse, r.course_id)],
            Record::SongsLesson(r) => vec![(EntityKind::SongsCourse, r.course_id)],
            Record::Word(r) => vec![(EntityKind::Language, r.language_id)],
            Record::WordThemeRelation(r) => vec![
                (EntityKind::Word, r.word_id),
                (EntityKind::WordTheme, r.theme_id),
            ],
        }
    }

    /// Copy with every parent id translated through `mappings`.
    pub fn remap(&self, mappings: &Mappings) -> Result<Record, MissingParent> {
        let resolve = |parent: EntityKind, legacy_id: i64| {
            mappings
                .get(parent, legacy_id)
                .ok_or(MissingParent { parent, legacy_id })
        };
        let mut out = self.clone();
        match &mut out {
            Record::Language(_) | Record::WordTheme(_) => {}
            Record::GrammarCourse(r) | Record::PhoneticsCourse(r) | Record::SongsCourse(r) => {
                r.language_id = resolve(EntityKind::Language, r.language_id)?;
            }
            Record::GrammarLesson(r) => {
                r.course_id = resolve(EntityKind::GrammarCourse, r.course_id)?;
            }
            Record::PhoneticsLesson(r) => {
                r.course_id = resolve(EntityKind::PhoneticsCourse, r.course_id)?;
            }
            Record::SongsLesson(r) => {
                r.course_id = resolve(EntityKind::SongsCourse, r.course_id)?;
            }
            Record::Word(r) => {
                r.language_id = resolve(EntityKind::Language, r.language_id)?;
            }
            Record::WordThemeRelation(r) => {
                r.word_id = resolve(EntityKind::Word, r.word_id)?;
                r.theme_id = resolve(EntityKind::WordTheme, r.theme_id)?;
            }
        }
        Ok(out)
    }

    /// Key under which an equivalent destination row can be found.
    ///
    /// Only meaningful on a remapped record: the word key embeds the destination language id.
    pub fn natural_key(&self) -> Option<NaturalKey> {
        match self {
            Record::Language(r) => Some(NaturalKey::LanguageCode(r.code.clone())),
            Record::WordTheme(r) => Some(NaturalKey::ThemeName(r.name.clone())),
            Record::Word(r) => Some(NaturalKey::Word {
                word: r.word.clone(),
                language_id: r.language_id,
            }),
            Record::WordThemeRelation(r) => Some(NaturalKey::Relation {
                word_id: r.word_id,
                theme_id: r.theme_id,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[Option<&str>]) -> Vec<Field> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn language_defaults_apply_to_null_columns() {
        let rec = Record::from_fields(
            EntityKind::Language,
            &fields(&[
                Some("1"),
                Some("en"),
                Some("english"),
                Some("English"),
                None,
                None,
                None,
            ]),
        )
        .unwrap();
        let Record::Language(row) = rec else {
            panic!("expected language");
        };
        assert_eq!(row.legacy_id, 1);
        assert_eq!(row.code, "en");
        assert_eq!(row.icon_path, "");
        assert_eq!(row.order, 0);
        assert_eq!(row.speaker, DEFAULT_SPEAKER);
    }

    #[test]
    fn course_material_language_defaults_to_ru() {
        let rec = Record::from_fields(
            EntityKind::GrammarCourse,
            &fields(&[Some("3"), Some("Basics"), None, Some(""), None, Some("1")]),
        )
        .unwrap();
        assert_eq!(
            rec,
            Record::GrammarCourse(CourseRow {
                legacy_id: 3,
                title: "Basics".into(),
                material_language: "ru".into(),
                meta_keywords: None,
                meta_description: None,
                language_id: 1,
            })
        );
        assert_eq!(rec.parent_refs(), vec![(EntityKind::Language, 1)]);
    }

    #[test]
    fn too_few_fields_is_rejected() {
        let err = Record::from_fields(
            EntityKind::Word,
            &fields(&[Some("1"), Some("cat"), None, None]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::TooFewFields {
                kind: EntityKind::Word,
                expected: 5,
                found: 4,
            }
        );
    }

    #[test]
    fn non_numeric_parent_is_rejected() {
        let err = Record::from_fields(
            EntityKind::SongsLesson,
            &fields(&[Some("1"), Some("Intro"), Some("abc"), Some("2")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidInteger { column: "course_id", .. }
        ));
    }

    #[test]
    fn remap_translates_both_relation_parents() {
        let rec = Record::from_fields(
            EntityKind::WordThemeRelation,
            &fields(&[Some("9"), Some("10"), Some("20"), None]),
        )
        .unwrap();
        let mut mappings = Mappings::new();
        mappings.insert(EntityKind::Word, 10, 110);
        assert_eq!(
            rec.remap(&mappings).unwrap_err(),
            MissingParent {
                parent: EntityKind::WordTheme,
                legacy_id: 20,
            }
        );

        mappings.insert(EntityKind::WordTheme, 20, 220);
        let Record::WordThemeRelation(row) = rec.remap(&mappings).unwrap() else {
            panic!("expected relation");
        };
        assert_eq!((row.legacy_id, row.word_id, row.theme_id), (9, 110, 220));
    }

    #[test]
    fn word_key_uses_remapped_language() {
        let rec = Record::from_fields(
            EntityKind::Word,
            &fields(&[Some("4"), Some("dog"), None, Some("собака"), Some("1")]),
        )
        .unwrap();
        let mut mappings = Mappings::new();
        mappings.insert(EntityKind::Language, 1, 77);
        let key = rec.remap(&mappings).unwrap().natural_key();
        assert_eq!(
            key,
            Some(NaturalKey::Word {
                word: "dog".into(),
                language_id: 77,
            })
        );
    }
}
