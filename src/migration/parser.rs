//! Reader and writer for the flat export files.
//!
//! One row per line: comma separated, text in single quotes with `''` as the
//! escaped quote, `NULL` for SQL NULL, `--` comment lines. A quoted field may
//! span several physical lines.
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};

use super::record::{Cell, Field};

/// Outcome of parsing one logical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Blank line or comment.
    Skip,
    Fields(Vec<Field>),
    /// Not a data row; the payload says why.
    Malformed(String),
}

fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with("--")
}

/// True for text shaped like the start of a data row: an integer id and a comma.
fn is_row_start(line: &str) -> bool {
    let rest = line.trim_start();
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    digits > 0 && rest[digits..].trim_start().starts_with(',')
}

/// Split file contents into logical lines, joining physical lines while a quote is open.
///
/// Only a row start may open a continuation. Comments, blank lines and the next
/// row start close it, so an unbalanced quote costs one line and not the rest of the file.
pub fn logical_lines(contents: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut quotes = 0usize;
    for line in contents.lines() {
        if !pending.is_empty() {
            if is_comment_or_blank(line) || is_row_start(line) {
                // unterminated quote; the parser reports it
                out.push(std::mem::take(&mut pending));
                quotes = 0;
            } else {
                pending.push('\n');
                pending.push_str(line);
                quotes += line.matches('\'').count();
                if quotes % 2 == 0 {
                    out.push(std::mem::take(&mut pending));
                    quotes = 0;
                }
                continue;
            }
        }

        let opens = line.matches('\'').count() % 2 != 0;
        if opens && !is_comment_or_blank(line) && is_row_start(line) {
            pending.push_str(line);
            quotes = 1;
        } else {
            out.push(line.to_string());
        }
    }
    if !pending.is_empty() {
        out.push(pending);
    }
    out
}

/// Drop whitespace directly after a separator so a quote can open the next field.
fn strip_space_after_commas(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quote = false;
    let mut after_comma = false;
    for ch in line.chars() {
        if after_comma && !in_quote && (ch == ' ' || ch == '\t') {
            continue;
        }
        after_comma = false;
        match ch {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => after_comma = true,
            _ => {}
        }
        out.push(ch);
    }
    out
}

pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("--") {
        return ParsedLine::Skip;
    }
    if trimmed.matches('\'').count() % 2 != 0 {
        return ParsedLine::Malformed("unterminated quoted field".to_string());
    }

    let normalized = strip_space_after_commas(trimmed);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .quote(b'\'')
        .double_quote(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(normalized.as_bytes());

    let record = match reader.records().next() {
        Some(Ok(record)) => record,
        Some(Err(e)) => return ParsedLine::Malformed(e.to_string()),
        None => return ParsedLine::Skip,
    };

    let fields: Vec<Field> = record
        .iter()
        .map(|f| if f == "NULL" { None } else { Some(f.to_string()) })
        .collect();

    match fields.first() {
        Some(Some(id)) if id.parse::<i64>().is_ok() => ParsedLine::Fields(fields),
        Some(Some(id)) => ParsedLine::Malformed(format!("first field is not numeric: {id:.50}")),
        _ => ParsedLine::Malformed("missing id field".to_string()),
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render one row in the flat-file format.
pub fn format_line(cells: &[Cell]) -> String {
    cells
        .iter()
        .map(|cell| match cell {
            Cell::Int(v) => v.to_string(),
            Cell::Text(Some(v)) => quote(v),
            Cell::Text(None) => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn file_header(label: &str, generated: DateTime<Utc>) -> String {
    format!(
        "-- {label} data export\n-- Generated: {}\n\n",
        generated.to_rfc3339()
    )
}
