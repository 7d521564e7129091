//! Tag merger for UltraStar song files
//!
//! Adds `#VOCALS` and `#INSTRUMENTAL` header lines pointing at the separated
//! stems. Every other line is left byte-for-byte as it was, and a tag that
//! already carries a value is never overwritten.

use std::fmt;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::Result;

const BOM: char = '\u{feff}';

/// Header keys managed by the merger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKey {
    Vocals,
    Instrumental,
}

impl TagKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKey::Vocals => "VOCALS",
            TagKey::Instrumental => "INSTRUMENTAL",
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.as_str())
    }
}

/// What a merge did to the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// File rewritten with these keys added or filled in
    Written { added: Vec<TagKey> },
    /// Both tags already had values; file untouched
    NoOp,
}

/// Split a header line into key and value. `#TITLE:Song` -> `("TITLE", "Song")`
fn parse_header(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('#')?;
    let (key, value) = rest.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Value of header `key` (case-insensitive), if present and non-empty
pub fn read_header(text: &str, key: &str) -> Option<String> {
    text.trim_start_matches(BOM)
        .lines()
        .filter_map(parse_header)
        .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

/// One line of a song file with its own terminator (`"\r\n"`, `"\n"` or
/// none on an unterminated last line)
struct Line<'a> {
    text: String,
    ending: &'a str,
}

fn split_lines(body: &str) -> Vec<Line<'_>> {
    body.split_inclusive('\n')
        .map(|segment| {
            let (text, ending) = if let Some(text) = segment.strip_suffix("\r\n") {
                (text, &segment[text.len()..])
            } else if let Some(text) = segment.strip_suffix('\n') {
                (text, &segment[text.len()..])
            } else {
                (segment, "")
            };
            Line {
                text: text.to_string(),
                ending,
            }
        })
        .collect()
}

/// Merge the two tags into `original`.
///
/// Returns the new text and the keys that were written, or `None` when both
/// keys already have values. A key counts as set when any of its lines has a
/// value; an empty line is filled only when none has. Untouched lines keep
/// their own line endings.
pub fn merge_text(original: &str, vocals: &str, instrumental: &str) -> Option<(String, Vec<TagKey>)> {
    let (bom, body) = match original.strip_prefix(BOM) {
        Some(rest) => (Some(BOM), rest),
        None => (None, original),
    };

    let mut lines = split_lines(body);
    let mut added = Vec::new();
    let mut missing = Vec::new();

    for (key, value) in [(TagKey::Vocals, vocals), (TagKey::Instrumental, instrumental)] {
        let matching: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                parse_header(&line.text).is_some_and(|(k, _)| k.eq_ignore_ascii_case(key.as_str()))
            })
            .map(|(index, _)| index)
            .collect();

        let has_value = matching
            .iter()
            .any(|&index| parse_header(&lines[index].text).is_some_and(|(_, v)| !v.is_empty()));
        if has_value {
            continue;
        }

        match matching.first() {
            Some(&index) => {
                lines[index].text = format!("{}:{}", key, value);
                added.push(key);
            }
            None => missing.push((key, value)),
        }
    }

    if !missing.is_empty() {
        // New tags go right after the leading header block
        let insert_at = lines
            .iter()
            .position(|line| !line.text.starts_with('#'))
            .unwrap_or(lines.len());
        let newline = insert_at
            .checked_sub(1)
            .map(|previous| lines[previous].ending)
            .filter(|ending| !ending.is_empty())
            .or_else(|| lines.iter().map(|line| line.ending).find(|e| !e.is_empty()))
            .unwrap_or("\n");

        // Inserting after an unterminated last line moves the missing final
        // newline onto the last inserted tag
        let mut last_ending = newline;
        if insert_at == lines.len() {
            if let Some(last) = lines.last_mut() {
                if last.ending.is_empty() {
                    last.ending = newline;
                    last_ending = "";
                }
            }
        }

        let count = missing.len();
        for (offset, (key, value)) in missing.into_iter().enumerate() {
            let ending = if offset + 1 == count { last_ending } else { newline };
            lines.insert(
                insert_at + offset,
                Line {
                    text: format!("{}:{}", key, value),
                    ending,
                },
            );
            added.push(key);
        }
    }

    if added.is_empty() {
        return None;
    }

    let mut text = String::with_capacity(original.len() + 128);
    if let Some(bom) = bom {
        text.push(bom);
    }
    for line in &lines {
        text.push_str(&line.text);
        text.push_str(line.ending);
    }
    Some((text, added))
}

/// Merge tags into the song file at `path`, replacing it atomically.
///
/// `vocals` and `instrumental` are written verbatim as tag values, normally
/// paths relative to the song file.
pub fn merge_tags(path: &Path, vocals: &str, instrumental: &str) -> Result<MergeOutcome> {
    let original = std::fs::read_to_string(path)?;

    let Some((text, added)) = merge_text(&original, vocals, instrumental) else {
        tracing::debug!(path = %path.display(), "Tags already present, file left untouched");
        return Ok(MergeOutcome::NoOp);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(path = %path.display(), ?added, "Tags written");
    Ok(MergeOutcome::Written { added })
}
