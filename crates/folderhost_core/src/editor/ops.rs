//! Positional text edits against a line buffer.
//!
//! Ranges come from the editor client: 1-based lines and columns. Columns
//! count characters, not bytes, and are clamped to the length of the line
//! they address so a multi-byte character is never split.

use serde::{Deserialize, Serialize};

use super::EditError;

/// Largest file the live editor will write back.
pub const MAX_EDITABLE_SIZE: usize = 200 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRange {
    pub start_line_number: i64,
    pub start_column: i64,
    pub end_line_number: i64,
    pub end_column: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "type")]
    pub kind: EditKind,
    pub range: EditRange,
    #[serde(default)]
    pub text: String,
}

impl EditOperation {
    pub fn insert(line: i64, column: i64, text: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Insert,
            range: EditRange {
                start_line_number: line,
                start_column: column,
                end_line_number: line,
                end_column: column,
            },
            text: text.into(),
        }
    }

    pub fn delete(range: EditRange) -> Self {
        Self {
            kind: EditKind::Delete,
            range,
            text: String::new(),
        }
    }

    pub fn replace(range: EditRange, text: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Replace,
            range,
            text: text.into(),
        }
    }
}

impl EditRange {
    pub fn new(start_line: i64, start_column: i64, end_line: i64, end_column: i64) -> Self {
        Self {
            start_line_number: start_line,
            start_column,
            end_line_number: end_line,
            end_column,
        }
    }
}

/// Apply `op` to `content`.
///
/// Returns `Ok(None)` when the operation changes nothing (an empty
/// single-line delete), so the caller can skip the write.
pub fn apply_edit(content: &str, op: &EditOperation) -> Result<Option<String>, EditError> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_owned).collect();

    let start_line = op.range.start_line_number.saturating_sub(1);
    let start_col = op.range.start_column.saturating_sub(1);
    let end_line = op.range.end_line_number.saturating_sub(1);
    let end_col = op.range.end_column.saturating_sub(1);

    match op.kind {
        EditKind::Insert => {
            let line = line_index(&lines, start_line)
                .ok_or(EditError::LineOutOfRange(op.range.start_line_number))?;
            let (prefix, suffix) = split_at_column(&lines[line], start_col);
            lines[line] = format!("{prefix}{}{suffix}", op.text);
        }
        EditKind::Delete | EditKind::Replace => {
            let (first, last) = match (line_index(&lines, start_line), line_index(&lines, end_line)) {
                (Some(first), Some(last)) => (first, last),
                _ => {
                    return Err(EditError::RangeOutOfBounds {
                        start: op.range.start_line_number,
                        end: op.range.end_line_number,
                    });
                }
            };
            if last < first {
                return Err(EditError::InvalidRange);
            }

            let text = match op.kind {
                EditKind::Replace => op.text.as_str(),
                _ => "",
            };

            if first == last {
                let len = char_len(&lines[first]);
                let start = clamp_column(start_col, len);
                let end = clamp_column(end_col, len);
                if start > end {
                    return match op.kind {
                        EditKind::Delete => Ok(None),
                        _ => Err(EditError::InvalidRange),
                    };
                }
                if start == end && op.kind == EditKind::Delete {
                    return Ok(None);
                }
                let (prefix, _) = split_at_column(&lines[first], start as i64);
                let (_, suffix) = split_at_column(&lines[first], end as i64);
                lines[first] = format!("{prefix}{text}{suffix}");
            } else {
                let (prefix, _) = split_at_column(&lines[first], start_col);
                let (_, suffix) = split_at_column(&lines[last], end_col);
                lines[first] = format!("{prefix}{text}{suffix}");
                lines.drain(first + 1..=last);
            }
        }
    }

    let updated = lines.join("\n");
    if updated.len() > MAX_EDITABLE_SIZE {
        return Err(EditError::TooLarge(updated.len()));
    }
    Ok(Some(updated))
}

fn line_index(lines: &[String], line: i64) -> Option<usize> {
    usize::try_from(line).ok().filter(|&line| line < lines.len())
}

fn char_len(line: &str) -> usize {
    line.chars().count()
}

fn clamp_column(column: i64, len: usize) -> usize {
    column.clamp(0, len as i64) as usize
}

/// Split `line` before the character at `column`, clamping into the line.
fn split_at_column(line: &str, column: i64) -> (&str, &str) {
    let column = clamp_column(column, char_len(line));
    let byte = line
        .char_indices()
        .nth(column)
        .map_or(line.len(), |(index, _)| index);
    line.split_at(byte)
}
