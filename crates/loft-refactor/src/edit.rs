use std::collections::BTreeMap;

use loft_core::{FileId, TextRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single file edit: replace `range` in `file` with `replacement`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub file: FileId,
    pub range: TextRange,
    pub replacement: String,
}

impl TextEdit {
    pub fn insert(file: FileId, offset: usize, text: impl Into<String>) -> Self {
        Self {
            file,
            range: TextRange::new(offset, offset),
            replacement: text.into(),
        }
    }

    pub fn replace(file: FileId, range: TextRange, text: impl Into<String>) -> Self {
        Self {
            file,
            range,
            replacement: text.into(),
        }
    }

    pub fn delete(file: FileId, range: TextRange) -> Self {
        Self {
            file,
            range,
            replacement: String::new(),
        }
    }
}

/// A set of edits across potentially multiple files.
///
/// Edits must be normalized (sorted, deduplicated, non-overlapping) before
/// being applied or handed to a caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    pub edits: Vec<TextEdit>,
}

impl WorkspaceEdit {
    pub fn new(edits: Vec<TextEdit>) -> Self {
        Self { edits }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Returns edits grouped by file in deterministic order.
    pub fn edits_by_file(&self) -> BTreeMap<&FileId, Vec<&TextEdit>> {
        let mut map: BTreeMap<&FileId, Vec<&TextEdit>> = BTreeMap::new();
        for edit in &self.edits {
            map.entry(&edit.file).or_default().push(edit);
        }
        for edits in map.values_mut() {
            edits.sort_by(|a, b| {
                a.range
                    .start
                    .cmp(&b.range.start)
                    .then_with(|| a.range.end.cmp(&b.range.end))
            });
        }
        map
    }

    /// Normalize edits (sort, deduplicate, and validate non-overlap).
    pub fn normalize(&mut self) -> Result<(), EditError> {
        self.edits.sort_by(|a, b| {
            a.file
                .cmp(&b.file)
                .then_with(|| a.range.start.cmp(&b.range.start))
                .then_with(|| a.range.end.cmp(&b.range.end))
                .then_with(|| a.replacement.cmp(&b.replacement))
        });

        // Exact duplicates are redundant: the same location can be discovered
        // through more than one reference walk.
        self.edits
            .dedup_by(|a, b| a.file == b.file && a.range == b.range && a.replacement == b.replacement);

        let mut current_file: Option<&FileId> = None;
        let mut prev: Option<TextRange> = None;
        for edit in &self.edits {
            if current_file.map(|f| f != &edit.file).unwrap_or(true) {
                current_file = Some(&edit.file);
                prev = None;
            }

            if let Some(prev_range) = prev {
                if edit.range.start < prev_range.end {
                    return Err(EditError::OverlappingEdits {
                        file: edit.file.clone(),
                        first: prev_range,
                        second: edit.range,
                    });
                }
            }

            prev = Some(edit.range);
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("overlapping edits in {file:?}: {first:?} overlaps {second:?}")]
    OverlappingEdits {
        file: FileId,
        first: TextRange,
        second: TextRange,
    },
    #[error("text edit range {range:?} is outside the file bounds (len={len}) in {file:?}")]
    OutOfBounds {
        file: FileId,
        range: TextRange,
        len: usize,
    },
}

/// Apply a set of edits to `original` and return the modified text.
///
/// The input edits must be non-overlapping and valid for the `original` text.
pub fn apply_text_edits(original: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    if edits.is_empty() {
        return Ok(original.to_string());
    }

    let mut sorted = edits.to_vec();
    sorted.sort_by(|a, b| {
        b.range
            .start
            .cmp(&a.range.start)
            .then_with(|| b.range.end.cmp(&a.range.end))
    });

    let mut out = original.to_string();
    for edit in sorted {
        let len = out.len();
        if edit.range.end > len {
            return Err(EditError::OutOfBounds {
                file: edit.file,
                range: edit.range,
                len,
            });
        }

        out.replace_range(edit.range.start..edit.range.end, &edit.replacement);
    }

    Ok(out)
}
