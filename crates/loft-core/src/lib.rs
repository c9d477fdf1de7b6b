//! Core shared types for Loft.
//!
//! This crate is intentionally small: file identity, byte ranges, source
//! locations, and cooperative cancellation. Everything else lives in the
//! higher-level crates.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier for a workspace file.
///
/// In a full IDE integration this would likely be an interned ID or a URI.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A half-open text range `[start, end)` in UTF-8 byte offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "invalid range: {start}..{end}");
        Self { start, end }
    }

    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    pub fn contains(self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// A location in the workspace: a file plus a byte range within it.
///
/// Analysis results and rewrite instructions are reported in these units.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub file: FileId,
    pub range: TextRange,
}

impl SourceRange {
    pub fn new(file: FileId, range: TextRange) -> Self {
        Self { file, range }
    }
}

/// Raised when a caller cancels an in-flight analysis.
///
/// No partial result is produced once this is observed; the analysis entry
/// points propagate it to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Cooperative cancellation flag shared between the caller and an analysis run.
///
/// Every bounded loop in the analysis polls the token at its outer iteration
/// via [`CancellationToken::check`].
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_range_basics() {
        let range = TextRange::new(4, 10);
        assert_eq!(range.len(), 6);
        assert!(!range.is_empty());
        assert!(range.contains(4));
        assert!(range.contains(9));
        assert!(!range.contains(10));
        assert!(TextRange::new(3, 3).is_empty());
    }

    #[test]
    #[should_panic(expected = "invalid range")]
    fn text_range_rejects_inverted_bounds() {
        let _ = TextRange::new(5, 2);
    }

    #[test]
    fn cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert_eq!(token.check(), Err(Cancelled));
    }
}
