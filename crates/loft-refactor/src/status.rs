use loft_core::SourceRange;
use serde::{Deserialize, Serialize};

/// Severity of a single status entry.
///
/// `Fatal` entries block rewrite application; everything else is surfaced to
/// the caller and analysis continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub severity: StatusSeverity,
    pub message: String,
    pub location: Option<SourceRange>,
}

/// Accumulator for warnings and errors produced during one analysis run.
///
/// The engines never perform recovery themselves; they escalate by adding
/// entries here and the enclosing tool decides what blocks the rewrite.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactoringStatus {
    pub entries: Vec<StatusEntry>,
}

impl RefactoringStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, severity: StatusSeverity, message: impl Into<String>, location: Option<SourceRange>) {
        self.entries.push(StatusEntry {
            severity,
            message: message.into(),
            location,
        });
    }

    pub fn warning(&mut self, message: impl Into<String>, location: Option<SourceRange>) {
        self.add(StatusSeverity::Warning, message, location);
    }

    pub fn error(&mut self, message: impl Into<String>, location: Option<SourceRange>) {
        self.add(StatusSeverity::Error, message, location);
    }

    pub fn fatal(&mut self, message: impl Into<String>, location: Option<SourceRange>) {
        self.add(StatusSeverity::Fatal, message, location);
    }

    pub fn has_fatal(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity == StatusSeverity::Fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == StatusSeverity::Warning)
    }

    pub fn merge(&mut self, other: RefactoringStatus) {
        self.entries.extend(other.entries);
    }
}
