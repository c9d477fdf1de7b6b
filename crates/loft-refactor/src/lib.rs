//! Type-generalization safety analysis for structural refactorings.
//!
//! Given a program, a concrete type `T`, and a more general candidate type
//! `G` (a newly introduced interface or an existing supertype), this crate
//! computes the maximal set of source locations typed `T` that can be retyped
//! `G` without breaking compilation, and turns it into a rewrite plan. Two
//! independent engines solve the problem:
//! - a global constraint-graph solver (`constraints`) that propagates an
//!   unsafe set over explicit "must stay assignable to" relations, and
//! - a local reference-safety checker (`check_references`) that inspects each
//!   reference site's syntactic context to a fixpoint.
//!
//! The compiler front end, reference locator, and edit application are
//! external collaborators: they populate the [`Program`] model and apply the
//! resulting [`RewritePlan`].

pub mod constraints;
mod edit;
mod generalize;
mod program;
mod reference_check;
mod status;

pub use edit::{apply_text_edits, EditError, TextEdit, WorkspaceEdit};
pub use generalize::{
    generalize_declared_type, use_supertype_where_possible, GeneralizeDeclaredTypeParams,
    GeneralizeError, GeneralizeOptions, GeneralizeOutcome, ImportRequirement, RewritePlan,
    UseSupertypeOutcome, UseSupertypeParams,
};
pub use program::{
    Binding, Fragment, MethodData, NodeId, NodeKind, Program, ProgramBuilder, SyntaxNode, VarData,
    VarKind,
};
pub use reference_check::{
    check_references, ReferenceCheckOutcome, ReferenceCheckParams, TargetMembers,
};
pub use status::{RefactoringStatus, StatusEntry, StatusSeverity};

pub use loft_core::{CancellationToken, Cancelled, FileId, SourceRange, TextRange};
