//! Driver operations for type generalization.
//!
//! Two entry points, one per engine:
//! - [`generalize_declared_type`] runs the local reference-safety checker
//!   over type-name occurrences found by the external locator.
//! - [`use_supertype_where_possible`] runs the global constraint-graph solver
//!   over an extracted constraint set.
//!
//! Both gate on compile errors in the analyzed files, honor cancellation, and
//! turn the surviving locations into a normalized rewrite plan (text edits
//! plus per-file import requirements). No rewrite is ever partially applied:
//! the plan is only produced once the full safe set is known.

use std::collections::BTreeSet;

use loft_core::{CancellationToken, Cancelled, FileId, SourceRange};
use loft_types::{TypeEnv, TypeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constraints::{solve, ConstraintSet, ConstraintVariable, VariableId};
use crate::edit::{EditError, TextEdit, WorkspaceEdit};
use crate::program::{NodeId, NodeKind, Program};
use crate::reference_check::{
    check_references, ReferenceCheckParams, TargetMembers,
};
use crate::status::RefactoringStatus;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneralizeOptions {
    /// Whether `instanceof` operands may be updated to the target type.
    pub update_instanceof: bool,
}

/// A per-file import the rewrite needs once the target type's name appears in
/// the file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportRequirement {
    pub file: FileId,
    pub qualified_name: String,
}

/// The computed rewrite: replacement edits plus import requirements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewritePlan {
    pub edit: WorkspaceEdit,
    pub imports: Vec<ImportRequirement>,
}

#[derive(Debug, Error)]
pub enum GeneralizeError {
    /// A file that must be analyzed has compile errors; the data extracted
    /// from it cannot be trusted, so the whole operation aborts.
    #[error("compile errors in analyzed files: {files:?}")]
    CompileErrors { files: Vec<FileId> },
    #[error("no generalization target type is available")]
    MissingTarget,
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Edit(#[from] EditError),
}

#[derive(Clone, Debug)]
pub struct GeneralizeDeclaredTypeParams<'a> {
    /// Type-name occurrences of the old type, from the external locator.
    pub candidates: &'a [NodeId],
    /// The generalization target; `None` falls back to the environment's
    /// implicit root type.
    pub target: Option<TypeId>,
    pub members: &'a TargetMembers,
    pub options: GeneralizeOptions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneralizeOutcome {
    pub plan: RewritePlan,
    pub safe: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub status: RefactoringStatus,
}

/// Retype every reference of the old type that the local reference-safety
/// checker proves tolerant of the target.
pub fn generalize_declared_type(
    program: &Program,
    env: &dyn TypeEnv,
    params: GeneralizeDeclaredTypeParams<'_>,
    cancel: &CancellationToken,
) -> Result<GeneralizeOutcome, GeneralizeError> {
    let mut status = RefactoringStatus::new();
    let target = params
        .target
        .or_else(|| env.root_type())
        .ok_or(GeneralizeError::MissingTarget)?;

    let files: BTreeSet<FileId> = params
        .candidates
        .iter()
        .map(|&node| program.node(node).loc.file.clone())
        .collect();
    abort_on_compile_errors(program, files, &mut status)?;

    let outcome = check_references(
        program,
        env,
        ReferenceCheckParams {
            candidates: params.candidates,
            target: Some(target),
            members: params.members,
            update_instanceof: params.options.update_instanceof,
        },
        &mut status,
        cancel,
    )?;

    let locations: Vec<SourceRange> = outcome
        .safe
        .iter()
        .filter(|&&node| matches!(program.node(node).kind, NodeKind::TypeReference { .. }))
        .map(|&node| program.node(node).loc.clone())
        .collect();
    let plan = plan_rewrite(program, env, target, &locations)?;

    Ok(GeneralizeOutcome {
        plan,
        safe: outcome.safe,
        removed: outcome.removed,
        status,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UseSupertypeParams {
    pub old_type: TypeId,
    pub target: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UseSupertypeOutcome {
    pub plan: RewritePlan,
    /// Rewrite locations of the safe variables, lazily resolved for
    /// parameter and return-type slots via the owning method's declaration.
    pub safe_locations: Vec<SourceRange>,
    pub safe: Vec<VariableId>,
    pub bad: Vec<VariableId>,
    pub status: RefactoringStatus,
}

/// Retype every constraint variable of the old type that the global
/// constraint-graph solver proves tolerant of the target.
pub fn use_supertype_where_possible(
    program: &Program,
    env: &dyn TypeEnv,
    set: &ConstraintSet,
    params: UseSupertypeParams,
    cancel: &CancellationToken,
) -> Result<UseSupertypeOutcome, GeneralizeError> {
    let mut status = RefactoringStatus::new();
    let candidates = set.variables_of_type(params.old_type, env);

    let files: BTreeSet<FileId> = candidates
        .iter()
        .filter_map(|&id| set.get(id).loc())
        .map(|loc| loc.file.clone())
        .collect();
    abort_on_compile_errors(program, files, &mut status)?;

    let solution = solve(set, &candidates, params.target, env, cancel)?;

    let safe_locations = rewrite_locations(program, set, &solution.safe);
    let plan = plan_rewrite(program, env, params.target, &safe_locations)?;

    Ok(UseSupertypeOutcome {
        plan,
        safe_locations,
        safe: solution.safe,
        bad: solution.bad,
        status,
    })
}

fn abort_on_compile_errors(
    program: &Program,
    files: BTreeSet<FileId>,
    status: &mut RefactoringStatus,
) -> Result<(), GeneralizeError> {
    let mut broken = Vec::new();
    for file in files {
        let errors = program.compile_errors(&file);
        if !errors.is_empty() {
            for error in errors {
                status.fatal(format!("{file}: {error}"), None);
            }
            broken.push(file);
        }
    }
    if broken.is_empty() {
        Ok(())
    } else {
        Err(GeneralizeError::CompileErrors { files: broken })
    }
}

/// Resolve each safe variable to the source range the rewrite replaces.
/// Declaring-type and raw-binding variables never yield locations.
fn rewrite_locations(
    program: &Program,
    set: &ConstraintSet,
    safe: &[VariableId],
) -> Vec<SourceRange> {
    let mut locations = Vec::new();
    for &id in safe {
        match set.get(id) {
            ConstraintVariable::Expression { loc, .. }
            | ConstraintVariable::TypeRef { loc, .. } => locations.push(loc.clone()),
            ConstraintVariable::ParameterType { method, index, .. } => {
                let Some(param_node) = program.param_node(*method, *index) else {
                    continue;
                };
                if let NodeKind::Parameter { type_node, .. } = program.node(param_node).kind {
                    locations.push(program.node(innermost_type_node(program, type_node)).loc.clone());
                }
            }
            ConstraintVariable::ReturnType { method, .. } => {
                let Some(decl) = program.method_decl_node(*method) else {
                    continue;
                };
                if let NodeKind::MethodDeclaration {
                    return_type_node: Some(return_type_node),
                    ..
                } = program.node(decl).kind
                {
                    locations.push(
                        program
                            .node(innermost_type_node(program, return_type_node))
                            .loc
                            .clone(),
                    );
                }
            }
            ConstraintVariable::DeclaringType { .. } | ConstraintVariable::RawBinding { .. } => {}
        }
    }
    locations
}

fn innermost_type_node(program: &Program, node: NodeId) -> NodeId {
    let mut current = node;
    while let NodeKind::ArrayType { element } = program.node(current).kind {
        current = element;
    }
    current
}

fn plan_rewrite(
    program: &Program,
    env: &dyn TypeEnv,
    target: TypeId,
    locations: &[SourceRange],
) -> Result<RewritePlan, GeneralizeError> {
    let replacement = env.simple_name(target).to_string();
    let target_package = env.package_of(target);

    let mut edits = Vec::with_capacity(locations.len());
    let mut imports = BTreeSet::new();
    for loc in locations {
        edits.push(TextEdit::replace(
            loc.file.clone(),
            loc.range,
            replacement.clone(),
        ));
        if let Some(package) = target_package {
            // Same-package files reference the target by simple name without
            // an import.
            if program.package_of_file(&loc.file) != Some(package) {
                imports.insert(ImportRequirement {
                    file: loc.file.clone(),
                    qualified_name: env.qualified_name(target).to_string(),
                });
            }
        }
    }

    let mut edit = WorkspaceEdit::new(edits);
    edit.normalize()?;
    Ok(RewritePlan {
        edit,
        imports: imports.into_iter().collect(),
    })
}
