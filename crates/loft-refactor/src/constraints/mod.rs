//! Type-constraint model for the global generalization solver.
//!
//! A [`ConstraintVariable`] names a slot in the program whose declared type
//! might be generalized; a [`TypeConstraint`] is a relation between two such
//! slots that must keep holding after generalization. Variables have
//! structural identity: the same logical slot discovered through different
//! constraints interns to a single [`VariableId`].

mod solver;

pub use solver::{solve, Solution};

use std::collections::HashMap;
use std::fmt;

use loft_core::SourceRange;
use loft_types::{MethodId, TypeEnv, TypeId};

/// Index of an interned constraint variable in a [`ConstraintSet`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u32);

impl VariableId {
    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VariableId({})", self.0)
    }
}

/// A typed slot in the program.
///
/// Identity is structural: two `Expression` variables are the same slot iff
/// they cover the same source range, two `ParameterType` variables iff they
/// name the same (method, index) pair, and so on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintVariable {
    /// A specific expression occurrence.
    Expression { ty: TypeId, loc: SourceRange },
    /// A type-reference node (declaration type, cast type, ...).
    TypeRef { ty: TypeId, loc: SourceRange },
    /// A formal parameter slot; its location is resolved lazily against the
    /// owning method's declaration.
    ParameterType {
        method: MethodId,
        index: u32,
        ty: TypeId,
    },
    /// A method return-type slot; location resolved lazily.
    ReturnType { method: MethodId, ty: TypeId },
    /// The type declaring a member. Never a candidate for retyping; the type
    /// may be unresolvable (e.g. the receiver of an array `.length`).
    DeclaringType { ty: Option<TypeId> },
    /// A free-standing type symbol used only as a comparison anchor.
    RawBinding { ty: TypeId },
}

impl ConstraintVariable {
    pub fn ty(&self) -> Option<TypeId> {
        match self {
            ConstraintVariable::Expression { ty, .. }
            | ConstraintVariable::TypeRef { ty, .. }
            | ConstraintVariable::ParameterType { ty, .. }
            | ConstraintVariable::ReturnType { ty, .. }
            | ConstraintVariable::RawBinding { ty } => Some(*ty),
            ConstraintVariable::DeclaringType { ty } => *ty,
        }
    }

    /// The source location this variable directly carries, if any.
    pub fn loc(&self) -> Option<&SourceRange> {
        match self {
            ConstraintVariable::Expression { loc, .. }
            | ConstraintVariable::TypeRef { loc, .. } => Some(loc),
            _ => None,
        }
    }
}

/// Relation operator of a simple constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOperator {
    /// Left's type must remain assignable to right's type.
    Subtype,
    /// Left's and right's types must remain identical.
    Equals,
    /// Declaration-site identity; treated like [`ConstraintOperator::Equals`]
    /// by the solver.
    Defines,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimpleConstraint {
    pub left: VariableId,
    pub right: VariableId,
    pub op: ConstraintOperator,
}

/// A relation between constraint variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeConstraint {
    Simple(SimpleConstraint),
    /// A bundle of simple constraints sharing one left-hand variable (e.g.
    /// the branches of a conditional expression constrained against one usage
    /// site). Seeding treats the bundle as a unit; see the solver.
    CompositeOr(Vec<SimpleConstraint>),
}

/// Interning store for variables plus the constraints over them.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    variables: Vec<ConstraintVariable>,
    index: HashMap<ConstraintVariable, VariableId>,
    constraints: Vec<TypeConstraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a variable; the same logical slot always maps to one id.
    pub fn variable(&mut self, variable: ConstraintVariable) -> VariableId {
        if let Some(&id) = self.index.get(&variable) {
            return id;
        }
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(variable.clone());
        self.index.insert(variable, id);
        id
    }

    pub fn get(&self, id: VariableId) -> &ConstraintVariable {
        &self.variables[id.idx()]
    }

    pub fn add_subtype(&mut self, left: VariableId, right: VariableId) {
        self.constraints.push(TypeConstraint::Simple(SimpleConstraint {
            left,
            right,
            op: ConstraintOperator::Subtype,
        }));
    }

    pub fn add_equals(&mut self, left: VariableId, right: VariableId) {
        self.constraints.push(TypeConstraint::Simple(SimpleConstraint {
            left,
            right,
            op: ConstraintOperator::Equals,
        }));
    }

    pub fn add_defines(&mut self, left: VariableId, right: VariableId) {
        self.constraints.push(TypeConstraint::Simple(SimpleConstraint {
            left,
            right,
            op: ConstraintOperator::Defines,
        }));
    }

    pub fn add_composite_or(&mut self, members: Vec<SimpleConstraint>) {
        self.constraints.push(TypeConstraint::CompositeOr(members));
    }

    pub fn constraints(&self) -> &[TypeConstraint] {
        &self.constraints
    }

    pub fn variables(&self) -> impl Iterator<Item = (VariableId, &ConstraintVariable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(idx, variable)| (VariableId(idx as u32), variable))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Every retypable variable whose resolved type is `ty` or an array form
    /// of it. Declaring-type and raw-binding variables are structural anchors
    /// and never candidates.
    pub fn variables_of_type(&self, ty: TypeId, env: &dyn TypeEnv) -> Vec<VariableId> {
        self.variables()
            .filter(|(_, variable)| {
                matches!(
                    variable,
                    ConstraintVariable::Expression { .. }
                        | ConstraintVariable::TypeRef { .. }
                        | ConstraintVariable::ParameterType { .. }
                        | ConstraintVariable::ReturnType { .. }
                )
            })
            .filter(|(_, variable)| {
                variable
                    .ty()
                    .is_some_and(|var_ty| var_ty == ty || env.innermost_element(var_ty) == ty)
            })
            .map(|(id, _)| id)
            .collect()
    }
}
