//! Local reference-safety checker.
//!
//! The second engine: instead of building a constraint graph it inspects each
//! reference site's syntactic context directly, plus the context of anything
//! that syntactically depends on it, to a fixpoint. Input is the raw set of
//! type-name occurrences the external locator found; output is the subset
//! that can be retyped.
//!
//! Two monotone identity sets grow during the run: `nodes_to_remove`
//! (occurrences excluded from retyping) and `bad_var_decls` (declarations
//! whose declared type must not change because one of their own references is
//! unsafe). Parameter and return-type slots are bundled across the whole
//! override ("ripple") family: no member may generalize a slot its siblings
//! cannot.

use std::collections::{HashMap, HashSet};

use loft_core::{CancellationToken, Cancelled};
use loft_types::{MethodId, TypeEnv, TypeId, VarId, Visibility};

use crate::program::{Binding, NodeId, NodeKind, Program};
use crate::status::RefactoringStatus;

/// The members the generalization target exposes.
///
/// For a synthetic target (an interface that does not exist yet) this is the
/// generalized member set by construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetMembers {
    pub methods: HashSet<MethodId>,
    pub fields: HashSet<VarId>,
}

impl TargetMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, method: MethodId) {
        self.methods.insert(method);
    }

    pub fn add_field(&mut self, field: VarId) {
        self.fields.insert(field);
    }
}

#[derive(Clone, Debug)]
pub struct ReferenceCheckParams<'a> {
    /// Type-name occurrences of the old type, from the external locator.
    pub candidates: &'a [NodeId],
    /// The generalization target; `None` means the implicit root type.
    pub target: Option<TypeId>,
    pub members: &'a TargetMembers,
    /// Whether `instanceof` operands may be updated to the target.
    pub update_instanceof: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceCheckOutcome {
    /// Candidates that survive: safe to retype, in input order.
    pub safe: Vec<NodeId>,
    /// Candidates excluded from retyping, in input order.
    pub removed: Vec<NodeId>,
}

pub fn check_references(
    program: &Program,
    env: &dyn TypeEnv,
    params: ReferenceCheckParams<'_>,
    status: &mut RefactoringStatus,
    cancel: &CancellationToken,
) -> Result<ReferenceCheckOutcome, Cancelled> {
    if params.candidates.is_empty() {
        return Ok(ReferenceCheckOutcome::default());
    }
    let target = params.target.or_else(|| env.root_type());
    let checker = ReferenceChecker {
        program,
        env,
        members: params.members,
        update_instanceof: params.update_instanceof,
        target,
        cancel,
        status,
        nodes_to_remove: HashSet::new(),
        bad_var_decls: HashSet::new(),
        bad_param_slots: HashSet::new(),
        bad_return_methods: HashSet::new(),
        warned: HashSet::new(),
        ripple_cache: HashMap::new(),
        call_site_cache: HashMap::new(),
    };
    checker.run(params.candidates)
}

struct ReferenceChecker<'a> {
    program: &'a Program,
    env: &'a dyn TypeEnv,
    members: &'a TargetMembers,
    update_instanceof: bool,
    target: Option<TypeId>,
    cancel: &'a CancellationToken,
    status: &'a mut RefactoringStatus,
    nodes_to_remove: HashSet<NodeId>,
    bad_var_decls: HashSet<NodeId>,
    bad_param_slots: HashSet<(MethodId, u32)>,
    bad_return_methods: HashSet<MethodId>,
    warned: HashSet<NodeId>,
    ripple_cache: HashMap<MethodId, Vec<MethodId>>,
    call_site_cache: HashMap<MethodId, Vec<NodeId>>,
}

impl<'a> ReferenceChecker<'a> {
    fn run(mut self, candidates: &[NodeId]) -> Result<ReferenceCheckOutcome, Cancelled> {
        // Pass 1: contexts that can never tolerate a more general static
        // type, independent of anything else.
        for &node in candidates {
            self.cancel.check()?;
            if self.has_direct_problems(node) {
                self.nodes_to_remove.insert(node);
            }
        }

        // Pass 2: contexts whose safety depends on other references. Repeat
        // until one full pass adds nothing; all four exclusion sets only
        // grow, so the loop terminates.
        let mut rounds = 0usize;
        loop {
            self.cancel.check()?;
            rounds += 1;
            let before = self.exclusion_count();
            for &node in candidates {
                if self.nodes_to_remove.contains(&node) {
                    continue;
                }
                if self.has_indirect_problems(node) {
                    self.nodes_to_remove.insert(node);
                }
            }
            if self.exclusion_count() == before {
                break;
            }
        }
        tracing::debug!(
            rounds,
            removed = self.nodes_to_remove.len(),
            "reference-safety fixpoint complete"
        );

        Ok(ReferenceCheckOutcome {
            safe: candidates
                .iter()
                .copied()
                .filter(|node| !self.nodes_to_remove.contains(node))
                .collect(),
            removed: candidates
                .iter()
                .copied()
                .filter(|node| self.nodes_to_remove.contains(node))
                .collect(),
        })
    }

    fn exclusion_count(&self) -> usize {
        self.nodes_to_remove.len()
            + self.bad_var_decls.len()
            + self.bad_param_slots.len()
            + self.bad_return_methods.len()
    }

    /// The innermost non-parenthesized, non-array context of `node`: returns
    /// the parent plus the direct child the parent sees (which differs from
    /// `node` when parentheses or array dimensions sit in between).
    fn context_of(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        let mut child = node;
        let mut parent = self.program.parent_of(child)?;
        loop {
            match self.program.node(parent).kind {
                NodeKind::Parenthesized { .. } | NodeKind::ArrayType { .. } => {
                    child = parent;
                    parent = self.program.parent_of(parent)?;
                }
                _ => return Some((child, parent)),
            }
        }
    }

    fn skip_parens(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let NodeKind::Parenthesized { inner } = self.program.node(current).kind {
            current = inner;
        }
        current
    }

    fn innermost_type_node(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let NodeKind::ArrayType { element } = self.program.node(current).kind {
            current = element;
        }
        current
    }

    fn ripple_family(&mut self, method: MethodId) -> Vec<MethodId> {
        let program = self.program;
        self.ripple_cache
            .entry(method)
            .or_insert_with(|| program.ripple_family(method))
            .clone()
    }

    fn call_sites_cached(&mut self, method: MethodId) -> Vec<NodeId> {
        let program = self.program;
        self.call_site_cache
            .entry(method)
            .or_insert_with(|| program.call_sites(method).to_vec())
            .clone()
    }

    fn warn_once(&mut self, node: NodeId, message: &str) {
        if self.warned.insert(node) {
            let loc = self.program.node(node).loc.clone();
            self.status.warning(message, Some(loc));
        }
    }

    fn has_direct_problems(&mut self, node: NodeId) -> bool {
        let Some((child, parent_id)) = self.context_of(node) else {
            return false;
        };
        match self.program.node(parent_id).kind {
            // These require the exact original type or cannot be generalized
            // at all in this model.
            NodeKind::TypeLiteral { .. } => true,
            NodeKind::Import { .. } => true,
            NodeKind::QualifiedThis { .. } => true,
            NodeKind::SuperMethodInvocation { .. } => true,
            NodeKind::ClassInstanceCreation { type_node, .. } if type_node == child => true,
            NodeKind::ArrayCreation { .. } => true,
            NodeKind::CatchClause { .. } => true,
            NodeKind::SupertypeClause { .. } => true,
            // Static access through the type name survives only for members
            // the target exposes.
            NodeKind::MethodInvocation {
                method,
                receiver: Some(receiver),
                ..
            } if receiver == child => !self.members.methods.contains(&method),
            NodeKind::FieldAccess {
                field,
                qualifier: Some(qualifier),
            } if qualifier == child => {
                !(self.members.fields.contains(&field) && self.plain_type_qualifier(node, child))
            }
            NodeKind::InstanceOf { type_node, .. } if type_node == child => {
                !self.update_instanceof
            }
            NodeKind::SwitchCaseLabel { .. } => {
                self.warn_once(node, "reference inside a switch case label");
                false
            }
            _ => false,
        }
    }

    fn plain_type_qualifier(&self, node: NodeId, child: NodeId) -> bool {
        node == child
            && matches!(
                self.program.node(node).kind,
                NodeKind::TypeReference { ty } if self.env.element_type(ty).is_none()
            )
    }

    fn has_indirect_problems(&mut self, node: NodeId) -> bool {
        let Some((child, parent_id)) = self.context_of(node) else {
            return false;
        };
        let parent = self.program.node(parent_id).kind.clone();
        match parent {
            NodeKind::VariableDeclaration {
                type_node,
                ref fragments,
                ..
            } if type_node == child => {
                if self.bad_var_decls.contains(&parent_id) {
                    return true;
                }
                let program = self.program;
                let bad = fragments.iter().any(|fragment| {
                    program
                        .references_of_var(fragment.var)
                        .iter()
                        .any(|&reference| self.is_reference_illegal(reference))
                });
                if bad {
                    // All fragments share the declaration's type node; they
                    // are excluded together.
                    self.bad_var_decls.insert(parent_id);
                }
                bad
            }
            NodeKind::Parameter {
                method,
                index,
                type_node,
                ..
            } if type_node == child => {
                if self.bad_param_slots.contains(&(method, index)) {
                    return true;
                }
                let bad = !self.parameter_slot_is_safe(method, index);
                if bad {
                    self.exclude_parameter_slot(method, index);
                }
                bad
            }
            NodeKind::MethodDeclaration {
                method,
                return_type_node: Some(return_type_node),
            } if return_type_node == child => {
                if self.bad_return_methods.contains(&method) {
                    return true;
                }
                let bad = !self.return_slot_is_safe(method);
                if bad {
                    self.exclude_return_slot(method);
                }
                bad
            }
            NodeKind::Cast { type_node, .. } if type_node == child => {
                self.is_reference_illegal(parent_id)
            }
            _ => false,
        }
    }

    /// One parameter slot, bundled across the whole ripple family: the slot
    /// is safe only when every member resolves, every member's own uses of
    /// the parameter stay legal, and every call-site argument bound to the
    /// slot stays assignable to the target.
    fn parameter_slot_is_safe(&mut self, method: MethodId, index: u32) -> bool {
        let program = self.program;
        for member in self.ripple_family(method) {
            // Unresolvable declarations are excluded conservatively.
            let Some(param_node) = program.param_node(member, index) else {
                return false;
            };
            let NodeKind::Parameter { var, .. } = program.node(param_node).kind else {
                return false;
            };
            if program.var(var).is_none() {
                return false;
            }
            for &reference in program.references_of_var(var) {
                if self.is_reference_illegal(reference) {
                    return false;
                }
            }
            for call in self.call_sites_cached(member) {
                let arg = match &program.node(call).kind {
                    NodeKind::MethodInvocation { args, .. }
                    | NodeKind::ClassInstanceCreation { args, .. } => {
                        args.get(index as usize).copied()
                    }
                    _ => None,
                };
                let Some(arg) = arg else { continue };
                let Some(arg_ty) = program.expr_type(self.skip_parens(arg)) else {
                    return false;
                };
                let Some(target) = self.target else {
                    return false;
                };
                if !self.env.is_assignable(arg_ty, target) {
                    return false;
                }
            }
        }
        true
    }

    fn exclude_parameter_slot(&mut self, method: MethodId, index: u32) {
        for member in self.ripple_family(method) {
            self.bad_param_slots.insert((member, index));
            if let Some(param_node) = self.program.param_node(member, index) {
                if let NodeKind::Parameter { type_node, .. } = self.program.node(param_node).kind {
                    let inner = self.innermost_type_node(type_node);
                    self.nodes_to_remove.insert(inner);
                }
            }
        }
    }

    /// A return-type slot is safe only when every ripple member resolves to
    /// a declaration and every call site of every member stays legal as an
    /// expression.
    fn return_slot_is_safe(&mut self, method: MethodId) -> bool {
        let family = self.ripple_family(method);
        for &member in &family {
            if self.program.method(member).is_none()
                || self.program.method_decl_node(member).is_none()
            {
                return false;
            }
        }
        for member in family {
            for call in self.call_sites_cached(member) {
                if self.is_reference_illegal(call) {
                    return false;
                }
            }
        }
        true
    }

    fn exclude_return_slot(&mut self, method: MethodId) {
        for member in self.ripple_family(method) {
            self.bad_return_methods.insert(member);
            if let Some(decl) = self.program.method_decl_node(member) {
                if let NodeKind::MethodDeclaration {
                    return_type_node: Some(return_type_node),
                    ..
                } = self.program.node(decl).kind
                {
                    let inner = self.innermost_type_node(return_type_node);
                    self.nodes_to_remove.insert(inner);
                }
            }
        }
    }

    /// Whether an expression reference is illegal in its context once its
    /// static type becomes the target. Climbs out of argument positions so an
    /// illegal enclosing call poisons its arguments.
    fn is_reference_illegal(&mut self, expr: NodeId) -> bool {
        let mut current = expr;
        loop {
            let Some((child, parent_id)) = self.context_of(current) else {
                return false;
            };
            let parent = self.program.node(parent_id).kind.clone();
            match parent {
                NodeKind::VariableDeclaration {
                    type_node,
                    ref fragments,
                    ..
                } => {
                    let is_initializer = fragments
                        .iter()
                        .any(|fragment| fragment.initializer == Some(child));
                    return is_initializer && self.declaration_is_bad(parent_id, type_node);
                }
                NodeKind::Assignment { lhs, rhs } if rhs == child => {
                    return self.assignment_target_is_bad(lhs);
                }
                NodeKind::Assignment { lhs, .. } if lhs == child => {
                    // A write to a slot of the old type; advisory only.
                    self.warn_once(current, "write access to a reference of the generalized type");
                    return false;
                }
                NodeKind::MethodInvocation {
                    method,
                    receiver,
                    ref args,
                } => {
                    if receiver == Some(child) {
                        return !self.receiver_is_legal(method, parent_id);
                    }
                    if let Some(index) = args.iter().position(|&arg| arg == child) {
                        if !self.argument_slot_accepts_target(method, index as u32) {
                            return true;
                        }
                        current = parent_id;
                        continue;
                    }
                    return false;
                }
                NodeKind::ClassInstanceCreation { ctor, ref args, .. } => {
                    if let Some(index) = args.iter().position(|&arg| arg == child) {
                        let Some(ctor) = ctor else {
                            return true;
                        };
                        if !self.argument_slot_accepts_target(ctor, index as u32) {
                            return true;
                        }
                        current = parent_id;
                        continue;
                    }
                    return false;
                }
                NodeKind::FieldAccess {
                    field,
                    qualifier: Some(qualifier),
                } if qualifier == child => {
                    return !self.field_access_is_legal(field, parent_id);
                }
                NodeKind::Return { method, .. } => {
                    return self.return_is_excluded(method);
                }
                NodeKind::SwitchCaseLabel { .. } => {
                    self.warn_once(current, "reference inside a switch case label");
                    return false;
                }
                _ => return false,
            }
        }
    }

    fn declaration_is_bad(&self, decl: NodeId, type_node: NodeId) -> bool {
        self.bad_var_decls.contains(&decl)
            || self
                .nodes_to_remove
                .contains(&self.innermost_type_node(type_node))
    }

    fn assignment_target_is_bad(&mut self, lhs: NodeId) -> bool {
        let lhs = self.skip_parens(lhs);
        let var = match self.program.node(lhs).kind {
            NodeKind::Name {
                binding: Binding::Variable(var),
            } => var,
            NodeKind::FieldAccess { field, .. } => field,
            _ => return false,
        };
        self.var_slot_is_bad(var)
    }

    fn var_slot_is_bad(&self, var: VarId) -> bool {
        let Some(decl) = self.program.var_decl_node(var) else {
            return false;
        };
        match self.program.node(decl).kind {
            NodeKind::VariableDeclaration { type_node, .. } => {
                self.declaration_is_bad(decl, type_node)
            }
            NodeKind::Parameter {
                method,
                index,
                type_node,
                ..
            } => {
                self.bad_param_slots.contains(&(method, index))
                    || self
                        .nodes_to_remove
                        .contains(&self.innermost_type_node(type_node))
            }
            _ => false,
        }
    }

    fn receiver_is_legal(&mut self, method: MethodId, call: NodeId) -> bool {
        if !self.members.methods.contains(&method) {
            return false;
        }
        let visibility = self
            .program
            .method(method)
            .map(|data| data.visibility)
            .unwrap_or(Visibility::Public);
        self.visible_through_target(visibility, call)
    }

    fn field_access_is_legal(&mut self, field: VarId, access: NodeId) -> bool {
        if !self.members.fields.contains(&field) {
            return false;
        }
        let visibility = self
            .program
            .var(field)
            .and_then(|data| data.visibility)
            .unwrap_or(Visibility::Public);
        self.visible_through_target(visibility, access)
    }

    /// Is a member with `visibility` still reachable when the receiver is
    /// typed as the target instead of the old concrete type?
    fn visible_through_target(&self, visibility: Visibility, at: NodeId) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Private => false,
            Visibility::Protected | Visibility::Package => {
                let file = &self.program.node(at).loc.file;
                let file_package = self.program.package_of_file(file);
                let target_package = self
                    .target
                    .and_then(|target| self.env.package_of(target));
                match (file_package, target_package) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => true,
                    _ => false,
                }
            }
        }
    }

    /// Ripple-aware formal lookup: the slot accepts the target only if every
    /// family member resolves and every member's declared formal is
    /// assignable from it.
    fn argument_slot_accepts_target(&mut self, method: MethodId, index: u32) -> bool {
        let Some(target) = self.target else {
            return false;
        };
        for member in self.ripple_family(method) {
            let Some(data) = self.program.method(member) else {
                return false;
            };
            let Some(&formal) = data.params.get(index as usize) else {
                return false;
            };
            if !self.env.is_assignable(target, formal) {
                return false;
            }
        }
        true
    }

    fn return_is_excluded(&mut self, method: MethodId) -> bool {
        if self.bad_return_methods.contains(&method) {
            return true;
        }
        if let Some(decl) = self.program.method_decl_node(method) {
            if let NodeKind::MethodDeclaration {
                return_type_node: Some(return_type_node),
                ..
            } = self.program.node(decl).kind
            {
                return self
                    .nodes_to_remove
                    .contains(&self.innermost_type_node(return_type_node));
            }
        }
        false
    }
}
