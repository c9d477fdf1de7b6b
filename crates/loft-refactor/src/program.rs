//! Resolved-program model consumed by the analysis engines.
//!
//! The compiler front end and reference locator are external collaborators:
//! they parse source, resolve every expression and declaration to a symbol,
//! and populate this model through [`ProgramBuilder`]. The engines only read
//! it. Nodes form an arena with parent links; child nodes are always
//! allocated before the node that references them, so ids increase from
//! leaves to roots.

use std::collections::HashMap;
use std::fmt;

use loft_core::{FileId, SourceRange};
use loft_types::{MethodId, TypeId, VarId, Visibility};

/// Index of a syntax node in a [`Program`] arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }

    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// What kind of slot a variable declaration introduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Local,
    Field,
    Parameter,
}

/// Resolution of a simple-name expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Variable(VarId),
    Type(TypeId),
}

/// One `name = initializer` fragment of a (possibly multi-variable)
/// declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub var: VarId,
    pub initializer: Option<NodeId>,
}

/// Closed set of syntactic categories the analysis distinguishes.
///
/// Everything the checker has no rule for is reported as [`NodeKind::Other`];
/// the engines treat unknown context as tolerant of generalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A type-name occurrence in source.
    TypeReference { ty: TypeId },
    /// An array type wrapping an element type node (`T[]`, `T[][]`, varargs).
    ArrayType { element: NodeId },
    /// A resolved simple-name expression.
    Name { binding: Binding },
    /// `expr.field` or `Type.field`.
    FieldAccess {
        field: VarId,
        qualifier: Option<NodeId>,
    },
    MethodInvocation {
        method: MethodId,
        receiver: Option<NodeId>,
        args: Vec<NodeId>,
    },
    SuperMethodInvocation {
        method: MethodId,
        qualifier: Option<NodeId>,
    },
    ClassInstanceCreation {
        ctor: Option<MethodId>,
        type_node: NodeId,
        args: Vec<NodeId>,
    },
    Cast {
        type_node: NodeId,
        operand: NodeId,
    },
    InstanceOf {
        operand: NodeId,
        type_node: NodeId,
    },
    /// `T.class`.
    TypeLiteral { type_node: NodeId },
    /// `new T[..]`; `type_node` is the element type.
    ArrayCreation { type_node: NodeId },
    Assignment {
        lhs: NodeId,
        rhs: NodeId,
    },
    Return {
        expr: Option<NodeId>,
        method: MethodId,
    },
    /// A local or field declaration; multi-variable declarations share one
    /// type node across all fragments.
    VariableDeclaration {
        kind: VarKind,
        type_node: NodeId,
        fragments: Vec<Fragment>,
    },
    /// A formal parameter declaration.
    Parameter {
        method: MethodId,
        index: u32,
        var: VarId,
        type_node: NodeId,
    },
    MethodDeclaration {
        method: MethodId,
        return_type_node: Option<NodeId>,
    },
    CatchClause { type_node: NodeId },
    /// `extends`/`implements` clause entry of a type declaration.
    SupertypeClause { type_node: NodeId },
    Import { type_node: NodeId },
    /// `T.this`.
    QualifiedThis { type_node: NodeId },
    Parenthesized { inner: NodeId },
    SwitchCaseLabel { expr: NodeId },
    /// A context with no generalization-specific rule.
    Other { children: Vec<NodeId> },
}

impl NodeKind {
    fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::TypeReference { .. } | NodeKind::Name { .. } => Vec::new(),
            NodeKind::ArrayType { element } => vec![*element],
            NodeKind::FieldAccess { qualifier, .. } => qualifier.iter().copied().collect(),
            NodeKind::MethodInvocation { receiver, args, .. } => {
                receiver.iter().copied().chain(args.iter().copied()).collect()
            }
            NodeKind::SuperMethodInvocation { qualifier, .. } => {
                qualifier.iter().copied().collect()
            }
            NodeKind::ClassInstanceCreation { type_node, args, .. } => {
                std::iter::once(*type_node).chain(args.iter().copied()).collect()
            }
            NodeKind::Cast { type_node, operand } => vec![*type_node, *operand],
            NodeKind::InstanceOf { operand, type_node } => vec![*operand, *type_node],
            NodeKind::TypeLiteral { type_node }
            | NodeKind::ArrayCreation { type_node }
            | NodeKind::CatchClause { type_node }
            | NodeKind::SupertypeClause { type_node }
            | NodeKind::Import { type_node }
            | NodeKind::QualifiedThis { type_node } => vec![*type_node],
            NodeKind::Assignment { lhs, rhs } => vec![*lhs, *rhs],
            NodeKind::Return { expr, .. } => expr.iter().copied().collect(),
            NodeKind::VariableDeclaration { type_node, fragments, .. } => {
                std::iter::once(*type_node)
                    .chain(fragments.iter().filter_map(|fragment| fragment.initializer))
                    .collect()
            }
            NodeKind::Parameter { type_node, .. } => vec![*type_node],
            NodeKind::MethodDeclaration { return_type_node, .. } => {
                return_type_node.iter().copied().collect()
            }
            NodeKind::Parenthesized { inner } => vec![*inner],
            NodeKind::SwitchCaseLabel { expr } => vec![*expr],
            NodeKind::Other { children } => children.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub loc: SourceRange,
}

/// A resolved method declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodData {
    pub name: String,
    pub declaring: TypeId,
    pub params: Vec<TypeId>,
    /// `None` for void methods and constructors.
    pub return_ty: Option<TypeId>,
    pub visibility: Visibility,
}

/// A resolved variable declaration (local, parameter, or field).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarData {
    pub name: String,
    pub ty: TypeId,
    pub kind: VarKind,
    /// Members only.
    pub visibility: Option<Visibility>,
    /// Members only.
    pub declaring: Option<TypeId>,
}

/// The populated program model one analysis invocation runs against.
#[derive(Clone, Debug, Default)]
pub struct Program {
    nodes: Vec<SyntaxNode>,
    methods: Vec<MethodData>,
    vars: Vec<VarData>,
    ripple: HashMap<MethodId, Vec<MethodId>>,
    method_decl_nodes: HashMap<MethodId, NodeId>,
    param_nodes: HashMap<(MethodId, u32), NodeId>,
    var_decl_nodes: HashMap<VarId, NodeId>,
    var_refs: HashMap<VarId, Vec<NodeId>>,
    call_sites: HashMap<MethodId, Vec<NodeId>>,
    expr_types: Vec<Option<TypeId>>,
    compile_errors: HashMap<FileId, Vec<String>>,
    file_packages: HashMap<FileId, Option<String>>,
}

impl Program {
    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.idx()]
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.idx()].parent
    }

    pub fn method(&self, id: MethodId) -> Option<&MethodData> {
        self.methods.get(id.idx())
    }

    pub fn var(&self, id: VarId) -> Option<&VarData> {
        self.vars.get(id.idx())
    }

    /// The override family a method belongs to, including the method itself.
    pub fn ripple_family(&self, id: MethodId) -> Vec<MethodId> {
        self.ripple.get(&id).cloned().unwrap_or_else(|| vec![id])
    }

    /// The declaration node of a method, when the front end could map the
    /// symbol back to source.
    pub fn method_decl_node(&self, id: MethodId) -> Option<NodeId> {
        self.method_decl_nodes.get(&id).copied()
    }

    pub fn param_node(&self, method: MethodId, index: u32) -> Option<NodeId> {
        self.param_nodes.get(&(method, index)).copied()
    }

    /// The declaration node of a variable (its `VariableDeclaration` or
    /// `Parameter` node).
    pub fn var_decl_node(&self, id: VarId) -> Option<NodeId> {
        self.var_decl_nodes.get(&id).copied()
    }

    pub fn references_of_var(&self, id: VarId) -> &[NodeId] {
        self.var_refs.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn call_sites(&self, id: MethodId) -> &[NodeId] {
        self.call_sites.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The resolved static type of an expression node, when known.
    pub fn expr_type(&self, id: NodeId) -> Option<TypeId> {
        self.expr_types[id.idx()]
    }

    pub fn compile_errors(&self, file: &FileId) -> &[String] {
        self.compile_errors.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn package_of_file(&self, file: &FileId) -> Option<&str> {
        self.file_packages.get(file).and_then(|package| package.as_deref())
    }
}

/// Builder the external front end (or a test fixture) populates.
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    nodes: Vec<SyntaxNode>,
    methods: Vec<MethodData>,
    vars: Vec<VarData>,
    ripple: HashMap<MethodId, Vec<MethodId>>,
    compile_errors: HashMap<FileId, Vec<String>>,
    file_packages: HashMap<FileId, Option<String>>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, data: MethodData) -> MethodId {
        let id = MethodId::from_raw(self.methods.len() as u32);
        self.methods.push(data);
        id
    }

    pub fn add_var(&mut self, data: VarData) -> VarId {
        let id = VarId::from_raw(self.vars.len() as u32);
        self.vars.push(data);
        id
    }

    /// Link an override family; every member maps to the full set, itself
    /// included.
    pub fn set_ripple_family(&mut self, members: &[MethodId]) {
        for &member in members {
            self.ripple.insert(member, members.to_vec());
        }
    }

    /// Allocate a syntax node. Child nodes referenced by `kind` must already
    /// exist; parent links are derived when the program is finished.
    pub fn node(&mut self, kind: NodeKind, loc: SourceRange) -> NodeId {
        let id = NodeId::from_raw(self.nodes.len() as u32);
        for child in kind.children() {
            assert!(
                child.idx() < self.nodes.len(),
                "child {child:?} allocated after its parent"
            );
        }
        self.nodes.push(SyntaxNode {
            kind,
            parent: None,
            loc,
        });
        id
    }

    pub fn mark_compile_error(&mut self, file: FileId, message: impl Into<String>) {
        self.compile_errors.entry(file).or_default().push(message.into());
    }

    pub fn set_file_package(&mut self, file: FileId, package: Option<&str>) {
        self.file_packages.insert(file, package.map(str::to_string));
    }

    pub fn finish(mut self) -> Program {
        let mut method_decl_nodes = HashMap::new();
        let mut param_nodes = HashMap::new();
        let mut var_decl_nodes = HashMap::new();
        let mut var_refs: HashMap<VarId, Vec<NodeId>> = HashMap::new();
        let mut call_sites: HashMap<MethodId, Vec<NodeId>> = HashMap::new();

        // Parent links from child references.
        let mut parents: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            let id = NodeId::from_raw(idx as u32);
            for child in node.kind.children() {
                parents[child.idx()] = Some(id);
            }
        }
        for (node, parent) in self.nodes.iter_mut().zip(parents) {
            node.parent = parent;
        }

        // Declaration, reference, and call-site tables.
        for (idx, node) in self.nodes.iter().enumerate() {
            let id = NodeId::from_raw(idx as u32);
            match &node.kind {
                NodeKind::Name {
                    binding: Binding::Variable(var),
                } => var_refs.entry(*var).or_default().push(id),
                NodeKind::FieldAccess { field, .. } => {
                    var_refs.entry(*field).or_default().push(id)
                }
                NodeKind::MethodInvocation { method, .. }
                | NodeKind::SuperMethodInvocation { method, .. } => {
                    call_sites.entry(*method).or_default().push(id)
                }
                NodeKind::ClassInstanceCreation {
                    ctor: Some(ctor), ..
                } => call_sites.entry(*ctor).or_default().push(id),
                NodeKind::MethodDeclaration { method, .. } => {
                    method_decl_nodes.insert(*method, id);
                }
                NodeKind::Parameter {
                    method, index, var, ..
                } => {
                    param_nodes.insert((*method, *index), id);
                    var_decl_nodes.insert(*var, id);
                }
                NodeKind::VariableDeclaration { fragments, .. } => {
                    for fragment in fragments {
                        var_decl_nodes.insert(fragment.var, id);
                    }
                }
                _ => {}
            }
        }

        // Expression types, bottom-up. Children precede parents in the arena,
        // so one forward pass resolves every derivable type.
        let mut expr_types: Vec<Option<TypeId>> = vec![None; self.nodes.len()];
        for idx in 0..self.nodes.len() {
            expr_types[idx] = match &self.nodes[idx].kind {
                NodeKind::TypeReference { ty } => Some(*ty),
                NodeKind::ArrayType { .. } => None,
                NodeKind::Name {
                    binding: Binding::Variable(var),
                } => self.vars.get(var.idx()).map(|data| data.ty),
                NodeKind::Name {
                    binding: Binding::Type(ty),
                } => Some(*ty),
                NodeKind::FieldAccess { field, .. } => {
                    self.vars.get(field.idx()).map(|data| data.ty)
                }
                NodeKind::MethodInvocation { method, .. }
                | NodeKind::SuperMethodInvocation { method, .. } => self
                    .methods
                    .get(method.idx())
                    .and_then(|data| data.return_ty),
                NodeKind::ClassInstanceCreation { type_node, .. } => {
                    expr_types[type_node.idx()]
                }
                NodeKind::Cast { type_node, .. } => expr_types[type_node.idx()],
                NodeKind::Parenthesized { inner } => expr_types[inner.idx()],
                NodeKind::Assignment { lhs, .. } => expr_types[lhs.idx()],
                _ => None,
            };
        }

        Program {
            nodes: self.nodes,
            methods: self.methods,
            vars: self.vars,
            ripple: self.ripple,
            method_decl_nodes,
            param_nodes,
            var_decl_nodes,
            var_refs,
            call_sites,
            expr_types,
            compile_errors: self.compile_errors,
            file_packages: self.file_packages,
        }
    }
}
