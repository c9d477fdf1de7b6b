use loft_core::{CancellationToken, FileId, SourceRange, TextRange};
use loft_refactor::{
    check_references, Binding, Fragment, MethodData, NodeId, NodeKind, ProgramBuilder,
    RefactoringStatus, ReferenceCheckOutcome, ReferenceCheckParams, TargetMembers, VarData,
    VarKind,
};
use loft_types::{MethodId, TypeId, TypeTable, VarId, Visibility};
use pretty_assertions::assert_eq;

/// One source file in package `geom`, Circle extends Shape extends Object.
/// Nodes get synthetic, non-overlapping ranges; the checker only needs their
/// identity and parent links.
struct Fixture {
    builder: ProgramBuilder,
    table: TypeTable,
    file: FileId,
    next: usize,
    object: TypeId,
    shape: TypeId,
    circle: TypeId,
}

impl Fixture {
    fn new() -> Self {
        let mut table = TypeTable::new();
        let object = table.add_type("java.lang.Object");
        let shape = table.add_type("geom.Shape");
        let circle = table.add_type("geom.Circle");
        table.add_supertype(shape, object);
        table.add_supertype(circle, shape);
        table.set_root(object);

        let file = FileId::new("geom/Canvas.java");
        let mut builder = ProgramBuilder::new();
        builder.set_file_package(file.clone(), Some("geom"));
        Fixture {
            builder,
            table,
            file,
            next: 0,
            object,
            shape,
            circle,
        }
    }

    fn node(&mut self, kind: NodeKind) -> NodeId {
        let start = self.next;
        self.next += 10;
        self.builder.node(
            kind,
            SourceRange::new(self.file.clone(), TextRange::new(start, start + 6)),
        )
    }

    /// A type-name occurrence of the old concrete type.
    fn type_ref(&mut self) -> NodeId {
        let ty = self.circle;
        self.node(NodeKind::TypeReference { ty })
    }

    fn var(&mut self, name: &str, ty: TypeId, kind: VarKind) -> VarId {
        let declaring = self.circle;
        self.builder.add_var(VarData {
            name: name.into(),
            ty,
            kind,
            visibility: Some(Visibility::Public),
            declaring: Some(declaring),
        })
    }

    fn method(&mut self, name: &str, params: Vec<TypeId>, return_ty: Option<TypeId>) -> MethodId {
        let declaring = self.circle;
        self.builder.add_method(MethodData {
            name: name.into(),
            declaring,
            params,
            return_ty,
            visibility: Visibility::Public,
        })
    }

    fn read(&mut self, var: VarId) -> NodeId {
        self.node(NodeKind::Name {
            binding: Binding::Variable(var),
        })
    }

    /// Declares `var` with the concrete type; returns the declaration's type
    /// node, the usual retyping candidate.
    fn declare(&mut self, var: VarId, kind: VarKind) -> NodeId {
        let type_node = self.type_ref();
        self.node(NodeKind::VariableDeclaration {
            kind,
            type_node,
            fragments: vec![Fragment {
                var,
                initializer: None,
            }],
        });
        type_node
    }
}

fn run(
    fixture: Fixture,
    candidates: &[NodeId],
    members: &TargetMembers,
    update_instanceof: bool,
) -> (ReferenceCheckOutcome, RefactoringStatus) {
    let Fixture {
        builder,
        table,
        shape,
        ..
    } = fixture;
    let program = builder.finish();
    let mut status = RefactoringStatus::new();
    let outcome = check_references(
        &program,
        &table,
        ReferenceCheckParams {
            candidates,
            target: Some(shape),
            members,
            update_instanceof,
        },
        &mut status,
        &CancellationToken::new(),
    )
    .unwrap();
    (outcome, status)
}

#[test]
fn type_literal_operand_is_excluded() {
    let mut fx = Fixture::new();
    let tr = fx.type_ref();
    fx.node(NodeKind::TypeLiteral { type_node: tr });

    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![tr]);
    assert!(outcome.safe.is_empty());
}

#[test]
fn constructor_name_and_array_creation_element_are_excluded() {
    let mut fx = Fixture::new();
    let ctor_name = fx.type_ref();
    fx.node(NodeKind::ClassInstanceCreation {
        ctor: None,
        type_node: ctor_name,
        args: vec![],
    });
    let element = fx.type_ref();
    fx.node(NodeKind::ArrayCreation { type_node: element });

    let (outcome, _) = run(fx, &[ctor_name, element], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![ctor_name, element]);
}

#[test]
fn structural_contexts_are_always_excluded() {
    let mut fx = Fixture::new();
    let caught = fx.type_ref();
    fx.node(NodeKind::CatchClause { type_node: caught });
    let extended = fx.type_ref();
    fx.node(NodeKind::SupertypeClause { type_node: extended });
    let imported = fx.type_ref();
    fx.node(NodeKind::Import { type_node: imported });
    let this_qualifier = fx.type_ref();
    fx.node(NodeKind::QualifiedThis {
        type_node: this_qualifier,
    });
    let area = fx.method("area", vec![], None);
    let super_qualifier = fx.type_ref();
    fx.node(NodeKind::SuperMethodInvocation {
        method: area,
        qualifier: Some(super_qualifier),
    });

    let candidates = [caught, extended, imported, this_qualifier, super_qualifier];
    let (outcome, _) = run(fx, &candidates, &TargetMembers::new(), false);
    assert_eq!(outcome.removed, candidates.to_vec());
}

#[test]
fn instanceof_operand_honors_the_update_option() {
    fn fixture() -> (Fixture, NodeId) {
        let mut fx = Fixture::new();
        let circle = fx.circle;
        let v = fx.var("v", circle, VarKind::Local);
        let operand = fx.read(v);
        let tr = fx.type_ref();
        fx.node(NodeKind::InstanceOf {
            operand,
            type_node: tr,
        });
        (fx, tr)
    }

    let (fx, tr) = fixture();
    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![tr]);

    let (fx, tr) = fixture();
    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), true);
    assert_eq!(outcome.safe, vec![tr]);
}

#[test]
fn receiver_survives_only_for_members_of_the_target() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let area = fx.method("area", vec![], None);
    let warp = fx.method("warp", vec![], None);
    let v = fx.var("v", circle, VarKind::Local);

    let shared_read = fx.read(v);
    fx.node(NodeKind::MethodInvocation {
        method: area,
        receiver: Some(shared_read),
        args: vec![],
    });
    let concrete_read = fx.read(v);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(concrete_read),
        args: vec![],
    });

    let mut members = TargetMembers::new();
    members.add_method(area);
    let (outcome, _) = run(fx, &[shared_read, concrete_read], &members, false);
    assert_eq!(outcome.safe, vec![shared_read]);
    assert_eq!(outcome.removed, vec![concrete_read]);
}

#[test]
fn static_field_access_requires_a_member_and_a_plain_type_qualifier() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let count = fx.var("count", circle, VarKind::Field);
    let hidden = fx.var("hidden", circle, VarKind::Field);

    let shared_qualifier = fx.type_ref();
    fx.node(NodeKind::FieldAccess {
        field: count,
        qualifier: Some(shared_qualifier),
    });
    let concrete_qualifier = fx.type_ref();
    fx.node(NodeKind::FieldAccess {
        field: hidden,
        qualifier: Some(concrete_qualifier),
    });

    let mut members = TargetMembers::new();
    members.add_field(count);
    let (outcome, _) = run(fx, &[shared_qualifier, concrete_qualifier], &members, false);
    assert_eq!(outcome.safe, vec![shared_qualifier]);
    assert_eq!(outcome.removed, vec![concrete_qualifier]);
}

#[test]
fn declaration_with_only_tolerant_references_is_safe() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let area = fx.method("area", vec![], None);
    let v = fx.var("v", circle, VarKind::Local);
    let read = fx.read(v);
    fx.node(NodeKind::MethodInvocation {
        method: area,
        receiver: Some(read),
        args: vec![],
    });
    let tr = fx.declare(v, VarKind::Local);

    let mut members = TargetMembers::new();
    members.add_method(area);
    let (outcome, _) = run(fx, &[tr], &members, false);
    assert_eq!(outcome.safe, vec![tr]);
}

#[test]
fn declaration_is_excluded_when_any_reference_needs_the_concrete_type() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let warp = fx.method("warp", vec![], None);
    let v = fx.var("v", circle, VarKind::Local);
    let read = fx.read(v);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(read),
        args: vec![],
    });
    let tr = fx.declare(v, VarKind::Local);

    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![tr]);
}

#[test]
fn sibling_fragments_of_a_shared_declaration_fall_together() {
    // `Circle a, b;` where a's only reference is tolerant but b's needs the
    // concrete type: the shared type node excludes both fragments.
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let area = fx.method("area", vec![], None);
    let warp = fx.method("warp", vec![], None);
    let a = fx.var("a", circle, VarKind::Field);
    let b = fx.var("b", circle, VarKind::Field);

    let a_read = fx.read(a);
    fx.node(NodeKind::MethodInvocation {
        method: area,
        receiver: Some(a_read),
        args: vec![],
    });
    let b_read = fx.read(b);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(b_read),
        args: vec![],
    });
    let tr = fx.type_ref();
    fx.node(NodeKind::VariableDeclaration {
        kind: VarKind::Field,
        type_node: tr,
        fragments: vec![
            Fragment {
                var: a,
                initializer: None,
            },
            Fragment {
                var: b,
                initializer: None,
            },
        ],
    });

    let mut members = TargetMembers::new();
    members.add_method(area);
    let (outcome, _) = run(fx, &[tr], &members, false);
    assert_eq!(outcome.removed, vec![tr]);
}

#[test]
fn parameter_slots_are_bundled_across_the_override_family() {
    // B.draw overrides A.draw. A call site of A.draw pins the parameter to
    // the concrete type, which excludes B.draw's slot too, even though B's
    // own call sites are fine.
    fn fixture(arg_ty: fn(&Fixture) -> TypeId) -> (Fixture, NodeId, NodeId) {
        let mut fx = Fixture::new();
        let circle = fx.circle;
        let base_draw = fx.method("draw", vec![circle], None);
        let sub_draw = fx.method("draw", vec![circle], None);
        fx.builder.set_ripple_family(&[base_draw, sub_draw]);

        let base_param = fx.var("p", circle, VarKind::Parameter);
        let base_tr = fx.type_ref();
        fx.node(NodeKind::Parameter {
            method: base_draw,
            index: 0,
            var: base_param,
            type_node: base_tr,
        });
        let sub_param = fx.var("p", circle, VarKind::Parameter);
        let sub_tr = fx.type_ref();
        fx.node(NodeKind::Parameter {
            method: sub_draw,
            index: 0,
            var: sub_param,
            type_node: sub_tr,
        });

        let arg_var_ty = arg_ty(&fx);
        let arg_var = fx.var("value", arg_var_ty, VarKind::Local);
        let arg = fx.read(arg_var);
        fx.node(NodeKind::MethodInvocation {
            method: base_draw,
            receiver: None,
            args: vec![arg],
        });
        let fine = fx.var("c", circle, VarKind::Local);
        let fine_arg = fx.read(fine);
        fx.node(NodeKind::MethodInvocation {
            method: sub_draw,
            receiver: None,
            args: vec![fine_arg],
        });
        (fx, base_tr, sub_tr)
    }

    // An Object argument cannot flow into a Shape-typed parameter.
    let (fx, base_tr, sub_tr) = fixture(|fx| fx.object);
    let (outcome, _) = run(fx, &[base_tr, sub_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![base_tr, sub_tr]);

    // With Circle arguments everywhere, both slots generalize together.
    let (fx, base_tr, sub_tr) = fixture(|fx| fx.circle);
    let (outcome, _) = run(fx, &[base_tr, sub_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.safe, vec![base_tr, sub_tr]);
}

#[test]
fn return_slots_are_bundled_across_the_override_family() {
    fn fixture(formal: fn(&Fixture) -> TypeId) -> (Fixture, NodeId, NodeId) {
        let mut fx = Fixture::new();
        let circle = fx.circle;
        let base_self = fx.method("largest", vec![], Some(circle));
        let sub_self = fx.method("largest", vec![], Some(circle));
        fx.builder.set_ripple_family(&[base_self, sub_self]);

        let base_tr = fx.type_ref();
        fx.node(NodeKind::MethodDeclaration {
            method: base_self,
            return_type_node: Some(base_tr),
        });
        let sub_tr = fx.type_ref();
        fx.node(NodeKind::MethodDeclaration {
            method: sub_self,
            return_type_node: Some(sub_tr),
        });

        // One call site of the override feeds a formal of the chosen type.
        let call = fx.node(NodeKind::MethodInvocation {
            method: sub_self,
            receiver: None,
            args: vec![],
        });
        let formal_ty = formal(&fx);
        let sink = fx.method("render", vec![formal_ty], None);
        fx.node(NodeKind::MethodInvocation {
            method: sink,
            receiver: None,
            args: vec![call],
        });
        (fx, base_tr, sub_tr)
    }

    // The call result flows into a Circle-typed formal, so neither member may
    // widen its return type.
    let (fx, base_tr, sub_tr) = fixture(|fx| fx.circle);
    let (outcome, _) = run(fx, &[base_tr, sub_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![base_tr, sub_tr]);

    let (fx, base_tr, sub_tr) = fixture(|fx| fx.shape);
    let (outcome, _) = run(fx, &[base_tr, sub_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.safe, vec![base_tr, sub_tr]);
}

#[test]
fn unresolvable_override_excludes_the_return_slot_conservatively() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let resolved = fx.method("largest", vec![], Some(circle));
    // A ripple sibling the front end could not map back to a declaration.
    let ghost = fx.method("largest", vec![], Some(circle));
    fx.builder.set_ripple_family(&[resolved, ghost]);

    let tr = fx.type_ref();
    fx.node(NodeKind::MethodDeclaration {
        method: resolved,
        return_type_node: Some(tr),
    });

    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![tr]);
}

#[test]
fn cast_type_follows_the_cast_expressions_context() {
    fn fixture(formal: fn(&Fixture) -> TypeId) -> (Fixture, NodeId) {
        let mut fx = Fixture::new();
        let circle = fx.circle;
        let v = fx.var("v", circle, VarKind::Local);
        let operand = fx.read(v);
        let tr = fx.type_ref();
        let cast = fx.node(NodeKind::Cast {
            type_node: tr,
            operand,
        });
        let formal_ty = formal(&fx);
        let sink = fx.method("render", vec![formal_ty], None);
        fx.node(NodeKind::MethodInvocation {
            method: sink,
            receiver: None,
            args: vec![cast],
        });
        (fx, tr)
    }

    let (fx, tr) = fixture(|fx| fx.circle);
    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![tr]);

    let (fx, tr) = fixture(|fx| fx.shape);
    let (outcome, _) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.safe, vec![tr]);
}

#[test]
fn initializer_of_an_excluded_declaration_poisons_its_source() {
    // `Circle u = v;` where u's declaration needs the concrete type: v's
    // declaration cannot generalize either, since its read feeds u's
    // initializer.
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let warp = fx.method("warp", vec![], None);
    let u = fx.var("u", circle, VarKind::Local);
    let v = fx.var("v", circle, VarKind::Local);

    let u_read = fx.read(u);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(u_read),
        args: vec![],
    });
    let v_read = fx.read(v);
    let u_tr = fx.type_ref();
    fx.node(NodeKind::VariableDeclaration {
        kind: VarKind::Local,
        type_node: u_tr,
        fragments: vec![Fragment {
            var: u,
            initializer: Some(v_read),
        }],
    });
    let v_tr = fx.declare(v, VarKind::Local);

    let (outcome, _) = run(fx, &[u_tr, v_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![u_tr, v_tr]);
}

#[test]
fn assignment_into_an_excluded_slot_poisons_its_source() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let warp = fx.method("warp", vec![], None);
    let w = fx.var("w", circle, VarKind::Local);
    let x = fx.var("x", circle, VarKind::Local);

    let w_read = fx.read(w);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(w_read),
        args: vec![],
    });
    let w_tr = fx.declare(w, VarKind::Local);

    let w_target = fx.read(w);
    let x_read = fx.read(x);
    fx.node(NodeKind::Assignment {
        lhs: w_target,
        rhs: x_read,
    });
    let x_tr = fx.declare(x, VarKind::Local);

    let (outcome, _) = run(fx, &[w_tr, x_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![w_tr, x_tr]);
}

#[test]
fn write_access_only_warns() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let v = fx.var("v", circle, VarKind::Local);
    let lhs = fx.read(v);
    let rhs = fx.node(NodeKind::Other { children: vec![] });
    fx.node(NodeKind::Assignment { lhs, rhs });
    let tr = fx.declare(v, VarKind::Local);

    let (outcome, status) = run(fx, &[tr], &TargetMembers::new(), false);
    assert_eq!(outcome.safe, vec![tr]);
    let warnings: Vec<_> = status.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("write access"));
}

#[test]
fn switch_case_label_reference_warns_but_survives() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let v = fx.var("v", circle, VarKind::Local);
    let label = fx.read(v);
    fx.node(NodeKind::SwitchCaseLabel { expr: label });

    let (outcome, status) = run(fx, &[label], &TargetMembers::new(), false);
    assert_eq!(outcome.safe, vec![label]);
    let warnings: Vec<_> = status.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("switch case label"));
}

#[test]
fn return_expression_follows_the_method_return_slot() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let resolved = fx.method("largest", vec![], Some(circle));
    let ghost = fx.method("largest", vec![], Some(circle));
    fx.builder.set_ripple_family(&[resolved, ghost]);

    let ret_tr = fx.type_ref();
    fx.node(NodeKind::MethodDeclaration {
        method: resolved,
        return_type_node: Some(ret_tr),
    });

    let v = fx.var("v", circle, VarKind::Local);
    let v_read = fx.read(v);
    fx.node(NodeKind::Return {
        expr: Some(v_read),
        method: resolved,
    });
    let v_tr = fx.declare(v, VarKind::Local);

    let (outcome, _) = run(fx, &[ret_tr, v_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![ret_tr, v_tr]);
}

#[test]
fn array_dimensions_are_transparent_to_the_declaration_rule() {
    // `Circle[] all;` with a concrete-only use of `all`: the element type
    // node inside the array type is the candidate, and the declaration rule
    // still applies to it.
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let circle_array = fx.table.array_of(circle);
    let warp = fx.method("warp", vec![], None);
    let all = fx.var("all", circle_array, VarKind::Field);

    let read = fx.read(all);
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(read),
        args: vec![],
    });
    let element_tr = fx.type_ref();
    let array_tr = fx.node(NodeKind::ArrayType {
        element: element_tr,
    });
    fx.node(NodeKind::VariableDeclaration {
        kind: VarKind::Field,
        type_node: array_tr,
        fragments: vec![Fragment {
            var: all,
            initializer: None,
        }],
    });

    let (outcome, _) = run(fx, &[element_tr], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![element_tr]);
}

#[test]
fn parentheses_are_transparent_to_receiver_classification() {
    let mut fx = Fixture::new();
    let circle = fx.circle;
    let warp = fx.method("warp", vec![], None);
    let v = fx.var("v", circle, VarKind::Local);
    let read = fx.read(v);
    let parens = fx.node(NodeKind::Parenthesized { inner: read });
    fx.node(NodeKind::MethodInvocation {
        method: warp,
        receiver: Some(parens),
        args: vec![],
    });

    let (outcome, _) = run(fx, &[read], &TargetMembers::new(), false);
    assert_eq!(outcome.removed, vec![read]);
}

#[test]
fn empty_candidate_list_is_a_no_op() {
    let fx = Fixture::new();
    let (outcome, status) = run(fx, &[], &TargetMembers::new(), false);
    assert!(outcome.safe.is_empty());
    assert!(outcome.removed.is_empty());
    assert!(status.entries.is_empty());
}
