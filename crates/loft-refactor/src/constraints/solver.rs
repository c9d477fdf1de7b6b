//! Global constraint-graph solver.
//!
//! Given the full constraint set, the candidate variables typed with the old
//! concrete type, and the generalization target, compute which candidates can
//! be retyped without breaking any constraint. Badness is seeded from subtype
//! constraints whose bound is incompatible with the target, then propagated
//! to a fixpoint.

use std::collections::{HashMap, HashSet};

use loft_core::{CancellationToken, Cancelled};
use loft_types::{TypeEnv, TypeId};

use super::{
    ConstraintOperator, ConstraintSet, ConstraintVariable, SimpleConstraint, TypeConstraint,
    VariableId,
};

/// Partition of the candidate set. `safe` and `bad` are disjoint and together
/// cover exactly the candidates passed to [`solve`], in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Solution {
    pub safe: Vec<VariableId>,
    pub bad: Vec<VariableId>,
}

/// Compatibility of the target with a constraint's bound is queried once per
/// bound type: "can a value statically typed as the target be assigned where
/// this type is expected".
#[derive(Default)]
struct CompatCache {
    results: HashMap<TypeId, bool>,
}

impl CompatCache {
    fn is_compatible(&mut self, env: &dyn TypeEnv, target: TypeId, bound: TypeId) -> bool {
        *self
            .results
            .entry(bound)
            .or_insert_with(|| env.is_assignable(target, bound))
    }
}

pub fn solve(
    set: &ConstraintSet,
    candidates: &[VariableId],
    target: TypeId,
    env: &dyn TypeEnv,
    cancel: &CancellationToken,
) -> Result<Solution, Cancelled> {
    if candidates.is_empty() {
        return Ok(Solution::default());
    }
    let candidate_set: HashSet<VariableId> = candidates.iter().copied().collect();

    let mut compat = CompatCache::default();
    let mut bad: HashSet<VariableId> = HashSet::new();

    for constraint in set.constraints() {
        cancel.check()?;
        match constraint {
            TypeConstraint::Simple(simple) if simple.op == ConstraintOperator::Subtype => {
                if seeds_bad(set, simple, &candidate_set, target, env, &mut compat) {
                    bad.insert(simple.left);
                }
            }
            TypeConstraint::CompositeOr(members) => {
                if let Some(left) =
                    composite_seed(set, members, &candidate_set, target, env, &mut compat)
                {
                    bad.insert(left);
                }
            }
            TypeConstraint::Simple(_) => {}
        }
    }
    tracing::debug!(
        seeds = bad.len(),
        candidates = candidates.len(),
        "constraint seeding complete"
    );

    // No constraint conflicts with the target at all: every candidate is
    // safe, skip propagation entirely.
    if bad.is_empty() {
        return Ok(Solution {
            safe: candidates.to_vec(),
            bad: Vec::new(),
        });
    }

    // Fixpoint. Badness flows backward over subtype edges (from a bad upper
    // bound to anything constrained below it) and forward over equality
    // edges; equality reaches its symmetric closure through repeated passes.
    loop {
        cancel.check()?;
        let mut changed = false;
        for simple in simple_constraints(set) {
            match simple.op {
                ConstraintOperator::Subtype => {
                    if candidate_set.contains(&simple.left)
                        && bad.contains(&simple.right)
                        && !bad.contains(&simple.left)
                    {
                        bad.insert(simple.left);
                        changed = true;
                    }
                }
                ConstraintOperator::Equals | ConstraintOperator::Defines => {
                    if candidate_set.contains(&simple.right)
                        && bad.contains(&simple.left)
                        && !bad.contains(&simple.right)
                    {
                        bad.insert(simple.right);
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    Ok(Solution {
        safe: candidates
            .iter()
            .copied()
            .filter(|id| !bad.contains(id))
            .collect(),
        bad: candidates
            .iter()
            .copied()
            .filter(|id| bad.contains(id))
            .collect(),
    })
}

fn seeds_bad(
    set: &ConstraintSet,
    simple: &SimpleConstraint,
    candidates: &HashSet<VariableId>,
    target: TypeId,
    env: &dyn TypeEnv,
    compat: &mut CompatCache,
) -> bool {
    if !matches!(
        set.get(simple.left),
        ConstraintVariable::Expression { .. } | ConstraintVariable::TypeRef { .. }
    ) {
        return false;
    }
    if !candidates.contains(&simple.left) {
        return false;
    }
    // A bound that is itself being retyped stays consistent with the left
    // side; it never seeds.
    if candidates.contains(&simple.right) {
        return false;
    }
    let right = set.get(simple.right);
    // An unresolvable declaring type is harmless (e.g. `.length` on an
    // array receiver).
    if matches!(right, ConstraintVariable::DeclaringType { ty: None }) {
        return false;
    }
    let Some(bound) = right.ty() else {
        return false;
    };
    !compat.is_compatible(env, target, bound)
}

/// Seeding rule for a composite bundle, preserved exactly: every member must
/// be a subtype constraint, all members must share one candidate expression
/// on the left, and no member's bound may be compatible with the target. A
/// single compatible branch keeps the whole bundle unseeded. This is neither
/// a logical AND nor OR of the members; do not simplify it.
fn composite_seed(
    set: &ConstraintSet,
    members: &[SimpleConstraint],
    candidates: &HashSet<VariableId>,
    target: TypeId,
    env: &dyn TypeEnv,
    compat: &mut CompatCache,
) -> Option<VariableId> {
    let first = members.first()?;
    if members
        .iter()
        .any(|member| member.op != ConstraintOperator::Subtype)
    {
        return None;
    }
    let left = first.left;
    if members.iter().any(|member| member.left != left) {
        return None;
    }
    if !matches!(set.get(left), ConstraintVariable::Expression { .. }) {
        return None;
    }
    if !candidates.contains(&left) {
        return None;
    }
    let any_compatible = members.iter().any(|member| {
        set.get(member.right)
            .ty()
            .is_some_and(|bound| compat.is_compatible(env, target, bound))
    });
    if any_compatible {
        None
    } else {
        Some(left)
    }
}

fn simple_constraints(set: &ConstraintSet) -> impl Iterator<Item = &SimpleConstraint> {
    set.constraints().iter().flat_map(|constraint| match constraint {
        TypeConstraint::Simple(simple) => std::slice::from_ref(simple).iter(),
        TypeConstraint::CompositeOr(members) => members.iter(),
    })
}
