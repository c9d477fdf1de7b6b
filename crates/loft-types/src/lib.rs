//! Symbol identities and type queries for Loft.
//!
//! The compiler front end that resolves source to type symbols is an external
//! collaborator; this crate defines the identities those symbols are reported
//! under ([`TypeId`], [`MethodId`], [`VarId`]) and the assignability oracle
//! ([`TypeEnv`]) the analysis engines query. [`TypeTable`] is a concrete,
//! buildable implementation used by integration hosts and tests.

use std::collections::HashMap;
use std::fmt;

/// Identity of a resolved type symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }

    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Identity of a resolved method symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    pub fn from_raw(raw: u32) -> Self {
        MethodId(raw)
    }

    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

/// Identity of a resolved variable symbol (local, parameter, or field).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    pub fn from_raw(raw: u32) -> Self {
        VarId(raw)
    }

    #[must_use]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

/// Declared access level of a member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Package,
    Private,
}

/// Assignability and identity queries over resolved type symbols.
///
/// Implementations answer "is a value statically typed `sub` assignable where
/// `sup` is expected". The engines never type-check; they only consult this
/// oracle over already-resolved symbols.
pub trait TypeEnv {
    fn is_assignable(&self, sub: TypeId, sup: TypeId) -> bool;

    /// The element type of an array type, `None` for non-array types.
    fn element_type(&self, ty: TypeId) -> Option<TypeId>;

    /// The implicit root reference type (`java.lang.Object` in a Java host),
    /// if the environment designates one.
    fn root_type(&self) -> Option<TypeId>;

    fn qualified_name(&self, ty: TypeId) -> &str;

    fn simple_name(&self, ty: TypeId) -> &str;

    /// The package a type lives in; `None` for the default package and for
    /// array types.
    fn package_of(&self, ty: TypeId) -> Option<&str>;

    /// Strips any number of array dimensions off `ty`.
    fn innermost_element(&self, ty: TypeId) -> TypeId {
        let mut current = ty;
        while let Some(element) = self.element_type(current) {
            current = element;
        }
        current
    }
}

#[derive(Clone, Debug)]
struct TypeData {
    qualified: String,
    simple: String,
    package: Option<String>,
    supertypes: Vec<TypeId>,
    element: Option<TypeId>,
}

/// A concrete, buildable [`TypeEnv`].
///
/// Hosts populate the table from their resolved class hierarchy; tests build
/// small hierarchies inline. Assignability is the reflexive-transitive closure
/// of the declared supertype edges, with covariant array assignability and an
/// optional designated root type every reference type converts to.
#[derive(Clone, Debug, Default)]
pub struct TypeTable {
    types: Vec<TypeData>,
    by_name: HashMap<String, TypeId>,
    arrays: HashMap<TypeId, TypeId>,
    root: Option<TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type by qualified name. Re-adding an existing name returns the
    /// original id.
    pub fn add_type(&mut self, qualified: &str) -> TypeId {
        if let Some(&id) = self.by_name.get(qualified) {
            return id;
        }
        let (package, simple) = match qualified.rsplit_once('.') {
            Some((package, simple)) => (Some(package.to_string()), simple.to_string()),
            None => (None, qualified.to_string()),
        };
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeData {
            qualified: qualified.to_string(),
            simple,
            package,
            supertypes: Vec::new(),
            element: None,
        });
        self.by_name.insert(qualified.to_string(), id);
        id
    }

    /// Record a declared supertype edge (extends or implements).
    pub fn add_supertype(&mut self, ty: TypeId, supertype: TypeId) {
        let data = &mut self.types[ty.idx()];
        if !data.supertypes.contains(&supertype) {
            data.supertypes.push(supertype);
        }
    }

    /// Intern the array type of `element`.
    pub fn array_of(&mut self, element: TypeId) -> TypeId {
        if let Some(&id) = self.arrays.get(&element) {
            return id;
        }
        let qualified = format!("{}[]", self.types[element.idx()].qualified);
        let simple = format!("{}[]", self.types[element.idx()].simple);
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeData {
            qualified: qualified.clone(),
            simple,
            package: None,
            supertypes: Vec::new(),
            element: Some(element),
        });
        self.by_name.insert(qualified, id);
        self.arrays.insert(element, id);
        id
    }

    /// Designate the implicit root type every reference type converts to.
    pub fn set_root(&mut self, ty: TypeId) {
        self.root = Some(ty);
    }

    pub fn lookup(&self, qualified: &str) -> Option<TypeId> {
        self.by_name.get(qualified).copied()
    }
}

impl TypeEnv for TypeTable {
    fn is_assignable(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        if Some(sup) == self.root {
            return true;
        }
        // Arrays are covariant: T[] converts to S[] iff T converts to S.
        if let (Some(sub_elem), Some(sup_elem)) = (
            self.types[sub.idx()].element,
            self.types[sup.idx()].element,
        ) {
            return self.is_assignable(sub_elem, sup_elem);
        }
        let mut stack = vec![sub];
        let mut visited = vec![false; self.types.len()];
        while let Some(current) = stack.pop() {
            if visited[current.idx()] {
                continue;
            }
            visited[current.idx()] = true;
            for &supertype in &self.types[current.idx()].supertypes {
                if supertype == sup {
                    return true;
                }
                stack.push(supertype);
            }
        }
        false
    }

    fn element_type(&self, ty: TypeId) -> Option<TypeId> {
        self.types[ty.idx()].element
    }

    fn root_type(&self) -> Option<TypeId> {
        self.root
    }

    fn qualified_name(&self, ty: TypeId) -> &str {
        &self.types[ty.idx()].qualified
    }

    fn simple_name(&self, ty: TypeId) -> &str {
        &self.types[ty.idx()].simple
    }

    fn package_of(&self, ty: TypeId) -> Option<&str> {
        self.types[ty.idx()].package.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> (TypeTable, TypeId, TypeId, TypeId) {
        let mut table = TypeTable::new();
        let object = table.add_type("java.lang.Object");
        let iface = table.add_type("com.example.Shape");
        let concrete = table.add_type("com.example.Circle");
        table.add_supertype(iface, object);
        table.add_supertype(concrete, iface);
        table.set_root(object);
        (table, object, iface, concrete)
    }

    #[test]
    fn assignability_follows_declared_supertypes() {
        let (table, object, iface, concrete) = sample_table();
        assert!(table.is_assignable(concrete, iface));
        assert!(table.is_assignable(concrete, object));
        assert!(table.is_assignable(iface, object));
        assert!(!table.is_assignable(iface, concrete));
    }

    #[test]
    fn arrays_are_covariant_and_convert_to_root() {
        let (mut table, object, iface, concrete) = sample_table();
        let concrete_array = table.array_of(concrete);
        let iface_array = table.array_of(iface);
        assert!(table.is_assignable(concrete_array, iface_array));
        assert!(!table.is_assignable(iface_array, concrete_array));
        assert!(table.is_assignable(iface_array, object));
        assert_eq!(table.innermost_element(concrete_array), concrete);
    }

    #[test]
    fn names_and_packages() {
        let (mut table, _, iface, _) = sample_table();
        assert_eq!(table.qualified_name(iface), "com.example.Shape");
        assert_eq!(table.simple_name(iface), "Shape");
        assert_eq!(table.package_of(iface), Some("com.example"));
        let unpackaged = table.add_type("Standalone");
        assert_eq!(table.package_of(unpackaged), None);
    }
}
