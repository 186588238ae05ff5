//! Variables, closure givers and name lookup
//!
//! Every closure giver node (module, package, function body, class body and
//! contraction body) owns a [`Scope`]. Scopes hand out variables through the
//! lookup methods on [`ModuleTree`]; the closure resolution phases in
//! [`closure`] decide which lookup each name occurrence goes through.

pub mod closure;

use crate::ast::{ContractionKind, ModuleTree, NodeId, NodeKind};
use crate::config::LanguageLevel;
use crate::string_interner::StringId;
use id_arena::{Arena, Id};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::ops::{Index, IndexMut};
use tracing::trace;

/// Builtins that can see the calling scope's local variables
const DYNAMIC_BUILTINS: &[&str] = &["locals", "eval", "exec", "vars"];

pub type VariableId = Id<Variable>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Module,
    Local,
    Parameter,
    ClassAttribute,
    Temporary,
    /// Local only if dynamic code creates it, else `fallback`
    MaybeLocal { fallback: VariableId },
    /// Use of `target` from a nested scope
    ClosureReference { target: VariableId },
}

/// A named binding owned by one scope
#[derive(Debug)]
pub struct Variable {
    /// Absent only for temporaries
    pub name: Option<StringId>,
    pub owner: NodeId,
    pub kind: VariableKind,
    /// Scopes that reference this variable through a closure
    pub closure_takers: IndexSet<NodeId>,
    next_version: Cell<u32>,
}

impl Variable {
    pub fn new(name: Option<StringId>, owner: NodeId, kind: VariableKind) -> Self {
        Self {
            name,
            owner,
            kind,
            closure_takers: IndexSet::new(),
            next_version: Cell::new(0),
        }
    }

    /// Next trace version; never hands out the same number twice
    pub fn allocate_version(&self) -> u32 {
        let version = self.next_version.get();
        self.next_version.set(version + 1);
        version
    }

    pub fn is_module(&self) -> bool {
        self.kind == VariableKind::Module
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == VariableKind::Temporary
    }

    pub fn is_closure_reference(&self) -> bool {
        matches!(self.kind, VariableKind::ClosureReference { .. })
    }

    /// Shared with nested scopes, so foreign code may change it
    pub fn is_shared(&self) -> bool {
        !self.closure_takers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct VariableRegistry {
    variables: Arena<Variable>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, variable: Variable) -> VariableId {
        self.variables.alloc(variable)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.len() == 0
    }

    /// The non-closure variable behind `id`
    pub fn resolve(&self, id: VariableId) -> VariableId {
        let mut current = id;
        while let VariableKind::ClosureReference { target } = self.variables[current].kind {
            current = target;
        }
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables.iter()
    }
}

impl Index<VariableId> for VariableRegistry {
    type Output = Variable;

    fn index(&self, id: VariableId) -> &Variable {
        &self.variables[id]
    }
}

impl IndexMut<VariableId> for VariableRegistry {
    fn index_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
    Contraction(ContractionKind),
}

/// Closure giver state
#[derive(Debug)]
pub struct Scope {
    pub node: NodeId,
    pub kind: ScopeKind,
    pub providing: IndexMap<StringId, VariableId>,
    /// Variables used from enclosing scopes, keyed by name
    pub taken: IndexMap<StringId, VariableId>,
    pub global_names: IndexSet<StringId>,
    /// Fixed per kind: module and class bodies bind references immediately
    pub early_closure: bool,
    pub has_unqualified_exec: bool,
    pub needs_locals_dict: bool,
    pub temporaries: Vec<VariableId>,
}

impl Scope {
    pub fn new(node: NodeId, kind: &NodeKind) -> Self {
        let kind = match kind {
            NodeKind::Module { .. } | NodeKind::Package { .. } => ScopeKind::Module,
            NodeKind::FunctionBody { .. } => ScopeKind::Function,
            NodeKind::ClassBody { .. } => ScopeKind::Class,
            NodeKind::ContractionBody { kind, .. } => ScopeKind::Contraction(*kind),
            other => panic!("{} is not a closure giver", other.tag().kind_name()),
        };
        Self {
            node,
            kind,
            providing: IndexMap::new(),
            taken: IndexMap::new(),
            global_names: IndexSet::new(),
            early_closure: matches!(kind, ScopeKind::Module | ScopeKind::Class),
            has_unqualified_exec: false,
            needs_locals_dict: false,
            temporaries: Vec::new(),
        }
    }

    pub fn is_module(&self) -> bool {
        self.kind == ScopeKind::Module
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self.kind, ScopeKind::Function | ScopeKind::Contraction(_))
    }

    /// Closure references to non-module variables
    pub fn free_variables<'a>(&'a self, variables: &'a VariableRegistry) -> impl Iterator<Item = VariableId> + 'a {
        self.taken
            .values()
            .copied()
            .filter(move |v| variables[*v].is_closure_reference())
    }
}

#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: FxHashMap<NodeId, Scope>,
}

impl ScopeTable {
    pub fn insert(&mut self, scope: Scope) {
        let previous = self.scopes.insert(scope.node, scope);
        assert!(previous.is_none(), "closure giver registered twice");
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.scopes.contains_key(&node)
    }

    pub fn try_get(&self, node: NodeId) -> Option<&Scope> {
        self.scopes.get(&node)
    }

    /// Panics when `node` is not a closure giver
    pub fn get(&self, node: NodeId) -> &Scope {
        self.scopes
            .get(&node)
            .unwrap_or_else(|| panic!("no scope registered for node {}", node.index()))
    }

    pub fn get_mut(&mut self, node: NodeId) -> &mut Scope {
        self.scopes
            .get_mut(&node)
            .unwrap_or_else(|| panic!("no scope registered for node {}", node.index()))
    }

    /// Scope nodes in allocation order
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.scopes.keys().copied().collect();
        nodes.sort_by_key(|n| n.index());
        nodes
    }
}

impl ModuleTree {
    fn scope_parent(&self, scope: NodeId) -> Option<NodeId> {
        self.enclosing_scope(scope)
    }

    /// Module variable for `name`, created on first request
    pub fn module_variable(&mut self, name: StringId) -> VariableId {
        let root = self.root();
        if let Some(variable) = self.scopes.get(root).providing.get(&name) {
            return *variable;
        }
        let variable = self
            .variables
            .alloc(Variable::new(Some(name), root, VariableKind::Module));
        self.scopes.get_mut(root).providing.insert(name, variable);
        trace!(name = self.interner.resolve(name), "created module variable");
        variable
    }

    fn provide(&mut self, scope: NodeId, name: StringId, kind: VariableKind) -> VariableId {
        if let Some(variable) = self.scopes.get(scope).providing.get(&name) {
            return *variable;
        }
        let variable = self.variables.alloc(Variable::new(Some(name), scope, kind));
        self.scopes.get_mut(scope).providing.insert(name, variable);
        variable
    }

    /// Record `target` as taken by `scope`
    ///
    /// Module variables are used directly; anything else is wrapped in a
    /// closure reference owned by the taking scope.
    fn take_closure(&mut self, scope: NodeId, name: StringId, target: VariableId) -> VariableId {
        if let Some(existing) = self.scopes.get(scope).taken.get(&name) {
            return *existing;
        }
        let target = self.variables.resolve(target);
        let taken = if self.variables[target].is_module() {
            target
        } else {
            self.variables[target].closure_takers.insert(scope);
            self.variables.alloc(Variable::new(
                Some(name),
                scope,
                VariableKind::ClosureReference { target },
            ))
        };
        self.scopes.get_mut(scope).taken.insert(name, taken);
        taken
    }

    /// Register a function parameter
    pub fn add_parameter(&mut self, scope: NodeId, name: StringId) -> VariableId {
        self.provide(scope, name, VariableKind::Parameter)
    }

    /// Variable an assignment to `name` in `scope` writes
    pub fn get_variable_for_assignment(&mut self, scope: NodeId, name: StringId) -> VariableId {
        if self.scopes.get(scope).global_names.contains(&name) {
            return self.module_variable(name);
        }

        match self.scopes.get(scope).kind {
            ScopeKind::Module => self.module_variable(name),
            ScopeKind::Class => self.provide(scope, name, VariableKind::ClassAttribute),
            ScopeKind::Function => self.provide(scope, name, VariableKind::Local),
            ScopeKind::Contraction(kind) => {
                // Python 2 list comprehensions bind their target in the
                // enclosing scope.
                if kind == ContractionKind::List && self.language_level == LanguageLevel::Python27 {
                    if let Some(parent) = self.scope_parent(scope) {
                        let outer = self.get_variable_for_assignment(parent, name);
                        return self.take_closure(scope, name, outer);
                    }
                }
                self.provide(scope, name, VariableKind::Local)
            }
        }
    }

    /// Variable a reference to `name` in `scope` reads
    pub fn get_variable_for_reference(&mut self, scope: NodeId, name: StringId) -> VariableId {
        if self.scopes.get(scope).global_names.contains(&name) {
            return self.module_variable(name);
        }
        if let Some(variable) = self.scopes.get(scope).providing.get(&name) {
            return *variable;
        }
        if let Some(variable) = self.scopes.get(scope).taken.get(&name) {
            return *variable;
        }

        if self.scopes.get(scope).is_module() {
            return self.module_variable(name);
        }

        let outer = match self.scope_parent(scope) {
            Some(parent) => self.get_variable_for_closure(parent, name),
            None => self.module_variable(name),
        };
        let taken = self.take_closure(scope, name, outer);

        let scope_state = self.scopes.get(scope);
        if !scope_state.early_closure && scope_state.has_unqualified_exec {
            return self.provide(scope, name, VariableKind::MaybeLocal { fallback: taken });
        }
        taken
    }

    /// Variable `name` that `scope` provides to a nested scope
    ///
    /// Recurses outward until a scope claims the name; the module claims
    /// everything. Class bodies never provide to nested scopes. Function-like
    /// scopes on the way record the variable as taken.
    pub fn get_variable_for_closure(&mut self, scope: NodeId, name: StringId) -> VariableId {
        let kind = self.scopes.get(scope).kind;
        if kind == ScopeKind::Class {
            return match self.scope_parent(scope) {
                Some(parent) => self.get_variable_for_closure(parent, name),
                None => self.module_variable(name),
            };
        }
        if self.scopes.get(scope).global_names.contains(&name) {
            return self.module_variable(name);
        }
        if let Some(variable) = self.scopes.get(scope).providing.get(&name) {
            return self.variables.resolve(*variable);
        }
        if kind == ScopeKind::Module {
            return self.module_variable(name);
        }
        if let Some(variable) = self.scopes.get(scope).taken.get(&name) {
            return self.variables.resolve(*variable);
        }

        let outer = match self.scope_parent(scope) {
            Some(parent) => self.get_variable_for_closure(parent, name),
            None => self.module_variable(name),
        };
        self.take_closure(scope, name, outer);
        outer
    }

    /// Force `name` to the module binding for all of `scope`
    pub fn declare_global(&mut self, scope: NodeId, name: StringId) -> VariableId {
        let module_variable = self.module_variable(name);
        self.scopes.get_mut(scope).global_names.insert(name);

        let mut current = Some(scope);
        while let Some(node) = current {
            if self.scopes.get(node).is_module() {
                break;
            }
            self.scopes.get_mut(node).taken.entry(name).or_insert(module_variable);
            current = self.scope_parent(node);
        }
        module_variable
    }

    /// New unnamed variable owned by `scope`
    pub fn allocate_temp_variable(&mut self, scope: NodeId) -> VariableId {
        let variable = self
            .variables
            .alloc(Variable::new(None, scope, VariableKind::Temporary));
        self.scopes.get_mut(scope).temporaries.push(variable);
        variable
    }

    /// Variable a name node resolved to, if any
    pub fn node_variable(&self, id: NodeId) -> Option<VariableId> {
        match self.kind(id) {
            NodeKind::VariableRef { variable, .. } | NodeKind::TargetVariableRef { variable, .. } => *variable,
            NodeKind::TempVariableRef { variable } | NodeKind::TargetTempVariableRef { variable } => {
                Some(*variable)
            }
            _ => None,
        }
    }

    /// Name reference to a module-level `locals`, `eval`, `exec` or `vars`
    ///
    /// Until builtin folding proves the name is the builtin, calling it may
    /// read the caller's locals.
    pub fn names_dynamic_builtin(&self, id: NodeId) -> bool {
        let NodeKind::VariableRef {
            variable: Some(variable),
            ..
        } = self.kind(id)
        else {
            return false;
        };
        let target = &self.variables[self.variables.resolve(*variable)];
        target.kind == VariableKind::Module
            && target
                .name
                .is_some_and(|name| DYNAMIC_BUILTINS.contains(&self.interner.resolve(name)))
    }

    /// Display name of a variable, temporaries included
    pub fn variable_name(&self, variable: VariableId) -> String {
        match self.variables[variable].name {
            Some(name) => self.interner.resolve(name).to_string(),
            None => format!("<tmp#{}>", variable.index()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ContractionKind;

    fn function_tree() -> (ModuleTree, NodeId) {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let pass = b.pass();
        let def = b.def("f", &[], vec![pass]);
        b.set_body(vec![def]);
        let function = tree
            .descendants(tree.root())
            .into_iter()
            .find(|id| matches!(tree.kind(*id), NodeKind::FunctionBody { .. }))
            .unwrap();
        (tree, function)
    }

    #[test]
    fn test_one_variable_per_owner_and_name() {
        let (mut tree, function) = function_tree();
        let x = tree.interner.intern("x");
        let first = tree.get_variable_for_assignment(function, x);
        let second = tree.get_variable_for_assignment(function, x);
        assert_eq!(first, second);
        assert_eq!(tree.variables[first].kind, VariableKind::Local);
        assert_eq!(tree.variables[first].owner, function);
    }

    #[test]
    fn test_closure_request_reaches_module() {
        let (mut tree, function) = function_tree();
        let x = tree.interner.intern("x");
        let variable = tree.get_variable_for_reference(function, x);
        assert!(tree.variables[variable].is_module());
        assert_eq!(tree.scopes.get(function).taken.get(&x), Some(&variable));
    }

    #[test]
    fn test_declare_global_forces_module_binding() {
        let (mut tree, function) = function_tree();
        let x = tree.interner.intern("x");
        tree.declare_global(function, x);
        let assigned = tree.get_variable_for_assignment(function, x);
        assert!(tree.variables[assigned].is_module());
        assert_eq!(tree.variables[assigned].owner, tree.root());
    }

    #[test]
    fn test_versions_are_monotonic() {
        let (mut tree, function) = function_tree();
        let temp = tree.allocate_temp_variable(function);
        let a = tree.variables[temp].allocate_version();
        let b = tree.variables[temp].allocate_version();
        assert!(b > a);
        assert!(tree.variables[temp].name.is_none());
    }

    #[test]
    fn test_early_closure_is_fixed_per_kind() {
        let (tree, function) = function_tree();
        assert!(tree.scopes.get(tree.root()).early_closure);
        assert!(!tree.scopes.get(function).early_closure);
        let generator = NodeKind::ContractionBody {
            kind: ContractionKind::Generator,
            target: function,
            conditions: vec![],
            element: function,
        };
        assert!(!Scope::new(function, &generator).early_closure);
    }
}
