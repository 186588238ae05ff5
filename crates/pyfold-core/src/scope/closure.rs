//! Three-phase closure resolution
//!
//! 1. global declarations bind their names and become `pass`
//! 2. assignment targets, parameters and references in early scopes
//! 3. every remaining reference, all inside late scopes
//!
//! Static checks run after the last phase.

use crate::ast::{ContractionKind, ModuleTree, NodeId, NodeKind};
use crate::config::LanguageLevel;
use crate::errors::CompilationError;
use crate::scope::ScopeKind;
use crate::visitor::{visit_tree, TreeVisitor, VisitControl};
use tracing::debug;

/// Resolve every name of a module
pub fn resolve_closures(tree: &mut ModuleTree) -> Result<(), CompilationError> {
    let root = tree.root();
    resolve_subtree(tree, root)
}

/// Resolve names below `start`, e.g. code inlined from a constant exec
pub fn resolve_subtree(tree: &mut ModuleTree, start: NodeId) -> Result<(), CompilationError> {
    debug!(module = tree.name(), "closure phase 1: global declarations");
    visit_tree(tree, start, &mut GlobalsPhase)?;

    debug!(module = tree.name(), "closure phase 2: assignments and early references");
    if let Some(scope) = enclosing_late_scope(tree, start) {
        prescan_targets(tree, scope);
    }
    resolve_assignments(tree, start);

    debug!(module = tree.name(), "closure phase 3: late references");
    visit_tree(tree, start, &mut ReferencePhase)?;

    check_static_constraints(tree, start)
}

/// Late scope that will own code inserted at `start`
fn enclosing_late_scope(tree: &ModuleTree, start: NodeId) -> Option<NodeId> {
    if start == tree.root() {
        return None;
    }
    let scope = tree.enclosing_scope(start)?;
    if tree.scopes.get(scope).early_closure {
        None
    } else {
        Some(scope)
    }
}

struct GlobalsPhase;

impl TreeVisitor for GlobalsPhase {
    fn on_enter(&mut self, tree: &mut ModuleTree, node: NodeId) -> Result<VisitControl, CompilationError> {
        match tree.kind(node) {
            NodeKind::GlobalDeclaration { names } => {
                let names = names.clone();
                let scope = tree.owning_scope(node);
                for name in names {
                    tree.declare_global(scope, name);
                }
                let location = tree.location(node).clone();
                let pass = tree.alloc(NodeKind::Pass, location);
                tree.replace_node(node, pass);
            }
            NodeKind::Exec { globals: None, .. } => {
                let scope = tree.owning_scope(node);
                tree.scopes.get_mut(scope).has_unqualified_exec = true;
            }
            _ => {}
        }
        Ok(VisitControl::Continue)
    }
}

fn is_leaking_contraction(tree: &ModuleTree, node: NodeId) -> bool {
    tree.language_level == LanguageLevel::Python27
        && matches!(
            tree.kind(node),
            NodeKind::ContractionBody {
                kind: ContractionKind::List,
                ..
            }
        )
}

/// Bind every assignment target of a late scope before anything nested is
/// resolved, so nested early scopes see the final set of locals
fn prescan_targets(tree: &mut ModuleTree, scope: NodeId) {
    let mut stack = tree.children(scope);
    while let Some(node) = stack.pop() {
        let kind = tree.kind(node);
        if kind.is_closure_giver() {
            if is_leaking_contraction(tree, node) {
                if let NodeKind::ContractionBody { target, .. } = kind {
                    stack.push(*target);
                }
            }
            continue;
        }
        if let NodeKind::TargetVariableRef { name, variable: None } = *kind {
            let owner = tree.owning_scope(node);
            let variable = tree.get_variable_for_assignment(owner, name);
            set_variable(tree, node, variable);
        }
        stack.extend(tree.children(node));
    }
}

fn resolve_assignments(tree: &mut ModuleTree, node: NodeId) {
    match tree.kind(node) {
        NodeKind::FunctionBody { parameters, .. } => {
            for parameter in parameters.clone() {
                tree.add_parameter(node, parameter);
            }
            prescan_targets(tree, node);
        }
        NodeKind::ContractionBody { .. } => prescan_targets(tree, node),
        NodeKind::TargetVariableRef { name, variable: None } => {
            let name = *name;
            let scope = tree.owning_scope(node);
            let variable = tree.get_variable_for_assignment(scope, name);
            set_variable(tree, node, variable);
        }
        NodeKind::VariableRef { name, variable: None, .. } => {
            let name = *name;
            let scope = tree.owning_scope(node);
            if tree.scopes.get(scope).early_closure {
                let variable = tree.get_variable_for_reference(scope, name);
                set_variable(tree, node, variable);
            }
        }
        _ => {}
    }

    for child in tree.children_in_evaluation_order(node) {
        resolve_assignments(tree, child);
    }
}

struct ReferencePhase;

impl TreeVisitor for ReferencePhase {
    fn on_enter(&mut self, tree: &mut ModuleTree, node: NodeId) -> Result<VisitControl, CompilationError> {
        if let NodeKind::VariableRef { name, variable: None, .. } = *tree.kind(node) {
            let scope = tree.owning_scope(node);
            let variable = tree.get_variable_for_reference(scope, name);
            set_variable(tree, node, variable);
        }
        Ok(VisitControl::Continue)
    }
}

fn set_variable(tree: &mut ModuleTree, node: NodeId, resolved: crate::scope::VariableId) {
    match tree.kind_mut(node) {
        NodeKind::VariableRef { variable, .. } | NodeKind::TargetVariableRef { variable, .. } => {
            *variable = Some(resolved);
        }
        other => panic!("{} does not name a variable", other.tag().kind_name()),
    }
}

fn function_name(tree: &ModuleTree, function: NodeId) -> String {
    match tree.kind(function) {
        NodeKind::FunctionBody { name, .. } => tree.resolve_name(*name).to_string(),
        _ => String::from("<scope>"),
    }
}

fn has_free_variables(tree: &ModuleTree, scope: NodeId) -> bool {
    tree.scopes.get(scope).free_variables(&tree.variables).next().is_some()
}

fn check_static_constraints(tree: &ModuleTree, start: NodeId) -> Result<(), CompilationError> {
    let nodes = tree.descendants(start);

    for &function in &nodes {
        if !matches!(tree.kind(function), NodeKind::FunctionBody { .. }) {
            continue;
        }
        if !tree.scopes.get(function).has_unqualified_exec {
            continue;
        }

        let location = nodes
            .iter()
            .find(|id| {
                matches!(tree.kind(**id), NodeKind::Exec { globals: None, .. })
                    && tree.owning_scope(**id) == function
            })
            .map(|id| tree.location(*id).clone())
            .unwrap_or_else(|| tree.location(function).clone());
        let name = function_name(tree, function);

        let is_nested = tree
            .enclosing_scope(function)
            .is_some_and(|parent| tree.scopes.get(parent).is_function_like());
        if is_nested && has_free_variables(tree, function) {
            return Err(CompilationError::semantic(
                &location,
                format!("unqualified exec is not allowed in function '{name}' because it is a nested function"),
            ));
        }

        let nested_with_free_variables = tree.descendants(function).into_iter().any(|inner| {
            inner != function
                && tree
                    .scopes
                    .try_get(inner)
                    .is_some_and(|scope| scope.kind == ScopeKind::Function && has_free_variables(tree, inner))
        });
        if nested_with_free_variables {
            return Err(CompilationError::semantic(
                &location,
                format!(
                    "unqualified exec is not allowed in function '{name}' because it contains a nested function with free variables"
                ),
            ));
        }
    }

    if tree.language_level == LanguageLevel::Python27 {
        for &node in &nodes {
            let NodeKind::DelVariable { target } = tree.kind(node) else {
                continue;
            };
            let Some(variable) = tree.node_variable(*target) else {
                continue;
            };
            let resolved = tree.variables.resolve(variable);
            if tree.variables[resolved].is_shared() {
                return Err(CompilationError::semantic(
                    tree.location(node),
                    format!(
                        "can not delete variable '{}' referenced in nested scope",
                        tree.variable_name(resolved)
                    ),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::VariableKind;

    fn find(tree: &ModuleTree, predicate: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        tree.descendants(tree.root())
            .into_iter()
            .filter(|id| predicate(tree.kind(*id)))
            .collect()
    }

    #[test]
    fn test_global_declaration_becomes_pass() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let global = b.global(&["x"]);
        let five = b.constant(5);
        let assign = b.assign("x", five);
        let def = b.def("f", &[], vec![global, assign]);
        b.set_body(vec![def]);

        resolve_closures(&mut tree).unwrap();

        assert!(find(&tree, |k| matches!(k, NodeKind::GlobalDeclaration { .. })).is_empty());
        let targets = find(&tree, |k| matches!(k, NodeKind::TargetVariableRef { .. }));
        let inner_target = targets
            .iter()
            .copied()
            .find(|t| tree.owning_scope(*t) != tree.root())
            .unwrap();
        let variable = tree.node_variable(inner_target).unwrap();
        assert_eq!(tree.variables[variable].kind, VariableKind::Module);
    }

    #[test]
    fn test_class_body_references_outer_before_local_assignment() {
        // x = 1
        // class C:
        //     y = x
        //     x = 2
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let outer = b.assign("x", one);
        let read = b.name("x");
        let y = b.assign("y", read);
        let two = b.constant(2);
        let inner = b.assign("x", two);
        let class = b.class("C", vec![], vec![y, inner]);
        b.set_body(vec![outer, class]);

        resolve_closures(&mut tree).unwrap();

        let variable = tree.node_variable(read).unwrap();
        assert!(tree.variables[variable].is_module());
    }

    #[test]
    fn test_function_reference_sees_later_local_assignment() {
        // def f():
        //     y = x
        //     x = 2
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let read = b.name("x");
        let y = b.assign("y", read);
        let two = b.constant(2);
        let x = b.assign("x", two);
        let def = b.def("f", &[], vec![y, x]);
        b.set_body(vec![def]);

        resolve_closures(&mut tree).unwrap();

        let variable = tree.node_variable(read).unwrap();
        assert_eq!(tree.variables[variable].kind, VariableKind::Local);
    }

    #[test]
    fn test_unqualified_exec_in_nested_function_is_rejected() {
        // def outer():
        //     v = 1
        //     def inner():
        //         exec "pass"
        //         return v
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let code = b.constant("pass");
        let exec = b.exec(code, None, None);
        let v = b.name("v");
        let ret = b.ret(Some(v));
        let inner = b.def("inner", &[], vec![exec, ret]);
        let one = b.constant(1);
        let assign = b.assign("v", one);
        let outer = b.def("outer", &[], vec![assign, inner]);
        b.set_body(vec![outer]);

        let error = resolve_closures(&mut tree).unwrap_err();
        assert!(error.to_string().contains("because it is a nested function"));
    }

    #[test]
    fn test_py2_delete_of_shared_variable_is_rejected() {
        // def f():
        //     v = 1
        //     def g():
        //         return v
        //     del v
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let assign = b.assign("v", one);
        let v = b.name("v");
        let ret = b.ret(Some(v));
        let g = b.def("g", &[], vec![ret]);
        let del = b.del("v");
        let f = b.def("f", &[], vec![assign, g, del]);
        b.set_body(vec![f]);

        let error = resolve_closures(&mut tree).unwrap_err();
        assert!(error.to_string().contains("referenced in nested scope"));
    }

    #[test]
    fn test_py2_list_contraction_target_leaks() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let items = b.name("items");
        let element = b.name("i");
        let contraction = b.contraction(ContractionKind::List, "i", items, vec![], element);
        let assign = b.assign("r", contraction);
        b.set_body(vec![assign]);

        resolve_closures(&mut tree).unwrap();

        let variable = tree.node_variable(element).unwrap();
        assert!(tree.variables[tree.variables.resolve(variable)].is_module());
    }
}
