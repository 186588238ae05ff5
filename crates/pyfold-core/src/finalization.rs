//! One-shot completion of a module before code generation
//!
//! Optimization may remove the last use of a closure variable or move
//! control flow around `try`/`finally`. Finalization recomputes the facts the
//! code generator relies on from the final tree:
//!
//! - closure entries no code uses any more are dropped
//! - scopes that run dynamic code get a locals dictionary
//! - `break`, `continue` and `return` crossing a `finally` are marked
//! - bare `raise` directly inside a handler re-raises the handled exception

use crate::ast::{ModuleTree, NodeId, NodeKind};
use crate::scope::{ScopeKind, VariableId, VariableKind};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

pub fn finalize_module(tree: &mut ModuleTree) {
    complete_closures(tree);
    mark_locals_dicts(tree);
    mark_control_exits(tree);
    mark_local_reraises(tree);

    if let Err(problem) = tree.verify_parents() {
        panic!("module {} is inconsistent after finalization: {problem}", tree.name());
    }
    debug!(module = tree.name(), nodes = tree.node_count(), "module finalized");
}

fn attached_scopes(tree: &ModuleTree) -> Vec<NodeId> {
    tree.scopes
        .nodes()
        .into_iter()
        .filter(|scope| tree.is_attached(*scope))
        .collect()
}

fn scope_depth(tree: &ModuleTree, scope: NodeId) -> usize {
    let mut depth = 0;
    let mut current = tree.enclosing_scope(scope);
    while let Some(outer) = current {
        depth += 1;
        current = tree.enclosing_scope(outer);
    }
    depth
}

/// Variables the code of `scope` itself refers to
fn referenced_variables(tree: &ModuleTree, scope: NodeId) -> FxHashSet<VariableId> {
    let mut referenced = FxHashSet::default();
    for node in tree.scope_descendants(scope) {
        if let Some(variable) = tree.node_variable(node) {
            referenced.insert(variable);
            if let VariableKind::MaybeLocal { fallback } = tree.variables[variable].kind {
                referenced.insert(fallback);
            }
        }
    }
    referenced
}

/// Drop taken variables that neither the scope nor anything nested in it uses
fn complete_closures(tree: &mut ModuleTree) {
    let mut scopes = attached_scopes(tree);
    // Inner scopes first, so outer scopes see pruned inner entries
    scopes.sort_by_key(|scope| std::cmp::Reverse(scope_depth(tree, *scope)));

    for scope in &scopes {
        let scope = *scope;
        let referenced = referenced_variables(tree, scope);
        let nested_targets: FxHashSet<VariableId> = scopes
            .iter()
            .filter(|other| **other != scope && tree.is_ancestor(scope, **other))
            .flat_map(|other| tree.scopes.get(*other).taken.values().copied())
            .map(|variable| tree.variables.resolve(variable))
            .collect();

        let unused: Vec<_> = tree
            .scopes
            .get(scope)
            .taken
            .iter()
            .filter(|(_, variable)| {
                !referenced.contains(*variable) && !nested_targets.contains(&tree.variables.resolve(**variable))
            })
            .map(|(name, variable)| (*name, *variable))
            .collect();

        for (name, variable) in unused {
            trace!(name = tree.resolve_name(name), "dropping unused closure variable");
            tree.scopes.get_mut(scope).taken.shift_remove(&name);
            if let VariableKind::ClosureReference { target } = tree.variables[variable].kind {
                tree.variables[target].closure_takers.shift_remove(&scope);
            }
        }
    }
}

fn mark_locals_dicts(tree: &mut ModuleTree) {
    for scope in attached_scopes(tree) {
        if !matches!(tree.scopes.get(scope).kind, ScopeKind::Function | ScopeKind::Class) {
            continue;
        }
        let needs_dict = tree.scope_descendants(scope).into_iter().any(|node| {
            matches!(
                tree.kind(node),
                NodeKind::BuiltinLocals
                    | NodeKind::Exec { globals: None, .. }
                    | NodeKind::BuiltinEval {
                        globals: None,
                        locals: None,
                        ..
                    }
            ) || tree.names_dynamic_builtin(node)
        });
        tree.scopes.get_mut(scope).needs_locals_dict = needs_dict;
    }
}

/// Walk from a `break`/`continue` to its loop, collecting the `try` blocks
/// of `try`/`finally` statements on the way
fn loop_exit_path(tree: &ModuleTree, node: NodeId) -> Option<(NodeId, Vec<NodeId>)> {
    let mut crossed = Vec::new();
    let mut child = node;
    let mut current = tree.parent(node);
    while let Some(parent) = current {
        match tree.kind(parent) {
            kind if kind.is_closure_giver() => return None,
            NodeKind::While { body, .. } | NodeKind::For { body, .. } if *body == Some(child) => {
                return Some((parent, crossed));
            }
            NodeKind::TryFinally { tried, .. } if *tried == Some(child) => crossed.push(parent),
            _ => {}
        }
        child = parent;
        current = tree.parent(parent);
    }
    None
}

fn return_path(tree: &ModuleTree, node: NodeId) -> Vec<NodeId> {
    let mut crossed = Vec::new();
    let mut child = node;
    let mut current = tree.parent(node);
    while let Some(parent) = current {
        match tree.kind(parent) {
            kind if kind.is_closure_giver() => break,
            NodeKind::TryFinally { tried, .. } if *tried == Some(child) => crossed.push(parent),
            _ => {}
        }
        child = parent;
        current = tree.parent(parent);
    }
    crossed
}

fn mark_control_exits(tree: &mut ModuleTree) {
    let nodes = tree.descendants(tree.root());

    for node in &nodes {
        match tree.kind_mut(*node) {
            NodeKind::While {
                exception_break,
                exception_continue,
                ..
            }
            | NodeKind::For {
                exception_break,
                exception_continue,
                ..
            } => {
                *exception_break = false;
                *exception_continue = false;
            }
            NodeKind::TryFinally {
                needs_break_handling,
                needs_continue_handling,
                needs_return_handling,
                ..
            } => {
                *needs_break_handling = false;
                *needs_continue_handling = false;
                *needs_return_handling = false;
            }
            _ => {}
        }
    }

    for node in nodes {
        match tree.kind(node) {
            NodeKind::Break { .. } | NodeKind::Continue { .. } => {
                let is_break = matches!(tree.kind(node), NodeKind::Break { .. });
                let Some((loop_node, crossed)) = loop_exit_path(tree, node) else {
                    continue;
                };
                let driven = !crossed.is_empty();
                match tree.kind_mut(node) {
                    NodeKind::Break { exception_driven } | NodeKind::Continue { exception_driven } => {
                        *exception_driven = driven;
                    }
                    _ => {}
                }
                if !driven {
                    continue;
                }
                trace!(location = %tree.location(node), finally_blocks = crossed.len(), "loop exit crosses finally");
                match tree.kind_mut(loop_node) {
                    NodeKind::While {
                        exception_break,
                        exception_continue,
                        ..
                    }
                    | NodeKind::For {
                        exception_break,
                        exception_continue,
                        ..
                    } => {
                        if is_break {
                            *exception_break = true;
                        } else {
                            *exception_continue = true;
                        }
                    }
                    _ => {}
                }
                for try_node in crossed {
                    if let NodeKind::TryFinally {
                        needs_break_handling,
                        needs_continue_handling,
                        ..
                    } = tree.kind_mut(try_node)
                    {
                        if is_break {
                            *needs_break_handling = true;
                        } else {
                            *needs_continue_handling = true;
                        }
                    }
                }
            }
            NodeKind::Return { .. } => {
                for try_node in return_path(tree, node) {
                    if let NodeKind::TryFinally {
                        needs_return_handling, ..
                    } = tree.kind_mut(try_node)
                    {
                        *needs_return_handling = true;
                    }
                }
            }
            _ => {}
        }
    }
}

fn in_handler_body(tree: &ModuleTree, node: NodeId) -> bool {
    let mut child = node;
    let mut current = tree.parent(node);
    while let Some(parent) = current {
        match tree.kind(parent) {
            kind if kind.is_closure_giver() => return false,
            NodeKind::ExceptHandler { body, .. } if *body == Some(child) => return true,
            _ => {}
        }
        child = parent;
        current = tree.parent(parent);
    }
    false
}

fn mark_local_reraises(tree: &mut ModuleTree) {
    for node in tree.descendants(tree.root()) {
        if !matches!(
            tree.kind(node),
            NodeKind::Raise {
                exception_type: None,
                ..
            }
        ) {
            continue;
        }
        let local = in_handler_body(tree, node);
        if let NodeKind::Raise { reraise_local, .. } = tree.kind_mut(node) {
            *reraise_local = local;
        }
    }
}
