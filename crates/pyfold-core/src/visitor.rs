use crate::ast::{ModuleTree, NodeId};
use crate::errors::CompilationError;

/// Hard bound on restarts of one traversal
pub const MAX_RESTARTS: usize = 256;

/// Outcome of a visit callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    Continue,
    /// Abandon the rest of this traversal
    Exit,
    /// Abandon and start over from the traversal root
    Restart,
}

/// Depth-first callbacks; `on_enter` runs before children, `on_leave` after
pub trait TreeVisitor {
    fn on_enter(&mut self, _tree: &mut ModuleTree, _node: NodeId) -> Result<VisitControl, CompilationError> {
        Ok(VisitControl::Continue)
    }

    fn on_leave(&mut self, _tree: &mut ModuleTree, _node: NodeId) -> Result<VisitControl, CompilationError> {
        Ok(VisitControl::Continue)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    ScopeLimited,
}

/// Visit `start` and every node below it, nested scopes included
pub fn visit_tree(
    tree: &mut ModuleTree,
    start: NodeId,
    visitor: &mut dyn TreeVisitor,
) -> Result<(), CompilationError> {
    drive(tree, start, visitor, Mode::Full)
}

/// Visit the code of one scope, stopping at nested closure givers
pub fn visit_scope(
    tree: &mut ModuleTree,
    scope: NodeId,
    visitor: &mut dyn TreeVisitor,
) -> Result<(), CompilationError> {
    drive(tree, scope, visitor, Mode::ScopeLimited)
}

fn drive(
    tree: &mut ModuleTree,
    start: NodeId,
    visitor: &mut dyn TreeVisitor,
    mode: Mode,
) -> Result<(), CompilationError> {
    let mut restarts = 0;
    loop {
        match walk(tree, start, start, visitor, mode)? {
            VisitControl::Continue | VisitControl::Exit => return Ok(()),
            VisitControl::Restart => {
                restarts += 1;
                assert!(
                    restarts <= MAX_RESTARTS,
                    "traversal at {} restarted more than {} times",
                    tree.location(start),
                    MAX_RESTARTS
                );
            }
        }
    }
}

fn walk(
    tree: &mut ModuleTree,
    start: NodeId,
    node: NodeId,
    visitor: &mut dyn TreeVisitor,
    mode: Mode,
) -> Result<VisitControl, CompilationError> {
    let parent_before = tree.parent(node);
    match visitor.on_enter(tree, node)? {
        VisitControl::Continue => {}
        other => return Ok(other),
    }
    // Replaced while entering: the replacement is not ours to visit
    if node != start && tree.parent(node) != parent_before {
        return Ok(VisitControl::Continue);
    }

    for child in tree.children(node) {
        if tree.parent(child) != Some(node) {
            continue;
        }
        if mode == Mode::ScopeLimited && tree.kind(child).is_closure_giver() {
            continue;
        }
        match walk(tree, start, child, visitor, mode)? {
            VisitControl::Continue => {}
            other => return Ok(other),
        }
    }

    if node != start && tree.parent(node) != parent_before {
        return Ok(VisitControl::Continue);
    }
    visitor.on_leave(tree, node)
}
