use crate::ast::{CompareOp, ModuleTree, NodeId, NodeKind, Slot, UnaryOp};
use crate::config::OptimizationLevel;
use crate::errors::CompilationError;
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use crate::visitor::{visit_tree, TreeVisitor, VisitControl};
use tracing::trace;

/// Removes statements that cannot run or cannot matter
///
/// Branches on constant conditions, loops that never iterate, code after
/// `return`/`raise`/`break`/`continue`, effect-free expression statements and
/// `try` blocks that have nothing to guard.
pub struct DeadCodeEliminationPass;

impl OptimizationPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn interests(&self) -> TagSet {
        TagSet::all().without(Tag::NewImport)
    }

    fn run(&mut self, tree: &mut ModuleTree, _ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let mut eliminator = Eliminator { tags: TagSet::empty() };
        let root = tree.root();
        visit_tree(tree, root, &mut eliminator)?;
        Ok(eliminator.tags)
    }
}

struct Eliminator {
    tags: TagSet,
}

impl TreeVisitor for Eliminator {
    fn on_leave(&mut self, tree: &mut ModuleTree, node: NodeId) -> Result<VisitControl, CompilationError> {
        match tree.kind(node) {
            NodeKind::StatementsSequence { .. } => self.clean_sequence(tree, node),
            kind if kind.is_statement() && in_sequence(tree, node) => self.simplify_statement(tree, node),
            _ => {}
        }
        Ok(VisitControl::Continue)
    }
}

impl Eliminator {
    fn simplify_statement(&mut self, tree: &mut ModuleTree, node: NodeId) {
        let replacement = match tree.kind(node) {
            NodeKind::If {
                condition,
                yes_branch,
                no_branch,
            } => match tree.kind(*condition).constant() {
                Some(value) => Some(branch(if value.is_truthy() { *yes_branch } else { *no_branch })),
                None if yes_branch.is_none() && no_branch.is_none() => {
                    let condition = *condition;
                    Some(self.evaluate_only(tree, node, condition))
                }
                None => None,
            },
            NodeKind::While {
                condition, no_enter, ..
            } => match tree.kind(*condition).constant() {
                Some(value) if !value.is_truthy() => Some(branch(*no_enter)),
                _ => None,
            },
            NodeKind::For {
                iterated, no_break, ..
            } => {
                let never_iterates = match tree.kind(*iterated) {
                    NodeKind::Constant { value } => value.length() == Some(0),
                    NodeKind::MakeTuple { elements } | NodeKind::MakeList { elements } => elements.is_empty(),
                    _ => false,
                };
                never_iterates.then(|| branch(*no_break))
            }
            NodeKind::TryExcept { tried, no_raise, .. } => match tried {
                None => Some(branch(*no_raise)),
                Some(tried) if !tree.may_raise_exception(*tried) => {
                    let mut statements = vec![*tried];
                    statements.extend(no_raise.iter().copied());
                    Some(statements)
                }
                Some(_) => None,
            },
            NodeKind::TryFinally { tried, finally, .. } => match (tried, finally) {
                (_, None) => Some(branch(*tried)),
                (None, _) => Some(branch(*finally)),
                _ => None,
            },
            _ => None,
        };

        if let Some(statements) = replacement {
            trace!(location = %tree.location(node), kind = tree.kind(node).tag().kind_name(), "statement simplified");
            tree.replace_statement(node, statements);
            self.tags |= Tag::NewStatements;
        }
    }

    /// Statements for an `if` without branches: only the condition remains
    ///
    /// A condition that may produce an arbitrary object keeps its truth test
    /// as `not <condition>`, since `__bool__` can raise.
    fn evaluate_only(&mut self, tree: &mut ModuleTree, node: NodeId, condition: NodeId) -> Vec<NodeId> {
        if tree.is_removable_expression(condition) {
            return Vec::new();
        }
        let location = tree.location(node).clone();
        let test = if always_bool(tree, condition) {
            condition
        } else {
            self.tags |= Tag::NewExpression;
            tree.alloc(
                NodeKind::UnaryOperation {
                    op: UnaryOp::Not,
                    operand: condition,
                },
                location.clone(),
            )
        };
        vec![tree.alloc(NodeKind::ExpressionOnly { expression: test }, location)]
    }

    fn clean_sequence(&mut self, tree: &mut ModuleTree, sequence: NodeId) {
        let statements = tree.statements(sequence).to_vec();
        let mut removed = Vec::new();
        let mut aborted = false;
        for statement in &statements {
            if aborted {
                removed.push(*statement);
                continue;
            }
            let kind = tree.kind(*statement);
            if kind.is_aborting() {
                aborted = true;
            } else if matches!(kind, NodeKind::Pass) {
                removed.push(*statement);
            } else if let NodeKind::ExpressionOnly { expression } = kind {
                if tree.is_removable_expression(*expression) {
                    removed.push(*statement);
                }
            }
        }
        // A sequence in a required slot keeps one statement
        if removed.len() == statements.len() && !in_optional_slot(tree, sequence) {
            removed.pop();
        }
        if removed.is_empty() {
            return;
        }

        trace!(location = %tree.location(sequence), count = removed.len(), "dropping dead statements");
        for statement in removed {
            tree.remove_statement(statement);
        }
        self.tags |= Tag::NewStatements;
    }
}

fn branch(sequence: Option<NodeId>) -> Vec<NodeId> {
    sequence.into_iter().collect()
}

fn in_sequence(tree: &ModuleTree, node: NodeId) -> bool {
    tree.parent(node)
        .is_some_and(|parent| matches!(tree.kind(parent), NodeKind::StatementsSequence { .. }))
}

fn in_optional_slot(tree: &ModuleTree, sequence: NodeId) -> bool {
    let Some(holder) = tree.parent(sequence) else {
        return false;
    };
    tree.kind(holder)
        .slots()
        .into_iter()
        .any(|slot| matches!(slot, Slot::Optional(id) if *id == Some(sequence)))
}

/// Python guarantees a real `bool` for these, so testing it runs no user code
fn always_bool(tree: &ModuleTree, condition: NodeId) -> bool {
    matches!(
        tree.kind(condition),
        NodeKind::UnaryOperation { op: UnaryOp::Not, .. }
            | NodeKind::Comparison {
                op: CompareOp::Is | CompareOp::IsNot | CompareOp::In | CompareOp::NotIn,
                ..
            }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::render;
    use crate::config::CompilerOptions;
    use crate::optimizer::passes::testing::run_once;

    fn eliminate(tree: &mut ModuleTree) -> TagSet {
        run_once(&mut DeadCodeEliminationPass, tree, &CompilerOptions::default())
    }

    #[test]
    fn test_constant_if_keeps_taken_branch() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let zero = b.constant(0);
        let one = b.constant(1);
        let yes = b.assign("a", one);
        let two = b.constant(2);
        let no = b.assign("b", two);
        let stmt = b.if_(zero, vec![yes], vec![no]);
        b.set_body(vec![stmt]);

        let tags = eliminate(&mut tree);
        assert!(tags.contains(Tag::NewStatements));
        assert_eq!(render(&tree), "b = 2\n");
    }

    #[test]
    fn test_code_after_return_is_dropped() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let ret = b.ret(Some(one));
        let call = b.call_name("g", vec![]);
        let after = b.expr(call);
        let def = b.def("f", &[], vec![ret, after]);
        b.set_body(vec![def]);

        eliminate(&mut tree);
        assert_eq!(render(&tree), "def f():\n    return 1\n");
    }

    #[test]
    fn test_effect_free_statements_are_dropped() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let constant = b.constant("doc");
        let doc = b.expr(constant);
        let pass = b.pass();
        let call = b.call_name("g", vec![]);
        let effect = b.expr(call);
        b.set_body(vec![doc, pass, effect]);

        eliminate(&mut tree);
        assert_eq!(render(&tree), "g()\n");
    }

    #[test]
    fn test_if_without_branches_keeps_truth_test() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let call = b.call_name("check", vec![]);
        let pass = b.pass();
        let stmt = b.if_(call, vec![pass], vec![]);
        b.set_body(vec![stmt]);

        let tags = eliminate(&mut tree);
        assert!(tags.contains(Tag::NewExpression));
        assert_eq!(render(&tree), "(not check())\n");
    }

    #[test]
    fn test_if_without_branches_on_boolean_condition_keeps_condition() {
        // if g() in items: pass
        // else: pass
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let call = b.call_name("g", vec![]);
        let items = b.name("items");
        let membership = b.compare(CompareOp::In, call, items);
        let yes = b.pass();
        let no = b.pass();
        let stmt = b.if_(membership, vec![yes], vec![no]);
        b.set_body(vec![stmt]);

        eliminate(&mut tree);
        assert_eq!(render(&tree), "(g() in items)\n");
    }

    #[test]
    fn test_loops_that_never_run() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let falsy = b.constant(false);
        let call = b.call_name("g", vec![]);
        let body = b.expr(call);
        let one = b.constant(1);
        let orelse = b.assign("done", one);
        let loop_ = b.while_(falsy, vec![body], vec![orelse]);
        let empty = b.tuple(vec![]);
        let call = b.call_name("h", vec![]);
        let body = b.expr(call);
        let for_loop = b.for_("i", empty, vec![body], vec![]);
        b.set_body(vec![loop_, for_loop]);

        eliminate(&mut tree);
        assert_eq!(render(&tree), "done = 1\n");
    }

    #[test]
    fn test_try_without_raising_body() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let tried = b.assign("a", one);
        let call = b.call_name("log", vec![]);
        let handled = b.expr(call);
        let handler = b.handler(None, None, vec![handled]);
        let two = b.constant(2);
        let orelse = b.assign("b", two);
        let stmt = b.try_except(vec![tried], vec![handler], vec![orelse]);
        b.set_body(vec![stmt]);

        eliminate(&mut tree);
        assert_eq!(render(&tree), "a = 1\nb = 2\n");
    }

    #[test]
    fn test_stable_after_one_run() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let call = b.call_name("g", vec![]);
        let effect = b.expr(call);
        b.set_body(vec![effect]);

        assert!(eliminate(&mut tree).is_empty());
    }
}
