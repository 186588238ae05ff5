use crate::ast::{Builtin, Constant, ModuleTree, NodeId, NodeKind};
use crate::config::OptimizationLevel;
use crate::dataflow::{analyze_scope, ScopeTraces};
use crate::errors::CompilationError;
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use crate::scope::{ScopeKind, VariableKind};
use tracing::{debug, trace};

/// Rewrites driven by variable traces
///
/// Reads with a value known on every path become constants, and each read
/// learns whether it can hit an unbound variable. With experimental
/// optimizations enabled, stores nothing reads are dropped from functions.
pub struct VariableTracesPass;

impl OptimizationPass for VariableTracesPass {
    fn name(&self) -> &'static str {
        "variable-traces"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O2
    }

    fn interests(&self) -> TagSet {
        TagSet::all()
    }

    fn run(&mut self, tree: &mut ModuleTree, ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let mut tags = TagSet::empty();
        for scope in tree.scopes.nodes() {
            if !tree.is_attached(scope) || matches!(tree.scopes.get(scope).kind, ScopeKind::Contraction(_)) {
                continue;
            }
            let traces = analyze_scope(tree, scope, ctx.options.loop_convergence_limit);
            let plan = ScopePlan::build(tree, scope, &traces, ctx.options.experimental);
            tags |= plan.apply(tree);
        }
        Ok(tags)
    }
}

/// Decisions for one scope, taken before any rewrite
#[derive(Default)]
struct ScopePlan {
    folds: Vec<(NodeId, Constant)>,
    unbound_flags: Vec<(NodeId, bool)>,
    dead_stores: Vec<NodeId>,
}

impl ScopePlan {
    fn build(tree: &ModuleTree, scope: NodeId, traces: &ScopeTraces, experimental: bool) -> Self {
        let mut plan = ScopePlan::default();

        let mut reads: Vec<NodeId> = traces.reads.keys().copied().collect();
        reads.sort_by_key(|node| node.index());
        for node in reads {
            if let Some(value) = traces.is_foldable_usage(node) {
                plan.folds.push((node, value));
                continue;
            }
            if let NodeKind::VariableRef {
                may_raise_unbound, ..
            } = tree.kind(node)
            {
                let Some(read) = traces.read(node) else {
                    continue;
                };
                let may_raise = !traces.must_have_value(read.trace);
                if may_raise != *may_raise_unbound {
                    plan.unbound_flags.push((node, may_raise));
                }
            }
        }

        if experimental && tree.scopes.get(scope).kind == ScopeKind::Function && !has_dynamic_code(tree, scope) {
            let mut stores: Vec<_> = traces.assignments.iter().map(|(target, id)| (*target, *id)).collect();
            stores.sort_by_key(|(target, _)| target.index());
            for (target, id) in stores {
                if !traces.is_used(id) && is_private_variable(tree, target) {
                    if let Some(assignment) = plain_assignment_of(tree, target) {
                        plan.dead_stores.push(assignment);
                    }
                }
            }
        }
        plan
    }

    fn apply(self, tree: &mut ModuleTree) -> TagSet {
        let mut tags = TagSet::empty();

        for (node, value) in self.folds {
            if !tree.is_attached(node) {
                continue;
            }
            trace!(location = %tree.location(node), %value, "read replaced by its known value");
            let location = tree.location(node).clone();
            let constant = tree.alloc(NodeKind::Constant { value }, location);
            tree.replace_node(node, constant);
            tags |= Tag::NewConstant;
        }

        for (node, flag) in self.unbound_flags {
            if let NodeKind::VariableRef {
                may_raise_unbound, ..
            } = tree.kind_mut(node)
            {
                *may_raise_unbound = flag;
                tags |= Tag::NewExpression;
            }
        }

        for assignment in self.dead_stores {
            if !tree.is_attached(assignment) {
                continue;
            }
            let NodeKind::Assignment { source, .. } = tree.kind(assignment) else {
                continue;
            };
            let source = *source;
            debug!(location = %tree.location(assignment), "removing store nothing reads");
            let replacement = if tree.may_have_side_effects(source) {
                let location = tree.location(assignment).clone();
                vec![tree.alloc(NodeKind::ExpressionOnly { expression: source }, location)]
            } else {
                Vec::new()
            };
            tree.replace_statement(assignment, replacement);
            tags |= Tag::ReadOnly;
        }
        tags
    }
}

/// Code that can read locals without naming them
fn has_dynamic_code(tree: &ModuleTree, scope: NodeId) -> bool {
    tree.scopes.get(scope).has_unqualified_exec
        || tree.scope_descendants(scope).into_iter().any(|node| {
            matches!(
                tree.kind(node),
                NodeKind::BuiltinLocals
                    | NodeKind::BuiltinEval { .. }
                    | NodeKind::Exec { .. }
                    | NodeKind::BuiltinRef {
                        builtin: Builtin::Locals | Builtin::Eval | Builtin::Exec
                    }
            ) || tree.names_dynamic_builtin(node)
        })
}

/// Locals and temporaries no other scope can see
fn is_private_variable(tree: &ModuleTree, target: NodeId) -> bool {
    let Some(variable) = tree.node_variable(target) else {
        return false;
    };
    let variable = &tree.variables[tree.variables.resolve(variable)];
    matches!(variable.kind, VariableKind::Local | VariableKind::Temporary) && !variable.is_shared()
}

/// The assignment statement whose whole target is `target`
fn plain_assignment_of(tree: &ModuleTree, target: NodeId) -> Option<NodeId> {
    let parent = tree.parent(target)?;
    match tree.kind(parent) {
        NodeKind::Assignment { target: slot, .. } if *slot == target => {
            let holder = tree.parent(parent)?;
            matches!(tree.kind(holder), NodeKind::StatementsSequence { .. }).then_some(parent)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{render, BinaryOp};
    use crate::config::CompilerOptions;
    use crate::optimizer::passes::testing::{run_once, run_resolved};

    fn function_with_store() -> ModuleTree {
        // def f(): x = 1; y = x + 2; return y
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let assign_x = b.assign("x", one);
        let x = b.name("x");
        let two = b.constant(2);
        let sum = b.binary(BinaryOp::Add, x, two);
        let assign_y = b.assign("y", sum);
        let y = b.name("y");
        let ret = b.ret(Some(y));
        let def = b.def("f", &[], vec![assign_x, assign_y, ret]);
        b.set_body(vec![def]);
        tree
    }

    #[test]
    fn test_known_reads_become_constants() {
        let mut tree = function_with_store();
        let tags = run_once(&mut VariableTracesPass, &mut tree, &CompilerOptions::default());
        assert!(tags.contains(Tag::NewConstant));
        assert_eq!(
            render(&tree),
            "def f():\n    x = 1\n    y = (1 + 2)\n    return y\n"
        );
    }

    #[test]
    fn test_dead_stores_need_experimental() {
        let options = CompilerOptions {
            experimental: true,
            ..CompilerOptions::default()
        };
        let mut tree = function_with_store();
        run_once(&mut VariableTracesPass, &mut tree, &options);
        let tags = run_resolved(&mut VariableTracesPass, &mut tree, &options);
        assert!(tags.contains(Tag::ReadOnly));
        assert_eq!(render(&tree), "def f():\n    y = (1 + 2)\n    return y\n");

        let mut plain = function_with_store();
        run_once(&mut VariableTracesPass, &mut plain, &CompilerOptions::default());
        let tags = run_resolved(&mut VariableTracesPass, &mut plain, &CompilerOptions::default());
        assert!(!tags.contains(Tag::ReadOnly));
    }

    #[test]
    fn test_parameter_reads_cannot_be_unbound() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let a = b.name("a");
        let ret = b.ret(Some(a));
        let def = b.def("f", &["a"], vec![ret]);
        b.set_body(vec![def]);

        run_once(&mut VariableTracesPass, &mut tree, &CompilerOptions::default());
        let reference = tree
            .descendants(tree.root())
            .into_iter()
            .find(|id| matches!(tree.kind(*id), NodeKind::VariableRef { .. }))
            .unwrap();
        assert!(matches!(
            tree.kind(reference),
            NodeKind::VariableRef {
                may_raise_unbound: false,
                ..
            }
        ));
    }
}
