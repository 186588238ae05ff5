use crate::ast::{Builtin, CompareOp, Constant, ModuleTree, NodeId, NodeKind};
use crate::config::OptimizationLevel;
use crate::errors::CompilationError;
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use crate::scope::closure::resolve_subtree;
use crate::scope::VariableId;
use crate::string_interner::StringId;
use crate::visitor::{visit_tree, TreeVisitor, VisitControl};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// Turns builtin names into builtin nodes and evaluates constant builtin calls
///
/// Constant `exec`/`eval` code at module level is parsed and inlined.
pub struct BuiltinFoldingPass;

impl OptimizationPass for BuiltinFoldingPass {
    fn name(&self) -> &'static str {
        "builtin-folding"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn interests(&self) -> TagSet {
        TagSet::of(&[
            Tag::NewCode,
            Tag::NewConstant,
            Tag::NewBuiltin,
            Tag::NewExpression,
            Tag::NewStatements,
        ])
    }

    fn run(&mut self, tree: &mut ModuleTree, ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let facts = ModuleFacts::collect(tree);
        let mut folder = BuiltinFolder {
            ctx: &*ctx,
            facts,
            tags: TagSet::empty(),
        };
        let root = tree.root();
        visit_tree(tree, root, &mut folder)?;
        Ok(folder.tags)
    }
}

/// Module-wide facts that decide whether a builtin name can be trusted
struct ModuleFacts {
    written: FxHashSet<VariableId>,
    /// Code that can rebind module names without naming them
    dynamic: bool,
}

impl ModuleFacts {
    fn collect(tree: &ModuleTree) -> Self {
        let mut written = FxHashSet::default();
        let mut dynamic = false;
        for id in tree.descendants(tree.root()) {
            match tree.kind(id) {
                NodeKind::TargetVariableRef {
                    variable: Some(variable),
                    ..
                } => {
                    written.insert(tree.variables.resolve(*variable));
                }
                NodeKind::Exec { .. } | NodeKind::BuiltinEval { .. } | NodeKind::BuiltinGlobals => dynamic = true,
                NodeKind::BuiltinRef { builtin } if is_namespace_builtin(*builtin) => dynamic = true,
                NodeKind::VariableRef {
                    name,
                    variable: Some(variable),
                    ..
                } if tree.variables[*variable].is_module() => {
                    if builtin_named(tree, *name).is_some_and(is_namespace_builtin) {
                        dynamic = true;
                    }
                }
                _ => {}
            }
        }
        Self { written, dynamic }
    }
}

/// Builtins that reach into namespaces
fn is_namespace_builtin(builtin: Builtin) -> bool {
    matches!(builtin, Builtin::Globals | Builtin::Locals | Builtin::Eval | Builtin::Exec)
}

fn builtin_named(tree: &ModuleTree, name: StringId) -> Option<Builtin> {
    Builtin::from_name(tree.resolve_name(name))
}

struct BuiltinFolder<'c, 'a> {
    ctx: &'c PassContext<'a>,
    facts: ModuleFacts,
    tags: TagSet,
}

impl TreeVisitor for BuiltinFolder<'_, '_> {
    fn on_leave(&mut self, tree: &mut ModuleTree, node: NodeId) -> Result<VisitControl, CompilationError> {
        match tree.kind(node) {
            NodeKind::VariableRef {
                name,
                variable: Some(variable),
                ..
            } => {
                let (name, variable) = (*name, *variable);
                self.builtin_reference(tree, node, name, variable);
            }
            NodeKind::Call { called, args } => {
                if let NodeKind::BuiltinRef { builtin } = tree.kind(*called) {
                    let (builtin, args) = (*builtin, args.clone());
                    self.builtin_call(tree, node, builtin, args);
                }
            }
            NodeKind::BuiltinCall { builtin, args } => {
                let builtin = *builtin;
                let values: Option<Vec<Constant>> =
                    args.iter().map(|a| tree.kind(*a).constant().cloned()).collect();
                if let Some(value) = values.and_then(|values| fold_builtin(builtin, &values)) {
                    debug!(builtin = builtin.name(), %value, "folded builtin call");
                    replace_with_constant(tree, node, value);
                    self.tags |= Tag::NewConstant;
                }
            }
            NodeKind::Exec {
                source,
                globals: None,
                locals: None,
                inline_declined: false,
            } => {
                if let Some(code) = self.inlinable_code(tree, node, *source) {
                    self.inline_exec(tree, node, &code)?;
                }
            }
            NodeKind::BuiltinEval {
                source,
                globals: None,
                locals: None,
                inline_declined: false,
            } => {
                if let Some(code) = self.inlinable_code(tree, node, *source) {
                    self.inline_eval(tree, node, &code)?;
                }
            }
            _ => {}
        }
        Ok(VisitControl::Continue)
    }
}

impl BuiltinFolder<'_, '_> {
    fn builtin_reference(&mut self, tree: &mut ModuleTree, node: NodeId, name: StringId, variable: VariableId) {
        if !tree.variables[variable].is_module() || self.facts.written.contains(&variable) {
            return;
        }
        let Some(builtin) = builtin_named(tree, name) else {
            return;
        };
        if self.facts.dynamic && !is_namespace_builtin(builtin) {
            return;
        }
        let location = tree.location(node).clone();
        let reference = tree.alloc(NodeKind::BuiltinRef { builtin }, location);
        tree.replace_node(node, reference);
        self.tags |= Tag::NewBuiltin;
    }

    fn builtin_call(&mut self, tree: &mut ModuleTree, call: NodeId, builtin: Builtin, args: Vec<NodeId>) {
        let location = tree.location(call).clone();
        let arity = args.len();
        let kind = match builtin {
            exception if exception.is_exception() => NodeKind::BuiltinMakeException { exception, args },
            Builtin::Locals if arity == 0 => NodeKind::BuiltinLocals,
            Builtin::Globals if arity == 0 => NodeKind::BuiltinGlobals,
            Builtin::Eval if (1..=3).contains(&arity) => NodeKind::BuiltinEval {
                source: args[0],
                globals: args.get(1).copied(),
                locals: args.get(2).copied(),
                inline_declined: false,
            },
            Builtin::Exec if (1..=3).contains(&arity) => {
                let Some(statement) = tree
                    .parent(call)
                    .filter(|p| matches!(tree.kind(*p), NodeKind::ExpressionOnly { .. }))
                else {
                    return;
                };
                let exec = tree.alloc(
                    NodeKind::Exec {
                        source: args[0],
                        globals: args.get(1).copied(),
                        locals: args.get(2).copied(),
                        inline_declined: false,
                    },
                    location,
                );
                tree.replace_node(statement, exec);
                self.tags |= Tag::NewStatements;
                return;
            }
            Builtin::Locals | Builtin::Globals | Builtin::Eval | Builtin::Exec => return,
            _ => NodeKind::BuiltinCall { builtin, args },
        };
        let replacement = tree.alloc(kind, location);
        tree.replace_node(call, replacement);
        self.tags |= Tag::NewBuiltin;
    }

    /// Constant code of an exec/eval that may be inlined here
    fn inlinable_code(&self, tree: &ModuleTree, node: NodeId, source: NodeId) -> Option<String> {
        if !self.ctx.options.inline_dynamic_execution || tree.owning_scope(node) != tree.root() {
            return None;
        }
        match tree.kind(source) {
            NodeKind::Constant {
                value: Constant::Str(code),
            } => Some(code.clone()),
            _ => None,
        }
    }

    fn inline_exec(&mut self, tree: &mut ModuleTree, node: NodeId, code: &str) -> Result<(), CompilationError> {
        let location = tree.location(node).clone();
        match self.ctx.parser.parse_code(tree, code, &location) {
            Ok(statements) => {
                let mut inserted = Vec::new();
                for statement in &statements {
                    match tree.kind(*statement) {
                        NodeKind::StatementsSequence { statements } => inserted.extend(statements.iter().copied()),
                        _ => inserted.push(*statement),
                    }
                }
                tree.replace_statement(node, statements);
                for statement in inserted {
                    resolve_subtree(tree, statement)?;
                }
                debug!(module = tree.name(), %location, "inlined constant exec");
                self.tags |= Tag::NewCode;
            }
            Err(err) => {
                warn!(%location, "constant exec not inlined: {err}");
                self.ctx
                    .handler
                    .warning(&location, &format!("constant exec code not inlined: {err}"));
                if let NodeKind::Exec { inline_declined, .. } = tree.kind_mut(node) {
                    *inline_declined = true;
                }
            }
        }
        Ok(())
    }

    fn inline_eval(&mut self, tree: &mut ModuleTree, node: NodeId, code: &str) -> Result<(), CompilationError> {
        let location = tree.location(node).clone();
        let code = code.trim_start_matches([' ', '\t']);
        match self.ctx.parser.parse_expression(tree, code, &location) {
            Ok(expression) => {
                tree.replace_node(node, expression);
                resolve_subtree(tree, expression)?;
                debug!(module = tree.name(), %location, "inlined constant eval");
                self.tags |= Tag::NewCode;
            }
            Err(err) => {
                warn!(%location, "constant eval not inlined: {err}");
                self.ctx
                    .handler
                    .warning(&location, &format!("constant eval code not inlined: {err}"));
                if let NodeKind::BuiltinEval { inline_declined, .. } = tree.kind_mut(node) {
                    *inline_declined = true;
                }
            }
        }
        Ok(())
    }
}

fn replace_with_constant(tree: &mut ModuleTree, node: NodeId, value: Constant) {
    let location = tree.location(node).clone();
    let constant = tree.alloc(NodeKind::Constant { value }, location);
    tree.replace_node(node, constant);
}

/// Result of calling `builtin` on constant arguments, when it cannot raise
pub(crate) fn fold_builtin(builtin: Builtin, args: &[Constant]) -> Option<Constant> {
    match (builtin, args) {
        (Builtin::Len, [value]) => value.length().map(|n| Constant::Int(n as i64)),
        (Builtin::Int, []) => Some(Constant::Int(0)),
        (Builtin::Int, [Constant::Int(i)]) => Some(Constant::Int(*i)),
        (Builtin::Int, [Constant::Bool(b)]) => Some(Constant::Int(i64::from(*b))),
        (Builtin::Int, [Constant::Float(f)]) => float_to_int(*f),
        (Builtin::Int, [Constant::Str(s)]) => parse_int(s),
        (Builtin::Float, []) => Some(Constant::Float(0.0)),
        (Builtin::Float, [Constant::Int(i)]) => Some(Constant::Float(*i as f64)),
        (Builtin::Float, [Constant::Bool(b)]) => Some(Constant::Float(f64::from(u8::from(*b)))),
        (Builtin::Float, [Constant::Float(f)]) => Some(Constant::Float(*f)),
        (Builtin::Str, []) => Some(Constant::Str(String::new())),
        (Builtin::Str, [value]) => value.to_python_str().map(Constant::Str),
        (Builtin::Bool, []) => Some(Constant::Bool(false)),
        (Builtin::Bool, [value]) => Some(Constant::Bool(value.is_truthy())),
        (Builtin::Tuple, []) => Some(Constant::Tuple(Vec::new())),
        (Builtin::Tuple, [value]) => value.iteration_elements().map(Constant::Tuple),
        (Builtin::Abs, [Constant::Int(i)]) => i.checked_abs().map(Constant::Int),
        (Builtin::Abs, [Constant::Bool(b)]) => Some(Constant::Int(i64::from(*b))),
        (Builtin::Abs, [Constant::Float(f)]) => Some(Constant::Float(f.abs())),
        (Builtin::Chr, [Constant::Int(i)]) if (0..=127).contains(i) => {
            char::from_u32(*i as u32).map(|c| Constant::Str(c.to_string()))
        }
        (Builtin::Ord, [Constant::Str(s)]) if s.len() == 1 && s.is_ascii() => {
            s.bytes().next().map(|b| Constant::Int(i64::from(b)))
        }
        (Builtin::Min | Builtin::Max, [single]) => extreme(builtin, &single.iteration_elements()?),
        (Builtin::Min | Builtin::Max, many) if many.len() >= 2 => extreme(builtin, many),
        _ => None,
    }
}

fn float_to_int(value: f64) -> Option<Constant> {
    let truncated = value.trunc();
    let bound = 2f64.powi(63);
    if truncated.is_finite() && truncated >= -bound && truncated < bound {
        Some(Constant::Int(truncated as i64))
    } else {
        None
    }
}

fn parse_int(text: &str) -> Option<Constant> {
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    // Underscore separators are only valid in newer language levels
    if trimmed.contains('_') {
        return None;
    }
    trimmed.parse::<i64>().ok().map(Constant::Int)
}

/// First minimal or maximal element, like `min`/`max`
fn extreme(builtin: Builtin, values: &[Constant]) -> Option<Constant> {
    let numbers = values.iter().all(|v| match v {
        Constant::Int(_) | Constant::Bool(_) => true,
        Constant::Float(f) => !f.is_nan(),
        _ => false,
    });
    let strings = values.iter().all(|v| matches!(v, Constant::Str(_)));
    if !(numbers || strings) {
        return None;
    }

    let better = if builtin == Builtin::Min { CompareOp::Lt } else { CompareOp::Gt };
    let (first, rest) = values.split_first()?;
    let mut best = first;
    for candidate in rest {
        if Constant::compare(better, candidate, best)?.is_truthy() {
            best = candidate;
        }
    }
    Some(best.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_conversions() {
        assert_eq!(fold_builtin(Builtin::Len, &[Constant::from("abc")]), Some(Constant::Int(3)));
        assert_eq!(fold_builtin(Builtin::Int, &[Constant::from(" 42 ")]), Some(Constant::Int(42)));
        assert_eq!(fold_builtin(Builtin::Int, &[Constant::from("4_2")]), None);
        assert_eq!(fold_builtin(Builtin::Int, &[Constant::Float(-2.7)]), Some(Constant::Int(-2)));
        assert_eq!(fold_builtin(Builtin::Int, &[Constant::Float(f64::INFINITY)]), None);
        assert_eq!(fold_builtin(Builtin::Str, &[Constant::Int(7)]), Some(Constant::from("7")));
        assert_eq!(fold_builtin(Builtin::Bool, &[Constant::from("")]), Some(Constant::Bool(false)));
    }

    #[test]
    fn test_fold_declines_raising_calls() {
        assert_eq!(fold_builtin(Builtin::Len, &[Constant::Int(3)]), None);
        assert_eq!(fold_builtin(Builtin::Chr, &[Constant::Int(300)]), None);
        assert_eq!(fold_builtin(Builtin::Ord, &[Constant::from("ab")]), None);
        assert_eq!(fold_builtin(Builtin::Min, &[Constant::Tuple(vec![])]), None);
        assert_eq!(fold_builtin(Builtin::Abs, &[Constant::Int(i64::MIN)]), None);
    }

    #[test]
    fn test_min_max() {
        let values = [Constant::Int(3), Constant::Float(1.5), Constant::Int(9)];
        assert_eq!(fold_builtin(Builtin::Min, &values), Some(Constant::Float(1.5)));
        assert_eq!(fold_builtin(Builtin::Max, &values), Some(Constant::Int(9)));
        let tuple = Constant::Tuple(vec![Constant::from("b"), Constant::from("a")]);
        assert_eq!(fold_builtin(Builtin::Min, &[tuple]), Some(Constant::from("a")));
        assert_eq!(fold_builtin(Builtin::Max, &[Constant::Int(1), Constant::from("a")]), None);
    }

    #[test]
    fn test_chr_and_ord() {
        assert_eq!(fold_builtin(Builtin::Chr, &[Constant::Int(65)]), Some(Constant::from("A")));
        assert_eq!(fold_builtin(Builtin::Ord, &[Constant::from("A")]), Some(Constant::Int(65)));
    }
}
