use crate::ast::{BinaryOp, BoolOp, Constant, ModuleTree, NodeId, NodeKind};
use crate::config::{LanguageLevel, OptimizationLevel};
use crate::errors::CompilationError;
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use crate::visitor::{visit_tree, TreeVisitor, VisitControl};
use tracing::trace;

/// Largest integer magnitude that converts to a float without rounding
const EXACT_FLOAT_INT: i64 = 1 << 53;

pub struct ConstantFoldingPass;

impl OptimizationPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn interests(&self) -> TagSet {
        TagSet::of(&[Tag::NewCode, Tag::NewConstant, Tag::NewBuiltin, Tag::NewExpression])
    }

    fn run(&mut self, tree: &mut ModuleTree, _ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let mut folder = ConstantFolder {
            level: tree.language_level,
            tags: TagSet::empty(),
        };
        let root = tree.root();
        visit_tree(tree, root, &mut folder)?;
        Ok(folder.tags)
    }
}

struct ConstantFolder {
    level: LanguageLevel,
    tags: TagSet,
}

/// What an expression folds to
enum Folded {
    Value(Constant),
    /// One of the operands, which replaces the whole expression
    Operand(NodeId),
}

impl TreeVisitor for ConstantFolder {
    fn on_leave(&mut self, tree: &mut ModuleTree, node: NodeId) -> Result<VisitControl, CompilationError> {
        let Some(folded) = self.fold(tree, node) else {
            return Ok(VisitControl::Continue);
        };
        let location = tree.location(node).clone();
        let replacement = match folded {
            Folded::Value(value) => {
                trace!(%location, %value, "folded expression");
                self.tags |= Tag::NewConstant;
                tree.alloc(NodeKind::Constant { value }, location)
            }
            Folded::Operand(operand) => {
                self.tags |= if tree.kind(operand).constant().is_some() {
                    Tag::NewConstant
                } else {
                    Tag::NewExpression
                };
                operand
            }
        };
        tree.replace_node(node, replacement);
        Ok(VisitControl::Continue)
    }
}

impl ConstantFolder {
    fn fold(&self, tree: &ModuleTree, node: NodeId) -> Option<Folded> {
        let constant = |id: NodeId| tree.kind(id).constant();
        match tree.kind(node) {
            NodeKind::UnaryOperation { op, operand } => {
                Constant::unary(*op, constant(*operand)?).map(Folded::Value)
            }
            NodeKind::BinaryOperation { op, left, right } => {
                let (left, right) = (constant(*left)?, constant(*right)?);
                Constant::binary(*op, left, right)
                    .or_else(|| self.true_division(*op, left, right))
                    .map(Folded::Value)
            }
            NodeKind::Comparison { op, left, right } => {
                Constant::compare(*op, constant(*left)?, constant(*right)?).map(Folded::Value)
            }
            NodeKind::BoolOperation { op, left, right } => {
                let truthy = constant(*left)?.is_truthy();
                let chosen = match (op, truthy) {
                    (BoolOp::And, true) | (BoolOp::Or, false) => *right,
                    (BoolOp::And, false) | (BoolOp::Or, true) => *left,
                };
                Some(Folded::Operand(chosen))
            }
            NodeKind::Conditional { condition, yes, no } => {
                let chosen = if constant(*condition)?.is_truthy() { *yes } else { *no };
                Some(Folded::Operand(chosen))
            }
            NodeKind::MakeTuple { elements } => {
                let values: Option<Vec<Constant>> = elements.iter().map(|e| constant(*e).cloned()).collect();
                values.map(|values| Folded::Value(Constant::Tuple(values)))
            }
            NodeKind::Subscript { source, subscript } => {
                subscript_constant(constant(*source)?, constant(*subscript)?).map(Folded::Value)
            }
            _ => None,
        }
    }

    /// `int / int` is a float division from Python 3 on
    fn true_division(&self, op: BinaryOp, left: &Constant, right: &Constant) -> Option<Constant> {
        if op != BinaryOp::Divide || self.level.is_python2() {
            return None;
        }
        let (l, r) = (exact_int(left)?, exact_int(right)?);
        if r == 0 || l.abs() >= EXACT_FLOAT_INT || r.abs() >= EXACT_FLOAT_INT {
            return None;
        }
        Some(Constant::Float(l as f64 / r as f64))
    }
}

fn exact_int(value: &Constant) -> Option<i64> {
    match value {
        Constant::Int(i) => Some(*i),
        Constant::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Element of a constant tuple or ASCII string; `None` when out of range
fn subscript_constant(source: &Constant, subscript: &Constant) -> Option<Constant> {
    let index = exact_int(subscript)?;
    let resolve = |len: usize| -> Option<usize> {
        let len = i64::try_from(len).ok()?;
        let index = if index < 0 { index + len } else { index };
        (0..len).contains(&index).then_some(index as usize)
    };
    match source {
        Constant::Tuple(items) => items.get(resolve(items.len())?).cloned(),
        Constant::Str(s) if s.is_ascii() => {
            let position = resolve(s.len())?;
            s.get(position..=position).map(Constant::from)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{render, CompareOp, UnaryOp};
    use crate::config::CompilerOptions;
    use crate::optimizer::passes::testing::run_once;

    fn fold(tree: &mut ModuleTree) -> TagSet {
        run_once(&mut ConstantFoldingPass, tree, &CompilerOptions::default())
    }

    #[test]
    fn test_nested_arithmetic_folds_bottom_up() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let two = b.constant(2);
        let three = b.constant(3);
        let sum = b.binary(BinaryOp::Add, one, two);
        let product = b.binary(BinaryOp::Multiply, sum, three);
        let negated = b.unary(UnaryOp::Negate, product);
        let assign = b.assign("x", negated);
        b.set_body(vec![assign]);

        let tags = fold(&mut tree);
        assert!(tags.contains(Tag::NewConstant));
        assert_eq!(render(&tree), "x = -9\n");
    }

    #[test]
    fn test_raising_operations_stay() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let zero = b.constant(0);
        let division = b.binary(BinaryOp::FloorDivide, one, zero);
        let assign = b.assign("x", division);
        b.set_body(vec![assign]);

        assert!(fold(&mut tree).is_empty());
        assert_eq!(render(&tree), "x = (1 // 0)\n");
    }

    #[test]
    fn test_true_division_depends_on_level() {
        let build = |level: LanguageLevel| {
            let mut tree = ModuleTree::new("m", "m.py").with_language_level(level);
            let mut b = tree.builder();
            let one = b.constant(1);
            let two = b.constant(2);
            let division = b.binary(BinaryOp::Divide, one, two);
            let assign = b.assign("x", division);
            b.set_body(vec![assign]);
            tree
        };

        let mut py2 = build(LanguageLevel::Python27);
        fold(&mut py2);
        assert_eq!(render(&py2), "x = (1 / 2)\n");

        let mut py3 = build(LanguageLevel::Python3);
        fold(&mut py3);
        assert_eq!(render(&py3), "x = 0.5\n");
    }

    #[test]
    fn test_bool_operation_keeps_deciding_operand() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let zero = b.constant(0);
        let y = b.name("y");
        let either = b.bool_op(BoolOp::Or, zero, y);
        let assign = b.assign("x", either);
        let empty = b.constant("");
        let z = b.name("z");
        let both = b.bool_op(BoolOp::And, empty, z);
        let assign_both = b.assign("w", both);
        b.set_body(vec![assign, assign_both]);

        let tags = fold(&mut tree);
        assert!(tags.contains(Tag::NewExpression));
        assert_eq!(render(&tree), "x = y\nw = ''\n");
    }

    #[test]
    fn test_conditional_and_comparison() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let two = b.constant(2);
        let less = b.compare(CompareOp::Lt, one, two);
        let a = b.name("a");
        let c = b.name("c");
        let chosen = b.conditional(less, a, c);
        let assign = b.assign("x", chosen);
        b.set_body(vec![assign]);

        fold(&mut tree);
        assert_eq!(render(&tree), "x = a\n");
    }

    #[test]
    fn test_tuple_display_and_subscript() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let s = b.constant("s");
        let tuple = b.tuple(vec![one, s]);
        let last = b.constant(-1);
        let element = b.subscript(tuple, last);
        let assign = b.assign("x", element);
        let text = b.constant("abc");
        let nine = b.constant(9);
        let outside = b.subscript(text, nine);
        let assign_outside = b.assign("y", outside);
        b.set_body(vec![assign, assign_outside]);

        fold(&mut tree);
        assert_eq!(render(&tree), "x = 's'\ny = 'abc'[9]\n");
    }

    #[test]
    fn test_subscript_constant() {
        let text = Constant::from("abc");
        assert_eq!(subscript_constant(&text, &Constant::Int(1)), Some(Constant::from("b")));
        assert_eq!(subscript_constant(&text, &Constant::Int(-3)), Some(Constant::from("a")));
        assert_eq!(subscript_constant(&text, &Constant::Int(-4)), None);
        assert_eq!(subscript_constant(&Constant::from("é"), &Constant::Int(0)), None);
    }
}
