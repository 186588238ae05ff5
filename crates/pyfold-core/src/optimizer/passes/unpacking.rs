use crate::ast::{Builtin, Constant, ModuleTree, NodeId, NodeKind, SourceLocation};
use crate::config::{LanguageLevel, OptimizationLevel};
use crate::errors::CompilationError;
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use tracing::debug;

/// Splits tuple unpacking of known-length sources into plain assignments
///
/// A length mismatch becomes the `ValueError` the assignment would raise,
/// after the side effects of the source elements.
pub struct UnpackingPass;

impl OptimizationPass for UnpackingPass {
    fn name(&self) -> &'static str {
        "unpacking"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O1
    }

    fn interests(&self) -> TagSet {
        TagSet::of(&[Tag::NewCode, Tag::NewConstant, Tag::NewStatements, Tag::NewExpression])
    }

    fn run(&mut self, tree: &mut ModuleTree, _ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let unpacks: Vec<NodeId> = tree
            .descendants(tree.root())
            .into_iter()
            .filter(|id| matches!(tree.kind(*id), NodeKind::AssignmentUnpack { .. }))
            .collect();

        let mut tags = TagSet::empty();
        for unpack in unpacks {
            if !tree.is_attached(unpack) {
                continue;
            }
            if split_unpack(tree, unpack) {
                tags |= TagSet::of(&[Tag::NewStatements, Tag::NewExpression]);
            }
        }
        Ok(tags)
    }
}

/// Source element of an unpacking
enum Element {
    Value(Constant),
    Node(NodeId),
}

fn source_elements(tree: &ModuleTree, source: NodeId) -> Option<Vec<Element>> {
    match tree.kind(source) {
        NodeKind::Constant { value } => Some(
            value
                .iteration_elements()?
                .into_iter()
                .map(Element::Value)
                .collect(),
        ),
        NodeKind::MakeTuple { elements } | NodeKind::MakeList { elements } => Some(
            elements
                .iter()
                .map(|e| match tree.kind(*e).constant() {
                    Some(value) => Element::Value(value.clone()),
                    None => Element::Node(*e),
                })
                .collect(),
        ),
        _ => None,
    }
}

fn split_unpack(tree: &mut ModuleTree, unpack: NodeId) -> bool {
    let NodeKind::AssignmentUnpack { targets, source } = tree.kind(unpack) else {
        return false;
    };
    let (targets, source) = (targets.clone(), *source);
    let Some(elements) = source_elements(tree, source) else {
        return false;
    };
    let location = tree.location(unpack).clone();

    let statements = if elements.len() == targets.len() {
        assign_each(tree, unpack, &location, targets, elements)
    } else {
        debug!(%location, expected = targets.len(), got = elements.len(), "unpacking always fails");
        raise_mismatch(tree, &location, targets.len(), elements)
    };
    tree.replace_statement(unpack, statements);
    true
}

fn assign_each(
    tree: &mut ModuleTree,
    unpack: NodeId,
    location: &SourceLocation,
    targets: Vec<NodeId>,
    elements: Vec<Element>,
) -> Vec<NodeId> {
    let mut statements = Vec::new();
    let mut temporaries = Vec::new();

    // Non-constant elements are evaluated into temporaries before any target
    // is bound, like the tuple the assignment would have built
    let scope = tree.owning_scope(unpack);
    let mut values = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            Element::Value(value) => values.push(Element::Value(value)),
            Element::Node(node) => {
                let temp = tree.allocate_temp_variable(scope);
                let target = tree.alloc(NodeKind::TargetTempVariableRef { variable: temp }, location.clone());
                statements.push(tree.alloc(NodeKind::Assignment { target, source: node }, location.clone()));
                temporaries.push(temp);
                values.push(Element::Node(
                    tree.alloc(NodeKind::TempVariableRef { variable: temp }, location.clone()),
                ));
            }
        }
    }

    for (target, value) in targets.into_iter().zip(values) {
        let source = match value {
            Element::Value(value) => tree.alloc(NodeKind::Constant { value }, location.clone()),
            Element::Node(reference) => reference,
        };
        statements.push(tree.alloc(NodeKind::Assignment { target, source }, location.clone()));
    }

    for temp in temporaries {
        let target = tree.alloc(NodeKind::TargetTempVariableRef { variable: temp }, location.clone());
        statements.push(tree.alloc(NodeKind::DelVariable { target }, location.clone()));
    }
    statements
}

fn raise_mismatch(
    tree: &mut ModuleTree,
    location: &SourceLocation,
    expected: usize,
    elements: Vec<Element>,
) -> Vec<NodeId> {
    let got = elements.len();
    let mut statements = Vec::new();
    for element in elements {
        if let Element::Node(node) = element {
            if tree.may_have_side_effects(node) {
                statements.push(tree.alloc(NodeKind::ExpressionOnly { expression: node }, location.clone()));
            }
        }
    }

    let message = mismatch_message(tree.language_level, expected, got);
    let message = tree.alloc(
        NodeKind::Constant {
            value: Constant::Str(message),
        },
        location.clone(),
    );
    let exception = tree.alloc(
        NodeKind::BuiltinMakeException {
            exception: Builtin::ValueError,
            args: vec![message],
        },
        location.clone(),
    );
    statements.push(tree.alloc(
        NodeKind::Raise {
            exception_type: Some(exception),
            exception_value: None,
            reraise_local: false,
        },
        location.clone(),
    ));
    statements
}

fn mismatch_message(level: LanguageLevel, expected: usize, got: usize) -> String {
    match (level.is_python2(), got > expected) {
        (true, true) => "too many values to unpack".to_string(),
        (true, false) => {
            let noun = if got == 1 { "value" } else { "values" };
            format!("need more than {got} {noun} to unpack")
        }
        (false, true) => format!("too many values to unpack (expected {expected})"),
        (false, false) => format!("not enough values to unpack (expected {expected}, got {got})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::render;
    use crate::config::CompilerOptions;
    use crate::optimizer::passes::testing::run_once;

    fn split(tree: &mut ModuleTree) -> TagSet {
        run_once(&mut UnpackingPass, tree, &CompilerOptions::default())
    }

    #[test]
    fn test_constant_source_becomes_assignments() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let two = b.constant(2);
        let pair = b.tuple(vec![one, two]);
        let unpack = b.assign_unpack(&["a", "b"], pair);
        b.set_body(vec![unpack]);

        let tags = split(&mut tree);
        assert!(tags.contains(Tag::NewStatements));
        assert_eq!(render(&tree), "a = 1\nb = 2\n");
    }

    #[test]
    fn test_string_source_unpacks_characters() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let text = b.constant("xy");
        let unpack = b.assign_unpack(&["a", "b"], text);
        b.set_body(vec![unpack]);

        split(&mut tree);
        assert_eq!(render(&tree), "a = 'x'\nb = 'y'\n");
    }

    #[test]
    fn test_swap_goes_through_temporaries() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let y = b.name("y");
        let x = b.name("x");
        let pair = b.tuple(vec![y, x]);
        let unpack = b.assign_unpack(&["x", "y"], pair);
        b.set_body(vec![unpack]);

        split(&mut tree);
        let rendered = render(&tree);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].ends_with(" = y") && lines[0].starts_with("<tmp#"));
        assert!(lines[1].ends_with(" = x") && lines[1].starts_with("<tmp#"));
        assert!(lines[2].starts_with("x = <tmp#"));
        assert!(lines[3].starts_with("y = <tmp#"));
        assert!(lines[4].starts_with("del <tmp#"));
        assert!(lines[5].starts_with("del <tmp#"));
        assert_eq!(tree.scopes.get(tree.root()).temporaries.len(), 2);
    }

    #[test]
    fn test_length_mismatch_raises_after_side_effects() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let call = b.call_name("f", vec![]);
        let one = b.constant(1);
        let two = b.constant(2);
        let triple = b.tuple(vec![call, one, two]);
        let unpack = b.assign_unpack(&["a", "b"], triple);
        b.set_body(vec![unpack]);

        split(&mut tree);
        assert_eq!(
            render(&tree),
            "f()\nraise ValueError('too many values to unpack')\n"
        );
    }

    #[test]
    fn test_mismatch_messages() {
        assert_eq!(
            mismatch_message(LanguageLevel::Python27, 3, 1),
            "need more than 1 value to unpack"
        );
        assert_eq!(
            mismatch_message(LanguageLevel::Python27, 3, 2),
            "need more than 2 values to unpack"
        );
        assert_eq!(
            mismatch_message(LanguageLevel::Python3, 2, 3),
            "too many values to unpack (expected 2)"
        );
        assert_eq!(
            mismatch_message(LanguageLevel::Python3, 3, 1),
            "not enough values to unpack (expected 3, got 1)"
        );
    }

    #[test]
    fn test_unknown_source_is_left_alone() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let pairs = b.name("pairs");
        let unpack = b.assign_unpack(&["a", "b"], pairs);
        b.set_body(vec![unpack]);

        assert!(split(&mut tree).is_empty());
        assert_eq!(render(&tree), "a, b = pairs\n");
    }
}
