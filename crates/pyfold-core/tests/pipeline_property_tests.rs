use proptest::prelude::*;
use pyfold_core::ast::{render, BinaryOp, CompareOp, ModuleTree, NodeId, TreeBuilder};
use pyfold_core::config::CompilerOptions;
use pyfold_core::diagnostics::CollectingDiagnosticHandler;
use pyfold_core::fs::MockFileSystem;
use pyfold_core::module_resolver::MockModuleResolver;
use pyfold_core::session::CompilationSession;
use pyfold_core::source::NoSourceParser;
use pyfold_core::Optimizer;
use pyfold_test_helpers::compile::compile_rendered;
use std::sync::Arc;

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Arith {
    Int(i64),
    Op(BinaryOp, Box<Arith>, Box<Arith>),
}

impl Arith {
    fn eval(&self) -> i64 {
        match self {
            Arith::Int(value) => *value,
            Arith::Op(op, left, right) => {
                let (l, r) = (left.eval(), right.eval());
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Subtract => l - r,
                    BinaryOp::Multiply => l * r,
                    _ => unreachable!("strategy only builds + - *"),
                }
            }
        }
    }

    fn build(&self, b: &mut TreeBuilder<'_>) -> NodeId {
        match self {
            Arith::Int(value) => b.constant(*value),
            Arith::Op(op, left, right) => {
                let left = left.build(b);
                let right = right.build(b);
                b.binary(*op, left, right)
            }
        }
    }
}

fn arith_strategy() -> impl Strategy<Value = Arith> {
    let leaf = (-20i64..=20).prop_map(Arith::Int);
    leaf.prop_recursive(3, 8, 2, |inner| {
        (
            prop_oneof![
                Just(BinaryOp::Add),
                Just(BinaryOp::Subtract),
                Just(BinaryOp::Multiply)
            ],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, left, right)| Arith::Op(op, Box::new(left), Box::new(right)))
    })
}

fn compare_strategy() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Eq),
        Just(CompareOp::NotEq),
        Just(CompareOp::Lt),
        Just(CompareOp::LtE),
        Just(CompareOp::Gt),
        Just(CompareOp::GtE),
    ]
}

fn assignment_of(expression: &Arith) -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let value = expression.build(&mut b);
    let assign = b.assign("x", value);
    b.set_body(vec![assign]);
    tree
}

const NAMES: [&str; 3] = ["a", "b", "c"];

/// Statements of a generated function body
#[derive(Debug, Clone)]
enum Step {
    /// `name = <arith>`
    Store(usize, Arith),
    /// `name = other + k`
    Derive(usize, usize, i64),
    /// `g(name)`
    Escape(usize),
    /// `if p: name = <arith> else: other = k`
    Branch(usize, Arith, usize, i64),
    /// `try: name = other // k except: name = 0`
    Guarded(usize, usize, i64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let name = 0usize..NAMES.len();
    prop_oneof![
        (name.clone(), arith_strategy()).prop_map(|(n, e)| Step::Store(n, e)),
        (name.clone(), name.clone(), -3i64..=3).prop_map(|(n, o, k)| Step::Derive(n, o, k)),
        name.clone().prop_map(Step::Escape),
        (name.clone(), arith_strategy(), name.clone(), -3i64..=3).prop_map(|(n, e, o, k)| Step::Branch(n, e, o, k)),
        (name.clone(), name, -1i64..=1).prop_map(|(n, o, k)| Step::Guarded(n, o, k)),
    ]
}

impl Step {
    fn build(&self, b: &mut TreeBuilder<'_>) -> NodeId {
        match self {
            Step::Store(name, expression) => {
                let value = expression.build(b);
                b.assign(NAMES[*name], value)
            }
            Step::Derive(name, other, k) => {
                let read = b.name(NAMES[*other]);
                let k = b.constant(*k);
                let sum = b.binary(BinaryOp::Add, read, k);
                b.assign(NAMES[*name], sum)
            }
            Step::Escape(name) => {
                let read = b.name(NAMES[*name]);
                let call = b.call_name("g", vec![read]);
                b.expr(call)
            }
            Step::Branch(name, expression, other, k) => {
                let condition = b.name("p");
                let value = expression.build(b);
                let yes = b.assign(NAMES[*name], value);
                let k = b.constant(*k);
                let no = b.assign(NAMES[*other], k);
                b.if_(condition, vec![yes], vec![no])
            }
            Step::Guarded(name, other, k) => {
                let read = b.name(NAMES[*other]);
                let k = b.constant(*k);
                let quotient = b.binary(BinaryOp::FloorDivide, read, k);
                let tried = b.assign(NAMES[*name], quotient);
                let zero = b.constant(0);
                let fallback = b.assign(NAMES[*name], zero);
                let handler = b.handler(None, None, vec![fallback]);
                b.try_except(vec![tried], vec![handler], vec![])
            }
        }
    }
}

/// def f(p): <steps>; return (a, b, c)
fn program_of(steps: &[Step]) -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let mut body: Vec<NodeId> = steps.iter().map(|step| step.build(&mut b)).collect();
    let results: Vec<NodeId> = NAMES.iter().map(|name| b.name(name)).collect();
    let tuple = b.tuple(results);
    body.push(b.ret(Some(tuple)));
    let def = b.def("f", &["p"], body);
    b.set_body(vec![def]);
    tree
}

fn session_for(tree: ModuleTree) -> CompilationSession {
    let mut session = CompilationSession::new(
        CompilerOptions::default(),
        Arc::new(CollectingDiagnosticHandler::new()),
        Arc::new(MockFileSystem::new()),
        Arc::new(MockModuleResolver::new()),
        Arc::new(NoSourceParser),
    );
    session.add_module(tree).unwrap();
    session
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

// =============================================================================
// Constant folding
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Property: integer arithmetic folds to the value Python computes
    #[test]
    fn prop_arithmetic_folds_to_its_value(expression in arith_strategy()) {
        let output = compile_rendered(assignment_of(&expression)).unwrap();
        prop_assert_eq!(output, format!("x = {}\n", expression.eval()));
    }

    // Property: the same input always compiles to the same output
    #[test]
    fn prop_compilation_is_deterministic(expression in arith_strategy()) {
        let first = compile_rendered(assignment_of(&expression)).unwrap();
        let second = compile_rendered(assignment_of(&expression)).unwrap();
        prop_assert_eq!(first, second);
    }

    // Property: integer comparisons fold to Python booleans
    #[test]
    fn prop_comparisons_fold(op in compare_strategy(), left in -5i64..=5, right in -5i64..=5) {
        let mut tree = ModuleTree::new("main", "main.py");
        let mut b = tree.builder();
        let l = b.constant(left);
        let r = b.constant(right);
        let comparison = b.compare(op, l, r);
        let assign = b.assign("x", comparison);
        b.set_body(vec![assign]);

        let expected = match op {
            CompareOp::Eq => left == right,
            CompareOp::NotEq => left != right,
            CompareOp::Lt => left < right,
            CompareOp::LtE => left <= right,
            CompareOp::Gt => left > right,
            _ => left >= right,
        };
        let output = compile_rendered(tree).unwrap();
        prop_assert_eq!(output, format!("x = {}\n", python_bool(expected)));
    }
}

// =============================================================================
// Statement-level rewrites
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Property: nothing after a return survives
    #[test]
    fn prop_code_after_return_is_dropped(value in -100i64..=100, trailing in 1usize..4) {
        let mut tree = ModuleTree::new("main", "main.py");
        let mut b = tree.builder();
        let returned = b.constant(value);
        let mut body = vec![b.ret(Some(returned))];
        for index in 0..trailing {
            let call = b.call_name(&format!("after{index}"), vec![]);
            body.push(b.expr(call));
        }
        let def = b.def("f", &[], body);
        b.set_body(vec![def]);

        let output = compile_rendered(tree).unwrap();
        prop_assert_eq!(output, format!("def f():\n    return {value}\n"));
    }

    // Property: unpacking a constant tuple either binds every name or raises
    #[test]
    fn prop_constant_unpacking(values in prop::collection::vec(-9i64..=9, 0..5), names in 1usize..5) {
        let mut tree = ModuleTree::new("main", "main.py");
        let mut b = tree.builder();
        let elements: Vec<NodeId> = values.iter().map(|v| b.constant(*v)).collect();
        let source = b.tuple(elements);
        let targets: Vec<String> = (0..names).map(|i| format!("n{i}")).collect();
        let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
        let unpack = b.assign_unpack(&target_refs, source);
        b.set_body(vec![unpack]);

        let output = compile_rendered(tree).unwrap();
        if values.len() == names {
            let expected: String = targets
                .iter()
                .zip(&values)
                .map(|(name, value)| format!("{name} = {value}\n"))
                .collect();
            prop_assert_eq!(output, expected);
        } else {
            prop_assert!(output.starts_with("raise ValueError("), "got {}", output);
            prop_assert_eq!(output.lines().count(), 1);
        }
    }
}

// =============================================================================
// Pipeline properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // Property: optimizing already optimized code changes nothing
    #[test]
    fn prop_pipeline_is_idempotent(steps in prop::collection::vec(step_strategy(), 1..6)) {
        let mut session = session_for(program_of(&steps));
        let first = session.optimize().unwrap();
        prop_assert!(first.converged);
        let settled = render(&session.modules()[0]);

        let again = Optimizer::new(session.options().optimization_level)
            .optimize(&mut session)
            .unwrap();
        prop_assert!(again.tags_emitted.is_empty(), "tags {:?} on\n{}", again.tags_emitted, settled);
        prop_assert_eq!(render(&session.modules()[0]), settled);
    }

    // Property: reads after a call that received the variable keep the variable
    #[test]
    fn prop_escaped_value_is_not_propagated(value in -50i64..=50, later_reads in 1usize..4) {
        // def f(): x = value; g(x); h(x); ...; return x
        let mut tree = ModuleTree::new("main", "main.py");
        let mut b = tree.builder();
        let constant = b.constant(value);
        let mut body = vec![b.assign("x", constant)];
        let passed = b.name("x");
        let call = b.call_name("g", vec![passed]);
        body.push(b.expr(call));
        for _ in 1..later_reads {
            let x = b.name("x");
            let call = b.call_name("h", vec![x]);
            body.push(b.expr(call));
        }
        let x = b.name("x");
        body.push(b.ret(Some(x)));
        let def = b.def("f", &[], body);
        b.set_body(vec![def]);

        let output = compile_rendered(tree).unwrap();
        prop_assert!(output.contains("    g(x)\n"), "got {}", output);
        prop_assert!(output.ends_with("    return x\n"), "got {}", output);
    }
}

#[test]
fn test_call_argument_keeps_variable_across_rounds() {
    // def f(): x = 1; g(x); return x
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let one = b.constant(1);
    let assign = b.assign("x", one);
    let x = b.name("x");
    let call = b.call_name("g", vec![x]);
    let escape = b.expr(call);
    let x = b.name("x");
    let ret = b.ret(Some(x));
    let def = b.def("f", &[], vec![assign, escape, ret]);
    b.set_body(vec![def]);

    let output = compile_rendered(tree).unwrap();
    assert_eq!(output, "def f():\n    x = 1\n    g(x)\n    return x\n");
}
