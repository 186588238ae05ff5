use pyfold_core::ast::{BinaryOp, Constant, ModuleTree, NodeId, NodeKind, TreeBuilder};
use pyfold_core::dataflow::{analyze_scope, ScopeTraces, TraceKind};
use pyfold_core::scope::closure::resolve_closures;
use pyfold_test_helpers::compile::compile_rendered;

fn function_scope(tree: &ModuleTree) -> NodeId {
    tree.descendants(tree.root())
        .into_iter()
        .find(|id| matches!(tree.kind(*id), NodeKind::FunctionBody { .. }))
        .unwrap()
}

fn read_of(tree: &ModuleTree, wanted: &str) -> NodeId {
    tree.descendants(tree.root())
        .into_iter()
        .find(|id| matches!(tree.kind(*id), NodeKind::VariableRef { name, .. } if tree.resolve_name(*name) == wanted))
        .unwrap()
}

/// def f(c):
///     if c: x = <yes>
///     else: x = <no>   (omitted when `no` is None)
///     return x
fn branchy(yes: i64, no: Option<i64>) -> (ModuleTree, ScopeTraces) {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let cond = b.name("c");
    let yes_value = b.constant(yes);
    let yes_assign = b.assign("x", yes_value);
    let no_branch = match no {
        Some(value) => {
            let no_value = b.constant(value);
            vec![b.assign("x", no_value)]
        }
        None => vec![],
    };
    let branch = b.if_(cond, vec![yes_assign], no_branch);
    let x = b.name("x");
    let ret = b.ret(Some(x));
    let def = b.def("f", &["c"], vec![branch, ret]);
    b.set_body(vec![def]);
    resolve_closures(&mut tree).unwrap();

    let scope = function_scope(&tree);
    let traces = analyze_scope(&tree, scope, 20);
    (tree, traces)
}

#[test]
fn test_agreeing_branches_fold() {
    let (tree, traces) = branchy(4, Some(4));
    let read = read_of(&tree, "x");
    let trace = traces.read(read).unwrap().trace;

    assert!(traces.trace(trace).is_merge());
    assert_eq!(traces.origins(trace).len(), 2);
    assert_eq!(traces.is_foldable_usage(read), Some(Constant::Int(4)));
}

#[test]
fn test_disagreeing_branches_do_not_fold() {
    let (tree, traces) = branchy(4, Some(5));
    let read = read_of(&tree, "x");
    let trace = traces.read(read).unwrap().trace;

    assert_eq!(traces.is_foldable_usage(read), None);
    assert!(traces.must_have_value(trace));
    assert!(!traces.must_not_have_value(trace));
}

#[test]
fn test_one_sided_assignment_may_be_unbound() {
    let (tree, traces) = branchy(4, None);
    let read = read_of(&tree, "x");
    let trace = traces.read(read).unwrap().trace;

    assert_eq!(traces.is_foldable_usage(read), None);
    assert!(!traces.must_have_value(trace));
    assert!(!traces.must_not_have_value(trace));
    assert!(traces
        .origins(trace)
        .iter()
        .any(|origin| traces.trace(*origin).kind == TraceKind::Uninitialized));
}

#[test]
fn test_parameters_start_initialized() {
    let (tree, traces) = branchy(1, None);
    let read = read_of(&tree, "c");
    let trace = traces.read(read).unwrap().trace;

    assert_eq!(traces.trace(trace).kind, TraceKind::Initialized);
    assert!(traces.must_have_value(trace));
}

#[test]
fn test_every_assignment_creates_a_version() {
    let (tree, traces) = branchy(4, Some(5));
    let x = tree.node_variable(read_of(&tree, "x")).unwrap();
    let assigned = traces
        .traces_of(x)
        .filter(|(_, trace)| matches!(trace.kind, TraceKind::Assigned { .. }))
        .count();
    assert_eq!(assigned, 2);
    assert_eq!(traces.assignments.len(), 2);

    let mut versions: Vec<u32> = traces.traces_of(x).map(|(_, trace)| trace.version).collect();
    let count = versions.len();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), count);
}

#[test]
fn test_unread_store_is_unused() {
    // def f(): x = 1; x = 2; return x
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let one = b.constant(1);
    let first = b.assign("x", one);
    let two = b.constant(2);
    let second = b.assign("x", two);
    let x = b.name("x");
    let ret = b.ret(Some(x));
    let def = b.def("f", &[], vec![first, second, ret]);
    b.set_body(vec![def]);
    resolve_closures(&mut tree).unwrap();

    let traces = analyze_scope(&tree, function_scope(&tree), 20);
    let target_of = |assignment: NodeId| match tree.kind(assignment) {
        NodeKind::Assignment { target, .. } => *target,
        _ => unreachable!(),
    };
    let first_trace = traces.assignments[&target_of(first)];
    let second_trace = traces.assignments[&target_of(second)];

    assert!(!traces.is_used(first_trace));
    assert!(traces.is_used(second_trace));
    assert_eq!(traces.is_foldable_usage(x), Some(Constant::Int(2)));
}

/// def f():
///     x = 1
///     try:
///         x = 2
///         z = <raising>
///     except:
///         return x
fn reassigned_in_try(raising: impl FnOnce(&mut TreeBuilder<'_>) -> NodeId) -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let one = b.constant(1);
    let init = b.assign("x", one);
    let two = b.constant(2);
    let reassign = b.assign("x", two);
    let failing = raising(&mut b);
    let store = b.assign("z", failing);
    let x = b.name("x");
    let ret = b.ret(Some(x));
    let handler = b.handler(None, None, vec![ret]);
    let guarded = b.try_except(vec![reassign, store], vec![handler], vec![]);
    let def = b.def("f", &[], vec![init, guarded]);
    b.set_body(vec![def]);
    tree
}

fn handler_read_after_raise(tree: &mut ModuleTree) -> Option<Constant> {
    resolve_closures(tree).unwrap();
    let traces = analyze_scope(tree, function_scope(tree), 20);
    traces.is_foldable_usage(read_of(tree, "x"))
}

#[test]
fn test_raising_operation_reaches_handler_with_current_state() {
    let mut tree = reassigned_in_try(|b| {
        let one = b.constant(1);
        let zero = b.constant(0);
        b.binary(BinaryOp::FloorDivide, one, zero)
    });
    assert_eq!(handler_read_after_raise(&mut tree), None);
}

#[test]
fn test_unbound_read_reaches_handler_with_current_state() {
    let mut tree = reassigned_in_try(|b| b.name("y"));
    assert_eq!(handler_read_after_raise(&mut tree), None);
}

#[test]
fn test_handler_read_is_not_folded_to_stale_value() {
    let tree = reassigned_in_try(|b| {
        let one = b.constant(1);
        let zero = b.constant(0);
        b.binary(BinaryOp::FloorDivide, one, zero)
    });
    let output = compile_rendered(tree).unwrap();
    assert!(output.contains("return x"), "got {output}");
    assert!(!output.contains("return 1"), "got {output}");
}
