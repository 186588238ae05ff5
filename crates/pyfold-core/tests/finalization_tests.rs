use pyfold_core::ast::{ModuleTree, NodeId, NodeKind};
use pyfold_core::config::{CompilerOptions, OptimizationLevel};
use pyfold_core::finalization::finalize_module;
use pyfold_core::scope::closure::resolve_closures;
use pyfold_test_helpers::compile::{compile_module, compile_with_options};
use pyfold_test_helpers::fixtures;

fn find(tree: &ModuleTree, predicate: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
    tree.descendants(tree.root())
        .into_iter()
        .filter(|id| predicate(tree.kind(*id)))
        .collect()
}

fn function_body(tree: &ModuleTree, wanted: &str) -> NodeId {
    find(tree, |kind| matches!(kind, NodeKind::FunctionBody { .. }))
        .into_iter()
        .find(|id| matches!(tree.kind(*id), NodeKind::FunctionBody { name, .. } if tree.resolve_name(*name) == wanted))
        .unwrap()
}

#[test]
fn test_compiled_loop_marks_break_through_finally() {
    let (output, _) = compile_module(fixtures::loop_with_finally()).unwrap();
    let tree = &output.modules[0];

    let breaks = find(tree, |k| matches!(k, NodeKind::Break { .. }));
    assert_eq!(breaks.len(), 1);
    assert!(matches!(tree.kind(breaks[0]), NodeKind::Break { exception_driven: true }));

    let loops = find(tree, |k| matches!(k, NodeKind::For { .. }));
    assert!(matches!(
        tree.kind(loops[0]),
        NodeKind::For {
            exception_break: true,
            exception_continue: false,
            ..
        }
    ));

    let guards = find(tree, |k| matches!(k, NodeKind::TryFinally { .. }));
    assert!(matches!(
        tree.kind(guards[0]),
        NodeKind::TryFinally {
            needs_break_handling: true,
            needs_return_handling: false,
            ..
        }
    ));
}

#[test]
fn test_continue_through_finally() {
    // while c:
    //     try: continue
    //     finally: cleanup()
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let cont = b.continue_();
    let call = b.call_name("cleanup", vec![]);
    let cleanup = b.expr(call);
    let guard = b.try_finally(vec![cont], vec![cleanup]);
    let cond = b.name("c");
    let lp = b.while_(cond, vec![guard], vec![]);
    b.set_body(vec![lp]);
    resolve_closures(&mut tree).unwrap();

    finalize_module(&mut tree);
    assert!(matches!(tree.kind(cont), NodeKind::Continue { exception_driven: true }));
    assert!(matches!(
        tree.kind(lp),
        NodeKind::While {
            exception_break: false,
            exception_continue: true,
            ..
        }
    ));
    assert!(matches!(
        tree.kind(guard),
        NodeKind::TryFinally {
            needs_continue_handling: true,
            needs_break_handling: false,
            ..
        }
    ));
}

#[test]
fn test_loop_inside_finally_body_is_not_crossed() {
    // try:
    //     while c: break
    // finally:
    //     cleanup()
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let brk = b.break_();
    let cond = b.name("c");
    let lp = b.while_(cond, vec![brk], vec![]);
    let call = b.call_name("cleanup", vec![]);
    let cleanup = b.expr(call);
    let guard = b.try_finally(vec![lp], vec![cleanup]);
    b.set_body(vec![guard]);
    resolve_closures(&mut tree).unwrap();

    finalize_module(&mut tree);
    assert!(matches!(tree.kind(brk), NodeKind::Break { exception_driven: false }));
    assert!(matches!(
        tree.kind(guard),
        NodeKind::TryFinally {
            needs_break_handling: false,
            ..
        }
    ));
}

#[test]
fn test_compiled_handler_reraise_is_local() {
    // try: work()
    // except: raise
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let reraise = b.reraise();
    let handler = b.handler(None, None, vec![reraise]);
    let call = b.call_name("work", vec![]);
    let tried = b.expr(call);
    let guard = b.try_except(vec![tried], vec![handler], vec![]);
    b.set_body(vec![guard]);

    let (output, _) = compile_module(tree).unwrap();
    let tree = &output.modules[0];
    let raises = find(tree, |k| matches!(k, NodeKind::Raise { .. }));
    assert_eq!(raises.len(), 1);
    assert!(matches!(tree.kind(raises[0]), NodeKind::Raise { reraise_local: true, .. }));
}

#[test]
fn test_live_closure_survives_finalization() {
    let (output, _) = compile_module(fixtures::closure_module()).unwrap();
    let tree = &output.modules[0];

    let inner = function_body(tree, "inner");
    assert_eq!(tree.scopes.get(inner).taken.len(), 1);
    let taken = *tree.scopes.get(inner).taken.values().next().unwrap();
    let target = tree.variables.resolve(taken);
    assert!(tree.variables[target].closure_takers.contains(&inner));
    tree.verify_parents().unwrap();
}

#[test]
fn test_locals_call_gets_dictionary_without_optimization() {
    // def f(): return locals()
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let call = b.call_name("locals", vec![]);
    let ret = b.ret(Some(call));
    let def = b.def("f", &[], vec![ret]);
    b.set_body(vec![def]);

    let options = CompilerOptions {
        optimization_level: OptimizationLevel::O0,
        ..CompilerOptions::default()
    };
    let (output, _) = compile_with_options(tree, options).unwrap();
    let tree = &output.modules[0];
    assert!(tree.scopes.get(function_body(tree, "f")).needs_locals_dict);
}
