//! Test fixtures - small module trees for testing
//!
//! Each fixture documents the Python it stands for.

use pyfold_core::ast::{BinaryOp, ModuleTree};

/// `x = 1 + 2 * 3`
pub fn constant_arithmetic() -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let one = b.constant(1);
    let two = b.constant(2);
    let three = b.constant(3);
    let product = b.binary(BinaryOp::Multiply, two, three);
    let sum = b.binary(BinaryOp::Add, one, product);
    let assign = b.assign("x", sum);
    b.set_body(vec![assign]);
    tree
}

/// ```python
/// def outer():
///     x = 1
///     def inner():
///         return x
///     return inner
/// ```
pub fn closure_module() -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let one = b.constant(1);
    let assign = b.assign("x", one);
    let x = b.name("x");
    let inner_return = b.ret(Some(x));
    let inner = b.def("inner", &[], vec![inner_return]);
    let inner_ref = b.name("inner");
    let outer_return = b.ret(Some(inner_ref));
    let outer = b.def("outer", &[], vec![assign, inner, outer_return]);
    b.set_body(vec![outer]);
    tree
}

/// `a, b = b, a`
pub fn swap() -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let first = b.name("b");
    let second = b.name("a");
    let pair = b.tuple(vec![first, second]);
    let unpack = b.assign_unpack(&["a", "b"], pair);
    b.set_body(vec![unpack]);
    tree
}

/// ```python
/// def f(items):
///     for item in items:
///         try:
///             break
///         finally:
///             cleanup()
/// ```
pub fn loop_with_finally() -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let brk = b.break_();
    let cleanup = b.call_name("cleanup", vec![]);
    let cleanup = b.expr(cleanup);
    let guarded = b.try_finally(vec![brk], vec![cleanup]);
    let items = b.name("items");
    let lp = b.for_("item", items, vec![guarded], vec![]);
    let def = b.def("f", &["items"], vec![lp]);
    b.set_body(vec![def]);
    tree
}

/// ```python
/// if 0:
///     dead()
/// live()
/// ```
pub fn dead_branch() -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let zero = b.constant(0);
    let dead = b.call_name("dead", vec![]);
    let dead = b.expr(dead);
    let branch = b.if_(zero, vec![dead], vec![]);
    let live = b.call_name("live", vec![]);
    let live = b.expr(live);
    b.set_body(vec![branch, live]);
    tree
}

/// `import <name>` as the only statement of `main`
pub fn importer(name: &str) -> ModuleTree {
    let mut tree = ModuleTree::new("main", "main.py");
    let mut b = tree.builder();
    let import = b.import_module(name, 0);
    let bound = name.split('.').next().unwrap_or(name);
    let bind = b.assign(bound, import);
    b.set_body(vec![bind]);
    tree
}
