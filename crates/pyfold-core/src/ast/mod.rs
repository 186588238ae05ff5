pub mod builder;
pub mod constant;
pub mod effects;
pub mod kind;
pub mod location;
pub mod operators;
pub mod render;
pub mod tree;

pub use builder::TreeBuilder;
pub use constant::Constant;
pub use kind::{ImportRecursion, NodeKind, NodeRole, NodeSpec, NodeTag, Slot, NODE_REGISTRY};
pub use location::SourceLocation;
pub use operators::{BinaryOp, BoolOp, Builtin, CompareOp, ContractionKind, UnaryOp};
pub use render::{render, render_node};
pub use tree::{ModuleTree, Node, NodeId};
