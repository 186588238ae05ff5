pub mod ast;
pub mod config;
pub mod dataflow;
pub mod di;
pub mod diagnostics;
pub mod errors;
pub mod finalization;
pub mod fs;
pub mod module_resolver;
pub mod optimizer;
pub mod scope;
pub mod session;
pub mod source;
pub mod string_interner;
pub mod visitor;

pub use ast::{ModuleTree, NodeId, NodeKind, SourceLocation, TreeBuilder};
pub use config::{CompilerConfig, CompilerOptions, FollowImports, LanguageLevel, OptimizationLevel};
pub use di::Container;
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler, DiagnosticLevel,
};
pub use errors::CompilationError;
pub use fs::{FileSystem, MockFileSystem, RealFileSystem};
pub use module_resolver::{FileSystemModuleResolver, ModuleKind, ModuleLocation, ModuleResolver};
pub use optimizer::{OptimizationReport, Optimizer, Tag, TagSet};
pub use session::{CompilationOutput, CompilationSession, ModuleRegistry};
pub use source::{ModuleSource, NoSourceParser, SourceParser, SyntaxError};
