mod module_recursion;
pub use module_recursion::ModuleRecursionPass;

mod builtin_folding;
pub use builtin_folding::BuiltinFoldingPass;

mod constant_folding;
pub use constant_folding::ConstantFoldingPass;

mod unpacking;
pub use unpacking::UnpackingPass;

mod dead_code_elimination;
pub use dead_code_elimination::DeadCodeEliminationPass;

mod variable_traces;
pub use variable_traces::VariableTracesPass;

#[cfg(test)]
pub(crate) mod testing {
    use crate::ast::ModuleTree;
    use crate::config::CompilerOptions;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::fs::MockFileSystem;
    use crate::module_resolver::MockModuleResolver;
    use crate::optimizer::{OptimizationPass, PassContext, TagSet};
    use crate::scope::closure::resolve_closures;
    use crate::session::ModuleRegistry;
    use crate::source::NoSourceParser;

    /// Resolve names, then run one pass once with default collaborators
    pub(crate) fn run_once(pass: &mut dyn OptimizationPass, tree: &mut ModuleTree, options: &CompilerOptions) -> TagSet {
        resolve_closures(tree).unwrap();
        run_resolved(pass, tree, options)
    }

    pub(crate) fn run_resolved(
        pass: &mut dyn OptimizationPass,
        tree: &mut ModuleTree,
        options: &CompilerOptions,
    ) -> TagSet {
        let handler = CollectingDiagnosticHandler::new();
        let resolver = MockModuleResolver::new();
        let file_system = MockFileSystem::new();
        let mut registry = ModuleRegistry::new();
        let mut ctx = PassContext {
            options,
            handler: &handler,
            parser: &NoSourceParser,
            resolver: &resolver,
            file_system: &file_system,
            registry: &mut registry,
        };
        let tags = pass.run(tree, &mut ctx).unwrap();
        tree.verify_parents().unwrap();
        tags
    }
}
