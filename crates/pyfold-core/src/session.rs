//! Compilation session: the modules of one run and their collaborators
//!
//! The session owns every module tree, the registry of known module names and
//! the read-only collaborators. Nothing here is global; two sessions never
//! see each other's modules.

use crate::ast::ModuleTree;
use crate::config::CompilerOptions;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::CompilationError;
use crate::finalization::finalize_module;
use crate::fs::FileSystem;
use crate::module_resolver::ModuleResolver;
use crate::optimizer::{OptimizationReport, Optimizer};
use crate::scope::closure::resolve_closures;
use crate::source::SourceParser;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Modules known to a session, including ones discovered but not yet added
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    known: FxHashSet<String>,
    pending: Vec<ModuleTree>,
    reported_missing: FxHashSet<(String, Option<String>, u32)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn register(&mut self, name: &str) {
        self.known.insert(name.to_string());
    }

    /// Queue a parsed module; it joins the session after the current pass
    pub fn queue(&mut self, tree: ModuleTree) {
        self.register(tree.name());
        self.pending.push(tree);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn take_pending(&mut self) -> Vec<ModuleTree> {
        std::mem::take(&mut self.pending)
    }

    /// Whether a missing module is reported for the first time
    pub fn first_missing_report(&mut self, name: &str, parent_package: Option<&str>, level: u32) -> bool {
        self.reported_missing
            .insert((name.to_string(), parent_package.map(str::to_string), level))
    }
}

/// Move discovered modules into the session, resolving their names
///
/// A module whose names cannot be resolved is reported and left out.
/// Returns how many modules joined.
pub(crate) fn absorb_pending(
    modules: &mut Vec<ModuleTree>,
    registry: &mut ModuleRegistry,
    handler: &dyn DiagnosticHandler,
) -> usize {
    let mut added = 0;
    for mut tree in registry.take_pending() {
        match resolve_closures(&mut tree) {
            Ok(()) => {
                debug!(module = tree.name(), "discovered module joins the session");
                modules.push(tree);
                added += 1;
            }
            Err(err) => {
                let location = err.location().cloned().unwrap_or_else(|| tree.module_location());
                error!(module = tree.name(), "dropping discovered module: {err}");
                handler.error(&location, &err.to_string());
            }
        }
    }
    added
}

/// What a finished compilation hands to the code generator
#[derive(Debug)]
pub struct CompilationOutput {
    pub modules: Vec<ModuleTree>,
    pub report: OptimizationReport,
}

pub struct CompilationSession {
    pub(crate) options: CompilerOptions,
    pub(crate) handler: Arc<dyn DiagnosticHandler>,
    pub(crate) file_system: Arc<dyn FileSystem>,
    pub(crate) resolver: Arc<dyn ModuleResolver>,
    pub(crate) parser: Arc<dyn SourceParser>,
    pub(crate) modules: Vec<ModuleTree>,
    pub(crate) registry: ModuleRegistry,
}

impl CompilationSession {
    pub fn new(
        options: CompilerOptions,
        handler: Arc<dyn DiagnosticHandler>,
        file_system: Arc<dyn FileSystem>,
        resolver: Arc<dyn ModuleResolver>,
        parser: Arc<dyn SourceParser>,
    ) -> Self {
        Self {
            options,
            handler,
            file_system,
            resolver,
            parser,
            modules: Vec::new(),
            registry: ModuleRegistry::new(),
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn handler(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.handler
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.file_system
    }

    pub fn modules(&self) -> &[ModuleTree] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleTree> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Resolve the names of a freshly built module and add it
    ///
    /// Semantic errors are reported to the diagnostic handler and returned;
    /// the module is not added.
    pub fn add_module(&mut self, mut tree: ModuleTree) -> Result<(), CompilationError> {
        if let Err(err) = resolve_closures(&mut tree) {
            let location = err.location().cloned().unwrap_or_else(|| tree.module_location());
            error!(module = tree.name(), "closure resolution failed: {err}");
            self.handler.error(&location, &err.to_string());
            return Err(err);
        }
        debug!(module = tree.name(), "module added to session");
        self.registry.register(tree.name());
        self.modules.push(tree);
        Ok(())
    }

    /// Add modules queued by module recursion
    pub fn absorb_discovered(&mut self) -> usize {
        absorb_pending(&mut self.modules, &mut self.registry, self.handler.as_ref())
    }

    /// Run the optimization pipeline at the configured level
    pub fn optimize(&mut self) -> Result<OptimizationReport, CompilationError> {
        let mut optimizer = Optimizer::new(self.options.optimization_level);
        optimizer.optimize(self)
    }

    /// Single-shot finalization of every module
    pub fn finalize(&mut self) {
        for tree in &mut self.modules {
            finalize_module(tree);
        }
    }

    /// Optimize, finalize and hand the modules over
    pub fn compile(mut self) -> Result<CompilationOutput, CompilationError> {
        let report = self.optimize()?;
        self.finalize();
        info!(
            modules = self.modules.len(),
            rounds = report.rounds,
            "compilation finished"
        );
        Ok(CompilationOutput {
            modules: self.modules,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::fs::MockFileSystem;
    use crate::module_resolver::MockModuleResolver;
    use crate::source::NoSourceParser;

    fn session(handler: Arc<CollectingDiagnosticHandler>) -> CompilationSession {
        CompilationSession::new(
            CompilerOptions::default(),
            handler,
            Arc::new(MockFileSystem::new()),
            Arc::new(MockModuleResolver::new()),
            Arc::new(NoSourceParser),
        )
    }

    #[test]
    fn test_registry_dedups_missing_reports() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.first_missing_report("gone", None, 0));
        assert!(!registry.first_missing_report("gone", None, 0));
        assert!(registry.first_missing_report("gone", Some("pkg"), 0));
        assert!(registry.first_missing_report("gone", None, 1));
    }

    #[test]
    fn test_add_module_registers_name() {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let mut session = session(handler.clone());
        let mut tree = ModuleTree::new("main", "main.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let assign = b.assign("x", one);
        b.set_body(vec![assign]);

        session.add_module(tree).unwrap();
        assert!(session.registry().is_known("main"));
        assert!(session.module("main").is_some());
        assert!(!handler.has_errors());
    }

    #[test]
    fn test_add_module_reports_semantic_errors() {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let mut session = session(handler.clone());

        // def f(): x = 1; def g(): return x; del x
        let mut tree = ModuleTree::new("bad", "bad.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let assign = b.assign("x", one);
        let x = b.name("x");
        let ret = b.ret(Some(x));
        let inner = b.def("g", &[], vec![ret]);
        let del = b.del("x");
        let outer = b.def("f", &[], vec![assign, inner, del]);
        b.set_body(vec![outer]);

        assert!(session.add_module(tree).is_err());
        assert_eq!(handler.error_count(), 1);
        assert!(session.modules().is_empty());
    }

    #[test]
    fn test_absorb_moves_pending_modules() {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let mut session = session(handler);
        session.registry.queue(ModuleTree::new("helpers", "helpers.py"));
        assert_eq!(session.registry().pending_count(), 1);
        assert_eq!(session.absorb_discovered(), 1);
        assert_eq!(session.modules().len(), 1);
        assert_eq!(session.registry().pending_count(), 0);
    }
}
