use crate::ast::ModuleTree;
use crate::config::CompilerConfig;
use crate::diagnostics::{ConsoleDiagnosticHandler, DiagnosticHandler};
use crate::errors::CompilationError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::module_resolver::{FileSystemModuleResolver, ModuleResolver};
use crate::session::{CompilationOutput, CompilationSession};
use crate::source::{NoSourceParser, SourceParser};
use std::sync::Arc;

/// Dependency injection container
/// Holds the shared collaborators and wires them into compilation sessions
pub struct Container {
    config: Arc<CompilerConfig>,
    diagnostic_handler: Arc<dyn DiagnosticHandler>,
    file_system: Arc<dyn FileSystem>,
    resolver: Arc<dyn ModuleResolver>,
    parser: Arc<dyn SourceParser>,
}

impl Container {
    /// Create a new container with production dependencies
    ///
    /// No parser is installed, so imported modules are found but never
    /// embedded until one is supplied through [`Container::with_dependencies`].
    pub fn new(config: CompilerConfig) -> Self {
        let config = Arc::new(config);
        let diagnostic_handler = Arc::new(ConsoleDiagnosticHandler::new(config.compiler_options.pretty));
        let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
        let resolver = Arc::new(FileSystemModuleResolver::new(file_system.clone(), Vec::new()));

        Container {
            config,
            diagnostic_handler,
            file_system,
            resolver,
            parser: Arc::new(NoSourceParser),
        }
    }

    /// Create a container with custom dependencies (for testing)
    pub fn with_dependencies(
        config: CompilerConfig,
        diagnostic_handler: Arc<dyn DiagnosticHandler>,
        file_system: Arc<dyn FileSystem>,
        resolver: Arc<dyn ModuleResolver>,
        parser: Arc<dyn SourceParser>,
    ) -> Self {
        Container {
            config: Arc::new(config),
            diagnostic_handler,
            file_system,
            resolver,
            parser,
        }
    }

    pub fn config(&self) -> &Arc<CompilerConfig> {
        &self.config
    }

    pub fn diagnostic_handler(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.diagnostic_handler
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.file_system
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleResolver> {
        &self.resolver
    }

    pub fn parser(&self) -> &Arc<dyn SourceParser> {
        &self.parser
    }

    /// Fresh session sharing this container's collaborators
    pub fn session(&self) -> CompilationSession {
        CompilationSession::new(
            self.config.compiler_options.clone(),
            self.diagnostic_handler.clone(),
            self.file_system.clone(),
            self.resolver.clone(),
            self.parser.clone(),
        )
    }

    /// Compile one main module and everything it pulls in
    pub fn compile(&self, main: ModuleTree) -> Result<CompilationOutput, CompilationError> {
        let mut session = self.session();
        session.add_module(main)?;
        session.compile()
    }

    /// Check if any errors have been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostic_handler.has_errors()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostic_handler.error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostic_handler.warning_count()
    }
}
