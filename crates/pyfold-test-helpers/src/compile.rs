//! Test compilation helpers
//!
//! Wires trees built in tests through a [`Container`] with collecting
//! collaborators, so assertions can look at both output and diagnostics.

use crate::mocks::MockDiagnosticHandler;
use anyhow::Context;
use pyfold_core::ast::{render, ModuleTree};
use pyfold_core::config::{CompilerConfig, CompilerOptions, OptimizationLevel};
use pyfold_core::di::Container;
use pyfold_core::fs::{FileSystem, MockFileSystem};
use pyfold_core::module_resolver::{FileSystemModuleResolver, ModuleResolver};
use pyfold_core::session::CompilationOutput;
use pyfold_core::source::{NoSourceParser, SourceParser};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Container over the given collaborators and an empty in-memory file system
pub fn create_test_container(
    options: CompilerOptions,
    resolver: Arc<dyn ModuleResolver>,
    parser: Arc<dyn SourceParser>,
) -> (Container, Arc<MockDiagnosticHandler>) {
    container_with(options, Arc::new(MockFileSystem::new()), resolver, parser)
}

/// Container whose imports are located and read from `file_system`
pub fn create_container_over(
    options: CompilerOptions,
    file_system: MockFileSystem,
    parser: Arc<dyn SourceParser>,
) -> (Container, Arc<MockDiagnosticHandler>) {
    let file_system: Arc<dyn FileSystem> = Arc::new(file_system);
    let resolver = Arc::new(FileSystemModuleResolver::new(file_system.clone(), Vec::new()));
    container_with(options, file_system, resolver, parser)
}

fn container_with(
    options: CompilerOptions,
    file_system: Arc<dyn FileSystem>,
    resolver: Arc<dyn ModuleResolver>,
    parser: Arc<dyn SourceParser>,
) -> (Container, Arc<MockDiagnosticHandler>) {
    let handler = MockDiagnosticHandler::new();
    let config = CompilerConfig {
        compiler_options: options,
    };
    let container = Container::with_dependencies(config, handler.clone(), file_system, resolver, parser);
    (container, handler)
}

/// Compile one module with the given options and no import recursion
pub fn compile_with_options(
    tree: ModuleTree,
    options: CompilerOptions,
) -> anyhow::Result<(CompilationOutput, Arc<MockDiagnosticHandler>)> {
    init_test_logging();
    let (container, handler) = create_container_over(options, MockFileSystem::new(), Arc::new(NoSourceParser));
    let output = container
        .compile(tree)
        .context("compilation failed")?;
    Ok((output, handler))
}

/// Compile one module with default options
pub fn compile_module(tree: ModuleTree) -> anyhow::Result<(CompilationOutput, Arc<MockDiagnosticHandler>)> {
    compile_with_options(tree, CompilerOptions::default())
}

/// Compile one module at `level` and render the result
pub fn compile_with_optimization(tree: ModuleTree, level: OptimizationLevel) -> anyhow::Result<String> {
    let options = CompilerOptions {
        optimization_level: level,
        ..CompilerOptions::default()
    };
    let (output, _) = compile_with_options(tree, options)?;
    render_main(&output)
}

/// Compile one module with default options and render the result
pub fn compile_rendered(tree: ModuleTree) -> anyhow::Result<String> {
    let (output, _) = compile_module(tree)?;
    render_main(&output)
}

/// Rendering of the first module of a compilation
pub fn render_main(output: &CompilationOutput) -> anyhow::Result<String> {
    let main = output
        .modules
        .first()
        .context("compilation produced no modules")?;
    Ok(render(main))
}
