//! Mock implementations for testing

use pyfold_core::ast::{ModuleTree, NodeId, SourceLocation, TreeBuilder};
use pyfold_core::diagnostics::{Diagnostic, DiagnosticHandler, DiagnosticLevel};
use pyfold_core::source::{ModuleSource, SourceParser, SyntaxError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A mock diagnostic handler that collects diagnostics
#[derive(Debug, Default)]
pub struct MockDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MockDiagnosticHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages of one severity, in report order
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.diagnostics
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.level == level)
            .map(|d| d.message.clone())
            .collect()
    }
}

impl DiagnosticHandler for MockDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }
}

type ModuleScript = Box<dyn Fn(&mut TreeBuilder<'_>) + Send + Sync>;
type CodeScript = Box<dyn Fn(&mut TreeBuilder<'_>) -> Vec<NodeId> + Send + Sync>;
type ExpressionScript = Box<dyn Fn(&mut TreeBuilder<'_>) -> NodeId + Send + Sync>;

/// Parser that answers from scripts registered per module name or code text
///
/// Each script builds its nodes through a [`TreeBuilder`], the same way a
/// real front end would. Anything unregistered is a syntax error.
#[derive(Default)]
pub struct ScriptedParser {
    modules: HashMap<String, ModuleScript>,
    code: HashMap<String, CodeScript>,
    expressions: HashMap<String, ExpressionScript>,
    parsed_modules: Mutex<Vec<(String, String)>>,
}

impl ScriptedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module body builder; the script installs the body with `set_body`
    pub fn with_module(
        mut self,
        name: &str,
        script: impl Fn(&mut TreeBuilder<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.modules.insert(name.to_string(), Box::new(script));
        self
    }

    /// Statements for `exec` of exactly `code`
    pub fn with_code(
        mut self,
        code: &str,
        script: impl Fn(&mut TreeBuilder<'_>) -> Vec<NodeId> + Send + Sync + 'static,
    ) -> Self {
        self.code.insert(code.to_string(), Box::new(script));
        self
    }

    /// Expression for `eval` of exactly `code`
    pub fn with_expression(
        mut self,
        code: &str,
        script: impl Fn(&mut TreeBuilder<'_>) -> NodeId + Send + Sync + 'static,
    ) -> Self {
        self.expressions.insert(code.to_string(), Box::new(script));
        self
    }

    /// Names of the modules parsed so far
    pub fn parsed_modules(&self) -> Vec<String> {
        self.parsed_modules
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Source text handed over for module `name`
    pub fn parsed_text(&self, name: &str) -> Option<String> {
        self.parsed_modules
            .lock()
            .unwrap()
            .iter()
            .find(|(parsed, _)| parsed == name)
            .map(|(_, text)| text.clone())
    }
}

impl SourceParser for ScriptedParser {
    fn parse_module(&self, source: ModuleSource<'_>) -> Result<ModuleTree, SyntaxError> {
        let script = self
            .modules
            .get(source.name)
            .ok_or_else(|| SyntaxError::new(format!("no script for module '{}'", source.name), 1, 0))?;
        let mut tree = if source.is_package {
            ModuleTree::new_package(source.name, source.file)
        } else {
            ModuleTree::new(source.name, source.file)
        }
        .with_language_level(source.language_level);
        script(&mut tree.builder());
        self.parsed_modules
            .lock()
            .unwrap()
            .push((source.name.to_string(), source.text.to_string()));
        Ok(tree)
    }

    fn parse_code(
        &self,
        tree: &mut ModuleTree,
        code: &str,
        location: &SourceLocation,
    ) -> Result<Vec<NodeId>, SyntaxError> {
        let script = self
            .code
            .get(code)
            .ok_or_else(|| SyntaxError::new("invalid syntax", 1, 0))?;
        let mut builder = tree.builder();
        builder.at(location.line, location.column);
        Ok(script(&mut builder))
    }

    fn parse_expression(
        &self,
        tree: &mut ModuleTree,
        code: &str,
        location: &SourceLocation,
    ) -> Result<NodeId, SyntaxError> {
        let script = self
            .expressions
            .get(code)
            .ok_or_else(|| SyntaxError::new("invalid syntax", 1, 0))?;
        let mut builder = tree.builder();
        builder.at(location.line, location.column);
        Ok(script(&mut builder))
    }
}
