//! Source parser contract
//!
//! The front end lives outside this crate. Module recursion hands it module
//! files and builtin folding hands it the text of constant `exec`/`eval`
//! calls; both only ever see the trees it produces.

use crate::ast::{ModuleTree, NodeId, SourceLocation};
use crate::config::LanguageLevel;
use thiserror::Error;

/// Parse failure in module text or dynamic code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// What a module file is to be parsed as
#[derive(Debug, Clone, Copy)]
pub struct ModuleSource<'a> {
    pub name: &'a str,
    pub file: &'a str,
    pub text: &'a str,
    pub is_package: bool,
    pub language_level: LanguageLevel,
}

pub trait SourceParser: Send + Sync {
    /// Parse a whole module into a fresh tree with unresolved names
    fn parse_module(&self, source: ModuleSource<'_>) -> Result<ModuleTree, SyntaxError>;

    /// Parse statements of dynamic code into detached nodes of `tree`
    fn parse_code(
        &self,
        tree: &mut ModuleTree,
        code: &str,
        location: &SourceLocation,
    ) -> Result<Vec<NodeId>, SyntaxError>;

    /// Parse a single expression into a detached node of `tree`
    fn parse_expression(
        &self,
        tree: &mut ModuleTree,
        code: &str,
        location: &SourceLocation,
    ) -> Result<NodeId, SyntaxError>;
}

/// Parser for sessions without a front end; declines everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSourceParser;

impl NoSourceParser {
    fn decline(location: Option<&SourceLocation>) -> SyntaxError {
        let (line, column) = location.map_or((0, 0), |l| (l.line, l.column));
        SyntaxError::new("no source parser configured", line, column)
    }
}

impl SourceParser for NoSourceParser {
    fn parse_module(&self, _source: ModuleSource<'_>) -> Result<ModuleTree, SyntaxError> {
        Err(Self::decline(None))
    }

    fn parse_code(
        &self,
        _tree: &mut ModuleTree,
        _code: &str,
        location: &SourceLocation,
    ) -> Result<Vec<NodeId>, SyntaxError> {
        Err(Self::decline(Some(location)))
    }

    fn parse_expression(
        &self,
        _tree: &mut ModuleTree,
        _code: &str,
        location: &SourceLocation,
    ) -> Result<NodeId, SyntaxError> {
        Err(Self::decline(Some(location)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_parser_declines_with_location() {
        let mut tree = ModuleTree::new("m", "m.py");
        let location = SourceLocation::new("m.py", 7, 2);
        let error = NoSourceParser.parse_code(&mut tree, "x = 1", &location).unwrap_err();
        assert_eq!((error.line, error.column), (7, 2));
        assert!(error.to_string().contains("line 7"));
    }
}
