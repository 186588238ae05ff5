use std::fmt;
use std::sync::Arc;

/// Position of a node in its source file
///
/// Every node carries one. Nodes created by rewrites inherit the location of
/// the node they replace so diagnostics keep pointing at user code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Same file, different position
    pub fn at(&self, line: u32, column: u32) -> Self {
        Self {
            file: Arc::clone(&self.file),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
