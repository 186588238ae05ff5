use crate::ast::SourceLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilationError {
    /// Statically detectable conflict in user code; halts the module
    #[error("{location}: {message}")]
    Semantic {
        location: SourceLocation,
        message: String,
    },

    #[error("pass '{pass}' failed at {location}: {source}")]
    PassFailed {
        pass: &'static str,
        location: SourceLocation,
        #[source]
        source: Box<CompilationError>,
    },

    #[error("cannot load module '{module}': {message}")]
    ModuleLoad { module: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CompilationError {
    pub fn semantic(location: &SourceLocation, message: impl Into<String>) -> Self {
        CompilationError::Semantic {
            location: location.clone(),
            message: message.into(),
        }
    }

    /// Location the error points at, when it has one
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            CompilationError::Semantic { location, .. } | CompilationError::PassFailed { location, .. } => {
                Some(location)
            }
            _ => None,
        }
    }

    /// Innermost error, looking through pass wrappers
    pub fn root_cause(&self) -> &CompilationError {
        match self {
            CompilationError::PassFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
