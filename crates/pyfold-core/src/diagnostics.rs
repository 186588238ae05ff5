use crate::ast::SourceLocation;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

impl DiagnosticLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the compiler wants the user to know about a source position.
///
/// Optimization never fails on a diagnostic; errors only stop a module from
/// joining the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            level,
            location,
            message: message.into(),
        }
    }

    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, location, message)
    }

    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, location, message)
    }

    pub fn info(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, location, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.level, self.message)
    }
}

/// Sink for diagnostics, injected through the container so tests can
/// collect instead of print.
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn error(&self, location: &SourceLocation, message: &str) {
        self.report(Diagnostic::error(location.clone(), message));
    }

    fn warning(&self, location: &SourceLocation, message: &str) {
        self.report(Diagnostic::warning(location.clone(), message));
    }

    fn info(&self, location: &SourceLocation, message: &str) {
        self.report(Diagnostic::info(location.clone(), message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    fn warning_count(&self) -> usize {
        self.count(DiagnosticLevel::Warning)
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.get_diagnostics().iter().filter(|d| d.level == level).count()
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

fn lock(diagnostics: &Mutex<Vec<Diagnostic>>) -> MutexGuard<'_, Vec<Diagnostic>> {
    diagnostics.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prints each diagnostic to stderr as `file:line:col: level: message`
/// and mirrors it into the tracing stream.
pub struct ConsoleDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    pretty: bool,
}

impl ConsoleDiagnosticHandler {
    pub fn new(pretty: bool) -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            pretty,
        }
    }
}

impl DiagnosticHandler for ConsoleDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.level {
            DiagnosticLevel::Error => tracing::error!(location = %diagnostic.location, "{}", diagnostic.message),
            DiagnosticLevel::Warning => tracing::warn!(location = %diagnostic.location, "{}", diagnostic.message),
            DiagnosticLevel::Info => tracing::info!(location = %diagnostic.location, "{}", diagnostic.message),
        }

        if self.pretty && diagnostic.level != DiagnosticLevel::Info {
            eprintln!(
                "{}: \x1b[1m{}\x1b[0m: {}",
                diagnostic.location, diagnostic.level, diagnostic.message
            );
        } else {
            eprintln!("{diagnostic}");
        }

        lock(&self.diagnostics).push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}

/// Keeps diagnostics in memory, in report order.
#[derive(Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics sorted by file then position
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut all = lock(&self.diagnostics).clone();
        all.sort_by(|a, b| {
            (&*a.location.file, a.location.line, a.location.column)
                .cmp(&(&*b.location.file, b.location.line, b.location.column))
        });
        all
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        lock(&self.diagnostics).push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}
