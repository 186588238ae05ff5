use crate::errors::CompilationError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Python language level the analysed code targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageLevel {
    #[serde(rename = "2.7")]
    Python27,
    #[serde(rename = "3")]
    Python3,
}

impl Default for LanguageLevel {
    fn default() -> Self {
        LanguageLevel::Python27
    }
}

impl LanguageLevel {
    pub fn is_python2(self) -> bool {
        self == LanguageLevel::Python27
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// Closure resolution and finalization only
    O0,
    /// Tree-local passes
    O1,
    /// Adds the trace-driven pass
    O2,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::O2
    }
}

/// Which imports module recursion embeds into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowImports {
    None,
    Listed,
    All,
    Stdlib,
}

impl Default for FollowImports {
    fn default() -> Self {
        FollowImports::None
    }
}

/// Options that control analysis and optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    /// Target language level (default: 2.7)
    #[serde(default)]
    pub target: LanguageLevel,

    /// Optimization level (default: O2)
    #[serde(default)]
    pub optimization_level: OptimizationLevel,

    /// Import recursion policy (default: none)
    #[serde(default)]
    pub follow_imports: FollowImports,

    /// Modules followed under the `listed` policy
    #[serde(default)]
    pub follow_import_list: Vec<String>,

    /// Directories searched for imported modules
    #[serde(default)]
    pub search_path: Vec<String>,

    /// Re-parse constant exec/eval code and inline it (default: true)
    #[serde(default = "default_true")]
    pub inline_dynamic_execution: bool,

    /// Enable experimental passes (default: false)
    #[serde(default)]
    pub experimental: bool,

    /// Speculative loop passes before shapes degrade to unknown (default: 20)
    #[serde(default = "default_loop_convergence_limit")]
    pub loop_convergence_limit: usize,

    /// Optimization rounds before the pipeline gives up (default: 50)
    #[serde(default = "default_max_optimization_rounds")]
    pub max_optimization_rounds: usize,

    /// Modules whose absence is not reported
    #[serde(default)]
    pub ignored_missing_modules: Vec<String>,

    /// Pretty-print diagnostics (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

fn default_loop_convergence_limit() -> usize {
    20
}

fn default_max_optimization_rounds() -> usize {
    50
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            target: LanguageLevel::Python27,
            optimization_level: OptimizationLevel::O2,
            follow_imports: FollowImports::None,
            follow_import_list: Vec::new(),
            search_path: Vec::new(),
            inline_dynamic_execution: true,
            experimental: false,
            loop_convergence_limit: default_loop_convergence_limit(),
            max_optimization_rounds: default_max_optimization_rounds(),
            ignored_missing_modules: Vec::new(),
            pretty: true,
        }
    }
}

/// Main compiler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    #[serde(default)]
    pub compiler_options: CompilerOptions,
}

impl CompilerConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, CompilationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CompilationError> {
        let config: CompilerConfig =
            serde_json::from_str(content).map_err(|e| CompilationError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CompilationError> {
        let options = &self.compiler_options;
        if options.loop_convergence_limit == 0 {
            return Err(CompilationError::ConfigError(
                "loopConvergenceLimit must be at least 1".to_string(),
            ));
        }
        if options.max_optimization_rounds == 0 {
            return Err(CompilationError::ConfigError(
                "maxOptimizationRounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
