//! Tag-driven optimization pipeline
//!
//! Every pass reports what kind of change it made as a set of [`Tag`]s. A
//! round runs each pass whose interests intersect the tags of the previous
//! round, in registration order, over every module of the session. The first
//! round is seeded with [`Tag::NewCode`]; a round that emits nothing ends the
//! pipeline.

use crate::ast::ModuleTree;
use crate::config::{CompilerOptions, OptimizationLevel};
use crate::diagnostics::DiagnosticHandler;
use crate::errors::CompilationError;
use crate::fs::FileSystem;
use crate::module_resolver::ModuleResolver;
use crate::session::{absorb_pending, CompilationSession, ModuleRegistry};
use crate::source::SourceParser;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tracing::{debug, error, info, warn};

pub mod passes;

use passes::{
    BuiltinFoldingPass, ConstantFoldingPass, DeadCodeEliminationPass, ModuleRecursionPass, UnpackingPass,
    VariableTracesPass,
};

/// Kind of change a pass made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Code that no pass has looked at yet
    NewCode,
    NewConstant,
    NewStatements,
    NewBuiltin,
    NewExpression,
    NewImport,
    /// Assignments removed because nothing reads them
    ReadOnly,
}

impl Tag {
    pub const ALL: [Tag; 7] = [
        Tag::NewCode,
        Tag::NewConstant,
        Tag::NewStatements,
        Tag::NewBuiltin,
        Tag::NewExpression,
        Tag::NewImport,
        Tag::ReadOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::NewCode => "new_code",
            Tag::NewConstant => "new_constant",
            Tag::NewStatements => "new_statements",
            Tag::NewBuiltin => "new_builtin",
            Tag::NewExpression => "new_expression",
            Tag::NewImport => "new_import",
            Tag::ReadOnly => "read_only",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TagSet(u8);

impl TagSet {
    pub const fn empty() -> Self {
        TagSet(0)
    }

    pub fn all() -> Self {
        Self::of(&Tag::ALL)
    }

    pub fn of(tags: &[Tag]) -> Self {
        tags.iter().fold(Self::empty(), |set, tag| set.with(*tag))
    }

    pub fn with(self, tag: Tag) -> Self {
        TagSet(self.0 | tag.bit())
    }

    pub fn without(self, tag: Tag) -> Self {
        TagSet(self.0 & !tag.bit())
    }

    pub fn insert(&mut self, tag: Tag) {
        self.0 |= tag.bit();
    }

    pub fn contains(self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn intersects(self, other: TagSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Tag> {
        Tag::ALL.into_iter().filter(move |tag| self.contains(*tag))
    }
}

impl From<Tag> for TagSet {
    fn from(tag: Tag) -> Self {
        TagSet::empty().with(tag)
    }
}

impl BitOr for TagSet {
    type Output = TagSet;

    fn bitor(self, rhs: TagSet) -> TagSet {
        TagSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for TagSet {
    fn bitor_assign(&mut self, rhs: TagSet) {
        self.0 |= rhs.0;
    }
}

impl BitOrAssign<Tag> for TagSet {
    fn bitor_assign(&mut self, rhs: Tag) {
        self.insert(rhs);
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|tag| tag.as_str())).finish()
    }
}

/// Collaborators a pass may use while rewriting one module
pub struct PassContext<'a> {
    pub options: &'a CompilerOptions,
    pub handler: &'a dyn DiagnosticHandler,
    pub parser: &'a dyn SourceParser,
    pub resolver: &'a dyn ModuleResolver,
    /// Where followed modules are read from
    pub file_system: &'a dyn FileSystem,
    /// Modules of the session plus those discovered this round
    pub registry: &'a mut ModuleRegistry,
}

/// One rewrite over a module tree
pub trait OptimizationPass {
    fn name(&self) -> &'static str;

    fn min_level(&self) -> OptimizationLevel;

    /// Tags that make this pass worth running again
    fn interests(&self) -> TagSet;

    /// Rewrite `tree`, returning the tags of every change made
    fn run(&mut self, tree: &mut ModuleTree, ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError>;
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    pub rounds: usize,
    /// False when the round bound stopped the pipeline
    pub converged: bool,
    pub tags_emitted: TagSet,
    /// Pass invocations, counted per module
    pub pass_runs: usize,
}

/// Runs the registered passes until no tags fire
pub struct Optimizer {
    level: OptimizationLevel,
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new(level: OptimizationLevel) -> Self {
        let passes: Vec<Box<dyn OptimizationPass>> = vec![
            Box::new(ModuleRecursionPass::new()),
            Box::new(BuiltinFoldingPass),
            Box::new(ConstantFoldingPass),
            Box::new(UnpackingPass),
            Box::new(DeadCodeEliminationPass),
            Box::new(VariableTracesPass),
        ];
        Self { level, passes }
    }

    /// Returns the number of passes enabled at this level
    pub fn pass_count(&self) -> usize {
        self.enabled().count()
    }

    /// Returns the names of the passes enabled at this level, in queue order
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.enabled().map(|pass| pass.name()).collect()
    }

    fn enabled(&self) -> impl Iterator<Item = &Box<dyn OptimizationPass>> {
        self.passes.iter().filter(|pass| pass.min_level() <= self.level)
    }

    /// Run rounds over every module of the session until quiescence
    pub fn optimize(&mut self, session: &mut CompilationSession) -> Result<OptimizationReport, CompilationError> {
        let CompilationSession {
            options,
            handler,
            file_system,
            resolver,
            parser,
            modules,
            registry,
        } = session;
        let handler: &dyn DiagnosticHandler = handler.as_ref();

        let mut report = OptimizationReport::default();
        let mut pending = TagSet::from(Tag::NewCode);

        while !pending.is_empty() {
            if report.rounds == options.max_optimization_rounds {
                warn!(
                    rounds = report.rounds,
                    tags = ?pending,
                    "optimization did not converge, stopping"
                );
                if let Some(first) = modules.first() {
                    handler.warning(
                        &first.module_location(),
                        &format!(
                            "optimization stopped after {} rounds without converging",
                            report.rounds
                        ),
                    );
                }
                info!(rounds = report.rounds, modules = modules.len(), "optimization finished");
                return Ok(report);
            }
            report.rounds += 1;

            let mut emitted = TagSet::empty();
            for pass in self.passes.iter_mut() {
                if pass.min_level() > self.level || !pass.interests().intersects(pending) {
                    continue;
                }
                for tree in modules.iter_mut() {
                    let mut ctx = PassContext {
                        options: &*options,
                        handler,
                        parser: parser.as_ref(),
                        resolver: resolver.as_ref(),
                        file_system: file_system.as_ref(),
                        registry: &mut *registry,
                    };
                    report.pass_runs += 1;
                    match pass.run(tree, &mut ctx) {
                        Ok(tags) => {
                            if !tags.is_empty() {
                                debug!(pass = pass.name(), module = tree.name(), ?tags, "pass changed module");
                            }
                            emitted |= tags;
                        }
                        Err(err) => {
                            let location = err.location().cloned().unwrap_or_else(|| tree.module_location());
                            error!(pass = pass.name(), module = tree.name(), %location, "pass failed: {err}");
                            handler.error(&location, &format!("{} failed: {err}", pass.name()));
                            return Err(CompilationError::PassFailed {
                                pass: pass.name(),
                                location,
                                source: Box::new(err),
                            });
                        }
                    }
                }
                if absorb_pending(modules, registry, handler) > 0 {
                    emitted |= Tag::NewCode;
                }
            }

            debug!(round = report.rounds, tags = ?emitted, "optimization round done");
            report.tags_emitted |= emitted;
            pending = emitted;
        }

        report.converged = true;
        info!(rounds = report.rounds, modules = modules.len(), "optimization finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_operations() {
        let mut tags = TagSet::from(Tag::NewConstant);
        tags |= Tag::NewStatements;
        assert!(tags.contains(Tag::NewConstant));
        assert!(!tags.contains(Tag::NewCode));
        assert!(tags.intersects(TagSet::of(&[Tag::NewStatements, Tag::ReadOnly])));
        assert!(!tags.intersects(TagSet::from(Tag::NewImport)));
        assert_eq!(format!("{tags:?}"), "{\"new_constant\", \"new_statements\"}");
        assert!(TagSet::all().without(Tag::NewImport).intersects(tags));
    }

    #[test]
    fn test_passes_follow_registration_order() {
        let optimizer = Optimizer::new(OptimizationLevel::O2);
        assert_eq!(
            optimizer.pass_names(),
            vec![
                "module-recursion",
                "builtin-folding",
                "constant-folding",
                "unpacking",
                "dead-code-elimination",
                "variable-traces",
            ]
        );
    }

    #[test]
    fn test_levels_gate_passes() {
        assert_eq!(Optimizer::new(OptimizationLevel::O0).pass_names(), vec!["module-recursion"]);
        assert_eq!(Optimizer::new(OptimizationLevel::O1).pass_count(), 5);
        assert_eq!(Optimizer::new(OptimizationLevel::O2).pass_count(), 6);
    }
}
