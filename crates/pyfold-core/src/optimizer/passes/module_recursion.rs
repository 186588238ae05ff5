use crate::ast::{ImportRecursion, ModuleTree, NodeId, NodeKind};
use crate::config::{FollowImports, OptimizationLevel};
use crate::errors::CompilationError;
use crate::module_resolver::{ModuleKind, ModuleLocation};
use crate::optimizer::{OptimizationPass, PassContext, Tag, TagSet};
use crate::source::ModuleSource;
use tracing::{debug, warn};

/// Modules that are absent on purpose on most platforms
const SILENT_MISSING_MODULES: &[&str] = &[
    "_winreg", "winreg", "msvcrt", "_msi", "nt", "ntpath", "_scproxy", "riscos", "riscosenviron", "os2",
    "ce", "java", "org", "__pypy__", "_overlapped", "_winapi",
];

/// Resolves pending imports and embeds followed modules into the session
pub struct ModuleRecursionPass;

impl ModuleRecursionPass {
    pub fn new() -> Self {
        ModuleRecursionPass
    }
}

impl Default for ModuleRecursionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for ModuleRecursionPass {
    fn name(&self) -> &'static str {
        "module-recursion"
    }

    fn min_level(&self) -> OptimizationLevel {
        OptimizationLevel::O0
    }

    fn interests(&self) -> TagSet {
        TagSet::of(&[Tag::NewCode, Tag::NewImport])
    }

    fn run(&mut self, tree: &mut ModuleTree, ctx: &mut PassContext<'_>) -> Result<TagSet, CompilationError> {
        let mut tags = TagSet::empty();
        let imports: Vec<NodeId> = tree
            .descendants(tree.root())
            .into_iter()
            .filter(|id| {
                matches!(
                    tree.kind(*id),
                    NodeKind::ImportModule {
                        recursion: ImportRecursion::Pending,
                        ..
                    }
                )
            })
            .collect();

        for import in imports {
            let outcome = resolve_import(tree, import, ctx);
            if outcome == ImportRecursion::Embedded {
                tags |= Tag::NewImport;
            }
            if let NodeKind::ImportModule { recursion, .. } = tree.kind_mut(import) {
                *recursion = outcome;
            }
        }
        Ok(tags)
    }
}

/// Package the importing module lives in; a package is its own parent
fn containing_package(tree: &ModuleTree) -> Option<String> {
    if tree.is_package() {
        return Some(tree.name().to_string());
    }
    tree.name().rsplit_once('.').map(|(package, _)| package.to_string())
}

/// Absolute name of `from ..name import x` style imports
fn relative_target(package: Option<&str>, name: &str, level: u32) -> Option<String> {
    let package = package?;
    let mut components: Vec<&str> = package.split('.').collect();
    for _ in 1..level {
        components.pop()?;
    }
    if components.is_empty() {
        return None;
    }
    let base = components.join(".");
    Some(if name.is_empty() { base } else { format!("{base}.{name}") })
}

fn should_follow(found: &ModuleLocation, ctx: &PassContext<'_>) -> bool {
    match ctx.options.follow_imports {
        FollowImports::None => false,
        FollowImports::All => !found.is_stdlib,
        FollowImports::Stdlib => true,
        FollowImports::Listed => ctx.options.follow_import_list.iter().any(|listed| {
            found.name == *listed || found.name.starts_with(&format!("{listed}."))
        }),
    }
}

fn is_silently_missing(name: &str, ctx: &PassContext<'_>) -> bool {
    let top_level = name.split('.').next().unwrap_or(name);
    SILENT_MISSING_MODULES.contains(&top_level)
        || ctx
            .options
            .ignored_missing_modules
            .iter()
            .any(|ignored| ignored == name || ignored == top_level)
}

fn resolve_import(tree: &ModuleTree, import: NodeId, ctx: &mut PassContext<'_>) -> ImportRecursion {
    let NodeKind::ImportModule { module_name, level, .. } = tree.kind(import) else {
        return ImportRecursion::External;
    };
    let (module_name, level) = (module_name.clone(), *level);
    let package = containing_package(tree);
    let location = tree.location(import).clone();

    let found = if level > 0 {
        relative_target(package.as_deref(), &module_name, level)
            .and_then(|absolute| ctx.resolver.locate(&absolute, None, &ctx.options.search_path))
    } else if tree.language_level.is_python2() {
        // Python 2 tries the sibling module before the absolute one
        ctx.resolver
            .locate(&module_name, package.as_deref(), &ctx.options.search_path)
    } else {
        ctx.resolver.locate(&module_name, None, &ctx.options.search_path)
    };

    let Some(found) = found else {
        if !is_silently_missing(&module_name, ctx)
            && ctx
                .registry
                .first_missing_report(&module_name, package.as_deref(), level)
        {
            warn!(module = %module_name, importer = tree.name(), "cannot find imported module");
            ctx.handler
                .warning(&location, &format!("cannot find module '{module_name}'"));
        }
        return ImportRecursion::NotFound;
    };

    if !should_follow(&found, ctx) {
        return ImportRecursion::External;
    }
    if ctx.registry.is_known(&found.name) {
        return ImportRecursion::Embedded;
    }

    let text = match ctx.file_system.read_file(&found.path) {
        Ok(text) => text,
        Err(err) => {
            let failure = CompilationError::ModuleLoad {
                module: found.name.clone(),
                message: err.to_string(),
            };
            warn!(path = %found.path.display(), "{failure}");
            ctx.handler.warning(&location, &failure.to_string());
            return ImportRecursion::External;
        }
    };
    let file = found.path.to_string_lossy().into_owned();
    let source = ModuleSource {
        name: &found.name,
        file: &file,
        text: &text,
        is_package: found.kind == ModuleKind::Package,
        language_level: ctx.options.target,
    };
    match ctx.parser.parse_module(source) {
        Ok(module) => {
            debug!(module = %found.name, importer = tree.name(), "embedding imported module");
            ctx.registry.queue(module);
            ImportRecursion::Embedded
        }
        Err(err) => {
            warn!(module = %found.name, "cannot parse imported module: {err}");
            ctx.handler
                .warning(&location, &format!("cannot parse module '{}': {err}", found.name));
            ImportRecursion::External
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_target() {
        assert_eq!(relative_target(Some("pkg.sub"), "mod", 1), Some("pkg.sub.mod".to_string()));
        assert_eq!(relative_target(Some("pkg.sub"), "mod", 2), Some("pkg.mod".to_string()));
        assert_eq!(relative_target(Some("pkg.sub"), "", 2), Some("pkg".to_string()));
        assert_eq!(relative_target(Some("pkg"), "mod", 3), None);
        assert_eq!(relative_target(None, "mod", 1), None);
    }

    #[test]
    fn test_containing_package() {
        assert_eq!(containing_package(&ModuleTree::new("pkg.mod", "pkg/mod.py")), Some("pkg".to_string()));
        assert_eq!(
            containing_package(&ModuleTree::new_package("pkg", "pkg/__init__.py")),
            Some("pkg".to_string())
        );
        assert_eq!(containing_package(&ModuleTree::new("main", "main.py")), None);
    }
}
