//! Locating imported modules
//!
//! Module recursion asks a [`ModuleResolver`] where an import points. The
//! file-system resolver follows the usual package layout: a dotted name maps
//! to nested package directories ending in `name.py` or
//! `name/__init__.py`.

use crate::fs::{FileSystem, RealFileSystem};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    File,
    Package,
}

/// Where an import resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLocation {
    /// Fully qualified name the module was found under
    pub name: String,
    /// The `.py` file, `__init__.py` for packages
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub is_stdlib: bool,
}

pub trait ModuleResolver: Send + Sync {
    /// Find `name`, trying `parent_package.name` first when a parent is given
    fn locate(&self, name: &str, parent_package: Option<&str>, search_path: &[String]) -> Option<ModuleLocation>;
}

/// Resolver over directories on a [`FileSystem`]
///
/// Directory entries are compared byte for byte, so `Foo.py` never satisfies
/// `import foo` even on case-insensitive file systems.
#[derive(Clone)]
pub struct FileSystemModuleResolver {
    file_system: Arc<dyn FileSystem>,
    stdlib_paths: Vec<PathBuf>,
}

impl Default for FileSystemModuleResolver {
    fn default() -> Self {
        Self::new(Arc::new(RealFileSystem::new()), Vec::new())
    }
}

impl FileSystemModuleResolver {
    pub fn new(file_system: Arc<dyn FileSystem>, stdlib_paths: Vec<PathBuf>) -> Self {
        Self {
            file_system,
            stdlib_paths,
        }
    }

    fn locate_absolute(&self, name: &str, search_path: &[String]) -> Option<ModuleLocation> {
        let components: Vec<&str> = name.split('.').collect();
        if components.iter().any(|c| c.is_empty()) {
            return None;
        }

        let user_roots = search_path.iter().map(|p| (PathBuf::from(p), false));
        let stdlib_roots = self.stdlib_paths.iter().map(|p| (p.clone(), true));
        for (root, is_stdlib) in user_roots.chain(stdlib_roots) {
            if let Some((path, kind)) = self.locate_in(&root, &components) {
                trace!(module = name, path = %path.display(), "located module");
                return Some(ModuleLocation {
                    name: name.to_string(),
                    path,
                    kind,
                    is_stdlib,
                });
            }
        }
        None
    }

    fn has_exact_entry(&self, directory: &Path, entry: &str) -> bool {
        self.file_system
            .list_dir(directory)
            .map(|names| names.iter().any(|name| name == entry))
            .unwrap_or(false)
    }

    fn is_package_dir(&self, directory: &Path) -> bool {
        self.file_system.is_dir(directory) && self.has_exact_entry(directory, "__init__.py")
    }

    fn locate_in(&self, root: &Path, components: &[&str]) -> Option<(PathBuf, ModuleKind)> {
        let (last, packages) = components.split_last()?;
        let mut directory = root.to_path_buf();
        for package in packages {
            if !self.has_exact_entry(&directory, package) {
                return None;
            }
            directory.push(package);
            if !self.is_package_dir(&directory) {
                return None;
            }
        }

        if self.has_exact_entry(&directory, last) {
            let package = directory.join(last);
            if self.is_package_dir(&package) {
                return Some((package.join("__init__.py"), ModuleKind::Package));
            }
        }
        let file_name = format!("{last}.py");
        if self.has_exact_entry(&directory, &file_name) {
            let file = directory.join(file_name);
            if self.file_system.is_file(&file) {
                return Some((file, ModuleKind::File));
            }
        }
        None
    }
}

impl std::fmt::Debug for FileSystemModuleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemModuleResolver")
            .field("stdlib_paths", &self.stdlib_paths)
            .finish_non_exhaustive()
    }
}

impl ModuleResolver for FileSystemModuleResolver {
    fn locate(&self, name: &str, parent_package: Option<&str>, search_path: &[String]) -> Option<ModuleLocation> {
        if let Some(parent) = parent_package.filter(|p| !p.is_empty()) {
            let qualified = format!("{parent}.{name}");
            if let Some(found) = self.locate_absolute(&qualified, search_path) {
                return Some(found);
            }
        }
        self.locate_absolute(name, search_path)
    }
}

/// In-memory resolver for tests
#[derive(Debug, Default, Clone)]
pub struct MockModuleResolver {
    modules: FxHashMap<String, ModuleLocation>,
}

impl MockModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: &str, kind: ModuleKind, is_stdlib: bool) {
        let path = match kind {
            ModuleKind::File => PathBuf::from(format!("{}.py", name.replace('.', "/"))),
            ModuleKind::Package => PathBuf::from(format!("{}/__init__.py", name.replace('.', "/"))),
        };
        self.modules.insert(
            name.to_string(),
            ModuleLocation {
                name: name.to_string(),
                path,
                kind,
                is_stdlib,
            },
        );
    }
}

impl ModuleResolver for MockModuleResolver {
    fn locate(&self, name: &str, parent_package: Option<&str>, _search_path: &[String]) -> Option<ModuleLocation> {
        if let Some(parent) = parent_package.filter(|p| !p.is_empty()) {
            if let Some(found) = self.modules.get(&format!("{parent}.{name}")) {
                return Some(found.clone());
            }
        }
        self.modules.get(name).cloned()
    }
}
