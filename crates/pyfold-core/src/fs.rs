//! File system access
//!
//! Module lookup and loading go through [`FileSystem`] so tests can run the
//! whole import machinery against an in-memory tree.

use rustc_hash::{FxHashMap, FxHashSet};
use std::io;
use std::path::{Path, PathBuf};

pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<String>;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Names of the entries directly inside `path`, exactly as stored
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;
}

/// The real file system
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem
    }
}

impl FileSystem for RealFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

/// In-memory file system for tests
///
/// Every ancestor of an added file exists as a directory.
#[derive(Debug, Default, Clone)]
pub struct MockFileSystem {
    files: FxHashMap<PathBuf, String>,
    directories: FxHashSet<PathBuf>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>, content: &str) {
        let path = path.as_ref().to_path_buf();
        for ancestor in path.ancestors().skip(1) {
            self.directories.insert(ancestor.to_path_buf());
        }
        self.files.insert(path, content.to_string());
    }

    /// Builder form of [`MockFileSystem::add_file`]
    pub fn with_file(mut self, path: impl AsRef<Path>, content: &str) -> Self {
        self.add_file(path, content);
        self
    }
}

impl FileSystem for MockFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path.display()))
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.directories.contains(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        if !self.is_dir(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", path.display()),
            ));
        }
        let mut names: Vec<String> = self
            .files
            .keys()
            .chain(self.directories.iter())
            .filter(|entry| entry.parent() == Some(path))
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_implies_parent_directories() {
        let fs = MockFileSystem::new().with_file("/src/pkg/__init__.py", "");

        assert!(fs.is_dir(Path::new("/src")));
        assert!(fs.is_dir(Path::new("/src/pkg")));
        assert!(fs.is_file(Path::new("/src/pkg/__init__.py")));
        assert!(!fs.is_file(Path::new("/src/pkg")));
    }

    #[test]
    fn test_mock_lists_direct_entries_only() {
        let fs = MockFileSystem::new()
            .with_file("/src/a.py", "")
            .with_file("/src/pkg/b.py", "");

        assert_eq!(fs.list_dir(Path::new("/src")).unwrap(), vec!["a.py", "pkg"]);
        assert!(fs.list_dir(Path::new("/missing")).is_err());
    }

    #[test]
    fn test_mock_read_missing_file() {
        let fs = MockFileSystem::new().with_file("/src/a.py", "x = 1\n");

        assert_eq!(fs.read_file(Path::new("/src/a.py")).unwrap(), "x = 1\n");
        let err = fs.read_file(Path::new("/src/b.py")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_real_file_system_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.py"), "pass\n").unwrap();
        let fs = RealFileSystem::new();

        assert!(fs.is_dir(dir.path()));
        assert!(fs.is_file(&dir.path().join("m.py")));
        assert_eq!(fs.list_dir(dir.path()).unwrap(), vec!["m.py"]);
        assert_eq!(fs.read_file(&dir.path().join("m.py")).unwrap(), "pass\n");
    }
}
