//! The unpacked library source tree as an explicit resource handle.
//!
//! Stages receive the tree instead of relying on the working directory:
//! the engine takes `&mut SourceTree` (it is the only writer), the verifier
//! and the build orchestrator take `&SourceTree` (read and inspect only).
//! All rule paths are tree-relative; the handle enforces that every file it
//! reads or writes stays inside the canonical root, symlinks included.

use crate::config::Scope;
use crate::edit::{EditError, Rewrite, RewriteResult};
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("failed to open source tree {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("source tree root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("scope entry '{0}' escapes the source tree")]
    Escape(String),

    #[error("path is outside source tree: {path} (tree: {root})")]
    OutsideTree { path: PathBuf, root: PathBuf },

    #[error("invalid scope glob '{pattern}': {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Files a scope resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeResolution {
    /// Existing files, tree-relative, sorted.
    pub files: BTreeSet<PathBuf>,
    /// Explicit paths that do not exist in this tree.
    pub missing: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    /// Open a tree; the root is canonicalized so symlinked roots work.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, TreeError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|source| TreeError::Open {
            path: root.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(TreeError::NotADirectory(canonical));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a tree-relative path.
    pub fn path_of(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Resolve a rule scope to existing files.
    ///
    /// Explicit paths that do not exist are reported in `missing` rather than
    /// failing; a path or glob escaping the tree is an error.
    pub fn resolve(&self, scope: &Scope) -> Result<ScopeResolution, TreeError> {
        let mut resolution = ScopeResolution::default();

        for entry in &scope.paths {
            let relative = tree_relative(entry)?;
            let absolute = self.path_of(&relative);
            if absolute.is_file() {
                self.check_inside(&absolute)?;
                resolution.files.insert(relative);
            } else {
                resolution.missing.push(relative);
            }
        }

        if !scope.globs.is_empty() {
            let patterns = scope
                .globs
                .iter()
                .map(|pattern| {
                    tree_relative(pattern)?;
                    glob::Pattern::new(pattern.trim_start_matches("./")).map_err(|source| {
                        TreeError::Glob {
                            pattern: pattern.clone(),
                            source,
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let options = glob::MatchOptions {
                case_sensitive: true,
                require_literal_separator: true,
                require_literal_leading_dot: true,
            };

            for relative in self.files()? {
                let display = slash_path(&relative);
                if patterns.iter().any(|p| p.matches_with(&display, options)) {
                    self.check_inside(&self.path_of(&relative))?;
                    resolution.files.insert(relative);
                }
            }
        }

        Ok(resolution)
    }

    /// Every regular file in the tree, tree-relative. Hidden directories
    /// (`.git`, ...) are skipped.
    pub fn files(&self) -> Result<Vec<PathBuf>, TreeError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
        Ok(files)
    }

    pub fn read_to_string(&self, relative: &Path) -> Result<String, TreeError> {
        let path = self.path_of(relative);
        std::fs::read_to_string(&path).map_err(|source| TreeError::Io { path, source })
    }

    /// Replace a file's content, guarded by the content it was computed from.
    ///
    /// Requires `&mut self`: only the patch engine writes to the tree.
    pub fn rewrite(
        &mut self,
        relative: &Path,
        before: &str,
        after: &str,
    ) -> Result<RewriteResult, EditError> {
        let path = self.path_of(relative);
        self.check_inside(&path)
            .map_err(|_| EditError::OutsideTree(path.clone()))?;
        Rewrite::new(path, before, after).apply()
    }

    fn check_inside(&self, path: &Path) -> Result<(), TreeError> {
        let canonical = path.canonicalize().map_err(|source| TreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !canonical.starts_with(&self.root) {
            return Err(TreeError::OutsideTree {
                path: canonical,
                root: self.root.clone(),
            });
        }
        Ok(())
    }
}

/// Lexically validate a tree-relative entry and drop `.` components.
fn tree_relative(entry: &str) -> Result<PathBuf, TreeError> {
    let path = Path::new(entry.trim());
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(TreeError::Escape(entry.to_string())),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(TreeError::Escape(entry.to_string()));
    }
    Ok(relative)
}

/// `/`-separated form used for glob matching and reports.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
