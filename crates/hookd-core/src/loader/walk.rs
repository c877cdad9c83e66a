//! Breadth-first discovery of plugin files.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use regex::RegexSet;
use tracing::{debug, warn};

/// A candidate plugin file found during a load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFile {
    pub path: PathBuf,
    /// Directory containing `path`; handler commands run here.
    pub dir: PathBuf,
}

impl PluginFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self { path, dir }
    }
}

/// Name patterns excluded from discovery.
#[derive(Debug, Clone)]
pub struct IgnorePatterns {
    dirs: RegexSet,
    files: RegexSet,
}

const IGNORE_DIR_PATTERNS: &[&str] = &[
    // Hidden directories
    r"^\.",
    r"^target$",
    r"^__pycache__$",
    r"^node_modules$",
];

const IGNORE_FILE_PATTERNS: &[&str] = &[
    // Hidden files
    r"^\.",
    // Editor backups
    r"~$",
    r"\.(bak|swp|tmp)$",
    // Compiled artifacts
    r"\.(o|a|so|dylib|dll|rlib|rmeta|pyc|pyo|class)$",
];

impl Default for IgnorePatterns {
    fn default() -> Self {
        Self {
            dirs: RegexSet::new(IGNORE_DIR_PATTERNS).unwrap(),
            files: RegexSet::new(IGNORE_FILE_PATTERNS).unwrap(),
        }
    }
}

impl IgnorePatterns {
    #[must_use]
    pub fn ignores_dir(&self, name: &str) -> bool {
        self.dirs.is_match(name)
    }

    #[must_use]
    pub fn ignores_file(&self, name: &str) -> bool {
        self.files.is_match(name)
    }
}

/// Enumerate files under `root` breadth-first.
///
/// Entries in a directory are visited in name order, so a directory's own
/// files always come before anything in its subdirectories. Links to
/// directories are not followed; links to files are. A `root` that is a file
/// is returned as the only candidate; a missing `root` yields nothing.
#[must_use]
pub fn walk(root: &Path, ignore: &IgnorePatterns) -> Vec<PluginFile> {
    if root.is_file() {
        return vec![PluginFile::new(root.to_path_buf())];
    }

    if !root.is_dir() {
        warn!("Handler path does not exist: {}", root.display());
        return Vec::new();
    }

    let mut files = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read handler directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Ok(file_type) = entry.file_type() else {
                warn!("Failed to read file type of {}", path.display());
                continue;
            };

            if file_type.is_symlink() && path.is_dir() {
                debug!("Not following directory link {}", path.display());
            } else if file_type.is_dir() {
                if ignore.ignores_dir(&name) {
                    debug!("Skipping ignored directory {}", path.display());
                } else {
                    queue.push_back(path);
                }
            } else if ignore.ignores_file(&name) {
                debug!("Skipping ignored file {}", path.display());
            } else {
                files.push(PluginFile::new(path));
            }
        }
    }

    files
}
