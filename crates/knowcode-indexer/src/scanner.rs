use crate::error::{IndexerError, Result};
use crate::paths::KNOWCODE_DIR_NAME;
use ignore::WalkBuilder;
use knowcode_parsers::Language;
use std::path::{Path, PathBuf};

/// Directories never worth scanning, regardless of gitignore contents.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "build",
    "dist",
    ".idea",
    ".vscode",
    KNOWCODE_DIR_NAME,
];

/// A discovered source file.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Root-relative path with forward slashes; used in entity ids
    pub relative_path: String,
    pub language: Language,
}

/// Enumerates source files under a root with layered ignore rules:
/// the built-in denylist, user patterns, then in-tree gitignore semantics
/// (handled by the `ignore` walker with standard precedence).
pub struct FileScanner {
    root: PathBuf,
    extra_ignores: Vec<String>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extra_ignores: Vec::new(),
        }
    }

    /// Additional glob patterns to exclude (gitignore syntax).
    pub fn with_ignores(mut self, patterns: Vec<String>) -> Self {
        self.extra_ignores = patterns;
        self
    }

    /// Scan and return a stable, sorted list of supported files.
    /// An unreadable entry is logged and skipped; an unusable root is
    /// fatal.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "not a directory: {}",
                self.root.display()
            )));
        }

        let mut overrides = ignore::overrides::OverrideBuilder::new(&self.root);
        for pattern in &self.extra_ignores {
            // an override starting with '!' excludes matches
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| IndexerError::Other(format!("bad ignore pattern: {e}")))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| IndexerError::Other(format!("ignore patterns: {e}")))?;

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .overrides(overrides)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|t| t.is_dir())
                    && IGNORED_DIRS.contains(&name.as_ref()))
            })
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let language = Language::from_path(entry.path());
            if language == Language::Unknown {
                continue;
            }
            let relative_path = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                relative_path,
                language,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        log::info!("Scanned {}: {} source files", self.root.display(), files.len());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_sorted_with_language_tags() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.py"), "x = 1\n");
        touch(&dir.path().join("a/app.ts"), "export const x = 1;\n");
        touch(&dir.path().join("README.md"), "# hi\n");
        touch(&dir.path().join("ignore.bin"), "\x00");

        let files = FileScanner::new(dir.path()).scan().unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["README.md", "a/app.ts", "b.py"]);
        assert_eq!(files[1].language, Language::TypeScript);
    }

    #[test]
    fn test_denylist_directories_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/ok.py"), "x = 1\n");
        touch(&dir.path().join("node_modules/bad.js"), "x");
        touch(&dir.path().join(".knowcode/index/chunks.json"), "{}");
        touch(&dir.path().join("__pycache__/bad.py"), "x");

        let files = FileScanner::new(dir.path()).scan().unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["src/ok.py"]);
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".gitignore"), "generated/\n");
        touch(&dir.path().join("src/ok.py"), "x = 1\n");
        touch(&dir.path().join("generated/gen.py"), "x = 1\n");
        // the ignore walker applies .gitignore inside git repositories
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let files = FileScanner::new(dir.path()).scan().unwrap();
        assert!(files.iter().all(|f| !f.relative_path.starts_with("generated")));
    }

    #[test]
    fn test_user_patterns_layered_on_top() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/ok.py"), "x = 1\n");
        touch(&dir.path().join("src/skip_me.py"), "x = 1\n");

        let files = FileScanner::new(dir.path())
            .with_ignores(vec!["skip_*.py".to_string()])
            .scan()
            .unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["src/ok.py"]);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        assert!(FileScanner::new("/definitely/not/here").scan().is_err());
    }
}
