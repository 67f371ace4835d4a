//! Ingestion-boundary file filtering.
//!
//! Decides which repository files are worth chunking: vendor and build
//! directories, binaries, generated bundles and oversized files are skipped
//! before any parsing work is done.

use std::collections::HashSet;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref GENERATED_FILE: Regex =
        Regex::new(r"(\.min\.|\.generated\.|\.g\.|[.-]bundle\.|\.map$|-lock\.)")
            .expect("generated-file pattern is valid");
}

/// Why a file was left out of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    TooLarge { size: usize, max: usize },
    ExcludedDirectory(String),
    Hidden(String),
    ExcludedExtension(String),
    Generated,
    Binary,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "empty file"),
            SkipReason::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            SkipReason::ExcludedDirectory(dir) => write!(f, "in excluded directory: {dir}"),
            SkipReason::Hidden(name) => write!(f, "hidden path component: {name}"),
            SkipReason::ExcludedExtension(ext) => write!(f, "excluded extension: {ext}"),
            SkipReason::Generated => write!(f, "generated file"),
            SkipReason::Binary => write!(f, "binary content"),
        }
    }
}

/// Configuration for file filtering.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Directory names skipped anywhere in the path.
    pub excluded_directories: HashSet<String>,
    /// Lowercase extensions without the dot.
    pub excluded_extensions: HashSet<String>,
    /// Maximum file size in bytes.
    pub max_file_size: usize,
    /// Whether hidden files and directories are ingested.
    pub include_hidden: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_directories: [
                ".git", ".svn", ".hg", "node_modules", "vendor", ".venv", "venv",
                "__pycache__", ".pytest_cache", ".mypy_cache", ".tox", "target", "build",
                "dist", "out", ".next", ".nuxt", "coverage", ".idea", ".vscode",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_extensions: [
                "pyc", "pyo", "so", "dll", "dylib", "class", "o", "obj", "exe", "bin", "a",
                "zip", "tar", "gz", "bz2", "xz", "rar", "7z", "jpg", "jpeg", "png", "gif",
                "bmp", "ico", "svg", "webp", "pdf", "doc", "docx", "xls", "xlsx", "mp3",
                "mp4", "mov", "wav", "db", "sqlite", "sqlite3", "lock", "woff", "woff2",
                "ttf", "eot", "otf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_size: 1024 * 1024,
            include_hidden: false,
        }
    }
}

/// File filter for determining which files to ingest.
pub struct FileFilter {
    config: FilterConfig,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl FileFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Check path and size rules. `Err` carries the reason to skip.
    pub fn check(&self, path: &str, size: usize) -> Result<(), SkipReason> {
        if size == 0 {
            return Err(SkipReason::Empty);
        }
        if size > self.config.max_file_size {
            return Err(SkipReason::TooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let path_obj = Path::new(path);
        for component in path_obj.components() {
            let Some(name) = component.as_os_str().to_str() else {
                continue;
            };
            if self.config.excluded_directories.contains(name) {
                return Err(SkipReason::ExcludedDirectory(name.to_string()));
            }
            if !self.config.include_hidden
                && name.starts_with('.')
                && name != "."
                && name != ".."
                && !matches!(name, ".github" | ".gitignore" | ".env.example")
            {
                return Err(SkipReason::Hidden(name.to_string()));
            }
        }

        if let Some(ext) = path_obj.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_lowercase();
            if self.config.excluded_extensions.contains(&ext) {
                return Err(SkipReason::ExcludedExtension(ext));
            }
        }

        if let Some(filename) = path_obj.file_name().and_then(|n| n.to_str()) {
            if GENERATED_FILE.is_match(filename) {
                return Err(SkipReason::Generated);
            }
        }

        Ok(())
    }

    /// Check that raw bytes look like text.
    pub fn check_content(&self, content: &[u8]) -> Result<(), SkipReason> {
        if is_binary_content(content, 8192) {
            Err(SkipReason::Binary)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

/// Null bytes or a high ratio of control characters in the sample mean binary.
pub fn is_binary_content(content: &[u8], sample_size: usize) -> bool {
    let sample = &content[..content.len().min(sample_size)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }

    let non_printable = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, 9 | 10 | 13))
        .count();

    (non_printable as f64 / sample.len() as f64) > 0.1
}
