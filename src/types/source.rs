//! Repository-side input types: files and the change sets between commits.

use serde::{Deserialize, Serialize};

use crate::processing::{Language, LanguageDetector};

lazy_static::lazy_static! {
    static ref DETECTOR: LanguageDetector = LanguageDetector::new();
}

/// A file read from the repository, ready to be chunked.
///
/// Immutable once read. Content is always valid UTF-8; the
/// repository reader rejects anything else before a `SourceFile` exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Repository-relative path using `/` separators
    pub path: String,
    /// Full file content
    pub raw_content: String,
    /// Detected language
    pub language: Language,
    /// Size of the content in bytes
    pub size_bytes: usize,
}

impl SourceFile {
    /// Build a source file, detecting the language from path and content.
    pub fn new(path: impl Into<String>, raw_content: impl Into<String>) -> Self {
        let path = path.into();
        let raw_content = raw_content.into();
        let language = DETECTOR.detect(&path, Some(&raw_content)).language;
        Self {
            size_bytes: raw_content.len(),
            path,
            raw_content,
            language,
        }
    }

    /// Build a source file with an explicit language.
    pub fn with_language(
        path: impl Into<String>,
        raw_content: impl Into<String>,
        language: Language,
    ) -> Self {
        let raw_content = raw_content.into();
        Self {
            path: path.into(),
            size_bytes: raw_content.len(),
            raw_content,
            language,
        }
    }

    /// Decode raw bytes, returning `None` for non-UTF-8 content.
    pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        String::from_utf8(bytes)
            .ok()
            .map(|content| Self::new(path, content))
    }

    /// True when the file holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.raw_content.trim().is_empty()
    }
}

/// How a path changed between two commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
}

/// A single changed path in a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub change_type: ChangeType,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            change_type,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(path, ChangeType::Modified)
    }
}

/// The diff between two commits, produced once per processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub old_commit: String,
    pub new_commit: String,
    pub changed_files: Vec<ChangedFile>,
}

impl ChangeSet {
    pub fn new(
        old_commit: impl Into<String>,
        new_commit: impl Into<String>,
        changed_files: Vec<ChangedFile>,
    ) -> Self {
        Self {
            old_commit: old_commit.into(),
            new_commit: new_commit.into(),
            changed_files,
        }
    }

    /// A change set where every path is `Modified`.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed_files: paths.into_iter().map(ChangedFile::modified).collect(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.changed_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty()
    }

    /// Paths whose current content must be (re)indexed.
    pub fn paths_to_index(&self) -> impl Iterator<Item = &str> {
        self.changed_files
            .iter()
            .filter(|f| f.change_type != ChangeType::Deleted)
            .map(|f| f.path.as_str())
    }

    /// Paths whose records must be removed: deletions and rename sources.
    pub fn paths_to_remove(&self) -> impl Iterator<Item = &str> {
        self.changed_files.iter().filter_map(|f| match &f.change_type {
            ChangeType::Deleted => Some(f.path.as_str()),
            ChangeType::Renamed { from } => Some(from.as_str()),
            _ => None,
        })
    }
}

/// Coarse facts about the repository used for auxiliary strategy signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoCharacteristics {
    /// Number of files currently in the repository (0 when unknown)
    pub total_files: usize,
    /// Total bytes of source currently in the repository (0 when unknown)
    pub total_bytes: u64,
}
