//! Repository access: listing, reading and diffing files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::IngestError;
use crate::types::{ChangeSet, ChangeType, ChangedFile, RepoCharacteristics};

/// Where the pipeline reads repository content from.
///
/// Paths are repository-relative with `/` separators.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn list_files(&self) -> Result<Vec<String>, IngestError>;

    /// `None` when the path does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, IngestError>;

    async fn diff(&self, old_commit: &str, new_commit: &str) -> Result<ChangeSet, IngestError>;

    async fn characteristics(&self) -> Result<RepoCharacteristics, IngestError> {
        Ok(RepoCharacteristics {
            total_files: self.list_files().await?.len(),
            total_bytes: 0,
        })
    }
}

/// A checked-out working tree on local disk. Diffs shell out to `git`.
///
/// Files are read from the working tree, which is expected to be at the
/// run's current commit.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, IngestError> {
        let relative = Path::new(path);
        if relative.is_absolute() || relative.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(IngestError::Repository(format!("path escapes repository: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

fn to_relative(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl RepositorySource for LocalRepository {
    async fn list_files(&self) -> Result<Vec<String>, IngestError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    if entry.file_name() != ".git" {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    if let Some(relative) = to_relative(&self.root, &path) {
                        files.push(relative);
                    }
                }
            }
        }

        files.sort();
        debug!(root = %self.root.display(), files = files.len(), "Listed repository files");
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, IngestError> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn diff(&self, old_commit: &str, new_commit: &str) -> Result<ChangeSet, IngestError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["diff", "--name-status", "-M", old_commit, new_commit])
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Repository(format!(
                "git diff {old_commit}..{new_commit} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ChangeSet::new(old_commit, new_commit, parse_name_status(&stdout)?))
    }

    async fn characteristics(&self) -> Result<RepoCharacteristics, IngestError> {
        let files = self.list_files().await?;
        let mut total_bytes = 0u64;
        for file in &files {
            if let Ok(meta) = tokio::fs::metadata(self.root.join(file)).await {
                total_bytes += meta.len();
            }
        }
        Ok(RepoCharacteristics {
            total_files: files.len(),
            total_bytes,
        })
    }
}

/// Parse `git diff --name-status -M` output.
pub fn parse_name_status(output: &str) -> Result<Vec<ChangedFile>, IngestError> {
    let mut changes = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let status = fields[0].chars().next().unwrap_or(' ');
        let change = match (status, fields.as_slice()) {
            ('A' | 'C', [_, .., path]) => ChangedFile::new(*path, ChangeType::Added),
            ('M' | 'T', [_, path]) => ChangedFile::new(*path, ChangeType::Modified),
            ('D', [_, path]) => ChangedFile::new(*path, ChangeType::Deleted),
            ('R', [_, from, to]) => ChangedFile::new(
                *to,
                ChangeType::Renamed {
                    from: from.to_string(),
                },
            ),
            _ => {
                return Err(IngestError::Repository(format!(
                    "unrecognized diff line: {line}"
                )))
            }
        };
        changes.push(change);
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_name_status() {
        let output = "M\tsrc/db.js\nA\tsrc/new.rs\nD\told.py\nR087\tsrc/a.ts\tsrc/b.ts\nC100\tx.rs\ty.rs\n";
        let changes = parse_name_status(output).unwrap();
        assert_eq!(
            changes,
            vec![
                ChangedFile::new("src/db.js", ChangeType::Modified),
                ChangedFile::new("src/new.rs", ChangeType::Added),
                ChangedFile::new("old.py", ChangeType::Deleted),
                ChangedFile::new(
                    "src/b.ts",
                    ChangeType::Renamed {
                        from: "src/a.ts".into()
                    }
                ),
                ChangedFile::new("y.rs", ChangeType::Added),
            ]
        );
        assert!(parse_name_status("X\tweird").is_err());
        assert!(parse_name_status("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_repository_lists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/nested/a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi\n").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: main\n").unwrap();

        let repo = LocalRepository::new(dir.path());
        assert_eq!(repo.list_files().await.unwrap(), vec!["README.md", "src/nested/a.rs"]);
        assert_eq!(
            repo.read_file("src/nested/a.rs").await.unwrap(),
            Some(b"fn a() {}\n".to_vec())
        );
        assert_eq!(repo.read_file("missing.rs").await.unwrap(), None);
        assert!(repo.read_file("../etc/passwd").await.is_err());

        let stats = repo.characteristics().await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_bytes, 15);
    }
}
