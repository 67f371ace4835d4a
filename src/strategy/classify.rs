//! Classification of changed paths.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// What kind of file a changed path is, for strategy purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Code,
    /// Build/dependency manifests and schema files
    Structural,
    Configuration,
    Documentation,
}

const DEPENDENCY_MANIFESTS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.toml",
    "cargo.lock",
    "go.mod",
    "go.sum",
    "requirements.txt",
    "pipfile",
    "pipfile.lock",
    "poetry.lock",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "gemfile",
    "gemfile.lock",
    "composer.json",
    "composer.lock",
    "cmakelists.txt",
    "makefile",
];

const BUILD_FILES: &[&str] = &["dockerfile", "docker-compose.yml", "docker-compose.yaml"];

const SCHEMA_EXTENSIONS: &[&str] = &["sql", "prisma", "graphql", "gql", "proto", "avsc"];

const SCHEMA_DIRECTORIES: &[&str] = &["migrations", "migrate", "schema", "schemas"];

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "rst", "txt", "adoc"];

const DOC_FILENAMES: &[&str] = &["license", "licence", "changelog", "authors", "contributors", "notice"];

const DOC_DIRECTORIES: &[&str] = &["docs", "doc", "documentation"];

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "properties", "xml"];

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_lowercase()
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn in_directory(path: &str, names: &[&str]) -> bool {
    let mut components: Vec<&str> = path.split('/').collect();
    components.pop();
    components
        .iter()
        .any(|c| names.contains(&c.to_lowercase().as_str()))
}

/// Whether the path is a build or dependency manifest.
///
/// A changed manifest can silently invalidate the context of unrelated
/// chunks, so any such change forces a full run.
pub fn is_dependency_manifest(path: &str) -> bool {
    let name = file_name(path);
    DEPENDENCY_MANIFESTS.contains(&name.as_str())
        || (name.starts_with("requirements") && name.ends_with(".txt"))
}

/// Classify one changed path.
pub fn classify(path: &str) -> ChangeCategory {
    let name = file_name(path);
    let ext = extension(path);

    if is_dependency_manifest(path)
        || BUILD_FILES.contains(&name.as_str())
        || name.starts_with("dockerfile")
        || SCHEMA_EXTENSIONS.contains(&ext.as_str())
        || in_directory(path, SCHEMA_DIRECTORIES)
    {
        return ChangeCategory::Structural;
    }

    let stem = name.split('.').next().unwrap_or_default();
    if DOC_EXTENSIONS.contains(&ext.as_str())
        || DOC_FILENAMES.contains(&stem)
        || in_directory(path, DOC_DIRECTORIES)
    {
        return ChangeCategory::Documentation;
    }

    if CONFIG_EXTENSIONS.contains(&ext.as_str())
        || name.starts_with(".env")
        || name.starts_with("tsconfig")
        || name.contains(".config.")
        || (name.starts_with('.') && name.ends_with("rc"))
    {
        return ChangeCategory::Configuration;
    }

    ChangeCategory::Code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_paths() {
        let cases = [
            ("README.md", ChangeCategory::Documentation),
            ("docs/guide/setup.html", ChangeCategory::Documentation),
            ("LICENSE", ChangeCategory::Documentation),
            ("CHANGELOG.md", ChangeCategory::Documentation),
            ("package.json", ChangeCategory::Structural),
            ("services/api/Cargo.toml", ChangeCategory::Structural),
            ("requirements-dev.txt", ChangeCategory::Structural),
            ("db/schema.sql", ChangeCategory::Structural),
            ("prisma/schema.prisma", ChangeCategory::Structural),
            ("db/migrations/0001_init.py", ChangeCategory::Structural),
            ("Dockerfile", ChangeCategory::Structural),
            ("config/settings.yaml", ChangeCategory::Configuration),
            ("tsconfig.json", ChangeCategory::Configuration),
            ("webpack.config.js", ChangeCategory::Configuration),
            (".env.local", ChangeCategory::Configuration),
            (".eslintrc", ChangeCategory::Configuration),
            ("src/db.js", ChangeCategory::Code),
            ("src/main.rs", ChangeCategory::Code),
            ("scripts/run", ChangeCategory::Code),
        ];
        for (path, expected) in cases {
            assert_eq!(classify(path), expected, "{path}");
        }
    }

    #[test]
    fn test_dependency_manifests() {
        assert!(is_dependency_manifest("package.json"));
        assert!(is_dependency_manifest("backend/go.mod"));
        assert!(!is_dependency_manifest("db/schema.sql"));
        assert!(!is_dependency_manifest("src/package.ts"));
    }
}
