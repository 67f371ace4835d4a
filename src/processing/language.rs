//! Programming language definitions and detection.
//!
//! Detection runs on file extension first, then well-known filenames, then
//! the shebang line when content is available.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Languages recognized at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    // Full semantic unit support
    Python,
    JavaScript,
    TypeScript,
    TypeScriptReact,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    Ruby,

    // Markup/Config (text fallback)
    Markdown,
    Json,
    Yaml,
    Toml,
    Html,
    Css,
    Shell,
    Sql,
    PlainText,

    Unknown,
}

impl Language {
    /// Grammar name used by the AST engine, if the language has one.
    pub fn tree_sitter_name(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("python"),
            Language::JavaScript => Some("javascript"),
            Language::TypeScript => Some("typescript"),
            Language::TypeScriptReact => Some("tsx"),
            Language::Go => Some("go"),
            Language::Rust => Some("rust"),
            Language::Java => Some("java"),
            Language::C => Some("c"),
            Language::Cpp => Some("cpp"),
            Language::Ruby => Some("ruby"),
            _ => None,
        }
    }

    /// Check if AST parsing is supported for this language.
    pub fn supports_ast(&self) -> bool {
        self.tree_sitter_name().is_some()
    }

    /// Whether the language uses JavaScript-style module syntax (routes, hooks).
    pub fn is_javascript_family(&self) -> bool {
        matches!(
            self,
            Language::JavaScript | Language::TypeScript | Language::TypeScriptReact
        )
    }

    /// Parse a language from a loose identifier ("py", "rust", "c++", ...).
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "python" | "py" => Language::Python,
            "javascript" | "js" | "jsx" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "tsx" => Language::TypeScriptReact,
            "go" | "golang" => Language::Go,
            "rust" | "rs" => Language::Rust,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" | "c++" | "cxx" => Language::Cpp,
            "ruby" | "rb" => Language::Ruby,
            "markdown" | "md" => Language::Markdown,
            "json" => Language::Json,
            "yaml" | "yml" => Language::Yaml,
            "toml" => Language::Toml,
            "html" | "htm" => Language::Html,
            "css" | "scss" | "less" => Language::Css,
            "shell" | "bash" | "sh" | "zsh" => Language::Shell,
            "sql" => Language::Sql,
            "text" | "txt" | "plain" => Language::PlainText,
            _ => Language::Unknown,
        }
    }

    /// Get a string representation of the language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::TypeScriptReact => "tsx",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Html => "html",
            Language::Css => "css",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::PlainText => "text",
            Language::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a detected language.
#[derive(Debug, Clone)]
pub struct LanguageInfo {
    /// The detected language.
    pub language: Language,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f32,
}

impl LanguageInfo {
    pub fn new(language: Language, confidence: f32) -> Self {
        Self {
            language,
            confidence,
        }
    }

    pub fn unknown() -> Self {
        Self {
            language: Language::Unknown,
            confidence: 0.0,
        }
    }
}

/// Language detector using extension and content analysis.
pub struct LanguageDetector {
    extension_map: HashMap<&'static str, LanguageInfo>,
    filename_map: HashMap<&'static str, Language>,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageDetector {
    /// Create a new language detector with default mappings.
    pub fn new() -> Self {
        let mut extension_map = HashMap::new();
        let mut insert = |exts: &[&'static str], lang: Language, confidence: f32| {
            for ext in exts {
                extension_map.insert(*ext, LanguageInfo::new(lang, confidence));
            }
        };

        insert(&["py", "pyi", "pyw"], Language::Python, 1.0);
        insert(&["js", "mjs", "cjs", "jsx"], Language::JavaScript, 1.0);
        insert(&["ts", "mts", "cts"], Language::TypeScript, 1.0);
        insert(&["tsx"], Language::TypeScriptReact, 1.0);
        insert(&["go"], Language::Go, 1.0);
        insert(&["rs"], Language::Rust, 1.0);
        insert(&["java"], Language::Java, 1.0);
        insert(&["c"], Language::C, 1.0);
        insert(&["h"], Language::C, 0.8);
        insert(&["cpp", "cc", "cxx", "hpp", "hxx", "hh"], Language::Cpp, 1.0);
        insert(&["rb", "rake"], Language::Ruby, 1.0);
        insert(&["md", "markdown", "mdx"], Language::Markdown, 1.0);
        insert(&["json"], Language::Json, 1.0);
        insert(&["yaml", "yml"], Language::Yaml, 1.0);
        insert(&["toml"], Language::Toml, 1.0);
        insert(&["html", "htm"], Language::Html, 1.0);
        insert(&["css", "scss", "less"], Language::Css, 0.9);
        insert(&["sh", "bash", "zsh"], Language::Shell, 1.0);
        insert(&["sql"], Language::Sql, 1.0);
        insert(&["txt", "rst", "adoc"], Language::PlainText, 0.9);

        let filename_map = [
            ("Dockerfile", Language::Shell),
            ("Makefile", Language::Shell),
            ("Jenkinsfile", Language::Shell),
            ("Rakefile", Language::Ruby),
            ("Gemfile", Language::Ruby),
            ("LICENSE", Language::PlainText),
            ("README", Language::PlainText),
        ]
        .into_iter()
        .collect();

        Self {
            extension_map,
            filename_map,
        }
    }

    /// Detect language from file path and optional content.
    pub fn detect(&self, path: &str, content: Option<&str>) -> LanguageInfo {
        let path = Path::new(path);
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if let Some(info) = self.extension_map.get(extension.as_str()) {
            return info.clone();
        }

        if let Some(&lang) = self.filename_map.get(filename) {
            return LanguageInfo::new(lang, 0.95);
        }

        if let Some(content) = content {
            if content.starts_with("#!") {
                let first_line = content.lines().next().unwrap_or("");
                return self.detect_from_shebang(first_line);
            }
        }

        LanguageInfo::unknown()
    }

    /// Detect language from shebang line.
    fn detect_from_shebang(&self, shebang: &str) -> LanguageInfo {
        let lower = shebang.to_lowercase();

        if lower.contains("python") {
            LanguageInfo::new(Language::Python, 0.95)
        } else if lower.contains("node") || lower.contains("deno") {
            LanguageInfo::new(Language::JavaScript, 0.95)
        } else if lower.contains("ruby") {
            LanguageInfo::new(Language::Ruby, 0.95)
        } else {
            LanguageInfo::new(Language::Shell, 0.5)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_detection() {
        let detector = LanguageDetector::new();

        assert_eq!(detector.detect("main.py", None).language, Language::Python);
        assert_eq!(detector.detect("app.js", None).language, Language::JavaScript);
        assert_eq!(detector.detect("lib.rs", None).language, Language::Rust);
        assert_eq!(detector.detect("main.go", None).language, Language::Go);
        assert_eq!(detector.detect("App.tsx", None).language, Language::TypeScriptReact);
        assert_eq!(detector.detect("README.md", None).language, Language::Markdown);
    }

    #[test]
    fn test_filename_detection() {
        let detector = LanguageDetector::new();

        assert_eq!(detector.detect("Dockerfile", None).language, Language::Shell);
        assert_eq!(detector.detect("Gemfile", None).language, Language::Ruby);
        assert_eq!(detector.detect("LICENSE", None).language, Language::PlainText);
    }

    #[test]
    fn test_shebang_detection() {
        let detector = LanguageDetector::new();

        assert_eq!(
            detector
                .detect("script", Some("#!/usr/bin/env python3\nprint('hello')"))
                .language,
            Language::Python
        );
        assert_eq!(
            detector.detect("script", Some("#!/bin/bash\necho hello")).language,
            Language::Shell
        );
        assert_eq!(detector.detect("script", None).language, Language::Unknown);
    }

    #[test]
    fn test_language_from_name() {
        assert_eq!(Language::from_name("python"), Language::Python);
        assert_eq!(Language::from_name("RUST"), Language::Rust);
        assert_eq!(Language::from_name("c++"), Language::Cpp);
        assert_eq!(Language::from_name("brainfuck"), Language::Unknown);
    }

    #[test]
    fn test_ast_support() {
        assert!(Language::Go.supports_ast());
        assert!(!Language::Markdown.supports_ast());
        assert!(Language::TypeScriptReact.is_javascript_family());
    }
}
