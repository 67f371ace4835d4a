//! Query-time filters shared by both retrieval sources.

use serde::{Deserialize, Serialize};

use crate::processing::Language;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub language: Option<Language>,
    /// Repository-relative path prefix, e.g. `src/api/`
    pub path_prefix: Option<String>,
}

impl SearchFilters {
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.path_prefix.is_none()
    }

    pub fn matches(&self, path: &str, language: Language) -> bool {
        self.language.map_or(true, |l| l == language)
            && self
                .path_prefix
                .as_deref()
                .map_or(true, |prefix| path.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_match() {
        let any = SearchFilters::default();
        assert!(any.is_empty());
        assert!(any.matches("src/a.rs", Language::Rust));

        let filters = SearchFilters::default()
            .with_language(Language::Python)
            .with_path_prefix("api/");
        assert!(filters.matches("api/users.py", Language::Python));
        assert!(!filters.matches("api/users.js", Language::JavaScript));
        assert!(!filters.matches("web/users.py", Language::Python));
    }
}
