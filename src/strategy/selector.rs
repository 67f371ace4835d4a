//! Change-aware processing strategy selection.
//!
//! Pure function of the change set and repository facts: no I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::classify::{classify, is_dependency_manifest, ChangeCategory};
use crate::types::{ChangeSet, ChangeType, PipelineConfig, RepoCharacteristics};

/// How much of the repository a run reprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Skip,
    Incremental,
    Full,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Skip => "skip",
            Strategy::Incremental => "incremental",
            Strategy::Full => "full",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse processing-load bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Minimal,
    Low,
    Moderate,
    High,
}

/// Auxiliary signals surfaced for observability. They never change the
/// decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationDetails {
    pub total_changes: usize,
    pub category_counts: HashMap<ChangeCategory, usize>,
    pub dependency_manifests: Vec<String>,
    pub deleted_files: usize,
    pub renamed_files: usize,
    pub processing_load: LoadLevel,
    /// Changed files as a fraction of the repository, when its size is known
    pub change_ratio: Option<f64>,
    pub risk_factors: Vec<String>,
    pub expected_benefit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecommendation {
    pub strategy: Strategy,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    pub details: RecommendationDetails,
}

/// Thresholds for the selector's decision rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// More changed files than this triggers a full run
    pub incremental_file_ceiling: usize,
    /// More structural changes than this triggers a full run
    pub structural_change_ceiling: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            incremental_file_ceiling: 30,
            structural_change_ceiling: 3,
        }
    }
}

impl From<&PipelineConfig> for SelectorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            incremental_file_ceiling: config.incremental_file_ceiling,
            structural_change_ceiling: config.structural_change_ceiling,
        }
    }
}

/// Recommends skip / incremental / full reprocessing for a change set.
///
/// Rules, first match wins:
/// 1. empty change set: skip
/// 2. only documentation changed: skip
/// 3. more files than `incremental_file_ceiling`: full
/// 4. a dependency manifest changed, or more structural files than
///    `structural_change_ceiling`: full
/// 5. otherwise incremental, confidence scaled by the share of code files
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    config: SelectorConfig,
}

impl StrategySelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn recommend(
        &self,
        changes: &ChangeSet,
        repo: &RepoCharacteristics,
    ) -> ProcessingRecommendation {
        let details = self.details(changes, repo);
        let total = details.total_changes;
        let count = |category: ChangeCategory| {
            details.category_counts.get(&category).copied().unwrap_or(0)
        };
        let documentation = count(ChangeCategory::Documentation);
        let structural = count(ChangeCategory::Structural);
        let code = count(ChangeCategory::Code);

        let (strategy, confidence, reasoning) = if total == 0 {
            (Strategy::Skip, 1.0, "No files changed".to_string())
        } else if documentation == total {
            (
                Strategy::Skip,
                0.95,
                format!("All {total} changed file(s) are documentation"),
            )
        } else if total > self.config.incremental_file_ceiling {
            (
                Strategy::Full,
                0.9,
                format!(
                    "{total} changed files exceed the incremental ceiling of {}",
                    self.config.incremental_file_ceiling
                ),
            )
        } else if !details.dependency_manifests.is_empty() {
            (
                Strategy::Full,
                0.85,
                format!(
                    "Dependency manifest changed ({})",
                    details.dependency_manifests.join(", ")
                ),
            )
        } else if structural > self.config.structural_change_ceiling {
            (
                Strategy::Full,
                0.8,
                format!(
                    "{structural} structural changes exceed the ceiling of {}",
                    self.config.structural_change_ceiling
                ),
            )
        } else {
            let code_fraction = code as f64 / total as f64;
            (
                Strategy::Incremental,
                0.5 + 0.45 * code_fraction,
                format!(
                    "{total} changed file(s), {code} of them code; reprocessing changed files only"
                ),
            )
        };

        ProcessingRecommendation {
            strategy,
            confidence,
            reasoning,
            details,
        }
    }

    fn details(&self, changes: &ChangeSet, repo: &RepoCharacteristics) -> RecommendationDetails {
        let total = changes.len();
        let mut category_counts: HashMap<ChangeCategory, usize> = HashMap::new();
        let mut dependency_manifests = Vec::new();
        let mut deleted_files = 0;
        let mut renamed_files = 0;

        for file in &changes.changed_files {
            *category_counts.entry(classify(&file.path)).or_default() += 1;
            if is_dependency_manifest(&file.path) {
                dependency_manifests.push(file.path.clone());
            }
            match file.change_type {
                ChangeType::Deleted => deleted_files += 1,
                ChangeType::Renamed { .. } => renamed_files += 1,
                _ => {}
            }
        }

        let change_ratio = (repo.total_files > 0).then(|| total as f64 / repo.total_files as f64);
        let processing_load = match (total, change_ratio) {
            (0, _) => LoadLevel::Minimal,
            (_, Some(r)) if r >= 0.3 => LoadLevel::High,
            (n, _) if n > self.config.incremental_file_ceiling => LoadLevel::High,
            (_, Some(r)) if r >= 0.1 => LoadLevel::Moderate,
            (n, _) if n > 10 => LoadLevel::Moderate,
            _ => LoadLevel::Low,
        };

        let mut risk_factors = Vec::new();
        if !dependency_manifests.is_empty() {
            risk_factors.push(format!(
                "dependency manifests changed: {}",
                dependency_manifests.join(", ")
            ));
        }
        let structural = category_counts
            .get(&ChangeCategory::Structural)
            .copied()
            .unwrap_or(0);
        if structural > dependency_manifests.len() {
            risk_factors.push(format!(
                "{} schema or build file(s) changed",
                structural - dependency_manifests.len()
            ));
        }
        if deleted_files > 0 {
            risk_factors.push(format!("{deleted_files} file(s) deleted; stale records must be removed"));
        }
        if renamed_files > 0 {
            risk_factors.push(format!("{renamed_files} file(s) renamed"));
        }
        if total > self.config.incremental_file_ceiling {
            risk_factors.push("bulk change set".to_string());
        }

        let expected_benefit = match change_ratio {
            Some(ratio) if total > 0 => format!(
                "incremental processing touches {total} of {} files ({:.0}% of the repository)",
                repo.total_files,
                (ratio * 100.0).min(100.0)
            ),
            _ if total > 0 => format!("incremental processing touches {total} file(s)"),
            _ => "nothing to process".to_string(),
        };

        RecommendationDetails {
            total_changes: total,
            category_counts,
            dependency_manifests,
            deleted_files,
            renamed_files,
            processing_load,
            change_ratio,
            risk_factors,
            expected_benefit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangedFile;

    fn recommend(paths: &[&str]) -> ProcessingRecommendation {
        StrategySelector::default().recommend(
            &ChangeSet::from_paths(paths.iter().copied()),
            &RepoCharacteristics::default(),
        )
    }

    #[test]
    fn test_decision_table() {
        let code_35: Vec<String> = (0..35).map(|i| format!("src/file_{i}.js")).collect();
        let code_35: Vec<&str> = code_35.iter().map(String::as_str).collect();
        let docs_40: Vec<String> = (0..40).map(|i| format!("docs/page_{i}.md")).collect();
        let docs_40: Vec<&str> = docs_40.iter().map(String::as_str).collect();

        let cases: Vec<(&str, Vec<&str>, Strategy)> = vec![
            ("empty", vec![], Strategy::Skip),
            ("readme only", vec!["README.md"], Strategy::Skip),
            ("docs only, above ceiling", docs_40, Strategy::Skip),
            ("35 code files", code_35, Strategy::Full),
            ("manifest with one code file", vec!["package.json", "src/db.js"], Strategy::Full),
            ("manifest alone", vec!["go.mod"], Strategy::Full),
            (
                "three schema files stay under the ceiling",
                vec!["db/a.sql", "db/b.sql", "db/c.sql", "src/repo.js"],
                Strategy::Incremental,
            ),
            (
                "four schema files exceed the ceiling",
                vec!["db/a.sql", "db/b.sql", "db/c.sql", "db/d.sql"],
                Strategy::Full,
            ),
            ("two code files", vec!["src/a.js", "src/b.js"], Strategy::Incremental),
            ("code and docs", vec!["src/a.js", "README.md"], Strategy::Incremental),
            ("config only", vec!["config/app.yaml"], Strategy::Incremental),
        ];

        for (name, paths, expected) in cases {
            assert_eq!(recommend(&paths).strategy, expected, "{name}");
        }
    }

    #[test]
    fn test_confidence_scales_with_code_fraction() {
        let pure_code = recommend(&["src/a.js", "src/b.js"]);
        let mixed = recommend(&["src/a.js", "config/app.yaml"]);
        let config_only = recommend(&["config/app.yaml"]);

        assert!((pure_code.confidence - 0.95).abs() < 1e-9);
        assert!((mixed.confidence - 0.725).abs() < 1e-9);
        assert!((config_only.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_high_confidence_rules() {
        assert!(recommend(&["README.md"]).confidence >= 0.9);
        let bulk: Vec<String> = (0..31).map(|i| format!("src/{i}.py")).collect();
        let bulk: Vec<&str> = bulk.iter().map(String::as_str).collect();
        assert!(recommend(&bulk).confidence >= 0.9);
    }

    #[test]
    fn test_ceilings_are_configurable() {
        let selector = StrategySelector::new(SelectorConfig {
            incremental_file_ceiling: 2,
            structural_change_ceiling: 0,
        });
        let repo = RepoCharacteristics::default();

        let three = ChangeSet::from_paths(["src/a.js", "src/b.js", "src/c.js"]);
        assert_eq!(selector.recommend(&three, &repo).strategy, Strategy::Full);

        let schema = ChangeSet::from_paths(["db/a.sql"]);
        assert_eq!(selector.recommend(&schema, &repo).strategy, Strategy::Full);
    }

    #[test]
    fn test_details_do_not_change_decision() {
        let changes = ChangeSet::new(
            "a",
            "b",
            vec![
                ChangedFile::new("src/old.js", ChangeType::Deleted),
                ChangedFile::modified("src/app.js"),
            ],
        );
        let small_repo = RepoCharacteristics {
            total_files: 4,
            total_bytes: 1000,
        };
        let large_repo = RepoCharacteristics {
            total_files: 4000,
            total_bytes: 1_000_000,
        };
        let selector = StrategySelector::default();
        let small = selector.recommend(&changes, &small_repo);
        let large = selector.recommend(&changes, &large_repo);

        assert_eq!(small.strategy, Strategy::Incremental);
        assert_eq!(small.strategy, large.strategy);
        assert_eq!(small.details.processing_load, LoadLevel::High);
        assert_eq!(large.details.processing_load, LoadLevel::Low);
        assert_eq!(small.details.deleted_files, 1);
        assert!(small.details.risk_factors.iter().any(|r| r.contains("deleted")));
    }
}
