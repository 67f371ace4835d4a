//! Change-aware strategy selection.
//!
//! Decides whether a run skips, reprocesses only changed files, or rebuilds
//! the whole repository index.

mod classify;
mod selector;

pub use classify::{classify, is_dependency_manifest, ChangeCategory};
pub use selector::{
    LoadLevel, ProcessingRecommendation, RecommendationDetails, SelectorConfig, Strategy,
    StrategySelector,
};
