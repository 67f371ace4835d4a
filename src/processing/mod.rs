//! File analysis at the ingestion boundary.
//!
//! This module provides:
//! - Language detection from file extensions, filenames and shebangs
//! - File filtering (vendor directories, binaries, generated files)

pub mod filter;
pub mod language;

pub use filter::{is_binary_content, FileFilter, FilterConfig, SkipReason};
pub use language::{Language, LanguageDetector, LanguageInfo};
