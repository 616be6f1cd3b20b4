//! prmine-semantic: lexical fact extraction for multi-language diffs.
//!
//! - `languages`: extension lookup and the per-language rule registry
//! - `hunks`: unified diff hunk parsing
//! - `extractor`: import, function and class facts with dedup
//! - `schema`: the fact types

pub mod extractor;
pub mod hunks;
pub mod languages;
pub mod schema;

pub use extractor::{
    analyze_patch, detect_class_changes, detect_function_changes, extract_imports, merge_facts,
    AsLanguage, PatchAnalysis,
};
pub use hunks::{parse_hunks, Hunk};
pub use languages::{language_for_path, rules_for, Language, RuleSet};
pub use schema::{ChangeFact, ChangeType, EvidenceSource, ImportFact, ImportKind, SymbolKind};
