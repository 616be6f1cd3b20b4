//! Fact types produced by the extractor.
//!
//! - `ChangeType`: how a symbol was touched by a diff
//! - `EvidenceSource`: where in the hunk the symbol was observed
//! - `ChangeFact`: a function or class touched by a patch
//! - `ImportFact`: one import statement found in file content

use serde::{Deserialize, Serialize};

use crate::languages::Language;

/// How a symbol was changed by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Definition appears on a `+` line
    Added,
    /// Definition appears on a `-` line
    Removed,
    /// Definition encloses the hunk (taken from the header context)
    Modified,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Modified => "modified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ChangeType::Added),
            "removed" => Some(ChangeType::Removed),
            "modified" => Some(ChangeType::Modified),
            _ => None,
        }
    }
}

/// Where a change fact was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// The `@@ ... @@ <context>` excerpt of a hunk header
    Context,
    /// An added or removed line of the hunk body
    DiffContent,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Context => "context",
            EvidenceSource::DiffContent => "diff_content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context" => Some(EvidenceSource::Context),
            "diff_content" => Some(EvidenceSource::DiffContent),
            _ => None,
        }
    }
}

/// Which pattern family produced a change fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
}

/// A function or class touched by a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFact {
    pub kind: SymbolKind,
    pub name: String,
    pub change_type: ChangeType,
    pub source: EvidenceSource,
    /// The line the match came from, marker stripped and trimmed.
    pub line_content: String,
    pub language: Language,
}

impl ChangeFact {
    /// Deduplication key within one patch.
    pub fn key(&self) -> (&str, Language) {
        (&self.name, self.language)
    }
}

/// Language-specific classification of an import statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// `import x` (python, java, go)
    Import,
    /// `from x import a, b`
    FromImport,
    /// `import a from "x"`
    Es6Import,
    /// `import "x"`
    SideEffectImport,
    /// `require("x")`
    Require,
    /// `#include <x>`
    SystemInclude,
    /// `#include "x"`
    LocalInclude,
    /// `using namespace x;`
    UsingNamespace,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Import => "import",
            ImportKind::FromImport => "from_import",
            ImportKind::Es6Import => "es6_import",
            ImportKind::SideEffectImport => "side_effect_import",
            ImportKind::Require => "require",
            ImportKind::SystemInclude => "system_include",
            ImportKind::LocalInclude => "local_include",
            ImportKind::UsingNamespace => "using_namespace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(ImportKind::Import),
            "from_import" => Some(ImportKind::FromImport),
            "es6_import" => Some(ImportKind::Es6Import),
            "side_effect_import" => Some(ImportKind::SideEffectImport),
            "require" => Some(ImportKind::Require),
            "system_include" => Some(ImportKind::SystemInclude),
            "local_include" => Some(ImportKind::LocalInclude),
            "using_namespace" => Some(ImportKind::UsingNamespace),
            _ => None,
        }
    }
}

/// One import statement recovered from file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFact {
    pub language: Language,
    /// 1-based line number in the scanned content.
    pub line_number: usize,
    /// The trimmed source line.
    pub statement: String,
    pub kind: ImportKind,
    pub module_name: String,
    pub imported_items: Option<Vec<String>>,
}
