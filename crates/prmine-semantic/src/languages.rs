//! Language registry: file extension to language, language to rule bundle.
//!
//! Each supported language registers exactly one [`RuleSet`]. Extractor code
//! never branches on language identity; it asks the registry for the bundle
//! and applies whatever patterns it holds. Adding a language means adding a
//! variant, its extensions, and a `*_rules()` constructor below.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schema::ImportKind;

/// Languages with a registered rule bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Golang,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Java,
        Language::Golang,
        Language::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Golang => "golang",
            Language::Cpp => "cpp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "java" => Some(Language::Java),
            "golang" => Some(Language::Golang),
            "cpp" => Some(Language::Cpp),
            _ => None,
        }
    }

    /// File extensions (lowercase, without the dot) owned by this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::JavaScript => &["js", "jsx"],
            Language::TypeScript => &["ts", "tsx"],
            Language::Java => &["java"],
            Language::Golang => &["go"],
            Language::Cpp => &["cpp", "cc", "cxx", "c++", "hpp", "h"],
        }
    }

    /// The rule bundle registered for this language.
    pub fn rules(&self) -> &'static RuleSet {
        rules_for(*self)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the capture groups of an import pattern map onto an import fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportShape {
    /// Group 1 is the module; no imported items.
    Module(ImportKind),
    /// Group 1 is the module, group 2 a comma separated item list.
    FromList,
    /// Group 1 is the bound item text, group 2 the module.
    Bound(ImportKind),
    /// Group 1 is an alias, group 2 the module.
    Aliased,
    /// Group 1 is the opening delimiter (`<` or `"`), group 2 the header.
    Include,
}

/// One import pattern and its decomposition.
#[derive(Debug, Clone)]
pub struct ImportRule {
    pub pattern: Regex,
    pub shape: ImportShape,
}

/// Ordered lexical patterns for one language.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub language: Language,
    pub imports: Vec<ImportRule>,
    pub functions: Vec<Regex>,
    pub classes: Vec<Regex>,
    pub comments: Vec<Regex>,
}

impl RuleSet {
    /// True if a trimmed line matches any comment pattern.
    pub fn is_comment(&self, trimmed: &str) -> bool {
        self.comments.iter().any(|re| re.is_match(trimmed))
    }
}

static REGISTRY: Lazy<HashMap<Language, RuleSet>> = Lazy::new(|| {
    let mut registry = HashMap::new();
    for rules in [
        python_rules(),
        javascript_rules(),
        typescript_rules(),
        java_rules(),
        golang_rules(),
        cpp_rules(),
    ] {
        registry.insert(rules.language, rules);
    }
    registry
});

static EXTENSIONS: Lazy<HashMap<&'static str, Language>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for language in Language::ALL {
        for ext in language.extensions() {
            map.insert(*ext, language);
        }
    }
    map
});

/// Resolve a file path to a language by its extension (case-insensitive).
pub fn language_for_path(path: &str) -> Option<Language> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS.get(ext.as_str()).copied()
}

/// Look up the rule bundle for a language.
pub fn rules_for(language: Language) -> &'static RuleSet {
    // Every variant is registered in REGISTRY.
    &REGISTRY[&language]
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid built-in pattern {p}: {e}")))
        .collect()
}

fn import_rules(rules: &[(&str, ImportShape)]) -> Vec<ImportRule> {
    rules
        .iter()
        .zip(compile(&rules.iter().map(|(p, _)| *p).collect::<Vec<_>>()))
        .map(|((_, shape), pattern)| ImportRule { pattern, shape: *shape })
        .collect()
}

const HASH_COMMENTS: &[&str] = &[r"^#", r#"^""""#, r"^'''"];
const SLASH_COMMENTS: &[&str] = &[r"^//", r"^/\*", r"^\*"];

const ECMA_FUNCTIONS: &[&str] = &[
    r"function\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*\(",
    r"const\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*=\s*\(",
    r"([a-zA-Z_$][a-zA-Z0-9_$]*)\s*:\s*function\s*\(",
    r"([a-zA-Z_$][a-zA-Z0-9_$]*)\s*\([^)]*\)\s*=>",
];

const ES6_IMPORT: &str = r#"^\s*import\s+(.+?)\s+from\s+["']([^"']+)["']"#;
const SIDE_EFFECT_IMPORT: &str = r#"^\s*import\s+["']([^"']+)["']"#;

fn python_rules() -> RuleSet {
    RuleSet {
        language: Language::Python,
        imports: import_rules(&[
            (r"^\s*import\s+(.+)", ImportShape::Module(ImportKind::Import)),
            (r"^\s*from\s+([^\s]+)\s+import\s+(.+)", ImportShape::FromList),
        ]),
        functions: compile(&[r"def\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\("]),
        classes: compile(&[r"class\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*(?:[\(:]|$)"]),
        comments: compile(HASH_COMMENTS),
    }
}

fn javascript_rules() -> RuleSet {
    RuleSet {
        language: Language::JavaScript,
        imports: import_rules(&[
            (ES6_IMPORT, ImportShape::Bound(ImportKind::Es6Import)),
            (SIDE_EFFECT_IMPORT, ImportShape::Module(ImportKind::SideEffectImport)),
            (
                r#"^\s*const\s+(.+?)\s*=\s*require\s*\(\s*["']([^"']+)["']\s*\)"#,
                ImportShape::Bound(ImportKind::Require),
            ),
            (
                r#"^\s*require\s*\(\s*["']([^"']+)["']\s*\)"#,
                ImportShape::Module(ImportKind::Require),
            ),
        ]),
        functions: compile(ECMA_FUNCTIONS),
        classes: compile(&[r"class\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*[{(]"]),
        comments: compile(SLASH_COMMENTS),
    }
}

fn typescript_rules() -> RuleSet {
    RuleSet {
        language: Language::TypeScript,
        imports: import_rules(&[
            (ES6_IMPORT, ImportShape::Bound(ImportKind::Es6Import)),
            (SIDE_EFFECT_IMPORT, ImportShape::Module(ImportKind::SideEffectImport)),
            (
                r#"^\s*import\s+type\s+(.+?)\s+from\s+["']([^"']+)["']"#,
                ImportShape::Bound(ImportKind::Es6Import),
            ),
        ]),
        functions: compile(ECMA_FUNCTIONS),
        classes: compile(&[
            r"class\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*[{<]",
            r"interface\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*[{<]",
        ]),
        comments: compile(SLASH_COMMENTS),
    }
}

fn java_rules() -> RuleSet {
    RuleSet {
        language: Language::Java,
        imports: import_rules(&[(
            r"^\s*import\s+(?:static\s+)?([^;]+);",
            ImportShape::Module(ImportKind::Import),
        )]),
        functions: compile(&[
            r"(?:public|private|protected|static|\s)*\s+\w+\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(",
        ]),
        classes: compile(&[
            r"(?:public|private|protected|abstract|final|\s)*\s*class\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*[{<]",
        ]),
        comments: compile(SLASH_COMMENTS),
    }
}

fn golang_rules() -> RuleSet {
    RuleSet {
        language: Language::Golang,
        imports: import_rules(&[
            (r#"^\s*import\s+"([^"]+)""#, ImportShape::Module(ImportKind::Import)),
            (
                r#"^\s*import\s+([a-zA-Z_][a-zA-Z0-9_]*)\s+"([^"]+)""#,
                ImportShape::Aliased,
            ),
        ]),
        functions: compile(&[
            r"func\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(",
            r"func\s+\([^)]*\)\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(",
        ]),
        classes: compile(&[r"type\s+([a-zA-Z_][a-zA-Z0-9_]*)\s+struct\s*\{"]),
        comments: compile(SLASH_COMMENTS),
    }
}

fn cpp_rules() -> RuleSet {
    RuleSet {
        language: Language::Cpp,
        imports: import_rules(&[
            (r#"^\s*#include\s*([<"])([^>"]+)[>"]"#, ImportShape::Include),
            (
                r"^\s*using\s+namespace\s+([^;]+);",
                ImportShape::Module(ImportKind::UsingNamespace),
            ),
        ]),
        functions: compile(&[
            r"(?:inline\s+)?(?:static\s+)?(?:virtual\s+)?(?:const\s+)?\w+\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(",
            r"([a-zA-Z_][a-zA-Z0-9_]*)::[a-zA-Z_][a-zA-Z0-9_]*\s*\(",
        ]),
        classes: compile(&[
            r"class\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*[{:]",
            r"struct\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*[{:]",
        ]),
        comments: compile(SLASH_COMMENTS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_ids_roundtrip() {
        for language in Language::ALL {
            assert_eq!(Language::parse(language.as_str()), Some(language));
        }
        assert_eq!(Language::parse("rust"), None);
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        assert_eq!(language_for_path("src/app.py"), Some(Language::Python));
        assert_eq!(language_for_path("SRC/APP.PY"), Some(Language::Python));
        assert_eq!(language_for_path("web/App.TSX"), Some(Language::TypeScript));
        assert_eq!(language_for_path("web/index.ts"), Some(Language::TypeScript));
        assert_eq!(language_for_path("lib/util.c++"), Some(Language::Cpp));
        assert_eq!(language_for_path("include/foo.h"), Some(Language::Cpp));
        assert_eq!(language_for_path("README.md"), None);
        assert_eq!(language_for_path("Makefile"), None);
    }

    #[test]
    fn test_every_language_has_one_rule_set() {
        for language in Language::ALL {
            let rules = rules_for(language);
            assert_eq!(rules.language, language);
            assert!(!rules.imports.is_empty());
            assert!(!rules.functions.is_empty());
            assert!(!rules.classes.is_empty());
            assert!(!rules.comments.is_empty());
        }
    }

    #[test]
    fn test_comment_detection() {
        assert!(rules_for(Language::Python).is_comment("# import os"));
        assert!(rules_for(Language::Cpp).is_comment("// #include <vector>"));
        assert!(rules_for(Language::Java).is_comment("/* import a.b; */"));
        assert!(!rules_for(Language::Python).is_comment("import os"));
    }
}
