//! Import, function and class facts from patches and file content.
//!
//! All three operations are lexical. They look up the language's
//! [`RuleSet`] and apply its patterns line by line; a language id the
//! registry does not know produces no facts.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hunks::{parse_hunks, Hunk};
use crate::languages::{rules_for, ImportShape, Language, RuleSet};
use crate::schema::{ChangeFact, ChangeType, EvidenceSource, ImportFact, ImportKind, SymbolKind};

/// Anything that may name a registered language.
pub trait AsLanguage {
    fn as_language(&self) -> Option<Language>;
}

impl AsLanguage for Language {
    fn as_language(&self) -> Option<Language> {
        Some(*self)
    }
}

impl AsLanguage for str {
    fn as_language(&self) -> Option<Language> {
        Language::parse(self)
    }
}

impl AsLanguage for String {
    fn as_language(&self) -> Option<Language> {
        Language::parse(self)
    }
}

impl<T: AsLanguage + ?Sized> AsLanguage for &T {
    fn as_language(&self) -> Option<Language> {
        (**self).as_language()
    }
}

/// Scan file content for import statements.
pub fn extract_imports(content: &str, language: impl AsLanguage) -> Vec<ImportFact> {
    let Some(language) = language.as_language() else {
        return Vec::new();
    };
    let rules = rules_for(language);

    let mut facts = Vec::new();
    for (idx, raw) in content.split('\n').enumerate() {
        let line = raw.trim();
        if line.is_empty() || rules.is_comment(line) {
            continue;
        }
        if let Some(fact) = match_import(rules, line, idx + 1) {
            facts.push(fact);
        }
    }
    facts
}

fn match_import(rules: &RuleSet, line: &str, line_number: usize) -> Option<ImportFact> {
    rules.imports.iter().find_map(|rule| {
        let caps = rule.pattern.captures(line)?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_string());

        let (kind, module_name, imported_items) = match rule.shape {
            ImportShape::Module(kind) => (kind, group(1)?, None),
            ImportShape::FromList => {
                let items = caps
                    .get(2)?
                    .as_str()
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
                (ImportKind::FromImport, group(1)?, Some(items))
            }
            ImportShape::Bound(kind) => (kind, group(2)?, Some(vec![group(1)?])),
            ImportShape::Aliased => (ImportKind::Import, group(2)?, Some(vec![group(1)?])),
            ImportShape::Include => {
                let kind = if caps.get(1)?.as_str() == "<" {
                    ImportKind::SystemInclude
                } else {
                    ImportKind::LocalInclude
                };
                (kind, group(2)?, None)
            }
        };

        Some(ImportFact {
            language: rules.language,
            line_number,
            statement: line.to_string(),
            kind,
            module_name,
            imported_items,
        })
    })
}

/// Functions touched by a patch, deduplicated.
pub fn detect_function_changes(patch: &str, language: impl AsLanguage) -> Vec<ChangeFact> {
    match language.as_language() {
        Some(language) => {
            let rules = rules_for(language);
            detect_changes(&parse_hunks(patch), language, SymbolKind::Function, &rules.functions)
        }
        None => Vec::new(),
    }
}

/// Classes, structs and interfaces touched by a patch, deduplicated.
pub fn detect_class_changes(patch: &str, language: impl AsLanguage) -> Vec<ChangeFact> {
    match language.as_language() {
        Some(language) => {
            let rules = rules_for(language);
            detect_changes(&parse_hunks(patch), language, SymbolKind::Class, &rules.classes)
        }
        None => Vec::new(),
    }
}

fn detect_changes(
    hunks: &[Hunk],
    language: Language,
    kind: SymbolKind,
    patterns: &[Regex],
) -> Vec<ChangeFact> {
    let mut found = Vec::new();
    let fact = |name: &str, change_type, source, line: &str| ChangeFact {
        kind,
        name: name.to_string(),
        change_type,
        source,
        line_content: line.to_string(),
        language,
    };

    for hunk in hunks {
        if !hunk.context.is_empty() {
            for pattern in patterns {
                if let Some(name) = first_group(pattern, &hunk.context) {
                    found.push(fact(name, ChangeType::Modified, EvidenceSource::Context, &hunk.context));
                }
            }
        }

        for (marker, rest) in hunk.changes() {
            let change_type = if marker == '+' { ChangeType::Added } else { ChangeType::Removed };
            let line = rest.trim();
            for pattern in patterns {
                if let Some(name) = first_group(pattern, rest) {
                    found.push(fact(name, change_type, EvidenceSource::DiffContent, line));
                }
            }
        }
    }

    merge_facts(found)
}

fn first_group<'a>(pattern: &Regex, text: &'a str) -> Option<&'a str> {
    pattern.captures(text)?.get(1).map(|m| m.as_str())
}

/// Collapse facts sharing a (name, language) key.
///
/// The first fact for a key fixes its position in the output. A later
/// `diff_content` fact replaces whatever holds the slot; a later `context`
/// fact is dropped. Between two `diff_content` facts the last one wins.
pub fn merge_facts(facts: impl IntoIterator<Item = ChangeFact>) -> Vec<ChangeFact> {
    let mut merged: Vec<ChangeFact> = Vec::new();
    let mut slots: HashMap<(String, Language), usize> = HashMap::new();

    for fact in facts {
        let key = (fact.name.clone(), fact.language);
        match slots.get(&key) {
            Some(&slot) => {
                if fact.source == EvidenceSource::DiffContent {
                    merged[slot] = fact;
                }
            }
            None => {
                slots.insert(key, merged.len());
                merged.push(fact);
            }
        }
    }
    merged
}

/// Everything the crawler derives from one file patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAnalysis {
    pub hunks: Vec<Hunk>,
    pub functions: Vec<ChangeFact>,
    pub classes: Vec<ChangeFact>,
}

/// Parse a patch once and run both change detectors over it.
pub fn analyze_patch(patch: &str, language: impl AsLanguage) -> PatchAnalysis {
    let Some(language) = language.as_language() else {
        return PatchAnalysis::default();
    };
    let rules = rules_for(language);
    let hunks = parse_hunks(patch);
    let functions = detect_changes(&hunks, language, SymbolKind::Function, &rules.functions);
    let classes = detect_changes(&hunks, language, SymbolKind::Class, &rules.classes);
    PatchAnalysis { hunks, functions, classes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(facts: &[ChangeFact]) -> Vec<&str> {
        facts.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_python_end_to_end() {
        let patch = "@@ -1,2 +1,3 @@ class Foo:\n+def bar():\n-def baz():";

        let functions = detect_function_changes(patch, Language::Python);
        assert_eq!(names(&functions), vec!["bar", "baz"]);
        assert_eq!(functions[0].change_type, ChangeType::Added);
        assert_eq!(functions[0].source, EvidenceSource::DiffContent);
        assert_eq!(functions[0].line_content, "def bar():");
        assert_eq!(functions[1].change_type, ChangeType::Removed);

        let classes = detect_class_changes(patch, Language::Python);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "Foo");
        assert_eq!(classes[0].change_type, ChangeType::Modified);
        assert_eq!(classes[0].source, EvidenceSource::Context);
        assert_eq!(classes[0].line_content, "class Foo:");
    }

    #[test]
    fn test_bare_python_class_header_is_context() {
        let patch = "@@ -1,2 +1,3 @@ class Foo\n+def bar():\n-def baz():";
        let classes = detect_class_changes(patch, "python");
        assert_eq!(names(&classes), vec!["Foo"]);
        assert_eq!(classes[0].change_type, ChangeType::Modified);
        assert!(detect_class_changes("@@ -1 +1 @@ class Foo bar\n+x", "python").is_empty());
    }

    #[test]
    fn test_diff_content_overrides_context() {
        let patch = "@@ -5,3 +5,4 @@ def handler(req):\n+def handler(req, ctx):";
        let facts = detect_function_changes(patch, Language::Python);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].name, "handler");
        assert_eq!(facts[0].change_type, ChangeType::Added);
        assert_eq!(facts[0].source, EvidenceSource::DiffContent);
    }

    #[test]
    fn test_context_never_replaces_diff_content() {
        let patch = "@@ -1,1 +1,2 @@\n+def run():\n@@ -30,1 +31,1 @@ def run():\n+x = 1";
        let facts = detect_function_changes(patch, Language::Python);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].source, EvidenceSource::DiffContent);
    }

    #[test]
    fn test_colliding_diff_content_last_wins_first_position() {
        let patch = "@@ -1,3 +1,3 @@\n-def a():\n+def b():\n+def a(x):";
        let facts = detect_function_changes(patch, Language::Python);
        assert_eq!(names(&facts), vec!["a", "b"]);
        assert_eq!(facts[0].change_type, ChangeType::Added);
        assert_eq!(facts[0].line_content, "def a(x):");
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        let patch = "@@ -1 +1 @@ def f():\n+def g():";
        assert!(detect_function_changes(patch, "cobol").is_empty());
        assert!(detect_class_changes(patch, "cobol").is_empty());
        assert!(extract_imports("import os", "cobol").is_empty());
        assert_eq!(analyze_patch(patch, "cobol"), PatchAnalysis::default());
    }

    #[test]
    fn test_python_imports() {
        let content = "import os\n\n# import sys\nfrom a.b import c, d as e\n    x = 1";
        let facts = extract_imports(content, Language::Python);
        assert_eq!(facts.len(), 2);

        assert_eq!(facts[0].line_number, 1);
        assert_eq!(facts[0].kind, ImportKind::Import);
        assert_eq!(facts[0].module_name, "os");
        assert_eq!(facts[0].imported_items, None);

        assert_eq!(facts[1].line_number, 4);
        assert_eq!(facts[1].kind, ImportKind::FromImport);
        assert_eq!(facts[1].module_name, "a.b");
        assert_eq!(
            facts[1].imported_items,
            Some(vec!["c".to_string(), "d as e".to_string()])
        );
    }

    #[test]
    fn test_comment_lines_excluded() {
        let content = "// import x from 'y'\n/* import z from 'w' */\nimport a from 'b'";
        let facts = extract_imports(content, Language::JavaScript);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].module_name, "b");
        assert_eq!(facts[0].line_number, 3);
    }

    #[test]
    fn test_javascript_imports() {
        let content = "import React, { useState } from \"react\";\n\
                       import './styles.css';\n\
                       const fs = require('fs');\n\
                       require(\"dotenv\")";
        let facts = extract_imports(content, "javascript");
        let kinds: Vec<_> = facts.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImportKind::Es6Import,
                ImportKind::SideEffectImport,
                ImportKind::Require,
                ImportKind::Require
            ]
        );
        assert_eq!(facts[0].module_name, "react");
        assert_eq!(
            facts[0].imported_items,
            Some(vec!["React, { useState }".to_string()])
        );
        assert_eq!(facts[1].module_name, "./styles.css");
        assert_eq!(facts[2].module_name, "fs");
        assert_eq!(facts[2].imported_items, Some(vec!["fs".to_string()]));
        assert_eq!(facts[3].module_name, "dotenv");
        assert_eq!(facts[3].imported_items, None);
    }

    #[test]
    fn test_java_and_go_imports() {
        let java = extract_imports("import static org.junit.Assert.assertEquals;", Language::Java);
        assert_eq!(java[0].module_name, "org.junit.Assert.assertEquals");
        assert_eq!(java[0].kind, ImportKind::Import);

        let go = extract_imports("import \"fmt\"\nimport log \"github.com/sirupsen/logrus\"", Language::Golang);
        assert_eq!(go.len(), 2);
        assert_eq!(go[0].module_name, "fmt");
        assert_eq!(go[1].module_name, "github.com/sirupsen/logrus");
        assert_eq!(go[1].imported_items, Some(vec!["log".to_string()]));
    }

    #[test]
    fn test_cpp_includes() {
        let content = "#include <vector>\n#include \"util/strings.h\"\nusing namespace std;\n// #include <map>";
        let facts = extract_imports(content, Language::Cpp);
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].kind, ImportKind::SystemInclude);
        assert_eq!(facts[0].module_name, "vector");
        assert_eq!(facts[1].kind, ImportKind::LocalInclude);
        assert_eq!(facts[1].module_name, "util/strings.h");
        assert_eq!(facts[2].kind, ImportKind::UsingNamespace);
        assert_eq!(facts[2].module_name, "std");
    }

    #[test]
    fn test_go_and_typescript_structures() {
        let go = "@@ -1,1 +1,2 @@\n+type Server struct {\n+func (s *Server) Start() error {";
        let analysis = analyze_patch(go, Language::Golang);
        assert_eq!(names(&analysis.classes), vec!["Server"]);
        assert_eq!(names(&analysis.functions), vec!["Start"]);
        assert_eq!(analysis.hunks.len(), 1);

        let ts = "@@ -1,1 +1,2 @@\n+export interface Props {\n+export class Widget<T> {";
        let classes = detect_class_changes(ts, Language::TypeScript);
        assert_eq!(names(&classes), vec!["Props", "Widget"]);
    }
}
