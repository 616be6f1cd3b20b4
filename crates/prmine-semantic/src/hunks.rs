//! Unified diff hunk parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").unwrap()
});

/// One `@@` block of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Text after the closing `@@`, trimmed. Usually the enclosing definition.
    pub context: String,
    /// Body lines with their `+`, `-` or space marker intact.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Body lines joined with `\n`, byte-identical to the diff block.
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }

    /// Lines starting with `+` or `-`, paired with their marker.
    pub fn changes(&self) -> impl Iterator<Item = (char, &str)> {
        self.lines.iter().filter_map(|line| {
            let marker = line.chars().next()?;
            match marker {
                '+' | '-' => Some((marker, &line[1..])),
                _ => None,
            }
        })
    }
}

fn parse_header(line: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |i: usize, default: u32| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };
    Some(Hunk {
        old_start: number(1, 0)?,
        old_count: number(2, 1)?,
        new_start: number(3, 0)?,
        new_count: number(4, 1)?,
        context: caps.get(5).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        lines: Vec::new(),
    })
}

/// Split a unified diff patch into hunks.
///
/// Lines before the first header are ignored. A malformed `@@` line is
/// skipped; body lines after it keep attaching to the previous hunk.
pub fn parse_hunks(patch: &str) -> Vec<Hunk> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in patch.split('\n') {
        if line.starts_with("@@") {
            if let Some(hunk) = parse_header(line) {
                hunks.push(hunk);
            }
            continue;
        }
        if let Some(current) = hunks.last_mut() {
            if line.starts_with('+') || line.starts_with('-') || line.starts_with(' ') {
                current.lines.push(line.to_string());
            }
        }
    }
    hunks
}
