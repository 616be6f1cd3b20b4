pub mod analyze;
pub mod crawl;
pub mod materialize;
pub mod status;

use anyhow::{bail, Result};
use prmine_semantic::Language;

/// Resolve language ids given on the command line.
pub fn parse_languages(names: &[String]) -> Result<Vec<Language>> {
    let mut languages = Vec::with_capacity(names.len());
    for name in names {
        match Language::parse(name) {
            Some(language) => languages.push(language),
            None => bail!(
                "Unknown language '{}' (expected one of: {})",
                name,
                Language::ALL.map(|l| l.as_str()).join(", ")
            ),
        }
    }
    Ok(languages)
}
