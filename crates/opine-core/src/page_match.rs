//! URL-pattern matching for page targets
//!
//! Patterns arrive as untrusted config, so they are validated and compiled
//! once at load time. An invalid pattern surfaces a single error and the
//! target is treated as non-matching, instead of failing on every page view.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: regex::Error,
    },
}

/// How a page-target pattern is applied to the current path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    StartsWith,
    Contains,
    Regex,
    Glob,
}

/// Page-target config as delivered by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTarget {
    pub id: i32,
    pub name: String,
    pub pattern: String,
    pub match_type: MatchType,
}

#[derive(Debug)]
enum CompiledMatcher {
    Exact(String),
    StartsWith(String),
    Contains(String),
    Regex(Regex),
}

/// Validated page target ready for per-page-view matching
#[derive(Debug)]
pub struct CompiledTarget {
    pub id: i32,
    pub name: String,
    matcher: CompiledMatcher,
}

impl CompiledTarget {
    pub fn compile(target: &PageTarget) -> Result<Self, PatternError> {
        let matcher = match target.match_type {
            MatchType::Exact => CompiledMatcher::Exact(target.pattern.clone()),
            MatchType::StartsWith => CompiledMatcher::StartsWith(target.pattern.clone()),
            MatchType::Contains => CompiledMatcher::Contains(target.pattern.clone()),
            MatchType::Regex => {
                let regex = Regex::new(&target.pattern).map_err(|source| {
                    PatternError::InvalidRegex {
                        pattern: target.pattern.clone(),
                        source,
                    }
                })?;
                CompiledMatcher::Regex(regex)
            }
            MatchType::Glob => {
                let anchored = glob_to_regex(&target.pattern);
                let regex =
                    Regex::new(&anchored).map_err(|source| PatternError::InvalidGlob {
                        pattern: target.pattern.clone(),
                        source,
                    })?;
                CompiledMatcher::Regex(regex)
            }
        };

        Ok(Self {
            id: target.id,
            name: target.name.clone(),
            matcher,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.matcher {
            CompiledMatcher::Exact(pattern) => path == pattern,
            CompiledMatcher::StartsWith(pattern) => path.starts_with(pattern.as_str()),
            CompiledMatcher::Contains(pattern) => path.contains(pattern.as_str()),
            CompiledMatcher::Regex(regex) => regex.is_match(path),
        }
    }
}

/// Convert a glob pattern to an anchored regex: `*` matches any run of
/// characters, `?` any single character, everything else is literal.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
