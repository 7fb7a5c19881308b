//! # Routing Tables
//!
//! Declarative routing data: compound patterns bound to fixed agent lists,
//! and per-agent keyword phrases. Loaded once and compiled by the router.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A regular expression bound to a hand-curated agent sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompoundRule {
    pub name: String,
    /// Matched against the lower-cased input
    pub pattern: String,
    pub agents: Vec<String>,
}

/// Keyword phrases that vote for one agent type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordRule {
    pub agent: String,
    pub keywords: Vec<String>,
}

/// Full routing data set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingTable {
    /// Checked in declaration order; first match wins
    pub compound: Vec<CompoundRule>,
    pub keywords: Vec<KeywordRule>,
}

fn compound(name: &str, pattern: &str, agents: &[&str]) -> CompoundRule {
    CompoundRule {
        name: name.to_string(),
        pattern: pattern.to_string(),
        agents: agents.iter().map(|a| a.to_string()).collect(),
    }
}

fn keywords(agent: &str, words: &[&str]) -> KeywordRule {
    KeywordRule {
        agent: agent.to_string(),
        keywords: words.iter().map(|w| w.to_string()).collect(),
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            compound: vec![
                compound(
                    "research-and-write",
                    r"\bresearch\b.*\b(?:write|report|article|summar)",
                    &["researcher", "analyst", "writer"],
                ),
                compound(
                    "blog-post",
                    r"\b(?:blog|article)\s+posts?\b|\b(?:write|draft|create)\b.*\b(?:blog|article|newsletter)\b",
                    &["researcher", "seo", "writer", "reviewer"],
                ),
                compound(
                    "build-software",
                    r"\b(?:build|create|develop|implement)\b.*\b(?:app|application|api|feature|website|service|tool)\b",
                    &["researcher", "coder", "reviewer"],
                ),
                compound(
                    "fix-bug",
                    r"\b(?:fix|debug)\b.*\b(?:bug|error|issue|crash)\b",
                    &["coder", "reviewer"],
                ),
                compound(
                    "data-report",
                    r"\banaly[sz]e\b.*\b(?:data|metrics|numbers|sales)\b.*\b(?:report|present|summar|write)",
                    &["analyst", "writer"],
                ),
                compound(
                    "translate-and-review",
                    r"\btranslat\w*\b.*\b(?:review|proofread|check)",
                    &["translator", "reviewer"],
                ),
                compound(
                    "marketing-launch",
                    r"\b(?:landing page|marketing campaign|ad copy)\b",
                    &["seo", "writer", "designer"],
                ),
                compound(
                    "market-study",
                    r"\b(?:competitor|market)\s+(?:research|analysis)\b",
                    &["researcher", "analyst"],
                ),
            ],
            keywords: vec![
                keywords(
                    "researcher",
                    &["research", "investigate", "find sources", "look up", "study", "explore", "sources"],
                ),
                keywords(
                    "writer",
                    &["write", "draft", "article", "blog", "essay", "copy", "content"],
                ),
                keywords(
                    "analyst",
                    &["analyze", "analyse", "analysis", "data", "metrics", "statistics", "trend", "chart"],
                ),
                keywords(
                    "coder",
                    &["code", "implement", "build", "program", "debug", "fix bug", "function", "script", "refactor"],
                ),
                keywords(
                    "reviewer",
                    &["review", "proofread", "check", "feedback", "audit", "critique"],
                ),
                keywords(
                    "seo",
                    &["seo", "keyword", "search ranking", "optimize for search", "backlink", "meta description"],
                ),
                keywords(
                    "designer",
                    &["design", "logo", "layout", "mockup", "wireframe", "banner", "illustration"],
                ),
                keywords(
                    "translator",
                    &["translate", "translation", "localize", "localise", "spanish", "french", "german", "japanese"],
                ),
            ],
        }
    }
}

impl RoutingTable {
    /// Load a table from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read routing table: {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| "Failed to parse routing table JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_round_trips_through_json() {
        let table = RoutingTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let parsed: RoutingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_keywords_are_lower_case() {
        for rule in RoutingTable::default().keywords {
            for word in rule.keywords {
                assert_eq!(word, word.to_lowercase());
            }
        }
    }
}
