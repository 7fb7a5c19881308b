//! # Intent Router
//!
//! Pure, stateless classification of a task description into an ordered
//! agent list with a confidence score.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rules::RoutingTable;
use crate::catalog::AgentCatalog;
use crate::error::FlowError;

/// Confidence reported for any compound pattern hit
pub const COMPOUND_CONFIDENCE: f64 = 0.9;

const SINGLE_BASE: f64 = 0.70;
const SINGLE_STEP: f64 = 0.05;
const SINGLE_CAP: f64 = 0.85;
const MULTI_BASE: f64 = 0.60;
const MULTI_STEP: f64 = 0.04;
const MULTI_CAP: f64 = 0.80;

/// Result of routing a task description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDetection {
    pub agents: Vec<String>,
    pub is_multi_agent: bool,
    /// 0..=1
    pub confidence: f64,
    /// Name of the compound rule that matched, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

impl PipelineDetection {
    pub fn empty() -> Self {
        Self {
            agents: Vec::new(),
            is_multi_agent: false,
            confidence: 0.0,
            matched_rule: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[derive(Debug, Clone)]
struct CompiledCompound {
    name: String,
    regex: Regex,
    agents: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledKeywords {
    agent: String,
    keywords: Vec<String>,
}

/// Compiled routing table
#[derive(Debug, Clone)]
pub struct IntentRouter {
    compound: Vec<CompiledCompound>,
    /// Ordered by catalog declaration order
    keywords: Vec<CompiledKeywords>,
}

impl IntentRouter {
    /// Compile a table, rejecting bad patterns and agents missing from the
    /// catalog
    pub fn new(table: &RoutingTable, catalog: &AgentCatalog) -> Result<Self, FlowError> {
        let mut compound = Vec::with_capacity(table.compound.len());
        for rule in &table.compound {
            if let Some(agent) = rule.agents.iter().find(|a| !catalog.contains(a)) {
                return Err(FlowError::UnknownRoutingAgent {
                    agent: agent.clone(),
                    rule: rule.name.clone(),
                });
            }
            let regex = Regex::new(&rule.pattern).map_err(|source| FlowError::InvalidPattern {
                pattern: rule.pattern.clone(),
                source,
            })?;
            compound.push(CompiledCompound {
                name: rule.name.clone(),
                regex,
                agents: rule.agents.clone(),
            });
        }

        let mut keywords = Vec::with_capacity(table.keywords.len());
        for rule in &table.keywords {
            if !catalog.contains(&rule.agent) {
                return Err(FlowError::UnknownRoutingAgent {
                    agent: rule.agent.clone(),
                    rule: "keywords".to_string(),
                });
            }
            keywords.push(CompiledKeywords {
                agent: rule.agent.clone(),
                keywords: rule.keywords.iter().map(|k| k.to_lowercase()).collect(),
            });
        }
        keywords.sort_by_key(|k| catalog.position(&k.agent).unwrap_or(usize::MAX));

        Ok(Self { compound, keywords })
    }

    /// Compile the built-in table, dropping rules that reference agents the
    /// catalog does not define
    pub fn with_defaults(catalog: &AgentCatalog) -> Self {
        let mut table = RoutingTable::default();
        table
            .compound
            .retain(|rule| rule.agents.iter().all(|a| catalog.contains(a)));
        table.keywords.retain(|rule| catalog.contains(&rule.agent));

        // Built-in patterns are known to compile
        Self::new(&table, catalog).unwrap_or(Self {
            compound: Vec::new(),
            keywords: Vec::new(),
        })
    }

    /// Classify a task description
    pub fn detect_pipeline(&self, text: &str) -> PipelineDetection {
        let input = text.trim().to_lowercase();
        if input.is_empty() {
            return PipelineDetection::empty();
        }

        if let Some(rule) = self.compound.iter().find(|r| r.regex.is_match(&input)) {
            return PipelineDetection {
                is_multi_agent: rule.agents.len() > 1,
                agents: rule.agents.clone(),
                confidence: COMPOUND_CONFIDENCE,
                matched_rule: Some(rule.name.clone()),
            };
        }

        let mut scored: Vec<(&str, usize)> = self
            .keywords
            .iter()
            .map(|rule| {
                let hits = rule
                    .keywords
                    .iter()
                    .filter(|k| input.contains(k.as_str()))
                    .count();
                (rule.agent.as_str(), hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .collect();

        if scored.is_empty() {
            return PipelineDetection::empty();
        }

        // Stable: equal counts keep catalog order
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let total: usize = scored.iter().map(|(_, hits)| hits).sum();
        let confidence = if scored.len() == 1 {
            (SINGLE_BASE + SINGLE_STEP * total as f64).min(SINGLE_CAP)
        } else {
            (MULTI_BASE + MULTI_STEP * total as f64).min(MULTI_CAP)
        };

        PipelineDetection {
            is_multi_agent: scored.len() > 1,
            agents: scored.into_iter().map(|(agent, _)| agent.to_string()).collect(),
            confidence,
            matched_rule: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::rules::{CompoundRule, KeywordRule};

    fn router() -> IntentRouter {
        IntentRouter::with_defaults(&AgentCatalog::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_blog_post_compound() {
        let result = router().detect_pipeline("write a blog post");
        assert_eq!(result.agents, vec!["researcher", "seo", "writer", "reviewer"]);
        assert!(result.is_multi_agent);
        assert!(approx(result.confidence, 0.9));
        assert_eq!(result.matched_rule.as_deref(), Some("blog-post"));
    }

    #[test]
    fn test_first_compound_wins() {
        // Matches both research-and-write and blog-post
        let result = router().detect_pipeline("Research Rust and write a blog post");
        assert_eq!(result.matched_rule.as_deref(), Some("research-and-write"));
        assert_eq!(result.agents, vec!["researcher", "analyst", "writer"]);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(router().detect_pipeline(""), PipelineDetection::empty());
        assert_eq!(router().detect_pipeline("   \n\t"), PipelineDetection::empty());
    }

    #[test]
    fn test_no_matches() {
        let result = router().detect_pipeline("xyzxyz123");
        assert!(result.agents.is_empty());
        assert!(!result.is_multi_agent);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_single_keyword_confidence() {
        let result = router().detect_pipeline("please translate this paragraph");
        assert_eq!(result.agents, vec!["translator"]);
        assert!(!result.is_multi_agent);
        assert!(approx(result.confidence, 0.75));
    }

    #[test]
    fn test_single_agent_confidence_capped() {
        let result = router()
            .detect_pipeline("translate and localize into spanish, french, german and japanese");
        assert_eq!(result.agents, vec!["translator"]);
        assert!(approx(result.confidence, 0.85));
    }

    #[test]
    fn test_multi_agent_scoring_order() {
        let result = router().detect_pipeline("analyze our sales data and research trends");
        assert_eq!(result.agents, vec!["analyst", "researcher"]);
        assert!(result.is_multi_agent);
        assert!(approx(result.confidence, 0.76));
    }

    #[test]
    fn test_ties_follow_catalog_order() {
        let result = router().detect_pipeline("the logo needs a review");
        assert_eq!(result.agents, vec!["reviewer", "designer"]);
        assert!(approx(result.confidence, 0.68));
    }

    #[test]
    fn test_deterministic() {
        let r = router();
        let text = "debug the script and check the metrics";
        assert_eq!(r.detect_pipeline(text), r.detect_pipeline(text));
    }

    #[test]
    fn test_unknown_agent_in_table_rejected() {
        let table = RoutingTable {
            compound: vec![],
            keywords: vec![KeywordRule {
                agent: "poet".to_string(),
                keywords: vec!["poem".to_string()],
            }],
        };
        let err = IntentRouter::new(&table, &AgentCatalog::default()).unwrap_err();
        assert!(matches!(err, FlowError::UnknownRoutingAgent { .. }));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let table = RoutingTable {
            compound: vec![CompoundRule {
                name: "broken".to_string(),
                pattern: "(unclosed".to_string(),
                agents: vec!["writer".to_string()],
            }],
            keywords: vec![],
        };
        let err = IntentRouter::new(&table, &AgentCatalog::default()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidPattern { .. }));
    }

    #[test]
    fn test_keyword_rules_reordered_by_catalog() {
        let table = RoutingTable {
            compound: vec![],
            keywords: vec![
                KeywordRule {
                    agent: "designer".to_string(),
                    keywords: vec!["poster".to_string()],
                },
                KeywordRule {
                    agent: "writer".to_string(),
                    keywords: vec!["poster".to_string()],
                },
            ],
        };
        let router = IntentRouter::new(&table, &AgentCatalog::default()).unwrap();
        let result = router.detect_pipeline("a poster");
        assert_eq!(result.agents, vec!["writer", "designer"]);
    }
}
