//! # Agent Definitions
//!
//! Each agent type is a named unit of work with a category and a fixed,
//! ordered list of default steps. Runs synthesize their steps from here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::FlowError;

/// One default step of an agent type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepTemplate {
    pub label: String,
    /// Informational only; the scheduler draws its own delays
    #[serde(default)]
    pub approx_duration_ms: u64,
}

/// An agent type definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentTypeDefinition {
    /// Stable identifier (e.g. "researcher")
    pub id: String,
    /// Display label (e.g. "Researcher")
    pub label: String,
    /// Display category (e.g. "research")
    pub category: String,
    /// Ordered default steps
    pub default_steps: Vec<StepTemplate>,
}

impl AgentTypeDefinition {
    fn new(id: &str, label: &str, category: &str, steps: &[(&str, u64)]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            default_steps: steps
                .iter()
                .map(|(label, ms)| StepTemplate {
                    label: label.to_string(),
                    approx_duration_ms: *ms,
                })
                .collect(),
        }
    }
}

/// The Researcher agent: gathers and condenses sources
pub fn researcher_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "researcher",
        "Researcher",
        "research",
        &[
            ("Understanding the question", 1500),
            ("Searching sources", 2500),
            ("Reading and extracting findings", 2500),
            ("Summarizing research", 2000),
        ],
    )
}

/// The Writer agent: drafts long-form content
pub fn writer_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "writer",
        "Writer",
        "content",
        &[
            ("Outlining structure", 1500),
            ("Drafting content", 3000),
            ("Polishing language", 2000),
        ],
    )
}

/// The Analyst agent: turns data into conclusions
pub fn analyst_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "analyst",
        "Analyst",
        "analysis",
        &[
            ("Collecting data", 2000),
            ("Cleaning and normalizing", 1500),
            ("Running analysis", 2500),
            ("Charting results", 1500),
            ("Writing conclusions", 2000),
        ],
    )
}

/// The Coder agent: implements software changes
pub fn coder_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "coder",
        "Coder",
        "engineering",
        &[
            ("Reading requirements", 1500),
            ("Planning implementation", 2000),
            ("Writing code", 3000),
            ("Running tests", 2500),
        ],
    )
}

/// The Reviewer agent: checks work produced by other agents
pub fn reviewer_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "reviewer",
        "Reviewer",
        "quality",
        &[
            ("Reading the submission", 1500),
            ("Checking accuracy", 2000),
            ("Writing feedback", 1500),
        ],
    )
}

/// The SEO agent: keyword and discoverability work
pub fn seo_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "seo",
        "SEO Specialist",
        "marketing",
        &[
            ("Researching keywords", 2000),
            ("Analyzing competitors", 2000),
            ("Preparing optimization brief", 1500),
        ],
    )
}

/// The Designer agent: visual and layout work
pub fn designer_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "designer",
        "Designer",
        "design",
        &[
            ("Gathering references", 1500),
            ("Sketching layouts", 2500),
            ("Producing final design", 3000),
        ],
    )
}

/// The Translator agent: localizes text
pub fn translator_agent() -> AgentTypeDefinition {
    AgentTypeDefinition::new(
        "translator",
        "Translator",
        "localization",
        &[
            ("Detecting source language", 1000),
            ("Translating text", 3000),
            ("Checking terminology", 1500),
        ],
    )
}

/// Immutable, ordered collection of agent type definitions.
///
/// Declaration order matters: the intent router breaks keyword-score ties by
/// it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCatalog {
    agents: Vec<AgentTypeDefinition>,
}

impl Default for AgentCatalog {
    fn default() -> Self {
        Self {
            agents: vec![
                researcher_agent(),
                writer_agent(),
                analyst_agent(),
                coder_agent(),
                reviewer_agent(),
                seo_agent(),
                designer_agent(),
                translator_agent(),
            ],
        }
    }
}

impl AgentCatalog {
    /// Build a catalog from explicit definitions, rejecting duplicate or
    /// step-less entries
    pub fn new(agents: Vec<AgentTypeDefinition>) -> Result<Self, FlowError> {
        for (i, agent) in agents.iter().enumerate() {
            if agent.id.trim().is_empty() {
                return Err(FlowError::InvalidCatalog(format!(
                    "agent #{} has an empty id",
                    i
                )));
            }
            if agent.default_steps.is_empty() {
                return Err(FlowError::InvalidCatalog(format!(
                    "agent '{}' has no default steps",
                    agent.id
                )));
            }
            if agents[..i].iter().any(|a| a.id == agent.id) {
                return Err(FlowError::InvalidCatalog(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }
        Ok(Self { agents })
    }

    /// Load a catalog from a JSON array of definitions
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        let agents: Vec<AgentTypeDefinition> =
            serde_json::from_str(&content).with_context(|| "Failed to parse catalog JSON")?;
        Ok(Self::new(agents)?)
    }

    /// All definitions in declaration order
    pub fn list(&self) -> &[AgentTypeDefinition] {
        &self.agents
    }

    pub fn get(&self, id: &str) -> Option<&AgentTypeDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Declaration index of an agent, used for stable tie-breaking
    pub fn position(&self, id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    /// Display label for an agent type, falling back to the raw id
    pub fn label_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|a| a.label.as_str()).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_order() {
        let catalog = AgentCatalog::default();
        let ids: Vec<&str> = catalog.list().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["researcher", "writer", "analyst", "coder", "reviewer", "seo", "designer", "translator"]
        );
        assert_eq!(catalog.position("reviewer"), Some(4));
    }

    #[test]
    fn test_every_default_agent_has_steps() {
        let catalog = AgentCatalog::default();
        assert!(catalog.list().iter().all(|a| !a.default_steps.is_empty()));
        assert_eq!(catalog.get("analyst").unwrap().default_steps.len(), 5);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = AgentCatalog::new(vec![writer_agent(), writer_agent()]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidCatalog(_)));
    }

    #[test]
    fn test_label_fallback() {
        let catalog = AgentCatalog::default();
        assert_eq!(catalog.label_of("seo"), "SEO Specialist");
        assert_eq!(catalog.label_of("poet"), "poet");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        std::fs::write(
            &path,
            r#"[{"id":"poet","label":"Poet","category":"content",
                "defaultSteps":[{"label":"Rhyming"}]}]"#,
        )
        .unwrap();

        let catalog = AgentCatalog::load(&path).unwrap();
        assert_eq!(catalog.list().len(), 1);
        assert_eq!(catalog.get("poet").unwrap().default_steps[0].approx_duration_ms, 0);
    }
}
