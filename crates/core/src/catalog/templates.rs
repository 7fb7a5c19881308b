//! # Pipeline Templates
//!
//! Canned stage lists that can be loaded onto the canvas or turned straight
//! into a pipeline.

use serde::{Deserialize, Serialize};

/// One stage of a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStage {
    pub agent_type: String,
    #[serde(default)]
    pub task: String,
}

impl TemplateStage {
    pub fn new(agent_type: &str, task: &str) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            task: task.to_string(),
        }
    }
}

/// A named, ordered list of stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub stages: Vec<TemplateStage>,
}

/// Built-in templates
pub fn builtin_templates() -> Vec<PipelineTemplate> {
    vec![
        PipelineTemplate {
            id: "blog-post".to_string(),
            name: "Blog Post".to_string(),
            description: "Research a topic, optimize for search, write and review a post"
                .to_string(),
            stages: vec![
                TemplateStage::new("researcher", "Research the topic and collect sources"),
                TemplateStage::new("seo", "Find target keywords"),
                TemplateStage::new("writer", "Write the blog post"),
                TemplateStage::new("reviewer", "Review the draft"),
            ],
        },
        PipelineTemplate {
            id: "research-report".to_string(),
            name: "Research Report".to_string(),
            description: "Investigate, analyze and write up findings".to_string(),
            stages: vec![
                TemplateStage::new("researcher", "Gather sources"),
                TemplateStage::new("analyst", "Analyze the findings"),
                TemplateStage::new("writer", "Write the report"),
            ],
        },
        PipelineTemplate {
            id: "feature-build".to_string(),
            name: "Feature Build".to_string(),
            description: "Research, implement and review a software feature".to_string(),
            stages: vec![
                TemplateStage::new("researcher", "Investigate prior art"),
                TemplateStage::new("coder", "Implement the feature"),
                TemplateStage::new("reviewer", "Review the change"),
            ],
        },
        PipelineTemplate {
            id: "localization".to_string(),
            name: "Localization".to_string(),
            description: "Translate content and have it reviewed".to_string(),
            stages: vec![
                TemplateStage::new("translator", "Translate the content"),
                TemplateStage::new("reviewer", "Proofread the translation"),
            ],
        },
    ]
}

/// Look up a built-in template by id
pub fn find_template(id: &str) -> Option<PipelineTemplate> {
    builtin_templates().into_iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AgentCatalog;

    #[test]
    fn test_templates_reference_known_agents() {
        let catalog = AgentCatalog::default();
        for template in builtin_templates() {
            for stage in &template.stages {
                assert!(
                    catalog.contains(&stage.agent_type),
                    "{} uses unknown agent {}",
                    template.id,
                    stage.agent_type
                );
            }
        }
    }

    #[test]
    fn test_find_template() {
        assert_eq!(find_template("research-report").unwrap().stages.len(), 3);
        assert!(find_template("missing").is_none());
    }
}
