//! The agent: name, system instructions and attached tool sources.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, DeploymentProfile};
use crate::tools::{tool_sources_for, ToolSource};

pub const AGENT_NAME: &str = "mcp_hub_agent";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant for MCP Hub.";

#[derive(Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub instruction: String,
    pub tool_sources: Vec<Arc<dyn ToolSource>>,
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<&str> = self.tool_sources.iter().map(|s| s.name()).collect();
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("instruction_len", &self.instruction.len())
            .field("tool_sources", &sources)
            .finish()
    }
}

impl AgentDefinition {
    /// Build the agent for a resolved profile. Tool-source handles are created
    /// here; they connect on first use.
    pub async fn build(profile: &DeploymentProfile, config: &Config) -> anyhow::Result<Self> {
        let instruction = load_instructions(&config.agent.instructions_file).await;

        let servers = profile.tool_servers();
        if servers.is_empty() {
            tracing::warn!(
                env = %profile.env(),
                "No MCP tool server configured; the agent will run without tools"
            );
        }
        let tool_sources = tool_sources_for(servers)?;

        tracing::info!(
            agent = AGENT_NAME,
            model = %profile.model().model,
            tool_sources = tool_sources.len(),
            "Agent defined"
        );

        Ok(Self {
            name: AGENT_NAME.to_string(),
            instruction,
            tool_sources,
        })
    }
}

/// Read the system instructions from `path`, falling back to
/// [`DEFAULT_INSTRUCTIONS`] when the file is missing, unreadable or blank.
pub async fn load_instructions(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "Instructions file is empty; using default");
            DEFAULT_INSTRUCTIONS.to_string()
        }
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "Instructions file not readable; using default"
            );
            DEFAULT_INSTRUCTIONS.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[tokio::test]
    async fn loads_instructions_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "You answer questions about MCP servers.").unwrap();

        let text = load_instructions(file.path()).await;
        assert!(text.starts_with("You answer questions about MCP servers."));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let text = load_instructions(&dir.path().join("absent.md")).await;
        assert_eq!(text, DEFAULT_INSTRUCTIONS);
    }

    #[tokio::test]
    async fn blank_file_falls_back_to_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(load_instructions(file.path()).await, DEFAULT_INSTRUCTIONS);
    }

    #[tokio::test]
    async fn build_attaches_configured_tool_servers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agent.instructions_file = dir.path().join("instructions.md");
        config
            .apply_env_overrides_from(&HashMap::from([
                ("GOOGLE_API_KEY".to_string(), "g-key".to_string()),
                (
                    "MCP_HUB_SERVER_URL_DEV".to_string(),
                    "http://localhost:8001/mcp".to_string(),
                ),
            ]))
            .unwrap();
        let profile = config.resolve().unwrap();

        let agent = AgentDefinition::build(&profile, &config).await.unwrap();
        assert_eq!(agent.name, AGENT_NAME);
        assert_eq!(agent.instruction, DEFAULT_INSTRUCTIONS);
        assert_eq!(agent.tool_sources.len(), 1);
        assert_eq!(agent.tool_sources[0].name(), "mcp_hub");
    }
}
