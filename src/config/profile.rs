//! Environment-specific model, credential and tool-server selection.
//!
//! [`Config::resolve`] turns the flat config into a [`DeploymentProfile`] once
//! at startup. Everything downstream matches on the profile instead of
//! re-reading the environment flag.

use std::time::Duration;

use super::schema::{AppEnv, Config};
use super::ConfigError;

/// Gemini's OpenAI-compatible endpoint.
pub const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
/// OpenAI's public endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Model endpoint and the credential to call it with.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Provider key understood by [`crate::providers::create_provider`].
    pub provider: &'static str,
    pub model: String,
    pub api_key: String,
    pub api_url: String,
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"***")
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// One remote MCP server the agent attaches as a tool source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerSpec {
    pub name: String,
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevelopmentConfig {
    pub model: ModelSpec,
    pub tool_servers: Vec<ToolServerSpec>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionConfig {
    pub model: ModelSpec,
    pub tool_servers: Vec<ToolServerSpec>,
    pub web_url: Option<String>,
}

/// Resolved per-environment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentProfile {
    /// Gemini via `GOOGLE_API_KEY`, `*_DEV` tool servers.
    Development(DevelopmentConfig),
    /// OpenAI via `OPENAI_API_KEY`, `*_PROD` tool servers.
    Production(ProductionConfig),
}

impl DeploymentProfile {
    pub fn env(&self) -> AppEnv {
        match self {
            Self::Development(_) => AppEnv::Development,
            Self::Production(_) => AppEnv::Production,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        match self {
            Self::Development(c) => &c.model,
            Self::Production(c) => &c.model,
        }
    }

    pub fn tool_servers(&self) -> &[ToolServerSpec] {
        match self {
            Self::Development(c) => &c.tool_servers,
            Self::Production(c) => &c.tool_servers,
        }
    }

    pub fn web_url(&self) -> Option<&str> {
        match self {
            Self::Development(c) => c.web_url.as_deref(),
            Self::Production(c) => c.web_url.as_deref(),
        }
    }
}

impl Config {
    /// Select model, credential and tool servers for the configured
    /// environment. Fails before any network activity when the credential
    /// for that environment is missing.
    pub fn resolve(&self) -> Result<DeploymentProfile, ConfigError> {
        let timeout = Duration::from_secs(self.mcp.server_timeout_secs);

        match self.app.env {
            AppEnv::Development => {
                let api_key = required_credential(
                    self.llm.google_api_key.as_deref(),
                    "GOOGLE_API_KEY",
                    AppEnv::Development,
                )?;
                let model = ModelSpec {
                    provider: "gemini",
                    model: self.llm.model_name_dev.clone(),
                    api_key,
                    api_url: self
                        .llm
                        .api_url
                        .clone()
                        .unwrap_or_else(|| GEMINI_OPENAI_BASE_URL.to_string()),
                };
                let tool_servers = collect_tool_servers(
                    [
                        ("mcp_hub", self.mcp.hub_server_url_dev.as_deref()),
                        ("analytics", self.mcp.analytics_url_dev.as_deref()),
                        ("chart", self.mcp.chart_url_dev.as_deref()),
                    ],
                    timeout,
                );
                Ok(DeploymentProfile::Development(DevelopmentConfig {
                    model,
                    tool_servers,
                    web_url: self.web.url_dev.clone(),
                }))
            }
            AppEnv::Production => {
                let api_key = required_credential(
                    self.llm.openai_api_key.as_deref(),
                    "OPENAI_API_KEY",
                    AppEnv::Production,
                )?;
                let model = ModelSpec {
                    provider: "openai",
                    model: self.llm.model_name_prod.clone(),
                    api_key,
                    api_url: self
                        .llm
                        .api_url
                        .clone()
                        .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                };
                let tool_servers = collect_tool_servers(
                    [
                        ("mcp_hub", self.mcp.hub_server_url_prod.as_deref()),
                        ("analytics", self.mcp.analytics_url_prod.as_deref()),
                        ("chart", self.mcp.chart_url_prod.as_deref()),
                    ],
                    timeout,
                );
                Ok(DeploymentProfile::Production(ProductionConfig {
                    model,
                    tool_servers,
                    web_url: self.web.url_prod.clone(),
                }))
            }
        }
    }
}

fn required_credential(
    value: Option<&str>,
    variable: &'static str,
    env: AppEnv,
) -> Result<String, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or(ConfigError::MissingCredential { variable, env })
}

fn collect_tool_servers<const N: usize>(
    candidates: [(&str, Option<&str>); N],
    timeout: Duration,
) -> Vec<ToolServerSpec> {
    candidates
        .into_iter()
        .filter_map(|(name, url)| {
            let url = url?.trim();
            (!url.is_empty()).then(|| ToolServerSpec {
                name: name.to_string(),
                url: url.to_string(),
                timeout,
            })
        })
        .collect()
}
