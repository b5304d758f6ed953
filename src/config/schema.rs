use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::ConfigError;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level service configuration.
///
/// Resolution order: defaults → optional TOML file (`--config` / `MCP_HUB_CONFIG`)
/// → environment variables (case-insensitive names, e.g. `APP_ENV`, `PORT`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to the TOML file this config was read from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Application identity and environment flag (`[app]`).
    #[serde(default)]
    pub app: AppConfig,

    /// HTTP server: bind address, CORS, rate limits (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Model names and credentials per environment (`[llm]`).
    #[serde(default)]
    pub llm: LlmConfig,

    /// Remote MCP tool servers per environment (`[mcp]`).
    #[serde(default)]
    pub mcp: McpConfig,

    /// Frontend URLs per environment (`[web]`).
    #[serde(default)]
    pub web: WebConfig,

    /// Agent definition settings (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Log level, format and optional file sink (`[logging]`).
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ── Application ───────────────────────────────────────────────────

/// Deployment environment flag. Selects model, credential and tool servers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
}

impl AppEnv {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue {
                key: "APP_ENV".into(),
                value: other.to_string(),
                reason: "expected `development` or `production`".into(),
            }),
        }
    }
}

/// Application identity (`[app]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Environment flag. Default: `development`.
    #[serde(default)]
    pub env: AppEnv,
    /// Application name; also the session namespace. Default: `"MCP Hub Agent"`.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Reported version. Default: the crate version.
    #[serde(default = "default_app_version")]
    pub version: String,
    /// Verbose diagnostics. Default: `true`.
    #[serde(default = "default_true")]
    pub debug: bool,
}

fn default_app_name() -> String {
    "MCP Hub Agent".into()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: AppEnv::default(),
            name: default_app_name(),
            version: default_app_version(),
            debug: true,
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────

/// HTTP server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host (default: 0.0.0.0)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Bind port (default: 8000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Allowed CORS origins.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Enforce a per-user request budget on chat endpoints (default: true)
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    /// Max chat requests per minute per user key (default: 60)
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    /// Max request body size in bytes (default: 64 KiB)
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://localhost:5173".into(),
    ]
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_body_limit_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            cors_origins: default_cors_origins(),
            rate_limit_enabled: true,
            rate_limit_per_minute: default_rate_limit_per_minute(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────────

/// Model selection and credentials (`[llm]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Gemini key, required in development. Env: `GOOGLE_API_KEY`.
    #[serde(default)]
    pub google_api_key: Option<String>,
    /// OpenAI key, required in production. Env: `OPENAI_API_KEY`.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Default: `gemini-2.0-flash-exp`.
    #[serde(default = "default_model_name_dev")]
    pub model_name_dev: String,
    /// Default: `gpt-4o`.
    #[serde(default = "default_model_name_prod")]
    pub model_name_prod: String,
    /// Overrides the provider base URL for either environment. Env: `LLM_API_URL`.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Sampling temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_model_name_dev() -> String {
    "gemini-2.0-flash-exp".into()
}

fn default_model_name_prod() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            openai_api_key: None,
            model_name_dev: default_model_name_dev(),
            model_name_prod: default_model_name_prod(),
            api_url: None,
            temperature: default_temperature(),
        }
    }
}

// ── MCP tool servers ──────────────────────────────────────────────

/// Remote MCP tool servers (`[mcp]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub hub_server_url_dev: Option<String>,
    #[serde(default)]
    pub hub_server_url_prod: Option<String>,
    #[serde(default)]
    pub analytics_url_dev: Option<String>,
    #[serde(default)]
    pub analytics_url_prod: Option<String>,
    #[serde(default)]
    pub chart_url_dev: Option<String>,
    #[serde(default)]
    pub chart_url_prod: Option<String>,
    /// Connect and read timeout for tool servers, in seconds. Default: `30`.
    #[serde(default = "default_mcp_timeout_secs")]
    pub server_timeout_secs: u64,
}

fn default_mcp_timeout_secs() -> u64 {
    30
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            hub_server_url_dev: None,
            hub_server_url_prod: None,
            analytics_url_dev: None,
            analytics_url_prod: None,
            chart_url_dev: None,
            chart_url_prod: None,
            server_timeout_secs: default_mcp_timeout_secs(),
        }
    }
}

/// Frontend URLs (`[web]` section).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebConfig {
    #[serde(default)]
    pub url_dev: Option<String>,
    #[serde(default)]
    pub url_prod: Option<String>,
}

// ── Agent ─────────────────────────────────────────────────────────

/// Agent definition settings (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System prompt file. Falls back to a built-in prompt when missing.
    #[serde(default = "default_instructions_file")]
    pub instructions_file: PathBuf,
    /// Maximum model ↔ tool round trips per user message. Default: `10`.
    /// Setting to `0` falls back to the default.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_instructions_file() -> PathBuf {
    PathBuf::from("instructions.md")
}

fn default_max_tool_iterations() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions_file: default_instructions_file(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Console,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "console" | "text" | "pretty" => Ok(Self::Console),
            other => Err(ConfigError::InvalidValue {
                key: "LOG_FORMAT".into(),
                value: other.to_string(),
                reason: "expected `json` or `console`".into(),
            }),
        }
    }
}

/// Logging configuration (`[logging]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level directive, e.g. `INFO` or `mcp_hub_agent=debug`. `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file (daily rotation disabled).
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "INFO".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// Load config from an optional TOML file, then apply process environment
    /// overrides and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("MCP_HUB_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let contents = tokio::fs::read_to_string(&path).await.map_err(|source| {
                    ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                let mut config = Self::from_toml(&contents)?;
                config.config_path = Some(path);
                config
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.apply_env_overrides_from(&vars)
    }

    /// Apply overrides from an explicit variable map. Names are matched
    /// case-insensitively; empty values are ignored.
    pub fn apply_env_overrides_from(
        &mut self,
        vars: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        let env = EnvVars::new(vars);

        if let Some(v) = env.get("APP_ENV") {
            self.app.env = v.parse()?;
        }
        if let Some(v) = env.get("APP_NAME") {
            self.app.name = v.to_string();
        }
        if let Some(v) = env.get("APP_VERSION") {
            self.app.version = v.to_string();
        }
        if let Some(v) = env.get("DEBUG") {
            self.app.debug = parse_bool("DEBUG", v)?;
        }

        if let Some(v) = env.get("HOST") {
            self.gateway.host = v.to_string();
        }
        if let Some(v) = env.get("PORT") {
            self.gateway.port = parse_number("PORT", v)?;
        }
        if let Some(v) = env.get("CORS_ORIGINS") {
            self.gateway.cors_origins = split_comma_list(v);
        }
        if let Some(v) = env.get("RATE_LIMIT_ENABLED") {
            self.gateway.rate_limit_enabled = parse_bool("RATE_LIMIT_ENABLED", v)?;
        }
        if let Some(v) = env.get("RATE_LIMIT_PER_MINUTE") {
            self.gateway.rate_limit_per_minute = parse_number("RATE_LIMIT_PER_MINUTE", v)?;
        }

        if let Some(v) = env.get("GOOGLE_API_KEY") {
            self.llm.google_api_key = Some(v.to_string());
        }
        if let Some(v) = env.get("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v.to_string());
        }
        if let Some(v) = env.get("MODEL_NAME_DEV") {
            self.llm.model_name_dev = v.to_string();
        }
        if let Some(v) = env.get("MODEL_NAME_PROD") {
            self.llm.model_name_prod = v.to_string();
        }
        if let Some(v) = env.get("LLM_API_URL") {
            self.llm.api_url = Some(v.to_string());
        }
        if let Some(v) = env.get("LLM_TEMPERATURE") {
            self.llm.temperature = parse_number("LLM_TEMPERATURE", v)?;
        }

        let urls = [
            ("MCP_HUB_SERVER_URL_DEV", &mut self.mcp.hub_server_url_dev),
            ("MCP_HUB_SERVER_URL_PROD", &mut self.mcp.hub_server_url_prod),
            ("ANALYTICS_MCP_URL_DEV", &mut self.mcp.analytics_url_dev),
            ("ANALYTICS_MCP_URL_PROD", &mut self.mcp.analytics_url_prod),
            ("CHART_MCP_URL_DEV", &mut self.mcp.chart_url_dev),
            ("CHART_MCP_URL_PROD", &mut self.mcp.chart_url_prod),
            ("WEB_URL_DEV", &mut self.web.url_dev),
            ("WEB_URL_PROD", &mut self.web.url_prod),
        ];
        for (key, slot) in urls {
            if let Some(v) = env.get(key) {
                *slot = Some(v.to_string());
            }
        }
        if let Some(v) = env.get("MCP_SERVER_TIMEOUT") {
            self.mcp.server_timeout_secs = parse_number("MCP_SERVER_TIMEOUT", v)?;
        }

        if let Some(v) = env.get("INSTRUCTIONS_FILE") {
            self.agent.instructions_file = PathBuf::from(v);
        }
        if let Some(v) = env.get("AGENT_MAX_TOOL_ITERATIONS") {
            self.agent.max_tool_iterations = parse_number("AGENT_MAX_TOOL_ITERATIONS", v)?;
        }

        if let Some(v) = env.get("LOG_LEVEL") {
            self.logging.level = v.to_string();
        }
        if let Some(v) = env.get("LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        if let Some(v) = env.get("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }

        Ok(())
    }

    /// Validate values that would otherwise fail at arbitrary runtime points.
    ///
    /// Credentials are not checked here; see [`Config::resolve`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "HOST".into(),
                value: String::new(),
                reason: "must not be empty".into(),
            });
        }
        if self.gateway.rate_limit_enabled && self.gateway.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_PER_MINUTE".into(),
                value: "0".into(),
                reason: "must be greater than 0 when rate limiting is enabled".into(),
            });
        }
        if self.mcp.server_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MCP_SERVER_TIMEOUT".into(),
                value: "0".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".into(),
                value: self.llm.temperature.to_string(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }
        Ok(())
    }

    /// Model name for the configured environment.
    pub fn model_name(&self) -> &str {
        match self.app.env {
            AppEnv::Development => &self.llm.model_name_dev,
            AppEnv::Production => &self.llm.model_name_prod,
        }
    }

    /// Frontend URL for the configured environment.
    pub fn web_url(&self) -> Option<&str> {
        match self.app.env {
            AppEnv::Development => self.web.url_dev.as_deref(),
            AppEnv::Production => self.web.url_prod.as_deref(),
        }
    }
}

/// Case-insensitive, blank-skipping view over a variable map.
struct EnvVars<'a> {
    vars: HashMap<String, &'a str>,
}

impl<'a> EnvVars<'a> {
    fn new(vars: &'a HashMap<String, String>) -> Self {
        Self {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v.as_str()))
                .collect(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: other.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        value: raw.to_string(),
        reason: "expected a number".into(),
    })
}

pub(crate) fn split_comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
