pub mod profile;
pub mod schema;

use std::path::PathBuf;

#[allow(unused_imports)]
pub use profile::{
    DeploymentProfile, DevelopmentConfig, ModelSpec, ProductionConfig, ToolServerSpec,
    GEMINI_OPENAI_BASE_URL, OPENAI_BASE_URL,
};
#[allow(unused_imports)]
pub use schema::{
    AgentConfig, AppConfig, AppEnv, Config, GatewayConfig, LlmConfig, LogFormat, LoggingConfig,
    McpConfig, WebConfig,
};

/// Startup-time configuration failures. None of these are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{variable} is required for {env} environment")]
    MissingCredential {
        variable: &'static str,
        env: AppEnv,
    },

    #[error("invalid value for {key} ({value:?}): {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert_eq!(config.app.env, AppEnv::Development);
        assert!(!config.model_name().is_empty());
        assert!(config.llm.temperature > 0.0);
    }

    #[test]
    fn missing_credential_message_names_variable_and_env() {
        let err = ConfigError::MissingCredential {
            variable: "OPENAI_API_KEY",
            env: AppEnv::Production,
        };
        assert_eq!(
            err.to_string(),
            "OPENAI_API_KEY is required for production environment"
        );
    }
}
