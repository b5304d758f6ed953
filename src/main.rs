#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mcp_hub_agent::config::{Config, DeploymentProfile};
use mcp_hub_agent::gateway::{self, AppState};
use mcp_hub_agent::observability;
use mcp_hub_agent::AgentService;

/// MCP Hub Agent - LLM agent service with MCP tool servers.
#[derive(Parser, Debug)]
#[command(name = "mcp-hub-agent")]
#[command(version)]
#[command(about = "HTTP agent service backed by MCP tool servers.", long_about = None)]
struct Cli {
    /// TOML config file (defaults to $MCP_HUB_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    #[command(long_about = "\
Start the HTTP API.

Serves POST /api/chat, POST /api/chat/stream, GET /health and GET /. \
The agent runner is built before the listener opens.

Examples:
  mcp-hub-agent serve
  mcp-hub-agent serve --port 8080
  APP_ENV=production mcp-hub-agent serve --host 127.0.0.1")]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one message to the agent and print the reply
    Ask {
        /// Message text
        #[arg(short, long)]
        message: String,

        /// User id; omitted means the shared anonymous session
        #[arg(short, long)]
        user: Option<String>,

        /// Print fragments as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Show resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;
    observability::init_logging(&config.logging)?;
    info!(
        path = ?config.config_path,
        environment = %config.app.env,
        "Config loaded"
    );

    match cli.command {
        Commands::Status => {
            print_status(&config);
            Ok(())
        }

        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let (config, profile, agent) = build_service(config)?;
            agent
                .runner()
                .await
                .context("failed to initialize agent runner")?;
            let state = AppState::new(config, profile, agent);
            gateway::run_gateway(&host, port, state).await
        }

        Commands::Ask {
            message,
            user,
            stream,
        } => {
            let (_, _, agent) = build_service(config)?;
            if stream {
                let mut fragments = agent.run_agent_stream(message, user.as_deref());
                while let Some(fragment) = fragments.next().await {
                    print!("{}", fragment?);
                    std::io::stdout().flush()?;
                }
                println!();
            } else {
                let reply = agent.run_agent(&message, user.as_deref()).await?;
                println!("{reply}");
            }
            Ok(())
        }
    }
}

/// Resolve the deployment profile and wire the agent service. Fails fast on a
/// missing credential.
fn build_service(
    config: Config,
) -> Result<(Arc<Config>, Arc<DeploymentProfile>, Arc<AgentService>)> {
    let profile = Arc::new(config.resolve()?);
    let config = Arc::new(config);
    let agent = Arc::new(AgentService::from_config(
        Arc::clone(&config),
        Arc::clone(&profile),
    ));
    Ok((config, profile, agent))
}

fn print_status(config: &Config) {
    println!("MCP Hub Agent Status");
    println!();
    println!("Version:      {}", config.app.version);
    println!(
        "Config:       {}",
        config
            .config_path
            .as_ref()
            .map_or_else(|| "(defaults + environment)".to_string(), |p| p.display().to_string())
    );
    println!("Environment:  {}", config.app.env);
    println!("Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!();

    match config.resolve() {
        Ok(profile) => {
            let model = profile.model();
            println!("Provider:     {} ({})", model.provider, model.api_url);
            println!("Model:        {}", model.model);
            println!("Credential:   set");
            println!("Web URL:      {}", profile.web_url().unwrap_or("(none)"));
            println!();
            println!("Tool servers:");
            if profile.tool_servers().is_empty() {
                println!("  (none configured)");
            }
            for server in profile.tool_servers() {
                println!(
                    "  {:<10} {} (timeout {}s)",
                    server.name,
                    server.url,
                    server.timeout.as_secs()
                );
            }
        }
        Err(e) => {
            println!("Model:        {}", config.model_name());
            println!("Credential:   missing ({e})");
        }
    }

    println!();
    println!(
        "Rate limit:   {}",
        if config.gateway.rate_limit_enabled {
            format!("{}/min per user", config.gateway.rate_limit_per_minute)
        } else {
            "off".to_string()
        }
    );
    println!("CORS origins: {}", config.gateway.cors_origins.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_parses_host_and_port() {
        let cli = Cli::try_parse_from(["mcp-hub-agent", "serve", "--host", "127.0.0.1", "-p", "9000"])
            .expect("serve invocation should parse");
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(9000));
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
            }
            other => panic!("expected serve command, got {other:?}"),
        }
    }

    #[test]
    fn ask_requires_message() {
        assert!(Cli::try_parse_from(["mcp-hub-agent", "ask"]).is_err());

        let cli = Cli::try_parse_from([
            "mcp-hub-agent",
            "--config",
            "agent.toml",
            "ask",
            "-m",
            "hello",
            "--stream",
        ])
        .expect("ask invocation should parse");
        assert_eq!(cli.config, Some(PathBuf::from("agent.toml")));
        match cli.command {
            Commands::Ask {
                message,
                user,
                stream,
            } => {
                assert_eq!(message, "hello");
                assert!(user.is_none());
                assert!(stream);
            }
            other => panic!("expected ask command, got {other:?}"),
        }
    }
}
