//! Tool gateway server - main entry point.
//!
//! Subcommands:
//! - `serve`: load the selected configuration and serve HTTP
//! - `mint-token`: sign an agent token (secret read from the environment)
//! - `check-config`: validate a configuration document file

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tool_gateway::auth::{mint, Claims};
use tool_gateway::http::HttpServer;
use tool_gateway::tools::ToolConfig;
use tool_gateway::{Config, Gateway, GatewayDeps, Result};

#[derive(Debug, Parser)]
#[command(name = "tool-gateway", version, about = "Configuration-driven tool gateway")]
struct Cli {
    /// Gateway configuration file (JSON).
    #[arg(long, short, env = "GATEWAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the gateway over HTTP.
    Serve {
        /// Bind address, overriding the configuration.
        #[arg(long)]
        listen: Option<String>,
        /// Configuration name to activate, overriding the configuration.
        #[arg(long)]
        selector: Option<String>,
    },
    /// Sign a token for an agent.
    MintToken {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        agent_name: String,
        /// Granted scope; repeat for several.
        #[arg(long = "scope")]
        scopes: Vec<String>,
        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
        /// Environment variable holding the agent's signing secret.
        #[arg(long, default_value = "GATEWAY_SIGNING_SECRET")]
        secret_env: String,
    },
    /// Validate a configuration document and print its prompt listing.
    CheckConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load gateway configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tool_gateway::observability::init_tracing(&config.observability);

    let result = match cli.command {
        Command::Serve { listen, selector } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            if let Some(selector) = selector {
                config.registry.selector = selector;
            }
            serve(config).await
        }
        Command::MintToken {
            api_key,
            agent_name,
            scopes,
            ttl,
            secret_env,
        } => mint_token(&api_key, agent_name, scopes, ttl, &secret_env),
        Command::CheckConfig { path } => check_config(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "tool-gateway exiting");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let deps = GatewayDeps::from_config(&config)?;
    let gateway = Arc::new(Gateway::start(&config, deps).await?);

    let shutdown = CancellationToken::new();
    let server = HttpServer::bind(
        &config.server.listen_addr,
        gateway,
        config.server.max_body_bytes,
        shutdown.clone(),
    )
    .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
        shutdown.cancel();
    });

    server.serve().await
}

fn mint_token(
    api_key: &str,
    agent_name: String,
    scope: Vec<String>,
    ttl: i64,
    secret_env: &str,
) -> Result<()> {
    let secret = std::env::var(secret_env).map_err(|_| {
        tool_gateway::Error::bad_request(format!("{} is not set", secret_env))
    })?;
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        agent_name,
        scope,
        iat: Some(now),
        exp: now + ttl,
    };
    println!("{}", mint(api_key, &claims, secret.as_bytes())?);
    Ok(())
}

fn check_config(path: &std::path::Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let document = serde_json::from_str(&raw)?;
    let config = ToolConfig::from_document(document)?;
    println!(
        "{}: {} operation(s), active={}",
        config.name,
        config.tools.len(),
        config.active
    );
    println!("{}", config.generate_prompt());
    Ok(())
}
