//! MCP relay - command line entry point
//!
//! Serves the built-in demo capabilities over stdio, or drives an external
//! tool provider as a client.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use mcp_relay::config::Config;
use mcp_relay::mcp::client::{McpClient, ServerCommand};
use mcp_relay::mcp::server::McpServer;
use mcp_relay::mcp::tools::builtin_registry;
use mcp_relay::mcp::transport::StdioTransport;
use mcp_relay::mcp::types::InitializeResult;

/// MCP relay
#[derive(Parser)]
#[command(name = "mcp-relay")]
#[command(author, version, about = "MCP relay - serve or drive Model Context Protocol tool providers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the built-in capabilities over stdin/stdout (default)
    Serve,

    /// Spawn a provider and print its server info and catalog
    Inspect {
        /// Provider program and its arguments, after `--`
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Spawn a provider, issue one call and print the result
    Call {
        /// Method to call, e.g. `tools/list`
        #[arg(long)]
        method: String,

        /// Params as a JSON value
        #[arg(long)]
        params: Option<String>,

        /// Per-call timeout, overriding MCP_RELAY_CALL_TIMEOUT_SECS
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Provider program and its arguments, after `--`
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries protocol traffic
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid MCP_RELAY_* environment")?;

    match cli.command {
        None | Some(Commands::Serve) => Ok(run_server(config).await?),
        Some(Commands::Inspect { command }) => run_inspect(config, command).await,
        Some(Commands::Call {
            method,
            params,
            timeout_secs,
            command,
        }) => run_call(config, method, params, timeout_secs, command).await,
    }
}

async fn run_server(config: Config) -> mcp_relay::Result<()> {
    let registry = builtin_registry()?;
    let server = McpServer::with_info(registry, config.server_info);

    server.start(Arc::new(StdioTransport::stdio())).await?;

    tokio::select! {
        _ = server.closed() => {
            server.stop().await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            server.stop().await;
            // A pending stdin read cannot be cancelled, so don't wait for it.
            std::process::exit(0);
        }
    }

    Ok(())
}

async fn run_inspect(config: Config, command: Vec<String>) -> anyhow::Result<()> {
    let command = server_command(command)?;
    let client = McpClient::new(config);

    let info = client
        .start(&command)
        .await
        .with_context(|| format!("failed to start '{command}'"))?;

    let report = catalog(&client, &info).await;
    client.stop().await;

    print_json(&report.context("failed to list the provider's catalog")?)?;
    Ok(())
}

async fn catalog(client: &McpClient, info: &InitializeResult) -> mcp_relay::Result<Value> {
    let tools = match info.capabilities.tools {
        Some(_) => client.list_tools().await?,
        None => Vec::new(),
    };
    let resources = match info.capabilities.resources {
        Some(_) => client.list_resources().await?,
        None => Vec::new(),
    };
    let prompts = match info.capabilities.prompts {
        Some(_) => client.list_prompts().await?,
        None => Vec::new(),
    };

    Ok(json!({
        "protocolVersion": info.protocol_version,
        "serverInfo": info.server_info,
        "capabilities": info.capabilities,
        "tools": tools,
        "resources": resources,
        "prompts": prompts,
    }))
}

async fn run_call(
    config: Config,
    method: String,
    params: Option<String>,
    timeout_secs: Option<u64>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let params: Option<Value> = params
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .context("--params is not valid JSON")?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(config.call_timeout);

    let command = server_command(command)?;
    let client = McpClient::new(config);
    client
        .start(&command)
        .await
        .with_context(|| format!("failed to start '{command}'"))?;

    let result = client.call(&method, params, timeout).await;
    client.stop().await;

    let result = result.with_context(|| format!("{method} failed"))?;
    print_json(&result)?;
    Ok(())
}

fn print_json(value: &Value) -> mcp_relay::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}

fn server_command(mut command: Vec<String>) -> anyhow::Result<ServerCommand> {
    if command.is_empty() {
        bail!("no provider command given");
    }
    let program = command.remove(0);
    Ok(ServerCommand::new(program).args(command))
}
