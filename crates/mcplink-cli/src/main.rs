//! # mcplink-cli
//!
//! Command-line client that lets Gemini call the tools of MCP servers.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcplink_agent::{AgentBuilder, AgentConfig};
use mcplink_core::Config;
use mcplink_mcp::McpServerManager;
use mcplink_providers::GeminiProvider;

mod commands;
mod output;

/// mcplink - connect Gemini to Model Context Protocol servers
#[derive(Parser, Debug)]
#[command(name = "mcplink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Answer a single query and exit instead of starting the chat loop
    #[arg(short, long, global = true, value_name = "PROMPT")]
    query: Option<String>,

    /// Print each answer as a JSON transcript
    #[arg(long, global = true)]
    json: bool,

    /// Model to use (e.g., gemini-2.0-flash-001)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Rounds of tool calls allowed per query
    #[arg(long, global = true, value_name = "N")]
    max_tool_rounds: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch an MCP server over stdio
    Stdio {
        /// Server script (.py, .js) or executable
        #[arg(value_name = "SERVER")]
        server: String,
        /// Arguments passed to the server
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Connect to an MCP server over HTTP + SSE
    Sse {
        /// URL of the server's SSE endpoint
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Connect to every server in an `mcpServers` JSON file
    Multi {
        /// Server file (default: $MCP_SERVERS_CONFIG, $THEAILANGUAGE_CONFIG or ./mcp_servers.json)
        #[arg(value_name = "CONFIG")]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for answers
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", output::describe_error(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    let provider = Arc::new(GeminiProvider::from_config(&config)?);

    let servers = commands::connect::server_configs(&cli.command, &config)?;
    let manager = commands::connect::start(servers).await?;

    let result = session(&cli, &config, provider, &manager).await;

    manager.stop_all().await;
    result
}

/// Layered configuration with the command-line overrides applied, validated
/// as a whole.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(|e| mcplink_core::Error::Config(e.to_string()))?;
    apply_overrides(cli, &mut config);
    config.ensure_valid()?;
    Ok(config)
}

fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(ref model) = cli.model {
        config.general.model = model.clone();
    }
    if let Some(rounds) = cli.max_tool_rounds {
        config.limits.max_tool_rounds = rounds;
    }
}

/// Everything that happens while the servers are up.
async fn session(
    cli: &Cli,
    config: &Config,
    provider: Arc<GeminiProvider>,
    manager: &McpServerManager,
) -> anyhow::Result<()> {
    let router = manager.router().await;
    output::print_status(cli.json, &format!("Connected to server with tools: {:?}", router.tool_names()));

    let agent = AgentBuilder::new()
        .provider(provider)
        .tools(Arc::new(router))
        .config(AgentConfig::from_config(config))
        .event_handler(Arc::new(output::CliEventHandler::new(cli.json)))
        .build()?;

    match cli.query {
        Some(ref query) => commands::chat::answer(&agent, query, cli.json).await,
        None => commands::chat::run(&agent, cli.json).await,
    }
}
