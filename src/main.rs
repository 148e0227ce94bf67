//! binance-mcp: MCP server and hosts for coin price lookups
//!
//! `serve` runs the WebSocket MCP server, `chat` runs the interactive
//! chatbot host against it and `probe` exercises every client operation once.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use binance_mcp::binance::BinanceClient;
use binance_mcp::config::{self, Config};
use binance_mcp::default_registry;
use binance_mcp::host::{self, ChatHost};
use binance_mcp::mcp::{McpClient, McpServer};

type BoxError = Box<dyn Error + Send + Sync>;

/// MCP client and server for coin price lookups.
///
/// The server exposes a Binance price tool, an analysis prompt and a
/// sampling handler over WebSocket; the hosts talk to it as MCP clients.
#[derive(Parser, Debug)]
#[command(name = "binance-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MCP server
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Chat about coin prices on the command line
    Chat {
        /// Server URL (overrides client.url)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Connect, call every operation once and print the results
    Probe {
        /// Server URL (overrides client.url)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(cfg: &Config, bind: Option<String>) -> Result<(), BoxError> {
    let prices = BinanceClient::from_config(&cfg.binance)?;
    let registry = default_registry(prices)?;
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());

    let server = McpServer::bind(&bind, Arc::new(registry)).await?;
    info!(addr = %server.local_addr()?, "MCP server ready, waiting for client connections...");

    server.run().await?;
    Ok(())
}

async fn chat(cfg: &Config, url: Option<String>) -> Result<(), BoxError> {
    let client = McpClient::new(
        url.unwrap_or_else(|| cfg.client.url.clone()),
        cfg.client.timeout_policy(),
    );
    client.connect().await?;

    let result = ChatHost::new(&client)
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    client.disconnect().await;
    result?;
    Ok(())
}

async fn probe(cfg: &Config, url: Option<String>) -> Result<(), BoxError> {
    let client = McpClient::new(
        url.unwrap_or_else(|| cfg.client.url.clone()),
        cfg.client.timeout_policy(),
    );
    client.connect().await?;

    let result = host::probe(&client, tokio::io::stdout()).await;

    client.disconnect().await;
    result?;
    Ok(())
}

/// Entry point for the binance-mcp binary.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig was read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), command = ?args.command, "Starting binance-mcp");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match args.command {
            Command::Serve { bind } => serve(&cfg, bind).await,
            Command::Chat { url } => chat(&cfg, url).await,
            Command::Probe { url } => probe(&cfg, url).await,
        }
    });

    match result {
        Ok(()) => {
            info!("Shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn verbosity_overrides_config_level() {
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(3, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "nonsense"), Level::WARN);
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::parse_from(["binance-mcp", "-vv", "serve", "--bind", "0.0.0.0:3000"]);
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::Serve { bind: Some(ref b) } if b == "0.0.0.0:3000"));

        let args = Args::parse_from(["binance-mcp", "chat", "--config", "/tmp/c.json"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(matches!(args.command, Command::Chat { url: None }));
    }
}
