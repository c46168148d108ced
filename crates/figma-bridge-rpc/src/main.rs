//! Figma Bridge - process wiring and operator CLI for the plugin bridge.
//!
//! `serve` runs a node that competes for the shared address and either owns
//! the plugin connection or forwards to the process that does. `status` and
//! `call` talk to whichever process currently owns it.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use figma_bridge::config::NetworkConfig;
use std::net::SocketAddr;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "figma-bridge")]
#[command(about = "Shared Figma plugin bridge with local leader election")]
struct Args {
    /// Host of the shared address
    #[arg(long, default_value = NetworkConfig::DEFAULT_HOST, global = true)]
    host: String,

    /// Port of the shared address
    #[arg(short, long, default_value_t = NetworkConfig::DEFAULT_PORT, global = true)]
    port: u16,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run a bridge node until Ctrl-C (default)
    Serve,

    /// Report whether a process currently owns the shared address
    Status,

    /// Forward one tool call to the owning process and print the result
    Call {
        /// Tool name, e.g. get_node
        tool: String,

        /// Target node id; repeat for several
        #[arg(long = "node-id")]
        node_ids: Vec<String>,

        /// Tool parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
}

impl Args {
    fn addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid address {}:{}: {}", self.host, self.port, e))?;
        Ok(addr)
    }
}

fn init_logging(debug: bool, json: bool) {
    // Logs go to stderr; stdout carries command output.
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::new(Level::INFO.as_str())
    };

    if json {
        builder.with_env_filter(filter).json().init();
    } else {
        builder.with_env_filter(filter).compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let addr = args.addr()?;
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => commands::serve(addr).await,
        Command::Status => commands::status(addr).await,
        Command::Call {
            tool,
            node_ids,
            params,
        } => commands::call(addr, &tool, node_ids, params.as_deref()).await,
    }
}
