//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use figma_bridge::config::BridgeConfig;
use figma_bridge::{CancellationToken, FigmaBridge, Follower, NodeConfig, Params};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::info;

fn node_config(addr: SocketAddr) -> Result<NodeConfig> {
    Ok(NodeConfig::builder().addr(addr).build()?)
}

/// Run a node until Ctrl-C.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    info!("Starting Figma bridge on {}", addr);

    let mut bridge = FigmaBridge::start(node_config(addr)?).await?;
    info!("Running as {}", bridge.role().await);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");

    bridge.stop().await;
    Ok(())
}

/// Print `{"alive": bool}` for the shared address.
pub async fn status(addr: SocketAddr) -> Result<()> {
    let config = node_config(addr)?;
    let follower = Follower::new(&config)?;

    let cancel = CancellationToken::new().with_timeout(config.probe_timeout);
    let alive = follower.probe(&cancel).await;

    // Intentional stdout: this is the command's output.
    println!("{}", json!({ "alive": alive }));
    Ok(())
}

/// Forward one tool call and print its result.
pub async fn call(
    addr: SocketAddr,
    tool: &str,
    node_ids: Vec<String>,
    params: Option<&str>,
) -> Result<()> {
    let params = params.map(parse_params).transpose()?;
    let follower = Follower::new(&node_config(addr)?)?;

    let cancel = CancellationToken::new().with_timeout(BridgeConfig::CALLER_TIMEOUT);
    let data = follower
        .send_with_params(tool, Some(node_ids), params, &cancel)
        .await
        .with_context(|| format!("{} failed", tool))?;

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn parse_params(raw: &str) -> Result<Params> {
    let value: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("--params must be a JSON object, got {}", other),
    }
}
