//! Command execution

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use schemalink_client::{ClientConfig, ConfigLoader, SchemaLinkClient, ToolCall};

use crate::cli::{Cli, Commands};

/// Load the layered configuration and apply command-line overrides.
pub fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("Failed to load configuration")?;

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
        config.validate().context("Invalid configuration")?;
    }
    Ok(config)
}

/// Run the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let client = SchemaLinkClient::new(config).context("Failed to create client")?;

    let outcome = match cli.command {
        Commands::Call {
            method,
            params,
            timeout_ms,
        } => call(&client, method, &params, timeout_ms).await,
        Commands::Health => health(&client).await,
        Commands::Watch => watch(&client).await,
    };

    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    outcome
}

/// Parse `--params`; an empty string means no params.
pub fn parse_params(params: &str) -> Result<Value> {
    if params.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(params).context("--params is not valid JSON")
}

async fn call(
    client: &SchemaLinkClient,
    method: String,
    params: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let params = parse_params(params)?;
    let mut call = ToolCall::new(method, params);
    if let Some(ms) = timeout_ms {
        call = call.with_timeout(Duration::from_millis(ms));
    }

    client.connect().await?;
    let method = call.method.clone();
    let value = client
        .call_with(call)
        .await
        .with_context(|| format!("Tool call '{method}' failed"))?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn health(client: &SchemaLinkClient) -> Result<()> {
    client.connect().await?;
    let health = client.health().await;

    let report = json!({
        "primary": health.primary,
        "fallback": health.fallback,
        "active": health.active,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !health.is_serviceable() {
        bail!("no transport is healthy");
    }
    Ok(())
}

async fn watch(client: &SchemaLinkClient) -> Result<()> {
    let mut server_events = client.subscribe_server_events();
    let mut connection_events = client.subscribe_connection_events();
    client.connect().await?;
    if client.primary().is_none() {
        bail!("watching events needs the persistent socket; the fallback cannot push events");
    }
    info!("Watching server events; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = server_events.recv() => match event {
                Ok(event) => {
                    let line = json!({ "event": event.kind.name(), "payload": event.payload });
                    println!("{line}");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped server events"),
                Err(RecvError::Closed) => return Ok(()),
            },
            event = connection_events.recv() => match event {
                Ok(event) => info!(?event, "Connection event"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
