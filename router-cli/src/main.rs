//! gwrs: operator CLI for a running gateway's admin surface (§10.5).
//!
//! Replaces the teacher's config-upload tool (which authenticated against
//! the old JWT/SQLite API and pushed a YAML config blob) with a client for
//! this gateway's `/v1/router/*` endpoints: inspecting routes, services
//! and stats, triggering a refresh, and sending a directed message.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gwrs")]
#[command(about = "Operator CLI for the gateway's admin surface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway base URL.
    #[arg(long, global = true, default_value = "http://127.0.0.1:24042")]
    api_url: String,

    /// Admin token, sent as `?token=` on non-localhost calls (§4.8).
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List currently registered routes.
    Routes,
    /// List known service names.
    Services,
    /// List live registry nodes.
    Nodes,
    /// List the replicated websocket client directory.
    Wsdir,
    /// Fetch the registry's health snapshot.
    Health,
    /// Fetch per-service http/ws/error rolling stats.
    Stats,
    /// Fetch recent issue log entries.
    Log,
    /// Re-fetch routes from the registry, optionally for one service.
    Refresh {
        #[arg(long)]
        service: Option<String>,
    },
    /// Fire a directed framed message at a service or client instance.
    Send {
        /// Destination address, e.g. `orders` or `inst1@orders:/`.
        #[arg(long)]
        to: String,
        /// JSON body to attach to the message.
        #[arg(long, default_value = "{}")]
        body: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();
    let client = Client::new();

    let result = match &cli.command {
        Commands::Routes => get(&client, &cli, "/v1/router/list/routes"),
        Commands::Services => get(&client, &cli, "/v1/router/list/services"),
        Commands::Nodes => get(&client, &cli, "/v1/router/list/nodes"),
        Commands::Wsdir => get(&client, &cli, "/v1/router/list/wsdir"),
        Commands::Health => get(&client, &cli, "/v1/router/health"),
        Commands::Stats => get(&client, &cli, "/v1/router/stats"),
        Commands::Log => get(&client, &cli, "/v1/router/log"),
        Commands::Refresh { service } => match service {
            Some(s) => get(&client, &cli, &format!("/v1/router/refresh/{s}")),
            None => get(&client, &cli, "/v1/router/refresh"),
        },
        Commands::Send { to, body } => {
            let body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
            let envelope = json!({
                "mid": format!("cli-{}", std::process::id()),
                "to": to,
                "from": "gwrs@cli:/",
                "body": body,
            });
            post(&client, &cli, "/v1/router/send", &envelope)
        }
    }?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn with_token(cli: &Cli, path: &str) -> String {
    match &cli.token {
        Some(token) => format!("{}{}?token={}", cli.api_url, path, token),
        None => format!("{}{}", cli.api_url, path),
    }
}

fn get(client: &Client, cli: &Cli, path: &str) -> Result<Value> {
    let url = with_token(cli, path);
    let resp = client.get(&url).send().context("request failed")?;
    let status = resp.status();
    let value: Value = resp.json().context("response was not valid JSON")?;
    if !status.is_success() {
        bail!("gateway returned {status}: {value}");
    }
    Ok(value)
}

fn post(client: &Client, cli: &Cli, path: &str, body: &Value) -> Result<Value> {
    let url = with_token(cli, path);
    let resp = client.post(&url).json(body).send().context("request failed")?;
    let status = resp.status();
    let value: Value = resp.json().context("response was not valid JSON")?;
    if !status.is_success() {
        bail!("gateway returned {status}: {value}");
    }
    Ok(value)
}
