use std::path::Path;

use anyhow::{Context, Result};
use care_api_client::config::loader::file_to_config;
use care_api_client::observability::metrics::get_metrics;
use care_api_client::utils::logging;
use care_api_client::utils::logging::LogLevel;
use care_api_client::{ApiClient, ApiResponse};
use clap::{Parser, Subcommand};
use http::Method;
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "care-api-client.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
    /// print the prometheus exposition after the command
    #[arg(long)]
    print_metrics: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the endpoint set and print the active base URL
    Resolve,
    /// Show the stored session and endpoint state
    Status,
    /// Send one request through the resilient dispatcher
    Request {
        method: String,
        path: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Authenticate and store the issued token
    Login {
        #[arg(long)]
        body: String,
    },
    /// Drop the stored session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config
    // -------------------------------

    let args = Args::parse();
    let client_config = file_to_config(Path::new(&args.config)).await?;
    logging::run(&client_config, args.log_level);

    // -------------------------------
    // 2. Build client
    // -------------------------------

    let client = ApiClient::from_config(client_config)?;
    client.on_deauthenticated(|event| {
        warn!(path = %event.path, status = %event.status, "session ended, sign in again");
    });

    // -------------------------------
    // 3. Run command
    // -------------------------------

    let output = match args.command {
        Command::Resolve => {
            let active = client.resolver().resolve().await;
            json!({
                "reachable": active.is_some(),
                "active": client.active_base_url(),
                "primary": client.resolver().primary(),
                "fallbacks": client.resolver().fallbacks(),
            })
        }
        Command::Status => {
            let credential = client.lifecycle().current();
            json!({
                "authenticated": client.is_authenticated(),
                "expiry": credential.map(|c| c.expiry),
                "active": client.active_base_url(),
            })
        }
        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("unsupported method '{}'", method))?;
            let body = parse_body(body.as_deref())?;
            envelope(client.dispatch(method, &path, body.as_ref()).await)?
        }
        Command::Login { body } => {
            let body = parse_body(Some(&body))?.unwrap_or(Value::Null);
            envelope(client.login(&body).await)?
        }
        Command::Logout => {
            client.logout();
            json!({"success": true})
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.print_metrics {
        print!("{}", get_metrics().await.render()?);
    }
    info!("done");
    Ok(())
}

fn parse_body(body: Option<&str>) -> Result<Option<Value>> {
    body.map(|raw| serde_json::from_str(raw).context("--body is not valid JSON"))
        .transpose()
}

fn envelope(result: Result<ApiResponse, care_api_client::ClientError>) -> Result<Value> {
    let response = result.unwrap_or_else(|e| ApiResponse::from_error(&e));
    Ok(serde_json::to_value(response)?)
}
