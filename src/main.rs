//! Nutrition Gateway - SMS food logging service
//!
//! CLI and server for the SMS nutrition logging gateway.

use clap::{Parser, Subcommand};
use nutrition_gateway::chat::HttpChatBackend;
use nutrition_gateway::config::Config;
use nutrition_gateway::extractor::{parse_reply, ParseOutcome};
use nutrition_gateway::foodlog::RestFoodLog;
use nutrition_gateway::gateway::Gateway;
use nutrition_gateway::server::{run_server, AppState};
use nutrition_gateway::store::RestKvStore;
use nutrition_gateway::transport::{HttpSmsSender, SmsSender};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Nutrition Gateway - SMS food logging
#[derive(Parser)]
#[command(name = "nutrition-gateway")]
#[command(about = "Run the SMS nutrition logging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve,

    /// Parse an AI reply and print the extracted entry (debugging aid)
    Parse {
        /// The reply text to parse
        reply: String,
    },

    /// Send a one-off SMS through the configured transport
    Send {
        /// Destination phone number (E.164)
        to: String,

        /// Message body
        body: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve => cmd_serve().await,
        Commands::Parse { reply } => cmd_parse(&reply),
        Commands::Send { to, body } => cmd_send(&to, &body).await,
    }
}

async fn cmd_serve() -> anyhow::Result<()> {
    // Missing credentials abort here, before the server binds
    let config = Config::from_env()?;
    let timeout = Duration::from_secs(config.request_timeout_secs);

    info!("Nutrition gateway starting");

    let store = Arc::new(RestKvStore::new(&config.kv_url, &config.kv_token, timeout)?);
    let chat = Arc::new(HttpChatBackend::new(&config.ai_backend_url, timeout)?);
    let food_log = Arc::new(RestFoodLog::new(
        &config.storage_url,
        &config.storage_api_key,
        timeout,
    )?);
    let sender = Arc::new(HttpSmsSender::new(
        &config.sms_api_url,
        &config.sms_account_sid,
        &config.sms_auth_token,
        &config.service_phone,
        timeout,
    )?);

    let gateway = Arc::new(Gateway::new(
        store,
        chat,
        food_log,
        &config.service_phone,
        config.conversation_ttl_secs,
    ));

    let state = AppState {
        gateway,
        sender,
        echo_mode: config.echo_mode,
    };

    if config.echo_mode {
        info!("Echo mode on: webhook returns JSON instead of sending SMS");
    }

    run_server(config.bind_addr, state).await?;
    Ok(())
}

fn cmd_parse(reply: &str) -> anyhow::Result<()> {
    match parse_reply(reply, "(user message)") {
        ParseOutcome::Parsed(draft) => {
            println!("Parsed entry:");
            println!("  food_name:  {}", draft.food_name);
            println!("  calories:   {}", draft.calories);
            println!("  confidence: {}", draft.confidence);
        }
        ParseOutcome::Unparsed => {
            println!("No calorie entry found in reply");
        }
    }
    Ok(())
}

async fn cmd_send(to: &str, body: &str) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let sender = HttpSmsSender::new(
        &config.sms_api_url,
        &config.sms_account_sid,
        &config.sms_auth_token,
        &config.service_phone,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    sender.send(to, body).await?;
    println!("Sent {} chars to {}", body.chars().count(), to);
    Ok(())
}
