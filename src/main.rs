mod common;
mod config;
mod error;
mod network;
mod render;
mod session;
mod ui;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use network::{HttpStore, WsConnector};
use session::{Backends, ChatClient};
use tokio::sync::mpsc;
use ui::ChatApp;

#[derive(Parser)]
#[command(
    name = "rust_dm_chat",
    version,
    about = "Direct-message chat client with live push and history polling"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Chat server base URL, e.g. http://127.0.0.1:8000
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,
    /// Id of the signed-in user
    #[arg(long, value_name = "ID")]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    // Logger; filter with RUST_LOG
    env_logger::init();

    // 1. Config: file, then CHAT_* env, then CLI flags
    let cli = Cli::parse();
    let mut client_config = config::load_config(&cli.config);
    client_config.apply_env(|key| std::env::var(key).ok());
    if let Some(server_url) = cli.server_url {
        client_config.server_url = server_url;
    }
    if let Some(user_id) = cli.user_id {
        client_config.user_id = user_id;
    }
    let server_url = client_config.validate()?;

    // 2. Server backends (HTTP store doubles as the auth service)
    let store = Arc::new(HttpStore::new(
        server_url.clone(),
        client_config.access_token.as_deref(),
        client_config.request_timeout(),
    )?);
    let connector = Arc::new(WsConnector::new(
        &server_url,
        client_config.access_token.clone(),
    )?);
    let backends = Backends {
        store: store.clone(),
        auth: store,
        connector,
    };

    // 3. Channels
    // UI -> client loop
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // client loop -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    // 4. Client loop in the background
    let client = ChatClient::new(
        &client_config.user_id,
        client_config.session_settings(),
        backends,
        event_tx,
        cmd_rx,
    );
    tokio::spawn(client.run());

    log::info!(
        "Client for user {} started against {server_url}",
        client_config.user_id
    );

    // 5. UI on the main thread
    let options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);
    eframe::run_native(
        "Rust DM Chat",
        options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .ok_or("ChatApp initialized twice")?;
            Ok(Box::new(ChatApp::new(cc, cmd_tx.clone(), event_receiver)))
        }),
    )?;
    Ok(())
}
