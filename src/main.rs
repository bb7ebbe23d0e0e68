#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{error, info};

mod bridge;
mod cli;
mod config;
mod db;
mod instagram;
mod matrix;
mod media;
mod utils;
mod web;

use bridge::{BridgeCore, BridgeStores};
use cli::Cli;
use config::Config;
use matrix::{ChatTransport, MatrixAppservice, MatrixEventProcessor};
use web::{WebServer, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    utils::logging::init_tracing(&config.logging);

    let appservice = Arc::new(MatrixAppservice::new(config.clone())?);
    if let Some(path) = cli.generate_registration.as_deref() {
        let registration = serde_yaml::to_string(&appservice.registration_preview())?;
        std::fs::write(path, registration)?;
        info!("wrote appservice registration to {}", path.display());
        return Ok(());
    }

    info!("matrix-instagram bridge starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;
    let stores = BridgeStores::from(db_manager.as_ref());

    let (content_tx, content_rx) = mpsc::channel(config.relay.event_queue_size);
    let content = Arc::new(instagram::InstagramClient::new(
        &config.instagram,
        stores.accounts.clone(),
        content_tx.clone(),
    )?);

    let transport: Arc<dyn ChatTransport> = appservice;
    let bridge = Arc::new(BridgeCore::new(
        config.clone(),
        transport.clone(),
        content,
        stores.clone(),
    ));
    let router = bridge.router();

    let web_server = WebServer::new(
        config.clone(),
        WebState {
            processor: Arc::new(MatrixEventProcessor::new(router.clone())),
            router,
            transport,
            links: stores.links.clone(),
            accounts: stores.accounts.clone(),
            media: stores.media.clone(),
            content_tx,
            hs_token: SecretString::from(config.registration.homeserver_token.clone()),
            started_at: Instant::now(),
        },
    );

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = bridge.start(content_rx).await {
            error!("bridge error: {}", e);
        }
    });

    tokio::select! {
        _ = web_handle => {},
        _ = bridge_handle => {},
    }

    info!("matrix-instagram bridge shutting down");
    Ok(())
}
