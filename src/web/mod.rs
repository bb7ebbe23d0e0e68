use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::bridge::router::EventRouter;
use crate::config::Config;
use crate::db::{AccountStore, MediaStore, RoomLinkStore};
use crate::instagram::ContentEvent;
use crate::matrix::{ChatTransport, MatrixEventProcessor};

pub mod handlers;
pub mod metrics;
pub mod middleware;

use self::middleware::auth::create_router;

#[derive(Clone)]
pub struct WebState {
    pub router: Arc<EventRouter>,
    pub processor: Arc<MatrixEventProcessor>,
    pub transport: Arc<dyn ChatTransport>,
    pub links: Arc<dyn RoomLinkStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub media: Arc<dyn MediaStore>,
    pub content_tx: mpsc::Sender<ContentEvent>,
    pub hs_token: SecretString,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

pub(crate) fn render_error(res: &mut Response, status: StatusCode, errcode: &str, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "errcode": errcode, "error": message })));
}

/// Fetches the shared state, answering 503 while it is not installed yet.
pub(crate) fn state_or_unavailable(res: &mut Response) -> Option<&'static WebState> {
    let state = web_state();
    if state.is_none() {
        render_error(
            res,
            StatusCode::SERVICE_UNAVAILABLE,
            "M_UNKNOWN",
            "bridge is still starting",
        );
    }
    state
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub fn new(config: Arc<Config>, state: WebState) -> Self {
        let _ = WEB_STATE.set(state);
        Self { config }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.bridge.bind_address, self.config.bridge.port
        );
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor)
            .serve(create_router(self.config.metrics.enabled))
            .await;

        Ok(())
    }
}
