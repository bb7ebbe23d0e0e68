use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use matrix_bot_sdk::client::{MatrixAuth, MatrixClient};
use parking_lot::Mutex;
use reqwest::Method;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use crate::bridge::provisioning::RoomCreationParameters;
use crate::config::Config;
use crate::media::MediaHandler;

pub mod client_api;
pub mod event_handler;
pub mod intent;

use self::client_api::{ClientApi, urlencoding};
pub use self::event_handler::{MatrixEvent, MatrixEventHandler, MatrixEventProcessor};
pub use self::intent::MatrixIntent;

/// Outbound actions available to one bridge-owned identity.
#[async_trait]
pub trait Intent: Send + Sync {
    fn user_id(&self) -> &str;
    /// Sends an `m.room.message` and returns its event ID.
    async fn send_message(&self, room_id: &str, content: &Value) -> Result<String>;
    async fn set_display_name(&self, display_name: &str) -> Result<()>;
    async fn set_avatar_url(&self, content_ref: &str) -> Result<()>;
    async fn join(&self, room_id: &str) -> Result<()>;
    /// Copies `source_url` into the content repository as this identity.
    async fn upload_media(&self, source_url: &str) -> Result<String>;
    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()>;
    async fn set_room_avatar(&self, room_id: &str, content_ref: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JoinedMember {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn bot_user_id(&self) -> String;
    async fn intent(&self, user_id: &str) -> Arc<dyn Intent>;
    /// Registers a namespaced user with the homeserver if it does not exist yet.
    async fn ensure_registered(&self, user_id: &str) -> Result<()>;
    async fn list_joined_rooms(&self, user_id: &str) -> Result<Vec<String>>;
    async fn joined_members(&self, room_id: &str) -> Result<BTreeMap<String, JoinedMember>>;
    /// Creates a room as the bot and returns its ID.
    async fn create_room(&self, params: &RoomCreationParameters) -> Result<String>;
}

pub struct MatrixAppservice {
    config: Arc<Config>,
    api: ClientApi,
    media: MediaHandler,
    homeserver_url: Url,
    intents: Mutex<HashMap<String, Arc<dyn Intent>>>,
}

impl MatrixAppservice {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        info!(
            "initializing matrix appservice for {}",
            config.bridge.domain
        );

        let homeserver_url = Url::parse(&config.bridge.homeserver_url)?;
        let api = ClientApi::new(
            reqwest::Client::new(),
            &config.bridge.homeserver_url,
            SecretString::from(config.registration.appservice_token.clone()),
        );

        Ok(Self {
            media: MediaHandler::new(api.clone()),
            api,
            homeserver_url,
            intents: Mutex::new(HashMap::new()),
            config,
        })
    }

    fn localpart(user_id: &str) -> &str {
        user_id
            .trim_start_matches('@')
            .split(':')
            .next()
            .unwrap_or_default()
    }

    async fn build_intent(&self, user_id: &str) -> Arc<dyn Intent> {
        let auth = MatrixAuth::new(&self.config.registration.appservice_token);
        let client = MatrixClient::new(self.homeserver_url.clone(), auth);
        client
            .impersonate_user_id(Some(user_id), None::<&str>)
            .await;

        Arc::new(MatrixIntent::new(
            user_id.to_string(),
            client,
            self.api.clone(),
            self.media.clone(),
        ))
    }

    pub fn registration_preview(&self) -> Value {
        let prefix = regex::escape(&self.config.bridge.user_prefix);
        let domain = regex::escape(&self.config.bridge.domain);
        json!({
            "id": self.config.registration.bridge_id,
            "url": format!("http://{}:{}", self.config.bridge.bind_address, self.config.bridge.port),
            "as_token": self.config.registration.appservice_token,
            "hs_token": self.config.registration.homeserver_token,
            "sender_localpart": self.config.bridge.bot_localpart,
            "rate_limited": false,
            "namespaces": {
                "users": [{
                    "exclusive": true,
                    "regex": format!("@{}.*:{}", prefix, domain)
                }],
                "aliases": [{
                    "exclusive": true,
                    "regex": format!("#{}.*:{}", prefix, domain)
                }],
                "rooms": []
            }
        })
    }
}

#[async_trait]
impl ChatTransport for MatrixAppservice {
    fn bot_user_id(&self) -> String {
        self.config.bot_user_id()
    }

    async fn intent(&self, user_id: &str) -> Arc<dyn Intent> {
        let cached = self.intents.lock().get(user_id).cloned();
        if let Some(intent) = cached {
            return intent;
        }

        let intent = self.build_intent(user_id).await;
        self.intents
            .lock()
            .entry(user_id.to_string())
            .or_insert(intent)
            .clone()
    }

    async fn ensure_registered(&self, user_id: &str) -> Result<()> {
        let body = json!({
            "type": "m.login.application_service",
            "username": Self::localpart(user_id),
        });
        match self
            .api
            .call(Method::POST, "/_matrix/client/v3/register", None, Some(&body))
            .await
        {
            Ok(_) => {
                info!("registered virtual user {}", user_id);
                Ok(())
            }
            Err(err) if err.to_string().contains("M_USER_IN_USE") => {
                debug!("virtual user {} already registered", user_id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list_joined_rooms(&self, user_id: &str) -> Result<Vec<String>> {
        let response = self
            .api
            .call(Method::GET, "/_matrix/client/v3/joined_rooms", Some(user_id), None)
            .await?;
        Ok(response
            .get("joined_rooms")
            .and_then(Value::as_array)
            .map(|rooms| {
                rooms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn joined_members(&self, room_id: &str) -> Result<BTreeMap<String, JoinedMember>> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/joined_members",
            urlencoding::encode(room_id)
        );
        let bot = self.bot_user_id();
        let response = self
            .api
            .call(Method::GET, &path, Some(&bot), None)
            .await?;
        let joined = response.get("joined").cloned().unwrap_or(Value::Null);
        if joined.is_null() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_value(joined)?)
    }

    async fn create_room(&self, params: &RoomCreationParameters) -> Result<String> {
        let body = serde_json::to_value(params)?;
        let bot = self.bot_user_id();
        let response = self
            .api
            .call(Method::POST, "/_matrix/client/v3/createRoom", Some(&bot), Some(&body))
            .await?;
        response
            .get("room_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| anyhow::anyhow!("createRoom response has no room_id"))
    }
}
