use anyhow::Result;
use async_trait::async_trait;
use matrix_bot_sdk::client::MatrixClient;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::debug;

use super::Intent;
use super::client_api::{ClientApi, urlencoding};
use crate::media::MediaHandler;

/// A [`MatrixClient`] pinned to one user through appservice impersonation.
pub struct MatrixIntent {
    user_id: String,
    client: MatrixClient,
    api: ClientApi,
    media: MediaHandler,
}

impl MatrixIntent {
    pub fn new(user_id: String, client: MatrixClient, api: ClientApi, media: MediaHandler) -> Self {
        Self {
            user_id,
            client,
            api,
            media,
        }
    }
}

#[async_trait]
impl Intent for MatrixIntent {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send_message(&self, room_id: &str, content: &Value) -> Result<String> {
        let event_id = self
            .client
            .send_event(room_id, "m.room.message", content)
            .await?;
        debug!(
            "sent message room_id={} sender={} event_id={}",
            room_id, self.user_id, event_id
        );
        Ok(event_id)
    }

    async fn set_display_name(&self, display_name: &str) -> Result<()> {
        self.client.set_display_name(display_name).await?;
        Ok(())
    }

    async fn set_avatar_url(&self, content_ref: &str) -> Result<()> {
        let path = format!(
            "/_matrix/client/v3/profile/{}/avatar_url",
            urlencoding::encode(&self.user_id)
        );
        self.api
            .call(
                Method::PUT,
                &path,
                Some(&self.user_id),
                Some(&json!({ "avatar_url": content_ref })),
            )
            .await?;
        Ok(())
    }

    async fn join(&self, room_id: &str) -> Result<()> {
        let joined = self.client.join_room(room_id).await?;
        debug!("{} joined room {}", self.user_id, joined);
        Ok(())
    }

    async fn upload_media(&self, source_url: &str) -> Result<String> {
        self.media.copy_to_matrix(source_url, &self.user_id).await
    }

    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()> {
        self.client
            .send_state_event(room_id, "m.room.name", "", &json!({ "name": name }))
            .await?;
        Ok(())
    }

    async fn set_room_avatar(&self, room_id: &str, content_ref: &str) -> Result<()> {
        self.client
            .send_state_event(room_id, "m.room.avatar", "", &json!({ "url": content_ref }))
            .await?;
        Ok(())
    }
}
