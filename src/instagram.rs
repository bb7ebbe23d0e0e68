use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::InstagramConfig;
use crate::db::AccountStore;

pub mod events;

pub use self::events::{
    ChangedField, ContentEvent, ContentProfile, MediaContent, MediaItem, MediaType,
    NewMediaEvent, ProfileUpdatedEvent,
};

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn get_profile(&self, handle: &str) -> Result<ContentProfile>;
    /// Hint that the profile for `handle` may be stale. Never fails; any
    /// resulting change arrives later as a `ProfileUpdated` event.
    async fn request_profile_refresh(&self, handle: &str);
    /// Records a profile that reached the bridge from elsewhere as the latest
    /// known state for `handle`.
    fn observe_profile(&self, _handle: &str, _profile: &ContentProfile) {}
}

#[derive(Debug, Deserialize)]
struct GraphProfile {
    username: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    profile_picture_url: Option<String>,
}

impl From<GraphProfile> for ContentProfile {
    fn from(value: GraphProfile) -> Self {
        let display_name = value
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| value.username.clone());
        Self {
            display_name,
            avatar_url: value.profile_picture_url,
            username: value.username,
        }
    }
}

/// Instagram Graph API client authenticated with the per-account tokens
/// stored by the OAuth callback.
pub struct InstagramClient {
    http: reqwest::Client,
    api_base_url: String,
    accounts: Arc<dyn AccountStore>,
    events: mpsc::Sender<ContentEvent>,
    last_seen: Mutex<HashMap<String, ContentProfile>>,
}

impl InstagramClient {
    pub fn new(
        config: &InstagramConfig,
        accounts: Arc<dyn AccountStore>,
        events: mpsc::Sender<ContentEvent>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            accounts,
            events,
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    /// Compares `current` against the last profile seen for `handle` and
    /// returns one event per changed field. The first sighting only records
    /// a baseline.
    fn diff_profile(&self, handle: &str, current: &ContentProfile) -> Vec<ProfileUpdatedEvent> {
        let previous = self
            .last_seen
            .lock()
            .insert(handle.to_string(), current.clone());
        let Some(previous) = previous else {
            return Vec::new();
        };

        let mut changes = Vec::new();
        if previous.display_name != current.display_name {
            changes.push(ChangedField::DisplayName);
        }
        if previous.avatar_url != current.avatar_url && current.avatar_url.is_some() {
            changes.push(ChangedField::Avatar);
        }

        changes
            .into_iter()
            .map(|changed_field| ProfileUpdatedEvent {
                account_handle: handle.to_string(),
                profile: current.clone(),
                changed_field,
            })
            .collect()
    }
}

#[async_trait]
impl ContentSource for InstagramClient {
    async fn get_profile(&self, handle: &str) -> Result<ContentProfile> {
        let auth = self
            .accounts
            .get_authorization(handle)
            .await?
            .ok_or_else(|| anyhow!("no authorization stored for {}", handle))?;

        let url = Url::parse_with_params(
            &format!("{}/me", self.api_base_url),
            &[
                ("fields", "user_id,username,name,profile_picture_url"),
                ("access_token", auth.access_token.as_str()),
            ],
        )?;
        debug!("fetching instagram profile for {}", handle);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("profile request for {} failed: {}", handle, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("profile request for {} failed: HTTP {}", handle, status));
        }

        let profile: GraphProfile = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse profile for {}: {}", handle, e))?;
        Ok(profile.into())
    }

    async fn request_profile_refresh(&self, handle: &str) {
        let profile = match self.get_profile(handle).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("profile refresh failed handle={}: {:#}", handle, err);
                return;
            }
        };

        for event in self.diff_profile(handle, &profile) {
            info!(
                "profile change detected handle={} field={:?}",
                handle, event.changed_field
            );
            if self
                .events
                .send(ContentEvent::ProfileUpdated(event))
                .await
                .is_err()
            {
                warn!("content event channel closed, dropping profile update");
                return;
            }
        }
    }

    fn observe_profile(&self, handle: &str, profile: &ContentProfile) {
        self.last_seen
            .lock()
            .insert(handle.to_string(), profile.clone());
    }
}
