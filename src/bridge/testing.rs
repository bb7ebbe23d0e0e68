//! In-memory collaborators shared by the bridge unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::bridge::provisioning::RoomCreationParameters;
use crate::db::{
    AccountAuthorization, AccountStore, BotProfile, BotStore, DatabaseError, DeliveredMedia,
    MediaStore, RoomLink, RoomLinkStore,
};
use crate::instagram::{ContentProfile, ContentSource};
use crate::matrix::{ChatTransport, Intent, JoinedMember};

pub const DOMAIN: &str = "example.org";
pub const BOT: &str = "@_ig_:example.org";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Upload { user_id: String, source_url: String },
    Message { user_id: String, room_id: String, content: Value },
    DisplayName { user_id: String, name: String },
    AvatarUrl { user_id: String, content_ref: String },
    Join { user_id: String, room_id: String },
    RoomName { user_id: String, room_id: String, name: String },
    RoomAvatar { user_id: String, room_id: String, content_ref: String },
}

#[derive(Default)]
struct MockState {
    actions: Mutex<Vec<Action>>,
    joined_rooms: Mutex<HashMap<String, Vec<String>>>,
    members: Mutex<HashMap<String, Vec<String>>>,
    registered: Mutex<Vec<String>>,
    created_rooms: Mutex<Vec<RoomCreationParameters>>,
    failing_uploads: Mutex<HashSet<String>>,
    failing_rooms: Mutex<HashSet<String>>,
    counter: AtomicUsize,
}

impl MockState {
    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, action: Action) {
        self.actions.lock().push(action);
    }
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_joined_rooms(&self, user_id: &str, rooms: &[&str]) {
        self.state.joined_rooms.lock().insert(
            user_id.to_string(),
            rooms.iter().map(|room| room.to_string()).collect(),
        );
    }

    pub fn set_members(&self, room_id: &str, members: &[&str]) {
        self.state.members.lock().insert(
            room_id.to_string(),
            members.iter().map(|member| member.to_string()).collect(),
        );
    }

    pub fn fail_upload(&self, source_url: &str) {
        self.state.failing_uploads.lock().insert(source_url.to_string());
    }

    pub fn fail_room(&self, room_id: &str) {
        self.state.failing_rooms.lock().insert(room_id.to_string());
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.actions.lock().clone()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Upload {
                    user_id,
                    source_url,
                } => Some((user_id, source_url)),
                _ => None,
            })
            .collect()
    }

    /// Messages sent into `room_id`, in send order.
    pub fn messages_in(&self, room_id: &str) -> Vec<(String, Value)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Message {
                    user_id,
                    room_id: target,
                    content,
                } if target == room_id => Some((user_id, content)),
                _ => None,
            })
            .collect()
    }

    pub fn registered(&self) -> Vec<String> {
        self.state.registered.lock().clone()
    }

    pub fn created_rooms(&self) -> Vec<RoomCreationParameters> {
        self.state.created_rooms.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn bot_user_id(&self) -> String {
        BOT.to_string()
    }

    async fn intent(&self, user_id: &str) -> Arc<dyn Intent> {
        Arc::new(MockIntent {
            user_id: user_id.to_string(),
            state: self.state.clone(),
        })
    }

    async fn ensure_registered(&self, user_id: &str) -> Result<()> {
        self.state.registered.lock().push(user_id.to_string());
        Ok(())
    }

    async fn list_joined_rooms(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .joined_rooms
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn joined_members(&self, room_id: &str) -> Result<BTreeMap<String, JoinedMember>> {
        Ok(self
            .state
            .members
            .lock()
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .map(|member| (member.clone(), JoinedMember::default()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_room(&self, params: &RoomCreationParameters) -> Result<String> {
        self.state.created_rooms.lock().push(params.clone());
        Ok(format!("!created{}:{}", self.state.next_id(), DOMAIN))
    }
}

pub struct MockIntent {
    user_id: String,
    state: Arc<MockState>,
}

impl MockIntent {
    fn check_room(&self, room_id: &str) -> Result<()> {
        if self.state.failing_rooms.lock().contains(room_id) {
            return Err(anyhow!("M_FORBIDDEN: cannot act in {}", room_id));
        }
        Ok(())
    }
}

#[async_trait]
impl Intent for MockIntent {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send_message(&self, room_id: &str, content: &Value) -> Result<String> {
        self.check_room(room_id)?;
        self.state.record(Action::Message {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            content: content.clone(),
        });
        Ok(format!("$event{}", self.state.next_id()))
    }

    async fn set_display_name(&self, display_name: &str) -> Result<()> {
        self.state.record(Action::DisplayName {
            user_id: self.user_id.clone(),
            name: display_name.to_string(),
        });
        Ok(())
    }

    async fn set_avatar_url(&self, content_ref: &str) -> Result<()> {
        self.state.record(Action::AvatarUrl {
            user_id: self.user_id.clone(),
            content_ref: content_ref.to_string(),
        });
        Ok(())
    }

    async fn join(&self, room_id: &str) -> Result<()> {
        self.state.record(Action::Join {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    async fn upload_media(&self, source_url: &str) -> Result<String> {
        if self.state.failing_uploads.lock().contains(source_url) {
            return Err(anyhow!("download of {} failed", source_url));
        }
        self.state.record(Action::Upload {
            user_id: self.user_id.clone(),
            source_url: source_url.to_string(),
        });
        Ok(format!("mxc://{}/media{}", DOMAIN, self.state.next_id()))
    }

    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()> {
        self.check_room(room_id)?;
        self.state.record(Action::RoomName {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn set_room_avatar(&self, room_id: &str, content_ref: &str) -> Result<()> {
        self.check_room(room_id)?;
        self.state.record(Action::RoomAvatar {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            content_ref: content_ref.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MockContentSource {
    profiles: Mutex<HashMap<String, ContentProfile>>,
    profile_calls: Mutex<Vec<String>>,
    refresh_calls: Mutex<Vec<String>>,
    observed: Mutex<Vec<ContentProfile>>,
}

impl MockContentSource {
    pub fn with_profile(self, handle: &str, display_name: &str, avatar_url: Option<&str>) -> Self {
        self.profiles.lock().insert(
            handle.to_string(),
            ContentProfile {
                display_name: display_name.to_string(),
                avatar_url: avatar_url.map(ToOwned::to_owned),
                username: handle.to_string(),
            },
        );
        self
    }

    pub fn profile_calls(&self) -> Vec<String> {
        self.profile_calls.lock().clone()
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().clone()
    }

    pub fn observed(&self) -> Vec<ContentProfile> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn get_profile(&self, handle: &str) -> Result<ContentProfile> {
        self.profile_calls.lock().push(handle.to_string());
        self.profiles
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| anyhow!("profile for {} unavailable", handle))
    }

    async fn request_profile_refresh(&self, handle: &str) {
        self.refresh_calls.lock().push(handle.to_string());
    }

    fn observe_profile(&self, _handle: &str, profile: &ContentProfile) {
        self.observed.lock().push(profile.clone());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    authorizations: Mutex<HashMap<String, AccountAuthorization>>,
    bot_profile: Mutex<BotProfile>,
    links: Mutex<Vec<RoomLink>>,
    deliveries: Mutex<Vec<DeliveredMedia>>,
    markers: Mutex<HashMap<String, DateTime<Utc>>>,
    failing_link_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn authorize(&self, handle: &str) {
        self.authorizations.lock().insert(
            handle.to_string(),
            AccountAuthorization {
                handle: handle.to_string(),
                internal_id: format!("internal-{}", handle),
                access_token: format!("token-{}", handle),
                granted_at: Utc::now(),
            },
        );
    }

    pub fn link(&self, room_id: &str, handle: &str) {
        self.links.lock().push(RoomLink {
            room_id: room_id.to_string(),
            handle: handle.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Makes the next `count` room link writes fail.
    pub fn fail_link_writes(&self, count: usize) {
        self.failing_link_writes.store(count, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<DeliveredMedia> {
        self.deliveries.lock().clone()
    }

    pub fn marker(&self, account_internal_id: &str) -> Option<DateTime<Utc>> {
        self.markers.lock().get(account_internal_id).copied()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn has_authorization(&self, handle: &str) -> Result<bool, DatabaseError> {
        Ok(self.authorizations.lock().contains_key(handle))
    }

    async fn get_authorization(
        &self,
        handle: &str,
    ) -> Result<Option<AccountAuthorization>, DatabaseError> {
        Ok(self.authorizations.lock().get(handle).cloned())
    }

    async fn save_authorization(&self, auth: &AccountAuthorization) -> Result<(), DatabaseError> {
        self.authorizations
            .lock()
            .insert(auth.handle.clone(), auth.clone());
        Ok(())
    }

    async fn revoke_authorization(&self, handle: &str) -> Result<(), DatabaseError> {
        self.authorizations.lock().remove(handle);
        Ok(())
    }
}

#[async_trait]
impl BotStore for MemoryStore {
    async fn get_bot_profile(&self) -> Result<BotProfile, DatabaseError> {
        Ok(self.bot_profile.lock().clone())
    }

    async fn set_bot_profile(&self, profile: &BotProfile) -> Result<(), DatabaseError> {
        *self.bot_profile.lock() = profile.clone();
        Ok(())
    }
}

#[async_trait]
impl RoomLinkStore for MemoryStore {
    async fn get_links_for_room(&self, room_id: &str) -> Result<Vec<RoomLink>, DatabaseError> {
        Ok(self
            .links
            .lock()
            .iter()
            .filter(|link| link.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn get_rooms_for_handle(&self, handle: &str) -> Result<Vec<RoomLink>, DatabaseError> {
        Ok(self
            .links
            .lock()
            .iter()
            .filter(|link| link.handle == handle)
            .cloned()
            .collect())
    }

    async fn create_room_link(&self, link: &RoomLink) -> Result<(), DatabaseError> {
        let failing = self
            .failing_link_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(DatabaseError::Query("database is locked".to_string()));
        }
        let mut links = self.links.lock();
        if !links.iter().any(|existing| existing.room_id == link.room_id) {
            links.push(link.clone());
        }
        Ok(())
    }

    async fn list_room_links(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RoomLink>, DatabaseError> {
        Ok(self
            .links
            .lock()
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn record_delivery(&self, delivery: &DeliveredMedia) -> Result<(), DatabaseError> {
        let mut deliveries = self.deliveries.lock();
        let mut delivery = delivery.clone();
        delivery.id = deliveries.len() as i64 + 1;
        deliveries.push(delivery);
        Ok(())
    }

    async fn get_deliveries_for_post(
        &self,
        post_id: &str,
    ) -> Result<Vec<DeliveredMedia>, DatabaseError> {
        Ok(self
            .deliveries
            .lock()
            .iter()
            .filter(|delivery| delivery.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn advance_expiration_marker(
        &self,
        account_internal_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut markers = self.markers.lock();
        let marker = markers
            .entry(account_internal_id.to_string())
            .or_insert(expires_at);
        if expires_at > *marker {
            *marker = expires_at;
        }
        Ok(())
    }

    async fn get_expiration_marker(
        &self,
        account_internal_id: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.markers.lock().get(account_internal_id).copied())
    }
}
