use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::identity::IdentityResolver;
use crate::db::{AccountStore, DatabaseError};
use crate::instagram::{ContentProfile, ContentSource};
use crate::utils::formatting::apply_pattern_string;
use crate::web::metrics::Metrics;

/// Custom state event recording which account a relay room mirrors.
pub const ACCOUNT_INFO_EVENT_TYPE: &str = "org.matrix.instagram.account";

const BOT_POWER_LEVEL: i64 = 100;
const VIRTUAL_USER_POWER_LEVEL: i64 = 50;
const MODERATOR_POWER_LEVEL: i64 = 50;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("alias {0} is not in the bridge namespace")]
    InvalidAlias(String),

    #[error("account {0} has not authorized the bridge")]
    AuthorizationMissing(String),

    #[error("failed to fetch profile for {handle}: {reason}")]
    UpstreamFetch { handle: String, reason: String },

    #[error("failed to upload avatar {url}: {reason}")]
    Upload { url: String, reason: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StateEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: String,
    pub content: Value,
}

impl StateEvent {
    fn new(event_type: &str, content: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            state_key: String::new(),
            content,
        }
    }
}

/// Serializes as a `createRoom` request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomCreationParameters {
    pub room_alias_name: String,
    pub name: String,
    pub topic: String,
    pub visibility: String,
    pub invite: Vec<String>,
    pub initial_state: Vec<StateEvent>,
    #[serde(skip)]
    pub handle: String,
}

impl RoomCreationParameters {
    pub fn state(&self, event_type: &str) -> Option<&Value> {
        self.initial_state
            .iter()
            .find(|event| event.event_type == event_type)
            .map(|event| &event.content)
    }
}

pub fn power_levels(bot_user_id: &str, virtual_user_id: &str) -> Value {
    let restricted: serde_json::Map<String, Value> = [
        "m.room.name",
        "m.room.avatar",
        "m.room.topic",
        "m.room.power_levels",
        ACCOUNT_INFO_EVENT_TYPE,
    ]
    .into_iter()
    .map(|event_type| (event_type.to_string(), json!(BOT_POWER_LEVEL)))
    .collect();

    json!({
        "users": {
            bot_user_id: BOT_POWER_LEVEL,
            virtual_user_id: VIRTUAL_USER_POWER_LEVEL,
        },
        "users_default": 0,
        "events": restricted,
        "events_default": 0,
        "state_default": MODERATOR_POWER_LEVEL,
        "invite": 0,
        "kick": MODERATOR_POWER_LEVEL,
        "ban": MODERATOR_POWER_LEVEL,
        "redact": MODERATOR_POWER_LEVEL,
    })
}

/// Turns alias queries for `#<prefix><handle>` into relay room parameters.
pub struct RoomProvisioner {
    identities: Arc<IdentityResolver>,
    accounts: Arc<dyn AccountStore>,
    content: Arc<dyn ContentSource>,
    name_pattern: String,
    topic_pattern: String,
}

impl RoomProvisioner {
    pub fn new(
        identities: Arc<IdentityResolver>,
        accounts: Arc<dyn AccountStore>,
        content: Arc<dyn ContentSource>,
        name_pattern: &str,
        topic_pattern: &str,
    ) -> Self {
        Self {
            identities,
            accounts,
            content,
            name_pattern: name_pattern.to_string(),
            topic_pattern: topic_pattern.to_string(),
        }
    }

    pub async fn provision_room(
        &self,
        alias_localpart: &str,
    ) -> Result<RoomCreationParameters, ProvisionError> {
        let result = self.try_provision(alias_localpart).await;
        if let Err(err) = &result {
            Metrics::provisioning_rejected();
            warn!("rejected room for alias {}: {}", alias_localpart, err);
        }
        result
    }

    async fn try_provision(
        &self,
        alias_localpart: &str,
    ) -> Result<RoomCreationParameters, ProvisionError> {
        let handle = self
            .identities
            .handle_from_localpart(alias_localpart)
            .ok_or_else(|| ProvisionError::InvalidAlias(alias_localpart.to_string()))?;

        if !self.accounts.has_authorization(handle).await? {
            return Err(ProvisionError::AuthorizationMissing(handle.to_string()));
        }

        let profile = self.content.get_profile(handle).await.map_err(|err| {
            ProvisionError::UpstreamFetch {
                handle: handle.to_string(),
                reason: format!("{:#}", err),
            }
        })?;
        debug!("fetched profile for {}: {}", handle, profile.display_name);

        let avatar = self.upload_avatar(&profile).await?;
        let params = self.build_parameters(alias_localpart, handle, &profile, avatar);
        info!("provisioned room parameters for {}", handle);
        Ok(params)
    }

    async fn upload_avatar(
        &self,
        profile: &ContentProfile,
    ) -> Result<Option<String>, ProvisionError> {
        let Some(url) = profile.avatar_url.as_deref() else {
            return Ok(None);
        };
        let bot = self.identities.bot().await;
        bot.upload_media(url)
            .await
            .map(Some)
            .map_err(|err| ProvisionError::Upload {
                url: url.to_string(),
                reason: format!("{:#}", err),
            })
    }

    fn build_parameters(
        &self,
        alias_localpart: &str,
        handle: &str,
        profile: &ContentProfile,
        avatar: Option<String>,
    ) -> RoomCreationParameters {
        let replacements = [("name", profile.display_name.as_str()), ("handle", handle)];
        let virtual_user_id = self.identities.virtual_user_id(handle);
        let bot_user_id = self.identities.bot_user_id();

        let mut initial_state = vec![StateEvent::new(
            "m.room.join_rules",
            json!({ "join_rule": "public" }),
        )];
        if let Some(avatar) = avatar {
            initial_state.push(StateEvent::new("m.room.avatar", json!({ "url": avatar })));
        }
        initial_state.push(StateEvent::new(
            "m.room.power_levels",
            power_levels(&bot_user_id, &virtual_user_id),
        ));
        initial_state.push(StateEvent::new(
            ACCOUNT_INFO_EVENT_TYPE,
            json!({ "handle": handle }),
        ));

        RoomCreationParameters {
            room_alias_name: alias_localpart.to_string(),
            name: apply_pattern_string(&self.name_pattern, &replacements),
            topic: apply_pattern_string(&self.topic_pattern, &replacements),
            visibility: "public".to_string(),
            invite: vec![virtual_user_id],
            initial_state,
            handle: handle.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::testing::{BOT, DOMAIN, MemoryStore, MockContentSource, MockTransport};

    struct Fixture {
        transport: MockTransport,
        content: Arc<MockContentSource>,
        provisioner: RoomProvisioner,
    }

    fn fixture(authorized: bool, avatar: Option<&str>) -> Fixture {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::default());
        if authorized {
            store.authorize("alice");
        }
        let content = Arc::new(MockContentSource::default().with_profile("alice", "Alice", avatar));
        let identities = Arc::new(IdentityResolver::new(
            DOMAIN,
            "_ig_",
            Arc::new(transport.clone()),
            content.clone(),
        ));
        let provisioner =
            RoomProvisioner::new(identities, store, content.clone(), "[source] :name", ":handle");
        Fixture {
            transport,
            content,
            provisioner,
        }
    }

    #[tokio::test]
    async fn authorized_alias_yields_room_parameters() {
        let fixture = fixture(true, Some("http://x/a.png"));

        let params = fixture
            .provisioner
            .provision_room("_ig_alice")
            .await
            .expect("provisions");

        assert_eq!(params.name, "[source] Alice");
        assert_eq!(params.topic, "alice");
        assert_eq!(params.room_alias_name, "_ig_alice");
        assert_eq!(params.visibility, "public");
        assert_eq!(params.invite, vec!["@_ig_alice:example.org".to_string()]);

        let levels = params.state("m.room.power_levels").expect("power levels");
        assert_eq!(levels["users"][BOT], 100);
        assert_eq!(levels["users"]["@_ig_alice:example.org"], 50);
        assert_eq!(levels["invite"], 0);
        assert_eq!(levels["kick"], 50);
        assert_eq!(levels["state_default"], 50);
        assert_eq!(levels["events"]["m.room.topic"], 100);
        assert_eq!(levels["events"][ACCOUNT_INFO_EVENT_TYPE], 100);

        assert_eq!(
            params.state(ACCOUNT_INFO_EVENT_TYPE),
            Some(&json!({ "handle": "alice" }))
        );
        assert_eq!(
            params.state("m.room.join_rules"),
            Some(&json!({ "join_rule": "public" }))
        );
        let uploads = fixture.transport.uploads();
        assert_eq!(uploads, vec![(BOT.to_string(), "http://x/a.png".to_string())]);
        assert!(params.state("m.room.avatar").is_some());
    }

    #[tokio::test]
    async fn alias_without_prefix_never_reaches_content_source() {
        let fixture = fixture(true, Some("http://x/a.png"));

        let err = fixture
            .provisioner
            .provision_room("alice")
            .await
            .expect_err("rejects");

        assert!(matches!(err, ProvisionError::InvalidAlias(_)));
        assert!(fixture.content.profile_calls().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_account_is_rejected_before_upload() {
        let fixture = fixture(false, Some("http://x/a.png"));

        let err = fixture
            .provisioner
            .provision_room("_ig_alice")
            .await
            .expect_err("rejects");

        assert!(matches!(err, ProvisionError::AuthorizationMissing(handle) if handle == "alice"));
        assert!(fixture.transport.uploads().is_empty());
        assert!(fixture.content.profile_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_avatar_upload_rejects_whole_request() {
        let fixture = fixture(true, Some("http://x/broken.png"));
        fixture.transport.fail_upload("http://x/broken.png");

        let err = fixture
            .provisioner
            .provision_room("_ig_alice")
            .await
            .expect_err("rejects");

        assert!(matches!(err, ProvisionError::Upload { .. }));
    }

    #[tokio::test]
    async fn missing_avatar_skips_upload_and_avatar_state() {
        let fixture = fixture(true, None);

        let params = fixture
            .provisioner
            .provision_room("_ig_alice")
            .await
            .expect("provisions");

        assert!(fixture.transport.uploads().is_empty());
        assert!(params.state("m.room.avatar").is_none());
    }

    #[test]
    fn creation_body_omits_handle() {
        let params = RoomCreationParameters {
            room_alias_name: "_ig_alice".to_string(),
            name: "n".to_string(),
            topic: "t".to_string(),
            visibility: "public".to_string(),
            invite: Vec::new(),
            initial_state: Vec::new(),
            handle: "alice".to_string(),
        };
        let body = serde_json::to_value(&params).expect("serializes");
        assert!(body.get("handle").is_none());
        assert_eq!(body["room_alias_name"], "_ig_alice");
    }
}
