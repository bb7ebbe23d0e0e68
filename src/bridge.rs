use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{AccountStore, BotProfile, BotStore, DatabaseManager, MediaStore, RoomLinkStore};
use crate::instagram::{ContentEvent, ContentSource};
use crate::matrix::ChatTransport;
use crate::web::metrics::Metrics;

pub mod classifier;
pub mod control_room;
pub mod identity;
pub mod media_relay;
pub mod profile_sync;
pub mod provisioning;
pub mod router;

#[cfg(test)]
pub mod testing;

use self::classifier::RoomClassifier;
use self::control_room::ControlRoomRegistry;
use self::identity::IdentityResolver;
use self::media_relay::MediaRelay;
use self::profile_sync::ProfileSync;
use self::provisioning::RoomProvisioner;
use self::router::EventRouter;

#[derive(Clone)]
pub struct BridgeStores {
    pub accounts: Arc<dyn AccountStore>,
    pub bot: Arc<dyn BotStore>,
    pub links: Arc<dyn RoomLinkStore>,
    pub media: Arc<dyn MediaStore>,
}

impl From<&DatabaseManager> for BridgeStores {
    fn from(db: &DatabaseManager) -> Self {
        Self {
            accounts: db.account_store(),
            bot: db.bot_store(),
            links: db.room_link_store(),
            media: db.media_store(),
        }
    }
}

pub struct BridgeCore {
    config: Arc<Config>,
    stores: BridgeStores,
    content: Arc<dyn ContentSource>,
    identities: Arc<IdentityResolver>,
    router: Arc<EventRouter>,
    media_relay: Arc<MediaRelay>,
    profile_sync: Arc<ProfileSync>,
}

impl BridgeCore {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn ChatTransport>,
        content: Arc<dyn ContentSource>,
        stores: BridgeStores,
    ) -> Self {
        let identities = Arc::new(IdentityResolver::new(
            &config.bridge.domain,
            &config.bridge.user_prefix,
            transport.clone(),
            content.clone(),
        ));
        let registry = Arc::new(ControlRoomRegistry::new());
        let classifier = Arc::new(RoomClassifier::new(
            stores.links.clone(),
            transport.clone(),
            registry.clone(),
            config.instagram.auth_base_url.clone(),
        ));
        let provisioner = Arc::new(RoomProvisioner::new(
            identities.clone(),
            stores.accounts.clone(),
            content.clone(),
            &config.room.name_pattern,
            &config.room.topic_pattern,
        ));
        let router = Arc::new(EventRouter::new(
            identities.clone(),
            classifier,
            registry,
            provisioner,
            stores.links.clone(),
            transport.clone(),
        ));
        let media_relay = Arc::new(MediaRelay::new(
            identities.clone(),
            transport,
            stores.media.clone(),
            config.relay.expiration_grace_secs,
        ));
        let profile_sync = Arc::new(ProfileSync::new(
            identities.clone(),
            stores.links.clone(),
            &config.ghosts.displayname_pattern,
            &config.room.name_pattern,
        ));

        Self {
            config,
            stores,
            content,
            identities,
            router,
            media_relay,
            profile_sync,
        }
    }

    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }

    /// Brings the bot's display name and avatar in line with the config. The
    /// avatar is only uploaded when its source URL changed since last time.
    pub async fn sync_bot_profile(&self) -> Result<()> {
        let bot = self.identities.bot().await;
        if let Some(name) = self.config.bridge.bot_display_name.as_deref() {
            bot.set_display_name(name).await?;
        }

        let Some(source) = self.config.bridge.bot_avatar_url.as_deref() else {
            return Ok(());
        };
        let stored = self.stores.bot.get_bot_profile().await?;
        if stored.avatar_source.as_deref() == Some(source) {
            debug!("bot avatar is up to date");
            return Ok(());
        }

        let content_ref = bot.upload_media(source).await?;
        bot.set_avatar_url(&content_ref).await?;
        self.stores
            .bot
            .set_bot_profile(&BotProfile {
                avatar_url: Some(content_ref),
                avatar_source: Some(source.to_string()),
            })
            .await?;
        info!("updated bot avatar from {}", source);
        Ok(())
    }

    pub async fn handle_content_event(&self, event: ContentEvent) {
        Metrics::content_event_received();
        let handle = event.account_handle().to_string();
        match event {
            ContentEvent::NewMedia(event) => match self.media_relay.on_new_media(&event).await {
                Ok(report) => debug!(
                    "new media handled handle={} post_id={} report={:?}",
                    handle, event.source_post_id, report
                ),
                Err(err) => {
                    Metrics::content_event_failed();
                    error!(
                        "new media dropped handle={} post_id={}: {}",
                        handle, event.source_post_id, err
                    );
                }
            },
            ContentEvent::ProfileUpdated(event) => {
                self.content.observe_profile(&handle, &event.profile);
                if let Err(err) = self.profile_sync.on_profile_updated(&event).await {
                    Metrics::content_event_failed();
                    error!(
                        "profile update dropped handle={} field={:?}: {:#}",
                        handle, event.changed_field, err
                    );
                }
            }
        }
    }

    pub async fn start(self: Arc<Self>, mut events: mpsc::Receiver<ContentEvent>) -> Result<()> {
        if let Err(err) = self.sync_bot_profile().await {
            warn!("failed to sync bot profile: {:#}", err);
        }
        match self.router.startup_scan().await {
            Ok(control_rooms) => info!("startup scan found {} control room(s)", control_rooms),
            Err(err) => warn!("startup room scan failed: {:#}", err),
        }

        info!("bridge core started");
        while let Some(event) = events.recv().await {
            let bridge = self.clone();
            tokio::spawn(async move {
                bridge.handle_content_event(event).await;
            });
        }

        info!("content event channel closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::testing::{BOT, MemoryStore, MockContentSource, MockTransport};
    use crate::instagram::{
        ChangedField, ContentProfile, MediaContent, MediaItem, MediaType, NewMediaEvent,
        ProfileUpdatedEvent,
    };

    const CONFIG: &str = r#"
bridge:
  domain: example.org
  homeserver_url: http://localhost:8008
  bot_avatar_url: https://cdn.example.org/bot.png
registration:
  as_token: as-secret
  hs_token: hs-secret
database:
  filename: /tmp/instagram.db
"#;

    fn core(transport: &MockTransport, store: Arc<MemoryStore>) -> BridgeCore {
        core_with_content(transport, store, Arc::new(MockContentSource::default()))
    }

    fn core_with_content(
        transport: &MockTransport,
        store: Arc<MemoryStore>,
        content: Arc<MockContentSource>,
    ) -> BridgeCore {
        let config = Arc::new(Config::from_yaml(CONFIG).expect("config parses"));
        BridgeCore::new(
            config,
            Arc::new(transport.clone()),
            content,
            BridgeStores {
                accounts: store.clone(),
                bot: store.clone(),
                links: store.clone(),
                media: store,
            },
        )
    }

    #[tokio::test]
    async fn bot_avatar_is_uploaded_only_when_source_changes() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::default());
        let core = core(&transport, store.clone());

        core.sync_bot_profile().await.expect("first sync");
        core.sync_bot_profile().await.expect("second sync");

        assert_eq!(
            transport.uploads(),
            vec![(BOT.to_string(), "https://cdn.example.org/bot.png".to_string())]
        );
        let profile = store.get_bot_profile().await.expect("profile");
        assert_eq!(
            profile.avatar_source.as_deref(),
            Some("https://cdn.example.org/bot.png")
        );
        assert!(profile.avatar_url.is_some());
    }

    #[tokio::test]
    async fn content_events_reach_media_relay() {
        let transport = MockTransport::new();
        transport.set_joined_rooms("@_ig_alice:example.org", &["!a:example.org"]);
        let store = Arc::new(MemoryStore::default());
        let core = core(&transport, store.clone());

        core.handle_content_event(ContentEvent::NewMedia(NewMediaEvent {
            account_handle: "alice".to_string(),
            media: vec![MediaItem {
                media_type: MediaType::Image,
                content: MediaContent {
                    url: "https://cdn/a.jpg".to_string(),
                    width: 640,
                    height: 480,
                },
            }],
            caption: None,
            source_post_id: "1".to_string(),
            source_permalink: "https://www.instagram.com/p/1/".to_string(),
            account_internal_id: "1784".to_string(),
        }))
        .await;

        assert_eq!(transport.messages_in("!a:example.org").len(), 1);
        assert_eq!(store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn profile_updates_become_the_content_baseline() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::default());
        let content = Arc::new(MockContentSource::default());
        let core = core_with_content(&transport, store, content.clone());
        let profile = ContentProfile {
            display_name: "Alice B".to_string(),
            avatar_url: None,
            username: "alice".to_string(),
        };

        core.handle_content_event(ContentEvent::ProfileUpdated(ProfileUpdatedEvent {
            account_handle: "alice".to_string(),
            profile: profile.clone(),
            changed_field: ChangedField::DisplayName,
        }))
        .await;

        assert_eq!(content.observed(), vec![profile]);
    }
}
