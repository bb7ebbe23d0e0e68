use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::identity::IdentityResolver;
use crate::db::{DatabaseError, DeliveredMedia, MediaStore};
use crate::instagram::{MediaItem, NewMediaEvent};
use crate::matrix::{ChatTransport, Intent};
use crate::web::metrics::Metrics;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to upload {url}: {reason}")]
    Upload { url: String, reason: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl RelayError {
    fn transport(err: anyhow::Error) -> Self {
        Self::Transport(format!("{:#}", err))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub rooms: usize,
    pub uploads: usize,
    pub delivered_rooms: usize,
    pub failed_rooms: usize,
}

pub fn media_message(item: &MediaItem, content_ref: &str, event: &NewMediaEvent) -> Value {
    json!({
        "msgtype": item.media_type.msgtype(),
        "url": content_ref,
        "body": format!("media-{}", event.source_post_id),
        "info": {
            "w": item.content.width,
            "h": item.content.height,
            "mimetype": item.media_type.mimetype(),
        },
        "external_url": event.source_permalink,
    })
}

pub fn caption_message(caption: &str, permalink: &str) -> Value {
    json!({
        "msgtype": "m.text",
        "body": caption,
        "external_url": permalink,
    })
}

/// Mirrors new posts into every room the account's virtual user has joined.
pub struct MediaRelay {
    identities: Arc<IdentityResolver>,
    transport: Arc<dyn ChatTransport>,
    media_store: Arc<dyn MediaStore>,
    expiration_grace: Duration,
}

impl MediaRelay {
    pub fn new(
        identities: Arc<IdentityResolver>,
        transport: Arc<dyn ChatTransport>,
        media_store: Arc<dyn MediaStore>,
        expiration_grace_secs: i64,
    ) -> Self {
        Self {
            identities,
            transport,
            media_store,
            expiration_grace: Duration::seconds(expiration_grace_secs),
        }
    }

    pub async fn on_new_media(&self, event: &NewMediaEvent) -> Result<RelayReport, RelayError> {
        let ghost = self
            .identities
            .resolve(&event.account_handle)
            .await
            .map_err(RelayError::transport)?;

        let rooms = self
            .transport
            .list_joined_rooms(ghost.user_id())
            .await
            .map_err(RelayError::transport)?;
        if rooms.is_empty() {
            debug!(
                "no relay rooms for handle={} post_id={}",
                event.account_handle, event.source_post_id
            );
            return Ok(RelayReport::default());
        }

        let content_refs = self.upload_all(&event.media).await?;
        let uploaded: Vec<(&MediaItem, String)> = event.media.iter().zip(content_refs).collect();

        let results = join_all(
            rooms
                .iter()
                .map(|room_id| self.deliver_to_room(ghost.as_ref(), room_id, event, &uploaded)),
        )
        .await;

        let mut report = RelayReport {
            rooms: rooms.len(),
            uploads: uploaded.len(),
            ..RelayReport::default()
        };
        for (room_id, result) in rooms.iter().zip(results) {
            match result {
                Ok(()) => report.delivered_rooms += 1,
                Err(err) => {
                    report.failed_rooms += 1;
                    Metrics::room_delivery_failed();
                    warn!(
                        "delivery failed handle={} room_id={} post_id={}: {}",
                        event.account_handle, room_id, event.source_post_id, err
                    );
                }
            }
        }

        info!(
            "relayed post_id={} handle={} to {}/{} room(s)",
            event.source_post_id, event.account_handle, report.delivered_rooms, report.rooms
        );
        Ok(report)
    }

    /// Uploads every item once through the bot. One failure fails the batch.
    async fn upload_all(&self, media: &[MediaItem]) -> Result<Vec<String>, RelayError> {
        let bot = self.identities.bot().await;
        let results = join_all(media.iter().map(|item| bot.upload_media(&item.content.url))).await;

        media
            .iter()
            .zip(results)
            .map(|(item, result)| match result {
                Ok(content_ref) => {
                    Metrics::media_uploaded();
                    Ok(content_ref)
                }
                Err(err) => Err(RelayError::Upload {
                    url: item.content.url.clone(),
                    reason: format!("{:#}", err),
                }),
            })
            .collect()
    }

    async fn deliver_to_room(
        &self,
        ghost: &dyn Intent,
        room_id: &str,
        event: &NewMediaEvent,
        uploaded: &[(&MediaItem, String)],
    ) -> Result<(), RelayError> {
        let mut message_ids = Vec::with_capacity(uploaded.len() + 1);
        for (item, content_ref) in uploaded {
            let content = media_message(item, content_ref, event);
            let message_id = ghost
                .send_message(room_id, &content)
                .await
                .map_err(RelayError::transport)?;
            Metrics::message_sent();
            message_ids.push(message_id);
        }

        if let Some(caption) = event.caption_text() {
            let message_id = ghost
                .send_message(room_id, &caption_message(caption, &event.source_permalink))
                .await
                .map_err(RelayError::transport)?;
            Metrics::message_sent();
            message_ids.push(message_id);
        }

        self.persist(room_id, event, message_ids).await
    }

    /// Store writes are independent of each other; every one is attempted and
    /// the first failure is reported.
    async fn persist(
        &self,
        room_id: &str,
        event: &NewMediaEvent,
        message_ids: Vec<String>,
    ) -> Result<(), RelayError> {
        let now = Utc::now();
        let mut first_error = None;

        for message_id in message_ids {
            let delivery = DeliveredMedia {
                id: 0,
                account_internal_id: event.account_internal_id.clone(),
                post_id: event.source_post_id.clone(),
                message_id,
                room_id: room_id.to_string(),
                delivered_at: now,
            };
            if let Err(err) = self.media_store.record_delivery(&delivery).await {
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = self
            .media_store
            .advance_expiration_marker(&event.account_internal_id, now + self.expiration_grace)
            .await
        {
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::testing::{
        BOT, DOMAIN, MemoryStore, MockContentSource, MockTransport,
    };
    use crate::config::DatabaseConfig;
    use crate::db::DatabaseManager;
    use crate::instagram::{MediaContent, MediaType};

    const GHOST: &str = "@_ig_alice:example.org";
    const PERMALINK: &str = "https://www.instagram.com/p/abc/";

    fn item(media_type: MediaType, url: &str) -> MediaItem {
        MediaItem {
            media_type,
            content: MediaContent {
                url: url.to_string(),
                width: 1080,
                height: 1350,
            },
        }
    }

    fn event(caption: Option<&str>) -> NewMediaEvent {
        NewMediaEvent {
            account_handle: "alice".to_string(),
            media: vec![
                item(MediaType::Image, "https://cdn/a.jpg"),
                item(MediaType::Video, "https://cdn/b.mp4"),
            ],
            caption: caption.map(ToOwned::to_owned),
            source_post_id: "1790".to_string(),
            source_permalink: PERMALINK.to_string(),
            account_internal_id: "1784".to_string(),
        }
    }

    fn relay(transport: &MockTransport, store: Arc<dyn MediaStore>) -> MediaRelay {
        let transport: Arc<dyn ChatTransport> = Arc::new(transport.clone());
        let identities = Arc::new(IdentityResolver::new(
            DOMAIN,
            "_ig_",
            transport.clone(),
            Arc::new(MockContentSource::default()),
        ));
        MediaRelay::new(identities, transport, store, 86400)
    }

    #[tokio::test]
    async fn account_without_rooms_does_no_work() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::default());

        let report = relay(&transport, store.clone())
            .on_new_media(&event(Some("sunset")))
            .await
            .expect("relays");

        assert_eq!(report, RelayReport::default());
        assert!(transport.uploads().is_empty());
        assert!(transport.messages_in("!a:example.org").is_empty());
        assert!(store.deliveries().is_empty());
    }

    #[tokio::test]
    async fn uploads_once_per_item_and_posts_caption_last() {
        let transport = MockTransport::new();
        transport.set_joined_rooms(GHOST, &["!a:example.org", "!b:example.org"]);
        let store = Arc::new(MemoryStore::default());

        let report = relay(&transport, store.clone())
            .on_new_media(&event(Some("sunset")))
            .await
            .expect("relays");

        assert_eq!(report.uploads, 2);
        assert_eq!(report.delivered_rooms, 2);
        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|(user, _)| user == BOT));

        for room in ["!a:example.org", "!b:example.org"] {
            let messages = transport.messages_in(room);
            assert_eq!(messages.len(), 3);
            assert!(messages.iter().all(|(sender, _)| sender == GHOST));
            assert!(
                messages
                    .iter()
                    .all(|(_, content)| content["external_url"] == PERMALINK)
            );
            assert_eq!(messages[0].1["msgtype"], "m.image");
            assert_eq!(messages[0].1["body"], "media-1790");
            assert_eq!(messages[0].1["info"]["mimetype"], "image/jpeg");
            assert_eq!(messages[1].1["msgtype"], "m.video");
            assert_eq!(messages[1].1["info"]["w"], 1080);
            assert_eq!(messages[2].1["msgtype"], "m.text");
            assert_eq!(messages[2].1["body"], "sunset");
        }

        assert_eq!(store.deliveries().len(), 6);
        let marker = store.marker("1784").expect("marker advanced");
        assert!(marker > Utc::now() + Duration::hours(23));
    }

    #[tokio::test]
    async fn failed_upload_abandons_batch() {
        let transport = MockTransport::new();
        transport.set_joined_rooms(GHOST, &["!a:example.org"]);
        transport.fail_upload("https://cdn/b.mp4");
        let store = Arc::new(MemoryStore::default());

        let err = relay(&transport, store.clone())
            .on_new_media(&event(None))
            .await
            .expect_err("upload fails");

        assert!(matches!(err, RelayError::Upload { url, .. } if url == "https://cdn/b.mp4"));
        assert!(transport.messages_in("!a:example.org").is_empty());
        assert!(store.deliveries().is_empty());
        assert!(store.marker("1784").is_none());
    }

    #[tokio::test]
    async fn failing_room_does_not_block_others() {
        let transport = MockTransport::new();
        transport.set_joined_rooms(GHOST, &["!a:example.org", "!broken:example.org"]);
        transport.fail_room("!broken:example.org");
        let store = Arc::new(MemoryStore::default());

        let report = relay(&transport, store.clone())
            .on_new_media(&event(None))
            .await
            .expect("relays");

        assert_eq!(report.delivered_rooms, 1);
        assert_eq!(report.failed_rooms, 1);
        assert_eq!(transport.messages_in("!a:example.org").len(), 2);
        let deliveries = store.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.room_id == "!a:example.org"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sqlite_keeps_every_record_when_rooms_persist_together() {
        let rooms: Vec<String> = (0..8).map(|n| format!("!r{}:example.org", n)).collect();
        let room_refs: Vec<&str> = rooms.iter().map(String::as_str).collect();
        let transport = MockTransport::new();
        transport.set_joined_rooms(GHOST, &room_refs);

        let file = tempfile::NamedTempFile::new().expect("temp sqlite file");
        let manager = DatabaseManager::new(&DatabaseConfig {
            url: None,
            filename: Some(file.path().to_string_lossy().to_string()),
        })
        .await
        .expect("db manager");
        manager.migrate().await.expect("migrate");
        let store = manager.media_store();
        let relay = relay(&transport, store.clone());

        let events: Vec<NewMediaEvent> = (0..10)
            .map(|n| NewMediaEvent {
                source_post_id: format!("post-{}", n),
                ..event(Some("sunset"))
            })
            .collect();
        let reports = join_all(events.iter().map(|event| relay.on_new_media(event))).await;

        for report in reports {
            let report = report.expect("relays");
            assert_eq!(report.delivered_rooms, rooms.len());
            assert_eq!(report.failed_rooms, 0);
        }
        for event in &events {
            let deliveries = store
                .get_deliveries_for_post(&event.source_post_id)
                .await
                .expect("query");
            assert_eq!(deliveries.len(), rooms.len() * 3);
        }
        let marker = store
            .get_expiration_marker("1784")
            .await
            .expect("query")
            .expect("marker exists");
        assert!(marker > Utc::now() + Duration::hours(23));
    }
}
