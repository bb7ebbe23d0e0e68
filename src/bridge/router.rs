use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::classifier::{RoomCategory, RoomClassifier};
use super::control_room::ControlRoomRegistry;
use super::identity::{IdentityDescriptor, IdentityResolver};
use super::provisioning::{ProvisionError, RoomCreationParameters, RoomProvisioner};
use crate::db::{RoomLink, RoomLinkStore};
use crate::matrix::{ChatTransport, MatrixEvent, MatrixEventHandler};

const LINK_WRITE_ATTEMPTS: u32 = 3;
const LINK_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Entry point for everything the homeserver pushes at the bridge.
pub struct EventRouter {
    identities: Arc<IdentityResolver>,
    classifier: Arc<RoomClassifier>,
    registry: Arc<ControlRoomRegistry>,
    provisioner: Arc<RoomProvisioner>,
    links: Arc<dyn RoomLinkStore>,
    transport: Arc<dyn ChatTransport>,
}

impl EventRouter {
    pub fn new(
        identities: Arc<IdentityResolver>,
        classifier: Arc<RoomClassifier>,
        registry: Arc<ControlRoomRegistry>,
        provisioner: Arc<RoomProvisioner>,
        links: Arc<dyn RoomLinkStore>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            identities,
            classifier,
            registry,
            provisioner,
            links,
            transport,
        }
    }

    pub fn registry(&self) -> Arc<ControlRoomRegistry> {
        self.registry.clone()
    }

    async fn accept_invite(&self, room_id: &str, invitee: &str) -> Result<()> {
        let Some(intent) = self.identities.intent_for(invitee).await? else {
            return Ok(());
        };
        intent.join(room_id).await?;
        info!("{} accepted invite to {}", invitee, room_id);

        let category = self.classifier.classify(room_id).await?;
        debug!("room {} classified as {:?}", room_id, category);
        Ok(())
    }

    /// Classifies every room the bot is currently in. Individual failures are
    /// logged and skipped.
    pub async fn startup_scan(&self) -> Result<usize> {
        let bot = self.transport.bot_user_id();
        let rooms = self.transport.list_joined_rooms(&bot).await?;
        info!("classifying {} joined room(s)", rooms.len());

        let mut control_rooms = 0;
        for room_id in rooms {
            match self.classifier.classify(&room_id).await {
                Ok(RoomCategory::ControlRoom) => control_rooms += 1,
                Ok(category) => debug!("room {} classified as {:?}", room_id, category),
                Err(err) => warn!("failed to classify room {}: {:#}", room_id, err),
            }
        }
        Ok(control_rooms)
    }

    pub async fn on_identity_query(&self, user_id: &str) -> Result<Option<IdentityDescriptor>> {
        self.identities.query(user_id).await
    }

    pub async fn on_alias_query(
        &self,
        alias_localpart: &str,
    ) -> Result<RoomCreationParameters, ProvisionError> {
        self.provisioner.provision_room(alias_localpart).await
    }

    /// Records the relay link for a freshly created room and classifies it.
    /// The link write is retried; an error means the room exists unlinked.
    pub async fn on_alias_created(&self, params: &RoomCreationParameters, room_id: &str) -> Result<()> {
        let link = RoomLink {
            room_id: room_id.to_string(),
            handle: params.handle.clone(),
            created_at: Utc::now(),
        };
        let mut attempt = 1;
        loop {
            match self.links.create_room_link(&link).await {
                Ok(()) => break,
                Err(err) if attempt < LINK_WRITE_ATTEMPTS => {
                    warn!(
                        "failed to link room {} to {} (attempt {}): {}",
                        room_id, link.handle, attempt, err
                    );
                    tokio::time::sleep(LINK_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("room {} was created but not linked to {}", room_id, link.handle)
                    });
                }
            }
        }
        info!(
            "created relay room {} for #{}",
            room_id, params.room_alias_name
        );
        self.classifier.classify(room_id).await?;
        Ok(())
    }
}

#[async_trait]
impl MatrixEventHandler for EventRouter {
    async fn on_event(&self, event: &MatrixEvent) -> Result<()> {
        if self.registry.dispatch(event.room_id(), event).await {
            debug!(
                "event from {} in {} handled by control room",
                event.sender(),
                event.room_id()
            );
        }

        match event {
            MatrixEvent::Invite {
                room_id, invitee, ..
            } => self.accept_invite(room_id, invitee).await,
            MatrixEvent::Leave { room_id, target, .. } => {
                if self.registry.unregister(room_id) {
                    info!("control room {} closed after {} left", room_id, target);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
