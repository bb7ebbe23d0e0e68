use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::identity::IdentityResolver;
use crate::db::RoomLinkStore;
use crate::instagram::{ChangedField, ProfileUpdatedEvent};
use crate::matrix::Intent;
use crate::utils::formatting::apply_pattern_string;

/// Applies account profile changes to the virtual user and its linked rooms.
pub struct ProfileSync {
    identities: Arc<IdentityResolver>,
    links: Arc<dyn RoomLinkStore>,
    displayname_pattern: String,
    room_name_pattern: String,
}

impl ProfileSync {
    pub fn new(
        identities: Arc<IdentityResolver>,
        links: Arc<dyn RoomLinkStore>,
        displayname_pattern: &str,
        room_name_pattern: &str,
    ) -> Self {
        Self {
            identities,
            links,
            displayname_pattern: displayname_pattern.to_string(),
            room_name_pattern: room_name_pattern.to_string(),
        }
    }

    pub async fn on_profile_updated(&self, event: &ProfileUpdatedEvent) -> Result<()> {
        if let ChangedField::Other(field) = &event.changed_field {
            warn!(
                "ignoring unsupported profile field {} for handle={}",
                field, event.account_handle
            );
            return Ok(());
        }

        let (identity, rooms) = futures::join!(self.update_identity(event), self.update_rooms(event));
        rooms?;
        identity
    }

    fn pattern(&self, pattern: &str, event: &ProfileUpdatedEvent) -> String {
        apply_pattern_string(
            pattern,
            &[
                ("name", event.profile.display_name.as_str()),
                ("handle", event.account_handle.as_str()),
            ],
        )
    }

    async fn update_identity(&self, event: &ProfileUpdatedEvent) -> Result<()> {
        let ghost = self.identities.ghost(&event.account_handle).await?;
        match &event.changed_field {
            ChangedField::DisplayName => {
                let name = self.pattern(&self.displayname_pattern, event);
                ghost.set_display_name(&name).await?;
                info!("updated display name of {} to {}", ghost.user_id(), name);
            }
            ChangedField::Avatar => {
                let Some(url) = event.profile.avatar_url.as_deref() else {
                    debug!("profile of {} has no avatar", event.account_handle);
                    return Ok(());
                };
                let content_ref = ghost.upload_media(url).await?;
                ghost.set_avatar_url(&content_ref).await?;
                info!("updated avatar of {}", ghost.user_id());
            }
            ChangedField::Other(_) => {}
        }
        Ok(())
    }

    async fn update_rooms(&self, event: &ProfileUpdatedEvent) -> Result<()> {
        let links = self.links.get_rooms_for_handle(&event.account_handle).await?;
        if links.is_empty() {
            return Ok(());
        }

        let bot = self.identities.bot().await;
        let results = join_all(
            links
                .iter()
                .map(|link| self.update_room(bot.as_ref(), &link.room_id, event)),
        )
        .await;

        for (link, result) in links.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    "failed to update room_id={} for handle={}: {:#}",
                    link.room_id, event.account_handle, err
                );
            }
        }
        Ok(())
    }

    async fn update_room(
        &self,
        bot: &dyn Intent,
        room_id: &str,
        event: &ProfileUpdatedEvent,
    ) -> Result<()> {
        match &event.changed_field {
            ChangedField::DisplayName => {
                let name = self.pattern(&self.room_name_pattern, event);
                bot.set_room_name(room_id, &name).await
            }
            ChangedField::Avatar => {
                let Some(url) = event.profile.avatar_url.as_deref() else {
                    return Ok(());
                };
                let content_ref = bot.upload_media(url).await?;
                bot.set_room_avatar(room_id, &content_ref).await
            }
            ChangedField::Other(_) => Ok(()),
        }
    }
}
