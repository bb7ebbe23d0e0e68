use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use super::control_room::{ControlRoom, ControlRoomRegistry};
use crate::db::RoomLinkStore;
use crate::matrix::ChatTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCategory {
    /// The room mirrors this many linked accounts.
    Relayed(usize),
    ControlRoom,
    Ignored,
}

pub struct RoomClassifier {
    links: Arc<dyn RoomLinkStore>,
    transport: Arc<dyn ChatTransport>,
    registry: Arc<ControlRoomRegistry>,
    auth_base_url: Option<String>,
}

impl RoomClassifier {
    pub fn new(
        links: Arc<dyn RoomLinkStore>,
        transport: Arc<dyn ChatTransport>,
        registry: Arc<ControlRoomRegistry>,
        auth_base_url: Option<String>,
    ) -> Self {
        Self {
            links,
            transport,
            registry,
            auth_base_url,
        }
    }

    pub async fn classify(&self, room_id: &str) -> Result<RoomCategory> {
        let links = self.links.get_links_for_room(room_id).await?;
        if !links.is_empty() {
            debug!("room {} relays {} account(s)", room_id, links.len());
            return Ok(RoomCategory::Relayed(links.len()));
        }

        let members = self.transport.joined_members(room_id).await?;
        let bot = self.transport.bot_user_id();
        if members.len() != 2 || !members.contains_key(&bot) {
            debug!(
                "ignoring room {} with {} member(s)",
                room_id,
                members.len()
            );
            return Ok(RoomCategory::Ignored);
        }

        let Some(counterpart) = members.keys().find(|member| **member != bot) else {
            return Ok(RoomCategory::Ignored);
        };
        let record = ControlRoom::new(
            room_id,
            counterpart,
            self.transport.clone(),
            self.auth_base_url.clone(),
        );
        if self.registry.register(record) {
            info!("registered control room {} with {}", room_id, counterpart);
        }
        Ok(RoomCategory::ControlRoom)
    }
}
