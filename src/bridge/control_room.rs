use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::matrix::{ChatTransport, MatrixEvent};

const HELP_TEXT: &str = "Available commands:\n\
!login - get a link to authorize an Instagram account\n\
!ping - check that the bridge is alive\n\
!help - show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Help,
    Login,
    Ping,
}

impl ControlCommand {
    pub fn parse(body: &str) -> Option<Self> {
        let command = body.trim().strip_prefix('!')?;
        match command.split_whitespace().next()?.to_ascii_lowercase().as_str() {
            "help" => Some(Self::Help),
            "login" => Some(Self::Login),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }
}

/// A private room between the bot and one user.
pub struct ControlRoom {
    room_id: String,
    counterpart: String,
    transport: Arc<dyn ChatTransport>,
    auth_base_url: Option<String>,
}

impl ControlRoom {
    pub fn new(
        room_id: &str,
        counterpart: &str,
        transport: Arc<dyn ChatTransport>,
        auth_base_url: Option<String>,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            counterpart: counterpart.to_string(),
            transport,
            auth_base_url,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn login_link(&self) -> Option<String> {
        let base = self.auth_base_url.as_deref()?;
        Url::parse_with_params(base, &[("user_id", self.counterpart.as_str())])
            .ok()
            .map(String::from)
    }

    fn reply_for(&self, command: &ControlCommand) -> String {
        match command {
            ControlCommand::Help => HELP_TEXT.to_string(),
            ControlCommand::Ping => "pong".to_string(),
            ControlCommand::Login => match self.login_link() {
                Some(link) => format!("Open this link to authorize your account: {}", link),
                None => "Account login is not configured on this bridge.".to_string(),
            },
        }
    }

    pub async fn handle(&self, event: &MatrixEvent) -> Result<()> {
        let MatrixEvent::Message {
            sender,
            msgtype,
            body,
            ..
        } = event
        else {
            return Ok(());
        };
        if sender != &self.counterpart || msgtype != "m.text" {
            return Ok(());
        }
        let Some(command) = ControlCommand::parse(body) else {
            debug!("ignoring control room message in {}", self.room_id);
            return Ok(());
        };

        info!(
            "control command {:?} from {} in {}",
            command, sender, self.room_id
        );
        let bot = self.transport.intent(&self.transport.bot_user_id()).await;
        bot.send_message(&self.room_id, &notice(&self.reply_for(&command)))
            .await?;
        Ok(())
    }
}

fn notice(body: &str) -> Value {
    json!({ "msgtype": "m.notice", "body": body })
}

/// Live control rooms keyed by room ID.
#[derive(Default)]
pub struct ControlRoomRegistry {
    rooms: Mutex<HashMap<String, Arc<ControlRoom>>>,
}

impl ControlRoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the room already has a record; the existing one is kept.
    pub fn register(&self, room: ControlRoom) -> bool {
        let mut rooms = self.rooms.lock();
        if rooms.contains_key(room.room_id()) {
            return false;
        }
        rooms.insert(room.room_id().to_string(), Arc::new(room));
        true
    }

    pub fn unregister(&self, room_id: &str) -> bool {
        self.rooms.lock().remove(room_id).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn dispatch(&self, room_id: &str, event: &MatrixEvent) -> bool {
        let room = self.rooms.lock().get(room_id).cloned();
        let Some(room) = room else {
            return false;
        };
        if let Err(err) = room.handle(event).await {
            warn!("control room {} failed to handle event: {:#}", room_id, err);
        }
        true
    }
}
