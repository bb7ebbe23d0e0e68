use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grant recorded by the OAuth callback for one Instagram account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAuthorization {
    pub handle: String,
    pub internal_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotProfile {
    /// Content reference currently set as the bot avatar.
    pub avatar_url: Option<String>,
    /// External URL the avatar was uploaded from.
    pub avatar_source: Option<String>,
}

/// A relay room and the account it mirrors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomLink {
    pub room_id: String,
    pub handle: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveredMedia {
    pub id: i64,
    pub account_internal_id: String,
    pub post_id: String,
    pub message_id: String,
    pub room_id: String,
    pub delivered_at: DateTime<Utc>,
}
