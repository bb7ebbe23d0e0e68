use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseError;
use super::models::{AccountAuthorization, BotProfile, DeliveredMedia, RoomLink};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn has_authorization(&self, handle: &str) -> Result<bool, DatabaseError>;
    async fn get_authorization(
        &self,
        handle: &str,
    ) -> Result<Option<AccountAuthorization>, DatabaseError>;
    async fn save_authorization(&self, auth: &AccountAuthorization) -> Result<(), DatabaseError>;
    async fn revoke_authorization(&self, handle: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait BotStore: Send + Sync {
    async fn get_bot_profile(&self) -> Result<BotProfile, DatabaseError>;
    async fn set_bot_profile(&self, profile: &BotProfile) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait RoomLinkStore: Send + Sync {
    async fn get_links_for_room(&self, room_id: &str) -> Result<Vec<RoomLink>, DatabaseError>;
    async fn get_rooms_for_handle(&self, handle: &str) -> Result<Vec<RoomLink>, DatabaseError>;
    async fn create_room_link(&self, link: &RoomLink) -> Result<(), DatabaseError>;
    async fn list_room_links(&self, limit: i64, offset: i64)
    -> Result<Vec<RoomLink>, DatabaseError>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn record_delivery(&self, delivery: &DeliveredMedia) -> Result<(), DatabaseError>;
    async fn get_deliveries_for_post(
        &self,
        post_id: &str,
    ) -> Result<Vec<DeliveredMedia>, DatabaseError>;
    /// Moves the marker to `expires_at` unless it already lies further ahead.
    async fn advance_expiration_marker(
        &self,
        account_internal_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
    async fn get_expiration_marker(
        &self,
        account_internal_id: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError>;
}
