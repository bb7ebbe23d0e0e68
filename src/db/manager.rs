use crate::config::DatabaseConfig;
use crate::db::{AccountStore, BotStore, DatabaseError, MediaStore, RoomLinkStore};
use std::sync::Arc;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{
    Pool, SqliteAccountStore, SqliteBotStore, SqliteMediaStore, SqliteRoomLinkStore, build_pool,
};
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "sqlite")]
    pool: Pool,
    account_store: Arc<dyn AccountStore>,
    bot_store: Arc<dyn BotStore>,
    room_link_store: Arc<dyn RoomLinkStore>,
    media_store: Arc<dyn MediaStore>,
}

impl DatabaseManager {
    #[cfg(feature = "sqlite")]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.sqlite_path().ok_or_else(|| {
            DatabaseError::Connection("only sqlite databases are supported".to_string())
        })?;
        let pool = build_pool(&path)?;

        Ok(Self {
            account_store: Arc::new(SqliteAccountStore::new(pool.clone())),
            bot_store: Arc::new(SqliteBotStore::new(pool.clone())),
            room_link_store: Arc::new(SqliteRoomLinkStore::new(pool.clone())),
            media_store: Arc::new(SqliteMediaStore::new(pool.clone())),
            pool,
        })
    }

    #[cfg(not(feature = "sqlite"))]
    pub async fn new(_config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Err(DatabaseError::Connection(
            "SQLite feature not enabled".to_string(),
        ))
    }

    #[cfg(feature = "sqlite")]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS account_authorizations (
                    handle TEXT PRIMARY KEY NOT NULL,
                    internal_id TEXT NOT NULL,
                    access_token TEXT NOT NULL,
                    granted_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS bot_profile (
                    id INTEGER PRIMARY KEY NOT NULL,
                    avatar_url TEXT,
                    avatar_source TEXT,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS room_links (
                    room_id TEXT PRIMARY KEY NOT NULL,
                    handle TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS delivered_media (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_internal_id TEXT NOT NULL,
                    post_id TEXT NOT NULL,
                    message_id TEXT NOT NULL,
                    room_id TEXT NOT NULL,
                    delivered_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS media_expiration (
                    account_internal_id TEXT PRIMARY KEY NOT NULL,
                    expires_at TEXT NOT NULL
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_room_links_handle ON room_links(handle)",
                "CREATE INDEX IF NOT EXISTS idx_delivered_media_post ON delivered_media(post_id, room_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut *conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(not(feature = "sqlite"))]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Migration(
            "SQLite feature not enabled".to_string(),
        ))
    }

    pub fn account_store(&self) -> Arc<dyn AccountStore> {
        self.account_store.clone()
    }

    pub fn bot_store(&self) -> Arc<dyn BotStore> {
        self.bot_store.clone()
    }

    pub fn room_link_store(&self) -> Arc<dyn RoomLinkStore> {
        self.room_link_store.clone()
    }

    pub fn media_store(&self) -> Arc<dyn MediaStore> {
        self.media_store.clone()
    }
}
