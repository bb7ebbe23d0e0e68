use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;

use crate::db::schema_sqlite::{
    account_authorizations, bot_profile, delivered_media, media_expiration, room_links,
};

use super::{
    DatabaseError,
    models::{AccountAuthorization, BotProfile, DeliveredMedia, RoomLink},
};

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

const BOT_PROFILE_ROW: i32 = 1;
const POOL_SIZE: u32 = 8;
const BUSY_TIMEOUT_MS: u32 = 5_000;

fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

/// Writers from concurrent relay tasks wait on each other instead of failing
/// with `database is locked`.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; \
             PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL;"
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

pub(crate) fn build_pool(path: &str) -> Result<Pool, DatabaseError> {
    r2d2::Pool::builder()
        .max_size(POOL_SIZE)
        .connection_customizer(Box::new(SqlitePragmas))
        .build(ConnectionManager::<SqliteConnection>::new(path))
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

/// Runs `f` against a pooled connection on the blocking pool.
async fn with_connection<T, F>(pool: Pool, f: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        f(&mut *conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

fn query_err(e: diesel::result::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = account_authorizations)]
struct DbAccountAuthorization {
    handle: String,
    internal_id: String,
    access_token: String,
    granted_at: String,
}

impl DbAccountAuthorization {
    fn to_authorization(&self) -> Result<AccountAuthorization, DatabaseError> {
        Ok(AccountAuthorization {
            handle: self.handle.clone(),
            internal_id: self.internal_id.clone(),
            access_token: self.access_token.clone(),
            granted_at: string_to_datetime(&self.granted_at)?,
        })
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = account_authorizations)]
struct NewAccountAuthorization<'a> {
    handle: &'a str,
    internal_id: &'a str,
    access_token: &'a str,
    granted_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = bot_profile)]
struct DbBotProfile {
    #[allow(dead_code)]
    id: i32,
    avatar_url: Option<String>,
    avatar_source: Option<String>,
    #[allow(dead_code)]
    updated_at: String,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = bot_profile)]
#[diesel(treat_none_as_null = true)]
struct NewBotProfile<'a> {
    id: i32,
    avatar_url: Option<&'a str>,
    avatar_source: Option<&'a str>,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = room_links)]
struct DbRoomLink {
    room_id: String,
    handle: String,
    created_at: String,
}

impl DbRoomLink {
    fn to_room_link(&self) -> Result<RoomLink, DatabaseError> {
        Ok(RoomLink {
            room_id: self.room_id.clone(),
            handle: self.handle.clone(),
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = room_links)]
struct NewRoomLink<'a> {
    room_id: &'a str,
    handle: &'a str,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = delivered_media)]
struct DbDeliveredMedia {
    id: i32,
    account_internal_id: String,
    post_id: String,
    message_id: String,
    room_id: String,
    delivered_at: String,
}

impl DbDeliveredMedia {
    fn to_delivered_media(&self) -> Result<DeliveredMedia, DatabaseError> {
        Ok(DeliveredMedia {
            id: self.id as i64,
            account_internal_id: self.account_internal_id.clone(),
            post_id: self.post_id.clone(),
            message_id: self.message_id.clone(),
            room_id: self.room_id.clone(),
            delivered_at: string_to_datetime(&self.delivered_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = delivered_media)]
struct NewDeliveredMedia<'a> {
    account_internal_id: &'a str,
    post_id: &'a str,
    message_id: &'a str,
    room_id: &'a str,
    delivered_at: String,
}

pub struct SqliteAccountStore {
    pool: Pool,
}

impl SqliteAccountStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::AccountStore for SqliteAccountStore {
    async fn has_authorization(&self, account: &str) -> Result<bool, DatabaseError> {
        Ok(self.get_authorization(account).await?.is_some())
    }

    async fn get_authorization(
        &self,
        account: &str,
    ) -> Result<Option<AccountAuthorization>, DatabaseError> {
        let account = account.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::account_authorizations::dsl::*;
            account_authorizations
                .filter(handle.eq(account))
                .select(DbAccountAuthorization::as_select())
                .first::<DbAccountAuthorization>(conn)
                .optional()
                .map_err(query_err)?
                .map(|a| a.to_authorization())
                .transpose()
        })
        .await
    }

    async fn save_authorization(&self, auth: &AccountAuthorization) -> Result<(), DatabaseError> {
        let auth = auth.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewAccountAuthorization {
                handle: &auth.handle,
                internal_id: &auth.internal_id,
                access_token: &auth.access_token,
                granted_at: datetime_to_string(&auth.granted_at),
            };
            diesel::insert_into(account_authorizations::table)
                .values(&row)
                .on_conflict(account_authorizations::handle)
                .do_update()
                .set(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(query_err)
        })
        .await
    }

    async fn revoke_authorization(&self, account: &str) -> Result<(), DatabaseError> {
        let account = account.to_string();
        with_connection(self.pool.clone(), move |conn| {
            diesel::delete(
                account_authorizations::table.filter(account_authorizations::handle.eq(account)),
            )
            .execute(conn)
            .map(|_| ())
            .map_err(query_err)
        })
        .await
    }
}

pub struct SqliteBotStore {
    pool: Pool,
}

impl SqliteBotStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::BotStore for SqliteBotStore {
    async fn get_bot_profile(&self) -> Result<BotProfile, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            let row = bot_profile::table
                .filter(bot_profile::id.eq(BOT_PROFILE_ROW))
                .select(DbBotProfile::as_select())
                .first::<DbBotProfile>(conn)
                .optional()
                .map_err(query_err)?;
            Ok(row
                .map(|r| BotProfile {
                    avatar_url: r.avatar_url,
                    avatar_source: r.avatar_source,
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn set_bot_profile(&self, profile: &BotProfile) -> Result<(), DatabaseError> {
        let profile = profile.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewBotProfile {
                id: BOT_PROFILE_ROW,
                avatar_url: profile.avatar_url.as_deref(),
                avatar_source: profile.avatar_source.as_deref(),
                updated_at: datetime_to_string(&Utc::now()),
            };
            diesel::insert_into(bot_profile::table)
                .values(&row)
                .on_conflict(bot_profile::id)
                .do_update()
                .set(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(query_err)
        })
        .await
    }
}

pub struct SqliteRoomLinkStore {
    pool: Pool,
}

impl SqliteRoomLinkStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::RoomLinkStore for SqliteRoomLinkStore {
    async fn get_links_for_room(&self, room: &str) -> Result<Vec<RoomLink>, DatabaseError> {
        let room = room.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::room_links::dsl::*;
            let results = room_links
                .filter(room_id.eq(room))
                .select(DbRoomLink::as_select())
                .load::<DbRoomLink>(conn)
                .map_err(query_err)?;
            results.iter().map(DbRoomLink::to_room_link).collect()
        })
        .await
    }

    async fn get_rooms_for_handle(&self, account: &str) -> Result<Vec<RoomLink>, DatabaseError> {
        let account = account.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::room_links::dsl::*;
            let results = room_links
                .filter(handle.eq(account))
                .select(DbRoomLink::as_select())
                .load::<DbRoomLink>(conn)
                .map_err(query_err)?;
            results.iter().map(DbRoomLink::to_room_link).collect()
        })
        .await
    }

    async fn create_room_link(&self, link: &RoomLink) -> Result<(), DatabaseError> {
        let link = link.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewRoomLink {
                room_id: &link.room_id,
                handle: &link.handle,
                created_at: datetime_to_string(&link.created_at),
            };
            diesel::insert_into(room_links::table)
                .values(&row)
                .on_conflict(room_links::room_id)
                .do_nothing()
                .execute(conn)
                .map(|_| ())
                .map_err(query_err)
        })
        .await
    }

    async fn list_room_links(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RoomLink>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::room_links::dsl::*;
            let results = room_links
                .order(created_at.desc())
                .limit(limit)
                .offset(offset)
                .select(DbRoomLink::as_select())
                .load::<DbRoomLink>(conn)
                .map_err(query_err)?;
            results.iter().map(DbRoomLink::to_room_link).collect()
        })
        .await
    }
}

pub struct SqliteMediaStore {
    pool: Pool,
}

impl SqliteMediaStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MediaStore for SqliteMediaStore {
    async fn record_delivery(&self, delivery: &DeliveredMedia) -> Result<(), DatabaseError> {
        let delivery = delivery.clone();
        with_connection(self.pool.clone(), move |conn| {
            let row = NewDeliveredMedia {
                account_internal_id: &delivery.account_internal_id,
                post_id: &delivery.post_id,
                message_id: &delivery.message_id,
                room_id: &delivery.room_id,
                delivered_at: datetime_to_string(&delivery.delivered_at),
            };
            diesel::insert_into(delivered_media::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(query_err)
        })
        .await
    }

    async fn get_deliveries_for_post(
        &self,
        post: &str,
    ) -> Result<Vec<DeliveredMedia>, DatabaseError> {
        let post = post.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::delivered_media::dsl::*;
            let results = delivered_media
                .filter(post_id.eq(post))
                .order(id.asc())
                .select(DbDeliveredMedia::as_select())
                .load::<DbDeliveredMedia>(conn)
                .map_err(query_err)?;
            results
                .iter()
                .map(DbDeliveredMedia::to_delivered_media)
                .collect()
        })
        .await
    }

    async fn advance_expiration_marker(
        &self,
        account: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let account = account.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::media_expiration::dsl::*;
            conn.immediate_transaction(|conn| {
                let current = media_expiration
                    .filter(account_internal_id.eq(account.as_str()))
                    .select(expires_at)
                    .first::<String>(conn)
                    .optional()
                    .map_err(query_err)?;
                if let Some(existing) = current {
                    if string_to_datetime(&existing)? >= expires {
                        return Ok(());
                    }
                }

                let value = datetime_to_string(&expires);
                diesel::insert_into(media_expiration)
                    .values((
                        account_internal_id.eq(account.as_str()),
                        expires_at.eq(value.as_str()),
                    ))
                    .on_conflict(account_internal_id)
                    .do_update()
                    .set(expires_at.eq(value.as_str()))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(query_err)
            })
        })
        .await
    }

    async fn get_expiration_marker(
        &self,
        account: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let account = account.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema_sqlite::media_expiration::dsl::*;
            media_expiration
                .filter(account_internal_id.eq(account))
                .select(expires_at)
                .first::<String>(conn)
                .optional()
                .map_err(query_err)?
                .map(|value| string_to_datetime(&value))
                .transpose()
        })
        .await
    }
}
