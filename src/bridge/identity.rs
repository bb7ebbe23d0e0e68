use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::instagram::ContentSource;
use crate::matrix::{ChatTransport, Intent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserKind {
    Bot,
    /// A bridge-owned user standing in for the contained account handle.
    Virtual(String),
    Regular,
}

/// Answer to a homeserver user query for the bridge namespace.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IdentityDescriptor {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// Maps account handles to virtual users and classifies arbitrary user IDs.
pub struct IdentityResolver {
    domain: String,
    user_prefix: String,
    transport: Arc<dyn ChatTransport>,
    content: Arc<dyn ContentSource>,
    registered: Mutex<HashSet<String>>,
}

impl IdentityResolver {
    pub fn new(
        domain: &str,
        user_prefix: &str,
        transport: Arc<dyn ChatTransport>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            user_prefix: user_prefix.to_string(),
            transport,
            content,
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn bot_user_id(&self) -> String {
        self.transport.bot_user_id()
    }

    pub fn virtual_user_id(&self, handle: &str) -> String {
        format!("@{}{}:{}", self.user_prefix, handle, self.domain)
    }

    /// Extracts the account handle from a prefixed localpart. An empty
    /// remainder is not a handle.
    pub fn handle_from_localpart<'a>(&self, localpart: &'a str) -> Option<&'a str> {
        localpart
            .strip_prefix(&self.user_prefix)
            .filter(|handle| !handle.is_empty())
    }

    pub fn classify_user(&self, user_id: &str) -> UserKind {
        if user_id == self.bot_user_id() {
            return UserKind::Bot;
        }

        let Some((localpart, server)) = user_id.trim_start_matches('@').split_once(':') else {
            return UserKind::Regular;
        };
        if server != self.domain {
            return UserKind::Regular;
        }
        match self.handle_from_localpart(localpart) {
            Some(handle) => UserKind::Virtual(handle.to_string()),
            None => UserKind::Regular,
        }
    }

    async fn ensure_identity(&self, user_id: &str) -> Result<()> {
        if self.registered.lock().contains(user_id) {
            return Ok(());
        }
        self.transport.ensure_registered(user_id).await?;
        self.registered.lock().insert(user_id.to_string());
        Ok(())
    }

    pub async fn bot(&self) -> Arc<dyn Intent> {
        self.transport.intent(&self.bot_user_id()).await
    }

    /// Returns the virtual user for `handle`, creating it on first use.
    pub async fn ghost(&self, handle: &str) -> Result<Arc<dyn Intent>> {
        let user_id = self.virtual_user_id(handle);
        self.ensure_identity(&user_id).await?;
        Ok(self.transport.intent(&user_id).await)
    }

    /// Like [`Self::ghost`], and also asks the content source to re-check the
    /// profile in the background.
    pub async fn resolve(&self, handle: &str) -> Result<Arc<dyn Intent>> {
        let ghost = self.ghost(handle).await?;

        let content = self.content.clone();
        let refresh_handle = handle.to_string();
        tokio::spawn(async move {
            content.request_profile_refresh(&refresh_handle).await;
        });

        Ok(ghost)
    }

    /// The intent for a bridge-owned user, `None` for anybody else.
    pub async fn intent_for(&self, user_id: &str) -> Result<Option<Arc<dyn Intent>>> {
        match self.classify_user(user_id) {
            UserKind::Bot => Ok(Some(self.bot().await)),
            UserKind::Virtual(_) => {
                self.ensure_identity(user_id).await?;
                Ok(Some(self.transport.intent(user_id).await))
            }
            UserKind::Regular => Ok(None),
        }
    }

    pub async fn query(&self, user_id: &str) -> Result<Option<IdentityDescriptor>> {
        let handle = match self.classify_user(user_id) {
            UserKind::Bot => None,
            UserKind::Virtual(handle) => Some(handle),
            UserKind::Regular => return Ok(None),
        };
        self.ensure_identity(user_id).await?;
        debug!("answered identity query for {}", user_id);
        Ok(Some(IdentityDescriptor {
            user_id: user_id.to_string(),
            handle,
        }))
    }
}
