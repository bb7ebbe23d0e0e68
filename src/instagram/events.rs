use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentProfile {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChangedField {
    DisplayName,
    Avatar,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn msgtype(self) -> &'static str {
        match self {
            Self::Image => "m.image",
            Self::Video => "m.video",
        }
    }

    pub fn mimetype(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaContent {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub content: MediaContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdatedEvent {
    pub account_handle: String,
    pub profile: ContentProfile,
    pub changed_field: ChangedField,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaEvent {
    pub account_handle: String,
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub caption: Option<String>,
    pub source_post_id: String,
    pub source_permalink: String,
    pub account_internal_id: String,
}

impl NewMediaEvent {
    /// The caption, unless missing or blank.
    pub fn caption_text(&self) -> Option<&str> {
        self.caption
            .as_deref()
            .filter(|caption| !caption.trim().is_empty())
    }
}

/// Notifications emitted by the polling side of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentEvent {
    ProfileUpdated(ProfileUpdatedEvent),
    NewMedia(NewMediaEvent),
}

impl ContentEvent {
    pub fn account_handle(&self) -> &str {
        match self {
            Self::ProfileUpdated(event) => &event.account_handle,
            Self::NewMedia(event) => &event.account_handle,
        }
    }
}
