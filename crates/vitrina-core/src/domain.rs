use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Long-poll update id. Strictly increasing within one bot's feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub i64);

/// Product id. Positive; dense `1..=N` after every delete.
pub type ProductId = u32;

/// Which of the two polling identities a message arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelName {
    Primary,
    Auxiliary,
}

impl ChannelName {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelName::Primary => "primary",
            ChannelName::Auxiliary => "auxiliary",
        }
    }

    /// Human label used in activity entries.
    pub fn label(self) -> &'static str {
        match self {
            ChannelName::Primary => "Bot principal",
            ChannelName::Auxiliary => "Bot auxiliar",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image size of an attached photo. Variants arrive ordered by
/// ascending resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhotoVariant {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sender_name: String,
    pub chat_id: ChatId,
    /// Unix seconds.
    pub timestamp: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoVariant>>,
    pub is_membership_event: bool,
}

impl Message {
    /// Text if present, else caption.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    /// Highest-resolution variant of the attached photo, if any.
    pub fn best_photo(&self) -> Option<&PhotoVariant> {
        self.photo.as_ref().and_then(|variants| variants.last())
    }
}

/// One envelope from the long-poll feed. Immutable once fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawUpdate {
    pub update_id: UpdateId,
    pub message: Option<Message>,
}

/// Result of the identity handshake for one credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_primary: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_secondary: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEntryKind {
    Sent,
    Received,
    System,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChatEntryKind,
    pub sender: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}
