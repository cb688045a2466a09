//! Collaborator ports consumed by the engine.
//!
//! The Telegram adapter implements [`Transport`] and [`IdentityPort`]; the
//! storage and display adapters live in [`crate::storage`] and
//! [`crate::display`]. Each channel gets its own transport instance bound to
//! its own credential.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    activity::ActivityEntry,
    domain::{BotIdentity, ChatHistoryEntry, Product, ProductId, RawUpdate},
    Result,
};

/// Long-poll transport for one credential.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch updates starting at `offset`, waiting up to `timeout` server-side.
    ///
    /// `Ok(None)` is the upstream null/empty sentinel; `Ok(Some(vec![]))` is a
    /// normal idle poll. Structured API failures surface as
    /// [`crate::Error::Api`], transport failures as [`crate::Error::Network`].
    async fn get_updates(&self, offset: i64, timeout: Duration)
        -> Result<Option<Vec<RawUpdate>>>;

    /// Resolve an opaque file id into a downloadable URL for this credential.
    async fn file_url(&self, file_id: &str) -> Result<String>;
}

/// Identity handshake for one credential.
#[async_trait]
pub trait IdentityPort: Send + Sync {
    async fn who_am_i(&self) -> Result<BotIdentity>;
}

/// Key-value persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Everything the engine pushes to the user-facing surface.
///
/// Calls are fire-and-forget; implementations must not block on I/O for long.
pub trait DisplayPort: Send + Sync {
    fn render_or_update_product(&self, product: &Product);
    fn remove_product(&self, id: ProductId);
    fn set_ticker(&self, text: Option<&str>);
    fn show_banner(&self, text: &str);
    fn set_connection_state(&self, connected: bool);
    fn trigger_promotion(&self, attempts: u32, win_hour: u8, code: &str);
    fn set_payment_card(&self, digits: Option<&str>);
    fn append_chat(&self, entry: &ChatHistoryEntry);
    fn clear_chat(&self);
    fn log_activity(&self, entry: &ActivityEntry);
}
