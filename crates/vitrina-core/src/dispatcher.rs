//! Routes classified messages to state mutations.
//!
//! Authorization is per channel: a message is only processed when it comes
//! from the chat bound to the channel that received it. Control commands are
//! accepted from either channel; plain messages only reach the shared chat
//! history from the primary channel.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    activity::{ActivityEntry, AuditLogger},
    catalog::UpsertKind,
    command::{classify, Command, ParseOutcome, Rejection, RemoteConfig},
    domain::{ChannelName, ChatEntryKind, ChatHistoryEntry, ChatId, Message},
    errors::Error,
    ports::Transport,
    shop::Shop,
    storage::keys,
    Result,
};

/// The channel a message arrived on, with what is needed to act on it.
#[derive(Clone)]
pub struct SourceChannel {
    pub name: ChannelName,
    pub chat_id: ChatId,
    pub transport: Arc<dyn Transport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A command was applied; carries the command name.
    Applied(&'static str),
    /// Chat message identical to the last entry; nothing stored.
    Duplicate,
    /// Plain message from the auxiliary channel; never shown in chat.
    AuxiliaryChat,
    /// Chat id does not match the channel's bound chat.
    Unauthorized,
    Rejected(Rejection),
    Ignored,
    Failed(String),
}

enum Applied {
    Done(String),
    Duplicate,
}

pub struct Dispatcher {
    shop: Arc<Shop>,
    audit: Arc<AuditLogger>,
    reconfigure: Option<mpsc::UnboundedSender<RemoteConfig>>,
}

impl Dispatcher {
    pub fn new(shop: Arc<Shop>, audit: Arc<AuditLogger>) -> Self {
        Self {
            shop,
            audit,
            reconfigure: None,
        }
    }

    /// Forward accepted remote config commands to the service supervisor.
    pub fn with_reconfigure(mut self, tx: mpsc::UnboundedSender<RemoteConfig>) -> Self {
        self.reconfigure = Some(tx);
        self
    }

    pub fn shop(&self) -> &Arc<Shop> {
        &self.shop
    }

    /// Authorize, classify and dispatch one message.
    pub async fn handle_message(&self, source: &SourceChannel, msg: &Message) -> DispatchOutcome {
        if msg.chat_id != source.chat_id {
            info!(
                channel = %source.name,
                chat_id = %msg.chat_id,
                expected = %source.chat_id,
                "ignoring message from unbound chat"
            );
            return DispatchOutcome::Unauthorized;
        }

        match classify(msg) {
            ParseOutcome::Command(command) => self.dispatch(command, source, msg).await,
            ParseOutcome::Rejected(reason) => {
                warn!(channel = %source.name, %reason, "control message rejected");
                self.record(ActivityEntry::warning(
                    source.name,
                    format!("Comando ignorado: {reason}"),
                ));
                DispatchOutcome::Rejected(reason)
            }
            ParseOutcome::Ignored => DispatchOutcome::Ignored,
        }
    }

    /// Apply one already-classified command from an authorized message.
    pub async fn dispatch(
        &self,
        command: Command,
        source: &SourceChannel,
        msg: &Message,
    ) -> DispatchOutcome {
        let name = command.name();

        if !command.is_control() && source.name != ChannelName::Primary {
            debug!(channel = %source.name, "plain message on auxiliary channel, not shown in chat");
            return DispatchOutcome::AuxiliaryChat;
        }

        match self.apply(command, source, msg).await {
            Ok(Applied::Done(text)) => {
                info!(channel = %source.name, command = name, "{text}");
                self.record(ActivityEntry::info(source.name, text));
                DispatchOutcome::Applied(name)
            }
            Ok(Applied::Duplicate) => {
                debug!(channel = %source.name, "duplicate chat entry suppressed");
                DispatchOutcome::Duplicate
            }
            Err(e) => {
                warn!(channel = %source.name, command = name, error = %e, "dispatch failed");
                self.record(ActivityEntry::warning(
                    source.name,
                    format!("Error en {name}: {e}"),
                ));
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    async fn apply(&self, command: Command, source: &SourceChannel, msg: &Message) -> Result<Applied> {
        let shop = &self.shop;
        let text = match command {
            Command::ClearHistory => {
                shop.clear_chat().await?;
                "Historial de chat eliminado".to_string()
            }
            Command::SetTicker(text) => {
                shop.set_ticker(&text).await?;
                if text.is_empty() {
                    "Panel superior vaciado".to_string()
                } else {
                    format!("Panel superior actualizado: {text}")
                }
            }
            Command::ShowNotification(text) => {
                shop.show_notification(&text);
                format!("Notificación mostrada: {text}")
            }
            Command::RouletteOffer {
                attempts,
                win_hour,
                code,
            } => {
                shop.trigger_promotion(attempts, win_hour, &code);
                format!("Ruleta activada: {attempts} intentos, hora ganadora {win_hour}:00")
            }
            Command::SetPaymentCard(digits) => {
                shop.set_payment_card(Some(&digits)).await?;
                "Tarjeta de pago actualizada".to_string()
            }
            Command::ClearPaymentCard => {
                shop.set_payment_card(None).await?;
                "Tarjeta de pago eliminada".to_string()
            }
            Command::DeleteProduct(id) => {
                let Some(moves) = shop.delete_product(id).await? else {
                    return Err(Error::NotFound(format!("producto {id}")));
                };
                if moves.is_empty() {
                    format!("Producto {id} eliminado")
                } else {
                    format!("Producto {id} eliminado, {} renumerados", moves.len())
                }
            }
            Command::UpsertProduct(draft) => {
                let image_url = resolve_photo(source, msg).await;
                let (kind, product) = shop.upsert_product(draft, image_url).await?;
                match kind {
                    UpsertKind::Inserted => {
                        format!("Producto {} agregado: {}", product.id, product.name)
                    }
                    UpsertKind::Updated => {
                        format!("Producto {} actualizado: {}", product.id, product.name)
                    }
                }
            }
            Command::RemoteConfig(remote) => {
                shop.storage()
                    .set(keys::REMOTE_CONFIG, json!(remote))
                    .await?;
                if let Some(tx) = &self.reconfigure {
                    if tx.send(remote).is_err() {
                        warn!("service supervisor is gone; new credentials apply on next start");
                    }
                }
                "Configuración de bots recibida".to_string()
            }
            Command::PlainMessage { text, image_url } => {
                let image_url = match image_url {
                    Some(url) => Some(url),
                    None => resolve_photo(source, msg).await,
                };
                let entry = ChatHistoryEntry {
                    text,
                    kind: ChatEntryKind::Received,
                    sender: msg.sender_name.clone(),
                    timestamp: msg.timestamp,
                    image_url,
                };
                if !shop.append_chat(entry).await? {
                    return Ok(Applied::Duplicate);
                }
                format!("Mensaje de {}", msg.sender_name)
            }
        };
        Ok(Applied::Done(text))
    }

    fn record(&self, entry: ActivityEntry) {
        self.shop.display().log_activity(&entry);
        if let Err(e) = self.audit.write(&entry) {
            warn!(error = %e, "failed to write audit entry");
        }
    }
}

/// URL of the highest-resolution attached photo, resolved on the receiving
/// channel's credential. Resolution failures degrade to no image.
async fn resolve_photo(source: &SourceChannel, msg: &Message) -> Option<String> {
    let best = msg.best_photo()?;
    match source.transport.file_url(&best.file_id).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(channel = %source.name, file_id = %best.file_id, error = %e, "photo resolution failed");
            None
        }
    }
}
