//! Bot API payloads -> engine domain types.

use teloxide::types::{Message as TgMessage, Update, UpdateKind};

use vitrina_core::domain::{ChatId, Message, PhotoVariant, RawUpdate, UpdateId};

const UNKNOWN_SENDER: &str = "Desconocido";

pub fn raw_update(update: &Update) -> RawUpdate {
    let message = match &update.kind {
        UpdateKind::Message(msg) => Some(message(msg)),
        _ => None,
    };
    RawUpdate {
        update_id: UpdateId(update.id as i64),
        message,
    }
}

pub fn message(msg: &TgMessage) -> Message {
    let sender_name = msg
        .from()
        .map(|u| u.full_name())
        .or_else(|| msg.chat.title().map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let photo = msg.photo().map(|sizes| {
        sizes
            .iter()
            .map(|p| PhotoVariant {
                file_id: p.file.id.clone(),
                width: p.width,
                height: p.height,
            })
            .collect()
    });

    let is_membership_event = msg.new_chat_members().is_some_and(|m| !m.is_empty())
        || msg.left_chat_member().is_some();

    Message {
        sender_name,
        chat_id: ChatId(msg.chat.id.0),
        timestamp: msg.date.timestamp(),
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        photo,
        is_membership_event,
    }
}
