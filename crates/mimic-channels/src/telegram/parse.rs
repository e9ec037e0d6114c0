//! Webhook update → [`InboundEvent`].

use super::types::{TgMessage, TgUpdate};
use chrono::{DateTime, Utc};
use mimic_core::{
    error::MimicError,
    event::{contains_link, EventKind, InboundEvent},
};

/// Parse a raw webhook body into an event.
///
/// Anything that is not a plain `message` update with a sender is
/// `MalformedInput`: edits, channel posts and service updates are not events.
pub fn parse_update(body: &[u8]) -> Result<InboundEvent, MimicError> {
    let update: TgUpdate = serde_json::from_slice(body)
        .map_err(|e| MimicError::MalformedInput(format!("invalid update json: {e}")))?;

    let message = update.message.ok_or_else(|| {
        MimicError::MalformedInput(format!("update {} carries no message", update.update_id))
    })?;

    let sender = message.from.as_ref().ok_or_else(|| {
        MimicError::MalformedInput(format!("update {} has no sender", update.update_id))
    })?;

    let timestamp = DateTime::<Utc>::from_timestamp(message.date, 0).ok_or_else(|| {
        MimicError::MalformedInput(format!("update {} has a bad date", update.update_id))
    })?;

    let sender_name = match (&sender.first_name, &sender.last_name) {
        (first, Some(last)) if !first.is_empty() => Some(format!("{first} {last}")),
        (first, _) if !first.is_empty() => Some(first.clone()),
        _ => None,
    };

    Ok(InboundEvent {
        event_id: update.update_id,
        chat_id: message.chat.id,
        sender_id: sender.id,
        sender_name,
        text: message_text(&message),
        timestamp,
        kind: classify(&message),
        message_id: Some(message.message_id),
        sender_username: sender.username.clone(),
        sender_is_bot: sender.is_bot,
        reply_to_message_id: message.reply_to_message.as_ref().map(|r| r.message_id),
    })
}

/// Text, or the caption on media.
fn message_text(message: &TgMessage) -> String {
    message
        .text
        .clone()
        .or_else(|| message.caption.clone())
        .unwrap_or_default()
}

fn classify(message: &TgMessage) -> EventKind {
    if message.photo.as_ref().is_some_and(|p| !p.is_empty()) {
        return EventKind::Photo;
    }
    if message.video.is_some() {
        return EventKind::Video;
    }
    match &message.text {
        Some(text) => {
            let has_url_entity = message
                .entities
                .iter()
                .any(|e| e.kind == "url" || e.kind == "text_link");
            if has_url_entity || contains_link(text) {
                EventKind::Link
            } else {
                EventKind::Text
            }
        }
        None => EventKind::Other,
    }
}
