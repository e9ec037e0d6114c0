//! Telegram Bot API deserialization types.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct TgResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<TgResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgUpdate {
    pub update_id: i64,
    pub message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgMessage {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: TgChat,
    /// Unix seconds.
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<TgPhotoSize>>,
    pub video: Option<TgVideo>,
    #[serde(default)]
    pub entities: Vec<TgEntity>,
    pub reply_to_message: Option<Box<TgReplyRef>>,
}

/// Only the id of a replied-to message is needed.
#[derive(Debug, Deserialize)]
pub(crate) struct TgReplyRef {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct TgPhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct TgVideo {
    pub file_id: String,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgEntity {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TgChat {
    pub id: i64,
}

/// The part of a sent message the dispatcher cares about.
#[derive(Debug, Deserialize)]
pub(crate) struct TgSentMessage {
    pub message_id: i64,
}
