//! # mimic-channels
//!
//! Conversation transport for Mimic: Telegram update parsing, the Telegram
//! reply dispatcher and the ledger-guarded dispatch wrapper.

pub mod dispatch;
pub mod telegram;

pub use dispatch::GuardedDispatcher;
pub use telegram::{parse_update, TelegramDispatcher};
