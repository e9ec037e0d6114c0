//! In-process cache of conversation contexts.

use mimic_core::context::ConversationContext;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Contexts keyed by chat id.
///
/// The consumer refreshes an entry after every successful save and drops it
/// when a cycle fails or is abandoned, so the next cycle reloads from the store.
#[derive(Default)]
pub struct ContextCache {
    entries: Mutex<HashMap<i64, ConversationContext>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map stays usable after a panic while the lock was held; every
    /// mutation is a single insert or remove.
    fn entries(&self) -> MutexGuard<'_, HashMap<i64, ConversationContext>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the cached context, if warm.
    pub fn get(&self, chat_id: i64) -> Option<ConversationContext> {
        self.entries().get(&chat_id).cloned()
    }

    pub fn put(&self, context: ConversationContext) {
        self.entries().insert(context.chat_id, context);
    }

    pub fn invalidate(&self, chat_id: i64) {
        self.entries().remove(&chat_id);
    }

    pub fn is_warm(&self, chat_id: i64) -> bool {
        self.entries().contains_key(&chat_id)
    }
}
