//! # mimic-queue
//!
//! The managed-queue side of Mimic. Ingestion publishes events to a Pub/Sub
//! topic; the push subscription delivers them back to `/queue/push` wrapped in
//! a [`PushEnvelope`], authenticated with a shared delivery token.

pub mod auth;
pub mod envelope;
pub mod pubsub;

pub use auth::{constant_time_eq, verify_push_token};
pub use envelope::{decode_push, encode_data, PushEnvelope, PushMessage};
pub use pubsub::PubSubPublisher;
