//! # mimic-memory
//!
//! Persistent state for Mimic (SQLite-backed): conversation contexts,
//! processed events, the reply ledger, the local queue, dead letters and the
//! audit log.

pub mod audit;
pub mod cache;
pub mod store;

pub use audit::AuditLogger;
pub use cache::ContextCache;
pub use store::Store;
