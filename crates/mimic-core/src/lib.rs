//! # mimic-core
//!
//! Core types, traits, configuration, decision engine and style statistics
//! for Mimic.

pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod sanitize;
pub mod style;
pub mod traits;
