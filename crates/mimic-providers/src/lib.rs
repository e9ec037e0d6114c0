//! # mimic-providers
//!
//! Reply generator backends for Mimic.

pub mod openai;

pub use openai::OpenAiGenerator;
