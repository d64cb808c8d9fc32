//! Everything between a canonical request and the external completion
//! service: persona selection, prompt building, the HTTP provider, the
//! retrying client adapter, and reply sanitization.

pub mod client;
pub mod error;
pub mod model;
pub mod persona;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod sanitize;

pub use {
    client::AiClient,
    error::{Error, Result},
    model::{ChatMessage, CompletionResponse, LlmProvider},
    persona::{Persona, PersonaCatalog},
    retry::RetryPolicy,
};
