//! Providers module - inference endpoints
//!
//! This module defines the [`InferenceProvider`] trait and common types for
//! talking to an inference endpoint. The orchestration engine never speaks
//! HTTP itself; it goes through this trait, which keeps the scheduler
//! testable against scripted providers.
//!
//! # Example
//!
//! ```rust,ignore
//! use roundtable::providers::{ChatOptions, InferenceProvider, OpenAiProvider, PromptMessage};
//!
//! async fn example() {
//!     let provider = OpenAiProvider::new("http://127.0.0.1:1234/v1", "local-model");
//!     let reply = provider
//!         .complete(vec![PromptMessage::user("Who speaks next?")], ChatOptions::new())
//!         .await
//!         .unwrap();
//!     println!("{}", reply);
//! }
//! ```

pub mod openai;
mod types;

pub use openai::OpenAiProvider;
pub use types::{
    CancelToken, ChatOptions, GenerationOutput, InferenceProvider, PromptMessage, PromptRole,
    TokenSink, ToolDefinition, ToolRequest,
};
