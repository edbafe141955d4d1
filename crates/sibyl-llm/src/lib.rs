//! Completion collaborator: prompt composition and the chat-completions
//! client with SSE token streaming.

pub mod client;
pub mod prompt;

pub use client::{CompletionClient, HttpCompletionClient, MockCompletionClient, TokenStream};
pub use prompt::{ChatPrompt, PromptMessage, PromptRole};
