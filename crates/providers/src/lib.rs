//! Completion-service providers for chatrelay.
//!
//! All providers implement the `chatrelay_core::CompletionProvider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod retry;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryProvider;
pub use router::{build_from_config, ProviderRouter};
