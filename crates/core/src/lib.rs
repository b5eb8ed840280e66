//! # chatrelay core
//!
//! Domain types, traits, and error definitions for the chatrelay runtime.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the completion service
//! ([`CompletionProvider`]), the chat platform's read API ([`ChatPlatform`]),
//! capability providers ([`CapabilityProvider`]) and inbound channels
//! ([`Channel`]). Implementations live in their respective crates, so the
//! agent crate can be tested end-to-end against scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod platform;
pub mod tool;
pub mod record;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{ConversationId, Role, Turn};
pub use provider::{CompletionProvider, CompletionRequest, CompletionResponse};
pub use channel::{Channel, ChannelMessage, ChannelStream};
pub use platform::{ChannelInfo, ChannelRef, ChatPlatform, MemberInfo, PlatformMessage};
pub use tool::{CapabilityProvider, ToolDefinition, ToolDirective, ToolRegistry, ToolResult};
pub use record::{AuthorClass, PersistedRecord, RecordOrigin};
pub use event::{DomainEvent, EventBus};
