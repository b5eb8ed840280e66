//! The conversational core of chatrelay.
//!
//! A user message flows through four pieces:
//!
//! 1. **Relay** routes it to the conversation's actor task
//! 2. **ContextWindow** holds the bounded history with its pinned prefix
//! 3. **DispatchLoop** asks the model, runs any requested lookups and
//!    loops until an answer (or the depth bound) is reached
//! 4. **BackfillEngine** keeps the persisted log in step with the platform
//!
//! The loop is bounded: at most `max_tool_depth` tool rounds, after which a
//! fixed fallback answer is returned.

pub mod backfill;
pub mod directive;
pub mod dispatch;
pub mod relay;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use backfill::{BackfillEngine, BackfillError, BackfillReport, CancellationSignal, Shutdown};
pub use directive::parse_directives;
pub use dispatch::{DispatchLoop, DispatchOutcome, TerminalState};
pub use relay::{InboundMessage, Relay};
pub use window::ContextWindow;
