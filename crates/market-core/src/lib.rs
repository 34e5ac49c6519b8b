//! Shared contract for the marketline storefront chat client.
//!
//! This crate defines the error model, retry policy, chat command/event
//! protocol, per-thread message cache, sync state machine, and common channel
//! abstractions. It performs no I/O.

/// Async command/event channel primitives.
pub mod channel;
/// Stable client error types and HTTP classification helpers.
pub mod error;
/// Fixed-delay retry policy applied to transport failures.
pub mod retry;
/// Per-thread sync lifecycle state machine.
pub mod sync_state;
/// Ordered per-thread message cache with a stale-fetch guard.
pub mod thread_cache;
/// Chat protocol types (commands, events, rows, payloads).
pub mod types;

pub use channel::{ChatChannelError, ChatChannels, EventStream};
pub use error::{ClientError, ErrorCategory, classify_http_status};
pub use retry::RetryPolicy;
pub use sync_state::{ThreadPhase, ThreadSignal, ThreadSyncState};
pub use thread_cache::ThreadCache;
pub use types::{
    ChatCommand, ChatEvent, Message, NewMessage, SendReceipt, Ticket, TicketStatus,
};
