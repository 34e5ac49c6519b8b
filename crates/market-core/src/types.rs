use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// One chat message row within a support-ticket thread.
///
/// Messages are append-only from the client's perspective; they are never
/// edited or deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned row ID.
    pub id: i64,
    /// Ticket thread this message belongs to.
    pub ticket_id: String,
    /// Author user ID (externally provided identity).
    pub author_id: String,
    /// Message text.
    pub body: String,
    /// Staff/admin flag, used for display only; carries no authorization
    /// semantics.
    pub is_privileged: bool,
    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new chat message.
///
/// `id` and `created_at` are assigned server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub ticket_id: String,
    pub author_id: String,
    pub body: String,
    pub is_privileged: bool,
}

/// Support-ticket lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Waiting on staff.
    Open,
    /// Staff replied; waiting on the customer.
    Answered,
    /// Conversation finished.
    Closed,
}

/// Support-ticket row used by the ticket list screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: String,
    pub customer_id: String,
    pub subject: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

/// Command channel input accepted by the chat runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Open a ticket thread and start its polling loop.
    OpenThread {
        /// Target ticket ID.
        ticket_id: String,
    },
    /// Send a chat message into an open thread.
    SendMessage {
        /// Target ticket ID.
        ticket_id: String,
        /// Caller-provided transaction ID echoed in `SendReceipt`.
        client_txn_id: String,
        /// Author user ID.
        author_id: String,
        /// Message body. Empty (after trimming) bodies are silently dropped.
        body: String,
        /// Staff/admin display flag.
        is_privileged: bool,
    },
    /// Stop the polling loop for a ticket thread. Idempotent.
    CloseThread {
        /// Target ticket ID.
        ticket_id: String,
    },
}

/// Acknowledgement for send commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    /// Original caller transaction ID.
    pub client_txn_id: String,
    /// Created message row ID on success.
    pub message_id: Option<i64>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

impl SendReceipt {
    /// Receipt for a send that produced a message row.
    pub fn success(client_txn_id: impl Into<String>, message_id: i64) -> Self {
        Self {
            client_txn_id: client_txn_id.into(),
            message_id: Some(message_id),
            error_code: None,
        }
    }

    /// Receipt for a failed send, carrying the stable error code.
    pub fn failure(client_txn_id: impl Into<String>, error: &ClientError) -> Self {
        Self {
            client_txn_id: client_txn_id.into(),
            message_id: None,
            error_code: Some(error.code.clone()),
        }
    }
}

/// Event channel output emitted by the chat feed and runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Wholesale replacement of a thread's message list.
    ThreadSnapshot {
        /// Source ticket ID.
        ticket_id: String,
        /// Messages in non-decreasing `created_at` order.
        messages: Vec<Message>,
    },
    /// A poll fetch failed after the client's internal retries.
    ///
    /// The previous snapshot stays valid; polling continues on the next tick.
    ThreadFetchFailed {
        /// Source ticket ID.
        ticket_id: String,
        /// Normalized fetch error.
        error: ClientError,
    },
    /// Send acknowledgement for `ChatCommand::SendMessage`.
    SendReceipt(SendReceipt),
    /// A thread's polling loop stopped.
    ThreadClosed {
        /// Source ticket ID.
        ticket_id: String,
    },
    /// A runtime command failed outside any send flow.
    RuntimeError {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}
