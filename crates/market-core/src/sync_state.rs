use crate::error::{ClientError, ErrorCategory};

/// Lifecycle phase of one open ticket thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// First fetch in flight; nothing to show yet.
    Loading,
    /// Cache populated from the last successful fetch.
    Synced,
    /// A send request is in flight; the previous cache stays visible.
    SendPending,
    /// The last fetch failed; the previous cache is retained and polling
    /// continues.
    Degraded,
    /// The thread view was closed. Terminal.
    Stopped,
}

/// Observed lifecycle signals fed into the per-thread state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSignal {
    /// A fetch result passed the sequence guard and replaced the cache.
    FetchApplied,
    /// A fetch failed after the client's internal retries.
    FetchFailed,
    /// A send request started.
    SendStarted,
    /// The in-flight send finished, successfully or not.
    SendSettled,
    /// The thread view was closed.
    Stop,
}

/// Per-thread sync state machine.
///
/// `Stopped` is terminal: signals arriving after stop come from in-flight
/// work for a closed thread and are ignored rather than treated as errors.
#[derive(Debug, Clone)]
pub struct ThreadSyncState {
    phase: ThreadPhase,
}

impl Default for ThreadSyncState {
    fn default() -> Self {
        Self {
            phase: ThreadPhase::Loading,
        }
    }
}

impl ThreadSyncState {
    pub fn phase(&self) -> ThreadPhase {
        self.phase
    }

    /// Apply a signal; returns `true` when the phase changed.
    pub fn apply(&mut self, signal: ThreadSignal) -> Result<bool, ClientError> {
        use ThreadPhase::*;
        use ThreadSignal::*;

        if self.phase == Stopped {
            return Ok(false);
        }

        match signal {
            Stop => Ok(self.set(Stopped)),
            FetchApplied => match self.phase {
                // A poll landing during a send does not end the send.
                SendPending => Ok(false),
                _ => Ok(self.set(Synced)),
            },
            FetchFailed => match self.phase {
                SendPending => Ok(false),
                _ => Ok(self.set(Degraded)),
            },
            SendStarted => match self.phase {
                SendPending => Err(ClientError::new(
                    ErrorCategory::Input,
                    "send_already_pending",
                    "a send is already in flight for this thread",
                )),
                _ => Ok(self.set(SendPending)),
            },
            SendSettled => match self.phase {
                SendPending => Ok(self.set(Synced)),
                _ => Err(ClientError::new(
                    ErrorCategory::Internal,
                    "send_not_pending",
                    "send settled while no send was in flight",
                )),
            },
        }
    }

    fn set(&mut self, next: ThreadPhase) -> bool {
        let changed = self.phase != next;
        self.phase = next;
        changed
    }
}
