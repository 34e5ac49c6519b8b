//! Polling synchronizer for support-ticket chat threads.
//!
//! Each open thread runs a poll loop that re-fetches the full message list on
//! a fixed interval and replaces the local cache wholesale. Sends go through
//! the same resource client and schedule one quick out-of-band refresh so the
//! sender sees their own message before the next tick. A monotonic fetch
//! sequence guard keeps a slow fetch from overwriting a newer one, and
//! closing a thread discards any late results from requests still in flight.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use market_core::{
    ChatChannelError, ChatChannels, ChatCommand, ChatEvent, ClientError, ErrorCategory, EventStream,
    Message, NewMessage, SendReceipt, ThreadCache, ThreadPhase, ThreadSignal, ThreadSyncState,
    Ticket, TicketStatus,
};
use market_rest::ResourceClient;
use market_transport::Transport;
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const MESSAGES_COLLECTION: &str = "ticket_messages";
const TICKETS_COLLECTION: &str = "tickets";
const SERVER_PAGE_LIMIT_CAP: u32 = 500;
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Tuning for the per-thread polling loop.
#[derive(Debug, Clone, Copy)]
pub struct TicketFeedConfig {
    /// Steady-state re-fetch interval.
    pub poll_interval: Duration,
    /// Delay before the out-of-band refresh that follows a send.
    pub send_refresh_delay: Duration,
    /// Requested page size for poll fetches, clamped against server caps.
    pub page_limit: u32,
}

impl Default for TicketFeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            send_refresh_delay: Duration::from_millis(500),
            page_limit: 200,
        }
    }
}

#[derive(Debug)]
struct ThreadState {
    cache: ThreadCache,
    machine: ThreadSyncState,
}

#[derive(Debug)]
struct ThreadShared {
    state: StdMutex<ThreadState>,
    fetch_seq: AtomicU64,
}

impl ThreadShared {
    fn new() -> Self {
        Self {
            state: StdMutex::new(ThreadState {
                cache: ThreadCache::new(),
                machine: ThreadSyncState::default(),
            }),
            fetch_seq: AtomicU64::new(0),
        }
    }

    /// Reserve the next fetch sequence number before the request goes out.
    fn next_fetch_seq(&self) -> u64 {
        self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[derive(Debug)]
struct OpenThread {
    stop: CancellationToken,
    task: JoinHandle<()>,
    shared: Arc<ThreadShared>,
}

/// Polling synchronizer over one resource client.
pub struct TicketFeed<T: Transport + 'static> {
    client: ResourceClient<T>,
    config: TicketFeedConfig,
    event_tx: broadcast::Sender<ChatEvent>,
    threads: Mutex<HashMap<String, OpenThread>>,
}

impl<T: Transport + 'static> TicketFeed<T> {
    pub fn new(
        client: ResourceClient<T>,
        config: TicketFeedConfig,
        event_tx: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            client,
            config,
            event_tx,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// Open a ticket thread: fetch immediately, then re-fetch on a fixed
    /// interval, replacing the cache wholesale each time.
    pub async fn open(&self, ticket_id: &str) -> Result<(), ClientError> {
        let mut threads = self.threads.lock().await;
        if threads.contains_key(ticket_id) {
            return Err(ClientError::new(
                ErrorCategory::Input,
                "thread_already_open",
                format!("thread '{ticket_id}' is already open"),
            ));
        }

        let shared = Arc::new(ThreadShared::new());
        let stop = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.client.clone(),
            self.config,
            ticket_id.to_owned(),
            Arc::clone(&shared),
            stop.child_token(),
            self.event_tx.clone(),
        ));

        threads.insert(
            ticket_id.to_owned(),
            OpenThread { stop, task, shared },
        );
        debug!(%ticket_id, "thread opened");
        Ok(())
    }

    /// Send a chat message into an open thread.
    ///
    /// A body that is empty after trimming is a silent no-op returning
    /// `Ok(None)` with zero network calls. Otherwise the message is inserted
    /// and one out-of-band refresh is scheduled, whatever the send outcome,
    /// so local state reconciles with the server.
    pub async fn send(
        &self,
        ticket_id: &str,
        author_id: &str,
        body: &str,
        is_privileged: bool,
    ) -> Result<Option<Message>, ClientError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let shared = {
            let threads = self.threads.lock().await;
            threads
                .get(ticket_id)
                .map(|thread| Arc::clone(&thread.shared))
        }
        .ok_or_else(|| {
            ClientError::new(
                ErrorCategory::Input,
                "thread_not_open",
                format!("thread '{ticket_id}' is not open"),
            )
        })?;

        shared.with_state(|state| state.machine.apply(ThreadSignal::SendStarted))?;

        let record = NewMessage {
            ticket_id: ticket_id.to_owned(),
            author_id: author_id.to_owned(),
            body: trimmed.to_owned(),
            is_privileged,
        };
        let inserted = self.client.insert(MESSAGES_COLLECTION, &record).await;

        shared.with_state(|state| {
            let _ = state.machine.apply(ThreadSignal::SendSettled);
        });
        self.schedule_refresh(ticket_id, shared);

        let created: Message = serde_json::from_value(inserted?).map_err(|err| {
            ClientError::new(ErrorCategory::Deserialize, "decode_error", err.to_string())
        })?;
        Ok(Some(created))
    }

    /// Close a ticket thread; idempotent.
    ///
    /// Cancels the poll timer. In-flight requests are not cancelled, but
    /// their late results are discarded by the sequence guard and the
    /// stopped state machine.
    pub async fn close(&self, ticket_id: &str) {
        let removed = {
            let mut threads = self.threads.lock().await;
            threads.remove(ticket_id)
        };
        let Some(open) = removed else {
            return;
        };

        open.shared.with_state(|state| {
            let _ = state.machine.apply(ThreadSignal::Stop);
        });
        open.stop.cancel();
        let _ = open.task.await;

        debug!(%ticket_id, "thread closed");
        let _ = self.event_tx.send(ChatEvent::ThreadClosed {
            ticket_id: ticket_id.to_owned(),
        });
    }

    /// Current lifecycle phase of an open thread.
    pub async fn phase(&self, ticket_id: &str) -> Option<ThreadPhase> {
        let threads = self.threads.lock().await;
        threads
            .get(ticket_id)
            .map(|thread| thread.shared.with_state(|state| state.machine.phase()))
    }

    /// Current cached messages of an open thread, in display order.
    pub async fn messages(&self, ticket_id: &str) -> Option<Vec<Message>> {
        let threads = self.threads.lock().await;
        threads
            .get(ticket_id)
            .map(|thread| thread.shared.with_state(|state| state.cache.messages().to_vec()))
    }

    /// Fetch the customer's support tickets, newest first.
    pub async fn list_tickets(&self, customer_id: &str) -> Result<Vec<Ticket>, ClientError> {
        self.client
            .collection(TICKETS_COLLECTION)
            .filter("customer_id", customer_id)
            .order_by("created_at")
            .fetch::<Ticket>()
            .await
    }

    /// Update a ticket's status (admin action). The server echoes no row
    /// back on update, by contract.
    pub async fn set_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<(), ClientError> {
        self.client
            .update(TICKETS_COLLECTION, serde_json::json!({ "status": status }))
            .filter("id", ticket_id)
            .await
    }

    fn schedule_refresh(&self, ticket_id: &str, shared: Arc<ThreadShared>) {
        let client = self.client.clone();
        let config = self.config;
        let ticket_id = ticket_id.to_owned();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config.send_refresh_delay).await;
            fetch_and_apply(&client, &config, &ticket_id, &shared, &event_tx).await;
        });
    }
}

async fn poll_loop<T: Transport + 'static>(
    client: ResourceClient<T>,
    config: TicketFeedConfig,
    ticket_id: String,
    shared: Arc<ThreadShared>,
    stop: CancellationToken,
    event_tx: broadcast::Sender<ChatEvent>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately, giving the initial fetch.
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                fetch_and_apply(&client, &config, &ticket_id, &shared, &event_tx).await;
            }
        }
    }
}

async fn fetch_and_apply<T: Transport + 'static>(
    client: &ResourceClient<T>,
    config: &TicketFeedConfig,
    ticket_id: &str,
    shared: &ThreadShared,
    event_tx: &broadcast::Sender<ChatEvent>,
) {
    let seq = shared.next_fetch_seq();
    let limit = ThreadCache::bounded_page_limit(config.page_limit, SERVER_PAGE_LIMIT_CAP);

    let fetched = client
        .collection(MESSAGES_COLLECTION)
        .filter("ticket_id", ticket_id)
        .order_by_asc("created_at")
        .limit(limit)
        .fetch::<Message>()
        .await;

    match fetched {
        Ok(messages) => {
            let applied = shared.with_state(|state| {
                if state.machine.phase() == ThreadPhase::Stopped {
                    return None;
                }
                if !state.cache.apply_snapshot(seq, messages) {
                    return None;
                }
                let _ = state.machine.apply(ThreadSignal::FetchApplied);
                Some(state.cache.messages().to_vec())
            });

            match applied {
                Some(messages) => {
                    let _ = event_tx.send(ChatEvent::ThreadSnapshot {
                        ticket_id: ticket_id.to_owned(),
                        messages,
                    });
                }
                None => debug!(%ticket_id, seq, "discarded stale or post-close fetch result"),
            }
        }
        Err(error) => {
            let stopped = shared.with_state(|state| {
                if state.machine.phase() == ThreadPhase::Stopped {
                    return true;
                }
                let _ = state.machine.apply(ThreadSignal::FetchFailed);
                false
            });
            if !stopped {
                warn!(%ticket_id, %error, "thread fetch failed; keeping previous snapshot");
                let _ = event_tx.send(ChatEvent::ThreadFetchFailed {
                    ticket_id: ticket_id.to_owned(),
                    error,
                });
            }
        }
    }
}

/// Handle for sending commands to and receiving events from a running chat
/// runtime.
#[derive(Clone)]
pub struct ChatRuntimeHandle {
    channels: ChatChannels,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Queue a send with a fresh client transaction ID.
    ///
    /// Returns the transaction ID echoed in the matching
    /// [`ChatEvent::SendReceipt`].
    pub async fn send_message(
        &self,
        ticket_id: impl Into<String>,
        author_id: impl Into<String>,
        body: impl Into<String>,
        is_privileged: bool,
    ) -> Result<String, ChatChannelError> {
        let client_txn_id = Uuid::new_v4().to_string();
        self.channels
            .send_command(ChatCommand::SendMessage {
                ticket_id: ticket_id.into(),
                client_txn_id: client_txn_id.clone(),
                author_id: author_id.into(),
                body: body.into(),
                is_privileged,
            })
            .await?;
        Ok(client_txn_id)
    }
}

/// Spawn the chat runtime on the current tokio runtime.
pub fn spawn_runtime<T: Transport + 'static>(
    client: ResourceClient<T>,
    config: TicketFeedConfig,
) -> ChatRuntimeHandle {
    let (channels, command_rx) = ChatChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let feed = TicketFeed::new(client, config, channels.event_sender());
    let runtime = ChatRuntime { command_rx, feed };
    let handle_channels = channels.clone();
    tokio::spawn(async move {
        runtime.run(channels).await;
    });

    ChatRuntimeHandle {
        channels: handle_channels,
    }
}

struct ChatRuntime<T: Transport + 'static> {
    command_rx: mpsc::Receiver<ChatCommand>,
    feed: TicketFeed<T>,
}

impl<T: Transport + 'static> ChatRuntime<T> {
    async fn run(mut self, channels: ChatChannels) {
        while let Some(command) = self.command_rx.recv().await {
            match command {
                ChatCommand::OpenThread { ticket_id } => {
                    if let Err(error) = self.feed.open(&ticket_id).await {
                        warn!(%ticket_id, %error, "open thread command failed");
                        channels.emit(ChatEvent::RuntimeError {
                            code: error.code,
                            message: error.message,
                        });
                    }
                }
                ChatCommand::SendMessage {
                    ticket_id,
                    client_txn_id,
                    author_id,
                    body,
                    is_privileged,
                } => {
                    match self
                        .feed
                        .send(&ticket_id, &author_id, &body, is_privileged)
                        .await
                    {
                        Ok(Some(message)) => channels.emit(ChatEvent::SendReceipt(
                            SendReceipt::success(client_txn_id, message.id),
                        )),
                        // Empty body: silently ignored, no receipt.
                        Ok(None) => {}
                        Err(error) => channels.emit(ChatEvent::SendReceipt(
                            SendReceipt::failure(client_txn_id, &error),
                        )),
                    }
                }
                ChatCommand::CloseThread { ticket_id } => {
                    self.feed.close(&ticket_id).await;
                }
            }
        }
    }
}
