use super::error::{RelayError, RelayResult};
use super::message::{Message, MessageFilter, NewMessage};
use super::store::{MessageCounts, MessageStore};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Default lifetime of a pending request.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 30;

/// Tunables for a `Broker` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerOptions {
    pub response_timeout: Duration,
    /// Log cap; `0` keeps every message for the life of the process.
    pub max_messages: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS),
            max_messages: 0,
        }
    }
}

/// Snapshot returned by `Broker::status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerStatus {
    pub messages: MessageCounts,
    pub pending_requests: usize,
    /// Seconds since the broker was created.
    pub uptime: u64,
    pub timeout_secs: u64,
}

/// Successful outcome of a request/response rendezvous.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub id: String,
    pub response: Value,
}

#[derive(Debug)]
struct PendingRequest {
    agent_id: String,
    deadline: Instant,
    sender: oneshot::Sender<Value>,
}

#[derive(Debug, Default)]
struct BrokerState {
    store: MessageStore,
    pending: HashMap<String, PendingRequest>,
}

/// Message store plus request/response correlator.
///
/// A single mutex guards both the log and the pending table, so
/// "find first match then consume" and "find pending then resolve"
/// are each one critical section.
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<Mutex<BrokerState>>,
    options: BrokerOptions,
    started_at: std::time::Instant,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_options(BrokerOptions::default())
    }

    pub fn with_options(options: BrokerOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerState::default())),
            options,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn options(&self) -> BrokerOptions {
        self.options
    }

    /// Append a fire-and-forget message and return its id.
    pub fn send(&self, new: NewMessage) -> String {
        let mut state = self.lock_state();
        let message = state.store.append(new);
        let id = message.id.clone();
        tracing::info!(
            id = %id,
            agent_id = %message.agent_id,
            tags = ?message.tags,
            "message sent"
        );
        self.enforce_retention_locked(&mut state);
        id
    }

    /// Return the first unconsumed match, consuming it when `consume` is set.
    pub fn receive(&self, filter: &MessageFilter, consume: bool) -> Option<Message> {
        let received = self.lock_state().store.receive(filter, consume);
        tracing::debug!(
            matched = received.as_ref().map(|m| m.id.as_str()),
            consume,
            "receive"
        );
        received
    }

    /// Return every unconsumed match without consuming anything.
    pub fn check(&self, filter: &MessageFilter) -> Vec<Message> {
        let messages = self.lock_state().store.check(filter);
        tracing::debug!(matched = messages.len(), "check");
        messages
    }

    /// Look up a retained message by id, consumed or not.
    pub fn get(&self, id: &str) -> Option<Message> {
        self.lock_state().store.get(id).cloned()
    }

    /// Append a message flagged `awaiting_response` and register its pending entry.
    ///
    /// The returned handle must be awaited to observe the answer; dropping it
    /// withdraws the pending entry.
    pub fn register_request(&self, new: NewMessage) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        let deadline = Instant::now() + self.options.response_timeout;
        let mut state = self.lock_state();
        let message = state.store.push(Message::from_new(new, true));
        let id = message.id.clone();
        let agent_id = message.agent_id.clone();
        tracing::info!(
            id = %id,
            agent_id = %agent_id,
            tags = ?message.tags,
            timeout_secs = self.options.response_timeout.as_secs(),
            "request registered"
        );
        state.pending.insert(
            id.clone(),
            PendingRequest {
                agent_id,
                deadline,
                sender,
            },
        );
        self.enforce_retention_locked(&mut state);
        drop(state);

        PendingResponse {
            id,
            timeout: self.options.response_timeout,
            deadline,
            receiver,
            state: Arc::clone(&self.inner),
        }
    }

    /// Append a request and wait for its answer or the response timeout.
    pub async fn send_and_wait(&self, new: NewMessage) -> RelayResult<Resolved> {
        let pending = self.register_request(new);
        let id = pending.id().to_string();
        let response = pending.wait().await?;
        Ok(Resolved { id, response })
    }

    /// Resolve the pending request `request_id` exactly once.
    ///
    /// Records the answer in the log and returns that record. Unknown,
    /// already-answered and expired ids all yield `NotFound`; an expired
    /// entry is dropped even if its waiter has not observed the deadline yet.
    pub fn respond(
        &self,
        request_id: &str,
        responder_id: &str,
        content: Value,
    ) -> RelayResult<Message> {
        let mut state = self.lock_state();
        let Some(pending) = state.pending.remove(request_id) else {
            tracing::warn!(request_id, responder_id, "respond for unknown or settled request");
            return Err(RelayError::NotFound {
                request_id: request_id.to_string(),
            });
        };

        let now = Instant::now();
        if now >= pending.deadline {
            tracing::warn!(
                request_id,
                responder_id,
                requester = %pending.agent_id,
                "respond after deadline"
            );
            return Err(RelayError::NotFound {
                request_id: request_id.to_string(),
            });
        }

        let record = state
            .store
            .push(Message::response(request_id, responder_id, content.clone()))
            .clone();
        let remaining_ms =
            u64::try_from(pending.deadline.saturating_duration_since(now).as_millis())
                .unwrap_or(u64::MAX);
        if pending.sender.send(content).is_err() {
            tracing::debug!(request_id, "waiter already gone when response arrived");
        }
        tracing::info!(
            request_id,
            responder_id,
            requester = %pending.agent_id,
            remaining_ms,
            "request resolved"
        );
        self.enforce_retention_locked(&mut state);
        Ok(record)
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.lock_state().pending.contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn status(&self) -> BrokerStatus {
        let state = self.lock_state();
        BrokerStatus {
            messages: state.store.counts(),
            pending_requests: state.pending.len(),
            uptime: self.started_at.elapsed().as_secs(),
            timeout_secs: self.options.response_timeout.as_secs(),
        }
    }

    fn enforce_retention_locked(&self, state: &mut BrokerState) {
        let BrokerState { store, pending } = state;
        let evicted = store.enforce_limit(self.options.max_messages, |id| pending.contains_key(id));
        if evicted > 0 {
            tracing::debug!(evicted, retained = store.len(), "message log trimmed");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock()
    }
}

/// Caller side of a registered request.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    timeout: Duration,
    deadline: Instant,
    receiver: oneshot::Receiver<Value>,
    state: Arc<Mutex<BrokerState>>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for `respond` or the deadline, whichever settles first.
    ///
    /// The deadline is fixed at registration, not at the first poll.
    pub async fn wait(mut self) -> RelayResult<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(response)) => Ok(response),
            // `respond` drops the sender of an expired entry without sending.
            Ok(Err(_)) if Instant::now() >= self.deadline => Err(self.timeout_error()),
            Ok(Err(_)) => Err(RelayError::Closed {
                request_id: self.id.clone(),
            }),
            Err(_) => {
                // The deadline fired; whoever removes the entry under the lock wins.
                let withdrawn = self.state.lock().pending.remove(&self.id).is_some();
                if withdrawn {
                    tracing::warn!(
                        id = %self.id,
                        timeout_secs = self.timeout.as_secs(),
                        "request timed out"
                    );
                    return Err(self.timeout_error());
                }
                self.receiver.try_recv().map_err(|_| self.timeout_error())
            }
        }
    }

    fn timeout_error(&self) -> RelayError {
        RelayError::Timeout {
            request_id: self.id.clone(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.state.lock().pending.remove(&self.id).is_some() {
            tracing::debug!(id = %self.id, "pending request withdrawn by caller");
        }
    }
}
