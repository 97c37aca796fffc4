use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;

use super::event::SequencedEvent;
use crate::errors::SubscribeError;
use crate::session::SessionId;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Publish/subscribe keyed by session id.
///
/// Delivery is at-most-once and carries no ordering promise; consumers must
/// cope with drops, duplicates and reordering on their own.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Either fully succeeds, after which every event published on `topic`
    /// may reach the returned subscription, or fails without side effects.
    async fn subscribe(&self, topic: &SessionId) -> Result<Subscription, SubscribeError>;

    /// Fire-and-forget publish. Returns the number of subscribers that
    /// accepted the event.
    fn broadcast(&self, event: SequencedEvent) -> usize;

    /// Detaches every subscriber of `topic`; their subscriptions end once
    /// already-queued events are drained.
    fn close_topic(&self, topic: &SessionId) -> usize;

    fn subscriber_count(&self, topic: &SessionId) -> usize;
}

/// Receiving half of one subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: SessionId,
    receiver: mpsc::Receiver<SequencedEvent>,
}

impl Subscription {
    pub fn new(topic: SessionId, receiver: mpsc::Receiver<SequencedEvent>) -> Self {
        Self { topic, receiver }
    }

    pub fn topic(&self) -> &SessionId {
        &self.topic
    }

    /// `None` once the topic has been closed and the queue is empty.
    pub async fn recv(&mut self) -> Option<SequencedEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<SequencedEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Debug, Default)]
struct HubState {
    shut_down: bool,
    topics: HashMap<SessionId, Vec<mpsc::Sender<SequencedEvent>>>,
}

/// In-process hub. Each subscriber gets its own bounded queue; a full queue
/// drops the event for that subscriber only.
#[derive(Debug)]
pub struct LocalBroadcast {
    capacity: usize,
    state: StdMutex<HubState>,
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl LocalBroadcast {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: StdMutex::new(HubState::default()),
        }
    }

    /// Closes every topic and rejects all future subscriptions.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.shut_down = true;
        state.topics.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shut_down
    }
}

#[async_trait]
impl BroadcastChannel for LocalBroadcast {
    async fn subscribe(&self, topic: &SessionId) -> Result<Subscription, SubscribeError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.shut_down {
            return Err(SubscribeError::ChannelClosed);
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        state.topics.entry(topic.clone()).or_default().push(tx);
        tracing::debug!(session_id = %topic, "subscriber attached");
        Ok(Subscription::new(topic.clone(), rx))
    }

    fn broadcast(&self, event: SequencedEvent) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = state.topics.get_mut(&event.session_id) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::trace!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    "subscriber queue full; dropping event"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if subscribers.is_empty() {
            state.topics.remove(&event.session_id);
        }
        delivered
    }

    fn close_topic(&self, topic: &SessionId) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = state.topics.remove(topic).map(|subs| subs.len()).unwrap_or(0);
        if removed > 0 {
            tracing::debug!(session_id = %topic, removed, "topic closed");
        }
        removed
    }

    fn subscriber_count(&self, topic: &SessionId) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.get(topic).map(Vec::len).unwrap_or(0)
    }
}
