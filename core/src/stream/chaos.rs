use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::broadcast::BroadcastChannel;
use super::broadcast::Subscription;
use super::event::SequencedEvent;
use crate::errors::SubscribeError;
use crate::session::SessionId;

/// Fault injection knobs for [`ChaosBroadcast`]. Rates are probabilities in
/// `[0, 1]`; out-of-range values are clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChaosConfig {
    pub drop_rate: f64,
    pub reorder_rate: f64,
    pub seed: Option<u64>,
}

impl ChaosConfig {
    pub fn is_noop(&self) -> bool {
        self.drop_rate <= 0.0 && self.reorder_rate <= 0.0
    }
}

/// Wraps a channel and makes delivery worse: events are dropped at random,
/// and an event may be held back so that it is published right after the
/// next one on the same topic.
pub struct ChaosBroadcast<C> {
    inner: C,
    drop_rate: f64,
    reorder_rate: f64,
    rng: StdMutex<StdRng>,
    held: StdMutex<HashMap<SessionId, SequencedEvent>>,
}

impl<C: BroadcastChannel> ChaosBroadcast<C> {
    pub fn new(inner: C, config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            inner,
            drop_rate: config.drop_rate.clamp(0.0, 1.0),
            reorder_rate: config.reorder_rate.clamp(0.0, 1.0),
            rng: StdMutex::new(rng),
            held: StdMutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random::<f64>() < rate
    }
}

#[async_trait]
impl<C: BroadcastChannel> BroadcastChannel for ChaosBroadcast<C> {
    async fn subscribe(&self, topic: &SessionId) -> Result<Subscription, SubscribeError> {
        self.inner.subscribe(topic).await
    }

    fn broadcast(&self, event: SequencedEvent) -> usize {
        if self.roll(self.drop_rate) {
            tracing::trace!(
                session_id = %event.session_id,
                sequence = event.sequence,
                "chaos: dropping event"
            );
            return 0;
        }

        let topic = event.session_id.clone();
        let previously_held = {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            match held.remove(&topic) {
                Some(prior) => Some(prior),
                None => {
                    if self.roll(self.reorder_rate) {
                        tracing::trace!(
                            session_id = %topic,
                            sequence = event.sequence,
                            "chaos: holding event back"
                        );
                        held.insert(topic, event);
                        return 0;
                    }
                    None
                }
            }
        };

        let delivered = self.inner.broadcast(event);
        if let Some(prior) = previously_held {
            self.inner.broadcast(prior);
        }
        delivered
    }

    fn close_topic(&self, topic: &SessionId) -> usize {
        // A held event dies with its topic.
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.inner.close_topic(topic)
    }

    fn subscriber_count(&self, topic: &SessionId) -> usize {
        self.inner.subscriber_count(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::broadcast::LocalBroadcast;
    use pretty_assertions::assert_eq;

    async fn publish_and_collect(config: ChaosConfig, count: u64) -> Vec<u64> {
        let chaos = ChaosBroadcast::new(LocalBroadcast::new(1024), config);
        let topic = SessionId::new("chaos");
        let mut sub = chaos.subscribe(&topic).await.expect("subscribe");
        for seq in 1..=count {
            chaos.broadcast(SequencedEvent::new(topic.clone(), seq, "x"));
        }
        chaos.close_topic(&topic);

        let mut received = Vec::new();
        while let Some(event) = sub.recv().await {
            received.push(event.sequence);
        }
        received
    }

    #[tokio::test]
    async fn noop_config_is_transparent() {
        let config = ChaosConfig::default();
        assert!(config.is_noop());
        let received = publish_and_collect(config, 5).await;
        assert_eq!(received, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn full_drop_rate_delivers_nothing() {
        let config = ChaosConfig {
            drop_rate: 1.0,
            reorder_rate: 0.0,
            seed: Some(7),
        };
        assert!(publish_and_collect(config, 10).await.is_empty());
    }

    #[tokio::test]
    async fn full_reorder_rate_swaps_pairs() {
        let config = ChaosConfig {
            drop_rate: 0.0,
            reorder_rate: 1.0,
            seed: Some(7),
        };
        // Odd events are held, released behind the following even one; the
        // trailing held event is discarded when the topic closes.
        let received = publish_and_collect(config, 5).await;
        assert_eq!(received, vec![2, 1, 4, 3]);
    }

    #[tokio::test]
    async fn seeded_runs_are_reproducible() {
        let config = ChaosConfig {
            drop_rate: 0.3,
            reorder_rate: 0.3,
            seed: Some(42),
        };
        let first = publish_and_collect(config, 50).await;
        let second = publish_and_collect(config, 50).await;
        assert_eq!(first, second);
    }
}
