//! In-process implementation of the message-log boundary.
//!
//! Topics are append-only vectors; subscriptions keep a shared cursor plus a
//! redelivery queue for nacked messages, which gives the same
//! one-delivery-per-shared-cursor semantics workers rely on against a real
//! broker. Retention is unbounded, so `read_from_earliest` always sees the
//! full history.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::error::Result;
use crate::log::{Delivery, MessageLog, TopicAddr};

const RECEIVE_POLL: Duration = Duration::from_millis(5);

#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    topics: HashMap<TopicAddr, Vec<Vec<u8>>>,
    subs: HashMap<(TopicAddr, String), SubState>,
}

#[derive(Default)]
struct SubState {
    cursor: usize,
    next_id: u64,
    /// Delivered but not yet acknowledged, id -> message index.
    pending: HashMap<u64, usize>,
    /// Nacked message indices awaiting redelivery.
    redeliver: VecDeque<usize>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_receive(&self, topic: &TopicAddr, subscription: &str) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let available = state.topics.get(topic).map(Vec::len).unwrap_or(0);
        let sub = state
            .subs
            .entry((topic.clone(), subscription.to_string()))
            .or_default();
        // Fresh messages go out before redeliveries so one poisoned payload
        // cannot starve the subscription.
        let index = if sub.cursor < available {
            let index = sub.cursor;
            sub.cursor += 1;
            index
        } else if let Some(index) = sub.redeliver.pop_front() {
            index
        } else {
            return None;
        };
        let id = sub.next_id;
        sub.next_id += 1;
        sub.pending.insert(id, index);
        let payload = state.topics.get(topic).expect("indexed topic exists")[index].clone();
        Some(Delivery { id, payload })
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn publish(&self, topic: &TopicAddr, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.topics.entry(topic.clone()).or_default().push(payload.to_vec());
        Ok(())
    }

    async fn receive(
        &self,
        topic: &TopicAddr,
        subscription: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_receive(topic, subscription).await {
                return Ok(Some(delivery));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(RECEIVE_POLL).await;
        }
    }

    async fn ack(&self, topic: &TopicAddr, subscription: &str, id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subs.get_mut(&(topic.clone(), subscription.to_string())) {
            sub.pending.remove(&id);
        }
        Ok(())
    }

    async fn nack(&self, topic: &TopicAddr, subscription: &str, id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subs.get_mut(&(topic.clone(), subscription.to_string())) {
            if let Some(index) = sub.pending.remove(&id) {
                sub.redeliver.push_back(index);
            }
        }
        Ok(())
    }

    async fn read_from_earliest(&self, topic: &TopicAddr) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock().await;
        Ok(state.topics.get(topic).cloned().unwrap_or_default())
    }
}
