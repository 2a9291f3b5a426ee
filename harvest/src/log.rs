//! Boundary to the external message log.
//!
//! The log is the only coordination primitive in the system: named,
//! ordered, replayable topics with independent reader cursors and
//! at-least-once delivery. Everything the harvester needs from a broker is
//! captured by [`MessageLog`]; the in-process [`crate::memory::MemoryLog`]
//! implements it for tests and single-process runs.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;

use crate::error::Result;

pub const TENANT: &str = "public";
/// Namespace for transient work topics (day queue, repo-seen fan-out).
pub const WORK_NAMESPACE: &str = "default";
/// Namespace for topics the broker retains indefinitely (facts, results).
pub const RETAINED_NAMESPACE: &str = "static";

/// Fixed backoff between attempts for publishes that must not be dropped.
pub const PUBLISH_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Fully qualified topic address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicAddr {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
}

impl TopicAddr {
    pub fn new(tenant: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TopicAddr {
            tenant: tenant.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Topic in the transient work namespace.
    pub fn work(name: impl Into<String>) -> Self {
        Self::new(TENANT, WORK_NAMESPACE, name)
    }

    /// Topic in the retained namespace.
    pub fn retained(name: impl Into<String>) -> Self {
        Self::new(TENANT, RETAINED_NAMESPACE, name)
    }
}

impl fmt::Display for TopicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persistent://{}/{}/{}", self.tenant, self.namespace, self.name)
    }
}

/// One received message. The id is only meaningful to the subscription it
/// was delivered on.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Operations the harvester needs from the broker.
///
/// Durable subscriptions share a single cursor per `(topic, subscription)`
/// pair, which is what serializes pops across workers without a lock.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Appends a payload. At-least-once; per-producer order is preserved.
    async fn publish(&self, topic: &TopicAddr, payload: &[u8]) -> Result<()>;

    /// Next message on a named durable subscription, waiting up to
    /// `timeout`. `Ok(None)` means "no data right now", not an error.
    async fn receive(
        &self,
        topic: &TopicAddr,
        subscription: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>>;

    /// Confirms a delivery; it will not be redelivered.
    async fn ack(&self, topic: &TopicAddr, subscription: &str, id: u64) -> Result<()>;

    /// Returns a delivery for redelivery on the same subscription.
    async fn nack(&self, topic: &TopicAddr, subscription: &str, id: u64) -> Result<()>;

    /// Ephemeral read of every currently retained message, earliest first,
    /// without touching any durable cursor.
    async fn read_from_earliest(&self, topic: &TopicAddr) -> Result<Vec<Vec<u8>>>;
}

/// Publishes until it sticks. Used wherever losing the message would violate
/// an invariant (token membership, init handshake, results).
pub async fn publish_with_retry<L: MessageLog + ?Sized>(log: &L, topic: &TopicAddr, payload: &[u8]) {
    loop {
        match log.publish(topic, payload).await {
            Ok(()) => return,
            Err(err) => {
                warn!(
                    "publish to {} failed, retrying in {}s: {}",
                    topic,
                    PUBLISH_RETRY_BACKOFF.as_secs(),
                    err
                );
                tokio::time::sleep(PUBLISH_RETRY_BACKOFF).await;
            }
        }
    }
}
