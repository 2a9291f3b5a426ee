//! Startup barrier shared by every worker process.
//!
//! The first worker to find the marker topic empty claims setup by publishing
//! `Initializing`, performs the one-time population work, then publishes
//! `Initialized`. Everyone else waits until the second marker appears. The
//! claim is not atomic: two workers racing on an empty topic may both run
//! setup, which is tolerated because populating twice only duplicates
//! idempotent work items.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use strum_macros::{Display, EnumString};

use crate::error::Result;
use crate::log::{publish_with_retry, MessageLog};
use crate::topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum InitStatus {
    Uninitialized,
    Initializing,
    Initialized,
}

pub struct InitBarrier<L> {
    log: Arc<L>,
    poll_interval: Duration,
}

impl<L: MessageLog> InitBarrier<L> {
    pub fn new(log: Arc<L>, poll_interval: Duration) -> Self {
        InitBarrier { log, poll_interval }
    }

    /// Current barrier state as recorded on the marker topic.
    pub async fn status(&self) -> Result<InitStatus> {
        let markers = self.log.read_from_earliest(&topics::initialized()).await?;
        let mut status = InitStatus::Uninitialized;
        for marker in &markers {
            match std::str::from_utf8(marker) {
                Ok(text) if text == InitStatus::Initialized.to_string() => {
                    return Ok(InitStatus::Initialized);
                }
                Ok(text) if text == InitStatus::Initializing.to_string() => {
                    status = InitStatus::Initializing;
                }
                _ => {}
            }
        }
        Ok(status)
    }

    /// Returns once the system is initialized, running `setup` here if this
    /// worker wins the claim.
    pub async fn ensure_initialized<F, Fut>(&self, setup: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            match self.status().await? {
                InitStatus::Initialized => {
                    debug!("system already initialized");
                    return Ok(());
                }
                InitStatus::Initializing => {
                    debug!("another worker is initializing, waiting");
                    tokio::time::sleep(self.poll_interval).await;
                }
                InitStatus::Uninitialized => break,
            }
        }
        info!("claiming one-time setup");
        let topic = topics::initialized();
        publish_with_retry(
            self.log.as_ref(),
            &topic,
            InitStatus::Initializing.to_string().as_bytes(),
        )
        .await;
        setup().await?;
        publish_with_retry(
            self.log.as_ref(),
            &topic,
            InitStatus::Initialized.to_string().as_bytes(),
        )
        .await;
        info!("one-time setup finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn barrier(log: Arc<MemoryLog>) -> InitBarrier<MemoryLog> {
        InitBarrier::new(log, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn first_worker_runs_setup_once() {
        let log = Arc::new(MemoryLog::new());
        let barrier = barrier(log.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        barrier
            .ensure_initialized(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.status().await.unwrap(), InitStatus::Initialized);

        // A second arrival sees the markers and never runs its closure.
        let counter = runs.clone();
        barrier
            .ensure_initialized(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waits_while_another_worker_initializes() {
        let log = Arc::new(MemoryLog::new());
        log.publish(
            &topics::initialized(),
            InitStatus::Initializing.to_string().as_bytes(),
        )
        .await
        .unwrap();

        let waiter = barrier(log.clone());
        let handle = tokio::spawn(async move {
            waiter
                .ensure_initialized(|| async { panic!("claim was already taken") })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        log.publish(
            &topics::initialized(),
            InitStatus::Initialized.to_string().as_bytes(),
        )
        .await
        .unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_reports_each_phase() {
        let log = Arc::new(MemoryLog::new());
        let barrier = barrier(log.clone());
        assert_eq!(barrier.status().await.unwrap(), InitStatus::Uninitialized);

        log.publish(&topics::initialized(), b"Initializing").await.unwrap();
        assert_eq!(barrier.status().await.unwrap(), InitStatus::Initializing);

        log.publish(&topics::initialized(), b"Initialized").await.unwrap();
        assert_eq!(barrier.status().await.unwrap(), InitStatus::Initialized);
    }
}
