//! Per-language counters fed by the fact topics.
//!
//! The aggregator counts, per language: repositories sighted, repositories
//! with test files, and CI sightings. Repo and test events are de-duplicated
//! by repo id because the log is at-least-once; CI events are counted every
//! time on purpose, matching what the counters have always reported
//! downstream. Counters only ever leave the process through `flush`, driven
//! by requests on the flush topic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Result;
use crate::facts::{LanguageEvent, RepoFact};
use crate::log::{publish_with_retry, MessageLog, TopicAddr};
use crate::topics;
use crate::wire::{self, WireError};

const SUBSCRIPTION: &str = "language_stats_sub";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanguageCounters {
    pub repo_count: u64,
    pub tests_count: u64,
    pub ci_count: u64,
}

impl LanguageCounters {
    pub fn to_wire(&self, language: &str) -> String {
        format!(
            "('{}', {}, {}, {})",
            language, self.repo_count, self.tests_count, self.ci_count
        )
    }

    pub fn from_wire(input: &str) -> std::result::Result<(String, Self), WireError> {
        let fields = wire::parse_tuple(input)?;
        wire::check_arity(&fields, 4)?;
        let language = wire::text_field(&fields, 0)?.to_string();
        let counters = LanguageCounters {
            repo_count: wire::int_field(&fields, 1)? as u64,
            tests_count: wire::int_field(&fields, 2)? as u64,
            ci_count: wire::int_field(&fields, 3)? as u64,
        };
        Ok((language, counters))
    }
}

pub struct LanguageStats<L> {
    log: Arc<L>,
    receive_timeout: Duration,
    seen_repos: HashSet<i64>,
    seen_tests: HashSet<i64>,
    counters: HashMap<String, LanguageCounters>,
}

impl<L: MessageLog> LanguageStats<L> {
    pub fn new(log: Arc<L>, receive_timeout: Duration) -> Self {
        LanguageStats {
            log,
            receive_timeout,
            seen_repos: HashSet::new(),
            seen_tests: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    /// Counts a repository sighting once per repo id. The first sighting of
    /// a language also announces it on the registry topic.
    pub async fn observe_repo(&mut self, repo_id: i64, language: &str, announce: bool) {
        if !self.seen_repos.insert(repo_id) {
            debug!("repo {} already counted", repo_id);
            return;
        }
        // A tests or CI event may have created the entry already, so "first
        // of this language" means its repo count going from zero to one.
        let counters = self.counters.entry(language.to_string()).or_default();
        let first_of_language = counters.repo_count == 0;
        counters.repo_count += 1;
        if first_of_language && announce {
            publish_with_retry(self.log.as_ref(), &topics::languages(), language.as_bytes()).await;
        }
    }

    /// Counts a test sighting once per repo id.
    pub fn observe_tests(&mut self, event: &LanguageEvent) {
        if self.seen_tests.insert(event.repo_id) {
            self.counters.entry(event.language.clone()).or_default().tests_count += 1;
        }
    }

    /// Counts every CI sighting, including redeliveries.
    pub fn observe_ci(&mut self, event: &LanguageEvent) {
        self.counters.entry(event.language.clone()).or_default().ci_count += 1;
    }

    /// Publishes the current counters for one language to the results topic
    /// and returns them. Unknown languages flush as all zeroes.
    pub async fn flush(&self, language: &str) -> LanguageCounters {
        let counters = self.counters.get(language).copied().unwrap_or_default();
        publish_with_retry(
            self.log.as_ref(),
            &topics::language_results(),
            counters.to_wire(language).as_bytes(),
        )
        .await;
        counters
    }

    /// Polls each input topic once and handles at most one message from
    /// each. Returns how many messages were handled; malformed payloads are
    /// nacked and not counted.
    pub async fn run_once(&mut self) -> Result<usize> {
        let mut handled = 0;

        if let Some((id, payload)) = self.poll(&topics::repo_seen()).await? {
            match std::str::from_utf8(&payload)
                .map_err(|_| WireError::Utf8)
                .and_then(RepoFact::from_wire)
            {
                Ok(fact) => {
                    self.observe_repo(fact.repo_id, &fact.language, true).await;
                    self.settle(&topics::repo_seen(), id).await?;
                    handled += 1;
                }
                Err(err) => self.reject(&topics::repo_seen(), id, err).await?,
            }
        }

        if let Some((id, payload)) = self.poll(&topics::repo_with_tests()).await? {
            match Self::parse_event(&payload) {
                Ok(event) => {
                    self.observe_tests(&event);
                    self.settle(&topics::repo_with_tests(), id).await?;
                    handled += 1;
                }
                Err(err) => self.reject(&topics::repo_with_tests(), id, err).await?,
            }
        }

        if let Some((id, payload)) = self.poll(&topics::repo_with_ci()).await? {
            match Self::parse_event(&payload) {
                Ok(event) => {
                    self.observe_ci(&event);
                    self.settle(&topics::repo_with_ci(), id).await?;
                    handled += 1;
                }
                Err(err) => self.reject(&topics::repo_with_ci(), id, err).await?,
            }
        }

        if let Some((id, payload)) = self.poll(&topics::flush_language()).await? {
            match std::str::from_utf8(&payload) {
                Ok(language) => {
                    let language = language.to_string();
                    self.flush(&language).await;
                    self.settle(&topics::flush_language(), id).await?;
                    handled += 1;
                }
                Err(_) => self.reject(&topics::flush_language(), id, WireError::Utf8).await?,
            }
        }

        Ok(handled)
    }

    /// Drains every pending input message. Used at end of scan so the final
    /// flush sees everything.
    pub async fn drain(&mut self) -> Result<()> {
        while self.run_once().await? > 0 {}
        Ok(())
    }

    /// Rebuilds the counters from scratch by replaying the retained fact
    /// topics. Languages are not re-announced, they are already on the
    /// registry.
    pub async fn rebuild(&mut self) -> Result<()> {
        self.seen_repos.clear();
        self.seen_tests.clear();
        self.counters.clear();

        for payload in self.log.read_from_earliest(&topics::repo_seen()).await? {
            match std::str::from_utf8(&payload)
                .map_err(|_| WireError::Utf8)
                .and_then(RepoFact::from_wire)
            {
                Ok(fact) => self.observe_repo(fact.repo_id, &fact.language, false).await,
                Err(err) => warn!("skipping malformed repo fact during rebuild: {}", err),
            }
        }
        for payload in self.log.read_from_earliest(&topics::repo_with_tests()).await? {
            match Self::parse_event(&payload) {
                Ok(event) => self.observe_tests(&event),
                Err(err) => warn!("skipping malformed test event during rebuild: {}", err),
            }
        }
        for payload in self.log.read_from_earliest(&topics::repo_with_ci()).await? {
            match Self::parse_event(&payload) {
                Ok(event) => self.observe_ci(&event),
                Err(err) => warn!("skipping malformed CI event during rebuild: {}", err),
            }
        }
        info!("rebuilt counters for {} languages", self.counters.len());
        Ok(())
    }

    fn parse_event(payload: &[u8]) -> std::result::Result<LanguageEvent, WireError> {
        std::str::from_utf8(payload)
            .map_err(|_| WireError::Utf8)
            .and_then(LanguageEvent::from_wire)
    }

    async fn poll(&self, topic: &TopicAddr) -> Result<Option<(u64, Vec<u8>)>> {
        Ok(self
            .log
            .receive(topic, SUBSCRIPTION, self.receive_timeout)
            .await?
            .map(|delivery| (delivery.id, delivery.payload)))
    }

    async fn settle(&self, topic: &TopicAddr, id: u64) -> Result<()> {
        self.log.ack(topic, SUBSCRIPTION, id).await
    }

    async fn reject(&self, topic: &TopicAddr, id: u64, err: WireError) -> Result<()> {
        warn!("malformed payload on {}: {}", topic, err);
        self.log.nack(topic, SUBSCRIPTION, id).await
    }
}

/// Requests a flush for every language on the registry. Returns how many
/// requests were published.
pub async fn request_flush_all<L: MessageLog>(log: &L) -> Result<usize> {
    let registry = log.read_from_earliest(&topics::languages()).await?;
    let mut languages: HashSet<String> = HashSet::new();
    for payload in registry {
        if let Ok(language) = String::from_utf8(payload) {
            languages.insert(language);
        }
    }
    for language in &languages {
        log.publish(&topics::flush_language(), language.as_bytes()).await?;
    }
    Ok(languages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;

    fn stats(log: Arc<MemoryLog>) -> LanguageStats<MemoryLog> {
        LanguageStats::new(log, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn repo_sightings_are_idempotent_per_repo() {
        let log = Arc::new(MemoryLog::new());
        let mut stats = stats(log.clone());

        stats.observe_repo(1, "Rust", true).await;
        stats.observe_repo(1, "Rust", true).await;
        stats.observe_repo(2, "Rust", true).await;
        assert_eq!(stats.flush("Rust").await.repo_count, 2);

        // Only the first sighting of the language hits the registry.
        let registry = log.read_from_earliest(&topics::languages()).await.unwrap();
        assert_eq!(registry, vec![b"Rust".to_vec()]);
    }

    #[tokio::test]
    async fn language_is_announced_even_when_ci_arrives_first() {
        let log = Arc::new(MemoryLog::new());
        let mut stats = stats(log.clone());

        // Topic ordering is not deterministic; a CI sighting can be consumed
        // before the repo fact that carries the same language.
        stats.observe_ci(&LanguageEvent::new(1, "Rust".to_string()));
        stats.observe_repo(1, "Rust", true).await;

        let registry = log.read_from_earliest(&topics::languages()).await.unwrap();
        assert_eq!(registry, vec![b"Rust".to_vec()]);
    }

    #[tokio::test]
    async fn test_sightings_deduplicate_ci_does_not() {
        let log = Arc::new(MemoryLog::new());
        let mut stats = stats(log);
        let event = LanguageEvent::new(9, "Go".to_string());

        stats.observe_tests(&event);
        stats.observe_tests(&event);
        stats.observe_ci(&event);
        stats.observe_ci(&event);

        let counters = stats.counters.get("Go").unwrap();
        assert_eq!(counters.tests_count, 1);
        assert_eq!(counters.ci_count, 2);
    }

    #[tokio::test]
    async fn run_once_consumes_one_message_per_topic() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::repo_seen(), b"(1, 'o', 'r', 'Rust')").await.unwrap();
        log.publish(&topics::repo_with_tests(), b"(1, 'Rust')").await.unwrap();
        log.publish(&topics::repo_with_ci(), b"(1, 'Rust')").await.unwrap();
        log.publish(&topics::flush_language(), b"Rust").await.unwrap();

        let mut stats = stats(log.clone());
        assert_eq!(stats.run_once().await.unwrap(), 4);

        let results = log.read_from_earliest(&topics::language_results()).await.unwrap();
        assert_eq!(results.len(), 1);
        let (language, counters) =
            LanguageCounters::from_wire(std::str::from_utf8(&results[0]).unwrap()).unwrap();
        assert_eq!(language, "Rust");
        assert_eq!(
            counters,
            LanguageCounters {
                repo_count: 1,
                tests_count: 1,
                ci_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_nacked_and_not_counted() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::repo_seen(), b"exec('import os')").await.unwrap();

        let mut stats = stats(log);
        assert_eq!(stats.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_of_unknown_language_reports_zeroes() {
        let log = Arc::new(MemoryLog::new());
        let stats = stats(log);
        assert_eq!(stats.flush("COBOL").await, LanguageCounters::default());
    }

    #[tokio::test]
    async fn rebuild_replays_facts_without_announcing() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::repo_seen(), b"(1, 'o', 'r', 'Rust')").await.unwrap();
        log.publish(&topics::repo_seen(), b"(1, 'o', 'r', 'Rust')").await.unwrap();
        log.publish(&topics::repo_with_ci(), b"(1, 'Rust')").await.unwrap();

        let mut stats = stats(log.clone());
        stats.rebuild().await.unwrap();

        let counters = stats.counters.get("Rust").unwrap();
        assert_eq!(counters.repo_count, 1);
        assert_eq!(counters.ci_count, 1);
        assert!(log.read_from_earliest(&topics::languages()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_requests_cover_each_registered_language_once() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::languages(), b"Rust").await.unwrap();
        log.publish(&topics::languages(), b"Go").await.unwrap();
        log.publish(&topics::languages(), b"Rust").await.unwrap();

        assert_eq!(request_flush_all(log.as_ref()).await.unwrap(), 2);
        let requests = log.read_from_earliest(&topics::flush_language()).await.unwrap();
        let mut names: Vec<&[u8]> = requests.iter().map(Vec::as_slice).collect();
        names.sort();
        assert_eq!(names, vec![b"Go".as_slice(), b"Rust".as_slice()]);
    }
}
