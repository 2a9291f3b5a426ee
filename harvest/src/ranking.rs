//! Commit-count leaderboard built by replaying the fact topic.
//!
//! The aggregator keeps no state between snapshots: each one replays
//! `commit_repo_info` from the earliest offset and folds it into a fresh
//! leaderboard, so a crashed or restarted worker loses nothing. Partial
//! snapshots (taken mid-scan) use a low-water-mark shortcut and are
//! advisory; the final snapshot folds every fact exactly.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use derive_more::Constructor;
use log::{info, warn};

use crate::error::Result;
use crate::facts::CommitFact;
use crate::log::{publish_with_retry, MessageLog};
use crate::topics;
use crate::wire::WireError;

pub const DEFAULT_CAPACITY: usize = 100;

/// One leaderboard row, ranked by commit count.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct LeaderboardEntry {
    pub repo_id: i64,
    pub commit_count: i64,
    pub owner: String,
    pub name: String,
}

impl LeaderboardEntry {
    pub fn to_wire(&self) -> String {
        format!(
            "({}, {}, '{}', '{}')",
            self.repo_id, self.commit_count, self.owner, self.name
        )
    }

    pub fn from_wire(input: &str) -> std::result::Result<Self, WireError> {
        let fact = CommitFact::from_wire(input)?;
        Ok(LeaderboardEntry::new(fact.repo_id, fact.commit_count, fact.owner, fact.name))
    }
}

impl fmt::Display for LeaderboardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({} commits)",
            self.owner, self.name, self.commit_count
        )
    }
}

/// Which snapshot is being taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Mid-scan partial snapshot, advisory.
    Day(NaiveDate),
    /// End-of-scan snapshot, exact.
    Final,
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cutoff::Day(day) => write!(f, "{}", day.format(crate::days::DAY_FORMAT)),
            Cutoff::Final => f.write_str("final"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ranked {
    commit_count: i64,
    /// Arrival order, used to break count ties and to supersede re-reports.
    seq: usize,
    repo_id: i64,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lowest count first; among equal counts the latest arrival is
        // smallest, so it is the first to be evicted.
        self.commit_count
            .cmp(&other.commit_count)
            .then(other.seq.cmp(&self.seq))
            .then(self.repo_id.cmp(&other.repo_id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Top-K fold over a stream of commit facts.
struct Leaderboard {
    capacity: usize,
    exact: bool,
    /// Facts with a count at or below this are skipped in advisory mode.
    floor: i64,
    ordered: BTreeSet<Ranked>,
    by_repo: HashMap<i64, (Ranked, CommitFact)>,
    next_seq: usize,
}

impl Leaderboard {
    fn new(capacity: usize, exact: bool) -> Self {
        Leaderboard {
            capacity,
            exact,
            floor: 0,
            ordered: BTreeSet::new(),
            by_repo: HashMap::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, fact: CommitFact) {
        if !self.exact && fact.commit_count <= self.floor {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let ranked = Ranked {
            commit_count: fact.commit_count,
            seq,
            repo_id: fact.repo_id,
        };
        match self.by_repo.entry(fact.repo_id) {
            Entry::Occupied(mut slot) => {
                // A later fact for the same repo supersedes the earlier one.
                let (old, _) = slot.get();
                self.ordered.remove(old);
                self.ordered.insert(ranked);
                slot.insert((ranked, fact));
            }
            Entry::Vacant(slot) => {
                self.ordered.insert(ranked);
                slot.insert((ranked, fact));
            }
        }
        if !self.exact && self.ordered.len() > self.capacity {
            if let Some(&smallest) = self.ordered.iter().next() {
                self.ordered.remove(&smallest);
                self.by_repo.remove(&smallest.repo_id);
                self.floor = smallest.commit_count;
            }
        }
    }

    fn into_entries(self) -> Vec<LeaderboardEntry> {
        let Leaderboard {
            capacity,
            ordered,
            mut by_repo,
            ..
        } = self;
        ordered
            .iter()
            .rev()
            .take(capacity)
            .filter_map(|ranked| {
                let (_, fact) = by_repo.remove(&ranked.repo_id)?;
                Some(LeaderboardEntry::new(fact.repo_id, fact.commit_count, fact.owner, fact.name))
            })
            .collect()
    }
}

pub struct CommitRank<L> {
    log: Arc<L>,
    capacity: usize,
}

impl<L: MessageLog> CommitRank<L> {
    pub fn new(log: Arc<L>, capacity: usize) -> Self {
        CommitRank { log, capacity }
    }

    /// Replays the commit-fact topic and publishes the top repositories to
    /// the snapshot topic for this cutoff, best first. Malformed facts are
    /// logged and skipped, never fatal.
    pub async fn snapshot(&self, cutoff: Cutoff) -> Result<Vec<LeaderboardEntry>> {
        let payloads = self.log.read_from_earliest(&topics::commit_facts()).await?;
        let mut board = Leaderboard::new(self.capacity, cutoff == Cutoff::Final);
        let mut skipped = 0usize;
        for payload in &payloads {
            match std::str::from_utf8(payload)
                .map_err(|_| WireError::Utf8)
                .and_then(CommitFact::from_wire)
            {
                Ok(fact) => board.push(fact),
                Err(err) => {
                    warn!("skipping malformed commit fact: {}", err);
                    skipped += 1;
                }
            }
        }
        let entries = board.into_entries();
        info!(
            "{} snapshot ranks {} repos from {} facts ({} malformed)",
            cutoff,
            entries.len(),
            payloads.len(),
            skipped
        );
        let topic = topics::commit_result(&cutoff.to_string());
        for entry in &entries {
            publish_with_retry(self.log.as_ref(), &topic, entry.to_wire().as_bytes()).await;
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;

    fn fact(repo_id: i64, commit_count: i64) -> CommitFact {
        CommitFact::new(
            repo_id,
            commit_count,
            format!("owner_{}", repo_id),
            format!("repo_{}", repo_id),
        )
    }

    fn counts(entries: &[LeaderboardEntry]) -> Vec<(i64, i64)> {
        entries.iter().map(|entry| (entry.repo_id, entry.commit_count)).collect()
    }

    #[test]
    fn keeps_top_k_best_first() {
        let mut board = Leaderboard::new(2, false);
        board.push(fact(1, 50));
        board.push(fact(2, 90));
        board.push(fact(3, 30));
        assert_eq!(counts(&board.into_entries()), vec![(2, 90), (1, 50)]);
    }

    #[test]
    fn later_fact_for_same_repo_supersedes() {
        let mut board = Leaderboard::new(2, true);
        board.push(fact(1, 50));
        board.push(fact(2, 90));
        board.push(fact(3, 30));
        board.push(fact(3, 95));
        assert_eq!(counts(&board.into_entries()), vec![(3, 95), (2, 90)]);
    }

    #[test]
    fn advisory_floor_can_drop_a_superseding_fact() {
        let mut board = Leaderboard::new(2, false);
        board.push(fact(1, 50));
        board.push(fact(2, 90));
        board.push(fact(3, 60));
        // Repo 1 was evicted and set the floor at 50; a re-report at or below
        // the floor is skipped in advisory mode.
        board.push(fact(1, 50));
        assert_eq!(counts(&board.into_entries()), vec![(2, 90), (3, 60)]);
    }

    #[test]
    fn exact_mode_ignores_any_floor() {
        let mut board = Leaderboard::new(2, true);
        for id in 1..=10 {
            board.push(fact(id, id * 10));
        }
        board.push(fact(11, 5));
        let entries = board.into_entries();
        assert_eq!(counts(&entries), vec![(10, 100), (9, 90)]);
    }

    #[test]
    fn equal_counts_keep_the_earlier_arrival_ahead() {
        let mut board = Leaderboard::new(3, true);
        board.push(fact(7, 40));
        board.push(fact(8, 40));
        assert_eq!(counts(&board.into_entries()), vec![(7, 40), (8, 40)]);
    }

    #[tokio::test]
    async fn snapshot_replays_and_publishes() {
        let log = Arc::new(MemoryLog::new());
        for fact in [fact(1, 50), fact(2, 90), fact(3, 30)] {
            log.publish(&topics::commit_facts(), fact.to_wire().as_bytes())
                .await
                .unwrap();
        }
        let rank = CommitRank::new(log.clone(), 2);

        let entries = rank.snapshot(Cutoff::Final).await.unwrap();
        assert_eq!(counts(&entries), vec![(2, 90), (1, 50)]);

        let published = log.read_from_earliest(&topics::commit_result("final")).await.unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(
            LeaderboardEntry::from_wire(std::str::from_utf8(&published[0]).unwrap()).unwrap(),
            entries[0]
        );
    }

    #[tokio::test]
    async fn snapshot_skips_malformed_facts() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::commit_facts(), b"os.system('rm -rf /')").await.unwrap();
        log.publish(&topics::commit_facts(), fact(5, 12).to_wire().as_bytes())
            .await
            .unwrap();
        let rank = CommitRank::new(log, 10);

        let entries = rank.snapshot(Cutoff::Final).await.unwrap();
        assert_eq!(counts(&entries), vec![(5, 12)]);
    }

    #[tokio::test]
    async fn each_snapshot_starts_from_scratch() {
        let log = Arc::new(MemoryLog::new());
        log.publish(&topics::commit_facts(), fact(1, 10).to_wire().as_bytes())
            .await
            .unwrap();
        let rank = CommitRank::new(log.clone(), 5);

        let first = rank.snapshot(Cutoff::Final).await.unwrap();
        assert_eq!(counts(&first), vec![(1, 10)]);

        log.publish(&topics::commit_facts(), fact(1, 99).to_wire().as_bytes())
            .await
            .unwrap();
        let second = rank.snapshot(Cutoff::Final).await.unwrap();
        assert_eq!(counts(&second), vec![(1, 99)]);
    }
}
