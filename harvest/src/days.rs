//! Shared queue of calendar days awaiting a scan.
//!
//! All workers pop from one durable subscription, so the broker cursor is the
//! only coordination needed to hand each day to exactly one worker. A
//! sentinel day published after the real range tells the worker that pops it
//! to stop; `pop_next_day` latches on it and performs no further log I/O.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::languages;
use crate::log::MessageLog;
use crate::ranking::{CommitRank, Cutoff};
use crate::topics;

pub const DAY_FORMAT: &str = "%Y-%m-%d";
const SUBSCRIPTION: &str = "day_to_process_sub";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ScanOrder {
    Ascending,
    Descending,
}

/// Inclusive range of days to scan, in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub order: ScanOrder,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate, order: ScanOrder) -> Result<Self> {
        if start > end {
            return Err(Error::Error("day range start is after its end"));
        }
        Ok(DayRange { start, end, order })
    }

    /// Every day of one calendar year.
    pub fn calendar_year(year: i32, order: ScanOrder) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or(Error::Error("invalid scan year"))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or(Error::Error("invalid scan year"))?;
        Self::new(start, end, order)
    }

    /// Days in the order they are queued.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = self.start;
        while day <= self.end {
            days.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        if self.order == ScanOrder::Descending {
            days.reverse();
        }
        days
    }

    /// The day published after the range to signal exhaustion.
    pub fn sentinel(&self) -> NaiveDate {
        // succ_opt only fails at NaiveDate::MAX, far outside any scan year.
        self.end.succ_opt().unwrap_or(self.end)
    }
}

/// What a worker gets back when asking for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextDay {
    Day(NaiveDate),
    Done,
}

pub struct DayQueue<L> {
    log: Arc<L>,
    range: DayRange,
    days_to_review: u32,
    receive_timeout: Duration,
    done: bool,
    review: Option<Arc<CommitRank<L>>>,
}

impl<L: MessageLog + 'static> DayQueue<L> {
    pub fn new(log: Arc<L>, range: DayRange, days_to_review: u32, receive_timeout: Duration) -> Self {
        DayQueue {
            log,
            range,
            // A zero cadence would make the review modulus panic.
            days_to_review: days_to_review.max(1),
            receive_timeout,
            done: false,
            review: None,
        }
    }

    /// Attaches the ranking aggregator so periodic partial snapshots run.
    pub fn with_review(mut self, rank: Arc<CommitRank<L>>) -> Self {
        self.review = Some(rank);
        self
    }

    /// Publishes the whole range plus the sentinel. Run once, behind the
    /// startup barrier.
    pub async fn populate(&self) -> Result<()> {
        let topic = topics::day_to_process();
        let days = self.range.days();
        info!("queueing {} days on {}", days.len(), topic);
        for day in days {
            self.log
                .publish(&topic, topics::day_payload(day).as_bytes())
                .await?;
        }
        self.log
            .publish(&topic, topics::day_payload(self.range.sentinel()).as_bytes())
            .await?;
        Ok(())
    }

    /// Pops the next day off the shared queue, blocking until one arrives.
    ///
    /// Returns `Done` forever once this worker has popped the sentinel.
    pub async fn pop_next_day(&mut self) -> Result<NextDay> {
        if self.done {
            return Ok(NextDay::Done);
        }
        let topic = topics::day_to_process();
        loop {
            let delivery = match self
                .log
                .receive(&topic, SUBSCRIPTION, self.receive_timeout)
                .await?
            {
                Some(delivery) => delivery,
                None => continue,
            };
            let day = match std::str::from_utf8(&delivery.payload)
                .ok()
                .and_then(|text| NaiveDate::parse_from_str(text, DAY_FORMAT).ok())
            {
                Some(day) => day,
                None => {
                    warn!("malformed day payload on {}, returning for redelivery", topic);
                    self.log.nack(&topic, SUBSCRIPTION, delivery.id).await?;
                    continue;
                }
            };
            self.log.ack(&topic, SUBSCRIPTION, delivery.id).await?;
            if day == self.range.sentinel() {
                info!("day queue exhausted");
                self.done = true;
                return Ok(NextDay::Done);
            }
            self.audit(day).await;
            self.maybe_review(day);
            return Ok(NextDay::Day(day));
        }
    }

    /// Best-effort audit record; a lost entry only degrades the trail.
    async fn audit(&self, day: NaiveDate) {
        let payload = topics::day_payload(day);
        if let Err(err) = self
            .log
            .publish(&topics::days_processed(), payload.as_bytes())
            .await
        {
            warn!("could not record {} as processed: {}", payload, err);
        }
    }

    /// Kicks off a partial review in the background on every
    /// `days_to_review`-th day of the year.
    fn maybe_review(&self, day: NaiveDate) {
        let rank = match &self.review {
            Some(rank) if day.ordinal() % self.days_to_review == 0 => rank.clone(),
            _ => return,
        };
        let log = self.log.clone();
        info!("day {} triggers a partial review", day);
        tokio::spawn(async move {
            if let Err(err) = rank.snapshot(Cutoff::Day(day)).await {
                warn!("partial ranking snapshot for {} failed: {}", day, err);
            }
            if let Err(err) = languages::request_flush_all(log.as_ref()).await {
                warn!("language flush request for {} failed: {}", day, err);
            }
        });
    }
}
