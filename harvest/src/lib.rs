//! Core of the repository harvester.
//!
//! A fleet of identical workers scans a hosting service for repositories
//! created during a given range of days and aggregates commit-count rankings
//! and per-language statistics. Workers coordinate exclusively through a
//! message log ([`log::MessageLog`]): a startup barrier elects one worker to
//! populate the day queue and token pool, days are handed out via a shared
//! subscription cursor, API credentials rotate through free/standby topics,
//! and aggregators replay retained fact topics instead of keeping durable
//! state of their own.

pub mod api;
pub mod barrier;
pub mod days;
pub mod error;
pub mod facts;
pub mod languages;
pub mod log;
pub mod memory;
pub mod ranking;
pub mod tokens;
pub mod topics;
pub mod wire;

pub use error::{Error, Result};
