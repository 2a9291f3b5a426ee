//! Boundary traits for the external code-hosting API.
//!
//! The harvester only ever talks to the hosting service through these traits;
//! the concrete HTTP client lives in its own crate and is swapped out for
//! stubs in tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use derive_more::Constructor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The credential used for the request has exhausted its quota.
    #[error("API rate limit exhausted")]
    RateLimited,
    /// The credential was rejected outright. Not retried.
    #[error("API credential rejected")]
    Unauthorized,
    #[error("Error: {0}")]
    Error(&'static str),
    // the only reason of `reqwest` dependency..
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A repository as returned by the hosting service's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct RepoRecord {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub language: Option<String>,
}

/// Read access to the hosting service, one credential per call.
///
/// Credentials are passed per request because they rotate through the token
/// pool; a client must not cache one.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Repositories created on the given calendar day, paged.
    async fn created_on(&self, day: NaiveDate, token: &str, page: u32, per_page: u32)
        -> Result<Vec<RepoRecord>>;

    /// Number of commits on the repository's default branch.
    async fn commit_count(&self, owner: &str, name: &str, token: &str) -> Result<i64>;

    /// Whether the repository contains a file matching any of the given names.
    async fn has_file(&self, owner: &str, name: &str, filenames: &[&str], token: &str)
        -> Result<bool>;
}

/// Quota check used by the token pool while reclaiming standby credentials.
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    /// True when the token still has usable request quota remaining.
    async fn remaining_quota(&self, token: &str) -> Result<bool>;
}
