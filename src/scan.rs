//! One worker's scan of a single calendar day.

use std::future::Future;
use std::time::Duration;

use harvest::api::{self, QuotaProbe, RepoHost};
use harvest::facts::{CommitFact, LanguageEvent, RepoFact};
use harvest::log::{publish_with_retry, MessageLog};
use harvest::tokens::TokenPool;
use harvest::topics;
use harvest::Result;
use log::{info, warn};

/// CI configuration paths probed per repository.
pub const CI_FILES: &[&str] = &[
    ".travis.yml",
    ".gitlab-ci.yml",
    ".drone.yml",
    ".circleci",
    ".github/workflows",
];

/// Test file pattern probed per repository.
pub const TEST_FILES: &[&str] = &["test*"];

/// Language recorded when the hosting service reports none.
pub const UNKNOWN_LANGUAGE: &str = "Unknown";

const REQUEST_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Runs an API call under a pool token, rotating tokens on rate limits and
/// retrying transport failures until the call succeeds or fails fatally.
async fn with_token<L, C, T, F, Fut>(pool: &TokenPool<L, C>, mut op: F) -> Result<T>
where
    L: MessageLog,
    C: QuotaProbe,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = api::Result<T>>,
{
    loop {
        let token = pool.acquire().await?;
        match op(token.reveal().to_string()).await {
            Ok(value) => {
                pool.release(token, false).await;
                return Ok(value);
            }
            Err(api::Error::RateLimited) => {
                pool.release(token, true).await;
            }
            Err(err @ api::Error::RequestError(_)) => {
                warn!("request failed, retrying in {}s: {}", REQUEST_RETRY_BACKOFF.as_secs(), err);
                pool.release(token, false).await;
                tokio::time::sleep(REQUEST_RETRY_BACKOFF).await;
            }
            Err(err) => {
                pool.release(token, false).await;
                return Err(err.into());
            }
        }
    }
}

/// Scans every repository created on `day` and publishes its facts.
/// Returns how many repositories were seen.
pub async fn scan_day<L, C>(
    log: &L,
    host: &C,
    pool: &TokenPool<L, C>,
    day: chrono::NaiveDate,
    per_page: u32,
) -> Result<usize>
where
    L: MessageLog,
    C: RepoHost + QuotaProbe,
{
    let mut seen = 0usize;
    let mut page = 1u32;
    loop {
        let records = with_token(pool, |token| async move {
            host.created_on(day, &token, page, per_page).await
        })
        .await?;
        let page_len = records.len();

        for record in records {
            let language = record.language.clone().unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());
            let repo = RepoFact::new(record.id, record.owner.clone(), record.name.clone(), language.clone());
            publish_with_retry(log, &topics::repo_seen(), repo.to_wire().as_bytes()).await;

            let commits = with_token(pool, |token| {
                let (owner, name) = (record.owner.clone(), record.name.clone());
                async move { host.commit_count(&owner, &name, &token).await }
            })
            .await?;
            let fact = CommitFact::new(record.id, commits, record.owner.clone(), record.name.clone());
            publish_with_retry(log, &topics::commit_facts(), fact.to_wire().as_bytes()).await;

            let has_tests = with_token(pool, |token| {
                let (owner, name) = (record.owner.clone(), record.name.clone());
                async move { host.has_file(&owner, &name, TEST_FILES, &token).await }
            })
            .await?;
            if has_tests {
                let event = LanguageEvent::new(record.id, language.clone());
                publish_with_retry(log, &topics::repo_with_tests(), event.to_wire().as_bytes()).await;
            }

            let has_ci = with_token(pool, |token| {
                let (owner, name) = (record.owner.clone(), record.name.clone());
                async move { host.has_file(&owner, &name, CI_FILES, &token).await }
            })
            .await?;
            if has_ci {
                let event = LanguageEvent::new(record.id, language);
                publish_with_retry(log, &topics::repo_with_ci(), event.to_wire().as_bytes()).await;
            }
            seen += 1;
        }

        if (page_len as u32) < per_page {
            break;
        }
        page += 1;
    }
    info!("day {} scanned, {} repos", day, seen);
    Ok(seen)
}
