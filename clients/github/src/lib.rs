//! GitHub implementation of the harvester's hosting-service traits.
//!
//! Credentials are passed per call (classic `token` authorization header)
//! because they rotate through the shared pool; the client itself holds no
//! credential state.

use async_trait::async_trait;
use chrono::NaiveDate;
use harvest::api::Error;
use harvest::api::QuotaProbe;
use harvest::api::RepoHost;
use harvest::api::RepoRecord;
use harvest::api::Result;
use log::debug;
use reqwest::header;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

mod builder;
mod payload;

pub use builder::GithubClientBuilder;

use payload::RateLimit;
use payload::SearchCode;
use payload::SearchRepos;

/// A token is considered usable while every consulted resource keeps at
/// least this much quota.
const MIN_REMAINING_QUOTA: u32 = 5;

pub struct GithubClient {
    pub(crate) client: Client,
    pub(crate) api_url: String,
}

impl GithubClient {
    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_url, path))
            .header(header::AUTHORIZATION, format!("token {}", token))
    }
}

async fn read_response<BODY: DeserializeOwned>(response: Response) -> Result<BODY> {
    let response = ensure_success(response).await?;
    Ok(response.json::<BODY>().await?)
}

/// Maps the service's refusal statuses onto the harvester's error taxonomy.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            let remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|val| val.to_str().ok())
                .and_then(|val| val.parse::<u32>().ok());
            // 403 without quota headers is treated as a rate limit too; the
            // secondary abuse limiter omits them.
            match remaining {
                Some(left) if left > 0 => {
                    let body = response.text().await.unwrap_or_default();
                    if body.contains("You have exceeded") {
                        Err(Error::RateLimited)
                    } else {
                        Err(Error::Error("request forbidden"))
                    }
                }
                _ => Err(Error::RateLimited),
            }
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Other(anyhow::anyhow!(
                "unexpected status {}: {}",
                status,
                body
            )))
        }
    }
}

/// Extracts the page number of the `rel="last"` link, if the header is
/// paginated.
fn last_page(link_header: &str) -> Option<i64> {
    let last = link_header
        .split(',')
        .find(|part| part.contains("rel=\"last\""))?;
    let url = last.split(';').next()?.trim();
    let url = url.strip_prefix('<')?.strip_suffix('>')?;
    let query = url.split('?').nth(1)?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .and_then(|page| page.parse().ok())
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn created_on(
        &self,
        day: NaiveDate,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RepoRecord>> {
        let response = self
            .get("/search/repositories", token)
            .query(&[
                ("q", format!("created:{}", day.format("%Y-%m-%d"))),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await?;
        let body = read_response::<SearchRepos>(response).await?;
        Ok(body.items.into_iter().map(RepoRecord::from).collect())
    }

    async fn commit_count(&self, owner: &str, name: &str, token: &str) -> Result<i64> {
        let response = self
            .get(&format!("/repos/{}/{}/commits", owner, name), token)
            .query(&[("per_page", "1")])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        // With one commit per page the last page number is the commit count.
        let paged = response
            .headers()
            .get(header::LINK)
            .and_then(|val| val.to_str().ok())
            .and_then(last_page);
        match paged {
            Some(count) => Ok(count),
            None => {
                let commits = response.json::<Vec<serde_json::Value>>().await?;
                Ok(commits.len() as i64)
            }
        }
    }

    async fn has_file(&self, owner: &str, name: &str, filenames: &[&str], token: &str) -> Result<bool> {
        for filename in filenames {
            let response = self
                .get("/search/code", token)
                .query(&[("q", format!("repo:{}/{} filename:{}", owner, name, filename))])
                .send()
                .await?;
            let body = read_response::<SearchCode>(response).await?;
            if body.total_count > 0 {
                debug!("{}/{} matches filename {}", owner, name, filename);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl QuotaProbe for GithubClient {
    async fn remaining_quota(&self, token: &str) -> Result<bool> {
        let response = self.get("/rate_limit", token).send().await?;
        let body = read_response::<RateLimit>(response).await?;
        let resources = body.resources;
        Ok(resources.core.remaining >= MIN_REMAINING_QUOTA
            && resources.search.remaining >= MIN_REMAINING_QUOTA)
    }
}
