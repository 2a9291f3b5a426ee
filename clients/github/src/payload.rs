use serde::Deserialize;

use harvest::api::RepoRecord;

#[derive(Deserialize, Debug)]
pub struct SearchRepos {
    pub items: Vec<Repo>,
}

#[derive(Deserialize, Debug)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub owner: RepoOwner,
    pub language: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RepoOwner {
    pub login: String,
}

impl From<Repo> for RepoRecord {
    fn from(repo: Repo) -> Self {
        RepoRecord::new(repo.id, repo.owner.login, repo.name, repo.language)
    }
}

#[derive(Deserialize, Debug)]
pub struct SearchCode {
    pub total_count: u64,
}

#[derive(Deserialize, Debug)]
pub struct RateLimit {
    pub resources: RateLimitResources,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
    pub search: RateLimitResource,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResource {
    pub remaining: u32,
}
