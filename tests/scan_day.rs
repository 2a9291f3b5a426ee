//! A full day scan against a mocked hosting service.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use github_client::GithubClientBuilder;
use harvest::facts::{CommitFact, LanguageEvent, RepoFact};
use harvest::log::MessageLog;
use harvest::memory::MemoryLog;
use harvest::tokens::{Token, TokenPool};
use harvest::topics;
use repo_harvest_app::scan;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_code_search(server: &MockServer, query: &str, total_count: u64) {
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .and(query_param("q", query))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(r#"{{"total_count": {}}}"#, total_count),
            "application/json",
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn scan_day_publishes_every_fact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "created:2021-01-15"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "total_count": 1,
                "items": [
                    {"id": 7, "name": "widget", "owner": {"login": "acme"}, "language": null}
                ]
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/commits"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"[{"sha": "abc"}]"#, "application/json"),
        )
        .mount(&server)
        .await;
    mock_code_search(&server, "repo:acme/widget filename:test*", 4).await;
    mock_code_search(&server, "repo:acme/widget filename:.travis.yml", 0).await;
    mock_code_search(&server, "repo:acme/widget filename:.gitlab-ci.yml", 0).await;
    mock_code_search(&server, "repo:acme/widget filename:.drone.yml", 1).await;

    let log = Arc::new(MemoryLog::new());
    let client = Arc::new(
        GithubClientBuilder::default()
            .with_api_url(server.uri())
            .build()
            .unwrap(),
    );
    let pool = TokenPool::new(
        log.clone(),
        client.clone(),
        Duration::from_millis(5),
        Duration::from_millis(20),
    );
    pool.load(&[Token::new("ghp_test")]).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2021, 1, 15).unwrap();
    let seen = scan::scan_day(log.as_ref(), client.as_ref(), &pool, day, 100)
        .await
        .unwrap();
    assert_eq!(seen, 1);

    // A repo without a reported language lands as Unknown.
    let repo_seen = log.read_from_earliest(&topics::repo_seen()).await.unwrap();
    let repo = RepoFact::from_wire(std::str::from_utf8(&repo_seen[0]).unwrap()).unwrap();
    assert_eq!(repo, RepoFact::new(7, "acme".to_string(), "widget".to_string(), "Unknown".to_string()));

    let commits = log.read_from_earliest(&topics::commit_facts()).await.unwrap();
    let fact = CommitFact::from_wire(std::str::from_utf8(&commits[0]).unwrap()).unwrap();
    assert_eq!(fact, CommitFact::new(7, 1, "acme".to_string(), "widget".to_string()));

    let tests = log.read_from_earliest(&topics::repo_with_tests()).await.unwrap();
    let event = LanguageEvent::from_wire(std::str::from_utf8(&tests[0]).unwrap()).unwrap();
    assert_eq!(event, LanguageEvent::new(7, "Unknown".to_string()));

    // `.drone.yml` matched, so a CI sighting is published too.
    let ci = log.read_from_earliest(&topics::repo_with_ci()).await.unwrap();
    assert_eq!(ci.len(), 1);

    // The token is back on the free topic once the scan is over.
    let free = log.read_from_earliest(&topics::free_token()).await.unwrap();
    assert_eq!(free.last().unwrap(), &b"ghp_test".to_vec());
}

#[tokio::test]
async fn rate_limited_token_is_parked_and_the_next_one_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "created:2021-02-01"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_raw(r#"{"message": "API rate limit exceeded"}"#, "application/json"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"total_count": 0, "items": []}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryLog::new());
    let client = Arc::new(
        GithubClientBuilder::default()
            .with_api_url(server.uri())
            .build()
            .unwrap(),
    );
    let pool = TokenPool::new(
        log.clone(),
        client.clone(),
        Duration::from_millis(5),
        Duration::from_millis(20),
    );
    pool.load(&[Token::new("ghp_first"), Token::new("ghp_second")]).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
    let seen = scan::scan_day(log.as_ref(), client.as_ref(), &pool, day, 100)
        .await
        .unwrap();
    assert_eq!(seen, 0);

    // The rejected token was parked, not lost.
    let standby = log.read_from_earliest(&topics::standby_token()).await.unwrap();
    assert_eq!(standby, vec![b"ghp_first".to_vec()]);
}
