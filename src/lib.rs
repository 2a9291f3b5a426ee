use std::sync::Arc;
use std::time::Duration;

use github_client::GithubClientBuilder;
use harvest::barrier::InitBarrier;
use harvest::days::{DayQueue, DayRange, NextDay};
use harvest::languages::{self, LanguageStats};
use harvest::memory::MemoryLog;
use harvest::ranking::{CommitRank, Cutoff};
use harvest::tokens::{parse_token_file, Token, TokenPool};
use harvest::{Error, Result};
use log::info;
use secrecy::ExposeSecret;

mod args;
pub mod scan;

pub use args::Args;

pub async fn run(args: Args) -> Result<()> {
    let receive_timeout = Duration::from_secs(args.receive_timeout_secs);

    let mut tokens = parse_token_file(&std::fs::read_to_string(&args.token_file)?);
    if let Some(token) = &args.api_token {
        tokens.push(Token::new(token.expose_secret().clone()));
    }
    if tokens.is_empty() {
        return Err(Error::Error("no API tokens configured"));
    }

    let log = Arc::new(MemoryLog::new());
    let client = Arc::new(
        GithubClientBuilder::default()
            .with_api_url(&args.api_url)
            .build()?,
    );

    let rank = Arc::new(CommitRank::new(log.clone(), args.top_repos));
    let range = DayRange::calendar_year(args.year, args.order)?;
    let mut queue = DayQueue::new(log.clone(), range, args.days_to_review, receive_timeout)
        .with_review(rank.clone());
    let pool = TokenPool::new(
        log.clone(),
        client.clone(),
        Duration::from_secs(args.token_backoff_secs),
        receive_timeout,
    );

    let barrier = InitBarrier::new(log.clone(), Duration::from_secs(args.init_poll_secs));
    barrier
        .ensure_initialized(|| async {
            queue.populate().await?;
            pool.load(&tokens).await
        })
        .await?;

    let mut stats = LanguageStats::new(log.clone(), receive_timeout);
    loop {
        match queue.pop_next_day().await? {
            NextDay::Day(day) => {
                scan::scan_day(log.as_ref(), client.as_ref(), &pool, day, args.per_page).await?;
                stats.drain().await?;
            }
            NextDay::Done => break,
        }
    }

    info!("scan complete, flushing results");
    languages::request_flush_all(log.as_ref()).await?;
    stats.drain().await?;
    for entry in rank.snapshot(Cutoff::Final).await? {
        println!("{}", entry);
    }
    Ok(())
}
