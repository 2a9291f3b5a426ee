use clap::Parser;
use harvest::days::ScanOrder;
use secrecy::SecretString;
use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Calendar year to scan
    #[clap(short, long, env, default_value_t = 2021, parse(try_from_str=year_in_range))]
    pub year: i32,

    /// Order in which days are queued
    #[clap(short, long, env, default_value = "ascending")]
    pub order: ScanOrder,

    /// File with one API token per line, `#` starts a comment
    #[clap(short, long, env, default_value = "tokens.txt")]
    pub token_file: String,

    /// Extra API OAuth access token, added to the pool
    #[clap(short, long, env)]
    pub api_token: Option<SecretString>,

    /// Repository API URL
    #[clap(long, env, default_value = "https://api.github.com")]
    pub api_url: String,

    /// Leaderboard size
    #[clap(long, env, default_value_t = 100, parse(try_from_str=top_repos_in_range))]
    pub top_repos: usize,

    /// Partial review cadence, in processed days
    #[clap(long, env, default_value_t = 15, parse(try_from_str=days_to_review_in_range))]
    pub days_to_review: u32,

    /// Repositories per listing page
    #[clap(long, env, default_value_t = 100, parse(try_from_str=per_page_in_range))]
    pub per_page: u32,

    /// Seconds to wait on an empty topic before giving up a poll
    #[clap(long, env, default_value_t = 5)]
    pub receive_timeout_secs: u64,

    /// Seconds to back off when no token is available
    #[clap(long, env, default_value_t = 30)]
    pub token_backoff_secs: u64,

    /// Seconds between startup barrier polls
    #[clap(long, env, default_value_t = 2)]
    pub init_poll_secs: u64,
}

fn year_in_range(value: &str) -> clap::Result<i32, String> {
    number_in_range(value, 2008, 9999, "year".to_string())
}

fn top_repos_in_range(value: &str) -> clap::Result<usize, String> {
    number_in_range(value, 1, 10_000, "top_repos".to_string())
}

fn days_to_review_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 1, 366, "days_to_review".to_string())
}

fn per_page_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 1, 100, "per_page".to_string())
}

fn number_in_range<T>(value: &str, min: T, max: T, name: String) -> clap::Result<T, String>
where
    T: FromStr + PartialOrd + Display,
    <T as FromStr>::Err: Display,
{
    value.parse::<T>().map_err(|err| format!("{}", err)).and_then(|value| {
        if value < min || value > max {
            return Err(format!("{} is not in range {} .. {}.", name, min, max));
        }
        Ok(value)
    })
}
