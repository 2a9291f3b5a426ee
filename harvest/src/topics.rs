//! Catalog of the topics the pipeline runs on.
//!
//! Centralizing the names keeps producers and consumers agreeing on both the
//! topic and the namespace it lives in. Work-queue topics sit in the
//! transient namespace; facts and results sit in the retained one so late
//! joiners and replays can always read them from the earliest offset.

use chrono::NaiveDate;

use crate::log::TopicAddr;

/// Init handshake marker topic.
pub fn initialized() -> TopicAddr {
    TopicAddr::retained("initialized")
}

/// Shared work queue of calendar days awaiting a scan.
pub fn day_to_process() -> TopicAddr {
    TopicAddr::work("day_to_process")
}

/// Audit trail of days a worker finished popping.
pub fn days_processed() -> TopicAddr {
    TopicAddr::retained("days_processed")
}

/// Tokens believed to have quota remaining.
pub fn free_token() -> TopicAddr {
    TopicAddr::retained("free_token")
}

/// Tokens parked after a rate-limit rejection.
pub fn standby_token() -> TopicAddr {
    TopicAddr::retained("standby_token")
}

/// Commit-count facts feeding the ranking aggregator.
pub fn commit_facts() -> TopicAddr {
    TopicAddr::retained("commit_repo_info")
}

/// Every repository sighted during a day scan.
pub fn repo_seen() -> TopicAddr {
    TopicAddr::work("basic_repo_info")
}

/// Repositories found to carry test files.
pub fn repo_with_tests() -> TopicAddr {
    TopicAddr::work("repo_with_tests")
}

/// Repositories found to carry a CI configuration.
pub fn repo_with_ci() -> TopicAddr {
    TopicAddr::retained("repo_with_ci")
}

/// Flush requests for the language aggregator, one language name each.
pub fn flush_language() -> TopicAddr {
    TopicAddr::retained("aggregate_languages_info")
}

/// Registry of every language name sighted so far.
pub fn languages() -> TopicAddr {
    TopicAddr::retained("languages")
}

/// Flushed per-language counter rows.
pub fn language_results() -> TopicAddr {
    TopicAddr::retained("language_results")
}

/// Leaderboard snapshot for one cutoff day. Each snapshot gets its own
/// topic so partial results never mix.
pub fn commit_result(cutoff: &str) -> TopicAddr {
    TopicAddr::retained(format!("{}_result_commit", cutoff))
}

/// Formats a day the way it travels on the wire.
pub fn day_payload(day: NaiveDate) -> String {
    day.format(crate::days::DAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_split_transient_from_retained() {
        assert_eq!(
            day_to_process().to_string(),
            "persistent://public/default/day_to_process"
        );
        assert_eq!(
            commit_facts().to_string(),
            "persistent://public/static/commit_repo_info"
        );
    }

    #[test]
    fn snapshot_topics_are_distinct_per_cutoff() {
        assert_ne!(commit_result("2021-01-15"), commit_result("final"));
        assert_eq!(
            commit_result("2021-01-15").to_string(),
            "persistent://public/static/2021-01-15_result_commit"
        );
    }
}
