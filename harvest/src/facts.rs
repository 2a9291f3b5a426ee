//! Fact types exchanged over the log and their tuple encodings.
//!
//! Field values are owner logins, repository names and language names as
//! reported by the hosting service; none of those may contain a single quote,
//! which keeps the quoting scheme escape-free.

use derive_more::Constructor;

use crate::wire::{self, WireError};

/// One newly created repository, produced once per repo per day scan.
///
/// Re-delivery is possible (at-least-once log), so consumers de-duplicate by
/// `repo_id`.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct RepoFact {
    pub repo_id: i64,
    pub owner: String,
    pub name: String,
    pub language: String,
}

impl RepoFact {
    pub fn to_wire(&self) -> String {
        format!(
            "({}, '{}', '{}', '{}')",
            self.repo_id, self.owner, self.name, self.language
        )
    }

    pub fn from_wire(input: &str) -> Result<Self, WireError> {
        let fields = wire::parse_tuple(input)?;
        wire::check_arity(&fields, 4)?;
        Ok(RepoFact {
            repo_id: wire::int_field(&fields, 0)?,
            owner: wire::text_field(&fields, 1)?.to_string(),
            name: wire::text_field(&fields, 2)?.to_string(),
            language: wire::text_field(&fields, 3)?.to_string(),
        })
    }
}

/// Commit count observed for a repository. Later facts for the same
/// `repo_id` supersede earlier ones in the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct CommitFact {
    pub repo_id: i64,
    pub commit_count: i64,
    pub owner: String,
    pub name: String,
}

impl CommitFact {
    pub fn to_wire(&self) -> String {
        format!(
            "({}, {}, '{}', '{}')",
            self.repo_id, self.commit_count, self.owner, self.name
        )
    }

    pub fn from_wire(input: &str) -> Result<Self, WireError> {
        let fields = wire::parse_tuple(input)?;
        wire::check_arity(&fields, 4)?;
        Ok(CommitFact {
            repo_id: wire::int_field(&fields, 0)?,
            commit_count: wire::int_field(&fields, 1)?,
            owner: wire::text_field(&fields, 2)?.to_string(),
            name: wire::text_field(&fields, 3)?.to_string(),
        })
    }
}

/// A test or CI sighting for a repository; the kind is carried by the topic
/// the event is published on.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct LanguageEvent {
    pub repo_id: i64,
    pub language: String,
}

impl LanguageEvent {
    pub fn to_wire(&self) -> String {
        format!("({}, '{}')", self.repo_id, self.language)
    }

    pub fn from_wire(input: &str) -> Result<Self, WireError> {
        let fields = wire::parse_tuple(input)?;
        wire::check_arity(&fields, 2)?;
        Ok(LanguageEvent {
            repo_id: wire::int_field(&fields, 0)?,
            language: wire::text_field(&fields, 1)?.to_string(),
        })
    }
}
