use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::changelog::classify::{CommitType, classify};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One changelog line, as cached under `changelog_cache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEntry {
    pub id: String,
    /// ISO-8601 author timestamp.
    pub date: String,
    pub author: CommitAuthor,
    pub message: String,
    pub commit_url: String,
    #[serde(rename = "type")]
    pub kind: CommitType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    commit: RawCommitInfo,
    html_url: String,
    #[serde(default)]
    author: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawCommitInfo {
    author: RawSignature,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    name: String,
    date: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
    avatar_url: String,
}

impl CommitEntry {
    /// Builds an entry from a GitHub commit record. Only the first line of the
    /// commit message is kept.
    pub fn from_raw(raw: serde_json::Value) -> anyhow::Result<Self> {
        let raw: RawCommit = serde_json::from_value(raw)?;
        let subject = raw.commit.message.lines().next().unwrap_or_default();
        let classified = classify(subject);
        Ok(Self {
            id: raw.sha,
            date: raw.commit.author.date,
            author: CommitAuthor {
                name: raw.commit.author.name,
                avatar: raw.author.as_ref().map(|u| u.avatar_url.clone()),
                username: raw.author.map(|u| u.login),
            },
            message: classified.clean_message,
            commit_url: raw.html_url,
            kind: classified.kind,
            scope: classified.scope,
        })
    }

    /// Calendar day of the commit, taken from the timestamp's date portion.
    pub fn day(&self) -> Option<NaiveDate> {
        let date = self.date.get(..10)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

/// Converts a page of raw records, skipping the ones that do not parse.
pub fn entries_from_raw(records: Vec<serde_json::Value>) -> Vec<CommitEntry> {
    records
        .into_iter()
        .filter_map(|record| match CommitEntry::from_raw(record) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed commit record");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayGroup {
    pub day: NaiveDate,
    pub entries: Vec<CommitEntry>,
}

/// Buckets entries by day, newest day first. Entry order within a day is kept.
pub fn group_by_day(entries: &[CommitEntry]) -> Vec<DayGroup> {
    let mut days: BTreeMap<NaiveDate, Vec<CommitEntry>> = BTreeMap::new();
    for entry in entries {
        match entry.day() {
            Some(day) => days.entry(day).or_default().push(entry.clone()),
            None => tracing::warn!(id = %entry.id, date = %entry.date, "commit without a valid date"),
        }
    }
    days.into_iter()
        .rev()
        .map(|(day, entries)| DayGroup { day, entries })
        .collect()
}
