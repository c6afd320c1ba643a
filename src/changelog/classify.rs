//! Rule-based commit message classification.
//!
//! Rules are tried in a fixed order and the first match wins. The keyword
//! fallback only runs when no structured prefix matched, and it looks at the
//! original message.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Feature,
    Fix,
    Docs,
    Style,
    Refactor,
    Perf,
    Test,
    Chore,
    Other,
}

impl CommitType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Fix => "fix",
            Self::Docs => "docs",
            Self::Style => "style",
            Self::Refactor => "refactor",
            Self::Perf => "perf",
            Self::Test => "test",
            Self::Chore => "chore",
            Self::Other => "other",
        }
    }

    fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "feat" | "feature" | "update" => Self::Feature,
            "fix" => Self::Fix,
            "docs" => Self::Docs,
            "style" => Self::Style,
            "refactor" => Self::Refactor,
            "perf" => Self::Perf,
            "test" => Self::Test,
            "chore" => Self::Chore,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: CommitType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub clean_message: String,
}

impl Classification {
    fn new(kind: CommitType, clean_message: &str) -> Self {
        Self {
            kind,
            scope: None,
            clean_message: clean_message.trim().to_owned(),
        }
    }
}

static UPDATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^update:\s*(.*)$").expect("valid regex"));

static CONVENTIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^(feat|feature|fix|docs|style|refactor|perf|test|chore)(?:\(([^)]*)\))?:\s*(.*)$",
    )
    .expect("valid regex")
});

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\[(feat|feature|fix|docs|style|refactor|perf|test|chore|update)\]\s*(.*)$")
        .expect("valid regex")
});

// Individually checked prefixes; these also accept the full-width colon.
static PREFIXES: LazyLock<Vec<(Regex, CommitType)>> = LazyLock::new(|| {
    [
        (r"(?is)^fix\s*[:：]\s*(.*)$", CommitType::Fix),
        (r"(?is)^perf\s*[:：]\s*(.*)$", CommitType::Perf),
        (r"(?is)^docs\s*[:：]\s*(.*)$", CommitType::Docs),
        (r"(?is)^feat(?:ure)?\s*[:：]\s*(.*)$", CommitType::Feature),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("valid regex"), kind))
    .collect()
});

// Order matters: a message mentioning both a fix and a refactor is a fix.
const KEYWORDS: &[(CommitType, &[&str])] = &[
    (CommitType::Fix, &["fix", "修复", "bug", "修正", "解决"]),
    (CommitType::Perf, &["perf", "优化", "性能", "提升"]),
    (CommitType::Docs, &["docs", "文档", "readme"]),
    (CommitType::Feature, &["feat", "新增", "添加", "增加", "新功能"]),
    (CommitType::Style, &["style", "样式", "美化"]),
    (CommitType::Refactor, &["refactor", "重构"]),
];

pub fn classify(message: &str) -> Classification {
    let trimmed = message.trim();

    if let Some(caps) = UPDATE_PREFIX.captures(trimmed) {
        return Classification::new(CommitType::Feature, capture(&caps, 1));
    }

    if let Some(caps) = CONVENTIONAL.captures(trimmed) {
        let scope = caps
            .get(2)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        return Classification {
            scope,
            ..Classification::new(CommitType::from_token(capture(&caps, 1)), capture(&caps, 3))
        };
    }

    if let Some(caps) = BRACKETED.captures(trimmed) {
        return Classification::new(CommitType::from_token(capture(&caps, 1)), capture(&caps, 2));
    }

    for (pattern, kind) in PREFIXES.iter() {
        if let Some(caps) = pattern.captures(trimmed) {
            return Classification::new(*kind, capture(&caps, 1));
        }
    }

    let lowered = message.to_lowercase();
    let kind = KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map_or(CommitType::Other, |(kind, _)| *kind);

    Classification {
        kind,
        scope: None,
        clean_message: message.to_owned(),
    }
}

fn capture<'h>(caps: &regex::Captures<'h>, idx: usize) -> &'h str {
    caps.get(idx).map_or("", |m| m.as_str())
}
