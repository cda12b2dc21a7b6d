//! Commit message and branch name conventions.
//!
//! Commit headers follow Conventional Commits (`type(scope)!: description`).
//! The body may carry magic words such as `closes #42` or `wip #7` that link
//! the commit to issues and, for some words, imply a status change.
//!
//! Everything here is pure: no git calls, no storage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::model::TaskStatus;

static CONVENTIONAL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)(?:\(([^)]+)\))?(!)?:\s*(.+)").expect("valid header regex")
});

static ISSUE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)").expect("valid issue ref regex"));

static MAGIC_PATTERNS: LazyLock<Vec<(MagicAction, Regex)>> = LazyLock::new(|| {
    [
        (MagicAction::Fixes, r"(?i)\b(?:fix|fixes|close|closes|resolve|resolves)\s+#(\d+)"),
        (MagicAction::Refs, r"(?i)\b(?:refs?|relates?)\s+#(\d+)"),
        (MagicAction::Blocks, r"(?i)\bblocks?\s+#(\d+)"),
        (MagicAction::Depends, r"(?i)\bdepends?\s+#(\d+)"),
        (MagicAction::Wip, r"(?i)\bwip\s+#(\d+)"),
        (MagicAction::Review, r"(?i)\breview\s+#(\d+)"),
        (MagicAction::Done, r"(?i)\bdone\s+#(\d+)"),
    ]
    .into_iter()
    .map(|(action, pattern)| (action, Regex::new(pattern).expect("valid magic word regex")))
    .collect()
});

static ISSUE_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\w+)-(.+)$").expect("valid branch regex"));

static SHORT_ID_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-f0-9]{8})-(\w+)-(.+)$").expect("valid branch regex"));

static LEGACY_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+-\d+)(?:-(.+))?$").expect("valid branch regex"));

/// Longest slug `generate_branch_name` derives from a title.
const BRANCH_SLUG_MAX: usize = 30;

/// Keyword family recognized in a commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MagicAction {
    /// `fix`, `close`, `resolve` and their plurals.
    Fixes,
    /// `ref`, `relate` and their plurals.
    Refs,
    Blocks,
    Depends,
    Wip,
    Review,
    Done,
}

impl MagicAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixes => "fixes",
            Self::Refs => "refs",
            Self::Blocks => "blocks",
            Self::Depends => "depends",
            Self::Wip => "wip",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    /// Status a referenced task moves to, if this word implies one.
    #[must_use]
    pub const fn target_status(self) -> Option<TaskStatus> {
        match self {
            Self::Fixes | Self::Done => Some(TaskStatus::Done),
            Self::Wip => Some(TaskStatus::InProgress),
            Self::Review => Some(TaskStatus::InReview),
            Self::Refs | Self::Blocks | Self::Depends => None,
        }
    }
}

impl fmt::Display for MagicAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One magic word family and every issue it named, in message order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MagicWord {
    pub action: MagicAction,
    pub issue_ids: Vec<i64>,
}

/// Parsed commit message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    /// Conventional Commits type (`feat`, `fix`, ...).
    #[serde(rename = "type")]
    pub commit_type: Option<String>,
    pub scope: Option<String>,
    /// Header description, or the first line for non-conventional messages.
    pub description: String,
    pub breaking: bool,
    pub magic_words: Vec<MagicWord>,
    /// Every `#N` in the message, deduplicated, first occurrence first.
    pub issue_refs: Vec<i64>,
}

impl CommitInfo {
    /// Per-issue status implied by the magic words. See
    /// [`magic_word_status_changes`].
    #[must_use]
    pub fn status_changes(&self) -> BTreeMap<i64, TaskStatus> {
        magic_word_status_changes(&self.magic_words)
    }
}

/// Parse a commit message for its Conventional Commits header and magic
/// words.
#[must_use]
pub fn parse_commit_message(message: &str) -> CommitInfo {
    let header = CONVENTIONAL_HEADER.captures(message);
    let commit_type = header
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let scope = header
        .as_ref()
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().to_string());
    let bang = header.as_ref().is_some_and(|c| c.get(3).is_some());
    let description = header
        .as_ref()
        .and_then(|c| c.get(4))
        .map_or_else(
            || message.lines().next().unwrap_or_default().to_string(),
            |m| m.as_str().to_string(),
        );
    let breaking = bang || message.to_lowercase().contains("breaking change");

    let mut issue_refs: Vec<i64> = Vec::new();
    let mut magic_words = Vec::new();
    for (action, pattern) in MAGIC_PATTERNS.iter() {
        let issue_ids: Vec<i64> = pattern
            .captures_iter(message)
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();
        if issue_ids.is_empty() {
            continue;
        }
        for id in &issue_ids {
            push_unique(&mut issue_refs, *id);
        }
        magic_words.push(MagicWord {
            action: *action,
            issue_ids,
        });
    }

    for id in ISSUE_REF
        .captures_iter(message)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
    {
        push_unique(&mut issue_refs, id);
    }

    CommitInfo {
        commit_type,
        scope,
        description,
        breaking,
        magic_words,
        issue_refs,
    }
}

/// Fold magic words into one target status per issue. Words later in the
/// list win when two name the same issue; words with no status are skipped.
#[must_use]
pub fn magic_word_status_changes(words: &[MagicWord]) -> BTreeMap<i64, TaskStatus> {
    let mut changes = BTreeMap::new();
    for word in words {
        let Some(status) = word.action.target_status() else {
            continue;
        };
        for id in &word.issue_ids {
            changes.insert(*id, status);
        }
    }
    changes
}

fn push_unique(ids: &mut Vec<i64>, id: i64) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Recognized branch naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFormat {
    /// `42-feat-user-auth`
    Issue,
    /// `abc12345-feat-user-auth` (short task id prefix)
    ShortId,
    /// `PM-123-user-auth`
    Legacy,
    Unknown,
}

/// Parsed branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub branch: String,
    pub issue_number: Option<i64>,
    pub branch_type: Option<String>,
    pub description: Option<String>,
    pub format: BranchFormat,
}

/// Parse a branch name into its issue number, type and slug.
#[must_use]
pub fn parse_branch_name(branch: &str) -> BranchInfo {
    let capture = |c: &regex::Captures<'_>, i: usize| c.get(i).map(|m| m.as_str().to_string());

    if let Some(c) = ISSUE_BRANCH.captures(branch) {
        return BranchInfo {
            branch: branch.to_string(),
            issue_number: c.get(1).and_then(|m| m.as_str().parse().ok()),
            branch_type: capture(&c, 2),
            description: capture(&c, 3),
            format: BranchFormat::Issue,
        };
    }
    if let Some(c) = SHORT_ID_BRANCH.captures(branch) {
        return BranchInfo {
            branch: branch.to_string(),
            issue_number: None,
            branch_type: capture(&c, 2),
            description: capture(&c, 3),
            format: BranchFormat::ShortId,
        };
    }
    if let Some(c) = LEGACY_BRANCH.captures(branch) {
        return BranchInfo {
            branch: branch.to_string(),
            issue_number: None,
            branch_type: None,
            description: capture(&c, 2),
            format: BranchFormat::Legacy,
        };
    }
    BranchInfo {
        branch: branch.to_string(),
        issue_number: None,
        branch_type: None,
        description: None,
        format: BranchFormat::Unknown,
    }
}

/// Build `{number}-{type}-{slug}` where the slug is the lowercased title with
/// runs of non-alphanumerics collapsed to `-`, at most 30 characters.
#[must_use]
pub fn generate_branch_name(number: impl fmt::Display, branch_type: &str, title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(BRANCH_SLUG_MAX);
    let slug = slug.trim_end_matches('-');
    format!("{number}-{branch_type}-{slug}")
}
