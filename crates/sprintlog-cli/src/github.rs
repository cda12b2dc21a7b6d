//! GitHub REST client implementing the engine's `IssueTracker` contract.
//!
//! Blocking `ureq` calls with a per-request timeout. Pull requests come back
//! from the issues endpoint too and are filtered out.

use anyhow::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sprintlog_core::sync::{
    IssueState, IssueTracker, IssueUpdate, NewIssue, RemoteIssue, RepoInfo, TrackerError,
};
use sprintlog_core::timestamp::parse_rfc3339_us;
use std::time::Duration;

const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((owner, repo)) = trimmed.split_once('/') else {
            anyhow::bail!("invalid repo slug '{trimmed}': expected <owner>/<repo>");
        };
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            anyhow::bail!("invalid repo slug '{trimmed}': expected <owner>/<repo>");
        }
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    html_url: String,
    updated_at: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    owner: GitHubOwner,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    login: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

impl GitHubIssue {
    fn into_remote(self) -> Result<RemoteIssue, TrackerError> {
        let updated_at_us = parse_rfc3339_us(&self.updated_at).ok_or_else(|| {
            TrackerError::Transport(format!(
                "issue #{} has unparseable updated_at '{}'",
                self.number, self.updated_at
            ))
        })?;
        let state = if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        Ok(RemoteIssue {
            number: self.number,
            title: self.title,
            body: self.body,
            state,
            url: self.html_url,
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            updated_at_us,
        })
    }
}

/// Issues from one page of the listing, without pull requests.
fn issues_from_page(batch: Vec<GitHubIssue>) -> Result<Vec<RemoteIssue>, TrackerError> {
    batch
        .into_iter()
        .filter(|issue| issue.pull_request.is_none())
        .map(GitHubIssue::into_remote)
        .collect()
}

fn status_error(status: u16, message: String, issue: Option<i64>) -> TrackerError {
    match (status, issue) {
        (401, _) => TrackerError::Unauthenticated,
        (404, Some(number)) => TrackerError::NotFound(number),
        _ => TrackerError::Api { status, message },
    }
}

pub struct GithubClient {
    agent: ureq::Agent,
    api_url: String,
    repo: RepoSlug,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_url: &str, repo: RepoSlug, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("sprintlog/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.api_url, self.repo.owner, self.repo.repo
        )
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        let request = request
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn send<T: DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: Option<serde_json::Value>,
        issue: Option<i64>,
    ) -> Result<T, TrackerError> {
        let url = request.url().to_string();
        let request = self.authorize(request);
        let outcome = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_json::<ApiMessage>()
                    .unwrap_or_default()
                    .message;
                tracing::debug!(url = %url, status, message = %message, "github api error");
                return Err(status_error(status, message, issue));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(TrackerError::Transport(transport.to_string()));
            }
        };
        response
            .into_json::<T>()
            .map_err(|err| TrackerError::Transport(format!("undecodable response from {url}: {err}")))
    }
}

impl IssueTracker for GithubClient {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn repo_info(&self) -> Result<RepoInfo, TrackerError> {
        let repo: GitHubRepo = self.send(self.agent.get(&self.repo_url("")), None, None)?;
        Ok(RepoInfo {
            owner: repo.owner.login,
            name: repo.name,
            url: repo.html_url,
        })
    }

    fn list_issues(&self) -> Result<Vec<RemoteIssue>, TrackerError> {
        let mut issues = Vec::new();
        let mut page = 1_u32;
        loop {
            let url = self.repo_url(&format!(
                "/issues?state=all&per_page={PER_PAGE}&page={page}&sort=created&direction=asc"
            ));
            let batch: Vec<GitHubIssue> = self.send(self.agent.get(&url), None, None)?;
            let raw_len = batch.len();
            issues.extend(issues_from_page(batch)?);
            if raw_len < PER_PAGE {
                break;
            }
            page += 1;
        }
        tracing::debug!(count = issues.len(), pages = page, "listed github issues");
        Ok(issues)
    }

    fn get_issue(&self, number: i64) -> Result<RemoteIssue, TrackerError> {
        let url = self.repo_url(&format!("/issues/{number}"));
        let issue: GitHubIssue = self.send(self.agent.get(&url), None, Some(number))?;
        issue.into_remote()
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssue, TrackerError> {
        let body = serde_json::to_value(issue)
            .map_err(|err| TrackerError::Transport(err.to_string()))?;
        let created: GitHubIssue =
            self.send(self.agent.post(&self.repo_url("/issues")), Some(body), None)?;
        created.into_remote()
    }

    fn update_issue(&self, number: i64, update: &IssueUpdate) -> Result<RemoteIssue, TrackerError> {
        let url = self.repo_url(&format!("/issues/{number}"));
        let body = serde_json::to_value(update)
            .map_err(|err| TrackerError::Transport(err.to_string()))?;
        let updated: GitHubIssue =
            self.send(self.agent.request("PATCH", &url), Some(body), Some(number))?;
        updated.into_remote()
    }
}
