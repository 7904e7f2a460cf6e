//! C7 decode half: turns a verified GitHub `pull_request` webhook payload
//! into the narrow [`PullRequestEvent`] the lifecycle controller needs.
//! Signature verification happens one layer up, in the HTTP handler, since it
//! needs the raw request body bytes this crate never sees.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ControllerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    OpenedOrReopened,
    Synchronize,
    Closed,
}

#[derive(Debug, Clone)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub repository_full_name: String,
    pub repository_name: String,
    pub pr_number: i64,
    pub pr_title: String,
    pub branch_name: String,
    pub commit_sha: String,
    pub installation_id: Option<i64>,
    pub merged: bool,
    pub author: Option<PullRequestAuthor>,
}

/// `pull_request.user.{id,login,avatar_url}` — consulted to find-or-create
/// the owning [`ephemera_store`] User the first time a PR is opened.
#[derive(Debug, Clone)]
pub struct PullRequestAuthor {
    pub github_id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct RawRepository {
    full_name: String,
    name: String,
}

#[derive(Deserialize)]
struct RawHead {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Deserialize)]
struct RawUser {
    id: i64,
    login: String,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct RawPullRequest {
    number: i64,
    title: String,
    head: RawHead,
    merged: Option<bool>,
    user: Option<RawUser>,
}

#[derive(Deserialize)]
struct RawInstallation {
    id: i64,
}

#[derive(Deserialize)]
struct RawPullRequestWebhook {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
    installation: Option<RawInstallation>,
}

/// Returns `None` for event types or actions this controller does not act on
/// (e.g. `pull_request` actions other than opened/reopened/synchronize/closed,
/// or any non-`pull_request` GitHub event).
pub fn parse_pull_request_event(github_event: &str, payload: &Value) -> Result<Option<PullRequestEvent>, ControllerError> {
    if github_event != "pull_request" {
        return Ok(None);
    }

    let raw: RawPullRequestWebhook =
        serde_json::from_value(payload.clone()).map_err(|e| ControllerError::MalformedEvent(e.to_string()))?;

    let action = match raw.action.as_str() {
        "opened" | "reopened" => PullRequestAction::OpenedOrReopened,
        "synchronize" => PullRequestAction::Synchronize,
        "closed" => PullRequestAction::Closed,
        _ => return Ok(None),
    };

    let author = raw.pull_request.user.map(|u| PullRequestAuthor { github_id: u.id, login: u.login, avatar_url: u.avatar_url });

    Ok(Some(PullRequestEvent {
        action,
        repository_full_name: raw.repository.full_name,
        repository_name: raw.repository.name,
        pr_number: raw.pull_request.number,
        pr_title: raw.pull_request.title,
        branch_name: raw.pull_request.head.git_ref,
        commit_sha: raw.pull_request.head.sha,
        installation_id: raw.installation.map(|i| i.id),
        merged: raw.pull_request.merged.unwrap_or(false),
        author,
    }))
}
