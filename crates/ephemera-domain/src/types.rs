use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub Uuid);

impl std::fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── User ─────────────────────────────────────────────────────────────────────

/// Identity owner, keyed by the source host's numeric account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub github_id: i64,
    pub login: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(github_id: i64, login: impl Into<String>) -> Self {
        let now = Utc::now();
        User {
            id: UserId(Uuid::new_v4()),
            github_id,
            login: login.into(),
            email: None,
            avatar_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Environment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Pending,
    Provisioning,
    Ready,
    Updating,
    Destroying,
    Destroyed,
    Failed,
}

impl EnvironmentStatus {
    /// Whether `self -> next` is a legal transition in the environment lifecycle graph.
    pub fn can_transition_to(self, next: EnvironmentStatus) -> bool {
        use EnvironmentStatus::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Updating)
                | (Ready, Failed) // drift detected
                | (Updating, Ready)
                | (Updating, Failed)
                | (Destroying, Destroyed)
                | (Destroying, Failed)
                | (Failed, Provisioning) // retry within 1h / sweep
                // A pull request can close at any point in an environment's
                // active lifetime, not only once it reaches READY; the
                // diagram's left-hand spine draws PENDING falling straight
                // through to DESTROYING for exactly this reason.
                | (Pending, Destroying)
                | (Provisioning, Destroying)
                | (Ready, Destroying)
                | (Updating, Destroying)
                | (Failed, Destroying)
        )
    }

    /// The set of statuses considered "active" for `list_active_environments`.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EnvironmentStatus::Pending
                | EnvironmentStatus::Provisioning
                | EnvironmentStatus::Ready
                | EnvironmentStatus::Updating
        )
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentStatus::Pending => "pending",
            EnvironmentStatus::Provisioning => "provisioning",
            EnvironmentStatus::Ready => "ready",
            EnvironmentStatus::Updating => "updating",
            EnvironmentStatus::Destroying => "destroying",
            EnvironmentStatus::Destroyed => "destroyed",
            EnvironmentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub repository_full_name: String,
    pub repository_name: String,
    pub pr_number: i64,
    pub pr_title: String,
    pub branch_name: String,
    pub commit_sha: String,
    pub namespace: String,
    pub environment_url: String,
    pub status: EnvironmentStatus,
    pub installation_id: Option<i64>,
    pub owner_id: Option<UserId>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

/// Maximum length of the repository-name segment inside a derived namespace,
/// chosen so that `pr-{n}-{segment}` stays within the 63-char DNS-label limit
/// for any `u32` PR number.
const NAMESPACE_REPO_SEGMENT_LEN: usize = 20;

impl Environment {
    /// `pr-{pr_number}-{lowercased repo name, underscores -> hyphens, truncated to 20 chars}`.
    pub fn derive_namespace(repository_name: &str, pr_number: i64) -> String {
        let slug: String = repository_name
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' { '-' } else { c })
            .take(NAMESPACE_REPO_SEGMENT_LEN)
            .collect();
        let slug = slug.trim_matches('-');
        format!("pr-{pr_number}-{slug}")
    }

    /// `https://pr-{pr_number}-{repository_name_lowercased, _->-}.{base_domain}`.
    pub fn derive_environment_url(repository_name: &str, pr_number: i64, base_domain: &str) -> String {
        let slug: String = repository_name
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' { '-' } else { c })
            .collect();
        format!("https://pr-{pr_number}-{slug}.{base_domain}")
    }

    pub fn new(
        repository_full_name: impl Into<String>,
        repository_name: impl Into<String>,
        pr_number: i64,
        pr_title: impl Into<String>,
        branch_name: impl Into<String>,
        commit_sha: impl Into<String>,
        installation_id: Option<i64>,
        owner_id: Option<UserId>,
        base_domain: &str,
    ) -> Self {
        let repository_name = repository_name.into();
        let namespace = Self::derive_namespace(&repository_name, pr_number);
        let environment_url = Self::derive_environment_url(&repository_name, pr_number, base_domain);
        let now = Utc::now();
        Environment {
            id: EnvironmentId(Uuid::new_v4()),
            repository_full_name: repository_full_name.into(),
            repository_name,
            pr_number,
            pr_title: pr_title.into(),
            branch_name: branch_name.into(),
            commit_sha: commit_sha.into(),
            namespace,
            environment_url,
            status: EnvironmentStatus::Pending,
            installation_id,
            owner_id,
            error_message: None,
            created_at: now,
            updated_at: now,
            last_deployed_at: None,
            destroyed_at: None,
        }
    }
}

// ── Deployment ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    InProgress,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub environment_id: EnvironmentId,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: Option<String>,
    pub ai_generated: bool,
    pub ai_plan: Option<String>,
    pub ai_fallback_reason: Option<String>,
}

impl Deployment {
    pub fn new(environment_id: EnvironmentId, commit_sha: impl Into<String>, commit_message: Option<String>) -> Self {
        Deployment {
            id: DeploymentId(Uuid::new_v4()),
            environment_id,
            commit_sha: commit_sha.into(),
            commit_message,
            status: DeploymentStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            logs: None,
            ai_generated: false,
            ai_plan: None,
            ai_fallback_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_derivation_truncates_long_repo_names() {
        let ns = Environment::derive_namespace("a-repository-name-that-is-long", 7);
        assert_eq!(ns, "pr-7-a-repository-name-th");
        assert!(ns.len() <= 63);
    }

    #[test]
    fn namespace_derivation_replaces_underscores() {
        let ns = Environment::derive_namespace("My_Widget", 42);
        assert_eq!(ns, "pr-42-my-widget");
    }

    #[test]
    fn environment_url_lowercases_and_replaces_underscores() {
        let url = Environment::derive_environment_url("My_Widget", 7, "preview.example.com");
        assert_eq!(url, "https://pr-7-my-widget.preview.example.com");
    }

    #[test]
    fn legal_transitions_cover_happy_path() {
        use EnvironmentStatus::*;
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Destroying));
        assert!(Destroying.can_transition_to(Destroyed));
        assert!(!Destroyed.can_transition_to(Ready));
        assert!(!Pending.can_transition_to(Destroyed));
    }

    #[test]
    fn failed_can_retry_into_provisioning() {
        assert!(EnvironmentStatus::Failed.can_transition_to(EnvironmentStatus::Provisioning));
    }

    #[test]
    fn a_pull_request_can_close_from_any_active_status() {
        use EnvironmentStatus::*;
        assert!(Pending.can_transition_to(Destroying));
        assert!(Provisioning.can_transition_to(Destroying));
        assert!(Updating.can_transition_to(Destroying));
        assert!(Failed.can_transition_to(Destroying));
        assert!(!Destroyed.can_transition_to(Destroying));
    }

    #[test]
    fn deployment_terminal_statuses() {
        assert!(DeploymentStatus::Success.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(!DeploymentStatus::Queued.is_terminal());
        assert!(!DeploymentStatus::InProgress.is_terminal());
    }
}
