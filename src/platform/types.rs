use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::github::GithubApi;
use crate::clients::github_app_auth::InstallationTokens;

// -----------------------------------------------------------------------------
// Repository

/// A repository as seen by one platform adapter.
///
/// `platform_id` together with `namespace`/`name` identifies a repository
/// across all supported platforms.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Repository {
    /// Host slug derived from the clone URL, e.g. `github-com`.
    pub platform_id: String,
    /// Adapter family, `github` or `gitlab`.
    pub platform_type: String,
    pub id: i64,
    /// Organization, user or (nested) group owning the repository.
    pub namespace: String,
    pub name: String,
    /// `namespace/name`.
    pub path: String,
    pub description: String,
    /// Repository type, always `git`.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub clone_url: String,
    pub clone_ssh: String,
    pub default_branch: String,
    pub is_fork: bool,
    /// The repository has no commits yet.
    pub is_empty: bool,
    pub branches: Vec<String>,
    pub topics: Vec<String>,
    /// Platform-specific plan name, only filled when requested.
    pub plan: String,
    pub license_name: String,
    pub license_url: String,
    /// Head commit of the default branch, only filled when requested.
    pub commit_hash: String,
    pub commit_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub handle: RepositoryHandle,
}

/// Adapter-owned state attached to a repository.
///
/// Only the adapter that listed the repository reads it; everything else
/// treats it as opaque.
#[derive(Clone, Default)]
pub struct RepositoryHandle(Handle);

#[derive(Clone, Default)]
enum Handle {
    #[default]
    Detached,
    GithubInstallation {
        api: Arc<GithubApi>,
        tokens: Arc<InstallationTokens>,
    },
}

impl RepositoryHandle {
    pub(crate) fn github_installation(api: Arc<GithubApi>, tokens: Arc<InstallationTokens>) -> Self {
        Self(Handle::GithubInstallation { api, tokens })
    }

    pub(crate) fn github_api(&self) -> Option<&Arc<GithubApi>> {
        match &self.0 {
            Handle::GithubInstallation { api, .. } => Some(api),
            Handle::Detached => None,
        }
    }

    pub(crate) fn installation_tokens(&self) -> Option<&Arc<InstallationTokens>> {
        match &self.0 {
            Handle::GithubInstallation { tokens, .. } => Some(tokens),
            Handle::Detached => None,
        }
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Handle::Detached => f.write_str("Detached"),
            Handle::GithubInstallation { tokens, .. } => f
                .debug_struct("GithubInstallation")
                .field("installation_id", &tokens.installation_id())
                .finish(),
        }
    }
}

/// Extra per-repository lookups for [`super::Platform::repositories`].
///
/// Each flag costs one more upstream request per repository.
#[derive(Clone, Copy, Debug, Default)]
pub struct RepositoryListOpts {
    pub include_branches: bool,
    pub include_commit_hash: bool,
    pub include_plan: bool,
}

// -----------------------------------------------------------------------------
// Merge requests

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeRequest {
    pub id: i64,
    /// Project-scoped number, e.g. `42` in `!42` or `#42`.
    pub number: u64,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub state: MergeRequestState,
    pub pipeline_state: PipelineState,
    pub is_merged: bool,
    pub is_locked: bool,
    pub is_draft: bool,
    pub has_conflicts: bool,
    pub can_merge: bool,
    pub author: User,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestState {
    #[default]
    Open,
    Closed,
}

impl MergeRequestState {
    /// Map a GitHub pull request state (`open`, `closed`).
    pub fn from_github(state: &str) -> Self {
        match state {
            "open" => Self::Open,
            _ => Self::Closed,
        }
    }

    /// Map a GitLab merge request state (`opened`, `closed`, `locked`, `merged`).
    pub fn from_gitlab(state: &str) -> Self {
        match state {
            "opened" => Self::Open,
            _ => Self::Closed,
        }
    }
}

impl Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Unknown,
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
}

impl PipelineState {
    /// Map an upstream CI status. Covers GitLab pipeline statuses and GitHub
    /// check run statuses/conclusions; anything else is `Unknown`.
    pub fn from_upstream(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "waiting_for_resource" | "waiting" => Self::WaitingForResource,
            "preparing" => Self::Preparing,
            "pending" | "queued" | "requested" => Self::Pending,
            "running" | "in_progress" => Self::Running,
            "success" | "neutral" => Self::Success,
            "failed" | "failure" | "timed_out" | "startup_failure" | "error" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            "skipped" => Self::Skipped,
            "manual" | "action_required" => Self::Manual,
            "scheduled" => Self::Scheduled,
            _ => Self::Unknown,
        }
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Created => "created",
            Self::WaitingForResource => "waiting_for_resource",
            Self::Preparing => "preparing",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

/// Filter for [`super::Platform::merge_requests`]. `None` means no filter on
/// that dimension.
#[derive(Clone, Debug, Default)]
pub struct MergeRequestSearchOptions {
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub state: Option<MergeRequestState>,
    pub is_merged: Option<bool>,
    pub is_draft: Option<bool>,
    pub author_id: Option<i64>,
    pub author_username: Option<String>,
}

impl MergeRequestSearchOptions {
    /// Client-side check of every filter dimension. Adapters run this over
    /// server-filtered results so the outcome is identical on all platforms.
    pub fn matches(&self, mr: &MergeRequest) -> bool {
        fn check<T: PartialEq + ?Sized>(filter: Option<&T>, value: &T) -> bool {
            filter.is_none_or(|f| f == value)
        }

        check(self.source_branch.as_deref(), mr.source_branch.as_str())
            && check(self.target_branch.as_deref(), mr.target_branch.as_str())
            && check(self.state.as_ref(), &mr.state)
            && check(self.is_merged.as_ref(), &mr.is_merged)
            && check(self.is_draft.as_ref(), &mr.is_draft)
            && check(self.author_id.as_ref(), &mr.author.id)
            && check(self.author_username.as_deref(), mr.author.username.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeRequestDiff {
    pub changed_files: Vec<MergeRequestFileDiff>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeRequestFileDiff {
    pub is_new: bool,
    pub is_renamed: bool,
    pub is_deleted: bool,
    pub old_path: String,
    pub new_path: String,
    pub old_mode: String,
    pub new_mode: String,
    pub diff: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MergeStrategyOptions {
    pub squash: Option<bool>,
    pub remove_source_branch: Option<bool>,
}

// -----------------------------------------------------------------------------
// Users

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub name: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub state: UserState,
    pub created_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub avatar_url: String,
    pub global_administrator: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    User,
    Bot,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    #[default]
    Active,
    Suspended,
}

// -----------------------------------------------------------------------------
// Tags, releases, CI

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Tag {
    pub name: String,
    pub commit_hash: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Release {
    pub name: String,
    pub tag_name: String,
    pub description: String,
    pub commit_hash: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A CI variable. Secret values are never returned.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CIVariable {
    pub name: String,
    pub value: String,
    pub is_secret: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CIEnvironment {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// e.g. `staging`, `production`.
    pub tier: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// -----------------------------------------------------------------------------
// Credentials

/// HTTPS basic-auth credential for git transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Identity used for locally created commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "vcs-app".to_string(),
            email: "vcs-app@localhost".to_string(),
        }
    }
}
