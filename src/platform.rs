//! Platform abstraction: one trait, three hosting adapters.
//!
//! - [`github_app`]: GitHub App identity (installation tokens, tree commits)
//! - [`github_user`]: GitHub personal access token (tree commits)
//! - [`gitlab_user`]: GitLab personal access token (local commit + push)
//!
//! Tasks are written against [`Platform`] only and never look inside a
//! [`Repository`]'s handle.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

pub mod error;
pub mod github;
pub mod github_app;
pub mod github_user;
pub mod gitlab_user;
pub mod paging;
pub mod tree;
pub mod types;
pub mod upsert;
pub mod util;

pub use error::PlatformError;
pub use types::*;

// -----------------------------------------------------------------------------
// Platform trait

/// Operations every hosting adapter provides.
///
/// Collection methods aggregate all upstream pages before returning.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Human-readable platform name, e.g. `GitHub`.
    fn name(&self) -> &'static str;

    /// Lowercase identifier, e.g. `github`.
    fn slug(&self) -> &'static str;

    /// All repositories this identity can act on.
    async fn repositories(&self, opts: RepositoryListOpts) -> Result<Vec<Repository>>;

    /// Look up `namespace/name`. Fails with [`PlatformError::NotFound`] if
    /// the repository does not exist or is not accessible.
    async fn find_repository(&self, path: &str) -> Result<Repository>;

    async fn merge_requests(
        &self,
        repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>>;

    async fn merge_request_diff(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
    ) -> Result<MergeRequestDiff>;

    /// Approve, or request changes with `message` as the review body.
    async fn submit_review(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        approved: bool,
        message: Option<String>,
    ) -> Result<()>;

    async fn merge(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        strategy: &MergeStrategyOptions,
    ) -> Result<()>;

    /// Language name to byte count.
    async fn languages(&self, repo: &Repository) -> Result<HashMap<String, u64>>;

    /// HTTPS credential for cloning and pushing `repo`.
    async fn auth_method(&self, repo: &Repository) -> Result<Credential>;

    /// Publish the working tree at `dir` as a new commit on `branch`,
    /// parented on `base_commit`. The branch is force-updated.
    async fn commit_and_push(
        &self,
        repo: &Repository,
        base_commit: &str,
        branch: &str,
        message: &str,
        dir: &Path,
    ) -> Result<()>;

    /// Open a merge request from `source_branch` into the default branch.
    async fn create_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest>;

    /// Update the open merge request from `source_branch`, or create one.
    /// The description is stamped with the idempotency marker for `key`.
    async fn create_or_update_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
        key: &str,
    ) -> Result<()>;

    async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String>;

    /// Most recent tags, at most `limit`.
    async fn tags(&self, repo: &Repository, limit: usize) -> Result<Vec<Tag>>;

    async fn releases(&self, repo: &Repository, limit: usize) -> Result<Vec<Release>>;

    async fn create_tag(
        &self,
        repo: &Repository,
        tag: &str,
        commit_hash: &str,
        message: &str,
    ) -> Result<()>;

    /// CI variables visible to the repository. Secret values are empty.
    async fn variables(&self, repo: &Repository) -> Result<Vec<CIVariable>>;

    async fn environments(&self, repo: &Repository) -> Result<Vec<CIEnvironment>>;

    async fn environment_variables(
        &self,
        repo: &Repository,
        environment: &str,
    ) -> Result<Vec<CIVariable>>;
}

/// Open, unmerged, non-draft merge requests across every repository.
///
/// Repositories whose merge requests cannot be listed are skipped with a
/// warning; only a failure to list repositories is returned.
pub async fn list_merge_requests(
    platform: &dyn Platform,
) -> Result<Vec<(Repository, MergeRequest)>> {
    let repositories = platform.repositories(RepositoryListOpts::default()).await?;

    let options = MergeRequestSearchOptions {
        state: Some(MergeRequestState::Open),
        is_merged: Some(false),
        is_draft: Some(false),
        ..Default::default()
    };

    let mut result = Vec::new();
    for repo in repositories {
        match platform.merge_requests(&repo, &options).await {
            Ok(mrs) => {
                for mr in mrs {
                    result.push((repo.clone(), mr));
                }
            }
            Err(err) => {
                warn!(repo = %repo.path, "failed to list merge requests: {:#}", err);
            }
        }
    }

    Ok(result)
}
