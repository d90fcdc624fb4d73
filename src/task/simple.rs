use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use tracing::info;

use super::TaskContext;
use crate::clients::git::GitClient;

/// Step-by-step helper for tasks that change files and propose them as a
/// merge request: clone, create a branch, edit the checkout, then
/// [`commit_push_and_merge_request`](Self::commit_push_and_merge_request).
pub struct SimpleTask<'a> {
    ctx: &'a TaskContext<'a>,
    git: Option<GitClient>,
    branch: Option<String>,
}

impl<'a> SimpleTask<'a> {
    pub fn new(ctx: &'a TaskContext<'a>) -> Self {
        Self {
            ctx,
            git: None,
            branch: None,
        }
    }

    /// Local checkout, available after [`clone_repository`](Self::clone_repository).
    pub fn git(&self) -> Option<&GitClient> {
        self.git.as_ref()
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Clone the repository's default branch into the scratch directory.
    pub async fn clone_repository(&mut self) -> Result<()> {
        let repo = self.ctx.repository;
        let credential = self.ctx.platform.auth_method(repo).await?;

        let git = GitClient::clone(
            &repo.clone_url,
            &self.ctx.directory,
            &repo.default_branch,
            Some(&credential),
        )
        .await
        .context("Failed to clone repository")?;

        self.git = Some(git);
        Ok(())
    }

    /// Create and check out `name`. Requires a prior clone.
    pub async fn create_branch(&mut self, name: &str) -> Result<()> {
        let Some(git) = &self.git else {
            bail!("No checkout available, clone the repository first");
        };

        git.create_branch(name)
            .await
            .context("Failed to create branch")?;
        self.branch = Some(name.to_string());
        Ok(())
    }

    /// Publish pending changes on the branch (if any), then create or update
    /// the merge request identified by `key`.
    pub async fn commit_push_and_merge_request(
        &self,
        commit_message: &str,
        title: &str,
        description: &str,
        key: &str,
    ) -> Result<()> {
        let Some(git) = &self.git else {
            bail!("No checkout available, clone the repository first");
        };
        let Some(branch) = &self.branch else {
            bail!("No branch checked out, create a branch first");
        };
        let platform = self.ctx.platform;
        let repo = self.ctx.repository;

        if !git.is_clean().await? {
            let head = git.head().await?;
            platform
                .commit_and_push(repo, &head.0, branch, commit_message, &self.ctx.directory)
                .await
                .context("Failed to commit and push")?;
            info!(repo = %repo.path, branch, "pushed changes");
        }

        platform
            .create_or_update_merge_request(repo, branch, title, description, key)
            .await?;
        info!(repo = %repo.path, branch, "created or updated merge request");

        Ok(())
    }
}
