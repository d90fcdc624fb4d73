use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::CIEnvironment;
use super::CIVariable;
use super::Credential;
use super::MergeRequest;
use super::MergeRequestDiff;
use super::MergeRequestSearchOptions;
use super::MergeStrategyOptions;
use super::Platform;
use super::Release;
use super::Repository;
use super::RepositoryListOpts;
use super::Tag;
use super::github;
use super::github::GhRepository;
use super::github::GithubApi;
use crate::clients::http::Auth;
use crate::clients::http::HttpClient;

/// Acts as a GitHub user through a personal access token.
pub struct GithubUserPlatform {
    username: String,
    token: String,
    api: GithubApi,
}

impl GithubUserPlatform {
    pub fn new(api_url: &str, username: &str, token: &str) -> Result<Self> {
        let http = HttpClient::new(api_url, github::ACCEPT, Auth::Bearer(token.to_string()))?;
        Ok(Self {
            username: username.to_string(),
            token: token.to_string(),
            api: GithubApi::new(http),
        })
    }
}

#[async_trait]
impl Platform for GithubUserPlatform {
    fn name(&self) -> &'static str {
        "GitHub"
    }

    fn slug(&self) -> &'static str {
        "github"
    }

    async fn repositories(&self, opts: RepositoryListOpts) -> Result<Vec<Repository>> {
        let listed: Vec<GhRepository> = self
            .api
            .http()
            .get_all(
                "/user/repos",
                &[(
                    "affiliation",
                    "owner,collaborator,organization_member".to_string(),
                )],
            )
            .await
            .context("Failed to list repositories")?;
        debug!(count = listed.len(), "found repositories");

        self.api.finish_repositories(listed, opts).await
    }

    async fn find_repository(&self, path: &str) -> Result<Repository> {
        self.api.find_repository(path).await
    }

    async fn merge_requests(
        &self,
        repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>> {
        self.api.merge_requests(repo, options).await
    }

    async fn merge_request_diff(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
    ) -> Result<MergeRequestDiff> {
        self.api.merge_request_diff(repo, mr).await
    }

    async fn submit_review(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        approved: bool,
        message: Option<String>,
    ) -> Result<()> {
        self.api
            .submit_review(repo, mr, approved, message.as_deref())
            .await
    }

    async fn merge(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        strategy: &MergeStrategyOptions,
    ) -> Result<()> {
        self.api.merge(repo, mr, strategy).await
    }

    async fn languages(&self, repo: &Repository) -> Result<HashMap<String, u64>> {
        self.api.languages(repo).await
    }

    async fn auth_method(&self, _repo: &Repository) -> Result<Credential> {
        Ok(Credential {
            username: self.username.clone(),
            password: self.token.clone(),
        })
    }

    async fn commit_and_push(
        &self,
        repo: &Repository,
        base_commit: &str,
        branch: &str,
        message: &str,
        dir: &Path,
    ) -> Result<()> {
        self.api
            .commit_tree(repo, base_commit, branch, message, dir)
            .await
    }

    async fn create_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        self.api
            .create_merge_request(repo, source_branch, title, description)
            .await
    }

    async fn create_or_update_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
        key: &str,
    ) -> Result<()> {
        self.api
            .create_or_update_merge_request(repo, source_branch, title, description, key)
            .await
    }

    async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String> {
        self.api.file_content(repo, branch, path).await
    }

    async fn tags(&self, repo: &Repository, limit: usize) -> Result<Vec<Tag>> {
        self.api.tags(repo, limit).await
    }

    async fn releases(&self, repo: &Repository, limit: usize) -> Result<Vec<Release>> {
        self.api.releases(repo, limit).await
    }

    async fn create_tag(
        &self,
        repo: &Repository,
        tag: &str,
        commit_hash: &str,
        message: &str,
    ) -> Result<()> {
        self.api.create_tag(repo, tag, commit_hash, message).await
    }

    async fn variables(&self, repo: &Repository) -> Result<Vec<CIVariable>> {
        self.api.variables(repo).await
    }

    async fn environments(&self, repo: &Repository) -> Result<Vec<CIEnvironment>> {
        self.api.environments(repo).await
    }

    async fn environment_variables(
        &self,
        repo: &Repository,
        environment: &str,
    ) -> Result<Vec<CIVariable>> {
        self.api.environment_variables(repo, environment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_method_uses_username_and_token() {
        let platform =
            GithubUserPlatform::new(github::DEFAULT_API_URL, "octocat", "ghp_token").unwrap();
        let credential = platform.auth_method(&Repository::default()).await.unwrap();

        assert_eq!(credential.username, "octocat");
        assert_eq!(credential.password, "ghp_token");
        assert_eq!(platform.name(), "GitHub");
        assert_eq!(platform.slug(), "github");
    }
}
