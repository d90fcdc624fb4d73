use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use super::CIEnvironment;
use super::CIVariable;
use super::Credential;
use super::MergeRequest;
use super::MergeRequestDiff;
use super::MergeRequestSearchOptions;
use super::MergeStrategyOptions;
use super::Platform;
use super::PlatformError;
use super::Release;
use super::Repository;
use super::RepositoryHandle;
use super::RepositoryListOpts;
use super::Tag;
use super::error::is_not_found;
use super::github;
use super::github::GhAccount;
use super::github::GhRepository;
use super::github::GithubApi;
use super::util::split_repository_path;
use crate::clients::github_app_auth::AppJwt;
use crate::clients::github_app_auth::InstallationTokens;
use crate::clients::http::Auth;
use crate::clients::http::HttpClient;
use crate::clients::http::TokenSource;

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    account: Option<GhAccount>,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositories {
    #[serde(default)]
    repositories: Vec<GhRepository>,
}

#[derive(Clone)]
struct InstallationClient {
    api: Arc<GithubApi>,
    tokens: Arc<InstallationTokens>,
}

/// Acts as a GitHub App across every installation of the app.
///
/// Each repository carries the client of the installation it was listed
/// through, so calls on it use that installation's token.
pub struct GithubAppPlatform {
    app_id: u64,
    app: HttpClient,
    installations: Mutex<HashMap<u64, InstallationClient>>,
}

impl GithubAppPlatform {
    pub fn new(api_url: &str, app_id: u64, private_key_pem: &str) -> Result<Self> {
        let jwt = AppJwt::new(app_id, private_key_pem)?;
        let app = HttpClient::new(api_url, github::ACCEPT, Auth::Dynamic(Arc::new(jwt)))?;

        Ok(Self {
            app_id,
            app,
            installations: Mutex::new(HashMap::new()),
        })
    }

    async fn installation(&self, installation_id: u64) -> InstallationClient {
        let mut installations = self.installations.lock().await;
        installations
            .entry(installation_id)
            .or_insert_with(|| {
                let tokens = Arc::new(InstallationTokens::new(installation_id, self.app.clone()));
                let source: Arc<dyn TokenSource> = tokens.clone();
                let api = Arc::new(GithubApi::new(self.app.with_auth(Auth::Dynamic(source))));
                InstallationClient { api, tokens }
            })
            .clone()
    }

    fn attach(repo: &mut Repository, client: &InstallationClient) {
        repo.handle = RepositoryHandle::github_installation(client.api.clone(), client.tokens.clone());
    }

    fn api<'a>(&self, repo: &'a Repository) -> Result<&'a Arc<GithubApi>> {
        repo.handle.github_api().ok_or_else(|| {
            PlatformError::ForeignRepository {
                path: repo.path.clone(),
            }
            .into()
        })
    }
}

#[async_trait]
impl Platform for GithubAppPlatform {
    fn name(&self) -> &'static str {
        "GitHub"
    }

    fn slug(&self) -> &'static str {
        "github"
    }

    async fn repositories(&self, opts: RepositoryListOpts) -> Result<Vec<Repository>> {
        let installations: Vec<Installation> = self
            .app
            .get_all("/app/installations", &[])
            .await
            .context("Failed to list app installations")?;
        info!(count = installations.len(), "found app installations");

        let mut result = Vec::new();
        for installation in installations {
            let client = self.installation(installation.id).await;

            let listed = client
                .api
                .http()
                .get_all_by(
                    "/installation/repositories",
                    &[],
                    |w: InstallationRepositories| w.repositories,
                )
                .await
                .with_context(|| {
                    format!("Failed to list repositories of installation {}", installation.id)
                })?;
            debug!(
                account = installation.account.as_ref().map(|a| a.login.as_str()).unwrap_or(""),
                count = listed.len(),
                "found installation repositories"
            );

            let mut repositories = client.api.finish_repositories(listed, opts).await?;
            for repo in &mut repositories {
                Self::attach(repo, &client);
            }
            result.extend(repositories);
        }

        Ok(result)
    }

    async fn find_repository(&self, path: &str) -> Result<Repository> {
        let not_found = || PlatformError::NotFound {
            path: path.to_string(),
        };
        let (owner, name) = split_repository_path(path).ok_or_else(not_found)?;

        let installation: Installation = match self
            .app
            .get(&format!("/repos/{owner}/{name}/installation"), &[])
            .await
        {
            Ok(installation) => installation,
            Err(err) if is_not_found(&err) => return Err(not_found().into()),
            Err(err) => return Err(err.context(format!("Failed to get installation for {path}"))),
        };

        let client = self.installation(installation.id).await;
        let mut repo = client.api.find_repository(path).await?;
        Self::attach(&mut repo, &client);
        Ok(repo)
    }

    async fn merge_requests(
        &self,
        repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>> {
        self.api(repo)?.merge_requests(repo, options).await
    }

    async fn merge_request_diff(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
    ) -> Result<MergeRequestDiff> {
        self.api(repo)?.merge_request_diff(repo, mr).await
    }

    async fn submit_review(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        approved: bool,
        message: Option<String>,
    ) -> Result<()> {
        self.api(repo)?
            .submit_review(repo, mr, approved, message.as_deref())
            .await
    }

    async fn merge(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        strategy: &MergeStrategyOptions,
    ) -> Result<()> {
        self.api(repo)?.merge(repo, mr, strategy).await
    }

    async fn languages(&self, repo: &Repository) -> Result<HashMap<String, u64>> {
        self.api(repo)?.languages(repo).await
    }

    /// Basic auth with the app id as username and the installation token as
    /// password.
    async fn auth_method(&self, repo: &Repository) -> Result<Credential> {
        let tokens = repo.handle.installation_tokens().ok_or_else(|| {
            PlatformError::ForeignRepository {
                path: repo.path.clone(),
            }
        })?;

        Ok(Credential {
            username: self.app_id.to_string(),
            password: tokens.token().await?,
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
        self.api(repo)?
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
        self.api(repo)?
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
        self.api(repo)?
            .create_or_update_merge_request(repo, source_branch, title, description, key)
            .await
    }

    async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String> {
        self.api(repo)?.file_content(repo, branch, path).await
    }

    async fn tags(&self, repo: &Repository, limit: usize) -> Result<Vec<Tag>> {
        self.api(repo)?.tags(repo, limit).await
    }

    async fn releases(&self, repo: &Repository, limit: usize) -> Result<Vec<Release>> {
        self.api(repo)?.releases(repo, limit).await
    }

    async fn create_tag(
        &self,
        repo: &Repository,
        tag: &str,
        commit_hash: &str,
        message: &str,
    ) -> Result<()> {
        self.api(repo)?
            .create_tag(repo, tag, commit_hash, message)
            .await
    }

    async fn variables(&self, repo: &Repository) -> Result<Vec<CIVariable>> {
        self.api(repo)?.variables(repo).await
    }

    async fn environments(&self, repo: &Repository) -> Result<Vec<CIEnvironment>> {
        self.api(repo)?.environments(repo).await
    }

    async fn environment_variables(
        &self,
        repo: &Repository,
        environment: &str,
    ) -> Result<Vec<CIVariable>> {
        self.api(repo)?
            .environment_variables(repo, environment)
            .await
    }
}
