//! GitHub REST calls shared by the App and user identities.
//!
//! Both identities publish commits by tree composition: the changed paths of
//! the local checkout are sent as one tree, committed on top of the base
//! commit, and the branch ref is created or force-updated.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing::info;

use super::CIEnvironment;
use super::CIVariable;
use super::MergeRequest;
use super::MergeRequestDiff;
use super::MergeRequestFileDiff;
use super::MergeRequestSearchOptions;
use super::MergeRequestState;
use super::MergeStrategyOptions;
use super::PlatformError;
use super::Release;
use super::Repository;
use super::RepositoryListOpts;
use super::Tag;
use super::User;
use super::UserState;
use super::UserType;
use super::error::is_empty_repository;
use super::error::is_not_found;
use super::tree::BlobStore;
use super::tree::build_tree_entries;
use super::upsert;
use super::upsert::MergeRequestStore;
use super::util::decode_base64_content;
use super::util::encode_path_segment;
use super::util::server_id_from_clone_url;
use super::util::split_repository_path;
use crate::clients::git::GitClient;
use crate::clients::http::HttpClient;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const ACCEPT: &str = "application/vnd.github+json";

// -----------------------------------------------------------------------------
// Wire types

#[derive(Debug, Deserialize)]
pub(crate) struct GhRepository {
    id: i64,
    name: String,
    owner: GhAccount,
    description: Option<String>,
    html_url: String,
    clone_url: String,
    ssh_url: String,
    default_branch: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    topics: Vec<String>,
    license: Option<GhLicense>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GhAccount {
    pub login: String,
}

#[derive(Debug, Deserialize)]
struct GhLicense {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhOrganization {
    plan: Option<GhPlan>,
}

#[derive(Debug, Deserialize)]
struct GhPlan {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    id: i64,
    login: String,
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    site_admin: bool,
    #[serde(default)]
    avatar_url: String,
    created_at: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    id: i64,
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    head: GhBranchRef,
    base: GhBranchRef,
    state: String,
    merged: Option<bool>,
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    draft: bool,
    mergeable: Option<bool>,
    mergeable_state: Option<String>,
    user: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhBranchRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhPullFile {
    filename: String,
    status: String,
    previous_filename: Option<String>,
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    sha: String,
    commit: GhCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GhCommitDetail {
    committer: Option<GhSignature>,
}

#[derive(Debug, Deserialize)]
struct GhSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhGitCommit {
    tree: GhSha,
}

#[derive(Debug, Deserialize)]
struct GhSha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
    object: GhObject,
}

#[derive(Debug, Deserialize)]
struct GhObject {
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GhAnnotatedTag {
    object: GhObject,
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    name: Option<String>,
    tag_name: String,
    body: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhContent {
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhVariable {
    name: String,
    #[serde(default)]
    value: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhVariables {
    #[serde(default)]
    variables: Vec<GhVariable>,
}

#[derive(Debug, Deserialize)]
struct GhSecrets {
    #[serde(default)]
    secrets: Vec<GhVariable>,
}

#[derive(Debug, Deserialize)]
struct GhEnvironment {
    id: i64,
    name: String,
    environment_name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhEnvironments {
    #[serde(default)]
    environments: Vec<GhEnvironment>,
}

#[derive(Debug, Serialize)]
struct NewPull<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct NewReview<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
}

// -----------------------------------------------------------------------------
// Conversions

impl GhRepository {
    pub(crate) fn into_repository(self) -> Repository {
        let default_branch = self.default_branch.unwrap_or_default();
        let license_url = match &self.license {
            Some(_) => format!(
                "https://raw.githubusercontent.com/{}/{}/{}/LICENSE",
                self.owner.login, self.name, default_branch
            ),
            None => String::new(),
        };

        Repository {
            platform_id: server_id_from_clone_url(&self.clone_url),
            platform_type: "github".to_string(),
            id: self.id,
            path: format!("{}/{}", self.owner.login, self.name),
            namespace: self.owner.login,
            name: self.name,
            description: self.description.unwrap_or_default(),
            kind: "git".to_string(),
            url: self
                .html_url
                .strip_prefix("https://")
                .unwrap_or(&self.html_url)
                .to_string(),
            clone_url: self.clone_url,
            clone_ssh: self.ssh_url,
            default_branch,
            is_fork: self.fork,
            topics: self.topics,
            license_name: self.license.map(|l| l.name).unwrap_or_default(),
            license_url,
            created_at: self.created_at,
            ..Default::default()
        }
    }
}

impl From<GhUser> for User {
    fn from(user: GhUser) -> Self {
        Self {
            id: user.id,
            username: user.login,
            name: user.name.unwrap_or_default(),
            user_type: if user.kind.eq_ignore_ascii_case("bot") {
                UserType::Bot
            } else {
                UserType::User
            },
            state: if user.suspended_at.is_some() {
                UserState::Suspended
            } else {
                UserState::Active
            },
            created_at: user.created_at,
            suspended_at: user.suspended_at,
            avatar_url: user.avatar_url,
            global_administrator: user.site_admin,
        }
    }
}

impl From<GhPull> for MergeRequest {
    fn from(pr: GhPull) -> Self {
        Self {
            id: pr.id,
            number: pr.number,
            title: pr.title,
            description: pr.body.unwrap_or_default(),
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            source_branch: pr.head.name,
            target_branch: pr.base.name,
            state: MergeRequestState::from_github(&pr.state),
            // List responses omit `merged` but carry `merged_at`
            is_merged: pr.merged.unwrap_or(pr.merged_at.is_some()),
            is_locked: pr.locked,
            is_draft: pr.draft,
            has_conflicts: pr.mergeable_state.as_deref() == Some("dirty"),
            can_merge: pr.mergeable.unwrap_or(false),
            author: pr.user.map(User::from).unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<GhPullFile> for MergeRequestFileDiff {
    fn from(file: GhPullFile) -> Self {
        Self {
            is_new: file.status == "added",
            is_renamed: file.status == "renamed",
            is_deleted: file.status == "removed",
            old_path: file.previous_filename.unwrap_or_else(|| file.filename.clone()),
            new_path: file.filename,
            old_mode: String::new(),
            new_mode: String::new(),
            diff: file.patch.unwrap_or_default(),
        }
    }
}

fn variable(v: GhVariable, is_secret: bool) -> CIVariable {
    CIVariable {
        name: v.name,
        value: if is_secret { String::new() } else { v.value },
        is_secret,
        created_at: v.created_at,
        updated_at: v.updated_at,
    }
}

impl From<GhEnvironment> for CIEnvironment {
    fn from(e: GhEnvironment) -> Self {
        Self {
            id: e.id,
            name: e.name,
            tier: e.environment_name.unwrap_or_default(),
            created_at: e.created_at,
            updated_at: e.updated_at,
            ..Default::default()
        }
    }
}

/// GitHub's server-side `state` filter knows only open, closed and all.
fn state_filter(state: Option<MergeRequestState>) -> &'static str {
    match state {
        Some(MergeRequestState::Open) => "open",
        Some(MergeRequestState::Closed) => "closed",
        None => "all",
    }
}

/// Organization endpoints 404 for user-owned repositories.
async fn organization_scoped<T>(request: impl Future<Output = Result<Vec<T>>>) -> Result<Vec<T>> {
    match request.await {
        Ok(items) => Ok(items),
        Err(err) if is_not_found(&err) => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// Percent-encode every segment of a file path or ref name, keeping `/`.
fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(encode_path_segment)
        .collect::<Vec<_>>()
        .join("/")
}

// -----------------------------------------------------------------------------
// GithubApi

/// REST operations on one GitHub identity's behalf.
pub struct GithubApi {
    http: HttpClient,
}

impl GithubApi {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn repo_url(repo: &Repository) -> String {
        format!("/repos/{}/{}", repo.namespace, repo.name)
    }

    /// Convert listed repositories and perform the requested extra lookups.
    pub(crate) async fn finish_repositories(
        &self,
        listed: Vec<GhRepository>,
        opts: RepositoryListOpts,
    ) -> Result<Vec<Repository>> {
        let mut plans: HashMap<String, String> = HashMap::new();
        let mut result = Vec::with_capacity(listed.len());

        for dto in listed {
            let mut repo = dto.into_repository();

            if opts.include_commit_hash {
                self.fill_commit(&mut repo).await?;
            }
            if opts.include_branches {
                self.fill_branches(&mut repo).await?;
            }
            if opts.include_plan {
                if !plans.contains_key(&repo.namespace) {
                    let plan = self.organization_plan(&repo.namespace).await?;
                    plans.insert(repo.namespace.clone(), plan);
                }
                repo.plan = plans[&repo.namespace].clone();
            }

            result.push(repo);
        }

        Ok(result)
    }

    async fn fill_commit(&self, repo: &mut Repository) -> Result<()> {
        let url = format!(
            "{}/commits/heads/{}",
            Self::repo_url(repo),
            encode_path(&repo.default_branch)
        );
        match self.http.get::<GhCommit>(&url, &[]).await {
            Ok(commit) => {
                repo.commit_hash = commit.sha;
                repo.commit_date = commit.commit.committer.and_then(|c| c.date);
                Ok(())
            }
            Err(err) if is_empty_repository(&err) => {
                repo.is_empty = true;
                Ok(())
            }
            Err(err) => Err(err.context(format!("Failed to get head commit of {}", repo.path))),
        }
    }

    async fn fill_branches(&self, repo: &mut Repository) -> Result<()> {
        let url = format!("{}/branches", Self::repo_url(repo));
        match self.http.get_all::<GhBranch>(&url, &[]).await {
            Ok(branches) => {
                repo.branches = branches.into_iter().map(|b| b.name).collect();
                Ok(())
            }
            Err(err) if is_empty_repository(&err) => {
                repo.is_empty = true;
                Ok(())
            }
            Err(err) => Err(err.context(format!("Failed to list branches of {}", repo.path))),
        }
    }

    /// Plan of the owning organization. Only visible to organization owners;
    /// user accounts and hidden plans yield an empty string.
    async fn organization_plan(&self, namespace: &str) -> Result<String> {
        match self
            .http
            .get::<GhOrganization>(&format!("/orgs/{namespace}"), &[])
            .await
        {
            Ok(org) => Ok(org.plan.map(|p| p.name).unwrap_or_default()),
            Err(err) if is_not_found(&err) => Ok(String::new()),
            Err(err) => Err(err.context(format!("Failed to get organization {namespace}"))),
        }
    }

    pub async fn find_repository(&self, path: &str) -> Result<Repository> {
        let (owner, name) = split_repository_path(path).ok_or_else(|| PlatformError::NotFound {
            path: path.to_string(),
        })?;

        match self
            .http
            .get::<GhRepository>(&format!("/repos/{owner}/{name}"), &[])
            .await
        {
            Ok(dto) => Ok(dto.into_repository()),
            Err(err) if is_not_found(&err) => Err(PlatformError::NotFound {
                path: path.to_string(),
            }
            .into()),
            Err(err) => Err(err.context(format!("Failed to get repository {path}"))),
        }
    }

    pub async fn merge_requests(
        &self,
        repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>> {
        let mut query = vec![("state", state_filter(options.state).to_string())];
        if let Some(source) = &options.source_branch {
            query.push(("head", format!("{}:{}", repo.namespace, source)));
        }
        if let Some(target) = &options.target_branch {
            query.push(("base", target.clone()));
        }

        let pulls: Vec<GhPull> = self
            .http
            .get_all(&format!("{}/pulls", Self::repo_url(repo)), &query)
            .await
            .with_context(|| format!("Failed to list pull requests of {}", repo.path))?;

        Ok(pulls
            .into_iter()
            .map(MergeRequest::from)
            .filter(|mr| options.matches(mr))
            .collect())
    }

    pub async fn merge_request_diff(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
    ) -> Result<MergeRequestDiff> {
        let files: Vec<GhPullFile> = self
            .http
            .get_all(
                &format!("{}/pulls/{}/files", Self::repo_url(repo), mr.number),
                &[],
            )
            .await
            .with_context(|| format!("Failed to get diff of pull request {}", mr.number))?;

        Ok(MergeRequestDiff {
            changed_files: files.into_iter().map(MergeRequestFileDiff::from).collect(),
        })
    }

    pub async fn submit_review(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        approved: bool,
        message: Option<&str>,
    ) -> Result<()> {
        let review = NewReview {
            event: if approved { "APPROVE" } else { "REQUEST_CHANGES" },
            body: message,
        };
        let _: serde_json::Value = self
            .http
            .post(
                &format!("{}/pulls/{}/reviews", Self::repo_url(repo), mr.number),
                &review,
            )
            .await
            .with_context(|| format!("Failed to review pull request {}", mr.number))?;
        Ok(())
    }

    pub async fn merge(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        strategy: &MergeStrategyOptions,
    ) -> Result<()> {
        let body = if strategy.squash.unwrap_or(false) {
            json!({ "merge_method": "squash" })
        } else {
            json!({})
        };
        let _: serde_json::Value = self
            .http
            .put(
                &format!("{}/pulls/{}/merge", Self::repo_url(repo), mr.number),
                &body,
            )
            .await
            .with_context(|| format!("Failed to merge pull request {}", mr.number))?;
        Ok(())
    }

    pub async fn languages(&self, repo: &Repository) -> Result<HashMap<String, u64>> {
        self.http
            .get(&format!("{}/languages", Self::repo_url(repo)), &[])
            .await
            .with_context(|| format!("Failed to list languages of {}", repo.path))
    }

    /// Publish the working tree at `dir` by tree composition.
    pub async fn commit_tree(
        &self,
        repo: &Repository,
        base_commit: &str,
        branch: &str,
        message: &str,
        dir: &Path,
    ) -> Result<()> {
        let repo_url = Self::repo_url(repo);
        let branch_path = encode_path(branch);

        let changes = GitClient::open(dir.to_path_buf()).status().await?;
        let blobs = BlobUploader { api: self, repo };
        let entries = build_tree_entries(dir, &changes, &blobs).await?;
        debug!(repo = %repo.path, entries = entries.len(), "composing tree");

        let base: GhGitCommit = self
            .http
            .get(&format!("{repo_url}/git/commits/{base_commit}"), &[])
            .await
            .with_context(|| format!("Failed to get base commit {base_commit}"))?;

        let tree: GhSha = self
            .http
            .post(
                &format!("{repo_url}/git/trees"),
                &json!({ "base_tree": base.tree.sha, "tree": entries }),
            )
            .await
            .context("Failed to create tree")?;

        let commit: GhSha = self
            .http
            .post(
                &format!("{repo_url}/git/commits"),
                &json!({ "message": message, "tree": tree.sha, "parents": [base_commit] }),
            )
            .await
            .context("Failed to create commit")?;

        match self
            .http
            .get::<GhRef>(&format!("{repo_url}/git/ref/heads/{branch_path}"), &[])
            .await
        {
            Ok(_) => {
                let _: serde_json::Value = self
                    .http
                    .patch(
                        &format!("{repo_url}/git/refs/heads/{branch_path}"),
                        &json!({ "sha": commit.sha, "force": true }),
                    )
                    .await
                    .with_context(|| format!("Failed to update branch {branch}"))?;
            }
            Err(err) if is_not_found(&err) => {
                let _: serde_json::Value = self
                    .http
                    .post(
                        &format!("{repo_url}/git/refs"),
                        &json!({ "ref": format!("refs/heads/{branch}"), "sha": commit.sha }),
                    )
                    .await
                    .with_context(|| format!("Failed to create branch {branch}"))?;
            }
            Err(err) => return Err(err.context(format!("Failed to look up branch {branch}"))),
        }

        info!(repo = %repo.path, branch, commit = %commit.sha, "pushed commit");
        Ok(())
    }

    pub async fn create_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        PullRequestStore { api: self, repo }
            .create(source_branch, &repo.default_branch, title, description)
            .await
    }

    pub async fn create_or_update_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
        key: &str,
    ) -> Result<()> {
        let store = PullRequestStore { api: self, repo };
        upsert::create_or_update(
            &store,
            &repo.default_branch,
            source_branch,
            title,
            description,
            key,
        )
        .await?;
        Ok(())
    }

    pub async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String> {
        let content: GhContent = self
            .http
            .get(
                &format!("{}/contents/{}", Self::repo_url(repo), encode_path(path)),
                &[("ref", branch.to_string())],
            )
            .await
            .with_context(|| format!("Failed to get {path} at {branch}"))?;

        match (content.encoding.as_deref(), content.content) {
            (Some("base64"), Some(data)) => decode_base64_content(&data),
            (encoding, _) => bail!(
                "Unsupported encoding {} for file {path}",
                encoding.unwrap_or("none")
            ),
        }
    }

    pub async fn tags(&self, repo: &Repository, limit: usize) -> Result<Vec<Tag>> {
        let refs: Vec<GhRef> = self
            .http
            .get_limited(
                &format!("{}/git/matching-refs/tags/", Self::repo_url(repo)),
                &[],
                limit,
            )
            .await?;

        Ok(refs
            .into_iter()
            .map(|r| Tag {
                name: r.name.trim_start_matches("refs/tags/").to_string(),
                commit_hash: r.object.sha,
            })
            .collect())
    }

    pub async fn releases(&self, repo: &Repository, limit: usize) -> Result<Vec<Release>> {
        let releases: Vec<GhRelease> = self
            .http
            .get_limited(&format!("{}/releases", Self::repo_url(repo)), &[], limit)
            .await?;

        let mut result = Vec::with_capacity(releases.len());
        for release in releases {
            let commit_hash = self.tag_commit(repo, &release.tag_name).await?;
            result.push(Release {
                name: release.name.unwrap_or_default(),
                tag_name: release.tag_name,
                description: release.body.unwrap_or_default(),
                commit_hash,
                created_at: release.created_at,
            });
        }
        Ok(result)
    }

    /// Commit a tag points at, peeling annotated tag objects.
    async fn tag_commit(&self, repo: &Repository, tag: &str) -> Result<String> {
        let reference: GhRef = self
            .http
            .get(
                &format!("{}/git/ref/tags/{}", Self::repo_url(repo), encode_path(tag)),
                &[],
            )
            .await
            .with_context(|| format!("Failed to get tag {tag}"))?;

        if reference.object.kind != "tag" {
            return Ok(reference.object.sha);
        }

        let annotated: GhAnnotatedTag = self
            .http
            .get(
                &format!("{}/git/tags/{}", Self::repo_url(repo), reference.object.sha),
                &[],
            )
            .await
            .with_context(|| format!("Failed to get tag object for {tag}"))?;
        Ok(annotated.object.sha)
    }

    pub async fn create_tag(
        &self,
        repo: &Repository,
        tag: &str,
        commit_hash: &str,
        message: &str,
    ) -> Result<()> {
        let repo_url = Self::repo_url(repo);

        let object: GhSha = self
            .http
            .post(
                &format!("{repo_url}/git/tags"),
                &json!({ "tag": tag, "message": message, "object": commit_hash, "type": "commit" }),
            )
            .await
            .with_context(|| format!("Failed to create tag {tag}"))?;

        let _: serde_json::Value = self
            .http
            .post(
                &format!("{repo_url}/git/refs"),
                &json!({ "ref": format!("refs/tags/{tag}"), "sha": object.sha }),
            )
            .await
            .with_context(|| format!("Failed to create reference for tag {tag}"))?;
        Ok(())
    }

    /// Organization and repository Actions variables, then secrets.
    pub async fn variables(&self, repo: &Repository) -> Result<Vec<CIVariable>> {
        let org_url = format!("/orgs/{}/actions", repo.namespace);
        let repo_url = format!("{}/actions", Self::repo_url(repo));

        let mut result = Vec::new();
        for vars in [
            organization_scoped(self.http.get_all_by(
                &format!("{org_url}/variables"),
                &[],
                |w: GhVariables| w.variables,
            ))
            .await?,
            self.http
                .get_all_by(&format!("{repo_url}/variables"), &[], |w: GhVariables| {
                    w.variables
                })
                .await?,
        ] {
            result.extend(vars.into_iter().map(|v| variable(v, false)));
        }
        for secrets in [
            organization_scoped(self.http.get_all_by(
                &format!("{org_url}/secrets"),
                &[],
                |w: GhSecrets| w.secrets,
            ))
            .await?,
            self.http
                .get_all_by(&format!("{repo_url}/secrets"), &[], |w: GhSecrets| w.secrets)
                .await?,
        ] {
            result.extend(secrets.into_iter().map(|v| variable(v, true)));
        }

        Ok(result)
    }

    pub async fn environments(&self, repo: &Repository) -> Result<Vec<CIEnvironment>> {
        let environments = self
            .http
            .get_all_by(
                &format!("{}/environments", Self::repo_url(repo)),
                &[],
                |w: GhEnvironments| w.environments,
            )
            .await?;

        Ok(environments.into_iter().map(CIEnvironment::from).collect())
    }

    pub async fn environment_variables(
        &self,
        repo: &Repository,
        environment: &str,
    ) -> Result<Vec<CIVariable>> {
        let env_url = format!(
            "{}/environments/{}",
            Self::repo_url(repo),
            encode_path_segment(environment)
        );

        let variables = self
            .http
            .get_all_by(&format!("{env_url}/variables"), &[], |w: GhVariables| {
                w.variables
            })
            .await?;
        let secrets = self
            .http
            .get_all_by(&format!("{env_url}/secrets"), &[], |w: GhSecrets| w.secrets)
            .await?;

        Ok(variables
            .into_iter()
            .map(|v| variable(v, false))
            .chain(secrets.into_iter().map(|v| variable(v, true)))
            .collect())
    }
}

// -----------------------------------------------------------------------------
// BlobUploader

/// Uploads binary files that cannot be inlined into a tree request.
struct BlobUploader<'a> {
    api: &'a GithubApi,
    repo: &'a Repository,
}

#[async_trait]
impl BlobStore for BlobUploader<'_> {
    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        let blob: GhSha = self
            .api
            .http
            .post(
                &format!("{}/git/blobs", GithubApi::repo_url(self.repo)),
                &json!({ "content": STANDARD.encode(content), "encoding": "base64" }),
            )
            .await
            .context("Failed to create blob")?;
        Ok(blob.sha)
    }
}

// -----------------------------------------------------------------------------
// PullRequestStore

struct PullRequestStore<'a> {
    api: &'a GithubApi,
    repo: &'a Repository,
}

#[async_trait]
impl MergeRequestStore for PullRequestStore<'_> {
    async fn list_open_by_source_branch(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>> {
        let options = MergeRequestSearchOptions {
            source_branch: Some(source_branch.to_string()),
            target_branch: Some(target_branch.to_string()),
            state: Some(MergeRequestState::Open),
            ..Default::default()
        };
        self.api.merge_requests(self.repo, &options).await
    }

    async fn update(&self, existing: &MergeRequest, title: &str, description: &str) -> Result<()> {
        let _: serde_json::Value = self
            .api
            .http
            .patch(
                &format!("{}/pulls/{}", GithubApi::repo_url(self.repo), existing.number),
                &json!({ "title": title, "body": description }),
            )
            .await?;
        Ok(())
    }

    async fn create(
        &self,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        let pull: GhPull = self
            .api
            .http
            .post(
                &format!("{}/pulls", GithubApi::repo_url(self.repo)),
                &NewPull {
                    title,
                    head: source_branch,
                    base: target_branch,
                    body: description,
                },
            )
            .await
            .with_context(|| format!("Failed to create pull request from {source_branch}"))?;
        Ok(pull.into())
    }
}
