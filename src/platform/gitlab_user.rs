//! GitLab adapter for a personal access token.
//!
//! Commits are created locally and force-pushed with `oauth2` basic auth.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use tracing::info;

use super::CIEnvironment;
use super::CIVariable;
use super::Credential;
use super::GitAuthor;
use super::MergeRequest;
use super::MergeRequestDiff;
use super::MergeRequestFileDiff;
use super::MergeRequestSearchOptions;
use super::MergeRequestState;
use super::MergeStrategyOptions;
use super::PipelineState;
use super::Platform;
use super::PlatformError;
use super::Release;
use super::Repository;
use super::RepositoryListOpts;
use super::Tag;
use super::User;
use super::UserState;
use super::UserType;
use super::error::is_not_found;
use super::upsert;
use super::upsert::MergeRequestStore;
use super::util::decode_base64_content;
use super::util::encode_path_segment;
use super::util::server_id_from_clone_url;
use crate::clients::git::GitClient;
use crate::clients::http::Auth;
use crate::clients::http::HttpClient;

const ACCEPT: &str = "application/json";

/// Maintainer access, required to push branches and manage merge requests.
const MIN_ACCESS_LEVEL: u32 = 40;

// -----------------------------------------------------------------------------
// Wire types

#[derive(Debug, Deserialize)]
struct GlProject {
    id: i64,
    path: String,
    path_with_namespace: String,
    namespace: GlNamespace,
    description: Option<String>,
    web_url: String,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    default_branch: Option<String>,
    forked_from_project: Option<serde_json::Value>,
    #[serde(default)]
    topics: Vec<String>,
    license_url: Option<String>,
    license: Option<GlLicense>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    empty_repo: bool,
}

#[derive(Debug, Deserialize)]
struct GlNamespace {
    id: i64,
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct GlNamespaceDetail {
    plan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlLicense {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GlCommit {
    id: String,
    committed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GlBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GlUser {
    id: i64,
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    avatar_url: Option<String>,
    #[serde(default)]
    bot: bool,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct GlMergeRequest {
    id: i64,
    iid: u64,
    title: String,
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    source_branch: String,
    target_branch: String,
    state: String,
    #[serde(default)]
    draft: bool,
    discussion_locked: Option<bool>,
    #[serde(default)]
    has_conflicts: bool,
    #[serde(default)]
    merge_status: String,
    head_pipeline: Option<GlPipeline>,
    author: Option<GlUser>,
}

#[derive(Debug, Deserialize)]
struct GlPipeline {
    status: String,
}

#[derive(Debug, Deserialize)]
struct GlDiff {
    old_path: String,
    new_path: String,
    #[serde(default)]
    a_mode: String,
    #[serde(default)]
    b_mode: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
    #[serde(default)]
    diff: String,
}

#[derive(Debug, Deserialize)]
struct GlFile {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct GlTag {
    name: String,
    commit: GlCommitRef,
}

#[derive(Debug, Deserialize)]
struct GlCommitRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GlRelease {
    #[serde(default)]
    name: String,
    tag_name: String,
    description: Option<String>,
    commit: Option<GlCommitRef>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GlVariable {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    masked: bool,
    #[serde(default)]
    environment_scope: String,
}

#[derive(Debug, Deserialize)]
struct GlEnvironment {
    id: i64,
    name: String,
    description: Option<String>,
    tier: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

// -----------------------------------------------------------------------------
// Conversions

impl From<GlProject> for Repository {
    fn from(project: GlProject) -> Self {
        Self {
            platform_id: server_id_from_clone_url(&project.http_url_to_repo),
            platform_type: "gitlab".to_string(),
            id: project.id,
            namespace: project.namespace.full_path,
            name: project.path,
            path: project.path_with_namespace,
            description: project.description.unwrap_or_default(),
            kind: "git".to_string(),
            url: project
                .web_url
                .strip_prefix("https://")
                .unwrap_or(&project.web_url)
                .to_string(),
            clone_url: project.http_url_to_repo,
            clone_ssh: project.ssh_url_to_repo,
            default_branch: project.default_branch.unwrap_or_default(),
            is_fork: project.forked_from_project.is_some(),
            is_empty: project.empty_repo,
            topics: project.topics,
            license_name: project.license.map(|l| l.name).unwrap_or_default(),
            license_url: project.license_url.unwrap_or_default(),
            created_at: project.created_at,
            ..Default::default()
        }
    }
}

impl From<GlUser> for User {
    fn from(user: GlUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            name: user.name,
            user_type: if user.bot { UserType::Bot } else { UserType::User },
            state: match user.state.as_str() {
                "blocked" | "banned" | "deactivated" => UserState::Suspended,
                _ => UserState::Active,
            },
            created_at: user.created_at,
            suspended_at: None,
            avatar_url: user.avatar_url.unwrap_or_default(),
            global_administrator: user.is_admin,
        }
    }
}

impl From<GlMergeRequest> for MergeRequest {
    fn from(mr: GlMergeRequest) -> Self {
        Self {
            id: mr.id,
            number: mr.iid,
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            labels: mr.labels,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            state: MergeRequestState::from_gitlab(&mr.state),
            pipeline_state: mr
                .head_pipeline
                .map(|p| PipelineState::from_upstream(&p.status))
                .unwrap_or_default(),
            is_merged: mr.state == "merged",
            is_locked: mr.state == "locked" || mr.discussion_locked.unwrap_or(false),
            is_draft: mr.draft,
            has_conflicts: mr.has_conflicts,
            can_merge: mr.merge_status == "can_be_merged",
            author: mr.author.map(User::from).unwrap_or_default(),
        }
    }
}

impl From<GlDiff> for MergeRequestFileDiff {
    fn from(diff: GlDiff) -> Self {
        Self {
            is_new: diff.new_file,
            is_renamed: diff.renamed_file,
            is_deleted: diff.deleted_file,
            old_path: diff.old_path,
            new_path: diff.new_path,
            old_mode: diff.a_mode,
            new_mode: diff.b_mode,
            diff: diff.diff,
        }
    }
}

/// GitLab's server-side `state` filter. Unlike GitHub it knows `merged`.
fn state_filter(options: &MergeRequestSearchOptions) -> Option<&'static str> {
    if options.is_merged == Some(true) {
        return Some("merged");
    }
    match options.state {
        Some(MergeRequestState::Open) => Some("opened"),
        Some(MergeRequestState::Closed) => Some("closed"),
        None => None,
    }
}

fn search_query(options: &MergeRequestSearchOptions) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(state) = state_filter(options) {
        query.push(("state", state.to_string()));
    }
    if let Some(source) = &options.source_branch {
        query.push(("source_branch", source.clone()));
    }
    if let Some(target) = &options.target_branch {
        query.push(("target_branch", target.clone()));
    }
    if let Some(author_id) = options.author_id {
        query.push(("author_id", author_id.to_string()));
    }
    if let Some(username) = &options.author_username {
        query.push(("author_username", username.clone()));
    }
    if let Some(draft) = options.is_draft {
        query.push(("wip", if draft { "yes" } else { "no" }.to_string()));
    }
    query
}

fn variable(v: GlVariable) -> CIVariable {
    CIVariable {
        name: v.key,
        value: if v.masked { String::new() } else { v.value },
        is_secret: v.masked,
        ..Default::default()
    }
}

// -----------------------------------------------------------------------------
// GitlabUserPlatform

/// Acts as a GitLab user through a personal access token.
pub struct GitlabUserPlatform {
    token: String,
    author: GitAuthor,
    http: HttpClient,
}

impl GitlabUserPlatform {
    pub fn new(server: &str, token: &str, author: GitAuthor) -> Result<Self> {
        let base_url = format!("{}/api/v4", server.trim_end_matches('/'));
        let http = HttpClient::new(&base_url, ACCEPT, Auth::Bearer(token.to_string()))?;
        Ok(Self {
            token: token.to_string(),
            author,
            http,
        })
    }

    fn project_url(repo: &Repository) -> String {
        format!("/projects/{}", repo.id)
    }

    async fn fill_commit(&self, repo: &mut Repository) -> Result<()> {
        if repo.is_empty {
            return Ok(());
        }

        let url = format!(
            "{}/repository/commits/{}",
            Self::project_url(repo),
            encode_path_segment(&repo.default_branch)
        );
        match self.http.get::<GlCommit>(&url, &[]).await {
            Ok(commit) => {
                repo.commit_hash = commit.id;
                repo.commit_date = commit.committed_date;
                Ok(())
            }
            Err(err) if is_not_found(&err) && repo.default_branch.is_empty() => {
                repo.is_empty = true;
                Ok(())
            }
            Err(err) => Err(err.context(format!("Failed to get head commit of {}", repo.path))),
        }
    }

    async fn fill_branches(&self, repo: &mut Repository) -> Result<()> {
        if repo.is_empty {
            return Ok(());
        }

        let branches: Vec<GlBranch> = self
            .http
            .get_all(&format!("{}/repository/branches", Self::project_url(repo)), &[])
            .await
            .with_context(|| format!("Failed to list branches of {}", repo.path))?;
        repo.branches = branches.into_iter().map(|b| b.name).collect();
        Ok(())
    }

    async fn namespace_plan(&self, namespace_id: i64) -> Result<String> {
        let namespace: GlNamespaceDetail = self
            .http
            .get(&format!("/namespaces/{namespace_id}"), &[])
            .await
            .with_context(|| format!("Failed to get namespace {namespace_id}"))?;
        Ok(namespace.plan.unwrap_or_default())
    }

    fn store<'a>(&'a self, repo: &'a Repository) -> GitlabMergeRequestStore<'a> {
        GitlabMergeRequestStore {
            platform: self,
            repo,
        }
    }
}

#[async_trait]
impl Platform for GitlabUserPlatform {
    fn name(&self) -> &'static str {
        "GitLab"
    }

    fn slug(&self) -> &'static str {
        "gitlab"
    }

    async fn repositories(&self, opts: RepositoryListOpts) -> Result<Vec<Repository>> {
        let projects: Vec<GlProject> = self
            .http
            .get_all(
                "/projects",
                &[
                    ("min_access_level", MIN_ACCESS_LEVEL.to_string()),
                    ("membership", "true".to_string()),
                    ("archived", "false".to_string()),
                ],
            )
            .await
            .context("Failed to list projects")?;
        debug!(count = projects.len(), "found projects");

        let mut plans: HashMap<i64, String> = HashMap::new();
        let mut result = Vec::with_capacity(projects.len());
        for project in projects {
            let namespace_id = project.namespace.id;
            let mut repo = Repository::from(project);

            if opts.include_commit_hash {
                self.fill_commit(&mut repo).await?;
            }
            if opts.include_branches {
                self.fill_branches(&mut repo).await?;
            }
            if opts.include_plan {
                if !plans.contains_key(&namespace_id) {
                    let plan = self.namespace_plan(namespace_id).await?;
                    plans.insert(namespace_id, plan);
                }
                repo.plan = plans[&namespace_id].clone();
            }

            result.push(repo);
        }

        Ok(result)
    }

    async fn find_repository(&self, path: &str) -> Result<Repository> {
        match self
            .http
            .get::<GlProject>(&format!("/projects/{}", encode_path_segment(path)), &[])
            .await
        {
            Ok(project) => Ok(project.into()),
            Err(err) if is_not_found(&err) => Err(PlatformError::NotFound {
                path: path.to_string(),
            }
            .into()),
            Err(err) => Err(err.context(format!("Failed to get project {path}"))),
        }
    }

    async fn merge_requests(
        &self,
        repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>> {
        let mrs: Vec<GlMergeRequest> = self
            .http
            .get_all(
                &format!("{}/merge_requests", Self::project_url(repo)),
                &search_query(options),
            )
            .await
            .with_context(|| format!("Failed to list merge requests of {}", repo.path))?;

        Ok(mrs
            .into_iter()
            .map(MergeRequest::from)
            .filter(|mr| options.matches(mr))
            .collect())
    }

    async fn merge_request_diff(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
    ) -> Result<MergeRequestDiff> {
        let diffs: Vec<GlDiff> = self
            .http
            .get_all(
                &format!("{}/merge_requests/{}/diffs", Self::project_url(repo), mr.number),
                &[],
            )
            .await
            .with_context(|| format!("Failed to get diff of merge request {}", mr.number))?;

        Ok(MergeRequestDiff {
            changed_files: diffs.into_iter().map(MergeRequestFileDiff::from).collect(),
        })
    }

    /// Approval uses the approvals API. GitLab has no "request changes"
    /// state, so a rejection is posted as a comment.
    async fn submit_review(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        approved: bool,
        message: Option<String>,
    ) -> Result<()> {
        let mr_url = format!("{}/merge_requests/{}", Self::project_url(repo), mr.number);

        if approved {
            let _: serde_json::Value = self
                .http
                .post(&format!("{mr_url}/approve"), &json!({}))
                .await
                .with_context(|| format!("Failed to approve merge request {}", mr.number))?;
        }

        let body = match (approved, message) {
            (_, Some(message)) => message,
            (false, None) => "Changes requested.".to_string(),
            (true, None) => return Ok(()),
        };
        let _: serde_json::Value = self
            .http
            .post(&format!("{mr_url}/notes"), &json!({ "body": body }))
            .await
            .with_context(|| format!("Failed to comment on merge request {}", mr.number))?;
        Ok(())
    }

    async fn merge(
        &self,
        repo: &Repository,
        mr: &MergeRequest,
        strategy: &MergeStrategyOptions,
    ) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(squash) = strategy.squash {
            body.insert("squash".to_string(), squash.into());
        }
        if let Some(remove) = strategy.remove_source_branch {
            body.insert("should_remove_source_branch".to_string(), remove.into());
        }

        let _: serde_json::Value = self
            .http
            .put(
                &format!("{}/merge_requests/{}/merge", Self::project_url(repo), mr.number),
                &body,
            )
            .await
            .with_context(|| format!("Failed to merge merge request {}", mr.number))?;
        Ok(())
    }

    /// GitLab reports languages as percentages; they are rounded.
    async fn languages(&self, repo: &Repository) -> Result<HashMap<String, u64>> {
        let languages: HashMap<String, f64> = self
            .http
            .get(&format!("{}/languages", Self::project_url(repo)), &[])
            .await
            .with_context(|| format!("Failed to list languages of {}", repo.path))?;

        Ok(languages
            .into_iter()
            .map(|(name, share)| (name, share.round() as u64))
            .collect())
    }

    async fn auth_method(&self, _repo: &Repository) -> Result<Credential> {
        Ok(Credential {
            username: "oauth2".to_string(),
            password: self.token.clone(),
        })
    }

    /// Commit the working tree locally as the configured author and force-push
    /// it. The checkout's HEAD is expected to be `base_commit`.
    async fn commit_and_push(
        &self,
        repo: &Repository,
        _base_commit: &str,
        branch: &str,
        message: &str,
        dir: &Path,
    ) -> Result<()> {
        let git = GitClient::open(dir.to_path_buf());
        let commit = git
            .commit_all(message, &self.author)
            .await
            .context("Failed to create commit")?;

        let credential = self.auth_method(repo).await?;
        git.force_push(&repo.clone_url, branch, Some(&credential))
            .await
            .context("Failed to push changes")?;

        info!(repo = %repo.path, branch, %commit, "pushed commit");
        Ok(())
    }

    async fn create_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        self.store(repo)
            .create(source_branch, &repo.default_branch, title, description)
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
        upsert::create_or_update(
            &self.store(repo),
            &repo.default_branch,
            source_branch,
            title,
            description,
            key,
        )
        .await?;
        Ok(())
    }

    async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String> {
        let file: GlFile = self
            .http
            .get(
                &format!(
                    "{}/repository/files/{}",
                    Self::project_url(repo),
                    encode_path_segment(path)
                ),
                &[("ref", branch.to_string())],
            )
            .await
            .with_context(|| format!("Failed to get {path} at {branch}"))?;

        match file.encoding.as_str() {
            "base64" => decode_base64_content(&file.content)
                .with_context(|| format!("Failed to decode {path}")),
            "text" => Ok(file.content),
            other => bail!("Unsupported encoding {other} for file {path}"),
        }
    }

    async fn tags(&self, repo: &Repository, limit: usize) -> Result<Vec<Tag>> {
        let tags: Vec<GlTag> = self
            .http
            .get_limited(
                &format!("{}/repository/tags", Self::project_url(repo)),
                &[],
                limit,
            )
            .await?;

        Ok(tags
            .into_iter()
            .map(|t| Tag {
                name: t.name,
                commit_hash: t.commit.id,
            })
            .collect())
    }

    async fn releases(&self, repo: &Repository, limit: usize) -> Result<Vec<Release>> {
        let releases: Vec<GlRelease> = self
            .http
            .get_limited(&format!("{}/releases", Self::project_url(repo)), &[], limit)
            .await?;

        Ok(releases
            .into_iter()
            .map(|r| Release {
                name: r.name,
                tag_name: r.tag_name,
                description: r.description.unwrap_or_default(),
                commit_hash: r.commit.map(|c| c.id).unwrap_or_default(),
                created_at: r.created_at,
            })
            .collect())
    }

    async fn create_tag(
        &self,
        repo: &Repository,
        tag: &str,
        commit_hash: &str,
        message: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .http
            .post(
                &format!("{}/repository/tags", Self::project_url(repo)),
                &json!({ "tag_name": tag, "ref": commit_hash, "message": message }),
            )
            .await
            .with_context(|| format!("Failed to create tag {tag}"))?;
        Ok(())
    }

    async fn variables(&self, repo: &Repository) -> Result<Vec<CIVariable>> {
        let variables: Vec<GlVariable> = self
            .http
            .get_all(&format!("{}/variables", Self::project_url(repo)), &[])
            .await?;
        Ok(variables.into_iter().map(variable).collect())
    }

    async fn environments(&self, repo: &Repository) -> Result<Vec<CIEnvironment>> {
        let environments: Vec<GlEnvironment> = self
            .http
            .get_all(&format!("{}/environments", Self::project_url(repo)), &[])
            .await?;

        Ok(environments
            .into_iter()
            .map(|e| CIEnvironment {
                id: e.id,
                name: e.name,
                description: e.description.unwrap_or_default(),
                tier: e.tier.unwrap_or_default(),
                created_at: e.created_at,
                updated_at: e.updated_at,
            })
            .collect())
    }

    /// Project variables scoped to exactly `environment`.
    async fn environment_variables(
        &self,
        repo: &Repository,
        environment: &str,
    ) -> Result<Vec<CIVariable>> {
        let variables: Vec<GlVariable> = self
            .http
            .get_all(&format!("{}/variables", Self::project_url(repo)), &[])
            .await?;

        Ok(variables
            .into_iter()
            .filter(|v| v.environment_scope == environment)
            .map(variable)
            .collect())
    }
}

// -----------------------------------------------------------------------------
// GitlabMergeRequestStore

struct GitlabMergeRequestStore<'a> {
    platform: &'a GitlabUserPlatform,
    repo: &'a Repository,
}

#[async_trait]
impl MergeRequestStore for GitlabMergeRequestStore<'_> {
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
        self.platform.merge_requests(self.repo, &options).await
    }

    async fn update(&self, existing: &MergeRequest, title: &str, description: &str) -> Result<()> {
        let _: serde_json::Value = self
            .platform
            .http
            .put(
                &format!(
                    "{}/merge_requests/{}",
                    GitlabUserPlatform::project_url(self.repo),
                    existing.number
                ),
                &json!({ "title": title, "description": description }),
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
        let mr: GlMergeRequest = self
            .platform
            .http
            .post(
                &format!("{}/merge_requests", GitlabUserPlatform::project_url(self.repo)),
                &json!({
                    "source_branch": source_branch,
                    "target_branch": target_branch,
                    "title": title,
                    "description": description,
                    "remove_source_branch": true,
                    "squash": true,
                }),
            )
            .await
            .with_context(|| format!("Failed to create merge request from {source_branch}"))?;
        Ok(mr.into())
    }
}
