//! cargo test --test integration -- --nocapture
//!
//! Runs script tasks end to end against local bare repositories. The platform
//! is an in-memory stand-in that publishes with the push strategy.

mod utils;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::Mutex;

use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use tracing::instrument;
use vcsbot::App;
use vcsbot::clients::git::GitClient;
use vcsbot::platform::CIEnvironment;
use vcsbot::platform::CIVariable;
use vcsbot::platform::Credential;
use vcsbot::platform::GitAuthor;
use vcsbot::platform::MergeRequest;
use vcsbot::platform::MergeRequestDiff;
use vcsbot::platform::MergeRequestSearchOptions;
use vcsbot::platform::MergeRequestState;
use vcsbot::platform::MergeStrategyOptions;
use vcsbot::platform::Platform;
use vcsbot::platform::Release;
use vcsbot::platform::Repository;
use vcsbot::platform::RepositoryListOpts;
use vcsbot::platform::Tag;
use vcsbot::platform::tree::BlobStore;
use vcsbot::platform::tree::build_tree_entries;
use vcsbot::platform::upsert;
use vcsbot::platform::upsert::MergeRequestStore;
use vcsbot::platform::upsert::merge_request_marker;
use vcsbot::task::ScriptTask;
use vcsbot::task::Task;

// Normalize object IDs
static INSTA_FILTERS: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        // Git object ID
        (r"\b[0-9a-f]{40}\b", "[OBJID]"),
    ]
});

#[ctor::ctor]
fn init() {
    // Disable colors for all integration tests to get clean output
    colored::control::set_override(false);
    utils::setup_logging().unwrap();
}

// -----------------------------------------------------------------------------
// In-memory platform

struct LocalPlatform {
    repositories: Vec<Repository>,
    author: GitAuthor,
    merge_requests: Mutex<Vec<MergeRequest>>,
}

impl LocalPlatform {
    fn new(repositories: Vec<Repository>) -> Self {
        Self {
            repositories,
            author: GitAuthor::default(),
            merge_requests: Mutex::new(Vec::new()),
        }
    }
}

struct LocalStore<'a> {
    merge_requests: &'a Mutex<Vec<MergeRequest>>,
}

#[async_trait]
impl MergeRequestStore for LocalStore<'_> {
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
        Ok(self
            .merge_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|mr| options.matches(mr))
            .cloned()
            .collect())
    }

    async fn update(&self, existing: &MergeRequest, title: &str, description: &str) -> Result<()> {
        let mut merge_requests = self.merge_requests.lock().unwrap();
        let Some(mr) = merge_requests.iter_mut().find(|mr| mr.number == existing.number) else {
            bail!("merge request {} vanished", existing.number);
        };
        mr.title = title.to_string();
        mr.description = description.to_string();
        Ok(())
    }

    async fn create(
        &self,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        let mut merge_requests = self.merge_requests.lock().unwrap();
        let mr = MergeRequest {
            number: merge_requests.len() as u64 + 1,
            title: title.to_string(),
            description: description.to_string(),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            ..Default::default()
        };
        merge_requests.push(mr.clone());
        Ok(mr)
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    fn name(&self) -> &'static str {
        "Local"
    }

    fn slug(&self) -> &'static str {
        "local"
    }

    async fn repositories(&self, _opts: RepositoryListOpts) -> Result<Vec<Repository>> {
        Ok(self.repositories.clone())
    }

    async fn find_repository(&self, path: &str) -> Result<Repository> {
        match self.repositories.iter().find(|r| r.path == path) {
            Some(repo) => Ok(repo.clone()),
            None => bail!("{path} not found"),
        }
    }

    async fn merge_requests(
        &self,
        _repo: &Repository,
        options: &MergeRequestSearchOptions,
    ) -> Result<Vec<MergeRequest>> {
        let merge_requests = self.merge_requests.lock().unwrap();
        Ok(merge_requests
            .iter()
            .filter(|mr| options.matches(mr))
            .cloned()
            .collect())
    }

    async fn merge_request_diff(
        &self,
        _repo: &Repository,
        _mr: &MergeRequest,
    ) -> Result<MergeRequestDiff> {
        bail!("not supported locally")
    }

    async fn submit_review(
        &self,
        _repo: &Repository,
        _mr: &MergeRequest,
        _approved: bool,
        _message: Option<String>,
    ) -> Result<()> {
        bail!("not supported locally")
    }

    async fn merge(
        &self,
        _repo: &Repository,
        _mr: &MergeRequest,
        _strategy: &MergeStrategyOptions,
    ) -> Result<()> {
        bail!("not supported locally")
    }

    async fn languages(&self, _repo: &Repository) -> Result<HashMap<String, u64>> {
        Ok(HashMap::new())
    }

    async fn auth_method(&self, _repo: &Repository) -> Result<Credential> {
        Ok(Credential {
            username: "local".to_string(),
            password: "unused".to_string(),
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
        let git = GitClient::open(dir.to_path_buf());
        if git.head().await?.0 != base_commit {
            bail!("checkout is not at {base_commit}");
        }

        git.commit_all(message, &self.author).await?;
        git.force_push(&repo.clone_url, branch, None).await
    }

    async fn create_merge_request(
        &self,
        repo: &Repository,
        source_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        LocalStore {
            merge_requests: &self.merge_requests,
        }
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
        let store = LocalStore {
            merge_requests: &self.merge_requests,
        };
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

    async fn file_content(&self, repo: &Repository, branch: &str, path: &str) -> Result<String> {
        utils::git(
            Path::new(&repo.clone_url),
            &["show", &format!("{branch}:{path}")],
        )
        .await
    }

    async fn tags(&self, _repo: &Repository, _limit: usize) -> Result<Vec<Tag>> {
        Ok(vec![])
    }

    async fn releases(&self, _repo: &Repository, _limit: usize) -> Result<Vec<Release>> {
        Ok(vec![])
    }

    async fn create_tag(
        &self,
        _repo: &Repository,
        _tag: &str,
        _commit_hash: &str,
        _message: &str,
    ) -> Result<()> {
        bail!("not supported locally")
    }

    async fn variables(&self, _repo: &Repository) -> Result<Vec<CIVariable>> {
        Ok(vec![])
    }

    async fn environments(&self, _repo: &Repository) -> Result<Vec<CIEnvironment>> {
        Ok(vec![])
    }

    async fn environment_variables(
        &self,
        _repo: &Repository,
        _environment: &str,
    ) -> Result<Vec<CIVariable>> {
        Ok(vec![])
    }
}

/// Writes blobs into a local repository's object store.
struct LocalBlobs {
    repo: PathBuf,
}

#[async_trait]
impl BlobStore for LocalBlobs {
    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        let scratch = tempfile::NamedTempFile::new()?;
        tokio::fs::write(scratch.path(), content).await?;
        let path = scratch.path().to_string_lossy().into_owned();
        let sha = utils::git(&self.repo, &["hash-object", "-w", &path]).await?;
        Ok(sha.trim().to_string())
    }
}

// -----------------------------------------------------------------------------
// Fixtures

#[instrument(skip_all)]
async fn create_remote(root: &Path, name: &str) -> Result<Repository> {
    let seed = root.join(format!("{name}-seed"));
    let remote: PathBuf = root.join(format!("{name}.git"));
    tokio::fs::create_dir_all(&seed).await?;

    utils::create_git_repo(&seed).await?;
    utils::commit_files(
        &seed,
        "Initial commit",
        &[("README.md", "# widgets\n"), ("old.txt", "obsolete\n")],
    )
    .await?;
    utils::create_bare_remote(&seed, &remote).await?;

    Ok(Repository {
        namespace: "acme".to_string(),
        name: name.to_string(),
        path: format!("acme/{name}"),
        clone_url: remote.to_string_lossy().into_owned(),
        default_branch: "main".to_string(),
        ..Default::default()
    })
}

fn greeting_task() -> ScriptTask {
    let mut task = ScriptTask::new(
        "greeting",
        "bot/greeting",
        "chore: add greeting",
        vec![
            r"printf 'hello\r\nworld\r\n' > greeting.txt".to_string(),
            "rm old.txt".to_string(),
            r"mkdir -p bin && printf '#!/bin/sh\necho hi\n' > bin/run.sh && chmod +x bin/run.sh"
                .to_string(),
            "exit 3".to_string(),
        ],
    );
    task.description = "Adds a greeting.".to_string();
    task
}

// -----------------------------------------------------------------------------
// Tests

#[tokio::test]
async fn test_script_task_pushes_and_opens_merge_request() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let repo = create_remote(test_dir.path(), "widgets").await?;
    let remote = PathBuf::from(&repo.clone_url);

    let app = App::new(Box::new(LocalPlatform::new(vec![repo.clone()])));
    let tasks: Vec<Box<dyn Task>> = vec![Box::new(greeting_task())];

    let report = app.execute_tasks(&tasks).await?;
    assert_eq!(report.failed(), 0, "{report:?}");
    assert_eq!(report.succeeded(), 1);

    let files = utils::git(&remote, &["ls-tree", "-r", "--name-only", "bot/greeting"]).await?;
    insta::assert_snapshot!(files, @r"
    README.md
    bin/run.sh
    greeting.txt
    ");

    let log = utils::git(&remote, &["log", "--format=%H %an <%ae> %s", "bot/greeting"]).await?;
    assert_snapshot_filtered!(log, INSTA_FILTERS, @r"
    [OBJID] vcs-app <vcs-app@localhost> chore: add greeting
    [OBJID] Test User <test@example.com> Initial commit
    ");

    let platform = app.platform.as_ref();
    let content = platform.file_content(&repo, "bot/greeting", "bin/run.sh").await?;
    assert_eq!(content, "#!/bin/sh\necho hi\n");

    let merge_requests = platform
        .merge_requests(&repo, &MergeRequestSearchOptions::default())
        .await?;
    assert_eq!(merge_requests.len(), 1);
    assert_eq!(merge_requests[0].title, "chore: add greeting");
    assert_eq!(merge_requests[0].target_branch, "main");
    assert_eq!(
        merge_requests[0].description,
        format!("Adds a greeting.\n\n{}", merge_request_marker("bot/greeting"))
    );

    Ok(())
}

#[tokio::test]
async fn test_tree_entries_from_checkout() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let repo = create_remote(test_dir.path(), "widgets").await?;

    let checkout = test_dir.path().join("checkout");
    let git = GitClient::clone(&repo.clone_url, &checkout, "main", None).await?;
    tokio::fs::write(checkout.join("greeting.txt"), "hello\r\nworld\r\n").await?;
    tokio::fs::write(checkout.join("logo.png"), b"\x89PNG\xff\x00").await?;
    tokio::fs::remove_file(checkout.join("old.txt")).await?;

    let blobs = LocalBlobs {
        repo: checkout.clone(),
    };
    let mut entries = build_tree_entries(&checkout, &git.status().await?, &blobs).await?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));
    assert_snapshot_filtered!(serde_json::to_string_pretty(&entries)?, INSTA_FILTERS, @r###"
    [
      {
        "path": "greeting.txt",
        "mode": "100644",
        "type": "blob",
        "content": "hello\nworld\n"
      },
      {
        "path": "logo.png",
        "mode": "100644",
        "type": "blob",
        "sha": "[OBJID]"
      },
      {
        "path": "old.txt",
        "mode": "100644",
        "type": "blob",
        "sha": null
      }
    ]
    "###);

    Ok(())
}

#[tokio::test]
async fn test_second_run_updates_the_same_merge_request() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let repo = create_remote(test_dir.path(), "widgets").await?;

    let app = App::new(Box::new(LocalPlatform::new(vec![repo.clone()])));

    let first: Vec<Box<dyn Task>> = vec![Box::new(greeting_task())];
    app.execute_tasks(&first).await?;

    let mut second = greeting_task();
    second.title = "chore: add greeting (again)".to_string();
    second.description = "Second run.".to_string();
    let second: Vec<Box<dyn Task>> = vec![Box::new(second)];
    let report = app.execute_tasks(&second).await?;
    assert_eq!(report.failed(), 0, "{report:?}");

    let merge_requests = app
        .platform
        .merge_requests(&repo, &MergeRequestSearchOptions::default())
        .await?;
    assert_eq!(merge_requests.len(), 1);
    assert_eq!(merge_requests[0].title, "chore: add greeting (again)");
    assert!(merge_requests[0].description.starts_with("Second run."));
    assert!(
        merge_requests[0]
            .description
            .ends_with(&merge_request_marker("bot/greeting"))
    );

    Ok(())
}

#[tokio::test]
async fn test_clean_checkout_is_skipped_and_failures_are_isolated() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let good = create_remote(test_dir.path(), "widgets").await?;
    let missing = Repository {
        namespace: "acme".to_string(),
        name: "missing".to_string(),
        path: "acme/missing".to_string(),
        clone_url: test_dir
            .path()
            .join("missing.git")
            .to_string_lossy()
            .into_owned(),
        default_branch: "main".to_string(),
        ..Default::default()
    };

    let app = App::new(Box::new(LocalPlatform::new(vec![missing, good.clone()])));
    let noop = ScriptTask::new("noop", "bot/noop", "chore: nothing", vec!["true".to_string()]);
    let tasks: Vec<Box<dyn Task>> = vec![Box::new(noop), Box::new(greeting_task())];

    let report = app.execute_tasks(&tasks).await?;
    let summary: Vec<String> = report
        .outcomes
        .iter()
        .map(|o| format!("{} {} {}", o.repository, o.task, o.error.is_none()))
        .collect();
    insta::assert_debug_snapshot!(summary, @r#"
    [
        "acme/missing noop false",
        "acme/missing greeting false",
        "acme/widgets noop true",
        "acme/widgets greeting true",
    ]
    "#);

    // The no-op task neither pushed nor opened a merge request
    let branches = utils::git(Path::new(&good.clone_url), &["branch", "--list"]).await?;
    assert!(!branches.contains("bot/noop"));
    let merge_requests = app
        .platform
        .merge_requests(&good, &MergeRequestSearchOptions::default())
        .await?;
    assert_eq!(merge_requests.len(), 1);
    assert_eq!(merge_requests[0].source_branch, "bot/greeting");

    Ok(())
}
