use std::fmt;

use anyhow::Context;
use anyhow::Result;
use colored::Colorize;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::platform::Platform;
use crate::platform::Repository;
use crate::platform::RepositoryListOpts;
use crate::task::Task;
use crate::task::TaskContext;

/// Prefix of per-task scratch directories.
pub const SCRATCH_PREFIX: &str = "vcs-app-";

pub struct App {
    pub platform: Box<dyn Platform>,
}

/// Result of one (task, repository) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: String,
    pub repository: String,
    /// Error chain, `None` on success.
    pub error: Option<String>,
}

/// Every pair attempted by [`App::execute_tasks`], in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "{} {} {}", "✓".green(), self.repository, self.task.dimmed()),
            Some(error) => write!(
                f,
                "{} {} {}: {}",
                "✗".red(),
                self.repository,
                self.task.dimmed(),
                error
            ),
        }
    }
}

impl App {
    pub fn new(platform: Box<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Run every task against every repository, one pair at a time.
    ///
    /// Only a failure to list repositories aborts the run. Task failures are
    /// logged and recorded in the report.
    pub async fn execute_tasks(&self, tasks: &[Box<dyn Task>]) -> Result<RunReport> {
        let repositories = self
            .platform
            .repositories(RepositoryListOpts {
                include_branches: true,
                include_commit_hash: true,
                include_plan: false,
            })
            .await
            .context("Failed to list repositories")?;

        let task_names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        info!(
            platform = self.platform.name(),
            repo_count = repositories.len(),
            tasks = ?task_names,
            "executing tasks"
        );

        let mut report = RunReport::default();
        for repo in &repositories {
            for task in tasks {
                let error = match self.execute_task(task.as_ref(), repo).await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(
                            task = task.name(),
                            repo = %format!("{}/{}", repo.namespace, repo.name),
                            "failed to execute task: {:#}",
                            err
                        );
                        Some(format!("{err:#}"))
                    }
                };
                report.outcomes.push(TaskOutcome {
                    task: task.name().to_string(),
                    repository: repo.path.clone(),
                    error,
                });
            }
        }

        Ok(report)
    }

    /// Run one task against one repository in a fresh scratch directory. The
    /// directory is removed afterwards whether or not the task succeeded.
    #[instrument(skip_all, fields(task = task.name(), repo = %repo.path))]
    pub async fn execute_task(&self, task: &dyn Task, repo: &Repository) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .context("Failed to prepare scratch directory")?;

        let ctx = TaskContext {
            directory: scratch.path().to_path_buf(),
            platform: self.platform.as_ref(),
            repository: repo,
        };
        let result = task.execute(&ctx).await;

        let path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            warn!(path = %path.display(), "failed to remove scratch directory: {}", err);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::platform::MockPlatform;

    /// Records the scratch directory of every call and fails for one
    /// repository.
    struct RecordingTask {
        name: &'static str,
        fail_for: Option<&'static str>,
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    impl RecordingTask {
        fn new(name: &'static str, fail_for: Option<&'static str>) -> Self {
            Self {
                name,
                fail_for,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Task for RecordingTask {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &TaskContext<'_>) -> Result<()> {
            assert!(ctx.directory.is_dir());
            tokio::fs::write(ctx.directory.join("work.txt"), "scratch").await?;
            self.calls
                .lock()
                .unwrap()
                .push((ctx.repository.path.clone(), ctx.directory.clone()));

            if self.fail_for == Some(ctx.repository.path.as_str()) {
                bail!("boom");
            }
            Ok(())
        }
    }

    fn repo(namespace: &str, name: &str) -> Repository {
        Repository {
            namespace: namespace.to_string(),
            name: name.to_string(),
            path: format!("{namespace}/{name}"),
            ..Default::default()
        }
    }

    fn platform_with(repos: Vec<Repository>) -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform.expect_name().return_const("GitHub");
        platform
            .expect_repositories()
            .withf(|opts| opts.include_branches && opts.include_commit_hash)
            .times(1)
            .returning(move |_| Ok(repos.clone()));
        platform
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_run() {
        let app = App::new(Box::new(platform_with(vec![
            repo("org", "a"),
            repo("org", "b"),
            repo("org", "c"),
        ])));
        let first = RecordingTask::new("first", Some("org/b"));
        let second = RecordingTask::new("second", None);
        let tasks: Vec<Box<dyn Task>> = vec![Box::new(first), Box::new(second)];

        let report = app.execute_tasks(&tasks).await.unwrap();

        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.succeeded(), 5);
        assert_eq!(report.failed(), 1);

        let failed: Vec<_> = report.outcomes.iter().filter(|o| o.error.is_some()).collect();
        assert_eq!(failed[0].task, "first");
        assert_eq!(failed[0].repository, "org/b");
        assert_eq!(failed[0].error.as_deref(), Some("boom"));

        // Repository-major order
        let order: Vec<_> = report
            .outcomes
            .iter()
            .map(|o| format!("{}:{}", o.repository, o.task))
            .collect();
        assert_eq!(
            order,
            vec![
                "org/a:first",
                "org/a:second",
                "org/b:first",
                "org/b:second",
                "org/c:first",
                "org/c:second",
            ]
        );
    }

    #[tokio::test]
    async fn test_scratch_directories_are_unique_and_removed() {
        let app = App::new(Box::new(MockPlatform::new()));
        let task = RecordingTask::new("only", Some("org/a"));

        app.execute_task(&task, &repo("org", "a")).await.unwrap_err();
        app.execute_task(&task, &repo("org", "b")).await.unwrap();

        let calls = task.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].1, calls[1].1);
        for (_, dir) in calls.iter() {
            assert!(!dir.exists(), "{} still exists", dir.display());
            let name = dir.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with(SCRATCH_PREFIX));
        }
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let mut platform = MockPlatform::new();
        platform
            .expect_repositories()
            .returning(|_| Err(anyhow!("401 Unauthorized")));
        let app = App::new(Box::new(platform));
        let task = RecordingTask::new("never", None);
        let tasks: Vec<Box<dyn Task>> = vec![Box::new(task)];

        let err = app.execute_tasks(&tasks).await.unwrap_err();
        assert_eq!(format!("{err:#}"), "Failed to list repositories: 401 Unauthorized");
    }

    #[test]
    fn test_outcome_display() {
        let ok = TaskOutcome {
            task: "format".to_string(),
            repository: "org/a".to_string(),
            error: None,
        };
        let failed = TaskOutcome {
            error: Some("push rejected".to_string()),
            ..ok.clone()
        };

        insta::assert_snapshot!(ok.to_string(), @"✓ org/a format");
        insta::assert_snapshot!(failed.to_string(), @"✗ org/a format: push rejected");
    }
}
