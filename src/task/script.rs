use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use tracing::warn;

use super::SimpleTask;
use super::Task;
use super::TaskContext;

/// Runs shell lines inside the checkout and proposes whatever they changed.
///
/// Each line runs with `bash -c` in the checkout. A failing line is logged and
/// the remaining lines still run.
#[derive(Debug, Clone)]
pub struct ScriptTask {
    pub name: String,
    pub branch: String,
    pub commit_message: String,
    pub title: String,
    pub description: String,
    /// Idempotency key of the merge request. Defaults to the branch name.
    pub key: String,
    pub script: Vec<String>,
}

impl ScriptTask {
    pub fn new(name: &str, branch: &str, commit_message: &str, script: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            branch: branch.to_string(),
            commit_message: commit_message.to_string(),
            title: commit_message.to_string(),
            description: String::new(),
            key: branch.to_string(),
            script,
        }
    }
}

async fn run_line(dir: &Path, line: &str) -> Result<()> {
    let status = Command::new("bash")
        .args(["-c", line])
        .current_dir(dir)
        .status()
        .await
        .context("Failed to execute bash")?;

    if !status.success() {
        bail!("script line exited with {status}");
    }
    Ok(())
}

#[async_trait]
impl Task for ScriptTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<()> {
        let mut task = SimpleTask::new(ctx);
        task.clone_repository().await?;
        task.create_branch(&self.branch).await?;

        for line in &self.script {
            if let Err(err) = run_line(&ctx.directory, line).await {
                warn!(repo = %ctx.repository.path, line, "script line failed: {:#}", err);
            }
        }

        let is_clean = match task.git() {
            Some(git) => git.is_clean().await?,
            None => true,
        };
        if is_clean {
            info!(repo = %ctx.repository.path, "no changes, skipping repository");
            return Ok(());
        }

        task.commit_push_and_merge_request(
            &self.commit_message,
            &self.title,
            &self.description,
            &self.key,
        )
        .await
    }
}
