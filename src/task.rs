//! Units of work run against every repository.
//!
//! A [`Task`] only sees its [`TaskContext`] and talks to the hosting platform
//! through [`Platform`].

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::platform::Platform;
use crate::platform::Repository;

pub mod script;
pub mod simple;

pub use script::ScriptTask;
pub use simple::SimpleTask;

/// Everything one task execution may use. Owned by the orchestrator and
/// valid for a single (task, repository) pair.
pub struct TaskContext<'a> {
    /// Empty scratch directory, removed once the task returns.
    pub directory: PathBuf,
    pub platform: &'a dyn Platform,
    pub repository: &'a Repository,
}

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<()>;
}
