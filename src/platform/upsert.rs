//! Search-then-update-or-create for bot-managed merge requests.
//!
//! Each adapter supplies three primitives through [`MergeRequestStore`]; the
//! sequence itself lives here once.

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::MergeRequest;

/// Marker appended to descriptions of merge requests managed under `key`.
pub fn merge_request_marker(key: &str) -> String {
    format!("<!--vcs-merge-request-key:{key}-->")
}

/// `description` with the idempotency marker for `key` appended.
pub fn with_merge_request_key(description: &str, key: &str) -> String {
    format!("{description}\n\n{}", merge_request_marker(key))
}

/// Adapter-specific merge request primitives.
#[async_trait]
pub trait MergeRequestStore: Send + Sync {
    /// Open merge requests from `source_branch` into `target_branch`.
    async fn list_open_by_source_branch(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>>;

    /// Replace title and description, leaving everything else alone.
    async fn update(&self, existing: &MergeRequest, title: &str, description: &str) -> Result<()>;

    /// Open a new merge request, requesting squash and source-branch removal
    /// on merge where the platform allows it.
    async fn create(
        &self,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created { number: u64 },
    Updated { number: u64 },
}

/// Update the open merge request from `source_branch` into `target_branch`,
/// or create one. A failed search returns before anything is mutated.
pub async fn create_or_update(
    store: &dyn MergeRequestStore,
    target_branch: &str,
    source_branch: &str,
    title: &str,
    description: &str,
    key: &str,
) -> Result<UpsertOutcome> {
    let description = with_merge_request_key(description, key);

    let existing = store
        .list_open_by_source_branch(source_branch, target_branch)
        .await
        .with_context(|| format!("Failed to search merge requests from {source_branch}"))?
        .into_iter()
        .find(|mr| mr.source_branch == source_branch);

    match existing {
        Some(mr) => {
            store
                .update(&mr, title, &description)
                .await
                .with_context(|| format!("Failed to update merge request {}", mr.number))?;
            info!(number = mr.number, source_branch, "updated merge request");
            Ok(UpsertOutcome::Updated { number: mr.number })
        }
        None => {
            let mr = store
                .create(source_branch, target_branch, title, &description)
                .await
                .with_context(|| format!("Failed to create merge request from {source_branch}"))?;
            info!(number = mr.number, source_branch, "created merge request");
            Ok(UpsertOutcome::Created { number: mr.number })
        }
    }
}
