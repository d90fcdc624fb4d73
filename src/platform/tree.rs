use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::util::unify_line_endings;
use crate::clients::git::StatusEntry;

pub const MODE_FILE: &str = "100644";
pub const MODE_EXECUTABLE: &str = "100755";

/// One entry of a tree-creation request.
///
/// Text files carry their content inline. Binary files reference a blob
/// uploaded beforehand. A `sha` of `None` serializes as `"sha": null`, which
/// removes the path from the base tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TreeEntry {
    Blob {
        path: String,
        mode: &'static str,
        #[serde(rename = "type")]
        kind: &'static str,
        content: String,
    },
    Sha {
        path: String,
        mode: &'static str,
        #[serde(rename = "type")]
        kind: &'static str,
        sha: Option<String>,
    },
}

impl TreeEntry {
    pub fn path(&self) -> &str {
        match self {
            Self::Blob { path, .. } | Self::Sha { path, .. } => path,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Sha { sha: None, .. })
    }
}

/// Stores raw file content remotely and returns the blob sha.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_blob(&self, content: &[u8]) -> Result<String>;
}

/// Build tree entries for every changed path under `dir`.
///
/// Paths that no longer exist on disk become tombstones. UTF-8 content is
/// inlined with line endings normalized to `\n`; anything else is uploaded
/// byte for byte through `blobs`.
pub async fn build_tree_entries(
    dir: &Path,
    changes: &[StatusEntry],
    blobs: &dyn BlobStore,
) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::with_capacity(changes.len());

    for change in changes {
        let full_path = dir.join(&change.path);

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(metadata) => Some(metadata),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to stat {}", change.path));
            }
        };

        let Some(metadata) = metadata.filter(|_| !change.deleted) else {
            entries.push(TreeEntry::Sha {
                path: change.path.clone(),
                mode: MODE_FILE,
                kind: "blob",
                sha: None,
            });
            continue;
        };

        let bytes = tokio::fs::read(&full_path)
            .await
            .with_context(|| format!("Failed to read {}", change.path))?;

        let mode = if metadata.permissions().mode() & 0o111 != 0 {
            MODE_EXECUTABLE
        } else {
            MODE_FILE
        };

        let entry = match String::from_utf8(bytes) {
            Ok(content) => TreeEntry::Blob {
                path: change.path.clone(),
                mode,
                kind: "blob",
                content: unify_line_endings(&content),
            },
            Err(err) => {
                let sha = blobs
                    .create_blob(err.as_bytes())
                    .await
                    .with_context(|| format!("Failed to upload {}", change.path))?;
                TreeEntry::Sha {
                    path: change.path.clone(),
                    mode,
                    kind: "blob",
                    sha: Some(sha),
                }
            }
        };
        entries.push(entry);
    }

    Ok(entries)
}
