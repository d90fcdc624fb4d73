use std::fmt::Display;
use std::path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use reqwest::Url;
use tokio::process::Command;
use tracing::debug;

use crate::platform::Credential;
use crate::platform::GitAuthor;

// -----------------------------------------------------------------------------
// Types

/// Git client for one local checkout.
pub struct GitClient {
    path: path::PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitId(pub String);

impl Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One path reported by `git status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub deleted: bool,
}

// -----------------------------------------------------------------------------
// GitClient impl

impl GitClient {
    /// Wrap an existing checkout.
    pub fn open(path: path::PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &path::Path {
        &self.path
    }

    /// Clone `url` into `dir` (which may exist but must be empty), checking
    /// out `default_branch` unless it is empty.
    pub async fn clone(
        url: &str,
        dir: &path::Path,
        default_branch: &str,
        credential: Option<&Credential>,
    ) -> Result<Self> {
        let remote = authenticated_url(url, credential)?;

        let mut args = vec!["clone".to_string(), "--quiet".to_string()];
        if !default_branch.is_empty() {
            args.push("--branch".to_string());
            args.push(default_branch.to_string());
        }
        args.push(remote);
        args.push(dir.to_string_lossy().into_owned());

        debug!(url, dir = %dir.display(), "cloning repository");
        let output = Command::new("git")
            .args(&args)
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            bail!(
                "git clone of {} failed: {}",
                url,
                redact(&String::from_utf8_lossy(&output.stderr), credential)
            );
        }

        Ok(Self::open(dir.to_path_buf()))
    }

    /// Create `name` at the current HEAD and check it out, resetting it if
    /// it already exists.
    pub async fn create_branch(&self, name: &str) -> Result<()> {
        self.git(&["checkout", "--quiet", "-B", name]).await?;
        Ok(())
    }

    pub async fn is_clean(&self) -> Result<bool> {
        Ok(self.status().await?.is_empty())
    }

    pub async fn head(&self) -> Result<CommitId> {
        let output = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(CommitId(output.trim().to_string()))
    }

    /// Changed paths relative to HEAD, including untracked files. A rename
    /// shows up as a deletion of the old path plus the new path.
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        let output = self
            .git(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&output))
    }

    /// Stage everything and commit it as `author`.
    pub async fn commit_all(&self, message: &str, author: &GitAuthor) -> Result<CommitId> {
        self.git(&["add", "--all"]).await?;
        self.git(&[
            "-c",
            &format!("user.name={}", author.name),
            "-c",
            &format!("user.email={}", author.email),
            "commit",
            "--quiet",
            "-m",
            message,
        ])
        .await?;
        self.head().await
    }

    /// Force-push HEAD to `branch` on `url`.
    pub async fn force_push(
        &self,
        url: &str,
        branch: &str,
        credential: Option<&Credential>,
    ) -> Result<()> {
        let remote = authenticated_url(url, credential)?;
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let output = Command::new("git")
            .current_dir(&self.path)
            .args(["push", "--quiet", "--force", &remote, &refspec])
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            bail!(
                "git push to {} failed: {}",
                url,
                redact(&String::from_utf8_lossy(&output.stderr), credential)
            );
        }

        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(&self.path)
            .args(args)
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            bail!(
                "git command failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

// -----------------------------------------------------------------------------
// Helpers

/// Embed basic-auth credentials into an HTTPS remote URL. Other remotes
/// (SSH, local paths) are returned unchanged.
fn authenticated_url(url: &str, credential: Option<&Credential>) -> Result<String> {
    let Some(credential) = credential else {
        return Ok(url.to_string());
    };

    let mut parsed = match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
        _ => return Ok(url.to_string()),
    };
    if parsed
        .set_username(&credential.username)
        .and_then(|_| parsed.set_password(Some(&credential.password)))
        .is_err()
    {
        bail!("Cannot attach credentials to remote URL: {url}");
    }
    Ok(parsed.to_string())
}

fn redact(message: &str, credential: Option<&Credential>) -> String {
    match credential {
        Some(c) if !c.password.is_empty() => message.replace(&c.password, "***"),
        _ => message.to_string(),
    }
}

/// Parse `git status --porcelain=v1 -z` output.
pub fn parse_porcelain(output: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut records = output.split('\0').filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if record.len() < 4 {
            continue;
        }
        let (code, path) = record.split_at(3);
        let code = code.as_bytes();
        let (index, worktree) = (code[0], code[1]);

        entries.push(StatusEntry {
            path: path.to_string(),
            deleted: index == b'D' || worktree == b'D',
        });

        // Renames and copies carry the source path as a separate record
        if index == b'R' || index == b'C' {
            if let Some(source) = records.next() {
                if index == b'R' {
                    entries.push(StatusEntry {
                        path: source.to_string(),
                        deleted: true,
                    });
                }
            }
        }
    }

    entries
}
