use thiserror::Error;

/// Conditions callers need to tell apart from generic failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("repository not found: {path}")]
    NotFound { path: String },

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no platform configured: provide credentials for GitLab, a GitHub App, or a GitHub user")]
    NoPlatformConfigured,

    #[error("repository {path} was not listed by this platform adapter")]
    ForeignRepository { path: String },
}

impl PlatformError {
    /// Upstream HTTP status, if this is an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP status of the API error inside `err`, if any.
pub fn api_status(err: &anyhow::Error) -> Option<u16> {
    err.downcast_ref::<PlatformError>()
        .and_then(PlatformError::status)
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    api_status(err) == Some(404)
        || matches!(
            err.downcast_ref::<PlatformError>(),
            Some(PlatformError::NotFound { .. })
        )
}

/// GitHub answers commit and branch lookups on a repository without commits
/// with `409 Git Repository is empty.`
pub fn is_empty_repository(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<PlatformError>() {
        Some(PlatformError::Api { status, message }) => {
            *status == 409 || message.contains("Git Repository is empty")
        }
        _ => false,
    }
}
