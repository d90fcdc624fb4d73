use anyhow::Context;
use anyhow::Result;
use tracing::info;

use crate::platform::GitAuthor;
use crate::platform::Platform;
use crate::platform::PlatformError;
use crate::platform::github;
use crate::platform::github_app::GithubAppPlatform;
use crate::platform::github_user::GithubUserPlatform;
use crate::platform::gitlab_user::GitlabUserPlatform;

pub const AUTHOR_NAME: &str = "VCSAPP_AUTHOR_NAME";
pub const AUTHOR_EMAIL: &str = "VCSAPP_AUTHOR_EMAIL";
pub const GITHUB_APP_ID: &str = "GITHUB_APP_ID";
pub const GITHUB_APP_PRIVATE_KEY: &str = "GITHUB_APP_PRIVATE_KEY";
pub const GITHUB_APP_PRIVATE_KEY_FILE: &str = "GITHUB_APP_PRIVATE_KEY_FILE";
pub const GITHUB_USERNAME: &str = "GITHUB_USERNAME";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const GITHUB_API_URL: &str = "GITHUB_API_URL";
pub const GITLAB_SERVER: &str = "GITLAB_SERVER";
pub const GITLAB_ACCESS_TOKEN: &str = "GITLAB_ACCESS_TOKEN";

/// Credentials and settings for every supported platform. Unset values are
/// `None`; [`new_platform`] picks the first platform that is fully configured.
#[derive(Clone, Default)]
pub struct PlatformConfig {
    pub author: GitAuthor,
    pub github_app_id: Option<u64>,
    pub github_app_private_key: Option<String>,
    pub github_app_private_key_file: Option<String>,
    pub github_username: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: Option<String>,
    pub gitlab_server: Option<String>,
    pub gitlab_access_token: Option<String>,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("PlatformConfig")
            .field("author", &self.author)
            .field("github_app_id", &self.github_app_id)
            .field("github_app_private_key", &redacted(&self.github_app_private_key))
            .field("github_app_private_key_file", &self.github_app_private_key_file)
            .field("github_username", &self.github_username)
            .field("github_token", &redacted(&self.github_token))
            .field("github_api_url", &self.github_api_url)
            .field("gitlab_server", &self.gitlab_server)
            .field("gitlab_access_token", &redacted(&self.gitlab_access_token))
            .finish()
    }
}

impl PlatformConfig {
    /// Load config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let github_app_id = get(GITHUB_APP_ID)
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .with_context(|| format!("{GITHUB_APP_ID} is not a number"))?;

        let default_author = GitAuthor::default();
        Ok(Self {
            author: GitAuthor {
                name: get(AUTHOR_NAME).unwrap_or(default_author.name),
                email: get(AUTHOR_EMAIL).unwrap_or(default_author.email),
            },
            github_app_id,
            github_app_private_key: get(GITHUB_APP_PRIVATE_KEY),
            github_app_private_key_file: get(GITHUB_APP_PRIVATE_KEY_FILE),
            github_username: get(GITHUB_USERNAME),
            github_token: get(GITHUB_TOKEN),
            github_api_url: get(GITHUB_API_URL),
            gitlab_server: get(GITLAB_SERVER),
            gitlab_access_token: get(GITLAB_ACCESS_TOKEN),
        })
    }

    fn github_api_url(&self) -> &str {
        self.github_api_url
            .as_deref()
            .unwrap_or(github::DEFAULT_API_URL)
    }

    /// The GitHub App private key, inline value first, then the key file.
    fn github_app_private_key(&self) -> Result<Option<String>> {
        if let Some(key) = &self.github_app_private_key {
            return Ok(Some(key.clone()));
        }
        match &self.github_app_private_key_file {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .with_context(|| format!("Failed to read GitHub App private key from {path}")),
            None => Ok(None),
        }
    }
}

/// Which platform a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    GitlabUser,
    GithubApp,
    GithubUser,
}

/// First fully configured platform, in order GitLab user, GitHub App,
/// GitHub user.
pub fn select_platform(config: &PlatformConfig) -> Option<PlatformKind> {
    let has_app_key =
        config.github_app_private_key.is_some() || config.github_app_private_key_file.is_some();

    if config.gitlab_server.is_some() && config.gitlab_access_token.is_some() {
        Some(PlatformKind::GitlabUser)
    } else if config.github_app_id.is_some() && has_app_key {
        Some(PlatformKind::GithubApp)
    } else if config.github_username.is_some() && config.github_token.is_some() {
        Some(PlatformKind::GithubUser)
    } else {
        None
    }
}

/// Construct the platform selected by [`select_platform`].
pub fn new_platform(config: &PlatformConfig) -> Result<Box<dyn Platform>> {
    let kind = select_platform(config).ok_or(PlatformError::NoPlatformConfigured)?;
    info!(?kind, "selected platform");

    let platform: Box<dyn Platform> = match kind {
        PlatformKind::GitlabUser => {
            let server = config.gitlab_server.as_deref().unwrap_or_default();
            let token = config.gitlab_access_token.as_deref().unwrap_or_default();
            Box::new(GitlabUserPlatform::new(server, token, config.author.clone())?)
        }
        PlatformKind::GithubApp => {
            let app_id = config.github_app_id.unwrap_or_default();
            let key = config
                .github_app_private_key()?
                .ok_or(PlatformError::NoPlatformConfigured)?;
            Box::new(
                GithubAppPlatform::new(config.github_api_url(), app_id, &key)
                    .context("Failed to configure GitHub App")?,
            )
        }
        PlatformKind::GithubUser => Box::new(GithubUserPlatform::new(
            config.github_api_url(),
            config.github_username.as_deref().unwrap_or_default(),
            config.github_token.as_deref().unwrap_or_default(),
        )?),
    };

    Ok(platform)
}
