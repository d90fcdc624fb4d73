//! GitHub App credentials: the app-level JWT and installation access tokens.

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::http::HttpClient;
use super::http::TokenSource;

/// Tokens are renewed this long before GitHub says they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

// -----------------------------------------------------------------------------
// Types

/// Signs the short-lived JWT that authenticates as the app itself.
pub struct AppJwt {
    app_id: u64,
    key: EncodingKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Installation-scoped access tokens, minted lazily and reused until shortly
/// before they expire.
pub struct InstallationTokens {
    installation_id: u64,
    app: HttpClient,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AccessTokenRequest {}

// -----------------------------------------------------------------------------
// AppJwt impl

impl AppJwt {
    pub fn new(app_id: u64, private_key_pem: &str) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .context("Failed to parse GitHub App private key")?;
        Ok(Self { app_id, key })
    }

    /// Sign a JWT valid for nine minutes. Issued-at is backdated a minute to
    /// tolerate clock drift.
    pub fn mint(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .context("Failed to sign GitHub App JWT")
    }
}

#[async_trait]
impl TokenSource for AppJwt {
    async fn token(&self) -> Result<String> {
        self.mint()
    }
}

// -----------------------------------------------------------------------------
// InstallationTokens impl

impl InstallationTokens {
    /// `app` must authenticate with the app JWT.
    pub fn new(installation_id: u64, app: HttpClient) -> Self {
        Self {
            installation_id,
            app,
            cached: Mutex::new(None),
        }
    }

    pub fn installation_id(&self) -> u64 {
        self.installation_id
    }
}

#[async_trait]
impl TokenSource for InstallationTokens {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        let margin = Duration::seconds(EXPIRY_MARGIN_SECS);
        if let Some(current) = cached.as_ref().filter(|c| c.expires_at - margin > Utc::now()) {
            return Ok(current.token.clone());
        }

        let response: AccessTokenResponse = self
            .app
            .post(
                &format!("/app/installations/{}/access_tokens", self.installation_id),
                &AccessTokenRequest {},
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to create access token for installation {}",
                    self.installation_id
                )
            })?;
        debug!(
            installation_id = self.installation_id,
            expires_at = %response.expires_at,
            "minted installation token"
        );

        let token = response.token.clone();
        *cached = Some(CachedToken {
            token: response.token,
            expires_at: response.expires_at,
        });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::DecodingKey;
    use jsonwebtoken::Validation;

    use super::*;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/github-app-key.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/github-app-key.pub.pem");

    #[test]
    fn test_mint_signs_app_claims() {
        let jwt = AppJwt::new(12345, PRIVATE_KEY).unwrap();
        let token = jwt.mint().unwrap();

        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        let decoded =
            jsonwebtoken::decode::<Claims>(&token, &key, &Validation::new(Algorithm::RS256))
                .unwrap();

        assert_eq!(decoded.claims.iss, "12345");
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 10 * 60);
        assert!(decoded.claims.iat <= Utc::now().timestamp());
    }

    #[test]
    fn test_rejects_malformed_key() {
        let err = AppJwt::new(1, "not a key").err().unwrap();
        assert!(err.to_string().contains("private key"));
    }
}
