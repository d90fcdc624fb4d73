use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::platform::PlatformError;
use crate::platform::paging;
use crate::platform::paging::PAGE_SIZE;
use crate::platform::paging::Page;

const USER_AGENT: &str = concat!("vcsbot/", env!("CARGO_PKG_VERSION"));

static LINK_NEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).unwrap());
static PAGE_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());

// -----------------------------------------------------------------------------
// Types

/// Produces a bearer token on demand, e.g. a short-lived GitHub App token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

#[derive(Clone)]
pub enum Auth {
    /// Static personal access token.
    Bearer(String),
    /// Token minted per request by the source (which may cache it).
    Dynamic(Arc<dyn TokenSource>),
}

/// JSON REST client shared by all platform adapters.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    accept: &'static str,
    auth: Auth,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

// -----------------------------------------------------------------------------
// HttpClient impl

impl HttpClient {
    pub fn new(base_url: &str, accept: &'static str, auth: Auth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            accept,
            auth,
            http,
        })
    }

    /// Same endpoint and connection pool, different credentials.
    pub fn with_auth(&self, auth: Auth) -> Self {
        Self {
            auth,
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request and decode the JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.request(Method::GET, path).await?.query(query);
        let response = self.send(request).await?;
        parse_body(response).await
    }

    /// Fetch one page of a list endpoint along with the next page number.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page: u32,
    ) -> Result<(T, Option<u32>)> {
        let request = self
            .request(Method::GET, path)
            .await?
            .query(query)
            .query(&[("per_page", PAGE_SIZE), ("page", page)]);
        let response = self.send(request).await?;
        let next = next_page(response.headers());
        Ok((parse_body(response).await?, next))
    }

    /// Fetch every page of a list endpoint returning a bare JSON array.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        self.get_all_by(path, query, |items: Vec<T>| items).await
    }

    /// Fetch every page of a list endpoint whose array sits inside a wrapper
    /// object, e.g. `{"total_count": 3, "repositories": [...]}`.
    pub async fn get_all_by<W: DeserializeOwned, T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        unwrap: fn(W) -> Vec<T>,
    ) -> Result<Vec<T>> {
        paging::collect_pages(|page| async move {
            let (body, next) = self.get_page::<W>(path, query, page).await?;
            Ok(Page {
                items: unwrap(body),
                next,
            })
        })
        .await
        .with_context(|| format!("Failed to list {path}"))
    }

    /// Fetch the first `limit` items of a list endpoint returning a bare
    /// JSON array.
    pub async fn get_limited<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        limit: usize,
    ) -> Result<Vec<T>> {
        paging::collect_limited(
            |page| async move {
                let (items, next) = self.get_page::<Vec<T>>(path, query, page).await?;
                Ok(Page { items, next })
            },
            limit,
        )
        .await
        .with_context(|| format!("Failed to list {path}"))
    }

    /// Make a POST request
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::POST, path, body).await
    }

    /// Make a PATCH request
    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::PATCH, path, body).await
    }

    /// Make a PUT request
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::PUT, path, body).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.request(method, path).await?.json(body);
        let response = self.send(request).await?;
        parse_body(response).await
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = match &self.auth {
            Auth::Bearer(token) => token.clone(),
            Auth::Dynamic(source) => source.token().await.context("Failed to obtain API token")?,
        };
        debug!(%method, path, "api request");

        Ok(self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, self.accept))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body).into());
        }

        Ok(response)
    }
}

// -----------------------------------------------------------------------------
// Helpers

async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response.text().await.context("Failed to read response body")?;
    let text = if text.trim().is_empty() { "null" } else { &text };
    serde_json::from_str(text).context("Failed to decode response body")
}

/// Build an API error, preferring the upstream's own message.
fn api_error(status: u16, body: &str) -> PlatformError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| match (e.message, e.error) {
            (Some(serde_json::Value::String(m)), _) => Some(m),
            (Some(other), _) => Some(other.to_string()),
            (None, Some(error)) => Some(error),
            (None, None) => None,
        })
        .unwrap_or_else(|| body.trim().to_string());

    PlatformError::Api { status, message }
}

/// Next page number from GitLab's `X-Next-Page` or GitHub's `Link` header.
pub fn next_page(headers: &HeaderMap) -> Option<u32> {
    if let Some(value) = headers.get("x-next-page").and_then(|v| v.to_str().ok()) {
        return value.trim().parse().ok();
    }

    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    let next_url = LINK_NEXT.captures(link)?.get(1)?.as_str();
    PAGE_PARAM.captures(next_url)?.get(1)?.as_str().parse().ok()
}
