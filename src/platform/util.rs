use std::sync::LazyLock;

use anyhow::Context;
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use reqwest::Url;

static NON_SLUG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z0-9]+").unwrap());

/// Identify the hosting server from a clone or remote URL.
///
/// Uses the last two hostname labels, e.g. `https://gitlab.example.io/x.git`
/// becomes `example-io`. Unparsable URLs yield `unknown`.
pub fn server_id_from_clone_url(url: &str) -> String {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .filter(|h| !h.is_empty())
    else {
        return "unknown".to_string();
    };

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        let tail = &labels[labels.len() - 2..];
        return slugify(&tail.join("."));
    }
    slugify(&host)
}

/// Lowercase, collapse every run of non-alphanumerics into one hyphen, and
/// trim hyphens from both ends.
pub fn slugify(s: &str) -> String {
    let lowered = s.trim().to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Replace CRLF line endings with LF.
pub fn unify_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}

/// Decode base64 file content as returned by the contents/files APIs.
/// Embedded line breaks (GitHub wraps at 60 columns) are ignored.
pub fn decode_base64_content(content: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .context("Failed to decode base64 file content")?;
    String::from_utf8(bytes).context("File content is not valid UTF-8")
}

/// Percent-encode a repository or file path for use as a single URL path
/// segment (GitLab project and file APIs).
pub fn encode_path_segment(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Split `namespace/name` at the last slash. Namespaces may be nested
/// (GitLab groups), names may not.
pub fn split_repository_path(path: &str) -> Option<(&str, &str)> {
    let (namespace, name) = path.trim_matches('/').rsplit_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((namespace, name))
}
