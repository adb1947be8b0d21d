//! GitHub REST v3 client for repository metadata.
//!
//! # Responsibility
//! - Fetch single repositories and paginated listings (owned, starred,
//!   most-starred search).
//! - Reduce API payloads to the four fields the repo store persists.
//!
//! # Invariants
//! - Pagination follows `Link: rel="next"` headers until exhausted.
//! - When the rate-limit quota hits zero with pages remaining, the
//!   paginator sleeps one minute before continuing.

use crate::model::Metadata;
use log::{info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LINK, USER_AGENT};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::time::Duration;

const API_ROOT: &str = "https://api.github.com";
const AGENT: &str = "Tag-Github";
const TOKEN_FILE: &str = ".github_token";
const QUOTA_PAUSE: Duration = Duration::from_secs(60);

pub type GithubResult<T> = Result<T, GithubError>;

#[derive(Debug)]
pub enum GithubError {
    /// Transport-level failure (connect, timeout, TLS).
    Http(reqwest::Error),
    /// Non-200 response from the API.
    Status { url: String, status: u16 },
    /// Payload did not look like a repository record.
    Malformed { url: String, detail: String },
}

impl Display for GithubError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(source) => write!(f, "github request failed: {source}"),
            Self::Status { url, status } => {
                write!(f, "github returned error: {status} for {url}")
            }
            Self::Malformed { url, detail } => {
                write!(f, "unexpected github payload from {url}: {detail}")
            }
        }
    }
}

impl Error for GithubError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(source) => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GithubError {
    fn from(source: reqwest::Error) -> Self {
        Self::Http(source)
    }
}

/// The four-field reduction of a repository payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub full_name: String,
    pub fork: bool,
    pub language: Option<String>,
    pub description: Option<String>,
}

impl RepoRecord {
    /// Extracts the record from a full API payload.
    pub fn from_value(url: &str, value: &Value) -> GithubResult<Self> {
        let full_name = value
            .get("full_name")
            .and_then(Value::as_str)
            .ok_or_else(|| GithubError::Malformed {
                url: url.to_string(),
                detail: "missing full_name".to_string(),
            })?;
        Ok(Self {
            full_name: full_name.to_string(),
            fork: value.get("fork").and_then(Value::as_bool).unwrap_or(false),
            language: value
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Store metadata for this record. Absent fields become JSON null,
    /// matching what the API itself returns.
    pub fn into_metadata(self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("full_name".to_string(), Value::String(self.full_name));
        metadata.insert("fork".to_string(), Value::Bool(self.fork));
        metadata.insert(
            "language".to_string(),
            self.language.map(Value::String).unwrap_or(Value::Null),
        );
        metadata.insert(
            "description".to_string(),
            self.description.map(Value::String).unwrap_or(Value::Null),
        );
        metadata
    }
}

/// Source of repository metadata keyed by `owner/name`.
///
/// The repo store is generic over this so tests run without a network.
pub trait RepoMetadataSource {
    fn fetch_repo(&self, full_name: &str) -> GithubResult<RepoRecord>;
}

/// Blocking GitHub API client.
///
/// An API token is read from `./.github_token` or the `GITHUB_TOKEN`
/// environment variable when present; anonymous access works within the
/// unauthenticated rate limit.
pub struct GithubClient {
    client: Client,
    username: String,
}

impl GithubClient {
    pub fn new(username: &str) -> GithubResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));
        if let Some(token) = read_token() {
            if let Ok(value) = HeaderValue::from_str(&format!("token {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            username: username.to_string(),
        })
    }

    /// A single repository by `owner/name`.
    pub fn get_repo(&self, full_name: &str) -> GithubResult<RepoRecord> {
        let url = format!("{API_ROOT}/repos/{full_name}");
        let mut page = self.fetch_page(&url, &[])?;
        page.items
            .pop()
            .ok_or_else(|| GithubError::Malformed {
                url,
                detail: "empty response".to_string(),
            })
    }

    /// The configured user's own repositories.
    pub fn user_repos(&self) -> Paginated<'_> {
        self.paginate(format!("{API_ROOT}/users/{}/repos", self.username), &[])
    }

    /// The configured user's starred repositories.
    pub fn starred(&self) -> Paginated<'_> {
        self.paginate(format!("{API_ROOT}/users/{}/starred", self.username), &[])
    }

    /// The most-starred repositories on GitHub, best first.
    pub fn top_repos(&self) -> Paginated<'_> {
        self.paginate(
            format!("{API_ROOT}/search/repositories"),
            &[
                ("q", "stars:>1"),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", "100"),
            ],
        )
    }

    fn paginate(&self, url: String, params: &[(&str, &str)]) -> Paginated<'_> {
        Paginated {
            client: self,
            next_url: Some(url),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            first: true,
            buffer: Vec::new(),
        }
    }

    /// One GET, returning its records and the follow-up URL if any.
    fn fetch_page(&self, url: &str, params: &[(String, String)]) -> GithubResult<Page> {
        let response = self.client.get(url).query(params).send()?;
        let status = response.status().as_u16();
        log_quota(url, &response);
        if status != 200 {
            return Err(GithubError::Status {
                url: url.to_string(),
                status,
            });
        }

        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false);
        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link);

        let body: Value = response.json()?;
        // Search endpoints wrap their results in an `items` envelope.
        let records = match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => match body {
                Value::Array(items) => items,
                other => vec![other],
            },
        };
        let items = records
            .iter()
            .map(|value| RepoRecord::from_value(url, value))
            .collect::<GithubResult<Vec<_>>>()?;

        if exhausted && next.is_some() {
            warn!("event=rate_limited module=github status=sleeping url={url}");
            std::thread::sleep(QUOTA_PAUSE);
        }
        Ok(Page { items, next })
    }
}

impl RepoMetadataSource for GithubClient {
    fn fetch_repo(&self, full_name: &str) -> GithubResult<RepoRecord> {
        self.get_repo(full_name)
    }
}

struct Page {
    items: Vec<RepoRecord>,
    next: Option<String>,
}

/// Lazy page-following iterator over repository listings.
///
/// Errors terminate the iteration after being yielded once.
pub struct Paginated<'a> {
    client: &'a GithubClient,
    next_url: Option<String>,
    params: Vec<(String, String)>,
    first: bool,
    buffer: Vec<RepoRecord>,
}

impl Iterator for Paginated<'_> {
    type Item = GithubResult<RepoRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.buffer.is_empty() {
                return Some(Ok(self.buffer.remove(0)));
            }
            let url = self.next_url.take()?;
            // Query parameters ride on the first request only; the Link
            // header carries them forward on follow-up pages.
            let params = if self.first {
                self.first = false;
                self.params.clone()
            } else {
                Vec::new()
            };
            match self.client.fetch_page(&url, &params) {
                Ok(page) => {
                    self.next_url = page.next;
                    self.buffer = page.items;
                    if self.buffer.is_empty() && self.next_url.is_none() {
                        return None;
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// The `rel="next"` target of an RFC 8288 `Link` header, if present.
fn parse_next_link(header: &str) -> Option<String> {
    for part in header.split(',') {
        let mut sections = part.split(';');
        let url = sections.next()?.trim();
        let url = url.strip_prefix('<')?.strip_suffix('>')?;
        for param in sections {
            let param = param.trim();
            if param == "rel=\"next\"" || param == "rel=next" {
                return Some(url.to_string());
            }
        }
    }
    None
}

fn read_token() -> Option<String> {
    if let Ok(token) = fs::read_to_string(Path::new(TOKEN_FILE)) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Some(token);
        }
    }
    std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
}

fn log_quota(url: &str, response: &Response) {
    let limit = response
        .headers()
        .get("x-ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!("event=api_quota module=github remaining={remaining} limit={limit} url={url}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_link_extracted_from_header() {
        let header = "<https://api.github.com/search/repositories?page=2>; rel=\"next\", \
                      <https://api.github.com/search/repositories?page=10>; rel=\"last\"";
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://api.github.com/search/repositories?page=2")
        );
    }

    #[test]
    fn no_next_link_on_last_page() {
        let header = "<https://api.github.com/search/repositories?page=1>; rel=\"first\"";
        assert_eq!(parse_next_link(header), None);
    }

    #[test]
    fn record_reduced_from_payload() {
        let payload = json!({
            "id": 42,
            "full_name": "acme/widget",
            "fork": false,
            "language": "Rust",
            "description": null,
            "stargazers_count": 7,
        });
        let record = RepoRecord::from_value("https://example", &payload).unwrap();
        assert_eq!(record.full_name, "acme/widget");
        assert!(!record.fork);
        assert_eq!(record.language.as_deref(), Some("Rust"));
        assert_eq!(record.description, None);

        let metadata = record.into_metadata();
        assert_eq!(metadata["language"], json!("Rust"));
        assert_eq!(metadata["description"], Value::Null);
    }

    #[test]
    fn payload_without_full_name_rejected() {
        let payload = json!({"id": 42});
        assert!(RepoRecord::from_value("https://example", &payload).is_err());
    }
}
