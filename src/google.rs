//! Blocking client for the public Tasks v1 REST API.

use crate::api::{ApiConnector, Credentials, TaskApi};
use crate::fetch::{FetchError, Page};
use crate::model::{Item, ItemFilters, ListInfo};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://tasks.googleapis.com/tasks/v1";
const MAX_RESULTS: u32 = 100;
const USER_AGENT: &str = "taskvault/0.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageWire<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

/// 5xx and transport failures are transient; a 403 naming a daily/quota limit is
/// not retried; other 4xx responses are opaque and retried like 5xx.
fn classify(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            if code == 403 && (body.contains("dailyLimitExceeded") || body.contains("quotaExceeded")) {
                FetchError::QuotaExceeded(format!("HTTP {code}"))
            } else {
                FetchError::Transient(format!("HTTP {code}: {}", body.trim().chars().take(200).collect::<String>()))
            }
        }
        ureq::Error::Transport(t) => FetchError::Transient(t.to_string()),
    }
}

fn parse_page<T: for<'de> Deserialize<'de>>(resp: ureq::Response) -> Result<Page<T>, FetchError> {
    let body = resp.into_string().map_err(|e| FetchError::Transient(e.to_string()))?;
    let wire: PageWire<T> =
        serde_json::from_str(&body).map_err(|e| FetchError::Fatal(format!("unexpected response shape: {e}")))?;
    Ok(Page { items: wire.items, next_cursor: wire.next_page_token.filter(|t| !t.is_empty()) })
}

pub struct GoogleTasksApi {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl GoogleTasksApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { agent: http_agent(), base_url: base_url.into(), token: token.into() }
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, params: &[(&str, String)]) -> Result<Page<T>, FetchError> {
        let mut url = format!("{}{}?maxResults={MAX_RESULTS}", self.base_url, path);
        for (k, v) in params {
            url.push('&');
            url.push_str(k);
            url.push('=');
            url.push_str(&urlencoding::encode(v));
        }
        debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("Authorization", &format!("Bearer {}", self.token))
            .call()
            .map_err(classify)?;
        parse_page(resp)
    }
}

impl TaskApi for GoogleTasksApi {
    fn list_lists(&self, cursor: Option<&str>) -> Result<Page<ListInfo>, FetchError> {
        let mut params = Vec::new();
        if let Some(c) = cursor {
            params.push(("pageToken", c.to_string()));
        }
        self.get("/users/@me/lists", &params)
    }

    fn list_items(&self, list_id: &str, cursor: Option<&str>, filters: &ItemFilters) -> Result<Page<Item>, FetchError> {
        let mut params = vec![
            ("showCompleted", filters.include_completed.to_string()),
            ("showDeleted", filters.include_deleted.to_string()),
            ("showHidden", filters.include_hidden.to_string()),
        ];
        if let Some(c) = cursor {
            params.push(("pageToken", c.to_string()));
        }
        self.get(&format!("/lists/{}/tasks", urlencoding::encode(list_id)), &params)
    }
}

#[derive(Clone, Debug)]
pub struct GoogleConnector {
    pub base_url: String,
}

impl Default for GoogleConnector {
    fn default() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string() }
    }
}

impl ApiConnector for GoogleConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn TaskApi>, FetchError> {
        Ok(Box::new(GoogleTasksApi::with_base_url(self.base_url.clone(), credentials.access_token.clone())))
    }
}
