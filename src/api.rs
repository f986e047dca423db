//! Seams to the outside world: the remote task API, the credential provider and
//! the connector that turns credentials into an API handle. `FixtureApi` is an
//! offline backend serving a JSON document.

use crate::fetch::{FetchError, Page};
use crate::model::{Item, ItemFilters, ListInfo, TaskList};
use ahash::AHashMap;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Cursor-paginated remote API. Both calls may fail transiently.
pub trait TaskApi {
    fn list_lists(&self, cursor: Option<&str>) -> Result<Page<ListInfo>, FetchError>;

    fn list_items(&self, list_id: &str, cursor: Option<&str>, filters: &ItemFilters) -> Result<Page<Item>, FetchError>;
}

impl<A: TaskApi + ?Sized> TaskApi for Box<A> {
    fn list_lists(&self, cursor: Option<&str>) -> Result<Page<ListInfo>, FetchError> {
        (**self).list_lists(cursor)
    }
    fn list_items(&self, list_id: &str, cursor: Option<&str>, filters: &ItemFilters) -> Result<Page<Item>, FetchError> {
        (**self).list_items(list_id, cursor, filters)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    /// Set once the remote side has rejected these credentials.
    pub invalid: bool,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { access_token: token.into(), invalid: false }
    }
}

pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` when nothing is stored for the user.
    fn credentials(&self, user: &str) -> Result<Option<Credentials>>;
}

/// Builds an API handle from stored credentials.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn TaskApi>, FetchError>;
}

/// In-memory credentials, keyed by user.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    by_user: AHashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>, creds: Credentials) -> Self {
        self.by_user.insert(user.into(), creds);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, user: &str) -> Result<Option<Credentials>> {
        Ok(self.by_user.get(user).cloned())
    }
}

/// Reads a bearer token from an environment variable, for any user.
#[derive(Clone, Debug)]
pub struct EnvTokenCredentials {
    pub var: String,
}

impl CredentialProvider for EnvTokenCredentials {
    fn credentials(&self, _user: &str) -> Result<Option<Credentials>> {
        match std::env::var(&self.var) {
            Ok(tok) if !tok.trim().is_empty() => Ok(Some(Credentials::bearer(tok.trim()))),
            _ => Ok(None),
        }
    }
}

/// Serve `all` in pages of `page_size`; the cursor is the decimal start offset.
pub fn paginate<T: Clone>(all: &[T], cursor: Option<&str>, page_size: usize) -> Result<Page<T>, FetchError> {
    let start = match cursor {
        None => 0,
        Some(c) => c.parse::<usize>().map_err(|_| FetchError::Fatal(format!("bad page cursor {c:?}")))?,
    };
    if start > all.len() {
        return Err(FetchError::Fatal(format!("page cursor {start} is past the end")));
    }
    let end = (start + page_size.max(1)).min(all.len());
    let items = all[start..end].to_vec();
    if end < all.len() {
        Ok(Page::more(items, end.to_string()))
    } else {
        Ok(Page::last(items))
    }
}

#[derive(Debug, Deserialize)]
struct FixtureDoc {
    lists: Vec<TaskList>,
}

/// Offline backend over a fixed set of lists.
#[derive(Clone, Debug)]
pub struct FixtureApi {
    lists: Arc<Vec<TaskList>>,
    page_size: usize,
}

impl FixtureApi {
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    pub fn new(lists: Vec<TaskList>) -> Self {
        Self { lists: Arc::new(lists), page_size: Self::DEFAULT_PAGE_SIZE }
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    /// Load `{ "lists": [{ "id", "title", "items": [...] }] }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: FixtureDoc = serde_json::from_str(json).context("parse fixture document")?;
        Ok(Self::new(doc.lists))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read fixture {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("load fixture {}", path.display()))
    }

    pub fn lists(&self) -> &[TaskList] {
        &self.lists
    }
}

impl TaskApi for FixtureApi {
    fn list_lists(&self, cursor: Option<&str>) -> Result<Page<ListInfo>, FetchError> {
        let infos: Vec<ListInfo> = self.lists.iter().map(|l| ListInfo { id: l.id.clone(), title: l.title.clone() }).collect();
        paginate(&infos, cursor, self.page_size)
    }

    fn list_items(&self, list_id: &str, cursor: Option<&str>, filters: &ItemFilters) -> Result<Page<Item>, FetchError> {
        let list = self
            .lists
            .iter()
            .find(|l| l.id == list_id)
            .ok_or_else(|| FetchError::Fatal(format!("no such list {list_id}")))?;
        let visible: Vec<Item> = list.items.iter().filter(|i| filters.admits(i)).cloned().collect();
        paginate(&visible, cursor, self.page_size)
    }
}

/// Hands out clones of one `FixtureApi` regardless of credentials.
#[derive(Clone, Debug)]
pub struct FixtureConnector {
    pub api: FixtureApi,
}

impl ApiConnector for FixtureConnector {
    fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn TaskApi>, FetchError> {
        Ok(Box::new(self.api.clone()))
    }
}
