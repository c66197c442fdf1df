//! Process-wide caches shared by every render job.
//!
//! Neither cache evicts. Both are handed to jobs behind an `Arc` so a test
//! (or a long-lived caller) can inject empty or pre-seeded instances.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::engine::ObservedResponse;

/// A sub-resource response captured from the network, replayable as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    /// Response with a `200` status and no headers.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// Headers describing the wire encoding of a body. Observed bodies are
/// already decoded, so these no longer apply on replay.
const ENCODING_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

impl From<&ObservedResponse> for CachedResponse {
    fn from(response: &ObservedResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| !ENCODING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)))
            .cloned()
            .collect();
        Self {
            status: response.status,
            headers,
            body: response.body.clone(),
        }
    }
}

/// Sub-resource responses keyed by exact request URL, query included.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: DashMap<String, CachedResponse>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<CachedResponse> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    /// Store a response, replacing whatever was cached for `url`.
    pub fn insert(&self, url: impl Into<String>, response: CachedResponse) {
        self.entries.insert(url.into(), response);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rendered page markup keyed by normalized URL.
///
/// Each key owns a slot that is filled at most once. A job that finds a slot
/// being filled by another job waits for it instead of rendering again.
#[derive(Debug, Default)]
pub struct RenderCache {
    slots: DashMap<String, Arc<OnceCell<String>>>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed markup for `url`, if any.
    pub fn get(&self, url: &str) -> Option<String> {
        self.slots
            .get(url)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Store markup for `url`, replacing any committed entry.
    pub fn insert(&self, url: impl Into<String>, html: impl Into<String>) {
        let slot = OnceCell::new_with(Some(html.into()));
        self.slots.insert(url.into(), Arc::new(slot));
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn slot(&self, url: &str) -> Arc<OnceCell<String>> {
        let slot = self.slots.entry(url.to_string()).or_default();
        Arc::clone(slot.value())
    }
}
