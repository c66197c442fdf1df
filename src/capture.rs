//! Stylesheet capture for inlining.

use std::collections::BTreeMap;
use std::sync::Mutex;
use url::Url;

use crate::cache::CachedResponse;
use crate::engine::{InterceptedRequest, ObservedResponse};
use crate::normalize::url_host;
use crate::policy::ResourceType;

/// Hosts whose stylesheets may be captured. Empty means every host.
#[derive(Debug, Clone, Default)]
pub struct StylesheetHosts {
    hosts: Vec<String>,
}

impl StylesheetHosts {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    pub fn any() -> Self {
        Self::default()
    }

    /// Hosts are compared with their port, e.g. `localhost:3000`.
    pub fn allows(&self, url: &Url) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        match url_host(url) {
            Some(host) => self.hosts.iter().any(|allowed| *allowed == host),
            None => false,
        }
    }
}

/// Stylesheet bodies captured during one render job, keyed by request URL.
#[derive(Debug, Default)]
pub struct StylesheetTable {
    sheets: Mutex<BTreeMap<String, String>>,
}

impl StylesheetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `response` if it is a stylesheet from an allowed host.
    /// Returns whether it was captured.
    pub fn capture(&self, hosts: &StylesheetHosts, response: &ObservedResponse) -> bool {
        self.store(hosts, &response.url, response.resource_type, &response.body)
    }

    /// Record a stylesheet answered from the resource cache. The engine
    /// reports no response for such requests.
    pub fn capture_replayed(
        &self,
        hosts: &StylesheetHosts,
        request: &InterceptedRequest,
        cached: &CachedResponse,
    ) -> bool {
        self.store(hosts, &request.url, request.resource_type, &cached.body)
    }

    fn store(&self, hosts: &StylesheetHosts, url: &str, resource_type: ResourceType, body: &[u8]) -> bool {
        if resource_type != ResourceType::Stylesheet {
            return false;
        }
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !hosts.allows(&parsed) {
            return false;
        }

        let text = String::from_utf8_lossy(body).into_owned();
        self.lock().insert(url.to_string(), text);
        true
    }

    /// Take every captured sheet, leaving the table empty.
    pub fn take(&self) -> BTreeMap<String, String> {
        std::mem::take(&mut *self.lock())
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.sheets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
