//! Per-request interception decisions.
//!
//! Rules are checked in a fixed order: resource-type allow-list, then the
//! block-list, then the resource cache, then the network. A block-listed URL
//! is never served from cache even if an earlier run cached it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::cache::{CachedResponse, ResourceCache};
use crate::engine::InterceptedRequest;
use crate::error::ConfigError;

/// Resource type as reported by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    CspViolationReport,
    Preflight,
    Other,
}

const RESOURCE_TYPES: &[(&str, ResourceType)] = &[
    ("document", ResourceType::Document),
    ("stylesheet", ResourceType::Stylesheet),
    ("image", ResourceType::Image),
    ("media", ResourceType::Media),
    ("font", ResourceType::Font),
    ("script", ResourceType::Script),
    ("texttrack", ResourceType::TextTrack),
    ("xhr", ResourceType::Xhr),
    ("fetch", ResourceType::Fetch),
    ("prefetch", ResourceType::Prefetch),
    ("eventsource", ResourceType::EventSource),
    ("websocket", ResourceType::WebSocket),
    ("manifest", ResourceType::Manifest),
    ("signedexchange", ResourceType::SignedExchange),
    ("ping", ResourceType::Ping),
    ("cspviolationreport", ResourceType::CspViolationReport),
    ("preflight", ResourceType::Preflight),
    ("other", ResourceType::Other),
];

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        RESOURCE_TYPES
            .iter()
            .find(|(_, ty)| *ty == self)
            .map_or("other", |(name, _)| *name)
    }

    /// Map an engine-specific name, falling back to [`ResourceType::Other`].
    pub fn from_engine_name(name: &str) -> Self {
        name.parse().unwrap_or(ResourceType::Other)
    }
}

impl FromStr for ResourceType {
    type Err = ConfigError;

    /// Case-insensitive, so both `xhr` and CDP's `XHR` parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        RESOURCE_TYPES
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| ConfigError::ResourceType(s.to_string()))
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    TypeNotAllowed,
    Blocked,
}

/// What the engine should do with an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Abort(AbortReason),
    Respond(CachedResponse),
    Continue,
}

/// Ordered rule set applied to every outbound request of a render job.
#[derive(Debug, Clone)]
pub struct InterceptionPolicy {
    allowed_types: HashSet<ResourceType>,
    block_list: Vec<Regex>,
    replay_types: HashSet<ResourceType>,
}

impl InterceptionPolicy {
    pub fn new(
        allowed_types: impl IntoIterator<Item = ResourceType>,
        block_list: Vec<Regex>,
        replay_types: impl IntoIterator<Item = ResourceType>,
    ) -> Self {
        Self {
            allowed_types: allowed_types.into_iter().collect(),
            block_list,
            replay_types: replay_types.into_iter().collect(),
        }
    }

    pub fn decide(&self, request: &InterceptedRequest, cache: &ResourceCache) -> Interception {
        if !self.allowed_types.contains(&request.resource_type) {
            return Interception::Abort(AbortReason::TypeNotAllowed);
        }
        if self.is_blocked(&request.url) {
            return Interception::Abort(AbortReason::Blocked);
        }
        if self.replay_types.contains(&request.resource_type) {
            if let Some(cached) = cache.get(&request.url) {
                return Interception::Respond(cached);
            }
        }
        Interception::Continue
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        self.block_list.iter().any(|pattern| pattern.is_match(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, resource_type: ResourceType) -> InterceptedRequest {
        InterceptedRequest {
            url: url.to_string(),
            resource_type,
        }
    }

    fn policy() -> InterceptionPolicy {
        InterceptionPolicy::new(
            [
                ResourceType::Document,
                ResourceType::Script,
                ResourceType::Stylesheet,
                ResourceType::Xhr,
            ],
            vec![Regex::new(r"ads\.test").unwrap()],
            [ResourceType::Script, ResourceType::Stylesheet],
        )
    }

    #[test]
    fn test_type_allow_list_wins_over_everything() {
        let cache = ResourceCache::new();
        cache.insert("https://ads.test/banner.png", CachedResponse::ok("png"));

        let decision = policy().decide(
            &request("https://ads.test/banner.png", ResourceType::Image),
            &cache,
        );
        assert_eq!(decision, Interception::Abort(AbortReason::TypeNotAllowed));
    }

    #[test]
    fn test_block_list_aborts_allowed_type() {
        let cache = ResourceCache::new();
        let decision = policy().decide(
            &request("https://ads.test/tag.js", ResourceType::Script),
            &cache,
        );
        assert_eq!(decision, Interception::Abort(AbortReason::Blocked));
    }

    #[test]
    fn test_block_list_wins_over_cache() {
        let cache = ResourceCache::new();
        cache.insert("https://ads.test/tag.js", CachedResponse::ok("track()"));

        let decision = policy().decide(
            &request("https://ads.test/tag.js", ResourceType::Script),
            &cache,
        );
        assert_eq!(decision, Interception::Abort(AbortReason::Blocked));
    }

    #[test]
    fn test_cached_script_is_replayed() {
        let cache = ResourceCache::new();
        let cached = CachedResponse::ok("console.log(1)");
        cache.insert("https://a.test/app.js?v=3", cached.clone());

        let decision = policy().decide(
            &request("https://a.test/app.js?v=3", ResourceType::Script),
            &cache,
        );
        assert_eq!(decision, Interception::Respond(cached));
    }

    #[test]
    fn test_cached_document_is_not_replayed() {
        let cache = ResourceCache::new();
        cache.insert("https://a.test/", CachedResponse::ok("<html></html>"));

        let decision = policy().decide(&request("https://a.test/", ResourceType::Document), &cache);
        assert_eq!(decision, Interception::Continue);
    }

    #[test]
    fn test_uncached_request_passes_through() {
        let cache = ResourceCache::new();
        let decision = policy().decide(
            &request("https://a.test/api/items", ResourceType::Xhr),
            &cache,
        );
        assert_eq!(decision, Interception::Continue);
    }

    #[test]
    fn test_resource_type_parsing() {
        assert_eq!("XHR".parse::<ResourceType>().unwrap(), ResourceType::Xhr);
        assert_eq!(
            "CSPViolationReport".parse::<ResourceType>().unwrap(),
            ResourceType::CspViolationReport
        );
        assert_eq!(
            serde_json::to_string(&ResourceType::TextTrack).unwrap(),
            "\"texttrack\""
        );
        assert!("gif".parse::<ResourceType>().is_err());
        assert_eq!(ResourceType::from_engine_name("FedCM"), ResourceType::Other);
    }
}
