//! Batch configuration.
//!
//! [`PrerenderConfig`] is the serializable form read from a JSON file or
//! assembled by the CLI. [`RenderOptions`] is the compiled, immutable form
//! shared by every render job of a batch.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::StylesheetHosts;
use crate::error::ConfigError;
use crate::policy::{InterceptionPolicy, ResourceType};
use crate::scheduler::CancelPolicy;

/// Request types let through when none are configured. Images, media and
/// fonts cannot change the DOM and are dropped.
pub const DEFAULT_ALLOW_REQUEST_TYPES: &[ResourceType] = &[
    ResourceType::Document,
    ResourceType::Script,
    ResourceType::Xhr,
    ResourceType::Fetch,
    ResourceType::Stylesheet,
    ResourceType::Other,
];

/// Analytics and tracking endpoints.
pub const DEFAULT_BLOCK_LIST: &[&str] = &[
    r"analytics\.js",
    r"google-analytics",
    r"clarity",
    r"cloudflareinsights",
];

/// Response types stored in the resource cache.
pub const DEFAULT_CACHE_TYPES: &[ResourceType] = &[
    ResourceType::Script,
    ResourceType::Document,
    ResourceType::Stylesheet,
    ResourceType::Media,
    ResourceType::Font,
    ResourceType::Manifest,
];

/// Request types answered from the resource cache.
pub const DEFAULT_REPLAY_TYPES: &[ResourceType] = &[ResourceType::Stylesheet, ResourceType::Script];

pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_OUT_DIR: &str = "dist/ssr/page";

/// Compiled options for every render job in a batch.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub policy: InterceptionPolicy,
    pub stylesheet_hosts: StylesheetHosts,
    pub cache_types: HashSet<ResourceType>,
    /// Selector that must appear before the page counts as ready.
    pub wait_for_selector: Option<String>,
    /// Extra quiet period to wait for after navigation.
    pub idle: Option<Duration>,
    /// Upper bound for each readiness step. `None` waits forever.
    pub navigation_timeout: Option<Duration>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        let block_list = DEFAULT_BLOCK_LIST
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        Self {
            policy: InterceptionPolicy::new(
                DEFAULT_ALLOW_REQUEST_TYPES.iter().copied(),
                block_list,
                DEFAULT_REPLAY_TYPES.iter().copied(),
            ),
            stylesheet_hosts: StylesheetHosts::any(),
            cache_types: DEFAULT_CACHE_TYPES.iter().copied().collect(),
            wait_for_selector: None,
            idle: None,
            navigation_timeout: Some(Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS)),
        }
    }
}

/// Serializable batch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrerenderConfig {
    /// Pages to render, in output order.
    pub urls: Vec<String>,
    /// Render jobs in flight at once. Absent uses the scheduler default.
    pub concurrency: Option<usize>,
    /// Regex sources; a request whose URL matches any of them is aborted.
    pub block_list: Vec<String>,
    pub allow_request_types: Vec<ResourceType>,
    /// Hosts (with port) whose stylesheets are inlined. Empty inlines all.
    pub allow_stylesheet_hosts: Vec<String>,
    pub wait_for_selector: Option<String>,
    pub idle_ms: Option<u64>,
    /// `null` disables the timeout.
    pub navigation_timeout_ms: Option<u64>,
    pub cache_types: Vec<ResourceType>,
    pub replay_types: Vec<ResourceType>,
    pub cancel_on_failure: bool,
    pub out_dir: PathBuf,
}

impl Default for PrerenderConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            concurrency: None,
            block_list: DEFAULT_BLOCK_LIST.iter().map(|p| p.to_string()).collect(),
            allow_request_types: DEFAULT_ALLOW_REQUEST_TYPES.to_vec(),
            allow_stylesheet_hosts: Vec::new(),
            wait_for_selector: None,
            idle_ms: None,
            navigation_timeout_ms: Some(DEFAULT_NAVIGATION_TIMEOUT_MS),
            cache_types: DEFAULT_CACHE_TYPES.to_vec(),
            replay_types: DEFAULT_REPLAY_TYPES.to_vec(),
            cancel_on_failure: false,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
        }
    }
}

impl PrerenderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Compile block-list patterns and collect the per-job options.
    pub fn render_options(&self) -> Result<RenderOptions, ConfigError> {
        let block_list = self
            .block_list
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderOptions {
            policy: InterceptionPolicy::new(
                self.allow_request_types.iter().copied(),
                block_list,
                self.replay_types.iter().copied(),
            ),
            stylesheet_hosts: StylesheetHosts::new(self.allow_stylesheet_hosts.clone()),
            cache_types: self.cache_types.iter().copied().collect(),
            wait_for_selector: self.wait_for_selector.clone(),
            idle: self.idle_ms.map(Duration::from_millis),
            navigation_timeout: self.navigation_timeout_ms.map(Duration::from_millis),
        })
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        if self.cancel_on_failure {
            CancelPolicy::Abort
        } else {
            CancelPolicy::Detach
        }
    }
}
