//! Error types for the prerender pipeline.
//!
//! Each layer has its own enum so callers can tell where a batch broke:
//! the engine reports [`EngineError`], a single page reports [`RenderError`],
//! the scheduler wraps the first failing task in [`SchedulerError`], and the
//! batch orchestrator attributes it to a URL in [`BatchError`].

use std::time::Duration;

/// Boxed error used for causes coming from outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a rendering engine backend.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Which readiness step ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Navigation,
    Selector,
    NetworkIdle,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Navigation => "navigation",
            Phase::Selector => "wait for selector",
            Phase::NetworkIdle => "wait for network idle",
        };
        f.write_str(name)
    }
}

/// Failure of one render job.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("could not open a render surface for {url}")]
    Acquire {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("could not install request interception for {url}")]
    Intercept {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("page navigation or readiness wait failed for {url}")]
    Navigation {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("{phase} timed out after {after:?} for {url}")]
    Timeout {
        url: String,
        phase: Phase,
        after: Duration,
    },

    #[error("could not inline stylesheets for {url}")]
    Inline {
        url: String,
        #[source]
        source: EngineError,
    },

    #[error("could not serialize document for {url}")]
    Serialize {
        url: String,
        #[source]
        source: EngineError,
    },
}

impl RenderError {
    /// URL of the page that failed.
    pub fn url(&self) -> &str {
        match self {
            RenderError::InvalidUrl { url, .. }
            | RenderError::Acquire { url, .. }
            | RenderError::Intercept { url, .. }
            | RenderError::Navigation { url, .. }
            | RenderError::Timeout { url, .. }
            | RenderError::Inline { url, .. }
            | RenderError::Serialize { url, .. } => url,
        }
    }
}

/// First failure observed by the task scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError<E>
where
    E: std::error::Error + 'static,
{
    #[error("task {index} failed")]
    Task {
        index: usize,
        #[source]
        source: E,
    },

    #[error("task {index} panicked or was cancelled")]
    Panicked { index: usize },
}

impl<E> SchedulerError<E>
where
    E: std::error::Error + 'static,
{
    /// Input index of the task that failed.
    pub fn index(&self) -> usize {
        match self {
            SchedulerError::Task { index, .. } | SchedulerError::Panicked { index } => *index,
        }
    }
}

/// A batch failed; no output should be written for any URL.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("rendering {url} failed")]
    Render {
        url: String,
        #[source]
        source: RenderError,
    },

    #[error("render task for {url} panicked")]
    Panicked { url: String },
}

/// Configuration could not be loaded or compiled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid block-list pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown resource type '{0}'")]
    ResourceType(String),
}

/// Snapshot files could not be written.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("invalid snapshot url '{url}'")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("snapshot url '{0}' has no host")]
    NoHost(String),

    #[error("failed to write '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
