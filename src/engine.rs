//! Rendering engine capability.
//!
//! The pipeline never talks to a browser directly. A backend implements
//! [`RenderEngine`] to hand out [`RenderSurface`]s (one page each), and
//! reports network traffic of a surface to the [`NetworkObserver`] a render
//! job installs on it.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::policy::{Interception, ResourceType};

/// Outbound request paused by the engine, waiting for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub resource_type: ResourceType,
}

/// Response received by the engine. `url` is the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub url: String,
    pub resource_type: ResourceType,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Synchronous hooks for network events of one surface.
///
/// Engines must deliver events one at a time: a hook returns before the
/// next event is handed over.
pub trait NetworkObserver: Send + Sync {
    fn on_request(&self, request: &InterceptedRequest) -> Interception;

    fn on_response(&self, response: &ObservedResponse);
}

/// Factory for render surfaces, shared by all jobs of a batch.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn new_surface(&self) -> Result<Box<dyn RenderSurface>, EngineError>;
}

/// A single page inside the engine.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Turn on request interception and route events to `observer`.
    async fn install_observer(&self, observer: Arc<dyn NetworkObserver>) -> Result<(), EngineError>;

    /// Load `url` and return once the network has gone idle.
    async fn goto(&self, url: &str) -> Result<(), EngineError>;

    async fn wait_for_selector(&self, selector: &str) -> Result<(), EngineError>;

    /// Return once no network activity has been seen for `idle`.
    async fn wait_for_network_idle(&self, idle: Duration) -> Result<(), EngineError>;

    /// Replace every `<link rel="stylesheet">` whose resolved href is a key
    /// of `sheets` with a `<style>` element holding the captured text.
    /// Returns how many links were replaced.
    async fn inline_stylesheets(&self, sheets: &BTreeMap<String, String>) -> Result<usize, EngineError>;

    /// Serialized markup of the current document.
    async fn content(&self) -> Result<String, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
