//! Rendering a single page.
//!
//! A job normalizes its URL and answers from the render cache when it can.
//! Otherwise it opens a surface, installs the interception hooks, waits for
//! the page to settle, inlines captured stylesheets, and serializes the
//! document. The surface is closed on every path once it has been opened.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CachedResponse, RenderCache, ResourceCache};
use crate::capture::StylesheetTable;
use crate::config::RenderOptions;
use crate::engine::{InterceptedRequest, NetworkObserver, ObservedResponse, RenderEngine, RenderSurface};
use crate::error::{EngineError, Phase, RenderError};
use crate::normalize::normalize;
use crate::policy::Interception;

/// Everything a render job needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct RenderContext {
    pub engine: Arc<dyn RenderEngine>,
    pub options: Arc<RenderOptions>,
    pub resources: Arc<ResourceCache>,
    pub renders: Arc<RenderCache>,
}

impl RenderContext {
    /// Context with fresh, empty caches.
    pub fn new(engine: Arc<dyn RenderEngine>, options: RenderOptions) -> Self {
        Self {
            engine,
            options: Arc::new(options),
            resources: Arc::new(ResourceCache::new()),
            renders: Arc::new(RenderCache::new()),
        }
    }
}

/// Result of rendering one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    /// Normalized URL, marker included.
    pub url: String,
    pub html: String,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Served from the render cache without touching the engine.
    pub cached: bool,
}

impl RenderOutput {
    fn from_cache(url: String, html: String) -> Self {
        Self {
            url,
            html,
            elapsed: Duration::ZERO,
            cached: true,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn serialize_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(millis(*elapsed))
}

/// Render `raw_url`, or return the committed markup for its normalized form.
///
/// Concurrent calls for the same normalized URL share one render; every
/// caller but the one that rendered reports a cache hit.
pub async fn render_page(ctx: &RenderContext, raw_url: &str) -> Result<RenderOutput, RenderError> {
    let url = normalize(raw_url).map_err(|source| RenderError::InvalidUrl {
        url: raw_url.to_string(),
        source,
    })?;
    let key = url.to_string();

    let slot = ctx.renders.slot(&key);
    if let Some(html) = slot.get() {
        debug!(url = %key, "render cache hit");
        return Ok(RenderOutput::from_cache(key, html.clone()));
    }

    let start = Instant::now();
    let mut rendered = false;
    let html = slot
        .get_or_try_init(|| {
            rendered = true;
            render_fresh(ctx, &key)
        })
        .await?
        .clone();

    if !rendered {
        debug!(url = %key, "joined an in-flight render");
        return Ok(RenderOutput::from_cache(key, html));
    }

    let elapsed = start.elapsed();
    info!(url = %key, elapsed_ms = millis(elapsed), "rendered page");
    Ok(RenderOutput {
        url: key,
        html,
        elapsed,
        cached: false,
    })
}

async fn render_fresh(ctx: &RenderContext, url: &str) -> Result<String, RenderError> {
    let surface = ctx
        .engine
        .new_surface()
        .await
        .map_err(|source| RenderError::Acquire {
            url: url.to_string(),
            source,
        })?;

    let result = drive(ctx, surface.as_ref(), url).await;

    if let Err(err) = surface.close().await {
        warn!(url, error = %err, "failed to close render surface");
    }
    result
}

async fn drive(ctx: &RenderContext, surface: &dyn RenderSurface, url: &str) -> Result<String, RenderError> {
    let observer = Arc::new(JobObserver::new(ctx));
    surface
        .install_observer(Arc::clone(&observer) as Arc<dyn NetworkObserver>)
        .await
        .map_err(|source| RenderError::Intercept {
            url: url.to_string(),
            source,
        })?;

    wait_until_ready(ctx, surface, url).await?;

    let sheets = observer.stylesheets.take();
    if !sheets.is_empty() {
        let replaced = surface
            .inline_stylesheets(&sheets)
            .await
            .map_err(|source| RenderError::Inline {
                url: url.to_string(),
                source,
            })?;
        debug!(url, captured = sheets.len(), replaced, "inlined stylesheets");
    }

    surface.content().await.map_err(|source| RenderError::Serialize {
        url: url.to_string(),
        source,
    })
}

async fn wait_until_ready(ctx: &RenderContext, surface: &dyn RenderSurface, url: &str) -> Result<(), RenderError> {
    let options = &ctx.options;
    let limit = options.navigation_timeout;

    bounded(limit, Phase::Navigation, url, surface.goto(url)).await?;
    if let Some(selector) = &options.wait_for_selector {
        bounded(limit, Phase::Selector, url, surface.wait_for_selector(selector)).await?;
    }
    if let Some(idle) = options.idle {
        bounded(limit, Phase::NetworkIdle, url, surface.wait_for_network_idle(idle)).await?;
    }
    Ok(())
}

async fn bounded<F>(limit: Option<Duration>, phase: Phase, url: &str, step: F) -> Result<(), RenderError>
where
    F: Future<Output = Result<(), EngineError>>,
{
    let outcome = match limit {
        Some(after) => tokio::time::timeout(after, step)
            .await
            .map_err(|_| RenderError::Timeout {
                url: url.to_string(),
                phase,
                after,
            })?,
        None => step.await,
    };
    outcome.map_err(|source| RenderError::Navigation {
        url: url.to_string(),
        source,
    })
}

/// Network hooks of one job: applies the interception policy, captures
/// stylesheets, and feeds the resource cache.
struct JobObserver {
    options: Arc<RenderOptions>,
    resources: Arc<ResourceCache>,
    stylesheets: StylesheetTable,
}

impl JobObserver {
    fn new(ctx: &RenderContext) -> Self {
        Self {
            options: Arc::clone(&ctx.options),
            resources: Arc::clone(&ctx.resources),
            stylesheets: StylesheetTable::new(),
        }
    }
}

impl NetworkObserver for JobObserver {
    fn on_request(&self, request: &InterceptedRequest) -> Interception {
        let decision = self.options.policy.decide(request, &self.resources);
        match &decision {
            Interception::Abort(reason) => {
                debug!(url = %request.url, resource_type = %request.resource_type, ?reason, "aborting request");
            }
            Interception::Respond(cached) => {
                debug!(url = %request.url, "serving request from resource cache");
                self.stylesheets
                    .capture_replayed(&self.options.stylesheet_hosts, request, cached);
            }
            Interception::Continue => {}
        }
        decision
    }

    fn on_response(&self, response: &ObservedResponse) {
        self.stylesheets
            .capture(&self.options.stylesheet_hosts, response);
        if self.options.cache_types.contains(&response.resource_type) {
            self.resources
                .insert(response.url.clone(), CachedResponse::from(response));
        }
    }
}
