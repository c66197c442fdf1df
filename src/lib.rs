//! # Prerender
//!
//! Renders a batch of URLs through a headless browser and produces
//! self-contained HTML snapshots for static hosting or crawlers.
//!
//! ## Pipeline
//!
//! - **Scheduler**: at most `concurrency` pages render at once, started in
//!   input order; the first failure fails the batch
//! - **Render cache**: a page is rendered once per process, keyed by its
//!   normalized URL (no fragment, `headless` marker set)
//! - **Interception**: requests are filtered by resource type, then by a
//!   regex block-list, then answered from the resource cache when possible
//! - **Stylesheet inlining**: captured stylesheets replace their `<link>`
//!   elements so snapshots do not depend on external CSS
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prerender::{ChromiumEngine, LaunchOptions, Prerenderer, PrerenderConfig, SnapshotWriter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PrerenderConfig {
//!         urls: vec!["https://example.com/".into()],
//!         ..Default::default()
//!     };
//!
//!     let engine = Arc::new(ChromiumEngine::launch(LaunchOptions::default()).await?);
//!     let renderer = Prerenderer::new(engine.clone(), config.render_options()?);
//!     let pages = renderer.render_all(&config.urls).await?;
//!
//!     let writer = SnapshotWriter::new(&config.out_dir);
//!     writer.prepare().await?;
//!     writer.write_all(pages).await?;
//!     engine.close().await?;
//!     Ok(())
//! }
//! ```

mod batch;
mod cache;
mod capture;
#[cfg(feature = "chromium")]
mod chromium;
mod config;
mod engine;
mod error;
mod job;
mod normalize;
mod output;
mod policy;
mod scheduler;
#[cfg(test)]
mod testing;

pub use batch::Prerenderer;
pub use cache::{CachedResponse, RenderCache, ResourceCache};
pub use capture::{StylesheetHosts, StylesheetTable};
#[cfg(feature = "chromium")]
pub use chromium::{ChromiumEngine, LaunchOptions};
pub use config::{PrerenderConfig, RenderOptions, DEFAULT_ALLOW_REQUEST_TYPES, DEFAULT_BLOCK_LIST};
pub use engine::{InterceptedRequest, NetworkObserver, ObservedResponse, RenderEngine, RenderSurface};
pub use error::{BatchError, BoxError, ConfigError, EngineError, OutputError, Phase, RenderError, SchedulerError};
pub use job::{render_page, RenderContext, RenderOutput};
pub use normalize::{normalize, strip_marker, MARKER_PARAM};
pub use output::{SnapshotWriter, WrittenSnapshot};
pub use policy::{AbortReason, Interception, InterceptionPolicy, ResourceType};
pub use scheduler::{effective_limit, CancelPolicy, Scheduler, Task, DEFAULT_CONCURRENCY};
