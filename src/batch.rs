//! Batch orchestration: one render job per URL, run through the scheduler.

use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

use crate::cache::{RenderCache, ResourceCache};
use crate::config::RenderOptions;
use crate::engine::RenderEngine;
use crate::error::{BatchError, RenderError, SchedulerError};
use crate::job::{render_page, RenderContext, RenderOutput};
use crate::scheduler::{Scheduler, Task};

/// Renders batches of URLs against one engine, sharing caches across
/// batches.
#[derive(Clone)]
pub struct Prerenderer {
    ctx: RenderContext,
    scheduler: Scheduler,
}

impl Prerenderer {
    pub fn new(engine: Arc<dyn RenderEngine>, options: RenderOptions) -> Self {
        Self {
            ctx: RenderContext::new(engine, options),
            scheduler: Scheduler::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Use caches owned by the caller, e.g. pre-seeded ones.
    pub fn with_caches(mut self, resources: Arc<ResourceCache>, renders: Arc<RenderCache>) -> Self {
        self.ctx.resources = resources;
        self.ctx.renders = renders;
        self
    }

    pub fn resource_cache(&self) -> &Arc<ResourceCache> {
        &self.ctx.resources
    }

    pub fn render_cache(&self) -> &Arc<RenderCache> {
        &self.ctx.renders
    }

    /// Render every URL. Results come back in input order.
    ///
    /// The first failing page fails the whole batch; results of pages that
    /// already rendered are not returned.
    pub async fn render_all<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<RenderOutput>, BatchError> {
        let urls: Vec<String> = urls.iter().map(|url| url.as_ref().to_string()).collect();
        info!(
            pages = urls.len(),
            concurrency = self.scheduler.limit(),
            "starting render batch"
        );

        let tasks: Vec<Task<RenderOutput, RenderError>> = urls
            .iter()
            .map(|url| {
                let ctx = self.ctx.clone();
                let url = url.clone();
                Box::new(move || async move { render_page(&ctx, &url).await }.boxed())
                    as Task<RenderOutput, RenderError>
            })
            .collect();

        let outputs = self.scheduler.run(tasks).await.map_err(|err| match err {
            SchedulerError::Task { source, .. } => BatchError::Render {
                url: source.url().to_string(),
                source,
            },
            SchedulerError::Panicked { index } => BatchError::Panicked {
                url: urls[index].clone(),
            },
        })?;

        let rendered = outputs.iter().filter(|output| !output.cached).count();
        info!(
            pages = outputs.len(),
            rendered,
            cached = outputs.len() - rendered,
            "render batch finished"
        );
        Ok(outputs)
    }
}
