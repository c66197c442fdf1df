//! Prerender CLI
//!
//! Renders every configured URL through headless Chrome and writes one HTML
//! snapshot per page under the output directory:
//!
//!   prerender --config prerender.json
//!   prerender --url https://example.com/ --url https://example.com/about --concurrency 2
//!
//! The written snapshots are printed to stdout as a JSON array:
//!
//!   [{"path":"dist/ssr/page/example.com/index.html","url":"...","elapsed_ms":812,...}]
//!
//! No file is written when any page fails to render.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use prerender::{ChromiumEngine, LaunchOptions, PrerenderConfig, Prerenderer, Scheduler, SnapshotWriter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Render pages with headless Chrome into static HTML snapshots.
#[derive(Debug, Parser)]
#[command(name = "prerender", version, about)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, env = "PRERENDER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Page to render; repeat for several. Appended to the configured URLs.
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Maximum number of pages rendered at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Directory snapshots are written to.
    #[arg(long, value_name = "PATH")]
    out_dir: Option<PathBuf>,

    /// CSS selector that must appear before a page is serialized.
    #[arg(long, value_name = "SELECTOR")]
    wait_for_selector: Option<String>,

    /// Extra quiet period, in milliseconds, after the page has loaded.
    #[arg(long, value_name = "MS")]
    idle_ms: Option<u64>,

    /// Per-phase time limit in milliseconds; 0 disables it.
    #[arg(long, value_name = "MS")]
    navigation_timeout_ms: Option<u64>,

    /// Abort pages still rendering once one page has failed.
    #[arg(long)]
    cancel_on_failure: bool,

    /// Path to the Chrome executable.
    #[arg(long, env = "CHROME", value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long)]
    headful: bool,

    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> Result<(PrerenderConfig, LaunchOptions)> {
        let mut config = match &self.config {
            Some(path) => PrerenderConfig::from_file(path)?,
            None => PrerenderConfig::default(),
        };

        config.urls.extend(self.urls);
        if self.concurrency.is_some() {
            config.concurrency = self.concurrency;
        }
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if self.wait_for_selector.is_some() {
            config.wait_for_selector = self.wait_for_selector;
        }
        if self.idle_ms.is_some() {
            config.idle_ms = self.idle_ms;
        }
        match self.navigation_timeout_ms {
            Some(0) => config.navigation_timeout_ms = None,
            Some(ms) => config.navigation_timeout_ms = Some(ms),
            None => {}
        }
        config.cancel_on_failure |= self.cancel_on_failure;

        let launch = LaunchOptions {
            headless: !self.headful,
            executable: self.chrome,
            ..LaunchOptions::default()
        };
        Ok((config, launch))
    }
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

async fn run(config: PrerenderConfig, launch: LaunchOptions) -> Result<()> {
    let options = config.render_options()?;
    let scheduler = Scheduler::new(config.concurrency).with_cancel_policy(config.cancel_policy());

    let engine = Arc::new(ChromiumEngine::launch(launch).await.context("launching browser")?);
    let renderer = Prerenderer::new(engine.clone(), options).with_scheduler(scheduler);
    let rendered = renderer.render_all(&config.urls).await;

    if let Err(err) = engine.close().await {
        warn!(error = %err, "browser did not shut down cleanly");
    }
    let pages = rendered?;

    let writer = SnapshotWriter::new(&config.out_dir);
    writer.prepare().await?;
    let written = writer.write_all(pages).await?;
    info!(pages = written.len(), out_dir = %writer.root().display(), "snapshots written");

    println!("{}", serde_json::to_string(&written)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let (config, launch) = cli.into_config()?;
    if config.urls.is_empty() {
        anyhow::bail!("no URLs to render; pass --url or set \"urls\" in the config file");
    }

    run(config, launch).await
}
