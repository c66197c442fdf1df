//! Rendering engine backed by headless Chrome over the DevTools Protocol.
//!
//! Interception uses the `Fetch` domain at both stages: at the request stage
//! the observer decides abort / fulfil / continue, at the response stage the
//! body is read and handed to the observer before the response is released
//! to the page. Paused events of one page are handled strictly one at a time.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, FulfillRequestParams,
    GetResponseBodyParams, HeaderEntry, RequestId, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{InterceptedRequest, NetworkObserver, ObservedResponse, RenderEngine, RenderSurface};
use crate::error::EngineError;
use crate::policy::{Interception, ResourceType};

/// Quiet period after `goto` before a page counts as loaded.
const NETWORK_IDLE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub ignore_https_errors: bool,
    pub disable_web_security: bool,
    pub executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            ignore_https_errors: true,
            disable_web_security: true,
            executable: None,
            extra_args: Vec::new(),
        }
    }
}

/// A launched Chrome process shared by every render job.
pub struct ChromiumEngine {
    browser: tokio::sync::Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumEngine {
    pub async fn launch(options: LaunchOptions) -> Result<Self, EngineError> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        if options.disable_web_security {
            builder = builder.arg("--disable-web-security");
        }
        if options.ignore_https_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }
        for arg in &options.extra_args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|err| EngineError::new(format!("invalid browser config: {err}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(cdp_error("failed to launch browser"))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser connection closed");
                    break;
                }
            }
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler,
        })
    }

    /// Shut the browser down.
    pub async fn close(&self) -> Result<(), EngineError> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(cdp_error("failed to close browser"))?;
        if let Err(err) = browser.wait().await {
            warn!(error = %err, "browser process did not exit cleanly");
        }
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn new_surface(&self) -> Result<Box<dyn RenderSurface>, EngineError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp_error("failed to open page"))?;

        Ok(Box::new(ChromiumSurface {
            page,
            activity: Arc::new(Activity::new()),
            listener: Mutex::new(None),
        }))
    }
}

/// Time of the last network event seen on a page.
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    fn quiet_for(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
    }
}

struct ChromiumSurface {
    page: Page,
    activity: Arc<Activity>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumSurface {
    async fn settle(&self, idle: Duration) {
        self.activity.touch();
        while self.activity.quiet_for() < idle {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RenderSurface for ChromiumSurface {
    async fn install_observer(&self, observer: Arc<dyn NetworkObserver>) -> Result<(), EngineError> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(cdp_error("failed to listen for paused requests"))?;

        let enable = EnableParams::builder()
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build(),
            )
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Response)
                    .build(),
            )
            .build();
        self.page
            .execute(enable)
            .await
            .map_err(cdp_error("failed to enable request interception"))?;

        let page = self.page.clone();
        let activity = Arc::clone(&self.activity);
        let listener = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                activity.touch();
                if let Err(err) = handle_paused(&page, observer.as_ref(), &event).await {
                    debug!(url = %event.request.url, error = %err, "paused request not resolved");
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(listener);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<(), EngineError> {
        self.page
            .goto(url)
            .await
            .map_err(|err| EngineError::new(format!("failed to load {url}: {err}")))?;
        self.settle(NETWORK_IDLE).await;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), EngineError> {
        let probe = selector_script(selector)?;
        loop {
            let found = self
                .page
                .evaluate(probe.as_str())
                .await
                .map_err(|err| EngineError::new(format!("failed to query selector {selector:?}: {err}")))?
                .into_value::<bool>()
                .map_err(|err| EngineError::with_source("unexpected selector query result", err))?;
            if found {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_network_idle(&self, idle: Duration) -> Result<(), EngineError> {
        self.settle(idle).await;
        Ok(())
    }

    async fn inline_stylesheets(&self, sheets: &BTreeMap<String, String>) -> Result<usize, EngineError> {
        let content = serde_json::to_string(sheets)
            .map_err(|err| EngineError::with_source("failed to encode stylesheets", err))?;
        let script = format!(
            r#"((content) => {{
                let replaced = 0;
                document.querySelectorAll('link[rel="stylesheet"]').forEach((link) => {{
                    const cssText = content[link.href];
                    if (cssText) {{
                        const style = document.createElement('style');
                        style.textContent = cssText;
                        link.replaceWith(style);
                        replaced += 1;
                    }}
                }});
                return replaced;
            }})({content})"#
        );

        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(cdp_error("stylesheet inlining script failed"))?;
        result
            .into_value::<usize>()
            .map_err(|err| EngineError::with_source("unexpected inlining result", err))
    }

    async fn content(&self) -> Result<String, EngineError> {
        self.page
            .content()
            .await
            .map_err(cdp_error("failed to serialize document"))
    }

    async fn close(&self) -> Result<(), EngineError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(cdp_error("failed to close page"))
    }
}

async fn handle_paused(
    page: &Page,
    observer: &dyn NetworkObserver,
    event: &EventRequestPaused,
) -> Result<(), EngineError> {
    let request_id = event.request_id.clone();
    let resource_type = resource_type_of(event);
    let url = event.request.url.clone();

    if event.response_status_code.is_some() || event.response_error_reason.is_some() {
        if let Some(status) = event.response_status_code.filter(|code| has_body(*code)) {
            match read_body(page, &request_id).await {
                Ok(body) => {
                    let headers = event
                        .response_headers
                        .iter()
                        .flatten()
                        .map(|header| (header.name.clone(), header.value.clone()))
                        .collect();
                    observer.on_response(&ObservedResponse {
                        url,
                        resource_type,
                        status: u16::try_from(status).unwrap_or(200),
                        headers,
                        body,
                    });
                }
                Err(err) => warn!(url = %url, status, error = %err, "response body unavailable; not cached"),
            }
        }
        page.execute(ContinueRequestParams::new(request_id))
            .await
            .map_err(cdp_error("failed to release response"))?;
        return Ok(());
    }

    match observer.on_request(&InterceptedRequest { url, resource_type }) {
        Interception::Abort(_) => {
            page.execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                .await
                .map_err(cdp_error("failed to abort request"))?;
        }
        Interception::Respond(cached) => {
            let headers: Vec<HeaderEntry> = cached
                .headers
                .iter()
                .map(|(name, value)| HeaderEntry::new(name.clone(), value.clone()))
                .collect();
            let fulfil = FulfillRequestParams::builder()
                .request_id(request_id)
                .response_code(i64::from(cached.status))
                .response_headers(headers)
                .body(BASE64.encode(&cached.body))
                .build()
                .map_err(EngineError::new)?;
            page.execute(fulfil)
                .await
                .map_err(cdp_error("failed to fulfil request from cache"))?;
        }
        Interception::Continue => {
            page.execute(ContinueRequestParams::new(request_id))
                .await
                .map_err(cdp_error("failed to continue request"))?;
        }
    }
    Ok(())
}

async fn read_body(page: &Page, request_id: &RequestId) -> Result<Bytes, EngineError> {
    let body = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await
        .map_err(cdp_error("failed to read response body"))?;
    decode_body(&body.result.body, body.result.base64_encoded)
}

/// Whether a response with `status` carries a body the engine can return.
/// Redirects and bodiless statuses are released without reading.
fn has_body(status: i64) -> bool {
    !matches!(status, 100..=199 | 204 | 205 | 300..=399)
}

fn cdp_error(context: &'static str) -> impl Fn(CdpError) -> EngineError {
    move |err| EngineError::new(format!("{context}: {err}"))
}

/// Script evaluating to whether `selector` matches an element. An invalid
/// selector throws instead of reporting "not yet present".
fn selector_script(selector: &str) -> Result<String, EngineError> {
    let literal = serde_json::to_string(selector)
        .map_err(|err| EngineError::with_source("failed to encode selector", err))?;
    Ok(format!("document.querySelector({literal}) !== null"))
}

fn resource_type_of(event: &EventRequestPaused) -> ResourceType {
    serde_json::to_value(&event.resource_type)
        .ok()
        .and_then(|value| value.as_str().map(ResourceType::from_engine_name))
        .unwrap_or(ResourceType::Other)
}

fn decode_body(body: &str, base64_encoded: bool) -> Result<Bytes, EngineError> {
    if !base64_encoded {
        return Ok(Bytes::from(body.to_string()));
    }
    BASE64
        .decode(body)
        .map(Bytes::from)
        .map_err(|err| EngineError::with_source("response body is not valid base64", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_body() {
        assert_eq!(decode_body("a{}", false).unwrap(), Bytes::from_static(b"a{}"));
    }

    #[test]
    fn test_redirects_and_empty_statuses_skip_body() {
        for status in [101, 204, 205, 301, 302, 304, 307, 308] {
            assert!(!has_body(status), "status {status}");
        }
        for status in [200, 203, 404, 500] {
            assert!(has_body(status), "status {status}");
        }
    }

    #[test]
    fn test_selector_script_quotes_selector() {
        assert_eq!(
            selector_script(r#"a[href="/x"]"#).unwrap(),
            r#"document.querySelector("a[href=\"/x\"]") !== null"#
        );
    }

    #[test]
    fn test_decode_base64_body() {
        assert_eq!(decode_body("YXt9", true).unwrap(), Bytes::from_static(b"a{}"));
        assert!(decode_body("not base64!", true).is_err());
    }
}
