//! Scripted in-memory rendering engine for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{InterceptedRequest, NetworkObserver, ObservedResponse, RenderEngine, RenderSurface};
use crate::error::EngineError;
use crate::policy::{Interception, ResourceType};

/// Something the fake engine was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Open,
    Request { url: String, outcome: &'static str },
    Response { url: String },
    Goto(String),
    WaitForSelector(String),
    WaitForIdle(Duration),
    Inline(Vec<String>),
    Content,
    Close,
}

#[derive(Default)]
struct Script {
    traffic: Vec<ObservedResponse>,
    html: String,
    fail_open: bool,
    fail_goto: Option<String>,
    fail_content: bool,
    goto_delay: Duration,
}

#[derive(Default)]
struct State {
    script: Script,
    calls: Mutex<Vec<Call>>,
    open: AtomicUsize,
    peak_open: AtomicUsize,
}

impl State {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Engine whose pages replay the same scripted traffic on every `goto`.
///
/// `{url}` in the scripted markup is replaced with the navigated URL.
#[derive(Clone)]
pub(crate) struct FakeEngine {
    state: Arc<State>,
}

impl FakeEngine {
    pub(crate) fn new(html: &str) -> FakeBuilder {
        FakeBuilder {
            script: Script {
                html: html.to_string(),
                ..Script::default()
            },
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub(crate) fn open_surfaces(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_open_surfaces(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeBuilder {
    script: Script,
}

impl FakeBuilder {
    pub(crate) fn traffic(mut self, url: &str, resource_type: ResourceType, body: &str) -> Self {
        self.script.traffic.push(ObservedResponse {
            url: url.to_string(),
            resource_type,
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::from(body.to_string()),
        });
        self
    }

    pub(crate) fn fail_open(mut self) -> Self {
        self.script.fail_open = true;
        self
    }

    /// Fail navigation to any URL containing `needle`.
    pub(crate) fn fail_goto(mut self, needle: &str) -> Self {
        self.script.fail_goto = Some(needle.to_string());
        self
    }

    pub(crate) fn fail_content(mut self) -> Self {
        self.script.fail_content = true;
        self
    }

    pub(crate) fn goto_delay(mut self, delay: Duration) -> Self {
        self.script.goto_delay = delay;
        self
    }

    pub(crate) fn build(self) -> FakeEngine {
        FakeEngine {
            state: Arc::new(State {
                script: self.script,
                ..State::default()
            }),
        }
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn new_surface(&self) -> Result<Box<dyn RenderSurface>, EngineError> {
        if self.state.script.fail_open {
            return Err(EngineError::new("browser is gone"));
        }
        self.state.record(Call::Open);
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakeSurface {
            state: Arc::clone(&self.state),
            observer: Mutex::new(None),
            url: Mutex::new(String::new()),
            inlined: Mutex::new(BTreeMap::new()),
        }))
    }
}

struct FakeSurface {
    state: Arc<State>,
    observer: Mutex<Option<Arc<dyn NetworkObserver>>>,
    url: Mutex<String>,
    inlined: Mutex<BTreeMap<String, String>>,
}

impl FakeSurface {
    fn replay_traffic(&self) {
        let Some(observer) = self.observer.lock().unwrap().clone() else {
            return;
        };
        for response in &self.state.script.traffic {
            let request = InterceptedRequest {
                url: response.url.clone(),
                resource_type: response.resource_type,
            };
            let outcome = match observer.on_request(&request) {
                Interception::Abort(_) => "abort",
                Interception::Respond(_) => "cache",
                Interception::Continue => "network",
            };
            self.state.record(Call::Request {
                url: request.url.clone(),
                outcome,
            });
            // Like the Fetch domain, requests answered from cache produce no
            // response event.
            if outcome == "network" {
                observer.on_response(response);
                self.state.record(Call::Response {
                    url: response.url.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn install_observer(&self, observer: Arc<dyn NetworkObserver>) -> Result<(), EngineError> {
        *self.observer.lock().unwrap() = Some(observer);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<(), EngineError> {
        self.state.record(Call::Goto(url.to_string()));
        *self.url.lock().unwrap() = url.to_string();
        if !self.state.script.goto_delay.is_zero() {
            tokio::time::sleep(self.state.script.goto_delay).await;
        }
        if let Some(needle) = &self.state.script.fail_goto {
            if url.contains(needle.as_str()) {
                return Err(EngineError::new("net::ERR_CONNECTION_REFUSED"));
            }
        }
        self.replay_traffic();
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), EngineError> {
        self.state.record(Call::WaitForSelector(selector.to_string()));
        Ok(())
    }

    async fn wait_for_network_idle(&self, idle: Duration) -> Result<(), EngineError> {
        self.state.record(Call::WaitForIdle(idle));
        tokio::time::sleep(idle).await;
        Ok(())
    }

    async fn inline_stylesheets(&self, sheets: &BTreeMap<String, String>) -> Result<usize, EngineError> {
        self.state.record(Call::Inline(sheets.keys().cloned().collect()));
        let mut inlined = self.inlined.lock().unwrap();
        inlined.extend(sheets.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(sheets.len())
    }

    async fn content(&self) -> Result<String, EngineError> {
        self.state.record(Call::Content);
        if self.state.script.fail_content {
            return Err(EngineError::new("target closed"));
        }
        let url = self.url.lock().unwrap().clone();
        let styles: String = self
            .inlined
            .lock()
            .unwrap()
            .values()
            .map(|css| format!("<style>{css}</style>"))
            .collect();
        Ok(self.state.script.html.replace("{url}", &url).replace("{styles}", &styles))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.state.record(Call::Close);
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
