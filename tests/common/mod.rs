//! Scripted in-memory browser for runner tests.
#![allow(dead_code)]

use async_trait::async_trait;
use feedguide::driver::{Download, Engine, LaunchOptions, Launcher, PageDriver};
use feedguide::{Error, Result, RunnerConfig};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// What the fake site contains.
#[derive(Debug, Clone, Default)]
pub struct Site {
    /// CSS selectors that match something.
    pub selectors: Vec<String>,
    /// Texts the loose text match finds.
    pub texts: Vec<String>,
    /// Inner texts of links and buttons, in document order.
    pub clickables: Vec<String>,
    /// Indices into `clickables` whose click throws.
    pub unclickable: Vec<usize>,
    /// Selectors / texts whose click opens a new tab.
    pub popups: Vec<String>,
    /// Selectors / texts whose click starts a download.
    pub downloads: Vec<String>,
    /// Suggested name of any download started.
    pub suggested_filename: Option<String>,
    /// Body of any download started.
    pub download_body: Vec<u8>,
    /// Launch fails.
    pub broken_browser: bool,
    /// Clicking this selector panics inside the driver.
    pub crash_on: Option<String>,
}

#[derive(Debug, Default)]
pub struct State {
    pub site: Site,
    pub launches: usize,
    pub engine_closes: usize,
    pub next_page: usize,
    pub open_pages: Vec<String>,
    pub closed_pages: Vec<String>,
    /// Everything pages did, as "<page> <verb> <arg>".
    pub events: Vec<String>,
    armed: bool,
    download_ready: bool,
    popup_pending: bool,
}

impl State {
    fn open_page(&mut self) -> String {
        self.next_page += 1;
        let id = format!("page-{}", self.next_page);
        self.open_pages.push(id.clone());
        id
    }

    fn clicked(&mut self, key: &str) {
        if self.site.popups.iter().any(|p| p == key) {
            self.popup_pending = true;
        }
        if self.armed && self.site.downloads.iter().any(|d| d == key) {
            self.armed = false;
            self.download_ready = true;
        }
    }
}

/// Handle shared by the launcher and the test.
#[derive(Clone, Default)]
pub struct Browser {
    state: Arc<Mutex<State>>,
}

impl Browser {
    pub fn new(site: Site) -> Self {
        let state = State {
            site,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub fn launcher(&self) -> MockLauncher {
        MockLauncher {
            state: self.state.clone(),
        }
    }
}

pub struct MockLauncher {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Launcher for MockLauncher {
    type Engine = MockEngine;

    async fn launch(&self, options: &LaunchOptions) -> Result<MockEngine> {
        let mut state = self.state.lock().unwrap();
        if state.site.broken_browser {
            return Err(Error::Launch(format!("{} crashed on start", options.browser_name)));
        }
        state.launches += 1;
        Ok(MockEngine {
            state: self.state.clone(),
        })
    }
}

pub struct MockEngine {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Engine for MockEngine {
    type Page = MockPage;

    async fn new_page(&self) -> Result<MockPage> {
        let id = self.state.lock().unwrap().open_page();
        Ok(MockPage {
            id,
            state: self.state.clone(),
        })
    }

    async fn open_page_ids(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().open_pages.clone())
    }

    async fn wait_for_new_page(&self, _known: &[String], timeout: Duration) -> Result<MockPage> {
        let mut state = self.state.lock().unwrap();
        if !state.popup_pending {
            return Err(Error::Timeout(format!(
                "no new page opened within {}ms",
                timeout.as_millis()
            )));
        }
        state.popup_pending = false;
        let id = state.open_page();
        Ok(MockPage {
            id,
            state: self.state.clone(),
        })
    }

    async fn close_page(&self, page: MockPage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open_pages.retain(|p| *p != page.id);
        state.closed_pages.push(page.id);
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.state.lock().unwrap().engine_closes += 1;
        Ok(())
    }
}

pub struct MockPage {
    pub id: String,
    state: Arc<Mutex<State>>,
}

impl MockPage {
    fn record(&self, state: &mut State, verb: &str, arg: &str) {
        state.events.push(format!("{} {} {}", self.id, verb, arg));
    }
}

#[async_trait]
impl PageDriver for MockPage {
    type Download = MockDownload;

    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "goto", url);
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.site.crash_on.as_deref() == Some(selector) {
            drop(state);
            panic!("renderer crashed clicking {}", selector);
        }
        if !state.site.selectors.iter().any(|s| s == selector) {
            return Err(Error::Timeout(format!("waiting for selector '{}'", selector)));
        }
        self.record(&mut state, "click", selector);
        state.clicked(selector);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.site.selectors.iter().any(|s| s == selector) {
            return Err(Error::Timeout(format!("waiting for selector '{}'", selector)));
        }
        self.record(&mut state, "fill", &format!("{}={}", selector, value));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.site.selectors.iter().any(|s| s == selector) {
            Ok(())
        } else {
            Err(Error::Timeout(format!("waiting for selector '{}'", selector)))
        }
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "loaded", "");
        Ok(())
    }

    async fn click_text(&self, text: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let needle = text.to_lowercase();
        let hit = state
            .site
            .texts
            .iter()
            .find(|t| t.to_lowercase().contains(&needle))
            .cloned();
        match hit {
            Some(t) => {
                self.record(&mut state, "click_text", &t);
                state.clicked(text);
                Ok(())
            }
            None => Err(Error::NotFound(format!("no element with text '{}'", text))),
        }
    }

    async fn clickable_texts(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().site.clickables.clone())
    }

    async fn click_clickable(&self, index: usize, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.site.unclickable.contains(&index) {
            return Err(Error::ActionFailed(format!("element {} is covered", index)));
        }
        let text = state.site.clickables[index].clone();
        self.record(&mut state, "click_fallback", &text);
        state.clicked(&text);
        Ok(())
    }

    async fn expect_download(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.armed = true;
        state.download_ready = false;
        self.record(&mut state, "expect_download", "");
        Ok(())
    }

    async fn wait_for_download(&self, timeout: Duration) -> Result<MockDownload> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "wait_for_download", "");
        if !state.download_ready {
            return Err(Error::Timeout(format!(
                "download timeout: no download started within {}ms",
                timeout.as_millis()
            )));
        }
        state.download_ready = false;
        Ok(MockDownload {
            suggested: state.site.suggested_filename.clone(),
            body: state.site.download_body.clone(),
        })
    }
}

pub struct MockDownload {
    suggested: Option<String>,
    body: Vec<u8>,
}

#[async_trait]
impl Download for MockDownload {
    fn suggested_filename(&self) -> Option<&str> {
        self.suggested.as_deref()
    }

    async fn save_as(self, dest: &Path) -> Result<u64> {
        tokio::fs::write(dest, &self.body).await?;
        Ok(self.body.len() as u64)
    }
}

/// Runner options writing into `dir`.
pub fn config(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        download_dir: dir.to_path_buf(),
        step_timeout_ms: 200,
        ..Default::default()
    }
}

/// Serve fixed bodies over HTTP. Unknown paths get 404.
///
/// The server shuts down when the returned handle is dropped.
pub async fn serve(routes: &[(&'static str, &'static str)]) -> MockServer {
    let server = MockServer::start().await;
    for (route, body) in routes {
        Mock::given(method("GET"))
            .and(path(*route))
            .respond_with(ResponseTemplate::new(200).set_body_string(*body))
            .mount(&server)
            .await;
    }
    server
}
