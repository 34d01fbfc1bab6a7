//! Chromium backend on top of `eoka`.
//!
//! Element lookups run as injected JS that tags the match with a
//! `data-feedguide` attribute; the tag is then clicked through CDP like any
//! other selector.

use super::{Download, Engine, LaunchOptions, Launcher, PageDriver};
use crate::runner::download::{filename_from_headers, filename_from_url, sanitize, write_stream};
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::{Browser, Page, StealthConfig};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll interval for waits that have no browser event to hang on.
const POLL_MS: u64 = 100;

const CLICKABLE_SELECTOR: &str = "a, button, [role='link'], [role='button']";

/// Tag the innermost visible element whose text contains the needle.
const MARK_BY_TEXT_JS: &str = r#"(() => {
    const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    const needle = norm(arguments[0]);
    if (!document.body || !needle) return null;
    const visible = (el) => el.getClientRects().length > 0;
    const matches = (el) =>
        !el.closest('script, style, noscript, template') &&
        visible(el) &&
        norm(el.innerText || el.textContent).includes(needle);
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT, null);
    let found = null;
    while (walker.nextNode()) {
        const el = walker.currentNode;
        if (!matches(el)) continue;
        if (Array.from(el.children).some(matches)) continue;
        found = el;
        break;
    }
    if (!found) return null;
    const mark = 'fg-' + Math.random().toString(36).slice(2);
    found.setAttribute('data-feedguide', mark);
    return '[data-feedguide="' + mark + '"]';
})()"#;

const CLICKABLE_TEXTS_JS: &str = r#"(() =>
    Array.from(document.querySelectorAll(arguments[0])).map((el) => el.innerText || '')
)()"#;

const MARK_CLICKABLE_JS: &str = r#"(() => {
    const el = document.querySelectorAll(arguments[0])[arguments[1]];
    if (!el) return null;
    const mark = 'fg-' + Math.random().toString(36).slice(2);
    el.setAttribute('data-feedguide', mark);
    return '[data-feedguide="' + mark + '"]';
})()"#;

/// Capture the next link click instead of letting the browser download it.
const ARM_DOWNLOAD_JS: &str = r#"(() => {
    window.__feedguideDownload = null;
    window.__feedguideArmed = true;
    if (!window.__feedguideHooked) {
        window.__feedguideHooked = true;
        document.addEventListener('click', (event) => {
            if (!window.__feedguideArmed) return;
            const link = event.target && event.target.closest
                ? event.target.closest('a[href]')
                : null;
            if (!link) return;
            event.preventDefault();
            window.__feedguideArmed = false;
            window.__feedguideDownload = {
                href: link.href,
                filename: link.getAttribute('download'),
            };
        }, true);
    }
    return true;
})()"#;

const READ_DOWNLOAD_JS: &str = "window.__feedguideDownload || null";

/// Launches Chromium through `eoka`.
#[derive(Debug, Clone, Default)]
pub struct EokaLauncher {
    /// Use eoka's patched browser binary.
    pub patch_binary: bool,
}

#[async_trait]
impl Launcher for EokaLauncher {
    type Engine = EokaEngine;

    async fn launch(&self, options: &LaunchOptions) -> Result<EokaEngine> {
        let name = options.browser_name.to_lowercase();
        if !matches!(name.as_str(), "chromium" | "chrome") {
            return Err(Error::Launch(format!(
                "unsupported browser '{}': only chromium is available",
                options.browser_name
            )));
        }

        let config = StealthConfig {
            headless: options.headless,
            patch_binary: self.patch_binary,
            ..Default::default()
        };
        let browser = Browser::launch_with_config(config)
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;
        let http = reqwest::Client::builder().build()?;
        Ok(EokaEngine { browser, http })
    }
}

/// A running Chromium and its default context.
pub struct EokaEngine {
    browser: Browser,
    http: reqwest::Client,
}

#[async_trait]
impl Engine for EokaEngine {
    type Page = EokaPage;

    async fn new_page(&self) -> Result<EokaPage> {
        let page = self.browser.new_blank_page().await?;
        Ok(EokaPage::new(page, self.http.clone()))
    }

    async fn open_page_ids(&self) -> Result<Vec<String>> {
        Ok(self.browser.tabs().await?.into_iter().map(|t| t.id).collect())
    }

    async fn wait_for_new_page(&self, known: &[String], timeout: Duration) -> Result<EokaPage> {
        let deadline = Instant::now() + timeout;
        loop {
            let opened = self.browser.tabs().await?.into_iter().find(|t| {
                !known.contains(&t.id) && !t.url.is_empty() && t.url != "about:blank"
            });
            if let Some(tab) = opened {
                // Tabs the site opens are not driven by us; reopen the URL in a
                // page we control and drop the original.
                debug!("new tab {}: {}", tab.id, tab.url);
                let page = self.browser.new_page(&tab.url).await?;
                if let Err(e) = self.browser.close_tab(&tab.id).await {
                    warn!("failed to close tab {}: {}", tab.id, e);
                }
                return Ok(EokaPage::new(page, self.http.clone()));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no new page opened within {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(Duration::from_millis(POLL_MS)).await;
        }
    }

    async fn close_page(&self, page: EokaPage) -> Result<()> {
        let id = page.page.target_id().to_string();
        self.browser.close_tab(&id).await?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

/// A link click captured by the armed download hook.
#[derive(Debug, Deserialize)]
struct CapturedLink {
    href: String,
    filename: Option<String>,
}

/// One `eoka` page.
pub struct EokaPage {
    page: Page,
    http: reqwest::Client,
}

impl EokaPage {
    fn new(page: Page, http: reqwest::Client) -> Self {
        Self { page, http }
    }

    async fn click_marked(&self, selector: &str, timeout: Duration) -> Result<()> {
        bounded(timeout, "click", self.page.click(selector)).await
    }
}

#[async_trait]
impl PageDriver for EokaPage {
    type Download = EokaDownload;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        bounded(timeout, "navigation", self.page.goto(url)).await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.page.wait_for(selector, millis(timeout)).await?;
        bounded(timeout, "click", self.page.click(selector)).await
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        self.page.wait_for(selector, millis(timeout)).await?;
        bounded(timeout, "fill", self.page.fill(selector, value)).await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.page.wait_for(selector, millis(timeout)).await?;
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state: String = self.page.evaluate("document.readyState").await?;
            if state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "page not loaded within {}ms (readyState: {})",
                    timeout.as_millis(),
                    state
                )));
            }
            self.page.wait(POLL_MS).await;
        }
    }

    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let js = MARK_BY_TEXT_JS.replace("arguments[0]", &js_string(text));
        let deadline = Instant::now() + timeout;
        loop {
            let marked: Option<String> = self.page.evaluate(&js).await?;
            if let Some(selector) = marked {
                return self.click_marked(&selector, timeout).await;
            }
            if Instant::now() >= deadline {
                return Err(Error::NotFound(format!("no element with text '{}'", text)));
            }
            self.page.wait(POLL_MS).await;
        }
    }

    async fn clickable_texts(&self) -> Result<Vec<String>> {
        let js = CLICKABLE_TEXTS_JS.replace("arguments[0]", &js_string(CLICKABLE_SELECTOR));
        Ok(self.page.evaluate(&js).await?)
    }

    async fn click_clickable(&self, index: usize, timeout: Duration) -> Result<()> {
        let js = MARK_CLICKABLE_JS
            .replace("arguments[0]", &js_string(CLICKABLE_SELECTOR))
            .replace("arguments[1]", &index.to_string());
        let marked: Option<String> = self.page.evaluate(&js).await?;
        match marked {
            Some(selector) => self.click_marked(&selector, timeout).await,
            None => Err(Error::NotFound(format!("clickable element {} is gone", index))),
        }
    }

    async fn expect_download(&self) -> Result<()> {
        self.page.execute(ARM_DOWNLOAD_JS).await?;
        Ok(())
    }

    async fn wait_for_download(&self, timeout: Duration) -> Result<EokaDownload> {
        let deadline = Instant::now() + timeout;
        let link = loop {
            let captured: Option<CapturedLink> = self.page.evaluate(READ_DOWNLOAD_JS).await?;
            if let Some(link) = captured {
                break link;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "download timeout: no download started within {}ms",
                    timeout.as_millis()
                )));
            }
            self.page.wait(POLL_MS).await;
        };

        debug!("download captured: {}", link.href);
        let cookies: String = self.page.evaluate("document.cookie").await?;
        let referer = self.page.url().await?;
        let mut request = self
            .http
            .get(&link.href)
            .header(reqwest::header::REFERER, referer)
            .timeout(timeout);
        if !cookies.is_empty() {
            request = request.header(reqwest::header::COOKIE, cookies);
        }
        let response = request.send().await?.error_for_status()?;

        let suggested = filename_from_headers(response.headers())
            .or_else(|| link.filename.as_deref().and_then(sanitize))
            .or_else(|| filename_from_url(response.url().as_str()));
        Ok(EokaDownload {
            response,
            suggested,
        })
    }
}

/// A download fetched with the page's cookies.
pub struct EokaDownload {
    response: reqwest::Response,
    suggested: Option<String>,
}

#[async_trait]
impl Download for EokaDownload {
    fn suggested_filename(&self) -> Option<&str> {
        self.suggested.as_deref()
    }

    async fn save_as(self, dest: &Path) -> Result<u64> {
        write_stream(self.response, dest).await
    }
}

async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<()>
where
    F: Future<Output = eoka::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map(|_| ()).map_err(Error::from),
        Err(_) => Err(Error::Timeout(format!(
            "{} did not finish within {}ms",
            what,
            timeout.as_millis()
        ))),
    }
}

fn millis(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
