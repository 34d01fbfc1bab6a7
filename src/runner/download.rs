//! Download coordination: direct URL fetches and browser-triggered downloads
//! end up as one saved file in the download directory.

use super::resolver;
use crate::config::{DownloadStep, Target};
use crate::driver::{Download, PageDriver};
use crate::{Error, Result};
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Name used when neither the step nor the source names the file.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// Saves downloads into one directory.
#[derive(Debug, Clone)]
pub struct DownloadCoordinator {
    dir: PathBuf,
    http: reqwest::Client,
}

impl DownloadCoordinator {
    pub fn new(dir: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            http,
        }
    }

    /// Directory files are saved into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run a download step and return the saved path.
    ///
    /// A `url` is fetched directly; otherwise the selector or text is clicked
    /// and the download the browser starts is captured.
    pub async fn download<P: PageDriver>(
        &self,
        page: &P,
        step: &DownloadStep,
        timeout: Duration,
    ) -> Result<PathBuf> {
        // An empty save_as means "no name given".
        let save_as = step.save_as.as_deref().filter(|name| !name.is_empty());
        if let Some(ref url) = step.url {
            return self.fetch(url, save_as).await;
        }
        if step.target.selector.is_none() && step.target.text.is_none() {
            return Err(Error::Config("download needs selector/text/url".into()));
        }
        self.capture(page, &step.target, save_as, timeout).await
    }

    /// Stream `url` straight to disk.
    pub async fn fetch(&self, url: &str, save_as: Option<&str>) -> Result<PathBuf> {
        // Validate the destination before touching the network.
        let name = save_as
            .map(str::to_string)
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        let dest = self.destination(&name)?;

        info!("fetching {} -> {}", url, dest.display());
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = write_stream(response, &dest).await?;
        debug!("saved {} bytes to {}", bytes, dest.display());
        Ok(dest)
    }

    /// Click `target` and save the download it triggers.
    pub async fn capture<P: PageDriver>(
        &self,
        page: &P,
        target: &Target,
        save_as: Option<&str>,
        timeout: Duration,
    ) -> Result<PathBuf> {
        // Reject a bad save_as before clicking anything.
        if let Some(name) = save_as {
            self.destination(name)?;
        }

        page.expect_download().await?;
        match (&target.selector, &target.text) {
            (Some(selector), _) => page.click(selector, timeout).await?,
            (None, Some(text)) => {
                resolver::resolve_by_text(page, text, timeout)
                    .await
                    .into_result()?;
            }
            (None, None) => {
                return Err(Error::Config("download needs selector/text/url".into()));
            }
        }

        let download = page.wait_for_download(timeout).await?;
        let name = resolve_filename(save_as, download.suggested_filename());
        let dest = self.destination(&name)?;
        info!("download via {} -> {}", target, dest.display());
        let bytes = download.save_as(&dest).await?;
        debug!("saved {} bytes to {}", bytes, dest.display());
        Ok(dest)
    }

    /// Path for `name` inside the download directory.
    fn destination(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let mut components = relative.components();
        let plain = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !plain {
            return Err(Error::Config(format!(
                "save_as '{}' must be a file name inside the download directory",
                name
            )));
        }
        Ok(self.dir.join(relative))
    }
}

/// Pick the saved name: explicit `save_as`, then the suggested name, then the fallback.
pub fn resolve_filename(save_as: Option<&str>, suggested: Option<&str>) -> String {
    save_as
        .filter(|s| !s.is_empty())
        .or(suggested.filter(|s| !s.is_empty()))
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

/// Last non-empty path segment of a URL.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// File name from a `Content-Disposition` header, if any.
pub fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    content_disposition_filename(value)
}

fn content_disposition_filename(value: &str) -> Option<String> {
    static EXTENDED: OnceLock<Regex> = OnceLock::new();
    static PLAIN: OnceLock<Regex> = OnceLock::new();

    // RFC 5987 form: filename*=UTF-8''name%20here.csv
    let extended = EXTENDED.get_or_init(|| {
        Regex::new(r#"(?i)filename\*\s*=\s*[^']*'[^']*'([^;]+)"#).expect("valid regex")
    });
    if let Some(caps) = extended.captures(value) {
        let encoded = caps[1].trim().trim_matches('"');
        let decoded = url::form_urlencoded::parse(format!("n={}", encoded).as_bytes())
            .next()
            .map(|(_, v)| v.into_owned());
        if let Some(name) = decoded.and_then(|n| sanitize(&n)) {
            return Some(name);
        }
    }

    let plain = PLAIN.get_or_init(|| {
        Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("valid regex")
    });
    let caps = plain.captures(value)?;
    let name = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    sanitize(name)
}

/// Strip any directory part a server or link tries to smuggle in.
pub(crate) fn sanitize(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Write a response body to `dest` chunk by chunk.
pub async fn write_stream(response: reqwest::Response, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
