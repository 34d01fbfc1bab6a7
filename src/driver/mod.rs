//! Browser driver seam.
//!
//! The runner only talks to a browser through these traits. [`eoka`] backs them
//! in production; tests plug in a scripted driver.

pub mod eoka;

use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub use self::eoka::{EokaDownload, EokaEngine, EokaLauncher, EokaPage};

/// Options an engine is launched with.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub browser_name: String,
}

/// Starts automation engines.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Engine: Engine;

    /// Launch an engine with one browsing context, downloads intercepted.
    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Engine>;
}

/// A running engine and its browsing context.
#[async_trait]
pub trait Engine: Send + Sync {
    type Page: PageDriver;

    /// Open a blank page in the context.
    async fn new_page(&self) -> Result<Self::Page>;

    /// Ids of every page currently open in the context.
    async fn open_page_ids(&self) -> Result<Vec<String>>;

    /// Wait for a page whose id is not in `known` and take control of it.
    async fn wait_for_new_page(&self, known: &[String], timeout: Duration) -> Result<Self::Page>;

    /// Close one page.
    async fn close_page(&self, page: Self::Page) -> Result<()>;

    /// Shut the engine down.
    async fn close(self) -> Result<()>;
}

/// One page (tab) the runner can act on.
#[async_trait]
pub trait PageDriver: Send + Sync {
    type Download: Download;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Click the first element matching a CSS selector.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Wait until the document has finished loading.
    async fn wait_for_load(&self, timeout: Duration) -> Result<()>;

    /// Click the first element, in document order, whose visible text loosely
    /// contains `text` (case-insensitive, whitespace-normalized).
    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Inner text of every `a`, `button`, `[role=link]` and `[role=button]`, in document order.
    async fn clickable_texts(&self) -> Result<Vec<String>>;

    /// Click the `index`-th element of the [`clickable_texts`](Self::clickable_texts) enumeration.
    async fn click_clickable(&self, index: usize, timeout: Duration) -> Result<()>;

    /// Start observing the page for a download.
    async fn expect_download(&self) -> Result<()>;

    /// Wait for the download armed by [`expect_download`](Self::expect_download).
    async fn wait_for_download(&self, timeout: Duration) -> Result<Self::Download>;
}

/// A download the browser started.
#[async_trait]
pub trait Download: Send {
    /// File name proposed by the server or the link.
    fn suggested_filename(&self) -> Option<&str>;

    /// Write the file to `dest`, returning the number of bytes written.
    async fn save_as(self, dest: &Path) -> Result<u64>;
}
