pub mod download;
mod executor;
pub mod resolver;
pub mod session;

use crate::config::{FeedGuide, GuideStep, RunnerConfig};
use crate::driver::{EokaLauncher, LaunchOptions, Launcher};
use crate::{Error, Result};
use download::DownloadCoordinator;
use executor::{PageSet, StepContext};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use session::{Lifecycle, SessionManager};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub use executor::Outcome;

/// Result of running a feed guide.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunResult {
    pub feed_name: String,
    /// One entry per step attempted, in order.
    pub steps: Vec<StepResult>,
    /// Saved files, in completion order.
    pub downloads: Vec<PathBuf>,
}

impl RunResult {
    fn new(feed_name: &str) -> Self {
        Self {
            feed_name: feed_name.to_string(),
            steps: Vec::new(),
            downloads: Vec::new(),
        }
    }

    /// Number of steps that failed (including continued-past ones).
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_error()).count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
}

/// What happened to one step.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepResult {
    /// 1-based position in the guide.
    #[serde(rename = "step")]
    pub index: usize,
    pub action: String,
    pub raw: Value,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl StepResult {
    fn record(index: usize, entry: &GuideStep, outcome: &Result<Outcome>) -> Self {
        let mut result = Self {
            index,
            action: entry.action.clone(),
            raw: entry.raw.clone(),
            status: StepStatus::Ok,
            info: None,
            error: None,
            file: None,
        };
        match outcome {
            Ok(o) => {
                result.info = Some(o.info.clone());
                result.file = o.file.clone();
            }
            Err(e) => {
                result.status = StepStatus::Error;
                result.error = Some(e.to_string());
            }
        }
        result
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// Executes feed guides.
pub struct Runner<L: Launcher = EokaLauncher> {
    session: SessionManager<L>,
    ctx: StepContext,
}

impl Runner<EokaLauncher> {
    /// Create a runner backed by a real browser.
    pub async fn new(config: &RunnerConfig) -> Result<Self> {
        Self::with_launcher(config, EokaLauncher::default()).await
    }
}

impl<L: Launcher> Runner<L> {
    /// Create a runner with a custom launcher.
    ///
    /// With `reuse_browser` set, the browser is launched here and kept until
    /// [`close`](Self::close).
    pub async fn with_launcher(config: &RunnerConfig, launcher: L) -> Result<Self> {
        let download_dir = config.prepare_download_dir()?;
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;

        let options = LaunchOptions {
            headless: config.headless,
            browser_name: config.browser_name.clone(),
        };
        let lifecycle = if config.reuse_browser {
            Lifecycle::Reusable
        } else {
            Lifecycle::Ephemeral
        };
        let session = SessionManager::start(launcher, options, lifecycle).await?;

        Ok(Self {
            session,
            ctx: StepContext {
                timeout: config.step_timeout(),
                downloads: DownloadCoordinator::new(download_dir, http),
            },
        })
    }

    /// Directory downloads are saved into.
    pub fn download_dir(&self) -> &std::path::Path {
        self.ctx.downloads.dir()
    }

    /// Run a guide.
    ///
    /// Returns the full result when every step succeeded or was allowed to
    /// fail. A failing step without `continue_on_error`, or any configuration
    /// error, stops the run with [`Error::Aborted`] carrying the partial result.
    /// The session is released either way, also when a step panics; a dropped
    /// run leaves its pages for the session to close on its next call.
    pub async fn run(&mut self, guide: &FeedGuide) -> Result<RunResult> {
        info!("running feed guide: {}", guide.feed_name);
        let page = match self.session.acquire_page().await {
            Ok((page, _)) => page,
            Err(e) => {
                self.session.release(Vec::new()).await;
                return Err(e);
            }
        };
        let mut lease = self.session.lease(page);

        let outcome = AssertUnwindSafe(self.run_steps(guide, lease.pages_mut()))
            .catch_unwind()
            .await;

        self.session.release(lease.into_pages()).await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_steps(
        &self,
        guide: &FeedGuide,
        pages: &mut PageSet<<L::Engine as crate::driver::Engine>::Page>,
    ) -> Result<RunResult> {
        let engine = self.session.engine()?;
        let mut result = RunResult::new(&guide.feed_name);

        for (i, entry) in guide.steps.iter().enumerate() {
            let index = i + 1;
            debug!("executing step {}: {}", index, entry.step.name());

            let outcome = executor::execute(engine, pages, &entry.step, &self.ctx).await;
            let record = StepResult::record(index, entry, &outcome);
            if let Some(ref file) = record.file {
                result.downloads.push(file.clone());
            }
            result.steps.push(record);

            let Err(e) = outcome else { continue };
            if entry.continue_on_error && !e.is_config() {
                warn!("step {} ({}) failed, continuing: {}", index, entry.step.name(), e);
                continue;
            }
            warn!("step {} ({}) failed, aborting: {}", index, entry.step.name(), e);
            return Err(Error::Aborted {
                feed_name: guide.feed_name.clone(),
                step: index,
                message: e.to_string(),
                partial: Box::new(result),
            });
        }

        info!(
            "feed guide {} completed: {} steps, {} downloads",
            guide.feed_name,
            result.steps.len(),
            result.downloads.len()
        );
        Ok(result)
    }

    /// Shut the browser down. Needed for a reusable runner; harmless otherwise.
    pub async fn close(self) {
        self.session.close().await;
    }
}
