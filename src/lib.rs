//! # feedguide
//!
//! Runs feed guides: declarative lists of browser steps that navigate a data
//! provider's site and download the files it publishes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use feedguide::{FeedGuide, Runner, RunnerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> feedguide::Result<()> {
//! let guide = FeedGuide::load("philly_fed.yaml")?;
//! let mut runner = Runner::new(&RunnerConfig::from_env()?).await?;
//! let result = runner.run(&guide).await?;
//! println!("Downloaded: {:?}", result.downloads);
//! # Ok(())
//! # }
//! ```

mod config;
pub mod driver;
mod runner;

pub use config::{
    DownloadStep, FeedGuide, FillStep, GotoStep, GuideStep, RunnerConfig, Step, Target,
    WaitForSelectorStep, WaitStep,
};
pub use runner::download::{self, DownloadCoordinator};
pub use runner::resolver::{self, Resolution, Strategy};
pub use runner::session::{Lifecycle, SessionManager};
pub use runner::{Outcome, RunResult, Runner, StepResult, StepStatus};

/// Result type for feedguide operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or running a feed guide.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A step or option is missing something it needs. Always aborts a run.
    #[error("config error: {0}")]
    Config(String),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A step failed without `continue_on_error`. `partial` holds every step
    /// result up to and including the failing one.
    #[error("feed guide '{feed_name}' aborted at step {step}: {message}")]
    Aborted {
        feed_name: String,
        step: usize,
        message: String,
        partial: Box<RunResult>,
    },
}

impl Error {
    /// Whether this is a configuration error, which no step flag can skip.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// The partial result of an aborted run.
    pub fn partial_result(&self) -> Option<&RunResult> {
        match self {
            Self::Aborted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
