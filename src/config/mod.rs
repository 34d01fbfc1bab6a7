pub mod guide;
pub mod settings;

pub use guide::{
    DownloadStep, FeedGuide, FillStep, GotoStep, GuideStep, Step, Target, WaitForSelectorStep,
    WaitStep,
};
pub use settings::RunnerConfig;
