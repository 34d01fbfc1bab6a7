use super::download::DownloadCoordinator;
use super::resolver;
use crate::config::{Step, Target};
use crate::driver::{Engine, PageDriver};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Pages opened during one run. Only `click_new_page` moves `current`.
pub struct PageSet<P> {
    current: P,
    superseded: Vec<P>,
}

impl<P> PageSet<P> {
    pub fn new(page: P) -> Self {
        Self {
            current: page,
            superseded: Vec::new(),
        }
    }

    /// Page subsequent steps act on.
    pub fn current(&self) -> &P {
        &self.current
    }

    /// Follow a newly opened page. The old one stays open until release.
    pub fn switch_to(&mut self, page: P) {
        let old = std::mem::replace(&mut self.current, page);
        self.superseded.push(old);
    }

    /// Every page, current last.
    pub fn into_pages(self) -> Vec<P> {
        let mut pages = self.superseded;
        pages.push(self.current);
        pages
    }
}

/// What a step runs with.
pub struct StepContext {
    pub timeout: Duration,
    pub downloads: DownloadCoordinator,
}

/// What a successful step reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub info: String,
    pub file: Option<PathBuf>,
}

impl Outcome {
    fn info(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            file: None,
        }
    }
}

/// Execute one step against the current page.
pub async fn execute<E: Engine>(
    engine: &E,
    pages: &mut PageSet<E::Page>,
    step: &Step,
    ctx: &StepContext,
) -> Result<Outcome> {
    let timeout = ctx.timeout;
    match step {
        Step::Goto(s) => {
            let url = required(&s.url, "goto requires url")?;
            info!("goto: {}", url);
            pages.current().goto(url, timeout).await?;
            Ok(Outcome::info(format!("Navigated to {}", url)))
        }
        Step::Wait(s) => {
            let delay = Duration::try_from_secs_f64(s.seconds).map_err(|_| {
                Error::Config(format!(
                    "wait seconds must be a finite, non-negative number in range, got {}",
                    s.seconds
                ))
            })?;
            debug!("wait: {}s", s.seconds);
            tokio::time::sleep(delay).await;
            Ok(Outcome::info(format!("Waited {}s", s.seconds)))
        }
        Step::WaitForSelector(s) => {
            let selector = required(&s.selector, "wait_for_selector requires selector")?;
            debug!("wait_for_selector: {}", selector);
            pages.current().wait_for_selector(selector, timeout).await?;
            Ok(Outcome::info(format!("Selector ready: {}", selector)))
        }
        Step::Fill(s) => {
            let selector = required(&s.selector, "fill requires selector")?;
            info!("fill: {}", selector);
            pages.current().fill(selector, &s.value, timeout).await?;
            Ok(Outcome::info(format!("Filled {}", selector)))
        }
        Step::Click(target) => {
            info!("click: {}", target);
            let info = click_target(pages.current(), target, timeout, "click").await?;
            Ok(Outcome::info(info))
        }
        Step::ClickNewPage(target) => {
            info!("click_new_page: {}", target);
            let known = engine.open_page_ids().await?;
            click_target(pages.current(), target, timeout, "click_new_page").await?;
            let page = engine.wait_for_new_page(&known, timeout).await?;
            page.wait_for_load(timeout).await?;
            pages.switch_to(page);
            let via = if target.selector.is_some() {
                "selector"
            } else {
                "text"
            };
            Ok(Outcome::info(format!("Opened new page via {}", via)))
        }
        Step::Download(s) => {
            let path = ctx.downloads.download(pages.current(), s, timeout).await?;
            Ok(Outcome {
                info: format!("Downloaded {}", path.display()),
                file: Some(path),
            })
        }
        Step::Unknown(name) => Err(Error::UnknownAction(name.clone())),
        Step::Malformed { action, reason } => {
            Err(Error::Config(format!("invalid {} step: {}", action, reason)))
        }
    }
}

/// Click by selector, or by text through the resolver.
async fn click_target<P: PageDriver>(
    page: &P,
    target: &Target,
    timeout: Duration,
    action: &str,
) -> Result<String> {
    match (&target.selector, &target.text) {
        (Some(selector), _) => {
            page.click(selector, timeout).await?;
            Ok(format!("Clicked selector: {}", selector))
        }
        (None, Some(text)) => {
            let resolution = resolver::resolve_by_text(page, text, timeout).await;
            if let Some(strategy) = resolution.strategy {
                debug!("resolved '{}' with {} strategy", text, strategy);
            }
            resolution.into_result()
        }
        (None, None) => Err(Error::Config(format!(
            "{} requires selector or text",
            action
        ))),
    }
}

fn required<'a>(field: &'a Option<String>, message: &str) -> Result<&'a str> {
    field
        .as_deref()
        .ok_or_else(|| Error::Config(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_set_switch() {
        let mut pages = PageSet::new("first");
        assert_eq!(*pages.current(), "first");
        pages.switch_to("second");
        pages.switch_to("third");
        assert_eq!(*pages.current(), "third");
        assert_eq!(pages.into_pages(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_required_field() {
        let missing: Option<String> = None;
        let err = required(&missing, "goto requires url").unwrap_err();
        assert!(err.is_config());
        assert_eq!(required(&Some("x".into()), "unused").unwrap(), "x");
    }
}
