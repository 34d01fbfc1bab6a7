use super::executor::PageSet;
use crate::driver::{Engine, LaunchOptions, Launcher};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type Parked<P> = Arc<Mutex<VecDeque<P>>>;

/// How long an engine lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Fresh engine per run, torn down when the run ends.
    Ephemeral,
    /// One engine for the manager's lifetime; runs only open and close pages.
    Reusable,
}

/// Owns the engine and hands out pages.
pub struct SessionManager<L: Launcher> {
    launcher: L,
    options: LaunchOptions,
    lifecycle: Lifecycle,
    engine: Option<L::Engine>,
    /// Pages of runs that never reached release.
    parked: Parked<<L::Engine as Engine>::Page>,
}

impl<L: Launcher> SessionManager<L> {
    /// Create a manager. A reusable manager launches its engine right away.
    pub async fn start(launcher: L, options: LaunchOptions, lifecycle: Lifecycle) -> Result<Self> {
        let mut manager = Self {
            launcher,
            options,
            lifecycle,
            engine: None,
            parked: Arc::default(),
        };
        if lifecycle == Lifecycle::Reusable {
            manager.ensure_engine().await?;
        }
        Ok(manager)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Open a page for a run, launching the engine if none is alive.
    /// The flag is true when the page was created by this call.
    pub async fn acquire_page(&mut self) -> Result<(<L::Engine as Engine>::Page, bool)> {
        self.ensure_engine().await?;
        self.close_parked().await;
        let page = self.engine()?.new_page().await?;
        Ok((page, true))
    }

    /// Lend a run's first page out. See [`PageLease`].
    pub(crate) fn lease(
        &self,
        page: <L::Engine as Engine>::Page,
    ) -> PageLease<<L::Engine as Engine>::Page> {
        PageLease {
            pages: Some(PageSet::new(page)),
            parked: self.parked.clone(),
        }
    }

    /// The live engine.
    pub fn engine(&self) -> Result<&L::Engine> {
        self.engine
            .as_ref()
            .ok_or_else(|| Error::Launch("browser is not running".into()))
    }

    /// Close a run's pages; an ephemeral manager also shuts its engine down.
    /// Failures are logged, never returned: release must not mask the run's outcome.
    ///
    /// Pages are parked first and closed one at a time, so a release that is
    /// itself cancelled leaves the rest for the next call.
    pub async fn release(&mut self, pages: Vec<<L::Engine as Engine>::Page>) {
        lock(&self.parked).extend(pages);
        self.close_parked().await;
        if self.lifecycle == Lifecycle::Ephemeral {
            self.shutdown().await;
        }
    }

    /// Shut the engine down, whatever the lifecycle.
    pub async fn close(mut self) {
        self.close_parked().await;
        self.shutdown().await;
    }

    async fn close_parked(&self) {
        let Some(engine) = self.engine.as_ref() else {
            lock(&self.parked).clear();
            return;
        };
        loop {
            let next = lock(&self.parked).pop_front();
            let Some(page) = next else { break };
            if let Err(e) = engine.close_page(page).await {
                warn!("failed to close page: {}", e);
            }
        }
    }

    async fn ensure_engine(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        info!(
            "launching {} (headless: {})",
            self.options.browser_name, self.options.headless
        );
        let engine = self.launcher.launch(&self.options).await?;
        self.engine = Some(engine);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            debug!("closing browser");
            if let Err(e) = engine.close().await {
                warn!("failed to close browser: {}", e);
            }
        }
    }
}

/// Pages lent to one run.
///
/// Dropping a lease that was never returned (the run was cancelled) parks its
/// pages with the session; the next acquire, release or close closes them.
pub(crate) struct PageLease<P> {
    pages: Option<PageSet<P>>,
    parked: Parked<P>,
}

impl<P> PageLease<P> {
    pub fn pages_mut(&mut self) -> &mut PageSet<P> {
        match self.pages.as_mut() {
            Some(pages) => pages,
            None => unreachable!("pages are only taken by into_pages"),
        }
    }

    /// Hand the pages back for release.
    pub fn into_pages(mut self) -> Vec<P> {
        self.pages.take().map(PageSet::into_pages).unwrap_or_default()
    }
}

impl<P> Drop for PageLease<P> {
    fn drop(&mut self) {
        if let Some(pages) = self.pages.take() {
            debug!("run dropped before release, parking its pages");
            lock(&self.parked).extend(pages.into_pages());
        }
    }
}

fn lock<P>(parked: &Mutex<VecDeque<P>>) -> MutexGuard<'_, VecDeque<P>> {
    parked.lock().unwrap_or_else(PoisonError::into_inner)
}
