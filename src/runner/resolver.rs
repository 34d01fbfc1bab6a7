//! Find-and-click by visible text.
//!
//! Two strategies run in order: a loose text match over the whole document,
//! then a scan of links and buttons comparing their inner text.

use crate::driver::PageDriver;
use crate::{Error, Result};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Which strategy produced a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Loose text match anywhere in the document.
    Text,
    /// Scan of `a`, `button` and ARIA link/button elements.
    Fallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Outcome of a find-and-click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub found: bool,
    pub description: String,
    /// Set when `found`.
    pub strategy: Option<Strategy>,
}

impl Resolution {
    /// Turn a miss into [`Error::NotFound`], keeping the description on a hit.
    pub fn into_result(self) -> Result<String> {
        if self.found {
            Ok(self.description)
        } else {
            Err(Error::NotFound(self.description))
        }
    }
}

/// Click the element best matching `text`.
pub async fn resolve_by_text<P: PageDriver>(
    page: &P,
    text: &str,
    timeout: Duration,
) -> Resolution {
    match click_loose_match(page, text, timeout).await {
        Ok(()) => {
            return Resolution {
                found: true,
                description: format!("Clicked by text='{}'", text),
                strategy: Some(Strategy::Text),
            }
        }
        Err(e) => debug!("text strategy missed '{}': {}", text, e),
    }

    match click_clickable_scan(page, text, timeout).await {
        Ok(Some(inner)) => Resolution {
            found: true,
            description: format!("Clicked fallback element with text='{}'", inner),
            strategy: Some(Strategy::Fallback),
        },
        Ok(None) => not_found(text),
        Err(e) => {
            debug!("fallback strategy failed for '{}': {}", text, e);
            not_found(text)
        }
    }
}

fn not_found(text: &str) -> Resolution {
    Resolution {
        found: false,
        description: format!("Element with text '{}' not found", text),
        strategy: None,
    }
}

/// Primary strategy.
pub async fn click_loose_match<P: PageDriver>(
    page: &P,
    text: &str,
    timeout: Duration,
) -> Result<()> {
    page.click_text(text, timeout).await
}

/// Fallback strategy. Returns the inner text of the element clicked, if any.
///
/// Candidates with empty text are skipped; a candidate whose click fails is
/// passed over for the next one.
pub async fn click_clickable_scan<P: PageDriver>(
    page: &P,
    text: &str,
    timeout: Duration,
) -> Result<Option<String>> {
    let needle = text.to_lowercase();
    let candidates = page.clickable_texts().await?;

    for (index, inner) in candidates.iter().enumerate() {
        let inner = inner.trim();
        if inner.is_empty() || !inner.to_lowercase().contains(&needle) {
            continue;
        }
        match page.click_clickable(index, timeout).await {
            Ok(()) => return Ok(Some(inner.to_string())),
            Err(e) => debug!("fallback candidate {} ('{}') not clickable: {}", index, inner, e),
        }
    }
    Ok(None)
}
