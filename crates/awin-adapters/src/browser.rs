//! The seam between the crawl logic and a live browser tab.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info_span, Instrument};

use crate::PageError;

/// Ways of activating a control, tried in this order by the panel dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickStrategy {
    /// Plain click on the element matched by the selector.
    Direct,
    /// Click the first element with the target's ARIA role whose text contains its label.
    ByRole,
    /// Click the first child element of the matched element.
    Descendant,
    /// Dispatch pointer and mouse events from script.
    SyntheticEvents,
}

impl ClickStrategy {
    pub const ORDER: [ClickStrategy; 4] = [
        ClickStrategy::Direct,
        ClickStrategy::ByRole,
        ClickStrategy::Descendant,
        ClickStrategy::SyntheticEvents,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClickStrategy::Direct => "direct",
            ClickStrategy::ByRole => "by_role",
            ClickStrategy::Descendant => "descendant",
            ClickStrategy::SyntheticEvents => "synthetic_events",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickTarget {
    pub selector: String,
    pub role: String,
    pub label: String,
}

/// One browser tab, used sequentially. Implemented by the chromiumoxide
/// [`crate::Session`] and by the scripted page in tests.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Load `url` and wait for the document to be ready.
    async fn goto(&self, url: &str) -> Result<(), PageError>;

    async fn content(&self) -> Result<String, PageError>;

    async fn scroll_height(&self) -> Result<i64, PageError>;

    async fn scroll_to_bottom(&self) -> Result<(), PageError>;

    /// `Ok(false)` when nothing matched the target for this strategy.
    async fn click(&self, target: &ClickTarget, strategy: ClickStrategy)
        -> Result<bool, PageError>;

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, PageError>;
}

/// Navigate with a hard per-navigation timeout.
pub async fn navigate<P>(page: &P, url: &str, timeout: Duration) -> Result<(), PageError>
where
    P: BrowserPage + ?Sized,
{
    let span = info_span!("navigate", url);
    match tokio::time::timeout(timeout, page.goto(url)).instrument(span).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout {
            url: url.to_string(),
            after: timeout,
        }),
    }
}
