//! Site adapter for the campaign catalog: browser seam, session handling,
//! listing pagination and detail-page extraction.

use std::time::Duration;

use thiserror::Error;

pub mod browser;
pub mod detail;
pub mod listing;
pub mod panel;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
pub mod session;

pub use browser::{navigate, BrowserPage, ClickStrategy, ClickTarget};
pub use detail::{
    is_content_image, parse_award_entries, parse_detail_html, scrape_detail, DetailOptions,
};
pub use listing::{
    build_listing_url, discover_total_pages, festival_slug, fetch_page, max_page_index,
    page_url_for, parse_listing_page, scroll_until_stable, ListingContext, ListingFetchOptions,
    ListingFilters, ListingPage, ScrollPolicy, WaitPolicy, DEFAULT_LISTING_BASE,
};
pub use panel::{activate_panel, PanelActivation, PanelPolicy};
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedPage;
pub use session::{
    acquire_session, ensure_authenticated, looks_logged_out, Session, SessionError, SessionOptions, DEFAULT_HOME_URL, DEFAULT_USER_AGENT,
};

pub const CRATE_NAME: &str = "awin-adapters";

/// Site root used when a relative link has to be made absolute.
pub const SITE_ORIGIN: &str = "https://www.lovethework.com";

/// Transient failure scoped to one listing page or one entity. The caller
/// records it and moves on to the next unit of work.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("timed out after {after:?} loading {url}")]
    Timeout { url: String, after: Duration },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("page script failed: {0}")]
    Script(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Resolve `href` against the site origin; protocol-relative links get https.
pub fn absolutize(href: &str) -> String {
    let href = href.trim();
    if href.starts_with("//") {
        return format!("https:{href}");
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(SITE_ORIGIN).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn selector(css: &str) -> Result<scraper::Selector, PageError> {
    scraper::Selector::parse(css).map_err(|e| PageError::Parse(format!("{css}: {e}")))
}
