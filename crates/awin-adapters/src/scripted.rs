//! In-memory [`BrowserPage`] that serves canned HTML per URL. Lets the whole
//! crawl run in tests without a browser or network.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use scraper::Html;

use crate::browser::{BrowserPage, ClickStrategy, ClickTarget};
use crate::{selector, PageError};

#[derive(Debug, Clone)]
struct ScriptedPanel {
    activates_with: Option<ClickStrategy>,
    active_html: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    pages: HashMap<String, String>,
    panels: HashMap<String, ScriptedPanel>,
    failing: HashSet<String>,
    current: Option<String>,
    panel_active: bool,
    visits: Vec<String>,
    clicks: Vec<ClickStrategy>,
}

#[derive(Debug, Default)]
pub struct ScriptedPage {
    state: Mutex<ScriptState>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.set_page(url, html);
        self
    }

    /// After a click using `activates_with`, the page at `url` renders `active_html`.
    /// `None` means no strategy ever activates the panel.
    pub fn with_panel(
        self,
        url: impl Into<String>,
        activates_with: Option<ClickStrategy>,
        active_html: impl Into<String>,
    ) -> Self {
        self.lock().panels.insert(
            url.into(),
            ScriptedPanel {
                activates_with,
                active_html: active_html.into(),
            },
        );
        self
    }

    pub fn failing(self, url: impl Into<String>) -> Self {
        self.lock().failing.insert(url.into());
        self
    }

    /// Replace what a URL serves, e.g. a page that now renders its content.
    pub fn set_page(&self, url: impl Into<String>, html: impl Into<String>) {
        let url = url.into();
        let mut state = self.lock();
        state.failing.remove(&url);
        state.pages.insert(url, html.into());
    }

    pub fn visits(&self) -> Vec<String> {
        self.lock().visits.clone()
    }

    pub fn clicks(&self) -> Vec<ClickStrategy> {
        self.lock().clicks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_html(state: &ScriptState) -> Result<String, PageError> {
        let url = state
            .current
            .as_ref()
            .ok_or_else(|| PageError::Script("no page loaded".to_string()))?;
        if state.panel_active {
            if let Some(panel) = state.panels.get(url) {
                return Ok(panel.active_html.clone());
            }
        }
        state
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| PageError::Script(format!("no content for {url}")))
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str) -> Result<(), PageError> {
        let mut state = self.lock();
        state.visits.push(url.to_string());
        if state.failing.contains(url) || !state.pages.contains_key(url) {
            return Err(PageError::Navigation {
                url: url.to_string(),
                message: "net::ERR_FAILED".to_string(),
            });
        }
        state.current = Some(url.to_string());
        state.panel_active = false;
        Ok(())
    }

    async fn content(&self) -> Result<String, PageError> {
        Self::current_html(&self.lock())
    }

    async fn scroll_height(&self) -> Result<i64, PageError> {
        Ok(Self::current_html(&self.lock())?.len() as i64)
    }

    async fn scroll_to_bottom(&self) -> Result<(), PageError> {
        Ok(())
    }

    async fn click(
        &self,
        target: &ClickTarget,
        strategy: ClickStrategy,
    ) -> Result<bool, PageError> {
        let mut state = self.lock();
        state.clicks.push(strategy);
        let html = Self::current_html(&state)?;
        let sel = selector(&target.selector)?;
        if Html::parse_document(&html).select(&sel).next().is_none() {
            return Ok(false);
        }
        let activates = state
            .current
            .as_ref()
            .and_then(|url| state.panels.get(url))
            .is_some_and(|panel| panel.activates_with == Some(strategy));
        if activates {
            state.panel_active = true;
        }
        Ok(true)
    }

    async fn attribute(&self, css: &str, name: &str) -> Result<Option<String>, PageError> {
        let html = Self::current_html(&self.lock())?;
        let sel = selector(css)?;
        let document = Html::parse_document(&html);
        Ok(document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr(name))
            .map(ToString::to_string))
    }
}
