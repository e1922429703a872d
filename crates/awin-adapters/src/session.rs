//! Authenticated browser session backed by chromiumoxide.
//!
//! Login is never automated. The operator logs in by hand and saves the
//! browser's storage state (cookies plus per-origin localStorage) to a JSON
//! file; every run replays that state into a fresh, isolated browser.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use scraper::Html;
use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::{navigate, BrowserPage, ClickStrategy, ClickTarget};
use crate::{selector, PageError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const DEFAULT_HOME_URL: &str = "https://www.lovethework.com/en";

/// Fatal for a run: the crawl cannot proceed without a usable session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "no saved browser session at {path}: log in manually in a browser, save its storage \
         state to {path}, then re-run"
    )]
    MissingArtifact { path: String },
    #[error("saved browser session at {path} is unreadable: {message}")]
    InvalidArtifact { path: String, message: String },
    #[error(
        "saved browser session has expired (login prompt at {url}): log in manually again \
         and re-save the session state"
    )]
    Expired { url: String },
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser error: {0}")]
    Browser(String),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub user_agent: String,
    pub window: (u32, u32),
    pub home_url: String,
    pub auth_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window: (1280, 900),
            home_url: DEFAULT_HOME_URL.to_string(),
            auth_timeout: Duration::from_secs(60),
        }
    }
}

/// Saved browser storage state (`cookies[]`, `origins[].localStorage[]`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<StoredOrigin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredOrigin {
    pub origin: String,
    #[serde(default, rename = "localStorage")]
    pub local_storage: Vec<StoredEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredEntry {
    pub name: String,
    pub value: String,
}

pub async fn load_storage_state(path: &Path) -> Result<StorageState, SessionError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SessionError::MissingArtifact {
                path: path.display().to_string(),
            })
        }
        Err(err) => {
            return Err(SessionError::InvalidArtifact {
                path: path.display().to_string(),
                message: err.to_string(),
            })
        }
    };
    serde_json::from_str(&text).map_err(|err| SessionError::InvalidArtifact {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Script run before any page script that seeds localStorage for matching origins.
pub fn local_storage_script(state: &StorageState) -> Option<String> {
    let mut blocks = Vec::new();
    for origin in state.origins.iter().filter(|o| !o.local_storage.is_empty()) {
        let origin_literal = serde_json::to_string(&origin.origin).ok()?;
        let mut sets = Vec::new();
        for entry in &origin.local_storage {
            let key = serde_json::to_string(&entry.name).ok()?;
            let value = serde_json::to_string(&entry.value).ok()?;
            sets.push(format!("localStorage.setItem({key}, {value});"));
        }
        blocks.push(format!(
            "if (window.location.origin === {origin_literal}) {{ {} }}",
            sets.join(" ")
        ));
    }
    if blocks.is_empty() {
        return None;
    }
    Some(format!("(() => {{ try {{ {} }} catch (e) {{}} }})();", blocks.join(" ")))
}

/// Labels a logged-out header shows on its login control.
const LOGIN_LABELS: [&str; 2] = ["sign in", "log in"];

/// A login control on the home page means the saved cookies no longer
/// authenticate: a link to the login route, or a button labelled exactly
/// "Sign in" / "Log in". Body text mentioning those words does not count.
pub fn looks_logged_out(html: &str) -> Result<bool, PageError> {
    let document = Html::parse_document(html);
    let login_link = selector(r#"a[href*="login"]"#)?;
    if document.select(&login_link).next().is_some() {
        return Ok(true);
    }
    let buttons = selector("button, [role=\"button\"]")?;
    Ok(document.select(&buttons).any(|button| {
        let label = button.text().collect::<String>();
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        LOGIN_LABELS.contains(&label.as_str())
    }))
}

pub fn ensure_authenticated(html: &str, home_url: &str) -> Result<(), SessionError> {
    if looks_logged_out(html).map_err(browser_err)? {
        return Err(SessionError::Expired {
            url: home_url.to_string(),
        });
    }
    Ok(())
}

fn browser_err(err: impl std::fmt::Display) -> SessionError {
    SessionError::Browser(err.to_string())
}

fn script_err(err: impl std::fmt::Display) -> PageError {
    PageError::Script(err.to_string())
}

/// One isolated browser plus the single tab the crawl drives.
///
/// Call [`Session::close`] when done. If a session is dropped on an error path
/// the browser is closed from a spawned task instead.
pub struct Session {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    runtime: Handle,
}

/// Launch a browser and replay the saved session state into it.
pub async fn acquire_session(
    state_location: &Path,
    options: &SessionOptions,
) -> Result<Session, SessionError> {
    let state = load_storage_state(state_location).await?;

    let (width, height) = options.window;
    let mut builder = BrowserConfig::builder()
        .window_size(width, height)
        .viewport(Viewport {
            width,
            height,
            ..Viewport::default()
        });
    if !options.headless {
        builder = builder.with_head();
    }
    let config = builder.build().map_err(SessionError::Launch)?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|err| SessionError::Launch(err.to_string()))?;
    let handler = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        browser: Some(browser),
        page: None,
        handler,
        runtime: Handle::current(),
    };

    let page = match &session.browser {
        Some(browser) => browser.new_page("about:blank").await.map_err(browser_err)?,
        None => return Err(SessionError::Browser("browser already closed".to_string())),
    };
    page.set_user_agent(SetUserAgentOverrideParams::new(options.user_agent.clone()))
        .await
        .map_err(browser_err)?;

    let cookies: Vec<CookieParam> = state
        .cookies
        .iter()
        .map(|stored| {
            let mut cookie = CookieParam::new(stored.name.clone(), stored.value.clone());
            if !stored.domain.is_empty() {
                cookie.domain = Some(stored.domain.clone());
            }
            if !stored.path.is_empty() {
                cookie.path = Some(stored.path.clone());
            }
            cookie.secure = Some(stored.secure);
            cookie.http_only = Some(stored.http_only);
            cookie
        })
        .collect();
    if !cookies.is_empty() {
        page.set_cookies(cookies).await.map_err(browser_err)?;
    }
    if let Some(script) = local_storage_script(&state) {
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(browser_err)?;
    }

    info!(
        state = %state_location.display(),
        cookies = state.cookies.len(),
        origins = state.origins.len(),
        headless = options.headless,
        "browser session ready"
    );
    session.page = Some(page);
    Ok(session)
}

impl Session {
    fn page(&self) -> Result<&Page, PageError> {
        self.page
            .as_ref()
            .ok_or_else(|| PageError::Script("session page already closed".to_string()))
    }

    /// Load the home page and fail with [`SessionError::Expired`] if it shows
    /// a login control.
    pub async fn check_authenticated(&self, options: &SessionOptions) -> Result<(), SessionError> {
        navigate(self, &options.home_url, options.auth_timeout)
            .await
            .map_err(browser_err)?;
        let html = self.content().await.map_err(browser_err)?;
        ensure_authenticated(&html, &options.home_url)?;
        debug!(home_url = %options.home_url, "saved session is authenticated");
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), SessionError> {
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "page close failed");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            browser.close().await.map_err(browser_err)?;
            if let Err(err) = browser.wait().await {
                debug!(error = %err, "browser process wait failed");
            }
        }
        self.handler.abort();
        info!("browser session closed");
        Ok(())
    }

    async fn run_click_script(&self, script: String) -> Result<bool, PageError> {
        self.page()?
            .evaluate(script)
            .await
            .map_err(script_err)?
            .into_value::<bool>()
            .map_err(script_err)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let page = self.page.take();
        if let Some(mut browser) = self.browser.take() {
            self.runtime.spawn(async move {
                if let Some(page) = page {
                    let _ = page.close().await;
                }
                if let Err(err) = browser.close().await {
                    warn!(error = %err, "browser cleanup on drop failed");
                }
                let _ = browser.wait().await;
            });
        }
        self.handler.abort();
    }
}

fn js_string(value: &str) -> Result<String, PageError> {
    serde_json::to_string(value).map_err(script_err)
}

#[async_trait]
impl BrowserPage for Session {
    async fn goto(&self, url: &str) -> Result<(), PageError> {
        self.page()?
            .goto(url)
            .await
            .map_err(|err| PageError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn content(&self) -> Result<String, PageError> {
        self.page()?.content().await.map_err(script_err)
    }

    async fn scroll_height(&self) -> Result<i64, PageError> {
        self.page()?
            .evaluate("document.body ? document.body.scrollHeight : 0")
            .await
            .map_err(script_err)?
            .into_value::<i64>()
            .map_err(script_err)
    }

    async fn scroll_to_bottom(&self) -> Result<(), PageError> {
        self.page()?
            .evaluate("window.scrollTo(0, document.body ? document.body.scrollHeight : 0)")
            .await
            .map_err(script_err)?;
        Ok(())
    }

    async fn click(
        &self,
        target: &ClickTarget,
        strategy: ClickStrategy,
    ) -> Result<bool, PageError> {
        let selector = js_string(&target.selector)?;
        match strategy {
            ClickStrategy::Direct => match self.page()?.find_element(target.selector.as_str()).await {
                Ok(element) => {
                    element.click().await.map_err(script_err)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
            ClickStrategy::ByRole => {
                let role = js_string(&format!("[role=\"{}\"]", target.role))?;
                let label = js_string(&target.label.to_lowercase())?;
                self.run_click_script(format!(
                    "(() => {{ const el = Array.from(document.querySelectorAll({role})).find(e => \
                     (e.textContent || '').trim().toLowerCase().includes({label})); \
                     if (!el) return false; el.click(); return true; }})()"
                ))
                .await
            }
            ClickStrategy::Descendant => {
                self.run_click_script(format!(
                    "(() => {{ const root = document.querySelector({selector}); \
                     const el = root && (root.firstElementChild || root); \
                     if (!el) return false; el.click(); return true; }})()"
                ))
                .await
            }
            ClickStrategy::SyntheticEvents => {
                self.run_click_script(format!(
                    "(() => {{ const el = document.querySelector({selector}); if (!el) return false; \
                     for (const type of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {{ \
                     const Ctor = type.startsWith('pointer') && window.PointerEvent ? PointerEvent : MouseEvent; \
                     el.dispatchEvent(new Ctor(type, {{ bubbles: true, cancelable: true, view: window }})); }} \
                     return true; }})()"
                ))
                .await
            }
        }
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, PageError> {
        match self.page()?.find_element(selector).await {
            Ok(element) => element.attribute(name).await.map_err(script_err),
            Err(_) => Ok(None),
        }
    }
}
