use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use awin_adapters::{
    DetailOptions, ListingFetchOptions, PanelPolicy, ScrollPolicy, SessionOptions, WaitPolicy,
    DEFAULT_HOME_URL, DEFAULT_LISTING_BASE, DEFAULT_USER_AGENT,
};
use awin_storage::{BackoffPolicy, MediaFetcherConfig, PolitenessDelay};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "awin.yaml";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub vault_dir: PathBuf,
    pub session_state: PathBuf,
    pub base_url: String,
    pub home_url: String,
    pub min_delay: Duration,
    pub page_timeout: Duration,
    pub retry_timeout: Duration,
    pub headless: bool,
    pub user_agent: String,
    pub download_images: bool,
    pub reports_dir: PathBuf,
    pub max_retries: usize,
    pub scroll: ScrollPolicy,
    pub wait: WaitPolicy,
    pub panel: Option<PanelPolicy>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            vault_dir: PathBuf::from("./vault"),
            session_state: PathBuf::from("./browser-state/auth_state.json"),
            base_url: DEFAULT_LISTING_BASE.to_string(),
            home_url: DEFAULT_HOME_URL.to_string(),
            min_delay: Duration::from_millis(2500),
            page_timeout: Duration::from_secs(30),
            retry_timeout: Duration::from_secs(60),
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            download_images: true,
            reports_dir: PathBuf::from("./reports"),
            max_retries: 3,
            scroll: ScrollPolicy::default(),
            wait: WaitPolicy::default(),
            panel: Some(PanelPolicy::default()),
        }
    }
}

/// Subset of `awin.yaml` that maps onto the crawl. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    scraper: ScraperSection,
    #[serde(default)]
    export: ExportSection,
}

#[derive(Debug, Default, Deserialize)]
struct ScraperSection {
    /// Seconds.
    delay_between_pages: Option<f64>,
    /// Milliseconds.
    timeout: Option<u64>,
    headless: Option<bool>,
    max_retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportSection {
    download_images: Option<bool>,
    output_dir: Option<PathBuf>,
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

impl CrawlConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.enforce_retry_timeout();
        config
    }

    /// Defaults, then `awin.yaml` under `workspace_root` when present, then env.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let mut config = Self::default();
        let path = workspace_root.join(CONFIG_FILE);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            config
                .apply_yaml(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.enforce_retry_timeout();
        Ok(config)
    }

    /// The retry pass gets at least twice the first-pass navigation timeout,
    /// whichever overlay set either value.
    pub fn enforce_retry_timeout(&mut self) {
        self.retry_timeout = self.retry_timeout.max(self.page_timeout * 2);
    }

    pub fn apply_yaml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig = serde_yaml::from_str(raw)?;
        if let Some(secs) = file.scraper.delay_between_pages {
            self.min_delay = Duration::try_from_secs_f64(secs).map_err(|err| {
                anyhow!("scraper.delay_between_pages must be a non-negative number of seconds, got {secs}: {err}")
            })?;
        }
        if let Some(ms) = file.scraper.timeout {
            self.page_timeout = Duration::from_millis(ms);
            self.enforce_retry_timeout();
        }
        if let Some(headless) = file.scraper.headless {
            self.headless = headless;
        }
        if let Some(max_retries) = file.scraper.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(download) = file.export.download_images {
            self.download_images = download;
        }
        if let Some(dir) = file.export.output_dir {
            self.vault_dir = dir;
        }
        Ok(())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AWIN_VAULT_DIR") {
            self.vault_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AWIN_SESSION_STATE") {
            self.session_state = PathBuf::from(v);
        }
        if let Some(v) = lookup("AWIN_BASE_URL") {
            self.base_url = v;
        }
        if let Some(ms) = lookup("AWIN_MIN_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.min_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = lookup("AWIN_PAGE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.page_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("AWIN_RETRY_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.retry_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("AWIN_HEADLESS") {
            self.headless = truthy(&v);
        }
        if let Some(v) = lookup("AWIN_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("AWIN_DOWNLOAD_IMAGES") {
            self.download_images = truthy(&v);
        }
        if let Some(v) = lookup("AWIN_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(v);
        }
    }

    pub fn delay(&self) -> PolitenessDelay {
        PolitenessDelay::new(self.min_delay)
    }

    pub fn listing_options(&self) -> ListingFetchOptions {
        ListingFetchOptions {
            timeout: self.page_timeout,
            delay: self.delay(),
            scroll: self.scroll,
        }
    }

    pub fn detail_options(&self) -> DetailOptions {
        DetailOptions {
            timeout: self.page_timeout,
            delay: self.delay(),
            scroll: self.scroll,
            panel: self.panel.clone(),
        }
    }

    /// Retry pass: same extraction, longer navigation timeout.
    pub fn retry_options(&self) -> DetailOptions {
        DetailOptions {
            timeout: self.retry_timeout,
            ..self.detail_options()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: self.headless,
            user_agent: self.user_agent.clone(),
            home_url: self.home_url.clone(),
            auth_timeout: self.page_timeout,
            ..SessionOptions::default()
        }
    }

    pub fn media_options(&self) -> MediaFetcherConfig {
        MediaFetcherConfig {
            timeout: self.page_timeout,
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    /// No delays, no settling and an instant panel; used by tests and dry runs.
    pub fn immediate(vault_dir: impl Into<PathBuf>) -> Self {
        let vault_dir = vault_dir.into();
        Self {
            reports_dir: vault_dir.join("reports"),
            vault_dir,
            min_delay: Duration::ZERO,
            page_timeout: Duration::from_secs(5),
            retry_timeout: Duration::from_secs(10),
            download_images: false,
            scroll: ScrollPolicy {
                settle: Duration::ZERO,
                max_rounds: 2,
                budget: Duration::from_secs(1),
                stable_checks: 1,
            },
            wait: WaitPolicy {
                attempts: 1,
                interval: Duration::ZERO,
            },
            panel: Some(PanelPolicy::immediate()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_overlay_uses_file_units() {
        let mut config = CrawlConfig::default();
        config
            .apply_yaml(
                "scraper:\n  delay_between_pages: 1.5\n  timeout: 45000\n  headless: false\n  max_retries: 5\nexport:\n  download_images: false\n",
            )
            .unwrap();
        assert_eq!(config.min_delay, Duration::from_millis(1500));
        assert_eq!(config.page_timeout, Duration::from_secs(45));
        assert!(config.retry_timeout > config.page_timeout);
        assert!(!config.headless);
        assert_eq!(config.media_options().backoff.max_retries, 5);
        assert!(!config.download_images);
    }

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("AWIN_VAULT_DIR", "/tmp/v"),
            ("AWIN_MIN_DELAY_MS", "0"),
            ("AWIN_HEADLESS", "false"),
            ("AWIN_RETRY_TIMEOUT_SECS", "90"),
        ]
        .into_iter()
        .collect();
        let mut config = CrawlConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/v"));
        assert!(config.delay().min_delay.is_zero());
        assert!(!config.headless);
        assert_eq!(config.retry_options().timeout, Duration::from_secs(90));
        assert_eq!(config.detail_options().timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_page_timeout_lifts_retry_timeout() {
        let mut config = CrawlConfig::default();
        config.apply_env(|key| (key == "AWIN_PAGE_TIMEOUT_SECS").then(|| "90".to_string()));
        config.enforce_retry_timeout();
        assert_eq!(config.page_timeout, Duration::from_secs(90));
        assert_eq!(config.retry_timeout, Duration::from_secs(180));

        let mut config = CrawlConfig::default();
        config.apply_env(|key| (key == "AWIN_RETRY_TIMEOUT_SECS").then(|| "10".to_string()));
        config.enforce_retry_timeout();
        assert_eq!(config.retry_timeout, Duration::from_secs(60));
    }

    #[test]
    fn invalid_delay_in_yaml_is_a_config_error() {
        for raw in [
            "scraper:\n  delay_between_pages: -1\n",
            "scraper:\n  delay_between_pages: .nan\n",
            "scraper:\n  delay_between_pages: 1e300\n",
        ] {
            let mut config = CrawlConfig::default();
            let err = config.apply_yaml(raw).unwrap_err();
            assert!(err.to_string().contains("delay_between_pages"), "{raw}: {err}");
            assert_eq!(config.min_delay, Duration::from_millis(2500));
        }
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlConfig::load(dir.path()).unwrap();
        assert_eq!(config.session_state, PathBuf::from("./browser-state/auth_state.json"));
    }
}
