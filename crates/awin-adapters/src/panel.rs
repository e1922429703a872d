//! Activation of the "detailed awards" tab on a detail page.
//!
//! The tab is a client-rendered control that does not always react to a plain
//! click, so activation walks an ordered list of [`ClickStrategy`]s, checking
//! the tab's `aria-selected` after each one, under a single time budget.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{BrowserPage, ClickStrategy, ClickTarget};
use crate::PageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelActivation {
    Collapsed,
    Activating,
    Active(ClickStrategy),
    Failed,
}

#[derive(Debug, Clone)]
pub struct PanelPolicy {
    pub tab: ClickTarget,
    pub strategies: Vec<ClickStrategy>,
    /// Pause between a click and the `aria-selected` check.
    pub settle: Duration,
    /// `aria-selected` checks per strategy.
    pub checks_per_strategy: usize,
    pub budget: Duration,
}

impl Default for PanelPolicy {
    fn default() -> Self {
        Self {
            tab: ClickTarget {
                selector: "#tab-1".to_string(),
                role: "tab".to_string(),
                label: "entries".to_string(),
            },
            strategies: ClickStrategy::ORDER.to_vec(),
            settle: Duration::from_millis(800),
            checks_per_strategy: 3,
            budget: Duration::from_secs(20),
        }
    }
}

impl PanelPolicy {
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            checks_per_strategy: 1,
            ..Self::default()
        }
    }
}

async fn is_selected<P: BrowserPage + ?Sized>(page: &P, tab_selector: &str) -> bool {
    matches!(
        page.attribute(tab_selector, "aria-selected").await,
        Ok(Some(value)) if value.eq_ignore_ascii_case("true")
    )
}

/// Drive `Collapsed -> Activating -> Active | Failed`.
///
/// Returns `Collapsed` when the page has no awards tab at all. A strategy that
/// errors is logged and the next one is tried.
pub async fn activate_panel<P: BrowserPage + ?Sized>(
    page: &P,
    policy: &PanelPolicy,
) -> Result<PanelActivation, PageError> {
    let tab = &policy.tab;
    let present = page.attribute(&tab.selector, "id").await?.is_some()
        || page.attribute(&tab.selector, "role").await?.is_some();
    if !present {
        debug!(selector = %tab.selector, "no awards tab on page");
        return Ok(PanelActivation::Collapsed);
    }
    if is_selected(page, &tab.selector).await {
        return Ok(PanelActivation::Active(ClickStrategy::Direct));
    }

    let deadline = Instant::now() + policy.budget;
    let mut state = PanelActivation::Activating;
    debug!(?state, selector = %tab.selector, "activating awards panel");

    for &strategy in &policy.strategies {
        if Instant::now() >= deadline {
            break;
        }
        match page.click(tab, strategy).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(strategy = strategy.as_str(), "strategy found no target");
                continue;
            }
            Err(err) => {
                debug!(strategy = strategy.as_str(), error = %err, "strategy failed");
                continue;
            }
        }
        for _ in 0..policy.checks_per_strategy.max(1) {
            if !policy.settle.is_zero() {
                tokio::time::sleep(policy.settle).await;
            }
            if is_selected(page, &tab.selector).await {
                state = PanelActivation::Active(strategy);
                info!(strategy = strategy.as_str(), "awards panel active");
                return Ok(state);
            }
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    state = PanelActivation::Failed;
    warn!(?state, selector = %tab.selector, "awards panel did not activate");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedPage;

    const URL: &str = "https://www.lovethework.com/work/entries/demo-1";

    fn collapsed_html() -> &'static str {
        r#"<html><body><div role="tablist">
            <button id="tab-0" role="tab" aria-selected="true"><span>Overview</span></button>
            <button id="tab-1" role="tab" aria-selected="false"><span>Entries</span></button>
        </div></body></html>"#
    }

    fn active_html() -> &'static str {
        r#"<html><body><div role="tablist">
            <button id="tab-0" role="tab" aria-selected="false"><span>Overview</span></button>
            <button id="tab-1" role="tab" aria-selected="true"><span>Entries</span></button>
        </div></body></html>"#
    }

    #[tokio::test]
    async fn falls_through_strategies_until_one_activates() {
        let page = ScriptedPage::new().with_page(URL, collapsed_html()).with_panel(
            URL,
            Some(ClickStrategy::Descendant),
            active_html(),
        );
        page.goto(URL).await.unwrap();

        let outcome = activate_panel(&page, &PanelPolicy::immediate()).await.unwrap();
        assert_eq!(outcome, PanelActivation::Active(ClickStrategy::Descendant));
        assert_eq!(
            page.clicks(),
            vec![
                ClickStrategy::Direct,
                ClickStrategy::ByRole,
                ClickStrategy::Descendant
            ]
        );
    }

    #[tokio::test]
    async fn reports_failed_when_no_strategy_works() {
        let page = ScriptedPage::new()
            .with_page(URL, collapsed_html())
            .with_panel(URL, None, active_html());
        page.goto(URL).await.unwrap();

        let outcome = activate_panel(&page, &PanelPolicy::immediate()).await.unwrap();
        assert_eq!(outcome, PanelActivation::Failed);
        assert_eq!(page.clicks().len(), ClickStrategy::ORDER.len());
    }

    #[tokio::test]
    async fn missing_tab_leaves_panel_collapsed() {
        let page = ScriptedPage::new().with_page(URL, "<html><body><h1>x</h1></body></html>");
        page.goto(URL).await.unwrap();

        let outcome = activate_panel(&page, &PanelPolicy::immediate()).await.unwrap();
        assert_eq!(outcome, PanelActivation::Collapsed);
        assert!(page.clicks().is_empty());
    }
}
