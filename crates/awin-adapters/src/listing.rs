//! Catalog listing: filter-to-URL mapping, pagination discovery, lazy-load
//! scrolling and card extraction.

use std::collections::HashSet;
use std::time::Duration;

use awin_core::{AwardLevel, EntityStub, StubBadge, TierLabel};
use awin_storage::PolitenessDelay;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::browser::{navigate, BrowserPage};
use crate::{absolutize, selector, text_or_none, PageError};

pub const DEFAULT_LISTING_BASE: &str = "https://www.lovethework.com/en/campaign-library";

const ENTRY_LINK: &str = r#"a[href*="/work/entries/"]"#;
const PAGINATION_CONTROLS: &str = "[class*='pagination'] a, [class*='pagination'] button, \
     [class*='Pagination'] a, [class*='Pagination'] button, nav[aria-label*='agination'] a, \
     nav[aria-label*='agination'] button, a[href*='page=']";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFilters {
    pub festival: Option<String>,
    pub year: Option<i32>,
    pub tiers: Vec<AwardLevel>,
}

/// Lowercased, hyphen-separated facet value: `"Cannes Lions"` -> `"cannes-lions"`.
pub fn festival_slug(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Pure mapping from filters to a listing URL. Facets are always emitted in
/// the order festival, year, award, page; page 1 carries no page facet.
pub fn build_listing_url(base: &str, filters: &ListingFilters, page: u32) -> String {
    let mut facets: Vec<(&str, String)> = Vec::new();
    if let Some(festival) = filters.festival.as_deref().map(festival_slug) {
        if !festival.is_empty() {
            facets.push(("festival", festival));
        }
    }
    if let Some(year) = filters.year {
        facets.push(("year", year.to_string()));
    }
    let mut tiers = filters.tiers.clone();
    tiers.sort();
    tiers.dedup();
    if !tiers.is_empty() {
        let award = tiers
            .iter()
            .map(|tier| tier.facet_value())
            .collect::<Vec<_>>()
            .join(",");
        facets.push(("award", award));
    }
    if page > 1 {
        facets.push(("page", page.to_string()));
    }

    if facets.is_empty() {
        return base.to_string();
    }
    let query = facets
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

/// Page `page` of a raw listing URL supplied by the operator.
pub fn page_url_for(source: &str, page: u32) -> String {
    if let Ok(re) = Regex::new(r"([?&])page=\d+") {
        if re.is_match(source) {
            return re
                .replace(source, format!("${{1}}page={page}").as_str())
                .into_owned();
        }
    }
    if page <= 1 {
        return source.to_string();
    }
    let separator = if source.contains('?') { '&' } else { '?' };
    format!("{source}{separator}page={page}")
}

/// Bounded polling used while waiting for client-rendered controls.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScrollPolicy {
    pub settle: Duration,
    pub max_rounds: usize,
    pub budget: Duration,
    pub stable_checks: usize,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1200),
            max_rounds: 10,
            budget: Duration::from_secs(20),
            stable_checks: 2,
        }
    }
}

/// Largest page index referenced by pagination links or buttons.
pub fn max_page_index(html: &str) -> Result<Option<u32>, PageError> {
    let document = Html::parse_document(html);
    let controls = selector(PAGINATION_CONTROLS)?;
    let page_param = Regex::new(r"[?&]page=(\d+)").map_err(|e| PageError::Parse(e.to_string()))?;

    let mut max = None;
    for control in document.select(&controls) {
        let from_text = control
            .text()
            .collect::<String>()
            .trim()
            .parse::<u32>()
            .ok();
        let from_href = control
            .value()
            .attr("href")
            .and_then(|href| page_param.captures(href))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        let from_label = control
            .value()
            .attr("aria-label")
            .and_then(|label| label.rsplit(' ').next())
            .and_then(|n| n.parse::<u32>().ok());
        for candidate in [from_text, from_href, from_label].into_iter().flatten() {
            max = Some(max.map_or(candidate, |m: u32| m.max(candidate)));
        }
    }
    Ok(max)
}

/// Poll for pagination controls; a catalog view without any is a single page.
pub async fn discover_total_pages<P: BrowserPage + ?Sized>(
    page: &P,
    wait: &WaitPolicy,
) -> Result<u32, PageError> {
    for attempt in 0..wait.attempts.max(1) {
        let html = page.content().await?;
        if let Some(total) = max_page_index(&html)? {
            debug!(total, attempt, "pagination discovered");
            return Ok(total.max(1));
        }
        if attempt + 1 < wait.attempts && !wait.interval.is_zero() {
            tokio::time::sleep(wait.interval).await;
        }
    }
    Ok(1)
}

/// Scroll until the document height stops growing. Returns the number of
/// height checks performed.
pub async fn scroll_until_stable<P: BrowserPage + ?Sized>(
    page: &P,
    policy: &ScrollPolicy,
) -> Result<usize, PageError> {
    let started = Instant::now();
    let mut previous = None;
    let mut stable = 0;
    let mut checks = 0;

    while checks < policy.max_rounds && started.elapsed() < policy.budget {
        let height = page.scroll_height().await?;
        checks += 1;
        if previous == Some(height) {
            stable += 1;
            if stable >= policy.stable_checks {
                break;
            }
        } else {
            stable = 0;
        }
        previous = Some(height);
        page.scroll_to_bottom().await?;
        if !policy.settle.is_zero() {
            tokio::time::sleep(policy.settle).await;
        }
    }
    Ok(checks)
}

/// What the cards on a listing page inherit from the walk that found them.
#[derive(Debug, Clone, Default)]
pub struct ListingContext {
    pub page: u32,
    pub festival: String,
    pub category: String,
    pub year: Option<i32>,
}

impl ListingContext {
    pub fn for_filters(filters: &ListingFilters, page: u32) -> Self {
        Self {
            page,
            festival: filters.festival.clone().unwrap_or_default(),
            category: String::new(),
            year: filters.year,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub stubs: Vec<EntityStub>,
    pub has_more: bool,
}

fn listing_cards<'a>(document: &'a Html) -> Result<Vec<ElementRef<'a>>, PageError> {
    let grid = selector(r#"[data-testid="group-grid"] > div"#)?;
    let cards: Vec<_> = document.select(&grid).collect();
    if !cards.is_empty() {
        return Ok(cards);
    }

    let link = selector(ENTRY_LINK)?;
    let mut seen = HashSet::new();
    let mut fallback = Vec::new();
    for anchor in document.select(&link) {
        let card = anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "div");
        if let Some(card) = card {
            if seen.insert(card.id()) {
                fallback.push(card);
            }
        }
    }
    Ok(fallback)
}

fn first_text(card: &ElementRef<'_>, css: &str) -> Result<Option<String>, PageError> {
    let sel = selector(css)?;
    Ok(card
        .select(&sel)
        .next()
        .and_then(|el| text_or_none(el.text().collect())))
}

fn parse_card(card: &ElementRef<'_>, ctx: &ListingContext) -> Result<Option<EntityStub>, PageError> {
    let link_sel = selector(ENTRY_LINK)?;
    let Some(href) = card
        .select(&link_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
    else {
        return Ok(None);
    };

    let mut stub = EntityStub::new(&absolutize(href));
    stub.title = first_text(card, "h3")?.unwrap_or_default();
    stub.year = ctx.year;

    let small_sel = selector(r#"p[class*="typography--size_body-small"]"#)?;
    let mut small_texts = Vec::new();
    for p in card.select(&small_sel) {
        let classes = p.value().attr("class").unwrap_or_default();
        if classes.contains("body-small-short") {
            continue;
        }
        if let Some(text) = text_or_none(p.text().collect()) {
            small_texts.push(text);
        }
    }

    let count_pattern = Regex::new(r"(?i)^\d+\s+.*awards?$").map_err(|e| PageError::Parse(e.to_string()))?;
    let (count_texts, small_texts): (Vec<_>, Vec<_>) = small_texts
        .into_iter()
        .partition(|text| count_pattern.is_match(text));
    stub.award_count_text = match first_text(card, "[class*='award-count'], [class*='awardCount']")? {
        Some(text) => text,
        None => count_texts.into_iter().next().unwrap_or_default(),
    };

    let subcategory = small_texts.first().cloned().unwrap_or_default();
    if let Some(brand_agency) = small_texts.get(1) {
        let mut parts = brand_agency.splitn(3, ',').map(str::trim);
        stub.brand = parts.next().unwrap_or_default().to_string();
        stub.agency = parts.next().unwrap_or_default().to_string();
        stub.agency_location = parts.next().unwrap_or_default().to_string();
    }

    let img_sel = selector("img")?;
    if let Some(img) = card.select(&img_sel).next() {
        let src = img
            .value()
            .attr("src")
            .or_else(|| img.value().attr("data-src"))
            .unwrap_or_default();
        if !src.trim().is_empty() {
            stub.image_url = absolutize(src);
        }
    }

    let tag_sel = selector(r#"[data-testid="tag"]"#)?;
    for tag in card.select(&tag_sel) {
        let classes = tag.value().attr("class").unwrap_or_default();
        let text = tag.text().collect::<String>();
        let tier = match TierLabel::parse_class_list(classes) {
            Some(tier) => tier,
            None if !text.trim().is_empty() => TierLabel::parse_text(&text),
            None => continue,
        };
        stub.badges.push(StubBadge {
            tier,
            category: tag
                .value()
                .attr("data-category")
                .map(str::to_string)
                .unwrap_or_else(|| ctx.category.clone()),
            subcategory: subcategory.clone(),
            festival: ctx.festival.clone(),
            year: ctx.year,
        });
    }

    Ok(Some(stub))
}

/// Extract every entity card on a rendered listing page.
pub fn parse_listing_page(html: &str, ctx: &ListingContext) -> Result<ListingPage, PageError> {
    let document = Html::parse_document(html);
    let mut stubs = Vec::new();
    for card in listing_cards(&document)? {
        if let Some(stub) = parse_card(&card, ctx)? {
            stubs.push(stub);
        }
    }
    let has_more = max_page_index(html)?.is_some_and(|max| max > ctx.page);
    Ok(ListingPage { stubs, has_more })
}

#[derive(Debug, Clone)]
pub struct ListingFetchOptions {
    pub timeout: Duration,
    pub delay: PolitenessDelay,
    pub scroll: ScrollPolicy,
}

/// Navigate to one listing page, let it settle, materialize lazy cards and parse.
pub async fn fetch_page<P: BrowserPage + ?Sized>(
    page: &P,
    url: &str,
    options: &ListingFetchOptions,
    ctx: &ListingContext,
) -> Result<ListingPage, PageError> {
    navigate(page, url, options.timeout).await?;
    options.delay.pause().await;
    scroll_until_stable(page, &options.scroll).await?;
    let html = page.content().await?;
    let listing = parse_listing_page(&html, ctx)?;
    info!(page = ctx.page, stubs = listing.stubs.len(), "listing page parsed");
    Ok(listing)
}
