//! Detail-page extraction: narrative, media, credits and the detailed awards table.

use std::collections::HashSet;
use std::time::Duration;

use awin_core::{Award, AwardLevel, AwardSource, CampaignRecord, Credit, NarrativeSection};
use awin_storage::PolitenessDelay;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use crate::browser::{navigate, BrowserPage};
use crate::listing::{scroll_until_stable, ScrollPolicy};
use crate::panel::{activate_panel, PanelActivation, PanelPolicy};
use crate::{absolutize, selector, text_or_none, PageError};

const DESCRIPTION_CONTAINERS: [&str; 3] = ["[class*='description']", "[class*='Description']", "article"];
const SECTION_HEADINGS: &str = "main h2, main h3, article h2, article h3";
const VIDEO_SOURCES: [&str; 5] = [
    "video source",
    "video[src]",
    "iframe[src*='youtube']",
    "iframe[src*='vimeo']",
    "iframe[src*='player']",
];
const CONTENT_IMAGES: &str = "main img, article img, [class*='media'] img";
const CREDIT_ROWS: &str = "[class*='credit'] tr, [class*='Credit'] li, [class*='credits'] li";
const COUNTRY: &str = "[class*='country'], [class*='Country']";
const SMALL_ASSET_PX: u32 = 64;
const NON_CONTENT_MARKERS: [&str; 4] = ["logo", "icon", "avatar", "favicon"];

#[derive(Debug, Clone)]
pub struct DetailOptions {
    pub timeout: Duration,
    pub delay: PolitenessDelay,
    pub scroll: ScrollPolicy,
    /// `None` skips the awards panel and keeps listing awards.
    pub panel: Option<PanelPolicy>,
}

/// Paragraph-preserving text of a block: `p` children joined by blank lines,
/// or the whole element's text when it has none.
fn block_text(el: &ElementRef<'_>) -> Result<String, PageError> {
    let p = selector("p")?;
    let paragraphs: Vec<String> = el
        .select(&p)
        .filter_map(|node| text_or_none(node.text().collect()))
        .collect();
    if !paragraphs.is_empty() {
        return Ok(paragraphs.join("\n\n"));
    }
    Ok(text_or_none(el.text().collect()).unwrap_or_default())
}

/// Only paragraph text counts as section body; tables, lists and controls
/// between headings are skipped.
fn paragraph_text(el: &ElementRef<'_>) -> Result<String, PageError> {
    if el.value().name() == "p" {
        return Ok(text_or_none(el.text().collect()).unwrap_or_default());
    }
    let p = selector("p")?;
    Ok(el
        .select(&p)
        .filter_map(|node| text_or_none(node.text().collect()))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

fn longest_description(document: &Html) -> Result<String, PageError> {
    let mut description = String::new();
    for css in DESCRIPTION_CONTAINERS {
        let sel = selector(css)?;
        if let Some(el) = document.select(&sel).next() {
            let text = block_text(&el)?;
            if text.chars().count() > description.chars().count() {
                description = text;
            }
        }
    }
    Ok(description)
}

fn narrative_sections(document: &Html) -> Result<Vec<NarrativeSection>, PageError> {
    let headings = selector(SECTION_HEADINGS)?;
    let mut seen = HashSet::new();
    let mut sections = Vec::new();
    for heading in document.select(&headings) {
        if !seen.insert(heading.id()) {
            continue;
        }
        let title = heading.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        let mut parts = Vec::new();
        for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
            if matches!(sibling.value().name(), "h1" | "h2" | "h3") {
                break;
            }
            let text = paragraph_text(&sibling)?;
            if !text.is_empty() {
                parts.push(text);
            }
        }
        if parts.is_empty() {
            continue;
        }
        sections.push(NarrativeSection {
            heading: title,
            body: parts.join("\n\n"),
        });
    }
    Ok(sections)
}

fn video_urls(document: &Html) -> Result<Vec<String>, PageError> {
    let mut urls = Vec::new();
    for css in VIDEO_SOURCES {
        let sel = selector(css)?;
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src").filter(|s| !s.trim().is_empty()) {
                let src = absolutize(src);
                if !urls.contains(&src) {
                    urls.push(src);
                }
            }
        }
    }
    Ok(urls)
}

fn parse_px(value: Option<&str>) -> Option<u32> {
    value?.trim().trim_end_matches("px").parse().ok()
}

/// Whether an image URL (plus its declared size) looks like campaign media
/// rather than site chrome.
pub fn is_content_image(src: &str, width: Option<u32>, height: Option<u32>) -> bool {
    let lower = src.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    if path.ends_with(".svg") {
        return false;
    }
    let file_name = path.rsplit('/').next().unwrap_or_default();
    if NON_CONTENT_MARKERS.iter().any(|m| file_name.contains(m)) {
        return false;
    }
    if [width, height]
        .into_iter()
        .flatten()
        .any(|px| px <= SMALL_ASSET_PX)
    {
        return false;
    }

    let small = |caps: regex::Captures<'_>| {
        caps.iter()
            .skip(1)
            .flatten()
            .filter_map(|m| m.as_str().parse::<u32>().ok())
            .any(|px| px <= SMALL_ASSET_PX)
    };
    if let Ok(query_hint) = Regex::new(r"[?&](?:w|width|h|height)=(\d+)") {
        if query_hint.captures_iter(&lower).any(small) {
            return false;
        }
    }
    if let Ok(suffix_hint) = Regex::new(r"-(\d+)x(\d+)\.[a-z0-9]+$") {
        if let Some(caps) = suffix_hint.captures(path) {
            if small(caps) {
                return false;
            }
        }
    }
    true
}

fn image_urls(document: &Html, thumbnail: &str) -> Result<Vec<String>, PageError> {
    let mut urls = Vec::new();
    if !thumbnail.trim().is_empty() {
        urls.push(thumbnail.to_string());
    }
    let sel = selector(CONTENT_IMAGES)?;
    for img in document.select(&sel) {
        let attrs = img.value();
        let Some(src) = attrs
            .attr("src")
            .or_else(|| attrs.attr("data-src"))
            .filter(|s| !s.trim().is_empty())
        else {
            continue;
        };
        if !is_content_image(src, parse_px(attrs.attr("width")), parse_px(attrs.attr("height"))) {
            continue;
        }
        let src = absolutize(src);
        if !urls.contains(&src) {
            urls.push(src);
        }
    }
    Ok(urls)
}

fn credits(document: &Html) -> Result<Vec<Credit>, PageError> {
    let rows = selector(CREDIT_ROWS)?;
    let td = selector("td, th")?;
    let mut out = Vec::new();
    for row in document.select(&rows) {
        let cells: Vec<String> = row
            .select(&td)
            .filter_map(|cell| text_or_none(cell.text().collect()))
            .collect();
        let (role, name) = if cells.len() >= 2 {
            (cells[0].trim_end_matches(':').to_string(), cells[1].clone())
        } else {
            let text = text_or_none(row.text().collect()).unwrap_or_default();
            match text.split_once(':') {
                Some((role, name)) => (role.trim().to_string(), name.trim().to_string()),
                None => continue,
            }
        };
        if !role.is_empty() && !name.is_empty() {
            out.push(Credit { role, name });
        }
    }
    Ok(out)
}

/// Fill a record's detail fields from a rendered detail page. Identity fields,
/// listing awards and status are carried over from `record` untouched.
pub fn parse_detail_html(html: &str, record: &CampaignRecord) -> Result<CampaignRecord, PageError> {
    let document = Html::parse_document(html);
    let mut scraped = record.clone();

    let h1 = selector("h1")?;
    if let Some(title) = document
        .select(&h1)
        .next()
        .and_then(|el| text_or_none(el.text().collect()))
    {
        scraped.title = title;
    }

    scraped.description = longest_description(&document)?;
    scraped.sections = narrative_sections(&document)?;
    scraped.video_urls = video_urls(&document)?;
    scraped.image_urls = image_urls(&document, &record.image_url)?;
    scraped.credits = credits(&document)?;

    let country = selector(COUNTRY)?;
    if let Some(text) = document
        .select(&country)
        .next()
        .and_then(|el| text_or_none(el.text().collect()))
    {
        scraped.country = text;
    }
    Ok(scraped)
}

/// Ranked rows of the detailed awards table (`level | category | subcategory`).
pub fn parse_award_entries(html: &str, record: &CampaignRecord) -> Result<Vec<Award>, PageError> {
    let document = Html::parse_document(html);
    let rows = selector("table tr")?;
    let td = selector("td")?;
    let mut awards = Vec::new();
    for row in document.select(&rows) {
        let cells: Vec<String> = row
            .select(&td)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .replace("ChevronRight", "")
                    .trim()
                    .to_string()
            })
            .collect();
        let Some(level) = cells.first().and_then(|c| AwardLevel::from_label(c)) else {
            continue;
        };
        awards.push(Award {
            level,
            category: cells.get(1).cloned().unwrap_or_default(),
            subcategory: cells.get(2).cloned().unwrap_or_default(),
            festival: record.festival.clone(),
            year: record.year,
        });
    }
    Ok(awards)
}

/// Visit one entity's detail page and extract the full record.
pub async fn scrape_detail<P: BrowserPage + ?Sized>(
    page: &P,
    record: &CampaignRecord,
    options: &DetailOptions,
) -> Result<CampaignRecord, PageError> {
    navigate(page, &record.url, options.timeout).await?;
    options.delay.pause().await;
    scroll_until_stable(page, &options.scroll).await?;

    let html = page.content().await?;
    let mut scraped = parse_detail_html(&html, record)?;

    let Some(policy) = &options.panel else {
        return Ok(scraped);
    };
    match activate_panel(page, policy).await {
        Ok(PanelActivation::Active(strategy)) => {
            let html = page.content().await?;
            let awards = parse_award_entries(&html, record)?;
            if awards.is_empty() {
                warn!(slug = %record.slug, "awards panel empty; keeping listing awards");
            } else {
                debug!(slug = %record.slug, strategy = strategy.as_str(), awards = awards.len(), "awards from detail panel");
                scraped.awards = awards;
                scraped.award_source = AwardSource::DetailPanel;
            }
        }
        Ok(PanelActivation::Failed) => {
            warn!(slug = %record.slug, "awards panel unavailable; keeping listing awards");
        }
        Ok(_) => {}
        Err(err) => {
            warn!(slug = %record.slug, error = %err, "awards panel errored; keeping listing awards");
        }
    }
    Ok(scraped)
}
