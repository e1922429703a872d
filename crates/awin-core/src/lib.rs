//! Core domain model for AWIN: award tiers, listing stubs, campaign records
//! and the ingestion status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "awin-core";

/// The four ranked recognition tiers tracked by the ingest, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AwardLevel {
    #[serde(rename = "Grand Prix")]
    GrandPrix,
    Gold,
    Silver,
    Bronze,
}

impl AwardLevel {
    pub const ALL: [AwardLevel; 4] = [
        AwardLevel::GrandPrix,
        AwardLevel::Gold,
        AwardLevel::Silver,
        AwardLevel::Bronze,
    ];

    pub fn rank(self) -> u8 {
        match self {
            AwardLevel::GrandPrix => 0,
            AwardLevel::Gold => 1,
            AwardLevel::Silver => 2,
            AwardLevel::Bronze => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AwardLevel::GrandPrix => "Grand Prix",
            AwardLevel::Gold => "Gold",
            AwardLevel::Silver => "Silver",
            AwardLevel::Bronze => "Bronze",
        }
    }

    /// Facet value used by the catalog's query encoding.
    pub fn facet_value(self) -> &'static str {
        match self {
            AwardLevel::GrandPrix => "grand-prix",
            AwardLevel::Gold => "gold",
            AwardLevel::Silver => "silver",
            AwardLevel::Bronze => "bronze",
        }
    }

    /// Parse a human label. Titanium Grand Prix counts as Grand Prix.
    pub fn from_label(input: &str) -> Option<Self> {
        let normalized = input
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], " ");
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "grand prix" | "grandprix" | "titanium grand prix" | "titanium" => {
                Some(AwardLevel::GrandPrix)
            }
            "gold" => Some(AwardLevel::Gold),
            "silver" => Some(AwardLevel::Silver),
            "bronze" => Some(AwardLevel::Bronze),
            _ => None,
        }
    }
}

impl fmt::Display for AwardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a listing badge said before validation. Only the merger turns these into [`Award`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierLabel {
    Ranked(AwardLevel),
    Shortlist,
    Other(String),
}

impl TierLabel {
    pub fn parse_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(level) = AwardLevel::from_label(trimmed) {
            return TierLabel::Ranked(level);
        }
        if trimmed.to_ascii_lowercase().contains("shortlist") {
            return TierLabel::Shortlist;
        }
        TierLabel::Other(trimmed.to_string())
    }

    /// Parse the site's badge modifier classes (`tag--type_gold`, `tag--type_grandPrix`, ...).
    pub fn parse_class_list(classes: &str) -> Option<Self> {
        classes.split_whitespace().find_map(|class| {
            let kind = class.strip_prefix("tag--type_")?;
            Some(match kind.to_ascii_lowercase().as_str() {
                "grandprix" | "titaniumgrandprix" | "titanium" => {
                    TierLabel::Ranked(AwardLevel::GrandPrix)
                }
                "gold" => TierLabel::Ranked(AwardLevel::Gold),
                "silver" => TierLabel::Ranked(AwardLevel::Silver),
                "bronze" => TierLabel::Ranked(AwardLevel::Bronze),
                "shortlist" => TierLabel::Shortlist,
                other => TierLabel::Other(other.to_string()),
            })
        })
    }

    pub fn ranked(&self) -> Option<AwardLevel> {
        match self {
            TierLabel::Ranked(level) => Some(*level),
            _ => None,
        }
    }
}

/// A badge seen on a listing card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubBadge {
    pub tier: TierLabel,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub festival: String,
    #[serde(default)]
    pub year: Option<i32>,
}

/// One validated award. `level` can only hold a ranked tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub level: AwardLevel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subcategory: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub festival: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl Award {
    /// Shortlist and unrecognized badges yield `None`.
    pub fn from_badge(badge: &StubBadge) -> Option<Self> {
        let level = badge.tier.ranked()?;
        Some(Self {
            level,
            category: badge.category.clone(),
            subcategory: badge.subcategory.clone(),
            festival: badge.festival.clone(),
            year: badge.year,
        })
    }
}

/// Lightweight record extracted from one listing card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityStub {
    pub url: String,
    pub slug: String,
    pub title: String,
    pub brand: String,
    pub agency: String,
    pub agency_location: String,
    pub image_url: String,
    pub award_count_text: String,
    pub year: Option<i32>,
    pub badges: Vec<StubBadge>,
}

impl EntityStub {
    pub fn new(url: &str) -> Self {
        let url = canonical_url(url);
        Self {
            slug: slug_from_url(&url),
            url,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub role: String,
    pub name: String,
}

/// Where a record's award list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AwardSource {
    #[default]
    Listing,
    DetailPanel,
}

/// Persisted ingestion state of a campaign record. Notes written by earlier
/// tooling say `raw` and `processed`; those read as `scraped` and `enriched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum IngestionStatus {
    Scraped,
    Retry,
    Enriched,
    Paywall,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: IngestionStatus,
}

impl IngestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestionStatus::Scraped => "scraped",
            IngestionStatus::Retry => "retry",
            IngestionStatus::Enriched => "enriched",
            IngestionStatus::Paywall => "paywall",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "scraped" | "raw" => Some(IngestionStatus::Scraped),
            "retry" => Some(IngestionStatus::Retry),
            "enriched" | "processed" => Some(IngestionStatus::Enriched),
            "paywall" => Some(IngestionStatus::Paywall),
            _ => None,
        }
    }

    /// Transition table. `from == None` is the first write of a slug.
    pub fn can_transition(from: Option<IngestionStatus>, to: IngestionStatus) -> bool {
        use IngestionStatus::*;
        matches!(
            (from, to),
            (None, Scraped)
                | (None, Retry)
                | (Some(Scraped), Enriched)
                | (Some(Scraped), Retry)
                | (Some(Retry), Scraped)
                | (Some(Retry), Paywall)
                | (Some(Enriched), Retry)
        )
    }

    pub fn validate_transition(
        from: Option<IngestionStatus>,
        to: IngestionStatus,
    ) -> Result<(), IllegalTransition> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(IllegalTransition {
                from: from.map(|s| s.as_str().to_string()).unwrap_or_else(|| "new".to_string()),
                to,
            })
        }
    }
}

impl TryFrom<String> for IngestionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown ingestion status {value:?}"))
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full campaign entity: merged listing data plus what the detail page yielded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub url: String,
    pub slug: String,
    pub title: String,
    pub brand: String,
    pub agency: String,
    pub agency_location: String,
    pub country: String,
    pub festival: String,
    pub year: Option<i32>,
    pub image_url: String,
    pub award_count_text: String,
    pub awards: Vec<Award>,
    pub award_source: AwardSource,
    pub description: String,
    pub sections: Vec<NarrativeSection>,
    pub credits: Vec<Credit>,
    pub video_urls: Vec<String>,
    pub image_urls: Vec<String>,
    pub image_paths: Vec<String>,
    pub status: IngestionStatus,
    pub job_id: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

impl CampaignRecord {
    /// Record seeded from a stub's scalar fields; awards are filled by the merger.
    pub fn from_stub(stub: &EntityStub) -> Self {
        let festival = stub
            .badges
            .iter()
            .map(|b| b.festival.as_str())
            .find(|f| !f.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            url: stub.url.clone(),
            slug: stub.slug.clone(),
            title: stub.title.clone(),
            brand: stub.brand.clone(),
            agency: stub.agency.clone(),
            agency_location: stub.agency_location.clone(),
            country: String::new(),
            festival,
            year: stub.year,
            image_url: stub.image_url.clone(),
            award_count_text: stub.award_count_text.clone(),
            awards: Vec::new(),
            award_source: AwardSource::Listing,
            description: String::new(),
            sections: Vec::new(),
            credits: Vec::new(),
            video_urls: Vec::new(),
            image_urls: Vec::new(),
            image_paths: Vec::new(),
            status: IngestionStatus::Scraped,
            job_id: None,
            scraped_at: None,
        }
    }

    /// Non-blank narrative blocks: the description plus every section body.
    pub fn narrative_blocks(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.description.as_str())
            .chain(self.sections.iter().map(|s| s.body.as_str()))
            .filter(|text| !text.trim().is_empty())
    }

    pub fn has_narrative(&self) -> bool {
        self.narrative_blocks().next().is_some()
    }

    pub fn narrative_len(&self) -> usize {
        self.narrative_blocks().map(|t| t.trim().chars().count()).sum()
    }

    pub fn primary_award(&self) -> Option<AwardLevel> {
        self.awards.iter().map(|a| a.level).min()
    }
}

/// Strip fragment, query and trailing slashes so the same entity always maps to one key.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    without_query.trim_end_matches('/').to_string()
}

/// Last non-empty path segment of the canonical URL, e.g. `.../campaigns/one-second-ads-741948`.
pub fn slug_from_url(url: &str) -> String {
    let canonical = canonical_url(url);
    let path = match canonical.find("://") {
        Some(idx) => {
            let rest = &canonical[idx + 3..];
            rest.find('/').map(|p| &rest[p..]).unwrap_or("")
        }
        None => canonical.as_str(),
    };
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_last_path_segment_of_canonical_url() {
        let a = slug_from_url("https://www.lovethework.com/work/campaigns/one-second-ads-741948");
        let b = slug_from_url("https://www.lovethework.com/work/campaigns/one-second-ads-741948/?tab=1#credits");
        assert_eq!(a, "one-second-ads-741948");
        assert_eq!(a, b);
        assert_eq!(slug_from_url("/work/entries/x-1/"), "x-1");
        assert_eq!(slug_from_url("https://example.com"), "");
    }

    #[test]
    fn transition_table_only_allows_documented_edges() {
        use IngestionStatus::*;
        assert!(IngestionStatus::can_transition(None, Scraped));
        assert!(IngestionStatus::can_transition(None, Retry));
        assert!(IngestionStatus::can_transition(Some(Scraped), Enriched));
        assert!(IngestionStatus::can_transition(Some(Scraped), Retry));
        assert!(IngestionStatus::can_transition(Some(Retry), Scraped));
        assert!(IngestionStatus::can_transition(Some(Retry), Paywall));
        assert!(IngestionStatus::can_transition(Some(Enriched), Retry));

        assert!(!IngestionStatus::can_transition(None, Enriched));
        assert!(!IngestionStatus::can_transition(Some(Retry), Enriched));
        assert!(!IngestionStatus::can_transition(Some(Retry), Retry));
        assert!(!IngestionStatus::can_transition(Some(Paywall), Scraped));
        assert!(!IngestionStatus::can_transition(Some(Enriched), Scraped));

        let err = IngestionStatus::validate_transition(Some(Paywall), Retry).unwrap_err();
        assert_eq!(err.to_string(), "illegal status transition paywall -> retry");
    }

    #[test]
    fn legacy_status_names_deserialize_to_current_states() {
        let read = |raw: &str| serde_json::from_str::<IngestionStatus>(raw);
        assert_eq!(read("\"raw\"").unwrap(), IngestionStatus::Scraped);
        assert_eq!(read("\"processed\"").unwrap(), IngestionStatus::Enriched);
        assert_eq!(read("\"Retry\"").unwrap(), IngestionStatus::Retry);
        assert!(read("\"archived\"").is_err());
        assert_eq!(serde_json::to_string(&IngestionStatus::Enriched).unwrap(), "\"enriched\"");
    }

    #[test]
    fn tier_labels_parse_from_text_and_classes() {
        assert_eq!(TierLabel::parse_text("Grand Prix"), TierLabel::Ranked(AwardLevel::GrandPrix));
        assert_eq!(
            TierLabel::parse_text("Titanium Grand Prix"),
            TierLabel::Ranked(AwardLevel::GrandPrix)
        );
        assert_eq!(TierLabel::parse_text("Shortlisted"), TierLabel::Shortlist);
        assert_eq!(
            TierLabel::parse_class_list("tag tag--type_silver typography"),
            Some(TierLabel::Ranked(AwardLevel::Silver))
        );
        assert_eq!(
            TierLabel::parse_class_list("tag tag--type_shortlist"),
            Some(TierLabel::Shortlist)
        );
        assert_eq!(TierLabel::parse_class_list("tag"), None);
    }

    #[test]
    fn award_from_badge_drops_unranked_tiers() {
        let mut badge = StubBadge {
            tier: TierLabel::Shortlist,
            category: "Film".into(),
            subcategory: String::new(),
            festival: "Cannes Lions".into(),
            year: Some(2025),
        };
        assert!(Award::from_badge(&badge).is_none());
        badge.tier = TierLabel::Ranked(AwardLevel::Bronze);
        let award = Award::from_badge(&badge).unwrap();
        assert_eq!(award.level, AwardLevel::Bronze);
        assert_eq!(award.category, "Film");
    }

    #[test]
    fn award_levels_order_best_first() {
        let mut levels = vec![AwardLevel::Bronze, AwardLevel::GrandPrix, AwardLevel::Silver];
        levels.sort();
        assert_eq!(levels, vec![AwardLevel::GrandPrix, AwardLevel::Silver, AwardLevel::Bronze]);
        assert_eq!(serde_json::to_string(&AwardLevel::GrandPrix).unwrap(), "\"Grand Prix\"");
    }

    #[test]
    fn narrative_ignores_blank_blocks() {
        let mut record = CampaignRecord::from_stub(&EntityStub::new("https://x.test/work/a-1"));
        record.description = "   ".into();
        record.sections.push(NarrativeSection {
            heading: "Background".into(),
            body: "\n".into(),
        });
        assert!(!record.has_narrative());
        record.sections.push(NarrativeSection {
            heading: "Outcome".into(),
            body: " Sales doubled. ".into(),
        });
        assert!(record.has_narrative());
        assert_eq!(record.narrative_len(), "Sales doubled.".len());
    }
}
