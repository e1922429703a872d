//! Collapse listing stubs that point at the same entity into one record.

use std::collections::HashMap;

use awin_core::{canonical_url, Award, CampaignRecord, EntityStub};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// One record per entity that carries at least one ranked award (or no badge at all).
    pub records: Vec<CampaignRecord>,
    /// Distinct entities seen before unranked ones were dropped.
    pub unique: usize,
    /// Slugs whose every badge was Shortlist or unrecognized.
    pub dropped_unranked: Vec<String>,
}

struct Group {
    record: CampaignRecord,
    badges_seen: usize,
}

/// Group stubs by canonical URL. The first stub of a group supplies the scalar
/// fields; awards from every stub are concatenated in input order. Badges that
/// are not one of the four ranked tiers are discarded here.
pub fn merge(stubs: &[EntityStub]) -> MergeOutcome {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for stub in stubs {
        let key = canonical_url(&stub.url);
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Group {
                record: CampaignRecord::from_stub(stub),
                badges_seen: 0,
            }
        });
        group.badges_seen += stub.badges.len();
        group
            .record
            .awards
            .extend(stub.badges.iter().filter_map(Award::from_badge));
        if group.record.festival.is_empty() {
            if let Some(festival) = stub.badges.iter().find(|b| !b.festival.is_empty()) {
                group.record.festival = festival.festival.clone();
            }
        }
    }

    let unique = order.len();
    let mut records = Vec::with_capacity(unique);
    let mut dropped_unranked = Vec::new();
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };
        if group.badges_seen > 0 && group.record.awards.is_empty() {
            dropped_unranked.push(group.record.slug);
        } else {
            records.push(group.record);
        }
    }

    info!(
        stubs = stubs.len(),
        unique,
        kept = records.len(),
        dropped_unranked = dropped_unranked.len(),
        "merged listing stubs"
    );
    MergeOutcome {
        records,
        unique,
        dropped_unranked,
    }
}
