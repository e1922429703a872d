use std::collections::BTreeSet;

use awin_core::CampaignRecord;

/// Drop records whose slug is already persisted. Applied after merge and
/// before any detail page is visited.
pub fn filter_unseen(records: Vec<CampaignRecord>, seen: &BTreeSet<String>) -> Vec<CampaignRecord> {
    records
        .into_iter()
        .filter(|record| !seen.contains(&record.slug))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use awin_core::EntityStub;

    fn records(slugs: &[&str]) -> Vec<CampaignRecord> {
        slugs
            .iter()
            .map(|slug| {
                CampaignRecord::from_stub(&EntityStub::new(&format!(
                    "https://x.test/work/entries/{slug}"
                )))
            })
            .collect()
    }

    #[test]
    fn filtering_is_idempotent() {
        let seen: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let once = filter_unseen(records(&["a", "b", "c"]), &seen);
        let twice = filter_unseen(once.clone(), &seen);
        assert_eq!(once, twice);
        let slugs: Vec<_> = once.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "c"]);
    }
}
