//! Content-quality gate shared by first scrape, retry and enrichment.

use awin_core::CampaignRecord;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateVerdict {
    pub accepted: bool,
    pub reason: String,
}

/// A record is usable only if its description or some narrative section has
/// non-whitespace text. Awards, media and credits never count as content.
pub fn evaluate(record: &CampaignRecord) -> GateVerdict {
    if record.has_narrative() {
        GateVerdict {
            accepted: true,
            reason: format!("{} chars of narrative", record.narrative_len()),
        }
    } else {
        GateVerdict {
            accepted: false,
            reason: "no description or narrative sections (likely scrape failure or paywall)"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awin_core::{Award, AwardLevel, EntityStub, NarrativeSection};

    fn record() -> CampaignRecord {
        CampaignRecord::from_stub(&EntityStub::new("https://x.test/work/entries/g-1"))
    }

    #[test]
    fn awards_do_not_substitute_for_content() {
        let mut rec = record();
        rec.awards.push(Award {
            level: AwardLevel::GrandPrix,
            category: "Film".to_string(),
            subcategory: String::new(),
            festival: String::new(),
            year: None,
        });
        rec.description = " \n\t ".to_string();
        rec.sections.push(NarrativeSection {
            heading: "Idea".to_string(),
            body: "   ".to_string(),
        });
        assert!(!evaluate(&rec).accepted);
    }

    #[test]
    fn any_narrative_is_accepted_without_awards() {
        let mut rec = record();
        rec.sections.push(NarrativeSection {
            heading: "Execution".to_string(),
            body: "Billboards that tweet.".to_string(),
        });
        let verdict = evaluate(&rec);
        assert!(verdict.accepted);
        assert!(verdict.reason.starts_with("22 chars"));
    }
}
