//! Enrichment of scraped records through an external completion service.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use awin_core::{CampaignRecord, IngestionStatus};
use awin_storage::{JobScope, NotesStore};
use tracing::{info, warn};

use crate::gate;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    pub enriched: Vec<String>,
    /// Failed the content gate and were moved to `retry`.
    pub rejected: Vec<String>,
    /// Completion or write errors; these stay `scraped` for the next pass.
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct EnrichmentStage {
    service: Arc<dyn CompletionService>,
}

pub fn build_prompt(record: &CampaignRecord) -> String {
    let mut prompt = format!(
        "Summarize this award-winning advertising campaign as a case study.\n\nTitle: {}\nBrand: {}\nAgency: {}\nFestival: {} {}\n",
        record.title,
        record.brand,
        record.agency,
        record.festival,
        record.year.map(|y| y.to_string()).unwrap_or_default(),
    );
    if let Some(level) = record.primary_award() {
        prompt.push_str(&format!("Top award: {}\n", level.label()));
    }
    for block in record.narrative_blocks() {
        prompt.push('\n');
        prompt.push_str(block);
        prompt.push('\n');
    }
    prompt
}

fn render_artifact(record: &CampaignRecord, completion: &str) -> String {
    format!(
        "# {}\n\nSource: {}\n\n{}\n",
        record.title,
        record.url,
        completion.trim()
    )
}

impl EnrichmentStage {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Enrich one record that is already persisted as `scraped`.
    pub async fn enrich_one<S: NotesStore + ?Sized>(
        &self,
        store: &S,
        record: &CampaignRecord,
    ) -> Result<IngestionStatus> {
        let verdict = gate::evaluate(record);
        if !verdict.accepted {
            info!(slug = %record.slug, reason = %verdict.reason, "not enriching; back to retry");
            store.transition(&record.slug, IngestionStatus::Retry).await?;
            return Ok(IngestionStatus::Retry);
        }
        let completion = self.service.complete(&build_prompt(record)).await?;
        store
            .write_enrichment(&record.slug, &render_artifact(record, &completion))
            .await?;
        store.transition(&record.slug, IngestionStatus::Enriched).await?;
        Ok(IngestionStatus::Enriched)
    }

    pub async fn enrich_pending<S: NotesStore + ?Sized>(
        &self,
        store: &S,
        scope: &JobScope,
    ) -> Result<EnrichmentOutcome> {
        let mut outcome = EnrichmentOutcome::default();
        for record in store.list_with_status(scope, IngestionStatus::Scraped).await? {
            match self.enrich_one(store, &record).await {
                Ok(IngestionStatus::Enriched) => outcome.enriched.push(record.slug),
                Ok(_) => outcome.rejected.push(record.slug),
                Err(err) => {
                    warn!(slug = %record.slug, error = %err, "enrichment failed");
                    outcome.failed.push(record.slug);
                }
            }
        }
        info!(
            enriched = outcome.enriched.len(),
            rejected = outcome.rejected.len(),
            failed = outcome.failed.len(),
            "enrichment pass complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awin_core::{EntityStub, NarrativeSection};

    #[test]
    fn prompt_carries_narrative_blocks() {
        let mut record =
            CampaignRecord::from_stub(&EntityStub::new("https://x.test/work/entries/p-1"));
        record.title = "Billboard Tweets".to_string();
        record.description = "A billboard that answers back.".to_string();
        record.sections.push(NarrativeSection {
            heading: "Results".to_string(),
            body: "Two million replies.".to_string(),
        });
        let prompt = build_prompt(&record);
        assert!(prompt.contains("Title: Billboard Tweets"));
        assert!(prompt.contains("A billboard that answers back."));
        assert!(prompt.contains("Two million replies."));
    }
}
