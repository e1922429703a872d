//! Audit of persisted records against the content and metadata rules, plus
//! the repair pass that routes bad records back through the retry loop.

use anyhow::Result;
use awin_core::{CampaignRecord, IngestionStatus};
use awin_storage::{JobScope, NotesStore, StoredNote};
use serde::Serialize;
use tracing::{info, warn};

/// Narrative shorter than this is suspicious for a `scraped` record.
pub const MIN_CONTENT_LEN: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub ok: Vec<String>,
    pub parser_failure: Vec<String>,
    pub ghost: Vec<String>,
    pub paywall: Vec<String>,
    pub already_processed: Vec<String>,
    pub already_retry: Vec<String>,
    /// Subset of `parser_failure` whose note could not be parsed at all.
    pub unreadable: Vec<String>,
}

impl AuditReport {
    pub fn total(&self) -> usize {
        self.ok.len()
            + self.parser_failure.len()
            + self.ghost.len()
            + self.paywall.len()
            + self.already_processed.len()
            + self.already_retry.len()
    }

    fn sort(&mut self) {
        for list in [
            &mut self.ok,
            &mut self.parser_failure,
            &mut self.ghost,
            &mut self.paywall,
            &mut self.already_processed,
            &mut self.already_retry,
            &mut self.unreadable,
        ] {
            list.sort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    ParserFailure,
    Ghost,
    Paywall,
    AlreadyProcessed,
    AlreadyRetry,
}

/// Shifted columns: the agency cell holds a year or some other number.
fn agency_is_numeric(agency: &str) -> bool {
    let agency = agency.trim();
    !agency.is_empty() && agency.chars().all(|c| c.is_ascii_digit())
}

pub fn metadata_anomaly(record: &CampaignRecord) -> Option<&'static str> {
    if agency_is_numeric(&record.agency) {
        return Some("numeric agency");
    }
    if record.awards.is_empty() && !record.festival.trim().is_empty() {
        return Some("festival without awards");
    }
    None
}

pub fn classify(record: &CampaignRecord) -> Classification {
    match record.status {
        IngestionStatus::Retry => Classification::AlreadyRetry,
        IngestionStatus::Paywall => Classification::Paywall,
        IngestionStatus::Enriched if !record.has_narrative() => Classification::Ghost,
        IngestionStatus::Enriched => Classification::AlreadyProcessed,
        IngestionStatus::Scraped => {
            if !record.has_narrative() || metadata_anomaly(record).is_some() {
                Classification::ParserFailure
            } else {
                Classification::Ok
            }
        }
    }
}

/// Classify every note in scope. Reads only; two audits over the same vault
/// produce identical reports.
pub async fn audit<S: NotesStore + ?Sized>(store: &S, scope: &JobScope) -> Result<AuditReport> {
    let mut report = AuditReport::default();
    for note in store.scan(scope).await? {
        match note {
            StoredNote::Unreadable { slug, error } => {
                warn!(slug = %slug, error = %error, "unreadable note");
                report.unreadable.push(slug.clone());
                report.parser_failure.push(slug);
            }
            StoredNote::Readable(record) => {
                if record.status == IngestionStatus::Scraped
                    && record.has_narrative()
                    && record.narrative_len() < MIN_CONTENT_LEN
                {
                    info!(slug = %record.slug, chars = record.narrative_len(), "short narrative");
                }
                let slug = record.slug.clone();
                match classify(&record) {
                    Classification::Ok => report.ok.push(slug),
                    Classification::ParserFailure => report.parser_failure.push(slug),
                    Classification::Ghost => report.ghost.push(slug),
                    Classification::Paywall => report.paywall.push(slug),
                    Classification::AlreadyProcessed => report.already_processed.push(slug),
                    Classification::AlreadyRetry => report.already_retry.push(slug),
                }
            }
        }
    }
    report.sort();
    info!(
        total = report.total(),
        ok = report.ok.len(),
        parser_failure = report.parser_failure.len(),
        ghost = report.ghost.len(),
        paywall = report.paywall.len(),
        "healthcheck audit complete"
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub fixed: Vec<String>,
    /// Unreadable notes; these need a hand edit or deletion.
    pub skipped: Vec<String>,
    /// Slug and error for every repair that did not apply.
    pub errors: Vec<(String, String)>,
}

/// Move parser failures and ghosts to `retry`; ghosts also lose their
/// enrichment artifact. A failing slug is recorded and the pass continues.
pub async fn repair<S: NotesStore + ?Sized>(store: &S, report: &AuditReport) -> RepairOutcome {
    let mut outcome = RepairOutcome::default();
    for slug in &report.parser_failure {
        if report.unreadable.contains(slug) {
            warn!(slug = %slug, "skipping unreadable note; fix or delete it by hand");
            outcome.skipped.push(slug.clone());
            continue;
        }
        match store.transition(slug, IngestionStatus::Retry).await {
            Ok(_) => outcome.fixed.push(slug.clone()),
            Err(err) => {
                warn!(slug = %slug, error = %err, "repair failed");
                outcome.errors.push((slug.clone(), err.to_string()));
            }
        }
    }
    for slug in &report.ghost {
        if let Err(err) = store.transition(slug, IngestionStatus::Retry).await {
            warn!(slug = %slug, error = %err, "repair failed");
            outcome.errors.push((slug.clone(), err.to_string()));
            continue;
        }
        match store.delete_enrichment(slug).await {
            Ok(true) => info!(slug = %slug, "deleted ghost enrichment artifact"),
            Ok(false) => {}
            Err(err) => {
                warn!(slug = %slug, error = %err, "ghost artifact not deleted");
                outcome.errors.push((slug.clone(), err.to_string()));
            }
        }
        outcome.fixed.push(slug.clone());
    }
    info!(
        fixed = outcome.fixed.len(),
        skipped = outcome.skipped.len(),
        errors = outcome.errors.len(),
        "healthcheck repair complete"
    );
    outcome
}
