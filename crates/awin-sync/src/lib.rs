//! Crawl orchestration: listing walk, merge, resume filter, detail scrape,
//! content gate, retry loop, healthcheck and enrichment.

use anyhow::{Context, Result};
use awin_core::{CampaignRecord, IngestionStatus};
use awin_storage::NotesStore;
use tracing::info;

pub mod config;
pub mod enrich;
pub mod gate;
pub mod healthcheck;
pub mod media;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod resume;
pub mod retry;

pub use config::CrawlConfig;
pub use enrich::{CompletionService, EnrichmentOutcome, EnrichmentStage};
pub use gate::{evaluate, GateVerdict};
pub use healthcheck::{audit, repair, AuditReport, RepairOutcome};
pub use merge::{merge, MergeOutcome};
pub use pipeline::{CrawlPipeline, CrawlReport, CrawlRequest, ListingTarget, RetryReport};
pub use progress::{Phase, ProgressEvent, RunKind, RunProgress, RunSummary};
pub use resume::filter_unseen;
pub use retry::{retry_failed, RetryOutcome};

pub const CRATE_NAME: &str = "awin-sync";

/// Manual reclassification of a `retry` record whose page is behind a paywall.
pub async fn mark_paywall<S: NotesStore + ?Sized>(store: &S, slug: &str) -> Result<CampaignRecord> {
    let record = store
        .transition(slug, IngestionStatus::Paywall)
        .await
        .with_context(|| format!("marking {slug} as paywall"))?;
    info!(slug, "marked paywall");
    Ok(record)
}
