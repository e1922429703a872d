use anyhow::Result;
use awin_adapters::{scrape_detail, BrowserPage, DetailOptions};
use awin_core::IngestionStatus;
use awin_storage::{JobScope, MediaFetcher, NotesStore};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gate;
use crate::media::attach_media;
use crate::progress::{Phase, ProgressTracker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Passed the gate this time and were upserted as `scraped`.
    pub recovered: Vec<String>,
    /// Still no narrative; left untouched in `retry`.
    pub still_empty: Vec<String>,
    /// Navigation or extraction errors.
    pub errored: Vec<String>,
    pub cancelled: bool,
}

/// Re-visit the detail page of every `retry` record in scope with the longer
/// retry timeout. Successes overwrite the same note in place.
pub async fn retry_failed<P, S>(
    page: &P,
    store: &S,
    scope: &JobScope,
    options: &DetailOptions,
    media: Option<&MediaFetcher>,
    cancel: &CancellationToken,
    tracker: &mut ProgressTracker,
) -> Result<RetryOutcome>
where
    P: BrowserPage + ?Sized,
    S: NotesStore + ?Sized,
{
    tracker.enter(Phase::Retrying);
    let pending: Vec<_> = store
        .list_with_status(scope, IngestionStatus::Retry)
        .await?
        .into_iter()
        .filter(|record| !record.url.trim().is_empty())
        .collect();
    tracker.state.total_entities = pending.len();
    info!(pending = pending.len(), timeout = ?options.timeout, "retry pass starting");

    let mut outcome = RetryOutcome::default();
    for stored in pending {
        if cancel.is_cancelled() {
            info!("retry pass cancelled");
            outcome.cancelled = true;
            break;
        }
        tracker.state.current_url = stored.url.clone();

        let mut record = match scrape_detail(page, &stored, options).await {
            Ok(record) => record,
            Err(err) => {
                warn!(slug = %stored.slug, error = %err, "retry scrape failed");
                tracker.entity_failed(&stored.url, err.to_string());
                outcome.errored.push(stored.slug);
                continue;
            }
        };

        let verdict = gate::evaluate(&record);
        if !verdict.accepted {
            info!(slug = %record.slug, reason = %verdict.reason, "still no narrative; leaving in retry");
            tracker.state.retried += 1;
            outcome.still_empty.push(record.slug);
            continue;
        }

        record.status = IngestionStatus::Scraped;
        record.scraped_at = Some(Utc::now());
        if let Some(fetcher) = media {
            attach_media(store, fetcher, &mut record).await;
        }
        match store.upsert(&record).await {
            Ok(_) => {
                tracker.entity_persisted(&record.slug, IngestionStatus::Scraped);
                outcome.recovered.push(record.slug);
            }
            Err(err) => {
                tracker.entity_failed(&record.url, err.to_string());
                outcome.errored.push(record.slug);
            }
        }
    }

    info!(
        recovered = outcome.recovered.len(),
        still_empty = outcome.still_empty.len(),
        errored = outcome.errored.len(),
        "retry pass complete"
    );
    Ok(outcome)
}
