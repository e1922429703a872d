use std::path::PathBuf;

use anyhow::Result;
use awin_adapters::{
    build_listing_url, discover_total_pages, fetch_page, page_url_for, scrape_detail,
    BrowserPage, ListingContext, ListingFilters,
};
use awin_core::{CampaignRecord, EntityStub, IngestionStatus};
use awin_storage::{JobScope, MediaFetcher, NotesStore};
use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::CrawlConfig;
use crate::enrich::{EnrichmentOutcome, EnrichmentStage};
use crate::gate;
use crate::media::attach_media;
use crate::merge::merge;
use crate::progress::{Phase, ProgressEvent, ProgressTracker, RunKind, RunProgress, RunSummary};
use crate::report::write_run_report;
use crate::resume::filter_unseen;
use crate::retry::{retry_failed, RetryOutcome};

/// Where the listing walk starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingTarget {
    Filters(ListingFilters),
    /// Operator-supplied catalog URL; pages are derived from it.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub target: ListingTarget,
    pub job_id: Option<String>,
    pub max_pages: Option<u32>,
}

impl CrawlRequest {
    pub fn for_filters(filters: ListingFilters) -> Self {
        Self {
            target: ListingTarget::Filters(filters),
            job_id: None,
            max_pages: None,
        }
    }

    fn filters(&self) -> ListingFilters {
        match &self.target {
            ListingTarget::Filters(filters) => filters.clone(),
            ListingTarget::Url(_) => ListingFilters::default(),
        }
    }

    fn page_url(&self, base: &str, page: u32) -> String {
        match &self.target {
            ListingTarget::Filters(filters) => build_listing_url(base, filters, page),
            ListingTarget::Url(url) => page_url_for(url, page),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub summary: RunSummary,
    pub progress: RunProgress,
    pub persisted: Vec<String>,
    pub marked_retry: Vec<String>,
    pub dropped_unranked: Vec<String>,
    pub enrichment: Option<EnrichmentOutcome>,
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RetryReport {
    pub summary: RunSummary,
    pub outcome: RetryOutcome,
    pub report_dir: PathBuf,
}

/// Listing walk, merge, resume filter, detail scrape, gate and persistence
/// over one browser page and one store.
pub struct CrawlPipeline<S> {
    config: CrawlConfig,
    store: S,
    media: Option<MediaFetcher>,
    enrichment: Option<EnrichmentStage>,
    events: Option<UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl<S: NotesStore> CrawlPipeline<S> {
    pub fn new(config: CrawlConfig, store: S) -> Result<Self> {
        let media = if config.download_images {
            Some(MediaFetcher::new(config.media_options())?)
        } else {
            None
        };
        Ok(Self {
            config,
            store,
            media,
            enrichment: None,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_enrichment(mut self, stage: EnrichmentStage) -> Self {
        self.enrichment = Some(stage);
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub async fn crawl<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        request: &CrawlRequest,
    ) -> Result<CrawlReport> {
        let mut tracker =
            ProgressTracker::new(RunKind::Crawl, request.job_id.clone(), self.events.clone());
        let run_id = tracker.run_id();
        async {
            let stubs = self.walk_listing(page, request, &mut tracker).await;

            let merged = merge(&stubs);
            let seen = self.store.known_slugs(&JobScope::All).await?;
            let before = merged.records.len();
            let fresh = filter_unseen(merged.records, &seen);
            tracker.state.stubs = stubs.len();
            tracker.state.unique_entities = merged.unique;
            tracker.state.dropped_unranked = merged.dropped_unranked.len();
            tracker.state.skipped_existing = before - fresh.len();
            tracker.state.total_entities = fresh.len();
            tracker.emit(ProgressEvent::Merged {
                stubs: stubs.len(),
                unique: merged.unique,
                skipped: before - fresh.len(),
            });
            info!(
                to_scrape = fresh.len(),
                skipped_existing = before - fresh.len(),
                "listing phase complete"
            );

            tracker.enter(Phase::Scraping);
            let mut persisted = Vec::new();
            let mut marked_retry = Vec::new();
            for record in fresh {
                if self.cancel.is_cancelled() {
                    info!("crawl cancelled between entities");
                    break;
                }
                match self.scrape_one(page, record, request, &mut tracker).await {
                    Some((slug, IngestionStatus::Retry)) => marked_retry.push(slug),
                    Some((slug, _)) => persisted.push(slug),
                    None => {}
                }
            }

            let enrichment = match &self.enrichment {
                Some(stage) if !self.cancel.is_cancelled() => {
                    let scope = JobScope::from_option(request.job_id.clone());
                    match stage.enrich_pending(&self.store, &scope).await {
                        Ok(outcome) => {
                            tracker.state.enriched = outcome.enriched.len();
                            Some(outcome)
                        }
                        Err(err) => {
                            warn!(error = %err, "enrichment stage failed");
                            tracker.state.record_error(format!("enrichment: {err:#}"));
                            None
                        }
                    }
                }
                _ => None,
            };

            let (summary, progress) = tracker.finish(self.cancel.is_cancelled());
            let report_dir = write_run_report(&self.config.reports_dir, &summary).await?;
            info!(headline = %summary.headline(), "crawl finished");
            Ok::<_, anyhow::Error>(CrawlReport {
                summary,
                progress,
                persisted,
                marked_retry,
                dropped_unranked: merged.dropped_unranked,
                enrichment,
                report_dir,
            })
        }
        .instrument(info_span!("crawl", %run_id, job = request.job_id.as_deref().unwrap_or("-")))
        .await
    }

    /// Page 1 first, then the discovered page count (capped), each page by URL.
    async fn walk_listing<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        request: &CrawlRequest,
        tracker: &mut ProgressTracker,
    ) -> Vec<EntityStub> {
        tracker.enter(Phase::Listing);
        let filters = request.filters();
        let options = self.config.listing_options();
        let mut stubs = Vec::new();

        let first_url = request.page_url(&self.config.base_url, 1);
        let first_ctx = ListingContext::for_filters(&filters, 1);
        let mut total = match fetch_page(page, &first_url, &options, &first_ctx).await {
            Ok(listing) => {
                tracker.state.listed_pages += 1;
                tracker.emit(ProgressEvent::PageListed {
                    page: 1,
                    stubs: listing.stubs.len(),
                });
                stubs.extend(listing.stubs);
                match discover_total_pages(page, &self.config.wait).await {
                    Ok(total) => total,
                    Err(err) => {
                        warn!(error = %err, "pagination discovery failed; assuming one page");
                        1
                    }
                }
            }
            Err(err) => {
                self.page_failed(tracker, 1, err.to_string());
                1
            }
        };
        if let Some(cap) = request.max_pages {
            total = total.min(cap.max(1));
        }
        tracker.state.total_pages = total;
        tracker.emit(ProgressEvent::ListingDiscovered { total_pages: total });
        info!(total_pages = total, url = %first_url, "listing walk started");

        for number in 2..=total {
            if self.cancel.is_cancelled() {
                info!(page = number, "listing walk cancelled");
                break;
            }
            let url = request.page_url(&self.config.base_url, number);
            tracker.state.current_url = url.clone();
            let ctx = ListingContext::for_filters(&filters, number);
            match fetch_page(page, &url, &options, &ctx).await {
                Ok(listing) => {
                    tracker.state.listed_pages += 1;
                    tracker.emit(ProgressEvent::PageListed {
                        page: number,
                        stubs: listing.stubs.len(),
                    });
                    stubs.extend(listing.stubs);
                }
                Err(err) => self.page_failed(tracker, number, err.to_string()),
            }
        }
        stubs
    }

    fn page_failed(&self, tracker: &mut ProgressTracker, page: u32, error: String) {
        warn!(page, error = %error, "listing page failed");
        tracker.state.failed_pages += 1;
        tracker
            .state
            .record_error(format!("listing page {page}: {error}"));
        tracker.emit(ProgressEvent::PageFailed { page, error });
    }

    /// Scrape, gate and persist one entity. Errors are recorded, never raised.
    async fn scrape_one<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        listed: CampaignRecord,
        request: &CrawlRequest,
        tracker: &mut ProgressTracker,
    ) -> Option<(String, IngestionStatus)> {
        tracker.state.current_url = listed.url.clone();
        let detail = self.config.detail_options();
        let mut record = match scrape_detail(page, &listed, &detail)
            .instrument(info_span!("entity", slug = %listed.slug))
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!(slug = %listed.slug, error = %err, "detail scrape failed");
                tracker.entity_failed(&listed.url, err.to_string());
                return None;
            }
        };
        record.job_id = request.job_id.clone();
        record.scraped_at = Some(Utc::now());

        let verdict = gate::evaluate(&record);
        if verdict.accepted {
            record.status = IngestionStatus::Scraped;
            if let Some(fetcher) = &self.media {
                attach_media(&self.store, fetcher, &mut record).await;
            }
        } else {
            warn!(slug = %record.slug, reason = %verdict.reason, "no content; marking retry");
            record.status = IngestionStatus::Retry;
            tracker
                .state
                .record_error(format!("no content: {}", record.slug));
        }

        match self.store.upsert(&record).await {
            Ok(_) => {
                tracker.entity_persisted(&record.slug, record.status);
                Some((record.slug, record.status))
            }
            Err(err) => {
                tracker.entity_failed(&record.url, err.to_string());
                None
            }
        }
    }

    /// Second pass over `retry` records with the longer timeout.
    pub async fn retry<P: BrowserPage + ?Sized>(
        &self,
        page: &P,
        scope: &JobScope,
    ) -> Result<RetryReport> {
        let job_id = match scope {
            JobScope::All => None,
            JobScope::Job(id) => Some(id.clone()),
        };
        let mut tracker = ProgressTracker::new(RunKind::Retry, job_id, self.events.clone());
        let run_id = tracker.run_id();
        let outcome = retry_failed(
            page,
            &self.store,
            scope,
            &self.config.retry_options(),
            self.media.as_ref(),
            &self.cancel,
            &mut tracker,
        )
        .instrument(info_span!("retry", %run_id))
        .await?;
        let (summary, _) = tracker.finish(outcome.cancelled);
        let report_dir = write_run_report(&self.config.reports_dir, &summary).await?;
        info!(headline = %summary.headline(), "retry finished");
        Ok(RetryReport {
            summary,
            outcome,
            report_dir,
        })
    }
}
