use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use awin_adapters::{build_listing_url, ListingFilters, ScriptedPage, DEFAULT_LISTING_BASE};
use awin_core::{AwardLevel, AwardSource, CampaignRecord, EntityStub, IngestionStatus};
use awin_storage::{JobScope, NotesStore, StoreError, StoredNote, UpsertOutcome, VaultStore};
use awin_sync::{
    audit, evaluate, mark_paywall, repair, AuditReport, CompletionService, CrawlConfig,
    CrawlPipeline, CrawlRequest, EnrichmentStage, ProgressEvent,
};
use tokio_util::sync::CancellationToken;

const ALPHA: &str = "https://www.lovethework.com/work/entries/alpha-1";
const SHORT: &str = "https://www.lovethework.com/work/entries/short-9";
const EMPTY: &str = "https://www.lovethework.com/work/entries/empty-5";
const BETA: &str = "https://www.lovethework.com/work/entries/beta-2";

#[derive(Default)]
struct CountingCompletion {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionService for CountingCompletion {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Case study ({} prompt chars)", prompt.len()))
    }
}

fn filters() -> ListingFilters {
    ListingFilters {
        festival: Some("Cannes Lions".to_string()),
        year: Some(2025),
        tiers: vec![AwardLevel::Gold, AwardLevel::Silver],
    }
}

fn listing_url(page: u32) -> String {
    build_listing_url(DEFAULT_LISTING_BASE, &filters(), page)
}

fn card(href: &str, title: &str, tier_class: &str) -> String {
    format!(
        r#"<div>
            <a href="{href}"><img src="/images/{title}.jpg"></a>
            <span data-testid="tag" class="tag {tier_class}"></span>
            <h3>{title}</h3>
            <p class="typography typography--size_body-small">Film Craft</p>
            <p class="typography typography--size_body-small">Acme, Agency X, Paris</p>
        </div>"#
    )
}

fn listing(cards: &[String], pagination: &str) -> String {
    format!(
        r#"<html><body><div data-testid="group-grid">{}</div>{pagination}</body></html>"#,
        cards.join("\n")
    )
}

fn detail(title: &str, narrative: &str) -> String {
    format!(
        r#"<html><body><main>
            <h1>{title}</h1>
            <div class="campaign-description">{narrative}</div>
            <img src="/media/{title}-hero.jpg" width="1200">
        </main></body></html>"#
    )
}

fn pipeline(dir: &Path) -> CrawlPipeline<VaultStore> {
    let config = CrawlConfig::immediate(dir);
    let store = VaultStore::new(dir.join("vault"));
    CrawlPipeline::new(config, store).unwrap()
}

fn request(job: &str) -> CrawlRequest {
    CrawlRequest {
        job_id: Some(job.to_string()),
        ..CrawlRequest::for_filters(filters())
    }
}

/// Page 1: Alpha (Gold) and Short (Shortlist). Page 2: Alpha again (Silver).
fn two_page_site() -> ScriptedPage {
    ScriptedPage::new()
        .with_page(
            listing_url(1),
            listing(
                &[
                    card("/work/entries/alpha-1", "Alpha", "tag--type_gold"),
                    card("/work/entries/short-9", "Short", "tag--type_shortlist"),
                ],
                r#"<nav aria-label="Pagination"><a href="?page=1">1</a><a href="?page=2">2</a></nav>"#,
            ),
        )
        .with_page(
            listing_url(2),
            listing(&[card("/work/entries/alpha-1/", "Alpha", "tag--type_silver")], ""),
        )
        .with_page(ALPHA, detail("Alpha", "<p>A campaign that made tap water famous.</p>"))
}

fn inbox_files(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("vault").join("inbox"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn merged_entity_is_scraped_once_and_shortlist_only_is_never_visited() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let pipeline = pipeline(dir.path());

    let report = pipeline.crawl(&page, &request("job-a")).await.unwrap();

    assert_eq!(report.summary.total_pages, 2);
    assert_eq!(report.summary.unique_entities, 2);
    assert_eq!(report.dropped_unranked, vec!["short-9".to_string()]);
    assert_eq!(report.persisted, vec!["alpha-1".to_string()]);
    assert!(!page.visits().iter().any(|url| url == SHORT));
    assert_eq!(page.visits().iter().filter(|url| *url == ALPHA).count(), 1);

    let stored = pipeline.store().load("alpha-1").await.unwrap().unwrap();
    assert_eq!(stored.status, IngestionStatus::Scraped);
    assert_eq!(stored.job_id.as_deref(), Some("job-a"));
    assert_eq!(stored.year, Some(2025));
    assert_eq!(stored.award_source, AwardSource::Listing);
    let levels: Vec<_> = stored.awards.iter().map(|a| a.level).collect();
    assert_eq!(levels, vec![AwardLevel::Gold, AwardLevel::Silver]);
    assert!(stored.scraped_at.is_some());
    assert_eq!(inbox_files(dir.path()), 1);

    assert!(report.report_dir.join("run_summary.json").exists());
    assert!(report.report_dir.join("brief.md").exists());
}

#[tokio::test]
async fn second_crawl_skips_persisted_slugs() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let pipeline = pipeline(dir.path());

    pipeline.crawl(&page, &request("job-a")).await.unwrap();
    let again = pipeline.crawl(&page, &request("job-a")).await.unwrap();

    assert_eq!(again.summary.skipped_existing, 1);
    assert_eq!(again.summary.attempted, 0);
    assert!(again.persisted.is_empty());
    assert_eq!(page.visits().iter().filter(|url| *url == ALPHA).count(), 1);
}

#[tokio::test]
async fn failed_listing_page_is_recorded_and_walk_continues() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site().failing(listing_url(2));
    let pipeline = pipeline(dir.path());

    let report = pipeline.crawl(&page, &request("job-a")).await.unwrap();

    assert_eq!(report.summary.failed_pages, 1);
    assert_eq!(report.summary.listed_pages, 1);
    assert!(report.summary.recent_errors[0].starts_with("listing page 2"));
    assert_eq!(report.persisted, vec!["alpha-1".to_string()]);
    let stored = pipeline.store().load("alpha-1").await.unwrap().unwrap();
    assert_eq!(stored.awards.len(), 1);
}

#[tokio::test]
async fn failed_detail_page_does_not_affect_the_next_entity() {
    let dir = tempfile::tempdir().unwrap();
    let page = ScriptedPage::new()
        .with_page(
            listing_url(1),
            listing(
                &[
                    card("/work/entries/beta-2", "Beta", "tag--type_gold"),
                    card("/work/entries/alpha-1", "Alpha", "tag--type_silver"),
                ],
                "",
            ),
        )
        .with_page(ALPHA, detail("Alpha", "<p>A campaign that made tap water famous.</p>"))
        .failing(BETA);
    let pipeline = pipeline(dir.path());

    let report = pipeline.crawl(&page, &request("job-a")).await.unwrap();

    assert_eq!(report.summary.attempted, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.persisted, vec!["alpha-1".to_string()]);
    assert!(report.progress.recent_errors.iter().any(|e| e.starts_with(BETA)));
    assert!(pipeline.store().load("beta-2").await.unwrap().is_none());
    assert_eq!(
        pipeline.store().load("alpha-1").await.unwrap().unwrap().status,
        IngestionStatus::Scraped
    );
    let visits = page.visits();
    let beta_at = visits.iter().position(|url| url == BETA).unwrap();
    let alpha_at = visits.iter().position(|url| url == ALPHA).unwrap();
    assert!(beta_at < alpha_at);
}

#[tokio::test]
async fn max_pages_caps_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let pipeline = pipeline(dir.path());
    let request = CrawlRequest {
        max_pages: Some(1),
        ..request("job-a")
    };

    let report = pipeline.crawl(&page, &request).await.unwrap();

    assert_eq!(report.summary.total_pages, 1);
    assert!(!page.visits().contains(&listing_url(2)));
}

fn empty_entity_site() -> ScriptedPage {
    ScriptedPage::new()
        .with_page(
            listing_url(1),
            listing(&[card("/work/entries/empty-5", "Empty", "tag--type_gold")], ""),
        )
        .with_page(EMPTY, detail("Empty", "   "))
}

#[tokio::test]
async fn empty_narrative_goes_to_retry_then_recovers_then_enriches() {
    let dir = tempfile::tempdir().unwrap();
    let page = empty_entity_site();
    let completion = Arc::new(CountingCompletion::default());
    let pipeline =
        pipeline(dir.path()).with_enrichment(EnrichmentStage::new(completion.clone()));

    // First pass: no content, persisted as retry, enrichment never called.
    let report = pipeline.crawl(&page, &request("job-b")).await.unwrap();
    assert_eq!(report.marked_retry, vec!["empty-5".to_string()]);
    assert_eq!(report.summary.retried, 1);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    let stored = pipeline.store().load("empty-5").await.unwrap().unwrap();
    assert_eq!(stored.status, IngestionStatus::Retry);
    assert!(!evaluate(&stored).accepted);

    // Retry pass: the page now renders its narrative.
    page.set_page(EMPTY, detail("Empty", "<p>Now with a full case study.</p>"));
    let retry = pipeline
        .retry(&page, &JobScope::Job("job-b".to_string()))
        .await
        .unwrap();
    assert_eq!(retry.outcome.recovered, vec!["empty-5".to_string()]);
    let stored = pipeline.store().load("empty-5").await.unwrap().unwrap();
    assert_eq!(stored.status, IngestionStatus::Scraped);
    assert!(evaluate(&stored).accepted);
    assert_eq!(stored.description, "Now with a full case study.");
    assert_eq!(inbox_files(dir.path()), 1);

    let stage = EnrichmentStage::new(completion.clone());
    let outcome = stage
        .enrich_pending(pipeline.store(), &JobScope::All)
        .await
        .unwrap();
    assert_eq!(outcome.enriched, vec!["empty-5".to_string()]);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
    let stored = pipeline.store().load("empty-5").await.unwrap().unwrap();
    assert_eq!(stored.status, IngestionStatus::Enriched);
    assert!(pipeline.store().has_enrichment("empty-5").await.unwrap());
}

#[tokio::test]
async fn retry_that_is_still_empty_leaves_the_note_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let page = empty_entity_site();
    let pipeline = pipeline(dir.path());
    pipeline.crawl(&page, &request("job-b")).await.unwrap();
    let before = std::fs::read_to_string(dir.path().join("vault/inbox/empty-5.md")).unwrap();

    let retry = pipeline.retry(&page, &JobScope::All).await.unwrap();

    assert_eq!(retry.outcome.still_empty, vec!["empty-5".to_string()]);
    let after = std::fs::read_to_string(dir.path().join("vault/inbox/empty-5.md")).unwrap();
    assert_eq!(before, after);

    let paywalled = mark_paywall(pipeline.store(), "empty-5").await.unwrap();
    assert_eq!(paywalled.status, IngestionStatus::Paywall);
}

#[tokio::test]
async fn ghost_enrichment_is_repaired_back_to_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = VaultStore::new(dir.path().join("vault"));
    let mut ghost =
        CampaignRecord::from_stub(&EntityStub::new("https://www.lovethework.com/work/entries/ghost-7"));
    ghost.job_id = Some("job-d".to_string());
    store.upsert(&ghost).await.unwrap();
    store.transition("ghost-7", IngestionStatus::Enriched).await.unwrap();
    store.write_enrichment("ghost-7", "# Ghost\n").await.unwrap();

    let scope = JobScope::Job("job-d".to_string());
    let first = audit(&store, &scope).await.unwrap();
    let second = audit(&store, &scope).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.ghost, vec!["ghost-7".to_string()]);

    let outcome = repair(&store, &first).await;
    assert_eq!(outcome.fixed, vec!["ghost-7".to_string()]);
    assert!(outcome.errors.is_empty());
    let repaired = store.load("ghost-7").await.unwrap().unwrap();
    assert_eq!(repaired.status, IngestionStatus::Retry);
    assert!(!store.has_enrichment("ghost-7").await.unwrap());

    let after = audit(&store, &scope).await.unwrap();
    assert_eq!(after.already_retry, vec!["ghost-7".to_string()]);
    assert!(after.ghost.is_empty());
}

#[tokio::test]
async fn scraped_without_narrative_is_a_parser_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = VaultStore::new(dir.path().join("vault"));
    let record =
        CampaignRecord::from_stub(&EntityStub::new("https://www.lovethework.com/work/entries/bare-3"));
    store.upsert(&record).await.unwrap();
    std::fs::write(dir.path().join("vault/inbox/broken.md"), "no frontmatter here").unwrap();

    let report = audit(&store, &JobScope::All).await.unwrap();
    assert_eq!(report.parser_failure, vec!["bare-3".to_string(), "broken".to_string()]);
    assert_eq!(report.unreadable, vec!["broken".to_string()]);

    let scoped = audit(&store, &JobScope::Job("job-e".to_string())).await.unwrap();
    assert_eq!(scoped.total(), 0);
    assert!(scoped.unreadable.is_empty());

    let outcome = repair(&store, &report).await;
    assert_eq!(outcome.fixed, vec!["bare-3".to_string()]);
    assert_eq!(outcome.skipped, vec!["broken".to_string()]);
    assert_eq!(
        store.load("bare-3").await.unwrap().unwrap().status,
        IngestionStatus::Retry
    );
}

#[tokio::test]
async fn cancellation_stops_before_detail_pages() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = pipeline(dir.path()).with_cancellation(cancel);

    let report = pipeline.crawl(&page, &request("job-c")).await.unwrap();

    assert!(report.summary.cancelled);
    assert!(report.persisted.is_empty());
    assert!(!page.visits().iter().any(|url| url == ALPHA));
    assert!(!page.visits().contains(&listing_url(2)));
}

#[tokio::test]
async fn progress_events_follow_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pipeline = pipeline(dir.path()).with_events(tx);

    pipeline.crawl(&page, &request("job-a")).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&ProgressEvent::ListingDiscovered { total_pages: 2 }));
    assert!(events.contains(&ProgressEvent::Merged {
        stubs: 3,
        unique: 2,
        skipped: 0,
    }));
    assert!(events.contains(&ProgressEvent::EntityPersisted {
        slug: "alpha-1".to_string(),
        status: IngestionStatus::Scraped,
    }));
    assert!(matches!(events.last(), Some(ProgressEvent::Finished(summary)) if summary.succeeded == 1));
}

#[tokio::test]
async fn repair_continues_past_a_failing_slug() {
    let dir = tempfile::tempdir().unwrap();
    let store = VaultStore::new(dir.path().join("vault"));
    let record =
        CampaignRecord::from_stub(&EntityStub::new("https://www.lovethework.com/work/entries/bare-3"));
    store.upsert(&record).await.unwrap();
    let report = AuditReport {
        parser_failure: vec!["gone-0".to_string(), "bare-3".to_string()],
        ..AuditReport::default()
    };

    let outcome = repair(&store, &report).await;

    assert_eq!(outcome.fixed, vec!["bare-3".to_string()]);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].0, "gone-0");
    assert_eq!(
        store.load("bare-3").await.unwrap().unwrap().status,
        IngestionStatus::Retry
    );
}

/// Vault whose `scraped` listing fails, so the enrichment stage errors out.
struct UnlistableVault(VaultStore);

#[async_trait]
impl NotesStore for UnlistableVault {
    async fn load(&self, slug: &str) -> Result<Option<CampaignRecord>, StoreError> {
        self.0.load(slug).await
    }

    async fn scan(&self, scope: &JobScope) -> Result<Vec<StoredNote>, StoreError> {
        self.0.scan(scope).await
    }

    async fn upsert(&self, record: &CampaignRecord) -> Result<UpsertOutcome, StoreError> {
        self.0.upsert(record).await
    }

    async fn transition(
        &self,
        slug: &str,
        to: IngestionStatus,
    ) -> Result<CampaignRecord, StoreError> {
        self.0.transition(slug, to).await
    }

    async fn write_enrichment(&self, slug: &str, body: &str) -> Result<(), StoreError> {
        self.0.write_enrichment(slug, body).await
    }

    async fn delete_enrichment(&self, slug: &str) -> Result<bool, StoreError> {
        self.0.delete_enrichment(slug).await
    }

    async fn has_enrichment(&self, slug: &str) -> Result<bool, StoreError> {
        self.0.has_enrichment(slug).await
    }

    async fn store_media(
        &self,
        slug: &str,
        index: usize,
        source_url: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        self.0.store_media(slug, index, source_url, bytes).await
    }

    async fn list_with_status(
        &self,
        _scope: &JobScope,
        _status: IngestionStatus,
    ) -> Result<Vec<CampaignRecord>, StoreError> {
        Err(StoreError::NotFound("inbox listing".to_string()))
    }
}

#[tokio::test]
async fn enrichment_failure_still_writes_the_run_report() {
    let dir = tempfile::tempdir().unwrap();
    let page = two_page_site();
    let completion = Arc::new(CountingCompletion::default());
    let store = UnlistableVault(VaultStore::new(dir.path().join("vault")));
    let pipeline = CrawlPipeline::new(CrawlConfig::immediate(dir.path()), store)
        .unwrap()
        .with_enrichment(EnrichmentStage::new(completion.clone()));

    let report = pipeline.crawl(&page, &request("job-f")).await.unwrap();

    assert!(report.enrichment.is_none());
    assert_eq!(report.persisted, vec!["alpha-1".to_string()]);
    assert!(report.summary.recent_errors.iter().any(|e| e.starts_with("enrichment:")));
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    let written = std::fs::read_to_string(report.report_dir.join("run_summary.json")).unwrap();
    assert!(written.contains("enrichment:"));
}
