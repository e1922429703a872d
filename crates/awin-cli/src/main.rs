use std::path::Path;

use anyhow::{anyhow, Context, Result};
use awin_adapters::{acquire_session, ListingFilters, Session};
use awin_core::AwardLevel;
use awin_storage::{JobScope, VaultStore};
use awin_sync::{
    audit, mark_paywall, repair, CrawlConfig, CrawlPipeline, CrawlRequest, ListingTarget,
    ProgressEvent, RunSummary,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "awin")]
#[command(about = "Award-winning campaign ingest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk the catalog listing and scrape every new awarded campaign.
    Crawl {
        #[arg(long)]
        festival: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        /// Award tier to include; repeatable (grand-prix, gold, silver, bronze).
        #[arg(long = "tier")]
        tiers: Vec<String>,
        /// Raw listing URL; overrides the facet flags.
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Re-scrape records marked retry.
    Retry {
        #[arg(long)]
        job: Option<String>,
    },
    /// Audit persisted records; --fix routes failures back to retry.
    Healthcheck {
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        fix: bool,
    },
    /// Verify the saved browser session is still logged in.
    SessionCheck,
    /// Reclassify a retry record as paywalled.
    MarkPaywall { slug: String },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("awin=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn parse_tiers(raw: &[String]) -> Result<Vec<AwardLevel>> {
    raw.iter()
        .flat_map(|value| value.split(','))
        .filter(|value| !value.trim().is_empty())
        .map(|value| match AwardLevel::from_label(value) {
            Some(level) => Ok(level),
            None => Err(anyhow!(
                "unknown award tier {value:?}; expected grand-prix, gold, silver or bronze"
            )),
        })
        .collect()
}

/// Cancel `token` on Ctrl-C; the run stops at the next page or entity boundary.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current entity");
            token.cancel();
        }
    });
}

fn log_events(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::PhaseChanged(phase) => info!(?phase, "phase"),
                ProgressEvent::EntityPersisted { slug, status } => {
                    debug!(slug = %slug, status = %status, "persisted")
                }
                ProgressEvent::Finished(_) => break,
                other => debug!(?other, "progress"),
            }
        }
    });
}

async fn open_session(config: &CrawlConfig) -> Result<Session> {
    let session = acquire_session(&config.session_state, &config.session_options()).await?;
    if let Err(err) = session.check_authenticated(&config.session_options()).await {
        if let Err(close_err) = session.close().await {
            warn!(error = %close_err, "closing browser failed");
        }
        return Err(err.into());
    }
    Ok(session)
}

fn print_summary(label: &str, summary: &RunSummary, reports: &Path) {
    println!(
        "{label} complete: run_id={} succeeded={} failed={} retry={} cancelled={} reports={}",
        summary.run_id,
        summary.succeeded,
        summary.failed,
        summary.retried,
        summary.cancelled,
        reports.display()
    );
    for error in summary.recent_errors.iter().rev().take(5) {
        eprintln!("  recent error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = CrawlConfig::load(Path::new(".")).context("loading configuration")?;
    let store = VaultStore::new(config.vault_dir.clone());

    match cli.command {
        Commands::Crawl {
            festival,
            year,
            tiers,
            url,
            job,
            max_pages,
        } => {
            let target = match url {
                Some(url) => ListingTarget::Url(url),
                None => ListingTarget::Filters(ListingFilters {
                    festival,
                    year,
                    tiers: parse_tiers(&tiers)?,
                }),
            };
            let request = CrawlRequest {
                target,
                job_id: job,
                max_pages,
            };
            let (tx, rx) = mpsc::unbounded_channel();
            log_events(rx);
            let pipeline = CrawlPipeline::new(config.clone(), store)?.with_events(tx);
            cancel_on_ctrl_c(pipeline.cancellation());

            let session = open_session(&config).await?;
            let result = pipeline.crawl(&session, &request).await;
            session.close().await?;
            let report = result?;
            print_summary("crawl", &report.summary, &report.report_dir);
            if !report.dropped_unranked.is_empty() {
                println!("  skipped {} shortlist-only entities", report.dropped_unranked.len());
            }
        }
        Commands::Retry { job } => {
            let pipeline = CrawlPipeline::new(config.clone(), store)?;
            cancel_on_ctrl_c(pipeline.cancellation());

            let session = open_session(&config).await?;
            let result = pipeline.retry(&session, &JobScope::from_option(job)).await;
            session.close().await?;
            let report = result?;
            print_summary("retry", &report.summary, &report.report_dir);
        }
        Commands::Healthcheck { job, fix } => {
            let report = audit(&store, &JobScope::from_option(job)).await?;
            println!(
                "healthcheck: total={} ok={} parser_failure={} ghost={} paywall={} processed={} retry={}",
                report.total(),
                report.ok.len(),
                report.parser_failure.len(),
                report.ghost.len(),
                report.paywall.len(),
                report.already_processed.len(),
                report.already_retry.len()
            );
            for slug in report.parser_failure.iter().chain(&report.ghost) {
                println!("  needs retry: {slug}");
            }
            if fix {
                let outcome = repair(&store, &report).await;
                println!("fixed {} notes (status -> retry)", outcome.fixed.len());
                for slug in &outcome.skipped {
                    eprintln!("  unreadable, fix by hand: {slug}");
                }
                for (slug, error) in &outcome.errors {
                    eprintln!("  repair failed for {slug}: {error}");
                }
                if !outcome.errors.is_empty() {
                    return Err(anyhow!("{} repairs failed", outcome.errors.len()));
                }
            }
        }
        Commands::SessionCheck => {
            let session = open_session(&config).await?;
            session.close().await?;
            println!("session ok: {}", config.session_state.display());
        }
        Commands::MarkPaywall { slug } => {
            let record = mark_paywall(&store, &slug).await?;
            println!("{} -> {}", record.slug, record.status);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_accept_repeats_and_commas() {
        let tiers = parse_tiers(&["gold,silver".to_string(), "grand-prix".to_string()]).unwrap();
        assert_eq!(tiers, vec![AwardLevel::Gold, AwardLevel::Silver, AwardLevel::GrandPrix]);
        assert!(parse_tiers(&["shortlist".to_string()]).is_err());
    }

    #[test]
    fn crawl_flags_parse() {
        let cli = Cli::parse_from([
            "awin", "crawl", "--festival", "Cannes Lions", "--year", "2025", "--tier", "gold",
            "--max-pages", "3",
        ]);
        match cli.command {
            Commands::Crawl { festival, year, tiers, max_pages, .. } => {
                assert_eq!(festival.as_deref(), Some("Cannes Lions"));
                assert_eq!(year, Some(2025));
                assert_eq!(tiers, vec!["gold".to_string()]);
                assert_eq!(max_pages, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
