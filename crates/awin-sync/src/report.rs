use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::progress::RunSummary;

/// Write `<reports_dir>/<run_id>/run_summary.json` and `brief.md`; returns the run directory.
pub async fn write_run_report(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("run_summary.json"), json)
        .await
        .context("writing run_summary.json")?;
    fs::write(run_dir.join("brief.md"), render_brief(summary))
        .await
        .context("writing brief.md")?;
    Ok(run_dir)
}

pub fn render_brief(summary: &RunSummary) -> String {
    let timings = summary
        .phase_timings
        .iter()
        .map(|t| format!("- {:?}: {:.1}s", t.phase, t.seconds))
        .collect::<Vec<_>>()
        .join("\n");
    let errors = if summary.recent_errors.is_empty() {
        "- none".to_string()
    } else {
        summary
            .recent_errors
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "# AWIN {:?} run\n\n- Run ID: `{}`\n- Job: {}\n- Started: {}\n- Finished: {}\n- Cancelled: {}\n- Listing pages: {}/{} ({} failed)\n- Unique entities: {} ({} unranked dropped, {} already stored)\n- Attempted: {}\n- Succeeded: {}\n- Marked retry: {}\n- Failed: {}\n- Enriched: {}\n\n## Phase Timings\n{}\n\n## Recent Errors\n{}\n",
        summary.kind,
        summary.run_id,
        summary.job_id.as_deref().unwrap_or("-"),
        summary.started_at,
        summary.finished_at,
        summary.cancelled,
        summary.listed_pages,
        summary.total_pages,
        summary.failed_pages,
        summary.unique_entities,
        summary.dropped_unranked,
        summary.skipped_existing,
        summary.attempted,
        summary.succeeded,
        summary.retried,
        summary.failed,
        summary.enriched,
        timings,
        errors,
    )
}
