//! Run progress: a value owned by the running pipeline plus an optional event
//! stream for live observers.

use std::collections::VecDeque;
use std::time::Instant;

use awin_core::IngestionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub const MAX_RECENT_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Listing,
    Scraping,
    Retrying,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Crawl,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    PhaseChanged(Phase),
    ListingDiscovered { total_pages: u32 },
    PageListed { page: u32, stubs: usize },
    PageFailed { page: u32, error: String },
    Merged { stubs: usize, unique: usize, skipped: usize },
    EntityPersisted { slug: String, status: IngestionStatus },
    EntityFailed { target: String, error: String },
    Finished(RunSummary),
}

/// Monotonic counters for one run. Only the pipeline mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub phase: Phase,
    pub total_pages: u32,
    pub listed_pages: u32,
    pub failed_pages: u32,
    pub stubs: usize,
    pub unique_entities: usize,
    pub dropped_unranked: usize,
    pub skipped_existing: usize,
    pub total_entities: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub enriched: usize,
    pub current_url: String,
    pub recent_errors: VecDeque<String>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            total_pages: 0,
            listed_pages: 0,
            failed_pages: 0,
            stubs: 0,
            unique_entities: 0,
            dropped_unranked: 0,
            skipped_existing: 0,
            total_entities: 0,
            succeeded: 0,
            retried: 0,
            failed: 0,
            enriched: 0,
            current_url: String::new(),
            recent_errors: VecDeque::new(),
        }
    }
}

impl RunProgress {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.recent_errors.push_back(message.into());
        while self.recent_errors.len() > MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.failed
    }

    pub fn percent(&self) -> u8 {
        if self.total_entities == 0 {
            return 0;
        }
        ((self.processed() * 100) / self.total_entities).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub seconds: f64,
}

/// Final account of a run; also the payload of `run_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub total_pages: u32,
    pub listed_pages: u32,
    pub failed_pages: u32,
    pub unique_entities: usize,
    pub dropped_unranked: usize,
    pub skipped_existing: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub enriched: usize,
    pub phase_timings: Vec<PhaseTiming>,
    pub recent_errors: Vec<String>,
}

impl RunSummary {
    pub fn headline(&self) -> String {
        format!(
            "{:?} run {}: {} succeeded, {} failed, {} marked retry{}",
            self.kind,
            self.run_id,
            self.succeeded,
            self.failed,
            self.retried,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Owns the [`RunProgress`] of a run and mirrors changes onto the event channel.
#[derive(Debug)]
pub struct ProgressTracker {
    run_id: Uuid,
    kind: RunKind,
    job_id: Option<String>,
    started_at: DateTime<Utc>,
    phase_started: Instant,
    timings: Vec<PhaseTiming>,
    events: Option<UnboundedSender<ProgressEvent>>,
    pub state: RunProgress,
}

impl ProgressTracker {
    pub fn new(
        kind: RunKind,
        job_id: Option<String>,
        events: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            job_id,
            started_at: Utc::now(),
            phase_started: Instant::now(),
            timings: Vec::new(),
            events,
            state: RunProgress::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// A closed receiver is not an error: observers may come and go.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        if self.state.phase == phase {
            return;
        }
        self.close_phase();
        self.state.phase = phase;
        self.emit(ProgressEvent::PhaseChanged(phase));
    }

    fn close_phase(&mut self) {
        if self.state.phase != Phase::Done {
            self.timings.push(PhaseTiming {
                phase: self.state.phase,
                seconds: self.phase_started.elapsed().as_secs_f64(),
            });
        }
        self.phase_started = Instant::now();
    }

    pub fn entity_failed(&mut self, target: &str, error: String) {
        self.state.failed += 1;
        self.state.record_error(format!("{target}: {error}"));
        self.emit(ProgressEvent::EntityFailed {
            target: target.to_string(),
            error,
        });
    }

    pub fn entity_persisted(&mut self, slug: &str, status: IngestionStatus) {
        match status {
            IngestionStatus::Retry => self.state.retried += 1,
            _ => self.state.succeeded += 1,
        }
        self.emit(ProgressEvent::EntityPersisted {
            slug: slug.to_string(),
            status,
        });
    }

    pub fn finish(mut self, cancelled: bool) -> (RunSummary, RunProgress) {
        self.enter(Phase::Done);
        let state = self.state.clone();
        let summary = RunSummary {
            run_id: self.run_id,
            kind: self.kind,
            job_id: self.job_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            cancelled,
            total_pages: state.total_pages,
            listed_pages: state.listed_pages,
            failed_pages: state.failed_pages,
            unique_entities: state.unique_entities,
            dropped_unranked: state.dropped_unranked,
            skipped_existing: state.skipped_existing,
            attempted: state.total_entities,
            succeeded: state.succeeded,
            retried: state.retried,
            failed: state.failed,
            enriched: state.enriched,
            phase_timings: self.timings.clone(),
            recent_errors: state.recent_errors.iter().cloned().collect(),
        };
        self.emit(ProgressEvent::Finished(summary.clone()));
        (summary, state)
    }
}
