#![forbid(unsafe_code)]

//! Drives every planned search unit through
//! `select credential → fetch → enrich → filter → dedup → persist`.
//!
//! A unit never takes the run down with it. Upstream faults degrade the unit
//! to whatever it resolved before the fault; sink failures are counted and
//! the next unit starts. Units run on `workers` tasks pulling from one shared
//! queue; with a single worker the crawl is strictly sequential.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Requester, RetryPolicy, VideoApi};
use crate::credentials::CredentialPool;
use crate::dedup::SeenSet;
use crate::enrich::{EnrichOptions, enrich};
use crate::fetcher::{FetchOptions, fetch_candidates};
use crate::metadata::VideoRecord;
use crate::plan::{PlannedUnit, SearchUnit, WorkPlan};
use crate::retention::RetentionPolicy;
use crate::sink::BatchSink;

#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    pub fetch: FetchOptions,
    pub enrich: EnrichOptions,
    pub retry: RetryPolicy,
    pub workers: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            enrich: EnrichOptions::default(),
            retry: RetryPolicy::default(),
            workers: 1,
        }
    }
}

impl CrawlOptions {
    fn retention(&self) -> &RetentionPolicy {
        &self.enrich.retention
    }
}

/// Step of a unit that can fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Fetch,
    Enrich,
    Persist,
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitPhase::Fetch => "fetch",
            UnitPhase::Enrich => "enrich",
            UnitPhase::Persist => "persist",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFault {
    pub phase: UnitPhase,
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Every step succeeded and the batch was written.
    Completed,
    /// An upstream fault cut the unit short; the partial batch was written.
    Degraded(UnitFault),
    /// Records were resolved but the file could not be written.
    PersistFailed(String),
    /// Cancellation arrived mid-unit; nothing was written.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: SearchUnit,
    pub candidates: usize,
    pub records: usize,
    pub path: Option<PathBuf>,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub units_planned: usize,
    pub units_completed: usize,
    pub units_degraded: usize,
    pub units_cancelled: usize,
    /// Planned units never started because the run was cancelled first.
    pub units_skipped: usize,
    pub persist_failures: usize,
    pub records_written: usize,
    pub cancelled: bool,
}

impl RunReport {
    fn tally(&mut self, outcome: &UnitOutcome) {
        match &outcome.status {
            UnitStatus::Completed => {
                self.units_completed += 1;
                self.records_written += outcome.records;
            }
            UnitStatus::Degraded(_) => {
                self.units_degraded += 1;
                self.records_written += outcome.records;
            }
            UnitStatus::PersistFailed(_) => self.persist_failures += 1,
            UnitStatus::Cancelled => self.units_cancelled += 1,
        }
    }

    fn processed(&self) -> usize {
        self.units_completed + self.units_degraded + self.units_cancelled + self.persist_failures
    }
}

pub struct Orchestrator<A> {
    api: Arc<A>,
    pool: CredentialPool,
    seen: SeenSet,
    sink: BatchSink,
    options: CrawlOptions,
}

impl<A> Clone for Orchestrator<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            pool: self.pool.clone(),
            seen: self.seen.clone(),
            sink: self.sink.clone(),
            options: self.options,
        }
    }
}

impl<A: VideoApi> Orchestrator<A> {
    pub fn new(api: Arc<A>, pool: CredentialPool, sink: BatchSink, options: CrawlOptions) -> Self {
        Self {
            api,
            pool,
            seen: SeenSet::new(),
            sink,
            options,
        }
    }

    /// Shared seen-set of this run.
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Runs the whole plan. Returns once every unit finished or, after
    /// cancellation, once in-progress units have stopped.
    pub async fn run(&self, plan: &WorkPlan, cancel: CancellationToken) -> RunReport {
        let units: VecDeque<PlannedUnit> = plan.units().into();
        let planned = units.len();
        let queue = Arc::new(Mutex::new(units));
        let report = Arc::new(Mutex::new(RunReport {
            units_planned: planned,
            ..RunReport::default()
        }));
        let workers = self.options.workers.clamp(1, planned.max(1));
        info!(
            units = planned,
            batches = plan.batches().len(),
            groups = self.pool.group_count(),
            workers,
            "starting crawl"
        );

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let this = self.clone();
            let queue = Arc::clone(&queue);
            let report = Arc::clone(&report);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(planned) = queue.lock().pop_front() else {
                        break;
                    };
                    debug!(worker, unit = %planned.unit, "worker picked unit");
                    let outcome = this.run_unit(&planned, &cancel).await;
                    report.lock().tally(&outcome);
                }
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "crawl worker terminated abnormally");
            }
        }

        let mut report = report.lock().clone();
        report.cancelled = cancel.is_cancelled();
        report.units_skipped = report.units_planned.saturating_sub(report.processed());
        info!(
            completed = report.units_completed,
            degraded = report.units_degraded,
            cancelled = report.units_cancelled,
            skipped = report.units_skipped,
            persist_failures = report.persist_failures,
            records = report.records_written,
            seen = self.seen.len(),
            "crawl finished"
        );
        report
    }

    /// Resolves one unit end to end.
    pub async fn run_unit(&self, planned: &PlannedUnit, cancel: &CancellationToken) -> UnitOutcome {
        let unit = &planned.unit;
        let group = self.pool.group_for_batch(planned.batch_index);
        let credential = self.pool.pick(group);
        info!(
            query = %unit.query,
            duration = %unit.duration,
            batch = planned.batch_index,
            group = group.index(),
            credential = %credential,
            "Query: {} | Duration: {}",
            unit.query,
            unit.duration
        );
        let requester = Requester::new(&credential, self.options.retry, cancel);
        let mut fault: Option<UnitFault> = None;

        let fetched = fetch_candidates(
            self.api.as_ref(),
            &self.seen,
            unit,
            &requester,
            &self.options.fetch,
            cancel,
        )
        .await;
        let candidates = fetched.candidates.len();
        match fetched.fault {
            Some(ApiError::Cancelled) => return self.cancelled(unit, candidates),
            Some(error) => {
                fault = Some(UnitFault {
                    phase: UnitPhase::Fetch,
                    error,
                })
            }
            None => {}
        }

        // Another worker may have emitted some of these since the search.
        let ids: Vec<String> = self
            .seen
            .unseen(fetched.candidates.iter().map(|c| c.video_id.as_str()))
            .into_iter()
            .map(str::to_string)
            .collect();

        let enriched = enrich(self.api.as_ref(), &ids, &requester, &self.options.enrich).await;
        match enriched.fault {
            Some(ApiError::Cancelled) => return self.cancelled(unit, candidates),
            Some(error) => {
                fault.get_or_insert(UnitFault {
                    phase: UnitPhase::Enrich,
                    error,
                });
            }
            None => {}
        }
        // Nothing may be admitted or written once the run is interrupted.
        if cancel.is_cancelled() {
            return self.cancelled(unit, candidates);
        }

        let retention = self.options.retention();
        let records: Vec<VideoRecord> = enriched
            .records
            .into_iter()
            .filter(|record| retention.keep(record))
            .filter(|record| self.seen.admit(&record.video_id))
            .collect();
        debug!(
            query = %unit.query,
            duration = %unit.duration,
            candidates,
            rejected = enriched.rejected,
            missing = enriched.missing,
            kept = records.len(),
            "unit resolved"
        );

        self.persist(unit, candidates, records, fault).await
    }

    async fn persist(
        &self,
        unit: &SearchUnit,
        candidates: usize,
        records: Vec<VideoRecord>,
        fault: Option<UnitFault>,
    ) -> UnitOutcome {
        let count = records.len();
        let sink = self.sink.clone();
        let owned_unit = unit.clone();
        let written = tokio::task::spawn_blocking(move || sink.write(&owned_unit, &records))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);

        match written {
            Ok(path) => {
                info!(
                    query = %unit.query,
                    duration = %unit.duration,
                    records = count,
                    path = %path.display(),
                    "Saved {count} → {}",
                    path.display()
                );
                let status = match fault {
                    Some(fault) => {
                        warn!(
                            query = %unit.query,
                            duration = %unit.duration,
                            phase = %fault.phase,
                            error = %fault.error,
                            "unit degraded; partial batch saved"
                        );
                        UnitStatus::Degraded(fault)
                    }
                    None => UnitStatus::Completed,
                };
                UnitOutcome {
                    unit: unit.clone(),
                    candidates,
                    records: count,
                    path: Some(path),
                    status,
                }
            }
            Err(err) => {
                warn!(
                    query = %unit.query,
                    duration = %unit.duration,
                    phase = %UnitPhase::Persist,
                    error = %format!("{err:#}"),
                    "could not write batch"
                );
                UnitOutcome {
                    unit: unit.clone(),
                    candidates,
                    records: count,
                    path: None,
                    status: UnitStatus::PersistFailed(format!("{err:#}")),
                }
            }
        }
    }

    fn cancelled(&self, unit: &SearchUnit, candidates: usize) -> UnitOutcome {
        info!(
            query = %unit.query,
            duration = %unit.duration,
            "unit interrupted by cancellation; not persisted"
        );
        UnitOutcome {
            unit: unit.clone(),
            candidates,
            records: 0,
            path: None,
            status: UnitStatus::Cancelled,
        }
    }
}
