//! Batch payroll runner.
//!
//! The `engine` module processes a whole period: it reads the roster
//! from the [`Directory`], calculates every worker with
//! [`calculate_with`] and upserts each [`CalculatedPayroll`] into the
//! [`RecordStore`].  Workers are independent, so they are spread over a
//! bounded [`rayon`] thread pool.
//!
//! A failure belongs to the worker it happened on.  It is recorded in
//! [`BatchResult::failed`] and the rest of the roster carries on.
//! Re-running a period fully replaces every successful worker's record.
//!
//! The runner does not serialise runs: two runs of the same period
//! against the same store must be prevented by the caller.

use crate::calculator::calculate_with;
use crate::concepts::ConceptCatalog;
use crate::directory::{Directory, ReferenceIndex, RejectedWorker, Roster};
use crate::error::{ErrorCategory, PayrollError};
use crate::models::{CalculatedPayroll, PayrollPeriod, Worker};
use crate::params::{LegalParameterSource, LegalParameters};
use crate::store::{put, RecordStore};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    /// At least one worker failed or was never started.
    CompletedWithErrors,
}

/// Completed-so-far counters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct RunControl {
    cancelled: AtomicBool,
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    state: Mutex<RunState>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            state: Mutex::new(RunState::Idle),
        }
    }
}

/// Shared view of a run in flight.
///
/// Clones observe and control the same run: one clone is handed to
/// [`PayrollRunner::run_period_with`], others can read
/// [`RunHandle::progress`] or call [`RunHandle::cancel`] from any thread.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    inner: Arc<RunControl>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop starting new workers.  Workers already being calculated
    /// finish and persist.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            total: self.inner.total.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }

    pub fn state(&self) -> RunState {
        match self.inner.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: RunState) {
        match self.inner.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn begin(&self, total: usize) {
        self.inner.total.store(total, Ordering::SeqCst);
        self.inner.completed.store(0, Ordering::SeqCst);
        self.inner.failed.store(0, Ordering::SeqCst);
        self.set_state(RunState::Running);
    }

    fn record(&self, ok: bool) {
        if !ok {
            self.inner.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A worker whose payroll was not stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFailure {
    pub worker_id: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip)]
    pub error: PayrollError,
    /// The calculated record when only persistence failed, so it can be
    /// written again without recomputing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpersisted: Option<CalculatedPayroll>,
}

impl WorkerFailure {
    fn new(worker_id: &str, error: PayrollError, unpersisted: Option<CalculatedPayroll>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            category: error.category(),
            message: error.to_string(),
            error,
            unpersisted,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub period: PayrollPeriod,
    pub status: RunState,
    pub succeeded: Vec<String>,
    pub failed: Vec<WorkerFailure>,
    /// Workers skipped because the run was cancelled first.
    pub not_started: Vec<String>,
    pub cancelled: bool,
}

impl BatchResult {
    fn assemble(period: PayrollPeriod, outcomes: Vec<Outcome>, cancelled: bool) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut not_started = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded(id) => succeeded.push(id),
                Outcome::Failed(failure) => failed.push(failure),
                Outcome::NotStarted(id) => not_started.push(id),
            }
        }
        let status = if failed.is_empty() && not_started.is_empty() {
            RunState::Completed
        } else {
            RunState::CompletedWithErrors
        };
        Self {
            period,
            status,
            succeeded,
            failed,
            not_started,
            cancelled,
        }
    }

    /// Ids to pass to [`PayrollRunner::run_workers`] for a retry:
    /// failed workers followed by the ones never started.
    pub fn retry_targets(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|f| f.worker_id.clone())
            .chain(self.not_started.iter().cloned())
            .collect()
    }
}

fn rejected_outcome(rejected: &RejectedWorker) -> Outcome {
    Outcome::Failed(WorkerFailure::new(&rejected.worker_id, rejected.to_error(), None))
}

enum Outcome {
    Succeeded(String),
    Failed(WorkerFailure),
    NotStarted(String),
}

/// Per-run snapshot of the reference data every worker shares.
struct RunContext {
    params: Arc<LegalParameters>,
    catalog: ConceptCatalog,
    references: ReferenceIndex,
}

pub struct PayrollRunner {
    directory: Arc<dyn Directory>,
    store: Arc<dyn RecordStore>,
    parameters: Arc<dyn LegalParameterSource>,
    pool: rayon::ThreadPool,
}

impl PayrollRunner {
    /// Creates a runner with its own pool of `worker_threads` threads
    /// (rayon's default when zero).
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn RecordStore>,
        parameters: Arc<dyn LegalParameterSource>,
        worker_threads: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("payroll-worker-{i}"))
            .build()
            .context("building payroll worker pool")?;
        Ok(Self {
            directory,
            store,
            parameters,
            pool,
        })
    }

    /// Calculates and stores the payroll of every worker in the roster.
    pub fn run_period(&self, period: PayrollPeriod) -> Result<BatchResult, PayrollError> {
        self.run_period_with(period, &RunHandle::new())
    }

    /// Like [`run_period`](Self::run_period), reporting through `handle`.
    ///
    /// Fails only when the roster itself cannot be read.
    pub fn run_period_with(
        &self,
        period: PayrollPeriod,
        handle: &RunHandle,
    ) -> Result<BatchResult, PayrollError> {
        let roster = self.directory.workers()?;
        let rejected = roster.rejected.iter().map(rejected_outcome).collect();
        Ok(self.run_roster(period, roster.workers, rejected, handle))
    }

    /// Re-runs only the listed workers, e.g. the `failed` subset of a
    /// previous result.  Ids missing from the roster are reported as
    /// failed.
    pub fn run_workers(
        &self,
        period: PayrollPeriod,
        worker_ids: &[String],
        handle: &RunHandle,
    ) -> Result<BatchResult, PayrollError> {
        let wanted: HashSet<&str> = worker_ids.iter().map(String::as_str).collect();
        let Roster { workers, rejected } = self.directory.workers()?;
        let roster: Vec<Worker> = workers
            .into_iter()
            .filter(|w| wanted.contains(w.id.as_str()))
            .collect();
        let rejected: Vec<RejectedWorker> = rejected
            .into_iter()
            .filter(|r| wanted.contains(r.worker_id.as_str()))
            .collect();
        let known: HashSet<&str> = roster
            .iter()
            .map(|w| w.id.as_str())
            .chain(rejected.iter().map(|r| r.worker_id.as_str()))
            .collect();
        let missing: Vec<Outcome> = worker_ids
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .map(|id| {
                Outcome::Failed(WorkerFailure::new(
                    id,
                    PayrollError::InvalidWorker {
                        worker_id: id.clone(),
                        reason: "not in the active roster".into(),
                    },
                    None,
                ))
            })
            .collect();
        let failed = rejected.iter().map(rejected_outcome).chain(missing).collect();
        Ok(self.run_roster(period, roster, failed, handle))
    }

    /// Writes the `unpersisted` records of an earlier result without
    /// recalculating them.  Failures without a record are carried over
    /// untouched.
    pub fn retry_persistence(&self, previous: &BatchResult) -> BatchResult {
        let outcomes = previous
            .failed
            .iter()
            .map(|failure| match &failure.unpersisted {
                Some(record) => match put(self.store.as_ref(), record) {
                    Ok(()) => {
                        info!(worker_id = %failure.worker_id, "persisted previously calculated payroll");
                        Outcome::Succeeded(failure.worker_id.clone())
                    }
                    Err(err) => Outcome::Failed(WorkerFailure::new(
                        &failure.worker_id,
                        err.into(),
                        Some(record.clone()),
                    )),
                },
                None => Outcome::Failed(failure.clone()),
            })
            .collect();
        BatchResult::assemble(previous.period, outcomes, false)
    }

    fn prepare(&self, period: PayrollPeriod) -> Result<RunContext, PayrollError> {
        let params = self.parameters.parameters_for(period)?;
        let catalog = self.directory.concept_catalog()?;
        let references = ReferenceIndex::load(self.directory.as_ref())?;
        Ok(RunContext {
            params,
            catalog,
            references,
        })
    }

    fn run_roster(
        &self,
        period: PayrollPeriod,
        roster: Vec<Worker>,
        mut outcomes: Vec<Outcome>,
        handle: &RunHandle,
    ) -> BatchResult {
        // `outcomes` holds workers that failed before calculation.
        handle.begin(roster.len() + outcomes.len());
        for _ in &outcomes {
            handle.record(false);
        }
        info!(
            %period,
            workers = roster.len(),
            rejected = outcomes.len(),
            "payroll run started"
        );

        let processed: Vec<Outcome> = match self.prepare(period) {
            Ok(context) => self.pool.install(|| {
                roster
                    .par_iter()
                    .map(|worker| {
                        if handle.is_cancelled() {
                            return Outcome::NotStarted(worker.id.clone());
                        }
                        let outcome = self.process(worker, period, &context);
                        handle.record(matches!(outcome, Outcome::Succeeded(_)));
                        outcome
                    })
                    .collect()
            }),
            Err(err) => {
                // Nothing can be calculated without the period's
                // reference data; every worker carries the cause.
                warn!(%period, error = %err, "payroll run cannot start");
                roster
                    .iter()
                    .map(|worker| {
                        handle.record(false);
                        Outcome::Failed(WorkerFailure::new(&worker.id, err.clone(), None))
                    })
                    .collect()
            }
        };
        outcomes.extend(processed);

        let result = BatchResult::assemble(period, outcomes, handle.is_cancelled());
        handle.set_state(result.status);
        info!(
            %period,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            not_started = result.not_started.len(),
            status = ?result.status,
            "payroll run finished"
        );
        result
    }

    fn process(&self, worker: &Worker, period: PayrollPeriod, context: &RunContext) -> Outcome {
        let calculated = context
            .references
            .check(worker)
            .and_then(|()| self.directory.movements(&worker.id, period))
            .and_then(|movements| {
                calculate_with(worker, period, &movements, &context.catalog, &context.params)
            });

        let payroll = match calculated {
            Ok(payroll) => payroll,
            Err(err) => {
                warn!(worker_id = %worker.id, error = %err, "payroll calculation failed");
                return Outcome::Failed(WorkerFailure::new(&worker.id, err, None));
            }
        };

        match put(self.store.as_ref(), &payroll) {
            Ok(()) => {
                debug!(
                    worker_id = %worker.id,
                    key = %payroll.id,
                    net_pay = payroll.totals.net_pay,
                    "payroll stored"
                );
                Outcome::Succeeded(worker.id.clone())
            }
            Err(err) => {
                error!(worker_id = %worker.id, error = %err, "calculated payroll could not be stored");
                Outcome::Failed(WorkerFailure::new(&worker.id, err.into(), Some(payroll)))
            }
        }
    }
}
