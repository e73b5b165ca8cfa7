//! The coordinator: drives a [`Source`] through a run.
//!
//! Enumeration happens on the calling task and spawns one task per item as
//! soon as it is listed. Each item task fetches and expands its item, then
//! spawns one task per unit. [`run`] returns only once every task at both
//! levels has finished, failed or been cancelled.

use crate::error::{Error, ErrorKind, Result};
use crate::group::{Completion, TaskGroup};
use crate::policy::{Policies, Policy, Stage};
use crate::publish::Publisher;
use crate::source::{Source, SourceItem, Unit};
use derive_more::Display;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Settings for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub policies: Policies,
    /// Cap on tasks running at once; unbounded when `None`.
    pub max_in_flight: Option<usize>,
}

/// Outcome counts for one level of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    /// Skipped or dropped because the run was cancelled.
    pub cancelled: usize,
}
impl Tally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// What happened to every item and unit in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub items: Tally,
    pub units: Tally,
}
impl RunSummary {
    pub fn failures(&self) -> usize {
        self.items.failed + self.units.failed
    }

    /// No failures and nothing cancelled.
    pub fn is_clean(&self) -> bool {
        self.failures() == 0 && self.items.cancelled == 0 && self.units.cancelled == 0
    }

    fn tally(&mut self, kind: TaskKind) -> &mut Tally {
        match kind {
            TaskKind::Item => &mut self.items,
            TaskKind::Unit => &mut self.units,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Enumerating,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Item,
    Unit,
}

#[derive(Debug)]
struct Report {
    kind: TaskKind,
    ok: bool,
}

struct Shared<S> {
    source: S,
    publisher: Publisher,
    control: Control,
}

/// Task group plus the failure policy that may cancel it.
struct Control {
    policies: Policies,
    group: TaskGroup<TaskKind, Report>,
    /// First failure under an abort policy.
    aborted: Mutex<Option<Error>>,
}

impl Control {
    fn new(options: RunOptions) -> Self {
        Self { policies: options.policies, group: TaskGroup::new(options.max_in_flight), aborted: Mutex::new(None) }
    }

    /// Apply the failure policy for the stage `err` was raised in.
    ///
    /// Never suspends, so a failing task always reports its own failure
    /// before a cancellation can preempt it.
    fn apply_policy(&self, err: Error) {
        let stage = err.stage();
        if self.policies.for_stage(stage) == Policy::Isolate {
            return;
        }
        let mut aborted = self.aborted.lock().unwrap_or_else(PoisonError::into_inner);
        if aborted.is_none() {
            tracing::warn!(%stage, "Cancelling run");
            *aborted = Some(err);
        }
        self.group.cancel();
    }

    fn take_aborted(&self) -> Option<Error> {
        self.aborted.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Run `source` to completion, publishing every unit it produces.
///
/// Returns the summary once all work is done. If a failure hit a stage whose
/// policy is [`Abort`](Policy::Abort), the remaining work is cancelled and
/// that first failure is returned instead, after every task has unwound.
#[tracing::instrument(skip_all, fields(source = source.name()))]
pub async fn run<S: Source>(source: S, publisher: Publisher, options: RunOptions) -> Result<RunSummary> {
    let shared = Arc::new(Shared { source, publisher, control: Control::new(options) });
    let mut state = RunState::Idle;

    transition(&mut state, RunState::Enumerating);
    let mut listed = 0usize;
    let mut items = shared.source.enumerate();
    loop {
        let next = tokio::select! {
            biased;
            () = shared.control.group.cancelled() => break,
            next = items.next() => next,
        };
        match next {
            Some(Ok(item)) => {
                listed += 1;
                shared.control.group.spawn(TaskKind::Item, run_item(Arc::clone(&shared), item));
            },
            Some(Err(e)) => {
                tracing::error!(error = ?e, "Failed to enumerate items");
                shared.control.apply_policy(e);
                break;
            },
            None => break,
        }
    }
    drop(items);
    tracing::info!(items = listed, "Enumeration finished");

    transition(&mut state, RunState::Draining);
    let completions = shared.control.group.join_all().await;
    // Aborts of dropped uploads belong to this run too.
    shared.publisher.settle().await;
    transition(&mut state, RunState::Done);

    let summary = summarize(completions);
    tracing::info!(
        items.succeeded = summary.items.succeeded,
        items.failed = summary.items.failed,
        items.cancelled = summary.items.cancelled,
        units.succeeded = summary.units.succeeded,
        units.failed = summary.units.failed,
        units.cancelled = summary.units.cancelled,
        "Run finished"
    );

    match shared.control.take_aborted() {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}

fn summarize(completions: Vec<Completion<TaskKind, Report>>) -> RunSummary {
    let mut summary = RunSummary::default();
    for completion in completions {
        match completion {
            Completion::Finished(Report { kind, ok: true }) => summary.tally(kind).succeeded += 1,
            Completion::Finished(Report { kind, ok: false }) => summary.tally(kind).failed += 1,
            Completion::Cancelled(kind) => summary.tally(kind).cancelled += 1,
        }
    }
    summary
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::debug!(from = %state, to = %next, "Run state changed");
    *state = next;
}

async fn run_item<S: Source>(shared: Arc<Shared<S>>, item: SourceItem) -> Report {
    tracing::info!(item = %item.id, size = ?item.size, "Processing item");
    let content = match guarded(Stage::Fetch, shared.source.fetch(&item)).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(item = %item.id, error = ?e, "Failed to fetch item");
            shared.control.apply_policy(e);
            return Report { kind: TaskKind::Item, ok: false };
        },
    };
    let expanded = panic::catch_unwind(AssertUnwindSafe(|| shared.source.expand(&item, content)))
        .unwrap_or_else(|payload| Err(panicked(Stage::Decode, payload.as_ref())));
    let units = match expanded {
        Ok(units) => units,
        Err(e) => {
            tracing::error!(item = %item.id, error = ?e, "Failed to expand item");
            shared.control.apply_policy(e);
            return Report { kind: TaskKind::Item, ok: false };
        },
    };
    tracing::info!(item = %item.id, units = units.len(), "Expanded item");
    for unit in units {
        let key = shared.source.destination_key(&item, &unit.name);
        shared.control.group.spawn(TaskKind::Unit, run_unit(Arc::clone(&shared), item.id.clone(), unit, key));
    }
    Report { kind: TaskKind::Item, ok: true }
}

async fn run_unit<S: Source>(shared: Arc<Shared<S>>, item: String, unit: Unit<S::Entry>, key: String) -> Report {
    let name = unit.name.clone();
    let published = guarded(Stage::Publish, async {
        let body = shared.source.open(unit).await?;
        shared.publisher.publish(&key, body).await
    })
    .await;
    match published {
        Ok(location) => {
            tracing::info!(item = %item, unit = %name, key = %key, location = %location, "Uploaded unit");
            Report { kind: TaskKind::Unit, ok: true }
        },
        Err(e) => {
            tracing::error!(item = %item, unit = %name, key = %key, error = ?e, "Failed to publish unit");
            shared.control.apply_policy(e);
            Report { kind: TaskKind::Unit, ok: false }
        },
    }
}

/// Turn a panic inside `work` into a [`Task`](ErrorKind::Task) error for `stage`.
async fn guarded<T>(stage: Stage, work: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(stage, payload.as_ref())),
    }
}

fn panicked(stage: Stage, payload: &(dyn Any + Send)) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(%stage, panic = %message, "Task panicked");
    exn::Exn::from(ErrorKind::Task(stage))
}
