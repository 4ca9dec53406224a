//! Background workers and the event contract they report through.
//!
//! A worker runs on tokio's blocking pool so image processing never stalls
//! the orchestrator task. It talks back exclusively through
//! [`WorkerEvent`]s on an unbounded channel: any number of `result`
//! messages followed by exactly one terminal signal (`stopped`,
//! `finished` or `error`). The terminal signal is sent by a supervising
//! task once the blocking work has returned or panicked, so a pipeline
//! cannot emit two of them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::{JobDescriptor, JobId};
use crate::registry::ActiveWorkerRegistry;
use crate::store::JobStore;
use crate::task::TaskKind;

/// What a worker can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The worker acknowledged a stop request and released its resources.
    Stopped,
    /// Informational message emitted while running.
    Result(String),
    /// All work completed successfully.
    Finished,
    /// Unrecoverable fault; the job is abandoned.
    Error(String),
}

impl WorkerSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerSignal::Result(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerSignal::Stopped => "stopped",
            WorkerSignal::Result(_) => "result",
            WorkerSignal::Finished => "finished",
            WorkerSignal::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEvent {
    pub job_id: JobId,
    pub signal: WorkerSignal,
}

/// How a pipeline run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// The pipeline observed the cancellation token and bailed out early.
    Cancelled,
}

/// The image-analysis work itself.
///
/// Implementations must poll [`WorkerContext::is_cancelled`] between units
/// of work and return [`PipelineOutcome::Cancelled`] promptly once it is
/// set; nothing will force them to stop.
pub trait Pipeline: Send + Sync + 'static {
    fn run(&self, job: &JobDescriptor, ctx: &WorkerContext) -> anyhow::Result<PipelineOutcome>;
}

/// Everything a running pipeline is allowed to see.
pub struct WorkerContext {
    job_id: JobId,
    cache_dir: PathBuf,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerContext {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emits a `result` event.
    pub fn report(&self, message: impl Into<String>) {
        let _ = self.events.send(WorkerEvent {
            job_id: self.job_id,
            signal: WorkerSignal::Result(message.into()),
        });
    }
}

/// One in-flight job as seen by the orchestrator.
#[derive(Debug)]
pub struct WorkerHandle {
    job_id: JobId,
    task: TaskKind,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    dispatched_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn dispatched_at(&self) -> DateTime<Utc> {
        self.dispatched_at
    }

    /// Sets the cancellation flag. Returns `false` if it was already set.
    pub fn request_stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tracing::debug!(job_id = %self.job_id, "Requesting worker stop");
        self.cancel.cancel();
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the terminal event has been sent.
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn detached(job_id: JobId, task: TaskKind) -> Self {
        Self {
            job_id,
            task,
            cancel: CancellationToken::new(),
            supervisor: tokio::spawn(async {}),
            dispatched_at: Utc::now(),
        }
    }
}

/// Starts workers bound to the persisted handoff artifact.
pub struct WorkerDispatcher {
    pipeline: Arc<dyn Pipeline>,
    store: JobStore,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerDispatcher {
    pub fn new(
        pipeline: Arc<dyn Pipeline>,
        store: JobStore,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            pipeline,
            store,
            events,
        }
    }

    /// Spawns one worker for the artifact already written by the store.
    ///
    /// The handle is registered before the worker is released, so even an
    /// instant terminal event always finds its registry entry.
    pub fn dispatch<'a>(
        &self,
        registry: &'a mut ActiveWorkerRegistry,
        job_id: JobId,
        task: TaskKind,
    ) -> &'a WorkerHandle {
        let cancel = CancellationToken::new();
        let (start_tx, start_rx) = oneshot::channel::<()>();

        let ctx = WorkerContext {
            job_id,
            cache_dir: self.store.cache_dir().to_path_buf(),
            cancel: cancel.clone(),
            events: self.events.clone(),
        };
        let pipeline = Arc::clone(&self.pipeline);
        let handoff = self.store.handoff_path();

        let work = tokio::task::spawn_blocking(move || {
            if start_rx.blocking_recv().is_err() {
                bail!("worker was never released by the dispatcher");
            }
            run_worker(pipeline.as_ref(), &handoff, task, &ctx)
        });

        let events = self.events.clone();
        let supervisor = tokio::spawn(async move {
            let signal = match work.await {
                Ok(Ok(PipelineOutcome::Completed)) => WorkerSignal::Finished,
                Ok(Ok(PipelineOutcome::Cancelled)) => WorkerSignal::Stopped,
                Ok(Err(e)) => WorkerSignal::Error(format!("{e:#}")),
                Err(e) if e.is_panic() => WorkerSignal::Error(format!("worker panicked: {e}")),
                Err(e) => WorkerSignal::Error(format!("worker aborted: {e}")),
            };
            tracing::debug!(job_id = %job_id, signal = signal.name(), "Worker exited");
            let _ = events.send(WorkerEvent { job_id, signal });
        });

        let handle = registry.insert(WorkerHandle {
            job_id,
            task,
            cancel,
            supervisor,
            dispatched_at: Utc::now(),
        });
        let _ = start_tx.send(());
        tracing::info!(job_id = %job_id, task = %task, "Worker dispatched");
        handle
    }
}

fn run_worker(
    pipeline: &dyn Pipeline,
    handoff: &Path,
    task: TaskKind,
    ctx: &WorkerContext,
) -> anyhow::Result<PipelineOutcome> {
    let job = JobStore::load(handoff)
        .with_context(|| format!("failed to read job artifact {}", handoff.display()))?;
    if job.task() != task {
        bail!("job artifact is for {} but the worker was started for {task}", job.task());
    }
    if ctx.is_cancelled() {
        return Ok(PipelineOutcome::Cancelled);
    }
    pipeline.run(&job, ctx)
}

/// Walks every input image and checks it is readable, without running
/// any model. Lets the orchestration be exercised end to end.
#[derive(Debug, Clone, Default)]
pub struct DryRunPipeline {
    delay: Duration,
}

impl DryRunPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause after each image, to make long runs observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Pipeline for DryRunPipeline {
    fn run(&self, job: &JobDescriptor, ctx: &WorkerContext) -> anyhow::Result<PipelineOutcome> {
        let images: Vec<&PathBuf> = job
            .source()
            .iter()
            .chain(job.reference().unwrap_or_default())
            .collect();
        let total = images.len();
        ctx.report(format!("{} job loaded with {total} image(s)", job.task()));

        let step = (total / 10).max(1);
        for (index, path) in images.into_iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(job_id = %ctx.job_id(), processed = index, "Dry run cancelled");
                return Ok(PipelineOutcome::Cancelled);
            }
            fs::metadata(path).with_context(|| format!("cannot read {}", path.display()))?;
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }

            let done = index + 1;
            if done % step == 0 || done == total {
                ctx.report(format!("processed {done}/{total} images ({}%)", done * 100 / total));
            }
        }

        Ok(PipelineOutcome::Completed)
    }
}
