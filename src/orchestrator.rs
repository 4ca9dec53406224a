//! The interactive side of a processing session.
//!
//! [`Orchestrator`] owns every piece of mutable session state (lifecycle,
//! registry, indicator, counters, console) and is driven from a single
//! tokio task. Workers only reach it through the event channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};

use crate::bus::{NoticeBus, SystemNotice};
use crate::cancel::CancellationController;
use crate::error::{PhotolinkError, Result};
use crate::job::{JobBuilder, JobId, SubmissionForm};
use crate::registry::ActiveWorkerRegistry;
use crate::state_machine::{OrchestrationStateMachine, TaskState, Trigger};
use crate::store::JobStore;
use crate::ui::{ConsoleLog, Notice, ProcessIndicator, ProgressCounters};
use crate::worker::{Pipeline, WorkerDispatcher, WorkerEvent, WorkerSignal};

/// How often the indicator rotates its message unless configured.
pub const DEFAULT_MESSAGE_INTERVAL: Duration = Duration::from_secs(8);

/// Prefix of console lines relayed from a worker's `result` events.
pub const SYSTEM_MESSAGE_PREFIX: &str = " SYSTEM MESSAGE:  ";

const ERROR_TITLE: &str = "Error";

type MessageHook = Box<dyn Fn(&str) + Send>;
type SignalHook = Box<dyn Fn() + Send>;
type NoticeHook = Box<dyn Fn(&Notice) + Send>;

#[derive(Default)]
struct Hooks {
    result: Vec<MessageHook>,
    error: Vec<MessageHook>,
    finished: Vec<SignalHook>,
    stopped: Vec<SignalHook>,
    notice: Vec<NoticeHook>,
}

pub struct Orchestrator {
    machine: OrchestrationStateMachine,
    registry: ActiveWorkerRegistry,
    controller: CancellationController,
    indicator: ProcessIndicator,
    counters: ProgressCounters,
    console: ConsoleLog,
    store: JobStore,
    builder: JobBuilder,
    dispatcher: WorkerDispatcher,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    bus: NoticeBus,
    bus_rx: broadcast::Receiver<SystemNotice>,
    hooks: Hooks,
    notices: Vec<Notice>,
    started_at: Option<Instant>,
    last_outcome: Option<TaskState>,
    echo: bool,
}

impl Orchestrator {
    pub fn new(store: JobStore, pipeline: Arc<dyn Pipeline>) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let bus = NoticeBus::default();
        let bus_rx = bus.subscribe();
        Self {
            machine: OrchestrationStateMachine::new(),
            registry: ActiveWorkerRegistry::new(),
            controller: CancellationController::default(),
            indicator: ProcessIndicator::new(DEFAULT_MESSAGE_INTERVAL),
            counters: ProgressCounters::default(),
            console: ConsoleLog::default(),
            dispatcher: WorkerDispatcher::new(pipeline, store.clone(), events_tx),
            store,
            builder: JobBuilder::default(),
            events,
            bus,
            bus_rx,
            hooks: Hooks::default(),
            notices: Vec::new(),
            started_at: None,
            last_outcome: None,
            echo: false,
        }
    }

    pub fn with_builder(mut self, builder: JobBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_indicator(mut self, indicator: ProcessIndicator) -> Self {
        self.indicator = indicator;
        self
    }

    /// Grace period for workers to acknowledge a stop request.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.controller = CancellationController::new(timeout);
        self
    }

    /// Mirror console lines to the terminal as they are logged.
    pub fn with_console_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn on_result(&mut self, hook: impl Fn(&str) + Send + 'static) {
        self.hooks.result.push(Box::new(hook));
    }

    pub fn on_error(&mut self, hook: impl Fn(&str) + Send + 'static) {
        self.hooks.error.push(Box::new(hook));
    }

    pub fn on_finished(&mut self, hook: impl Fn() + Send + 'static) {
        self.hooks.finished.push(Box::new(hook));
    }

    pub fn on_stopped(&mut self, hook: impl Fn() + Send + 'static) {
        self.hooks.stopped.push(Box::new(hook));
    }

    pub fn on_notice(&mut self, hook: impl Fn(&Notice) + Send + 'static) {
        self.hooks.notice.push(Box::new(hook));
    }

    pub fn state(&self) -> TaskState {
        self.machine.state()
    }

    pub fn machine(&self) -> &OrchestrationStateMachine {
        &self.machine
    }

    pub fn registry(&self) -> &ActiveWorkerRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &CancellationController {
        &self.controller
    }

    pub fn indicator(&self) -> &ProcessIndicator {
        &self.indicator
    }

    pub fn counters(&self) -> ProgressCounters {
        self.counters
    }

    pub fn console(&self) -> &ConsoleLog {
        &self.console
    }

    /// Every notice raised so far, oldest first.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn bus(&self) -> &NoticeBus {
        &self.bus
    }

    /// The terminal state the most recent run settled in.
    pub fn last_outcome(&self) -> Option<TaskState> {
        self.last_outcome
    }

    /// Validates the form, persists the handoff artifact and starts a worker.
    ///
    /// Operator mistakes are reported through a single error notice and
    /// leave no artifact or worker behind. An unknown task is an internal
    /// fault: it is logged and returned without a notice.
    pub fn submit(&mut self, form: &SubmissionForm) -> Result<JobId> {
        if !self.machine.submission_enabled() {
            return Err(PhotolinkError::JobAlreadyRunning(self.machine.state()));
        }

        self.last_outcome = None;
        self.machine.apply(Trigger::Submit)?;
        self.log("Processing started.");

        let descriptor = match self.builder.build(form) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                if err.is_user_recoverable() {
                    tracing::warn!(title = err.title(), error = %err, "Submission rejected");
                    self.notify(Notice::error(err.title(), err.to_string()));
                } else {
                    tracing::error!(error = %err, "Submission carried an unknown task");
                }
                self.machine.apply(Trigger::ValidationFailed)?;
                return Err(err.into());
            }
        };

        self.controller.rearm();
        self.counters.reset();
        self.indicator.show(descriptor.task());

        if let Err(err) = self.store.persist(&descriptor) {
            tracing::error!(error = %err, "Failed to write the job artifact");
            self.controller
                .stop_all(&self.registry, &mut self.indicator, &mut self.counters);
            self.notify(Notice::error(
                ERROR_TITLE,
                format!("An error has occurred during processing: {err}"),
            ));
            self.settle(Trigger::Failed)?;
            return Err(err);
        }

        let job_id = JobId::new();
        self.dispatcher
            .dispatch(&mut self.registry, job_id, descriptor.task());
        self.started_at = Some(Instant::now());
        self.machine.apply(Trigger::Dispatched)?;
        tracing::info!(
            job_id = %job_id,
            task = %descriptor.task(),
            images = descriptor.image_count(),
            "Processing started",
        );
        Ok(job_id)
    }

    /// Asks every running worker to stop. Returns how many were signalled.
    ///
    /// Safe to call at any time; outside a run it does nothing.
    pub fn request_stop(&mut self) -> Result<usize> {
        if self.machine.state() == TaskState::Running {
            self.machine.apply(Trigger::StopRequested)?;
            self.log("Stopping processing...");
        }
        Ok(self
            .controller
            .stop_all(&self.registry, &mut self.indicator, &mut self.counters))
    }

    /// Applies one worker event to the session.
    pub fn handle_worker_event(&mut self, event: WorkerEvent) -> Result<()> {
        let WorkerEvent { job_id, signal } = event;
        if !self.registry.contains(&job_id) {
            tracing::warn!(
                job_id = %job_id,
                signal = signal.name(),
                "Ignoring event from an unregistered worker",
            );
            return Ok(());
        }

        match signal {
            WorkerSignal::Result(message) => {
                self.on_worker_result(&message);
                Ok(())
            }
            WorkerSignal::Finished => self.on_worker_finished(job_id),
            WorkerSignal::Stopped => self.on_worker_stopped(job_id),
            WorkerSignal::Error(message) => self.on_worker_error(job_id, &message),
        }
    }

    fn on_worker_result(&mut self, message: &str) {
        self.log(format!("{SYSTEM_MESSAGE_PREFIX}{message}"));
        if self.machine.state() == TaskState::Running && self.counters.observe(message) {
            self.indicator.set_progress(self.counters.percent);
        }
        for hook in &self.hooks.result {
            hook(message);
        }
    }

    fn on_worker_finished(&mut self, job_id: JobId) -> Result<()> {
        self.retire(job_id);
        let elapsed = self
            .started_at
            .take()
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or_default();

        self.notify(Notice::info("Complete", "All operations completed successfully."));
        self.log(format!("Processing finished in {elapsed:.2}s."));
        self.settle(Trigger::Finished)?;
        tracing::info!(job_id = %job_id, elapsed_secs = elapsed, "Processing finished");

        for hook in &self.hooks.finished {
            hook();
        }
        Ok(())
    }

    fn on_worker_stopped(&mut self, job_id: JobId) -> Result<()> {
        self.retire(job_id);
        self.started_at = None;

        self.notify(Notice::info("Stopped", "All operations stopped."));
        self.log("Processing stopped.");
        self.settle(Trigger::Stopped)?;
        tracing::info!(job_id = %job_id, "Processing stopped");

        for hook in &self.hooks.stopped {
            hook();
        }
        Ok(())
    }

    fn on_worker_error(&mut self, job_id: JobId, message: &str) -> Result<()> {
        tracing::error!(job_id = %job_id, error = message, "Worker failed");
        self.retire(job_id);
        self.started_at = None;

        self.notify(Notice::error(
            ERROR_TITLE,
            format!("An error has occurred during processing: {message}"),
        ));
        self.settle(Trigger::Failed)?;

        for hook in &self.hooks.error {
            hook(message);
        }
        Ok(())
    }

    /// Gives up on workers that ignored a stop request past the deadline.
    ///
    /// Returns `true` if the deadline had expired.
    pub fn handle_stop_timeout(&mut self) -> Result<bool> {
        let Some(err) = self.controller.expire(&mut self.registry) else {
            return Ok(false);
        };
        tracing::error!(error = %err, "Stop request timed out");
        self.started_at = None;

        let message = err.to_string();
        self.notify(Notice::error(ERROR_TITLE, message.clone()));
        if !self.machine.submission_enabled() {
            self.settle(Trigger::Failed)?;
        }

        for hook in &self.hooks.error {
            hook(&message);
        }
        Ok(true)
    }

    /// Starts a fresh session: console back to its initial text and an
    /// empty cache directory. Only allowed while no job is in flight.
    pub fn refresh(&mut self) -> Result<()> {
        if !self.machine.submission_enabled() {
            return Err(PhotolinkError::JobAlreadyRunning(self.machine.state()));
        }
        self.console.reset();
        self.counters.reset();
        self.store.reset()?;
        self.bus.publish(SystemNotice::CacheDeleted);
        self.bus.publish(SystemNotice::RefreshRequested);
        Ok(())
    }

    /// Logs every system notice published since the last call.
    pub fn process_notices(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.bus_rx.try_recv() {
                Ok(notice) => {
                    self.on_system_notice(notice);
                    handled += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "System notices were dropped");
                }
                Err(_) => return handled,
            }
        }
    }

    fn on_system_notice(&mut self, notice: SystemNotice) {
        tracing::debug!(%notice, "System notice received");
        self.log(notice.console_message());
    }

    /// Drives the session until no job is in flight.
    ///
    /// Every `()` received on `stop` requests a cooperative stop. Returns
    /// the terminal state of the run, or the current state if nothing was
    /// running.
    pub async fn run_until_idle(
        &mut self,
        mut stop: mpsc::UnboundedReceiver<()>,
    ) -> Result<TaskState> {
        let mut stop_open = true;

        while !self.machine.submission_enabled() {
            let deadline = self.controller.deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_worker_event(event)?,
                    None => {
                        tracing::error!("Worker event channel closed unexpectedly");
                        break;
                    }
                },
                notice = self.bus_rx.recv() => match notice {
                    Ok(notice) => self.on_system_notice(notice),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "System notices were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                command = stop.recv(), if stop_open => match command {
                    Some(()) => {
                        self.request_stop()?;
                    }
                    None => stop_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_stop_timeout()?;
                }
            }
        }

        self.process_notices();
        Ok(self.last_outcome.unwrap_or(self.machine.state()))
    }

    /// Removes a worker that sent its terminal event and tears the run down.
    fn retire(&mut self, job_id: JobId) {
        self.registry.remove(&job_id);
        self.controller
            .stop_all(&self.registry, &mut self.indicator, &mut self.counters);
        self.controller.settle(&self.registry);
    }

    fn settle(&mut self, trigger: Trigger) -> Result<()> {
        let terminal = self.machine.settle(trigger)?;
        self.last_outcome = Some(terminal);
        Ok(())
    }

    fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        if !self.console.append(line.clone()) || !self.echo {
            return;
        }
        if self.indicator.is_visible() {
            self.indicator.println(&line);
        } else {
            eprintln!("{line}");
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.console.append(notice.console_line());
        for hook in &self.hooks.notice {
            hook(&notice);
        }
        self.notices.push(notice);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ValidationError;
    use crate::job::tests::FakeDiscovery;
    use crate::store::HANDOFF_FILE;
    use crate::task::TaskKind;
    use crate::ui::NoticeLevel;
    use crate::worker::tests::{Ending, ScriptedPipeline};

    struct Session {
        dir: tempfile::TempDir,
        orchestrator: Orchestrator,
    }

    fn session(pipeline: ScriptedPipeline) -> Session {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("cache")).unwrap();
        store.reset().unwrap();
        let orchestrator = Orchestrator::new(store, Arc::new(pipeline))
            .with_builder(JobBuilder::new(Arc::new(FakeDiscovery::default())))
            .with_indicator(ProcessIndicator::hidden(DEFAULT_MESSAGE_INTERVAL))
            .with_stop_timeout(Duration::from_secs(5));
        Session { dir, orchestrator }
    }

    fn clustering() -> SubmissionForm {
        SubmissionForm::new(TaskKind::Clustering).source("/photos").output("/out")
    }

    fn no_stops() -> mpsc::UnboundedReceiver<()> {
        mpsc::unbounded_channel().1
    }

    fn system_messages(orchestrator: &Orchestrator) -> Vec<&str> {
        orchestrator
            .console()
            .lines()
            .iter()
            .map(String::as_str)
            .filter(|line| line.starts_with(SYSTEM_MESSAGE_PREFIX))
            .collect()
    }

    #[tokio::test]
    async fn missing_output_is_reported_once() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        let form = SubmissionForm::new(TaskKind::FaceSearch)
            .source("/photos")
            .reference("/faces");

        let err = orchestrator.submit(&form).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::Validation(ValidationError::OutputNotSelected)
        ));

        assert_eq!(orchestrator.notices().len(), 1);
        assert_eq!(orchestrator.notices()[0].title, "OUTPUT_NOT_SELECTED");
        assert_eq!(orchestrator.notices()[0].level, NoticeLevel::Error);
        assert!(!orchestrator.store().handoff_path().exists());
        assert!(orchestrator.registry().is_empty());
        assert_eq!(orchestrator.state(), TaskState::Idle);
        assert!(!orchestrator.indicator().is_visible());
    }

    #[tokio::test]
    async fn face_search_without_source_spawns_nothing() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        let form = SubmissionForm::new(TaskKind::FaceSearch)
            .reference("/r")
            .output("/out");

        let err = orchestrator.submit(&form).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::Validation(ValidationError::PathNotSelected("source"))
        ));
        assert_eq!(orchestrator.notices().len(), 1);
        assert_eq!(orchestrator.notices()[0].title, "PATH_NOT_SELECTED");
        assert!(!orchestrator.store().handoff_path().exists());
        assert!(orchestrator.registry().is_empty());
        assert!(orchestrator.machine().submission_enabled());
    }

    #[tokio::test]
    async fn dp2_match_without_reference_spawns_nothing() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        let form = SubmissionForm::new(TaskKind::Dp2Match)
            .source("/photos")
            .output("/out");

        let err = orchestrator.submit(&form).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::Validation(ValidationError::PathNotSelected("reference"))
        ));
        assert!(orchestrator.registry().is_empty());
        assert!(!orchestrator.store().handoff_path().exists());
        assert_eq!(orchestrator.notices().len(), 1);
        assert_eq!(orchestrator.state(), TaskState::Idle);
    }

    #[tokio::test]
    async fn outcome_does_not_outlive_the_next_submission() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        orchestrator.submit(&clustering()).unwrap();
        assert_eq!(
            orchestrator.run_until_idle(no_stops()).await.unwrap(),
            TaskState::Finished
        );

        let no_source = SubmissionForm::new(TaskKind::Clustering).output("/out");
        assert!(orchestrator.submit(&no_source).is_err());
        assert_eq!(orchestrator.last_outcome(), None);
        assert_eq!(
            orchestrator.run_until_idle(no_stops()).await.unwrap(),
            TaskState::Idle
        );
    }

    #[tokio::test]
    async fn unknown_task_is_fatal_without_notice() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        let form = SubmissionForm {
            task: "NOT_A_TASK".into(),
            source: "/photos".into(),
            output: "/out".into(),
            ..Default::default()
        };

        let err = orchestrator.submit(&form).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::Validation(ValidationError::InvalidTask(_))
        ));
        assert!(orchestrator.notices().is_empty());
        assert_eq!(orchestrator.state(), TaskState::Idle);
    }

    #[tokio::test]
    async fn result_then_finished() {
        let Session { dir: _dir, mut orchestrator } =
            session(ScriptedPipeline::new(Ending::Complete).with_messages(&["50% done"]));
        let results = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(0));
        {
            let results = results.clone();
            orchestrator.on_result(move |msg| results.lock().unwrap().push(msg.to_string()));
            let finished = finished.clone();
            orchestrator.on_finished(move || *finished.lock().unwrap() += 1);
        }
        let titles = Arc::new(Mutex::new(Vec::new()));
        {
            let titles = titles.clone();
            orchestrator.on_notice(move |notice| titles.lock().unwrap().push(notice.title.clone()));
        }

        orchestrator.submit(&clustering()).unwrap();
        assert_eq!(orchestrator.state(), TaskState::Running);
        assert!(orchestrator.store().handoff_path().exists());

        let outcome = orchestrator.run_until_idle(no_stops()).await.unwrap();
        assert_eq!(outcome, TaskState::Finished);
        assert_eq!(orchestrator.state(), TaskState::Idle);
        assert!(
            orchestrator
                .machine()
                .history()
                .ends_with(&[TaskState::Running, TaskState::Finished])
        );

        assert_eq!(system_messages(&orchestrator), [" SYSTEM MESSAGE:  50% done"]);
        assert!(orchestrator.registry().is_empty());
        assert!(orchestrator.counters().is_zero());
        assert!(!orchestrator.indicator().is_visible());
        assert_eq!(*results.lock().unwrap(), ["50% done"]);
        assert_eq!(*finished.lock().unwrap(), 1);
        assert_eq!(*titles.lock().unwrap(), ["Complete"]);

        let notices = orchestrator.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Complete");
        assert!(
            orchestrator
                .console()
                .last()
                .unwrap()
                .starts_with("Processing finished in ")
        );
    }

    #[tokio::test]
    async fn worker_error_raises_one_notice_and_one_cleanup() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Fail));
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            orchestrator.on_error(move |msg| errors.lock().unwrap().push(msg.to_string()));
        }

        orchestrator.submit(&clustering()).unwrap();
        let outcome = orchestrator.run_until_idle(no_stops()).await.unwrap();

        assert_eq!(outcome, TaskState::Error);
        assert_eq!(orchestrator.state(), TaskState::Idle);
        assert_eq!(orchestrator.controller().cleanups(), 1);
        assert_eq!(orchestrator.notices().len(), 1);
        assert_eq!(
            orchestrator.notices()[0].message,
            "An error has occurred during processing: model weights missing"
        );
        assert_eq!(*errors.lock().unwrap(), ["model weights missing"]);
        assert!(orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn operator_stop_ends_in_stopped() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::WaitForCancel));
        let stopped = Arc::new(Mutex::new(false));
        {
            let stopped = stopped.clone();
            orchestrator.on_stopped(move || *stopped.lock().unwrap() = true);
        }

        orchestrator.submit(&clustering()).unwrap();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        stop_tx.send(()).unwrap();

        let outcome = orchestrator.run_until_idle(stop_rx).await.unwrap();
        assert_eq!(outcome, TaskState::Stopped);
        assert!(orchestrator.machine().history().contains(&TaskState::Stopping));
        assert_eq!(orchestrator.notices()[0].title, "Stopped");
        assert_eq!(orchestrator.console().last(), Some("Processing stopped."));
        assert!(*stopped.lock().unwrap());
        assert!(orchestrator.controller().deadline().is_none());
    }

    #[tokio::test]
    async fn stopping_again_after_the_run_is_a_no_op() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        orchestrator.submit(&clustering()).unwrap();
        orchestrator.run_until_idle(no_stops()).await.unwrap();
        assert_eq!(orchestrator.controller().cleanups(), 1);

        assert_eq!(orchestrator.request_stop().unwrap(), 0);
        assert_eq!(orchestrator.request_stop().unwrap(), 0);
        assert_eq!(orchestrator.controller().cleanups(), 1);
        assert_eq!(orchestrator.state(), TaskState::Idle);
    }

    #[tokio::test]
    async fn unresponsive_worker_times_out() {
        let Session { dir: _dir, orchestrator } = session(
            ScriptedPipeline::new(Ending::IgnoreCancelFor(Duration::from_millis(400)))
                .with_messages(&["started"]),
        );
        let mut orchestrator = orchestrator.with_stop_timeout(Duration::from_millis(50));

        let job_id = orchestrator.submit(&clustering()).unwrap();
        // Wait until the pipeline itself is running.
        let first = orchestrator.events.recv().await.unwrap();
        assert_eq!(first.signal, WorkerSignal::Result("started".into()));
        orchestrator.handle_worker_event(first).unwrap();
        assert_eq!(orchestrator.request_stop().unwrap(), 1);

        let outcome = orchestrator.run_until_idle(no_stops()).await.unwrap();
        assert_eq!(outcome, TaskState::Error);
        assert!(orchestrator.registry().is_empty());
        assert_eq!(orchestrator.notices().len(), 1);
        assert!(orchestrator.notices()[0].message.contains("did not acknowledge"));

        // The abandoned worker's late terminal event changes nothing.
        orchestrator
            .handle_worker_event(WorkerEvent {
                job_id,
                signal: WorkerSignal::Finished,
            })
            .unwrap();
        assert_eq!(orchestrator.state(), TaskState::Idle);
        assert_eq!(orchestrator.notices().len(), 1);
    }

    #[tokio::test]
    async fn second_submission_is_rejected_while_running() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::WaitForCancel));
        orchestrator.submit(&clustering()).unwrap();

        let err = orchestrator.submit(&clustering()).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::JobAlreadyRunning(TaskState::Running)
        ));
        assert_eq!(orchestrator.registry().len(), 1);

        orchestrator.request_stop().unwrap();
        assert_eq!(
            orchestrator.run_until_idle(no_stops()).await.unwrap(),
            TaskState::Stopped
        );
        orchestrator.submit(&clustering()).unwrap();
        orchestrator.request_stop().unwrap();
        orchestrator.run_until_idle(no_stops()).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_clears_cache_and_console() {
        let Session { dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        orchestrator.submit(&clustering()).unwrap();

        assert!(matches!(
            orchestrator.refresh(),
            Err(PhotolinkError::JobAlreadyRunning(_))
        ));
        orchestrator.run_until_idle(no_stops()).await.unwrap();

        orchestrator.refresh().unwrap();
        assert_eq!(orchestrator.process_notices(), 2);
        assert!(!dir.path().join("cache").join(HANDOFF_FILE).exists());
        assert!(dir.path().join("cache").is_dir());
        assert!(
            orchestrator
                .console()
                .lines()
                .contains(&"Cache deleted successfully.".to_string())
        );
        assert!(!orchestrator.console().lines().iter().any(|l| l.contains("Processing")));
    }

    #[tokio::test]
    async fn noisy_results_stay_out_of_the_console() {
        let Session { dir: _dir, mut orchestrator } = session(
            ScriptedPipeline::new(Ending::Complete).with_messages(&["SOS heartbeat", "processed 2/2 images (100%)"]),
        );
        orchestrator.submit(&clustering()).unwrap();
        orchestrator.run_until_idle(no_stops()).await.unwrap();

        assert_eq!(
            system_messages(&orchestrator),
            [" SYSTEM MESSAGE:  processed 2/2 images (100%)"]
        );
    }

    #[tokio::test]
    async fn run_until_idle_returns_immediately_when_idle() {
        let Session { dir: _dir, mut orchestrator } = session(ScriptedPipeline::new(Ending::Complete));
        assert_eq!(
            orchestrator.run_until_idle(no_stops()).await.unwrap(),
            TaskState::Idle
        );
    }
}
