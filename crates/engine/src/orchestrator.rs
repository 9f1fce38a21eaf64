//! Batch control loop: owns the job table, admits queued jobs FIFO up to the
//! parallel limit, applies runner events, and answers UI commands.
//!
//! The state machine itself ([`Orchestrator`]) is synchronous and single
//! threaded; all concurrency lives in the runner tasks and the thin channel
//! shell ([`OrchestratorHandle`]) around it.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::admission::{AdmissionDecision, AdmissionGate};
use crate::capability::EncoderCapabilities;
use crate::config::{Settings, SettingsPatch};
use crate::job::{Job, JobStatus};
use crate::planner::{self, EncodePlan};
use crate::probe;
use crate::slots;

/// Monotonic launch counter. Every admission gets a fresh run id; events
/// carrying a run id that is no longer current are discarded, so a stopped
/// process can never write into its job's next attempt.
pub type RunId = u64;

/// How an external encode ended.
#[derive(Debug, Clone)]
pub enum ExitOutcome {
    /// Clean zero exit; `output_size` is the probed size of the result
    Success { output_size: Option<u64> },
    Failure { detail: String },
    /// Terminated by signal. A kill is a cancellation, never an error.
    Killed,
}

/// Event emitted by a runner task, tagged with the run it belongs to.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress {
        job_id: Uuid,
        run: RunId,
        fraction: f64,
    },
    Exited {
        job_id: Uuid,
        run: RunId,
        outcome: ExitOutcome,
    },
}

/// Everything a runner needs to execute one encode attempt.
///
/// `settings` is a snapshot taken at admission time: edits made while the
/// encode runs never leak into it.
pub struct LaunchRequest {
    pub job_id: Uuid,
    pub run: RunId,
    pub source: PathBuf,
    pub output: PathBuf,
    pub plan: EncodePlan,
    pub settings: Settings,
    pub events: mpsc::UnboundedSender<JobEvent>,
}

/// Kill switch for one running encode. Dropping it without firing leaves the
/// encode running to completion.
#[derive(Debug)]
pub struct OperationHandle {
    kill: Option<oneshot::Sender<()>>,
}

impl OperationHandle {
    pub fn new(kill: oneshot::Sender<()>) -> Self {
        Self { kill: Some(kill) }
    }

    pub(crate) fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            // the runner may already have exited; that's fine
            let _ = tx.send(());
        }
    }
}

/// Seam between the orchestrator and the external encode processes.
///
/// `launch` must return quickly; the actual work happens on a spawned task
/// that reports through `request.events` and ends with exactly one `Exited`.
pub trait EncodeRunner: Send {
    fn launch(&mut self, request: LaunchRequest) -> Result<OperationHandle>;
}

/// Rejections for commands the current state doesn't permit.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no job with id {0}")]
    UnknownJob(Uuid),
    #[error("job {0} is processing; stop it before removing it")]
    JobBusy(Uuid),
    #[error("a batch is running; stop it first")]
    BatchActive,
    #[error("nothing to start: the queue is empty")]
    EmptyQueue,
    #[error("not allowed: {0}")]
    AdmissionDenied(String),
    #[error("engine has shut down")]
    Closed,
}

struct RunningOperation {
    run: RunId,
    output: PathBuf,
    handle: OperationHandle,
    /// Kill sent and the job requeued; the slot and the output file stay
    /// owned by the dying process until its exit event arrives.
    draining: bool,
}

/// The batch state machine. All mutation goes through its methods; readers
/// get cloned snapshots.
pub struct Orchestrator {
    settings: Settings,
    caps: EncoderCapabilities,
    gate: Box<dyn AdmissionGate>,
    runner: Box<dyn EncodeRunner>,
    /// Jobs in submission order; admission walks this front to back
    jobs: Vec<Job>,
    running: HashMap<Uuid, RunningOperation>,
    batch_active: bool,
    next_run: RunId,
    events_tx: mpsc::UnboundedSender<JobEvent>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        caps: EncoderCapabilities,
        runner: Box<dyn EncodeRunner>,
        gate: Box<dyn AdmissionGate>,
        events_tx: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            settings,
            caps,
            gate,
            runner,
            jobs: Vec::new(),
            running: HashMap::new(),
            batch_active: false,
            next_run: 0,
            events_tx,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn batch_active(&self) -> bool {
        self.batch_active
    }

    /// Whole-batch completion in percent: finished jobs (completed or
    /// errored) over all jobs. Partial per-file progress does not count.
    pub fn aggregate_progress(&self) -> f32 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        let finished = self.jobs.iter().filter(|j| j.status.is_terminal()).count();
        finished as f32 / self.jobs.len() as f32 * 100.0
    }

    /// Append a file to the queue. Rejected while a batch runs, matching the
    /// drop target being disabled during processing.
    pub fn submit(&mut self, source: PathBuf, original_size: u64) -> Result<Uuid, CommandError> {
        if self.batch_active {
            return Err(CommandError::BatchActive);
        }
        let job = Job::new(source, original_size);
        let id = job.id;
        log::info!("queued {} ({} bytes)", job.name, original_size);
        self.jobs.push(job);
        Ok(id)
    }

    pub fn remove(&mut self, id: Uuid) -> Result<(), CommandError> {
        let job = self.find(id)?;
        if job.status == JobStatus::Processing {
            return Err(CommandError::JobBusy(id));
        }
        self.jobs.retain(|j| j.id != id);
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<(), CommandError> {
        if self.jobs.iter().any(|j| j.status == JobStatus::Processing) {
            return Err(CommandError::BatchActive);
        }
        self.jobs.clear();
        Ok(())
    }

    /// Start (or resume) the batch. The admission gate is consulted exactly
    /// once, before anything launches; a denial leaves every job untouched.
    pub fn start(&mut self) -> Result<(), CommandError> {
        if self.batch_active {
            return Ok(());
        }
        if self.jobs.is_empty() {
            return Err(CommandError::EmptyQueue);
        }
        if let AdmissionDecision::Denied(reason) = self.gate.check_admission(self.jobs.len()) {
            log::warn!("batch start denied: {reason}");
            return Err(CommandError::AdmissionDenied(reason));
        }

        // a fully finished batch restarts from scratch
        if self.jobs.iter().all(|j| j.status.is_terminal()) {
            for job in &mut self.jobs {
                job.requeue();
            }
        }

        self.batch_active = true;
        log::info!("batch started: {} jobs, limit {}", self.jobs.len(), self.settings.parallel_limit);
        self.pump();
        Ok(())
    }

    /// Stop one running job; it rejoins the queue in its original submission
    /// slot. The killed run keeps its slot until its exit event arrives, so no
    /// successor is ever spawned against an output file the dying process may
    /// still be writing. A no-op for jobs that aren't processing.
    pub fn stop_one(&mut self, id: Uuid) -> Result<(), CommandError> {
        let idx = self
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or(CommandError::UnknownJob(id))?;
        if self.jobs[idx].status != JobStatus::Processing {
            return Ok(());
        }
        if let Some(op) = self.running.get_mut(&id) {
            op.handle.kill();
            op.draining = true;
        }
        let job = &mut self.jobs[idx];
        log::info!("stopping {}", job.name);
        job.requeue();
        self.pump();
        Ok(())
    }

    /// Stop the whole batch: kill every running encode and return it to the
    /// queue with zero progress. Nothing is admitted again until the next
    /// `start`, and the killed runs hold their slots until their exits are
    /// confirmed.
    pub fn stop_all(&mut self) {
        self.batch_active = false;
        for op in self.running.values_mut() {
            op.handle.kill();
            op.draining = true;
        }
        for job in &mut self.jobs {
            if job.status == JobStatus::Processing {
                log::info!("stopped {}", job.name);
                job.requeue();
            }
        }
    }

    /// Apply a partial settings edit. Running encodes keep the snapshot they
    /// launched with; a raised parallel limit takes effect immediately.
    pub fn update_settings(&mut self, patch: &SettingsPatch) {
        patch.apply_to(&mut self.settings);
        if self.batch_active {
            self.pump();
        }
    }

    pub fn set_parallel_limit(&mut self, limit: usize) {
        self.settings.parallel_limit = limit.max(1);
        if self.batch_active {
            self.pump();
        }
    }

    /// Apply one runner event. Events from superseded runs are dropped here;
    /// this is the only place run ids are checked.
    pub fn handle_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Progress { job_id, run, fraction } => {
                if !self.is_current_run(job_id, run) {
                    return;
                }
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) {
                    job.update_progress((fraction * 100.0) as f32);
                }
            }
            JobEvent::Exited { job_id, run, outcome } => {
                if !self.is_current_run(job_id, run) {
                    log::debug!("discarding stale exit for job {job_id} run {run}");
                    return;
                }
                let op = match self.running.remove(&job_id) {
                    Some(op) => op,
                    None => return,
                };
                if op.draining {
                    // last event of a stopped run: the job is already back in
                    // the queue, only the slot needed releasing
                    self.pump();
                    return;
                }
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) {
                    match outcome {
                        ExitOutcome::Success { output_size } => {
                            job.status = JobStatus::Completed;
                            job.progress = 100.0;
                            job.output_size = output_size;
                            job.output_path = Some(op.output);
                            job.finished_at = Some(Utc::now());
                            log::info!("completed {}", job.name);
                        }
                        ExitOutcome::Failure { detail } => {
                            job.status = JobStatus::Error;
                            job.progress = 0.0;
                            job.reason = Some(detail);
                            job.finished_at = Some(Utc::now());
                            log::error!("failed {}: {}", job.name, job.reason.as_deref().unwrap_or(""));
                        }
                        ExitOutcome::Killed => {
                            // killed outside our own stop commands (signal,
                            // OOM); treat like a stop and let it retry
                            log::warn!("encode for {} was killed externally", job.name);
                            job.requeue();
                        }
                    }
                }
                self.pump();
            }
        }
    }

    fn is_current_run(&self, job_id: Uuid, run: RunId) -> bool {
        self.running.get(&job_id).map(|op| op.run) == Some(run)
    }

    fn find(&self, id: Uuid) -> Result<&Job, CommandError> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or(CommandError::UnknownJob(id))
    }

    /// Fill free slots with queued jobs, front of the queue first, then check
    /// whether the batch just finished.
    fn pump(&mut self) {
        if !self.batch_active {
            return;
        }
        while slots::available(self.settings.parallel_limit, self.running.len()) > 0 {
            // a queued job whose previous run is still draining stays out of
            // admission until that run's exit arrives
            let Some(idx) = self
                .jobs
                .iter()
                .position(|j| j.status == JobStatus::Queued && !self.running.contains_key(&j.id))
            else {
                break;
            };
            self.launch_at(idx);
        }
        let busy = self
            .jobs
            .iter()
            .any(|j| matches!(j.status, JobStatus::Queued | JobStatus::Processing));
        if !busy {
            self.batch_active = false;
            log::info!("batch finished");
        }
    }

    fn launch_at(&mut self, idx: usize) {
        let mut settings = self.settings.clone();
        // the planner treats out-of-range levels as a contract violation
        settings.compression_level = settings.clamped_level();
        let run = self.next_run;
        self.next_run += 1;

        let job = &mut self.jobs[idx];
        let output = settings.output_path_for(&job.source_path);
        let plan = planner::plan(&job.source_path, &output, &settings, &self.caps);

        job.status = JobStatus::Processing;
        job.progress = 0.0;
        job.reason = None;
        job.started_at = Some(Utc::now());

        let request = LaunchRequest {
            job_id: job.id,
            run,
            source: job.source_path.clone(),
            output: output.clone(),
            plan,
            settings,
            events: self.events_tx.clone(),
        };
        match self.runner.launch(request) {
            Ok(handle) => {
                log::info!("encoding {}", job.name);
                self.running
                    .insert(job.id, RunningOperation { run, output, handle, draining: false });
            }
            Err(e) => {
                job.status = JobStatus::Error;
                job.reason = Some(format!("{e:#}"));
                job.finished_at = Some(Utc::now());
                log::error!("failed to launch encode for {}: {e:#}", job.name);
            }
        }
    }
}

/// Point-in-time view of the batch for UIs and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub jobs: Vec<Job>,
    pub aggregate_progress: f32,
    pub batch_active: bool,
}

enum Command {
    Submit {
        source: PathBuf,
        reply: oneshot::Sender<Result<Uuid, CommandError>>,
    },
    Remove {
        id: Uuid,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    StopOne {
        id: Uuid,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    StopAll {
        reply: oneshot::Sender<()>,
    },
    UpdateSettings {
        patch: Box<SettingsPatch>,
        reply: oneshot::Sender<()>,
    },
    SetParallelLimit {
        limit: usize,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<BatchSnapshot>,
    },
}

/// Cloneable front door to a spawned orchestrator task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    /// Spawn the control loop on the current runtime.
    pub fn spawn(
        settings: Settings,
        caps: EncoderCapabilities,
        runner: Box<dyn EncodeRunner>,
        gate: Box<dyn AdmissionGate>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let core = Orchestrator::new(settings, caps, runner, gate, event_tx);
        tokio::spawn(run_loop(core, cmd_rx, event_rx));
        Self { tx: cmd_tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).map_err(|_| CommandError::Closed)?;
        reply_rx.await.map_err(|_| CommandError::Closed)
    }

    pub async fn submit(&self, source: PathBuf) -> Result<Uuid, CommandError> {
        self.request(|reply| Command::Submit { source, reply }).await?
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), CommandError> {
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    pub async fn clear_all(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::ClearAll { reply }).await?
    }

    pub async fn start(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Start { reply }).await?
    }

    pub async fn stop_one(&self, id: Uuid) -> Result<(), CommandError> {
        self.request(|reply| Command::StopOne { id, reply }).await?
    }

    pub async fn stop_all(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::StopAll { reply }).await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<(), CommandError> {
        self.request(|reply| Command::UpdateSettings { patch: Box::new(patch), reply })
            .await
    }

    pub async fn set_parallel_limit(&self, limit: usize) -> Result<(), CommandError> {
        self.request(|reply| Command::SetParallelLimit { limit, reply }).await
    }

    pub async fn snapshot(&self) -> Result<BatchSnapshot, CommandError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}

async fn run_loop(
    mut core: Orchestrator,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut event_rx: mpsc::UnboundedReceiver<JobEvent>,
) {
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => core.handle_event(event),
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => dispatch(&mut core, cmd).await,
                // every handle dropped; running encodes finish unobserved
                None => break,
            },
        }
    }
}

async fn dispatch(core: &mut Orchestrator, command: Command) {
    match command {
        Command::Submit { source, reply } => {
            let result = if core.batch_active() {
                Err(CommandError::BatchActive)
            } else {
                let size = probe::file_size(&core.settings().ffprobe_bin, &source).await;
                core.submit(source, size)
            };
            let _ = reply.send(result);
        }
        Command::Remove { id, reply } => {
            let _ = reply.send(core.remove(id));
        }
        Command::ClearAll { reply } => {
            let _ = reply.send(core.clear_all());
        }
        Command::Start { reply } => {
            let _ = reply.send(core.start());
        }
        Command::StopOne { id, reply } => {
            let _ = reply.send(core.stop_one(id));
        }
        Command::StopAll { reply } => {
            core.stop_all();
            let _ = reply.send(());
        }
        Command::UpdateSettings { patch, reply } => {
            core.update_settings(&patch);
            let _ = reply.send(());
        }
        Command::SetParallelLimit { limit, reply } => {
            core.set_parallel_limit(limit);
            let _ = reply.send(());
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(BatchSnapshot {
                jobs: core.jobs().to_vec(),
                aggregate_progress: core.aggregate_progress(),
                batch_active: core.batch_active(),
            });
        }
    }
}
