use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::imagegen::{GenerationBackend, RemoteJobState, TrainingStatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Highest value the running estimate may reach before the job finishes.
    pub progress_cap: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl PollPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            PollPhase::Idle => "idle",
            PollPhase::Submitted => "submitted",
            PollPhase::Running => "running",
            PollPhase::Succeeded => "succeeded",
            PollPhase::Failed => "failed",
            PollPhase::Cancelled => "cancelled",
        }
    }

    /// True once no further transition can happen.
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            PollPhase::Succeeded | PollPhase::Failed | PollPhase::Cancelled
        )
    }
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the poller's transitions. Calls for one job are serialized and
/// none arrive after `TrainingPoller::cancel` returns.
///
/// `progress` is a local estimate that moves by one per running tick; the
/// backend does not report real training progress.
pub trait TrainingObserver: Send + Sync + 'static {
    fn on_progress(
        &self,
        job_id: &str,
        phase: PollPhase,
        progress: u8,
    ) -> impl Future<Output = ()> + Send;

    fn on_succeeded(&self, job_id: &str, model_id: &str) -> impl Future<Output = ()> + Send;

    fn on_failed(
        &self,
        job_id: &str,
        reason: Option<&str>,
        progress: u8,
    ) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    Progress { phase: PollPhase, progress: u8 },
    Succeeded(String),
    Failed(Option<String>),
    Wait,
}

fn next_transition(
    phase: PollPhase,
    progress: u8,
    progress_cap: u8,
    report: &TrainingStatusReport,
) -> Transition {
    if phase.is_final() {
        return Transition::Wait;
    }
    match &report.state {
        RemoteJobState::Running => {
            let next = if progress < progress_cap {
                progress + 1
            } else {
                progress
            };
            Transition::Progress {
                phase: PollPhase::Running,
                progress: next,
            }
        }
        RemoteJobState::Succeeded => match report.model_id.as_deref() {
            Some(model_id) => Transition::Succeeded(model_id.to_string()),
            None => Transition::Wait,
        },
        RemoteJobState::Failed => Transition::Failed(report.message.clone()),
        RemoteJobState::Other(_) => Transition::Wait,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSnapshot {
    pub phase: PollPhase,
    pub progress: u8,
}

#[derive(Debug)]
struct PollState {
    snapshot: PollSnapshot,
    cancelled: bool,
}

#[derive(Debug)]
struct PollerShared {
    // Held while a tick applies a transition; cancel takes it too, so a
    // transition is either fully applied before cancel returns or never.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<PollState>,
}

/// Background status poller for one training job.
pub struct TrainingPoller {
    job_id: String,
    shared: Arc<PollerShared>,
    task: Option<JoinHandle<()>>,
}

impl TrainingPoller {
    pub fn start<B, O>(
        backend: Arc<B>,
        observer: Arc<O>,
        job_id: String,
        settings: PollerSettings,
        initial_progress: u8,
    ) -> Self
    where
        B: GenerationBackend,
        O: TrainingObserver,
    {
        let shared = Arc::new(PollerShared {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(PollState {
                snapshot: PollSnapshot {
                    phase: PollPhase::Submitted,
                    progress: initial_progress.min(settings.progress_cap),
                },
                cancelled: false,
            }),
        });

        info!(
            "Polling training job {} every {:?}",
            job_id, settings.interval
        );
        let task = tokio::spawn(run_poller(
            backend,
            observer,
            job_id.clone(),
            settings,
            Arc::clone(&shared),
        ));

        TrainingPoller {
            job_id,
            shared,
            task: Some(task),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.shared.state.lock().snapshot
    }

    pub fn phase(&self) -> PollPhase {
        self.snapshot().phase
    }

    pub fn progress(&self) -> u8 {
        self.snapshot().progress
    }

    /// Stops polling. Once this returns no observer call for this job will
    /// happen. The remote job itself keeps running.
    pub async fn cancel(&mut self) {
        let _gate = self.shared.gate.lock().await;
        {
            let mut state = self.shared.state.lock();
            state.cancelled = true;
            if !state.snapshot.phase.is_final() {
                state.snapshot.phase = PollPhase::Cancelled;
                info!("Cancelled polling for training job {}", self.job_id);
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Resolves when the job reaches a terminal state or polling is cancelled.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("Poller task for job {} ended abnormally: {}", self.job_id, err);
                }
            }
            self.task = None;
        }
    }
}

impl Drop for TrainingPoller {
    fn drop(&mut self) {
        self.shared.state.lock().cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_poller<B, O>(
    backend: Arc<B>,
    observer: Arc<O>,
    job_id: String,
    settings: PollerSettings,
    shared: Arc<PollerShared>,
) where
    B: GenerationBackend,
    O: TrainingObserver,
{
    loop {
        tokio::time::sleep(settings.interval).await;

        let report = match backend.training_status(&job_id).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Error checking training status for job {}: {}", job_id, err);
                continue;
            }
        };

        let _gate = shared.gate.lock().await;
        let current = {
            let state = shared.state.lock();
            if state.cancelled {
                return;
            }
            state.snapshot
        };

        match next_transition(current.phase, current.progress, settings.progress_cap, &report) {
            Transition::Wait => {
                if report.state == RemoteJobState::Succeeded {
                    warn!(
                        "Training job {} reported success without a model id; waiting",
                        job_id
                    );
                } else {
                    debug!("Training job {} state {:?}; waiting", job_id, report.state);
                }
            }
            Transition::Progress { phase, progress } => {
                if current.phase != phase {
                    info!("Training job {} is now {}", job_id, phase);
                }
                shared.state.lock().snapshot = PollSnapshot { phase, progress };
                observer.on_progress(&job_id, phase, progress).await;
            }
            Transition::Succeeded(model_id) => {
                shared.state.lock().snapshot = PollSnapshot {
                    phase: PollPhase::Succeeded,
                    progress: 100,
                };
                info!("Training job {} succeeded with model {}", job_id, model_id);
                observer.on_succeeded(&job_id, &model_id).await;
                return;
            }
            Transition::Failed(reason) => {
                shared.state.lock().snapshot.phase = PollPhase::Failed;
                warn!(
                    "Training job {} failed: {}",
                    job_id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                observer
                    .on_failed(&job_id, reason.as_deref(), current.progress)
                    .await;
                return;
            }
        }
    }
}
