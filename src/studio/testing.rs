//! Scripted collaborators for studio tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::imagegen::{
    GenerationBackend, GenerationRequest, RemoteJobState, TrainingRequest, TrainingStatusReport,
};
use crate::studio::error::StudioError;
use crate::studio::poller::{PollPhase, TrainingObserver};
use crate::studio::repository::{MemoryRepository, StudioRepository};
use crate::studio::types::{
    Character, ConceptSet, JobStatus, NewCharacter, TrainingJob, TrainingStatus,
};

pub fn running() -> TrainingStatusReport {
    TrainingStatusReport {
        state: RemoteJobState::Running,
        model_id: None,
        message: None,
    }
}

pub fn succeeded(model_id: &str) -> TrainingStatusReport {
    TrainingStatusReport {
        state: RemoteJobState::Succeeded,
        model_id: Some(model_id.to_string()),
        message: None,
    }
}

pub fn failed(message: &str) -> TrainingStatusReport {
    TrainingStatusReport {
        state: RemoteJobState::Failed,
        model_id: None,
        message: Some(message.to_string()),
    }
}

#[derive(Default)]
struct FakeState {
    generate_script: VecDeque<Result<ConceptSet, StudioError>>,
    echo_generate: bool,
    generate_requests: Vec<GenerationRequest>,
    submit_script: VecDeque<Result<String, StudioError>>,
    submit_requests: Vec<TrainingRequest>,
    status_script: VecDeque<Result<TrainingStatusReport, StudioError>>,
    status_fallback: Option<TrainingStatusReport>,
    status_calls: usize,
}

/// Answers from scripted queues; once a queue is empty it falls back to the
/// configured default.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unscripted generate calls return `samples` distinct URLs.
    pub fn echo_generate(&self) {
        self.state.lock().echo_generate = true;
    }

    pub fn script_generate<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<ConceptSet, StudioError>>,
    {
        self.state.lock().generate_script.extend(results);
    }

    pub fn script_submit<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<String, StudioError>>,
    {
        self.state.lock().submit_script.extend(results);
    }

    pub fn script_status<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<TrainingStatusReport, StudioError>>,
    {
        self.state.lock().status_script.extend(results);
    }

    pub fn set_status_fallback(&self, report: TrainingStatusReport) {
        self.state.lock().status_fallback = Some(report);
    }

    pub fn generate_requests(&self) -> Vec<GenerationRequest> {
        self.state.lock().generate_requests.clone()
    }

    pub fn submit_requests(&self) -> Vec<TrainingRequest> {
        self.state.lock().submit_requests.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }
}

impl GenerationBackend for FakeBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<ConceptSet, StudioError> {
        let mut state = self.state.lock();
        state.generate_requests.push(request.clone());
        let call = state.generate_requests.len();
        if let Some(result) = state.generate_script.pop_front() {
            return result;
        }
        if state.echo_generate {
            return Ok((0..request.samples)
                .map(|index| format!("https://cdn.example/gen-{call}-{index}.png"))
                .collect());
        }
        Err(StudioError::Generation("backend unavailable".to_string()))
    }

    async fn submit_training(&self, request: &TrainingRequest) -> Result<String, StudioError> {
        let mut state = self.state.lock();
        state.submit_requests.push(request.clone());
        let call = state.submit_requests.len();
        state
            .submit_script
            .pop_front()
            .unwrap_or_else(|| Ok(format!("job-{call}")))
    }

    async fn training_status(&self, _job_id: &str) -> Result<TrainingStatusReport, StudioError> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        if let Some(result) = state.status_script.pop_front() {
            return result;
        }
        state
            .status_fallback
            .clone()
            .ok_or_else(|| StudioError::StatusCheck("no scripted status".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Progress(u8),
    Succeeded(String),
    Failed(Option<String>),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn succeeded_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ObservedEvent::Succeeded(_)))
            .count()
    }
}

impl TrainingObserver for RecordingObserver {
    async fn on_progress(&self, _job_id: &str, _phase: PollPhase, progress: u8) {
        self.events.lock().push(ObservedEvent::Progress(progress));
    }

    async fn on_succeeded(&self, _job_id: &str, model_id: &str) {
        self.events
            .lock()
            .push(ObservedEvent::Succeeded(model_id.to_string()));
    }

    async fn on_failed(&self, _job_id: &str, reason: Option<&str>, _progress: u8) {
        self.events
            .lock()
            .push(ObservedEvent::Failed(reason.map(str::to_string)));
    }
}

/// In-memory repository whose character writes can be switched off.
#[derive(Default)]
pub struct FlakyRepository {
    inner: MemoryRepository,
    fail_character_writes: AtomicBool,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_character_writes(&self, fail: bool) {
        self.fail_character_writes.store(fail, Ordering::SeqCst);
    }

    fn check_character_write(&self) -> anyhow::Result<()> {
        if self.fail_character_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("characters table is locked"));
        }
        Ok(())
    }
}

impl StudioRepository for FlakyRepository {
    async fn create_character(&self, character: NewCharacter) -> anyhow::Result<Character> {
        self.check_character_write()?;
        self.inner.create_character(character).await
    }

    async fn get_character(&self, id: i64) -> anyhow::Result<Option<Character>> {
        self.inner.get_character(id).await
    }

    async fn update_character_training(
        &self,
        id: i64,
        status: TrainingStatus,
        model_id: Option<&str>,
    ) -> anyhow::Result<Option<Character>> {
        self.check_character_write()?;
        self.inner.update_character_training(id, status, model_id).await
    }

    async fn list_characters(&self, owner_id: i64) -> anyhow::Result<Vec<Character>> {
        self.inner.list_characters(owner_id).await
    }

    async fn record_training_job(&self, job: &TrainingJob) -> anyhow::Result<()> {
        self.inner.record_training_job(job).await
    }

    async fn update_training_job(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        model_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.inner
            .update_training_job(id, status, progress, model_id)
            .await
    }

    async fn get_training_job(&self, id: &str) -> anyhow::Result<Option<TrainingJob>> {
        self.inner.get_training_job(id).await
    }

    async fn pending_training_jobs(&self) -> anyhow::Result<Vec<TrainingJob>> {
        self.inner.pending_training_jobs().await
    }
}
