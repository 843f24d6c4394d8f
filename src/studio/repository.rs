use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;

use crate::studio::types::{Character, JobStatus, NewCharacter, TrainingJob, TrainingStatus};

/// Persistence seam for the studio. The workflow, gallery and pollers only see
/// this trait; `Database` (SQLite) and `MemoryRepository` implement it.
pub trait StudioRepository: Send + Sync + 'static {
    fn create_character(
        &self,
        character: NewCharacter,
    ) -> impl Future<Output = Result<Character>> + Send;

    fn get_character(&self, id: i64) -> impl Future<Output = Result<Option<Character>>> + Send;

    /// Sets the training status; `model_id` is stored only for `Complete`.
    fn update_character_training(
        &self,
        id: i64,
        status: TrainingStatus,
        model_id: Option<&str>,
    ) -> impl Future<Output = Result<Option<Character>>> + Send;

    /// Characters owned by `owner_id`, oldest first.
    fn list_characters(&self, owner_id: i64)
        -> impl Future<Output = Result<Vec<Character>>> + Send;

    fn record_training_job(&self, job: &TrainingJob) -> impl Future<Output = Result<()>> + Send;

    fn update_training_job(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        model_id: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_training_job(&self, id: &str)
        -> impl Future<Output = Result<Option<TrainingJob>>> + Send;

    /// Jobs still `submitted` or `running`, oldest first.
    fn pending_training_jobs(&self) -> impl Future<Output = Result<Vec<TrainingJob>>> + Send;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_character_id: i64,
    characters: BTreeMap<i64, Character>,
    jobs: Vec<TrainingJob>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StudioRepository for MemoryRepository {
    async fn create_character(&self, character: NewCharacter) -> Result<Character> {
        let mut inner = self.inner.lock();
        inner.next_character_id += 1;
        let id = inner.next_character_id;
        let model_id = match character.training_status {
            TrainingStatus::Complete => character.model_id,
            _ => None,
        };
        let stored = Character {
            id,
            owner_id: character.owner_id,
            name: character.name,
            description: character.description,
            preview_image: character.preview_image,
            training_status: character.training_status,
            model_id,
            created_at: Utc::now(),
        };
        inner.characters.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_character(&self, id: i64) -> Result<Option<Character>> {
        Ok(self.inner.lock().characters.get(&id).cloned())
    }

    async fn update_character_training(
        &self,
        id: i64,
        status: TrainingStatus,
        model_id: Option<&str>,
    ) -> Result<Option<Character>> {
        let mut inner = self.inner.lock();
        let Some(character) = inner.characters.get_mut(&id) else {
            return Ok(None);
        };
        character.training_status = status;
        character.model_id = match status {
            TrainingStatus::Complete => model_id.map(str::to_string),
            _ => None,
        };
        Ok(Some(character.clone()))
    }

    async fn list_characters(&self, owner_id: i64) -> Result<Vec<Character>> {
        Ok(self
            .inner
            .lock()
            .characters
            .values()
            .filter(|character| character.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn record_training_job(&self, job: &TrainingJob) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.jobs.iter().any(|existing| existing.id == job.id) {
            return Err(anyhow!("Training job {} is already recorded", job.id));
        }
        inner.jobs.push(job.clone());
        Ok(())
    }

    async fn update_training_job(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        model_id: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| anyhow!("Unknown training job {id}"))?;
        job.status = status;
        job.progress = progress.min(100);
        if let Some(model_id) = model_id {
            job.result_model_id = Some(model_id.to_string());
        }
        Ok(())
    }

    async fn get_training_job(&self, id: &str) -> Result<Option<TrainingJob>> {
        Ok(self.inner.lock().jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn pending_training_jobs(&self) -> Result<Vec<TrainingJob>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .iter()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect())
    }
}
