use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::studio::error::StudioError;
use crate::studio::repository::StudioRepository;
use crate::studio::types::{Character, JobStatus, NewCharacter, TrainingJob, TrainingStatus};

pub fn validate_image_url(value: &str) -> Result<String, StudioError> {
    let trimmed = value.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(trimmed.to_string()),
        _ => Err(StudioError::InvalidImageUrl(trimmed.to_string())),
    }
}

/// The character collection. Every write to a `Character` goes through here so
/// the `model_id`/status pairing stays consistent.
pub struct Gallery<R> {
    repo: Arc<R>,
}

impl<R> Clone for Gallery<R> {
    fn clone(&self) -> Self {
        Gallery {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: StudioRepository> Gallery<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Gallery { repo }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub async fn list(&self, owner_id: i64) -> Result<Vec<Character>, StudioError> {
        Ok(self.repo.list_characters(owner_id).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Character>, StudioError> {
        Ok(self.repo.get_character(id).await?)
    }

    /// Saves a single generated image as an untrained character.
    pub async fn adopt_image(
        &self,
        owner_id: i64,
        name: &str,
        description: &str,
        image_url: &str,
    ) -> Result<Character, StudioError> {
        let preview_image = validate_image_url(image_url)?;
        let name = match name.trim() {
            "" => {
                let existing = self.repo.list_characters(owner_id).await?.len();
                format!("Character {}", existing + 1)
            }
            trimmed => trimmed.to_string(),
        };
        let character = self
            .repo
            .create_character(NewCharacter {
                owner_id,
                name,
                description: description.trim().to_string(),
                preview_image,
                training_status: TrainingStatus::NotStarted,
                model_id: None,
            })
            .await?;
        info!(
            "Saved image as character {} ({}) for owner {}",
            character.id, character.name, owner_id
        );
        Ok(character)
    }

    /// Records a freshly submitted job and flags its target character, if any.
    pub async fn begin_training(&self, job: &TrainingJob) -> Result<(), StudioError> {
        self.repo.record_training_job(job).await?;
        if let Some(character_id) = job.character_id {
            let updated = self
                .repo
                .update_character_training(character_id, TrainingStatus::InProgress, None)
                .await?;
            if updated.is_none() {
                warn!(
                    "Training job {} targets missing character {}",
                    job.id, character_id
                );
            }
        }
        Ok(())
    }

    pub async fn record_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: u8,
    ) -> Result<(), StudioError> {
        Ok(self
            .repo
            .update_training_job(job_id, status, progress, None)
            .await?)
    }

    /// Materializes the result of a successful job: updates the target
    /// character, or appends a new one when the job has no target. The job is
    /// only marked succeeded once the character is stored, so a failed write
    /// leaves it pending for `resume`.
    pub async fn complete_training(
        &self,
        job: &TrainingJob,
        model_id: &str,
    ) -> Result<Character, StudioError> {
        let character = self.store_trained_character(job, model_id).await?;
        self.repo
            .update_training_job(&job.id, JobStatus::Succeeded, 100, Some(model_id))
            .await?;
        Ok(character)
    }

    async fn store_trained_character(
        &self,
        job: &TrainingJob,
        model_id: &str,
    ) -> Result<Character, StudioError> {
        if let Some(character_id) = job.character_id {
            if let Some(character) = self
                .repo
                .update_character_training(character_id, TrainingStatus::Complete, Some(model_id))
                .await?
            {
                info!(
                    "Character {} trained with model {} (job {})",
                    character.id, model_id, job.id
                );
                return Ok(character);
            }
            warn!(
                "Character {} vanished before job {} finished; creating a new entry",
                character_id, job.id
            );
        }

        let character = self
            .repo
            .create_character(NewCharacter {
                owner_id: job.owner_id,
                name: job.name.clone(),
                description: job.description.clone(),
                preview_image: job.preview_image().to_string(),
                training_status: TrainingStatus::Complete,
                model_id: Some(model_id.to_string()),
            })
            .await?;
        info!(
            "Added trained character {} ({}) with model {} (job {})",
            character.id, character.name, model_id, job.id
        );
        Ok(character)
    }

    pub async fn fail_training(&self, job: &TrainingJob, progress: u8) -> Result<(), StudioError> {
        self.repo
            .update_training_job(&job.id, JobStatus::Failed, progress, None)
            .await?;
        if let Some(character_id) = job.character_id {
            self.repo
                .update_character_training(character_id, TrainingStatus::Failed, None)
                .await?;
        }
        Ok(())
    }
}
