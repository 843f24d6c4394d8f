//! Fine-tuning from images the user already has, outside the guided
//! character workflow, and resumption of jobs left running by an earlier
//! process.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::imagegen::{GenerationBackend, TrainingStatusReport};
use crate::studio::error::StudioError;
use crate::studio::gallery::{validate_image_url, Gallery};
use crate::studio::poller::{PollPhase, TrainingObserver, TrainingPoller};
use crate::studio::repository::StudioRepository;
use crate::studio::types::{JobStatus, TrainingJob};
use crate::studio::StudioSettings;

#[derive(Debug, Clone)]
pub struct LoraTrainingRequest {
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    /// Falls back to the configured base model.
    pub base_model: Option<String>,
    /// Existing character that receives the trained model.
    pub character_id: Option<i64>,
}

/// A submitted job together with the poller tracking it.
pub struct LoraTraining {
    pub job: TrainingJob,
    pub poller: TrainingPoller,
}

/// Writes every poller transition straight to the gallery.
pub struct GalleryObserver<R> {
    gallery: Gallery<R>,
    job: TrainingJob,
}

impl<R> GalleryObserver<R> {
    pub fn new(gallery: Gallery<R>, job: TrainingJob) -> Self {
        GalleryObserver { gallery, job }
    }
}

impl<R: StudioRepository> TrainingObserver for GalleryObserver<R> {
    async fn on_progress(&self, job_id: &str, phase: PollPhase, progress: u8) {
        let status = match phase {
            PollPhase::Running => JobStatus::Running,
            _ => JobStatus::Submitted,
        };
        if let Err(err) = self.gallery.record_progress(job_id, status, progress).await {
            warn!("Failed to record progress for job {}: {}", job_id, err);
        }
    }

    async fn on_succeeded(&self, job_id: &str, model_id: &str) {
        if let Err(err) = self.gallery.complete_training(&self.job, model_id).await {
            warn!(
                "Job {} finished with model {} but the gallery update failed; it stays pending: {}",
                job_id, model_id, err
            );
        }
    }

    async fn on_failed(&self, job_id: &str, reason: Option<&str>, progress: u8) {
        let failure = StudioError::TrainingFailed(reason.map(str::to_string));
        info!("LoRA job {} failed: {}", job_id, failure.user_message());
        if let Err(err) = self.gallery.fail_training(&self.job, progress).await {
            warn!("Failed to record failure of job {}: {}", job_id, err);
        }
    }
}

fn validate_request(request: &LoraTrainingRequest) -> Result<(String, Vec<String>), StudioError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(StudioError::NameRequired);
    }
    if request.images.is_empty() {
        return Err(StudioError::NoTrainingImages);
    }
    let images = request
        .images
        .iter()
        .map(|image| validate_image_url(image))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), images))
}

pub async fn start_lora_training<B, R>(
    backend: Arc<B>,
    gallery: &Gallery<R>,
    settings: &StudioSettings,
    request: LoraTrainingRequest,
) -> Result<LoraTraining, StudioError>
where
    B: GenerationBackend,
    R: StudioRepository,
{
    let (name, images) = validate_request(&request)?;
    let training = settings.training_request(&name, request.base_model.as_deref(), images.clone());
    let job_id = backend.submit_training(&training).await?;
    info!(
        "Submitted LoRA job {} for {} ({} images, base {})",
        job_id,
        name,
        images.len(),
        training.base_model_type
    );

    let job = TrainingJob {
        id: job_id.clone(),
        owner_id: request.owner_id,
        character_id: request.character_id,
        name,
        description: request.description.trim().to_string(),
        source_images: images,
        status: JobStatus::Submitted,
        progress: 0,
        result_model_id: None,
        created_at: Utc::now(),
    };
    gallery.begin_training(&job).await?;

    let observer = Arc::new(GalleryObserver::new(gallery.clone(), job.clone()));
    let poller = TrainingPoller::start(backend, observer, job_id, settings.lora_poller(), 0);
    Ok(LoraTraining { job, poller })
}

/// Restarts polling for every job the store still considers active.
pub async fn resume_pending_jobs<B, R>(
    backend: Arc<B>,
    gallery: &Gallery<R>,
    settings: &StudioSettings,
) -> Result<Vec<LoraTraining>, StudioError>
where
    B: GenerationBackend,
    R: StudioRepository,
{
    let pending = gallery.repository().pending_training_jobs().await?;
    if pending.is_empty() {
        info!("No pending training jobs to resume");
    }

    let resumed = pending
        .into_iter()
        .map(|job| {
            info!(
                "Resuming training job {} ({}) at {}%",
                job.id, job.name, job.progress
            );
            let observer = Arc::new(GalleryObserver::new(gallery.clone(), job.clone()));
            let poller = TrainingPoller::start(
                Arc::clone(&backend),
                observer,
                job.id.clone(),
                settings.lora_poller(),
                job.progress,
            );
            LoraTraining { job, poller }
        })
        .collect();
    Ok(resumed)
}

pub async fn check_training_status<B: GenerationBackend>(
    backend: &B,
    job_id: &str,
) -> Result<TrainingStatusReport, StudioError> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(StudioError::StatusCheck("a job id is required".to_string()));
    }
    backend.training_status(job_id).await
}
