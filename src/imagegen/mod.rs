pub mod modelslab;

use std::future::Future;

use crate::studio::error::StudioError;
use crate::studio::types::ConceptSet;

pub use modelslab::ModelsLabClient;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub enhance_prompt: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    pub instance_prompt: String,
    pub class_prompt: String,
    pub base_model_type: String,
    pub images: Vec<String>,
    pub training_type: String,
    pub max_train_steps: u32,
    pub lora_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobState {
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl RemoteJobState {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "running" => RemoteJobState::Running,
            "succeeded" | "success" | "completed" => RemoteJobState::Succeeded,
            "failed" | "error" => RemoteJobState::Failed,
            other => RemoteJobState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingStatusReport {
    pub state: RemoteJobState,
    pub model_id: Option<String>,
    pub message: Option<String>,
}

/// Remote image generation and LoRA fine-tuning. Implementations make exactly
/// one outbound call per method and never retry.
pub trait GenerationBackend: Send + Sync + 'static {
    /// Returns at most `request.samples` URLs; an empty set is a valid answer.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<ConceptSet, StudioError>> + Send;

    /// Starts a fine-tuning job and returns its backend-issued id.
    fn submit_training(
        &self,
        request: &TrainingRequest,
    ) -> impl Future<Output = Result<String, StudioError>> + Send;

    fn training_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<TrainingStatusReport, StudioError>> + Send;
}
