use std::sync::Arc;

use crate::studio::workflow::Stage;

pub const MIN_TRAINING_VARIATIONS: usize = 3;

const DEFAULT_TRAINING_FAILURE: &str =
    "The character training process failed. Please try again.";

#[derive(Debug, Clone, thiserror::Error)]
pub enum StudioError {
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Training submission failed: {0}")]
    TrainingSubmission(String),
    #[error("Training failed: {}", .0.as_deref().unwrap_or("the training process failed"))]
    TrainingFailed(Option<String>),
    #[error("Not enough training images could be generated ({collected} of {required})")]
    InsufficientTrainingImages { collected: usize, required: usize },
    #[error("Status check failed: {0}")]
    StatusCheck(String),
    #[error("No concept selected")]
    NoConceptSelected,
    #[error("Image {0} is not part of the current concept set")]
    UnknownConcept(String),
    #[error("A character name is required")]
    NameRequired,
    #[error("Invalid image URL: {0}")]
    InvalidImageUrl(String),
    #[error("At least one training image is required")]
    NoTrainingImages,
    #[error("Operation not allowed in the {actual} stage (expected {expected})")]
    InvalidStage { expected: &'static str, actual: Stage },
    #[error("Storage error: {0}")]
    Storage(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for StudioError {
    fn from(err: anyhow::Error) -> Self {
        StudioError::Storage(Arc::new(err))
    }
}

impl StudioError {
    /// Message suitable for showing to the user; drops the variant prefix for
    /// backend failures that already carry a reason.
    pub fn user_message(&self) -> String {
        match self {
            StudioError::TrainingFailed(Some(reason)) => reason.clone(),
            StudioError::TrainingFailed(None) => DEFAULT_TRAINING_FAILURE.to_string(),
            StudioError::Generation(message) | StudioError::TrainingSubmission(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}
