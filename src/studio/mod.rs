pub mod error;
pub mod gallery;
pub mod lora;
pub mod poller;
pub mod prompt;
pub mod repository;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use crate::imagegen::{GenerationRequest, TrainingRequest};
use crate::studio::poller::PollerSettings;
use crate::studio::prompt::DEFAULT_NEGATIVE_PROMPT;

/// Sampling and training parameters shared by every studio session.
#[derive(Debug, Clone)]
pub struct StudioSettings {
    pub concept_model: String,
    pub concept_width: u32,
    pub concept_height: u32,
    pub concept_samples: u32,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub enhance_prompt: bool,
    pub negative_prompt: String,
    pub base_model: String,
    pub class_prompt: String,
    pub max_train_steps: u32,
    pub lora_type: String,
    pub poll_interval: Duration,
    pub workflow_progress_cap: u8,
    pub lora_progress_cap: u8,
}

impl Default for StudioSettings {
    fn default() -> Self {
        StudioSettings {
            concept_model: "flux".to_string(),
            concept_width: 512,
            concept_height: 768,
            concept_samples: 4,
            inference_steps: 30,
            guidance_scale: 7.5,
            enhance_prompt: true,
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            base_model: "sdxl".to_string(),
            class_prompt: "person, character".to_string(),
            max_train_steps: 800,
            lora_type: "standard".to_string(),
            poll_interval: Duration::from_secs(5),
            workflow_progress_cap: 95,
            lora_progress_cap: 99,
        }
    }
}

impl StudioSettings {
    pub fn generation_request(&self, prompt: String, samples: u32) -> GenerationRequest {
        GenerationRequest {
            model_id: self.concept_model.clone(),
            prompt,
            negative_prompt: self.negative_prompt.clone(),
            width: self.concept_width,
            height: self.concept_height,
            samples: samples.clamp(1, 4),
            num_inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
            enhance_prompt: self.enhance_prompt,
            seed: None,
        }
    }

    pub fn training_request(
        &self,
        name: &str,
        base_model: Option<&str>,
        images: Vec<String>,
    ) -> TrainingRequest {
        TrainingRequest {
            instance_prompt: name.trim().to_string(),
            class_prompt: self.class_prompt.clone(),
            base_model_type: base_model.unwrap_or(&self.base_model).to_string(),
            images,
            training_type: "lora".to_string(),
            max_train_steps: self.max_train_steps,
            lora_type: self.lora_type.clone(),
        }
    }

    pub fn workflow_poller(&self) -> PollerSettings {
        PollerSettings {
            interval: self.poll_interval,
            progress_cap: self.workflow_progress_cap,
        }
    }

    pub fn lora_poller(&self) -> PollerSettings {
        PollerSettings {
            interval: self.poll_interval,
            progress_cap: self.lora_progress_cap,
        }
    }
}
