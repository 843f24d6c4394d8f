use std::env;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::studio::prompt::DEFAULT_NEGATIVE_PROMPT;
use crate::studio::StudioSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_timeout_seconds: u64,
    pub modelslab_api_key: String,
    pub modelslab_base_url: String,
    pub concept_model: String,
    pub concept_width: u32,
    pub concept_height: u32,
    pub concept_samples: u32,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub enhance_prompt: bool,
    pub negative_prompt: String,
    pub training_base_model: String,
    pub training_class_prompt: String,
    pub training_max_steps: u32,
    pub training_lora_type: String,
    pub poll_interval_seconds: u64,
    pub workflow_progress_cap: u8,
    pub lora_progress_cap: u8,
    /// Problems found while loading. `CONFIG` may be forced before logging is
    /// up, so these are reported by `main` once it is.
    pub warnings: Vec<String>,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn normalize_progress_cap(name: &str, value: u32, default: u8, warnings: &mut Vec<String>) -> u8 {
    if (1..100).contains(&value) {
        return value as u8;
    }
    warnings.push(format!("{name}={value} is outside 1-99; using {default}."));
    default
}

fn normalize_base_model(value: String, warnings: &mut Vec<String>) -> String {
    let lowered = value.trim().to_lowercase();
    if matches!(lowered.as_str(), "sdxl" | "sd15") {
        return lowered;
    }
    warnings.push(format!(
        "Unknown TRAINING_BASE_MODEL value '{value}'; defaulting to sdxl."
    ));
    "sdxl".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut warnings = Vec::new();
        let concept_samples = env_u32("CONCEPT_SAMPLES", 4).clamp(1, 4);
        let training_base_model =
            normalize_base_model(env_string("TRAINING_BASE_MODEL", "sdxl"), &mut warnings);
        let workflow_progress_cap = normalize_progress_cap(
            "WORKFLOW_PROGRESS_CAP",
            env_u32("WORKFLOW_PROGRESS_CAP", 95),
            95,
            &mut warnings,
        );
        let lora_progress_cap = normalize_progress_cap(
            "LORA_PROGRESS_CAP",
            env_u32("LORA_PROGRESS_CAP", 99),
            99,
            &mut warnings,
        );

        Ok(Config {
            database_url: env_string("DATABASE_URL", "sqlite://studio.db?mode=rwc"),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 60),
            modelslab_api_key: env_string("MODELSLAB_API_KEY", ""),
            modelslab_base_url: env_string("MODELSLAB_BASE_URL", "https://modelslab.com/api/v6"),
            concept_model: env_string("CONCEPT_MODEL", "flux"),
            concept_width: env_u32("CONCEPT_WIDTH", 512),
            concept_height: env_u32("CONCEPT_HEIGHT", 768),
            concept_samples,
            inference_steps: env_u32("INFERENCE_STEPS", 30),
            guidance_scale: env_f32("GUIDANCE_SCALE", 7.5),
            enhance_prompt: env_bool("ENHANCE_PROMPT", true),
            negative_prompt: env_string("NEGATIVE_PROMPT", DEFAULT_NEGATIVE_PROMPT),
            training_base_model,
            training_class_prompt: env_string("TRAINING_CLASS_PROMPT", "person, character"),
            training_max_steps: env_u32("TRAINING_MAX_STEPS", 800),
            training_lora_type: env_string("TRAINING_LORA_TYPE", "standard"),
            poll_interval_seconds: env_u64("POLL_INTERVAL_SECONDS", 5).max(1),
            workflow_progress_cap,
            lora_progress_cap,
            warnings,
        })
    }

    pub fn studio_settings(&self) -> StudioSettings {
        StudioSettings {
            concept_model: self.concept_model.clone(),
            concept_width: self.concept_width,
            concept_height: self.concept_height,
            concept_samples: self.concept_samples,
            inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
            enhance_prompt: self.enhance_prompt,
            negative_prompt: self.negative_prompt.clone(),
            base_model: self.training_base_model.clone(),
            class_prompt: self.training_class_prompt.clone(),
            max_train_steps: self.training_max_steps,
            lora_type: self.training_lora_type.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            workflow_progress_cap: self.workflow_progress_cap,
            lora_progress_cap: self.lora_progress_cap,
        }
    }
}
