use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterStyle {
    #[default]
    Realistic,
    Anime,
    Art,
}

impl CharacterStyle {
    pub const fn as_str(self) -> &'static str {
        match self {
            CharacterStyle::Realistic => "realistic",
            CharacterStyle::Anime => "anime",
            CharacterStyle::Art => "art",
        }
    }
}

impl FromStr for CharacterStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "realistic" => Ok(CharacterStyle::Realistic),
            "anime" => Ok(CharacterStyle::Anime),
            "art" | "digital-art" => Ok(CharacterStyle::Art),
            other => Err(format!(
                "Unknown style '{other}' (expected realistic, anime or art)"
            )),
        }
    }
}

/// User-authored description of a character. A generation round works on a
/// clone, so edits made afterwards never leak into an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterDesign {
    pub style: CharacterStyle,
    pub body_type: String,
    pub features: Vec<String>,
    pub hair_style: String,
    pub distinctive_features: Vec<String>,
    pub aesthetic_style: String,
    pub custom_prompt: String,
}

impl Default for CharacterDesign {
    fn default() -> Self {
        CharacterDesign {
            style: CharacterStyle::Realistic,
            body_type: "average".to_string(),
            features: Vec::new(),
            hair_style: String::new(),
            distinctive_features: Vec::new(),
            aesthetic_style: String::new(),
            custom_prompt: String::new(),
        }
    }
}

impl CharacterDesign {
    /// Adds the tag when absent and removes it when present.
    pub fn toggle_distinctive_feature(&mut self, feature: &str) {
        let feature = feature.trim();
        if feature.is_empty() {
            return;
        }
        if let Some(index) = self
            .distinctive_features
            .iter()
            .position(|existing| existing == feature)
        {
            self.distinctive_features.remove(index);
        } else {
            self.distinctive_features.push(feature.to_string());
        }
    }
}

pub type ConceptSet = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl TrainingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TrainingStatus::NotStarted => "not_started",
            TrainingStatus::InProgress => "in_progress",
            TrainingStatus::Complete => "complete",
            TrainingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(TrainingStatus::NotStarted),
            "in_progress" => Some(TrainingStatus::InProgress),
            "complete" => Some(TrainingStatus::Complete),
            "failed" => Some(TrainingStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub preview_image: String,
    pub training_status: TrainingStatus,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCharacter {
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub preview_image: String,
    pub training_status: TrainingStatus,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submitted" => Some(JobStatus::Submitted),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One fine-tuning request as recorded in the job log. `character_id` names
/// an existing gallery entry to update; when absent a new entry is created
/// on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: String,
    pub owner_id: i64,
    pub character_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub source_images: Vec<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub result_model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrainingJob {
    pub fn preview_image(&self) -> &str {
        self.source_images
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }
}
