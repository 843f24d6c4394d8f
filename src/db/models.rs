use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::studio::types::{Character, JobStatus, TrainingJob, TrainingStatus};

#[derive(Debug, Clone, FromRow)]
pub struct CharacterRow {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub preview_image: String,
    pub training_status: String,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CharacterRow> for Character {
    type Error = anyhow::Error;

    fn try_from(row: CharacterRow) -> Result<Self> {
        let training_status = TrainingStatus::parse(&row.training_status).ok_or_else(|| {
            anyhow!(
                "Character {} has unknown training status '{}'",
                row.id,
                row.training_status
            )
        })?;
        Ok(Character {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            preview_image: row.preview_image,
            training_status,
            model_id: row.model_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TrainingJobRow {
    pub id: String,
    pub owner_id: i64,
    pub character_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub source_images_json: String,
    pub status: String,
    pub progress: i64,
    pub result_model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TrainingJobRow> for TrainingJob {
    type Error = anyhow::Error;

    fn try_from(row: TrainingJobRow) -> Result<Self> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("Training job {} has unknown status '{}'", row.id, row.status))?;
        let source_images: Vec<String> = serde_json::from_str(&row.source_images_json)
            .map_err(|err| anyhow!("Training job {} has malformed source images: {err}", row.id))?;
        Ok(TrainingJob {
            id: row.id,
            owner_id: row.owner_id,
            character_id: row.character_id,
            name: row.name,
            description: row.description,
            source_images,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            result_model_id: row.result_model_id,
            created_at: row.created_at,
        })
    }
}
