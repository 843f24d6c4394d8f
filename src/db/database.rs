use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{CharacterRow, TrainingJobRow};
use crate::studio::repository::StudioRepository;
use crate::studio::types::{Character, JobStatus, NewCharacter, TrainingJob, TrainingStatus};

const CHARACTER_COLUMNS: &str =
    "id, owner_id, name, description, preview_image, training_status, model_id, created_at";

const JOB_COLUMNS: &str = "id, owner_id, character_id, name, description, source_images_json, \
     status, progress, result_model_id, created_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database opens a fresh one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS characters (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                owner_id INTEGER NOT NULL,\
                name TEXT NOT NULL,\
                description TEXT NOT NULL DEFAULT '',\
                preview_image TEXT NOT NULL,\
                training_status TEXT NOT NULL DEFAULT 'not_started',\
                model_id TEXT,\
                created_at TEXT NOT NULL,\
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS training_jobs (\
                id TEXT PRIMARY KEY,\
                owner_id INTEGER NOT NULL,\
                character_id INTEGER,\
                name TEXT NOT NULL,\
                description TEXT NOT NULL DEFAULT '',\
                source_images_json TEXT NOT NULL,\
                status TEXT NOT NULL,\
                progress INTEGER NOT NULL DEFAULT 0,\
                result_model_id TEXT,\
                created_at TEXT NOT NULL,\
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\
                FOREIGN KEY(character_id) REFERENCES characters(id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_characters_owner_id ON characters(owner_id);")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_training_jobs_status ON training_jobs(status);")
            .execute(&pool)
            .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl StudioRepository for Database {
    async fn create_character(&self, character: NewCharacter) -> Result<Character> {
        let model_id = match character.training_status {
            TrainingStatus::Complete => character.model_id,
            _ => None,
        };
        let result = sqlx::query(
            "INSERT INTO characters \
             (owner_id, name, description, preview_image, training_status, model_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(character.owner_id)
        .bind(&character.name)
        .bind(&character.description)
        .bind(&character.preview_image)
        .bind(character.training_status.as_str())
        .bind(model_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_character(id)
            .await?
            .ok_or_else(|| anyhow!("Character {id} missing right after insert"))
    }

    async fn get_character(&self, id: i64) -> Result<Option<Character>> {
        let query = format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE id = ?");
        let row = sqlx::query_as::<_, CharacterRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Character::try_from).transpose()
    }

    async fn update_character_training(
        &self,
        id: i64,
        status: TrainingStatus,
        model_id: Option<&str>,
    ) -> Result<Option<Character>> {
        let model_id = match status {
            TrainingStatus::Complete => model_id,
            _ => None,
        };
        let result = sqlx::query(
            "UPDATE characters \
             SET training_status = ?, model_id = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(model_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_character(id).await
    }

    async fn list_characters(&self, owner_id: i64) -> Result<Vec<Character>> {
        let query =
            format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE owner_id = ? ORDER BY id ASC");
        let rows = sqlx::query_as::<_, CharacterRow>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Character::try_from).collect()
    }

    async fn record_training_job(&self, job: &TrainingJob) -> Result<()> {
        let source_images_json = serde_json::to_string(&job.source_images)?;
        sqlx::query(
            "INSERT INTO training_jobs \
             (id, owner_id, character_id, name, description, source_images_json, status, progress, result_model_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.owner_id)
        .bind(job.character_id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(source_images_json)
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(job.result_model_id.as_deref())
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| anyhow!("Failed to record training job {}: {err}", job.id))?;
        Ok(())
    }

    async fn update_training_job(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        model_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE training_jobs \
             SET status = ?, progress = ?, result_model_id = COALESCE(?, result_model_id), updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(i64::from(progress.min(100)))
        .bind(model_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Unknown training job {id}"));
        }
        Ok(())
    }

    async fn get_training_job(&self, id: &str) -> Result<Option<TrainingJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM training_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, TrainingJobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TrainingJob::try_from).transpose()
    }

    async fn pending_training_jobs(&self) -> Result<Vec<TrainingJob>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM training_jobs \
             WHERE status IN ('submitted', 'running') ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, TrainingJobRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TrainingJob::try_from).collect()
    }
}
