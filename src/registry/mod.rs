//! Identity registry backed by SQLite
//!
//! The registry is the externally visible surface of the ingestion job
//! machine: identity records carry the job status, status message and the
//! synthesized profile fields, plus the per-identity conversation log.

mod schema;

pub use schema::*;

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle status of an identity's ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    BasicInfoCompleted,
    VideoInfoCompleted,
    ErrorProcessingVideo,
    ProcessingSocialmediaData,
    Concluded,
    ConcludedWithAnalyzerError,
    Error,
}

impl IdentityStatus {
    /// Whether the ingestion job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IdentityStatus::Concluded
                | IdentityStatus::ConcludedWithAnalyzerError
                | IdentityStatus::Error
        )
    }

    /// Whether conversational access should be allowed
    pub fn is_conversable(&self) -> bool {
        matches!(
            self,
            IdentityStatus::Concluded | IdentityStatus::ConcludedWithAnalyzerError
        )
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IdentityStatus::BasicInfoCompleted => "basic_info_completed",
            IdentityStatus::VideoInfoCompleted => "video_info_completed",
            IdentityStatus::ErrorProcessingVideo => "error_processing_video",
            IdentityStatus::ProcessingSocialmediaData => "processing_socialmedia_data",
            IdentityStatus::Concluded => "concluded",
            IdentityStatus::ConcludedWithAnalyzerError => "concluded_with_analyzer_error",
            IdentityStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for IdentityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic_info_completed" => Ok(IdentityStatus::BasicInfoCompleted),
            "video_info_completed" => Ok(IdentityStatus::VideoInfoCompleted),
            "error_processing_video" => Ok(IdentityStatus::ErrorProcessingVideo),
            "processing_socialmedia_data" => Ok(IdentityStatus::ProcessingSocialmediaData),
            "concluded" => Ok(IdentityStatus::Concluded),
            "concluded_with_analyzer_error" => Ok(IdentityStatus::ConcludedWithAnalyzerError),
            "error" => Ok(IdentityStatus::Error),
            _ => Err(Error::Config(format!("Unknown identity status: {}", s))),
        }
    }
}

/// An identity record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub full_name: String,
    pub language: String,
    pub short_bio: Option<String>,
    pub detailed_profile: Option<String>,
    pub speak_pattern: Option<String>,
    pub status: String,
    pub status_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Identity {
    pub fn get_status(&self) -> Result<IdentityStatus> {
        self.status.parse()
    }
}

/// One recorded question/answer exchange
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub identity_id: i64,
    pub question: String,
    pub answer: String,
    pub created_at: String,
}

/// Registry database handle
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Connect to the registry database, creating it if missing
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to registry at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let registry = Self { pool };
        registry.init_schema().await?;
        Ok(registry)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Create a new identity record in `BASIC_INFO_COMPLETED`
    pub async fn create_identity(&self, full_name: &str, language: &str) -> Result<Identity> {
        let now = Utc::now().to_rfc3339();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO identities (full_name, language, status, status_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(full_name)
        .bind(language)
        .bind(IdentityStatus::BasicInfoCompleted.to_string())
        .bind("Basic information provided successfully")
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        info!("Created identity {} ({})", id, full_name);
        self.get_identity(id).await?.ok_or(Error::IdentityNotFound(id))
    }

    /// Get an identity by id
    pub async fn get_identity(&self, id: i64) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(identity)
    }

    /// Get an identity by id, erroring if absent
    pub async fn require_identity(&self, id: i64) -> Result<Identity> {
        self.get_identity(id).await?.ok_or(Error::IdentityNotFound(id))
    }

    /// List all identities, newest first
    pub async fn list_identities(&self) -> Result<Vec<Identity>> {
        let identities =
            sqlx::query_as::<_, Identity>("SELECT * FROM identities ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(identities)
    }

    /// Record a job status transition
    pub async fn set_status(
        &self,
        id: i64,
        status: IdentityStatus,
        message: Option<&str>,
    ) -> Result<()> {
        debug!("Identity {} -> {}", id, status);
        sqlx::query(
            "UPDATE identities SET status = ?, status_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite the synthesized profile fields
    pub async fn update_profile(
        &self,
        id: i64,
        short_bio: &str,
        detailed_profile: &str,
        speak_pattern: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE identities
            SET short_bio = ?, detailed_profile = ?, speak_pattern = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(short_bio)
        .bind(detailed_profile)
        .bind(speak_pattern)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update an identity's declared language
    pub async fn set_language(&self, id: i64, language: &str) -> Result<()> {
        sqlx::query("UPDATE identities SET language = ?, updated_at = ? WHERE id = ?")
            .bind(language)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a question/answer exchange to the conversation log
    pub async fn record_turn(&self, identity_id: i64, question: &str, answer: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO turns (id, identity_id, question, answer, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(identity_id)
        .bind(question)
        .bind(answer)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent turns for an identity, oldest first
    pub async fn recent_turns(&self, identity_id: i64, limit: usize) -> Result<Vec<TurnRecord>> {
        let mut turns = sqlx::query_as::<_, TurnRecord>(
            r#"
            SELECT * FROM turns
            WHERE identity_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(identity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        turns.reverse();
        Ok(turns)
    }
}
