//! Metadata row for an uploaded media item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a media record. Only the upload path moves it forward.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Uploading,
    Ready,
}

/// A video (or other large media) tracked by the vault.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Media {
    pub id: Uuid,

    /// URL-friendly unique name derived from the title.
    pub slug: String,

    pub title: String,

    /// Storage key of the payload, `videos/{id}/{file}`.
    pub object_key: String,

    pub content_type: String,

    /// Declared size while uploading, final size once ready.
    pub size_bytes: i64,

    pub status: MediaStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
