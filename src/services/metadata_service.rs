//! src/services/metadata_service.rs
//!
//! MetadataService: the relational side of an upload. A media row is
//! inserted as `uploading` when a session is created and flipped to `ready`
//! with its final size once the provider acknowledges completion.

use crate::models::media::{Media, MediaStatus};
use crate::services::naming::{base_slug, disambiguated_slug};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("media `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Fields of a new media row.
#[derive(Debug, Clone)]
pub struct NewMedia<'a> {
    pub id: Uuid,
    pub slug: &'a str,
    pub title: &'a str,
    pub object_key: &'a str,
    pub content_type: &'a str,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct MetadataService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Slug derived from `title` that no existing row uses.
    pub async fn unique_slug(&self, title: &str, id: Uuid) -> MetadataResult<String> {
        let id = id.to_string();
        let base = base_slug(title, &id);
        let existing: Option<String> = sqlx::query_scalar("SELECT slug FROM media WHERE slug = ?")
            .bind(&base)
            .fetch_optional(&*self.db)
            .await?;
        match existing {
            None => Ok(base),
            Some(_) => Ok(disambiguated_slug(&base, &id)),
        }
    }

    /// Record a media item whose payload is being uploaded.
    pub async fn insert_uploading(&self, media: NewMedia<'_>) -> MetadataResult<Media> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, Media>(
            r#"
            INSERT INTO media (
                id, slug, title, object_key, content_type, size_bytes,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, slug, title, object_key, content_type, size_bytes,
                      status, created_at, updated_at
            "#,
        )
        .bind(media.id)
        .bind(media.slug)
        .bind(media.title)
        .bind(media.object_key)
        .bind(media.content_type)
        .bind(size_as_i64(media.size_bytes))
        .bind(MediaStatus::Uploading)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        debug!("inserted media {} as uploading", row.id);
        Ok(row)
    }

    /// Mark the upload finished and store its final size.
    pub async fn mark_ready(&self, id: Uuid, size_bytes: u64) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE media SET status = ?, size_bytes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(MediaStatus::Ready)
        .bind(size_as_i64(size_bytes))
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(id));
        }
        debug!("media {} is ready ({} bytes)", id, size_bytes);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> MetadataResult<Media> {
        sqlx::query_as::<_, Media>(
            "SELECT id, slug, title, object_key, content_type, size_bytes,
                    status, created_at, updated_at
             FROM media WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MetadataError::NotFound(id),
            other => MetadataError::Sqlx(other),
        })
    }
}

fn size_as_i64(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn service() -> MetadataService {
        let pool = db::connect_in_memory().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        MetadataService::new(Arc::new(pool))
    }

    fn new_media<'a>(id: Uuid, slug: &'a str) -> NewMedia<'a> {
        NewMedia {
            id,
            slug,
            title: "Summer Trip",
            object_key: "videos/x/trip.mp4",
            content_type: "video/mp4",
            size_bytes: 42,
        }
    }

    #[tokio::test]
    async fn insert_then_mark_ready() {
        let svc = service().await;
        let id = Uuid::new_v4();
        let row = svc.insert_uploading(new_media(id, "summer-trip")).await.unwrap();
        assert_eq!(row.status, MediaStatus::Uploading);

        svc.mark_ready(id, 1024).await.unwrap();
        let row = svc.get(id).await.unwrap();
        assert_eq!(row.status, MediaStatus::Ready);
        assert_eq!(row.size_bytes, 1024);
    }

    #[tokio::test]
    async fn slug_collision_gets_id_suffix() {
        let svc = service().await;
        let first = Uuid::new_v4();
        let slug = svc.unique_slug("Summer Trip", first).await.unwrap();
        assert_eq!(slug, "summer-trip");
        svc.insert_uploading(new_media(first, &slug)).await.unwrap();

        let second = Uuid::new_v4();
        let slug = svc.unique_slug("Summer Trip", second).await.unwrap();
        assert_eq!(slug, format!("summer-trip-{}", &second.to_string()[..6]));
    }

    #[tokio::test]
    async fn mark_ready_unknown_id_is_not_found() {
        let svc = service().await;
        let err = svc.mark_ready(Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }
}
