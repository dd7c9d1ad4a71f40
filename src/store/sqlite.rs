//! SQLite-backed [`IdentityStore`].
//!
//! Maps each operation onto the tables created by [`crate::migrate`].
//! Timestamps are stored as Unix milliseconds. Object upserts use
//! `COALESCE(existing, new)` so a populated column is never overwritten, and
//! each [`IdentityStore::bulk_write`] runs in one transaction.
//!
//! Write transactions start with `BEGIN IMMEDIATE`, so concurrent writers
//! queue on the busy timeout instead of failing a read-to-write upgrade.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::mime::SUPPORTED_MIME_TYPES;
use crate::models::{
    ImageMeta, InsertSummary, Mutation, ObjectRecord, ObjectUpdate, Prediction, StoreStats,
    UrlError, UrlRecord, UrlUpdate, VideoMeta,
};

use super::{IdentityStore, NewUrl, Pending};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction holding the write lock from its first statement.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin write transaction")?;
        Ok(tx)
    }

    async fn latest_predictions(&self, object_id: &str) -> Result<BTreeMap<String, Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT service, version, predicted_at, labels_json
            FROM predictions
            WHERE object_id = ?
            ORDER BY service, predicted_at, version
            "#,
        )
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?;

        let mut latest = BTreeMap::new();
        for row in rows {
            let service: String = row.get("service");
            let labels_json: String = row.get("labels_json");
            let labels: BTreeMap<String, f64> = serde_json::from_str(&labels_json)
                .with_context(|| format!("corrupt labels for object {}", object_id))?;
            latest.insert(
                service,
                Prediction {
                    version: row.get("version"),
                    predicted_at: from_millis(row.get("predicted_at")),
                    labels,
                },
            );
        }
        Ok(latest)
    }

    async fn object_from_row(&self, row: &SqliteRow) -> Result<ObjectRecord> {
        let mut record = object_from_row(row);
        record.predictions = self.latest_predictions(&record.id).await?;
        Ok(record)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn url_from_row(row: &SqliteRow) -> Result<UrlRecord> {
    let id: String = row.get("id");
    let error_json: Option<String> = row.get("error_json");
    let error = error_json
        .map(|json| serde_json::from_str::<UrlError>(&json))
        .transpose()
        .with_context(|| format!("corrupt error detail for url {}", id))?;
    let available: Option<i64> = row.get("available");
    let accessed_at: Option<i64> = row.get("accessed_at");
    Ok(UrlRecord {
        id,
        url: row.get("url"),
        host: row.get("host"),
        prefix_hash: row.get("prefix_hash"),
        available: available.map(|v| v != 0),
        error,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
        accessed_at: accessed_at.map(from_millis),
    })
}

fn object_from_row(row: &SqliteRow) -> ObjectRecord {
    let size: Option<i64> = row.get("size");
    let image_width: Option<i64> = row.get("image_width");
    let image_height: Option<i64> = row.get("image_height");
    let video_width: Option<i64> = row.get("video_width");
    let video_height: Option<i64> = row.get("video_height");
    let video_duration: Option<f64> = row.get("video_duration");
    let video_fps: Option<f64> = row.get("video_fps");
    let video_frames: Option<i64> = row.get("video_frames");

    let image = image_width.map(|width| ImageMeta {
        width: width as u32,
        height: image_height.unwrap_or_default() as u32,
        perceptual_hash: row.get("perceptual_hash"),
    });
    let video = video_width.map(|width| VideoMeta {
        width: width as u32,
        height: video_height.unwrap_or_default() as u32,
        duration_seconds: video_duration.unwrap_or_default(),
        fps: video_fps.unwrap_or_default(),
        number_of_frames: video_frames.unwrap_or_default() as u64,
    });

    ObjectRecord {
        id: row.get("id"),
        size: size.map(|s| s as u64),
        mime_type: row.get("mime_type"),
        sha1: row.get("sha1"),
        image,
        video,
        predictions: BTreeMap::new(),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }
}

async fn write_url(
    tx: &mut Transaction<'_, Sqlite>,
    update: &UrlUpdate,
    now: i64,
) -> Result<()> {
    let available = update.availability.as_ref().map(|a| a.is_available());
    let error_json = update
        .availability
        .as_ref()
        .and_then(|a| a.error())
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE urls SET
            prefix_hash = COALESCE(?, prefix_hash),
            available = COALESCE(?, available),
            error_json = CASE WHEN ? THEN ? ELSE error_json END,
            accessed_at = COALESCE(?, accessed_at),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&update.prefix_hash)
    .bind(available)
    .bind(update.availability.is_some())
    .bind(error_json)
    .bind(update.accessed_at.map(|t| t.timestamp_millis()))
    .bind(now)
    .bind(&update.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        bail!("url {} not found", update.id);
    }
    Ok(())
}

async fn write_object(
    tx: &mut Transaction<'_, Sqlite>,
    update: &ObjectUpdate,
    now: i64,
) -> Result<()> {
    let image = update.image.as_ref();
    let video = update.video.as_ref();
    let inserted_phash = image.and(update.perceptual_hash.clone());

    sqlx::query(
        r#"
        INSERT INTO objects (id, size, mime_type, sha1,
                             image_width, image_height, perceptual_hash,
                             video_width, video_height, video_duration, video_fps, video_frames,
                             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            size = COALESCE(objects.size, excluded.size),
            mime_type = COALESCE(objects.mime_type, excluded.mime_type),
            sha1 = COALESCE(objects.sha1, excluded.sha1),
            image_width = COALESCE(objects.image_width, excluded.image_width),
            image_height = CASE WHEN objects.image_width IS NULL
                                THEN excluded.image_height ELSE objects.image_height END,
            perceptual_hash = CASE
                WHEN objects.perceptual_hash IS NULL
                     AND COALESCE(objects.image_width, excluded.image_width) IS NOT NULL
                THEN ? ELSE objects.perceptual_hash END,
            video_width = COALESCE(objects.video_width, excluded.video_width),
            video_height = CASE WHEN objects.video_width IS NULL
                                THEN excluded.video_height ELSE objects.video_height END,
            video_duration = CASE WHEN objects.video_width IS NULL
                                  THEN excluded.video_duration ELSE objects.video_duration END,
            video_fps = CASE WHEN objects.video_width IS NULL
                             THEN excluded.video_fps ELSE objects.video_fps END,
            video_frames = CASE WHEN objects.video_width IS NULL
                                THEN excluded.video_frames ELSE objects.video_frames END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&update.id)
    .bind(update.size.map(|s| s as i64))
    .bind(&update.mime_type)
    .bind(&update.sha1)
    .bind(image.map(|i| i.width as i64))
    .bind(image.map(|i| i.height as i64))
    .bind(inserted_phash)
    .bind(video.map(|v| v.width as i64))
    .bind(video.map(|v| v.height as i64))
    .bind(video.map(|v| v.duration_seconds))
    .bind(video.map(|v| v.fps))
    .bind(video.map(|v| v.number_of_frames as i64))
    .bind(now)
    .bind(now)
    .bind(&update.perceptual_hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_prediction(
    tx: &mut Transaction<'_, Sqlite>,
    object_id: &str,
    service: &str,
    prediction: &Prediction,
) -> Result<()> {
    let known: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM objects WHERE id = ?")
        .bind(object_id)
        .fetch_one(&mut **tx)
        .await?;
    if !known {
        bail!("object {} not found", object_id);
    }

    let labels_json = serde_json::to_string(&prediction.labels)?;
    sqlx::query(
        r#"
        INSERT INTO predictions (object_id, service, version, predicted_at, labels_json)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(object_id, service, version) DO NOTHING
        "#,
    )
    .bind(object_id)
    .bind(service)
    .bind(&prediction.version)
    .bind(prediction.predicted_at.timestamp_millis())
    .bind(labels_json)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn add_urls(&self, urls: &[NewUrl]) -> Result<InsertSummary> {
        let now = Utc::now().timestamp_millis();
        let mut summary = InsertSummary::default();
        let mut tx = self.begin_write().await?;
        for new in urls {
            let result = sqlx::query(
                r#"
                INSERT INTO urls (id, url, host, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&new.id)
            .bind(&new.url)
            .bind(&new.host)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                summary.inserted += 1;
            } else {
                summary.existing += 1;
            }
        }
        tx.commit().await?;
        Ok(summary)
    }

    async fn pending_urls(&self) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query("SELECT * FROM urls WHERE prefix_hash IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(url_from_row).collect()
    }

    async fn pending_objects(&self, pending: &Pending) -> Result<Vec<String>> {
        let ids: Vec<String> = match pending {
            Pending::FullHash => {
                sqlx::query_scalar("SELECT id FROM objects WHERE sha1 IS NULL ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
            Pending::MediaMeta => {
                let placeholders = vec!["?"; SUPPORTED_MIME_TYPES.len()].join(", ");
                let sql = format!(
                    "SELECT id FROM objects \
                     WHERE mime_type IN ({}) AND image_width IS NULL AND video_width IS NULL \
                     ORDER BY id",
                    placeholders
                );
                let mut query = sqlx::query_scalar(&sql);
                for mime_type in SUPPORTED_MIME_TYPES {
                    query = query.bind(mime_type);
                }
                query.fetch_all(&self.pool).await?
            }
            Pending::PerceptualHash => {
                sqlx::query_scalar(
                    "SELECT id FROM objects \
                     WHERE image_width IS NOT NULL AND perceptual_hash IS NULL ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
            Pending::Prediction(service) => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM objects o
                    WHERE o.image_width IS NOT NULL
                      AND NOT EXISTS (
                          SELECT 1 FROM predictions p
                          WHERE p.object_id = o.id AND p.service = ?
                      )
                    ORDER BY o.id
                    "#,
                )
                .bind(service)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(ids)
    }

    async fn get_url(&self, id: &str) -> Result<Option<UrlRecord>> {
        let row = sqlx::query("SELECT * FROM urls WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(url_from_row).transpose()
    }

    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query("SELECT * FROM objects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.object_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_available_url(&self, prefix_hash: &str) -> Result<Option<UrlRecord>> {
        let row = sqlx::query(
            "SELECT * FROM urls WHERE prefix_hash = ? AND available = 1 ORDER BY id LIMIT 1",
        )
        .bind(prefix_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(url_from_row).transpose()
    }

    async fn find_object_by_sha1(&self, sha1: &str) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query("SELECT * FROM objects WHERE sha1 = ? ORDER BY id LIMIT 1")
            .bind(sha1)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.object_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn bulk_write(&self, mutations: &[Mutation]) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.begin_write().await?;
        for mutation in mutations {
            match mutation {
                Mutation::Url(update) => write_url(&mut tx, update, now).await?,
                Mutation::Object(update) => write_object(&mut tx, update, now).await?,
                Mutation::Prediction {
                    object_id,
                    service,
                    prediction,
                } => write_prediction(&mut tx, object_id, service, prediction).await?,
            }
        }
        tx.commit().await?;
        Ok(mutations.len() as u64)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                let n: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await?;
                Ok::<u64, anyhow::Error>(n as u64)
            }
        };

        let mut stats = StoreStats {
            urls: count("SELECT COUNT(*) FROM urls").await?,
            urls_resolved: count("SELECT COUNT(*) FROM urls WHERE prefix_hash IS NOT NULL").await?,
            urls_available: count("SELECT COUNT(*) FROM urls WHERE available = 1").await?,
            urls_unavailable: count("SELECT COUNT(*) FROM urls WHERE available = 0").await?,
            objects: count("SELECT COUNT(*) FROM objects").await?,
            objects_sha1: count("SELECT COUNT(*) FROM objects WHERE sha1 IS NOT NULL").await?,
            objects_image: count("SELECT COUNT(*) FROM objects WHERE image_width IS NOT NULL")
                .await?,
            objects_perceptual_hash: count(
                "SELECT COUNT(*) FROM objects WHERE perceptual_hash IS NOT NULL",
            )
            .await?,
            objects_video: count("SELECT COUNT(*) FROM objects WHERE video_width IS NOT NULL")
                .await?,
            predictions: BTreeMap::new(),
        };

        let rows = sqlx::query(
            "SELECT service, COUNT(DISTINCT object_id) AS objects \
             FROM predictions GROUP BY service ORDER BY service",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let objects: i64 = row.get("objects");
            stats.predictions.insert(row.get("service"), objects as u64);
        }
        Ok(stats)
    }
}
