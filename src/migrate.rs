use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the `urls`, `objects` and `predictions` tables and their indexes.
///
/// Every statement is `IF NOT EXISTS`, so running this repeatedly is safe.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS urls (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            host TEXT,
            prefix_hash TEXT,
            available INTEGER,
            error_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            accessed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            id TEXT PRIMARY KEY,
            size INTEGER,
            mime_type TEXT,
            sha1 TEXT,
            image_width INTEGER,
            image_height INTEGER,
            perceptual_hash TEXT,
            video_width INTEGER,
            video_height INTEGER,
            video_duration REAL,
            video_fps REAL,
            video_frames INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            object_id TEXT NOT NULL,
            service TEXT NOT NULL,
            version TEXT NOT NULL,
            predicted_at INTEGER NOT NULL,
            labels_json TEXT NOT NULL,
            PRIMARY KEY (object_id, service, version),
            FOREIGN KEY (object_id) REFERENCES objects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_urls_url ON urls(url)",
        "CREATE INDEX IF NOT EXISTS idx_urls_prefix_hash ON urls(prefix_hash)",
        "CREATE INDEX IF NOT EXISTS idx_objects_size ON objects(size)",
        "CREATE INDEX IF NOT EXISTS idx_objects_mime_type ON objects(mime_type)",
        "CREATE INDEX IF NOT EXISTS idx_objects_sha1 ON objects(sha1)",
        "CREATE INDEX IF NOT EXISTS idx_objects_perceptual_hash ON objects(perceptual_hash)",
        "CREATE INDEX IF NOT EXISTS idx_predictions_service ON predictions(service)",
    ];
    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
