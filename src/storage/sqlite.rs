//! SQLite storage implementation
//!
//! Backs both the match record store and the face index.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{sqlite::{SqlitePool, SqlitePoolOptions}, Row};
use anyhow::{anyhow, Result, Context};
use tracing::{info, debug};

use crate::index::{FaceIndex, FaceMatch, IndexedFace, similarity_percent};

use super::traits::{MatchStorage, MatchRecord, FaceData, PhotoRecord, UserProfile};

/// SQLite-based match storage
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Create connection pool
        let database_url = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let storage = Self { pool };
        storage.initialize().await?;

        Ok(storage)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_photos (
                user_id TEXT NOT NULL,
                photo_id TEXT NOT NULL,
                match_timestamp INTEGER NOT NULL,
                confidence REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_photos_user_ts
            ON user_photos(user_id, match_timestamp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS face_data (
                user_id TEXT PRIMARY KEY,
                face_id TEXT NOT NULL,
                enrolled_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS photos (
                photo_id TEXT PRIMARY KEY,
                matched_users TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                last_match_update INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indexed_faces (
                face_id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_indexed_faces_external
            ON indexed_faces(external_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite database initialized");
        Ok(())
    }

    fn row_to_match(row: &sqlx::sqlite::SqliteRow) -> MatchRecord {
        MatchRecord {
            user_id: row.get("user_id"),
            photo_id: row.get("photo_id"),
            match_timestamp: row.get("match_timestamp"),
            confidence: row.get("confidence"),
        }
    }

    fn row_to_photo(row: &sqlx::sqlite::SqliteRow) -> Result<PhotoRecord> {
        let matched_users: String = row.get("matched_users");
        Ok(PhotoRecord {
            photo_id: row.get("photo_id"),
            matched_users: serde_json::from_str(&matched_users)
                .context("Invalid matched_users JSON")?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl MatchStorage for SqliteStorage {
    async fn save_match(&self, record: &MatchRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_photos (user_id, photo_id, match_timestamp, confidence)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.photo_id)
        .bind(record.match_timestamp)
        .bind(record.confidence)
        .execute(&self.pool)
        .await?;

        debug!("Saved match {} -> {}", record.user_id, record.photo_id);
        Ok(())
    }

    async fn list_matches(&self, user_id: &str) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, photo_id, match_timestamp, confidence
            FROM user_photos
            WHERE user_id = ?
            ORDER BY match_timestamp DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_match).collect())
    }

    async fn list_matches_since(&self, user_id: &str, since: i64) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, photo_id, match_timestamp, confidence
            FROM user_photos
            WHERE user_id = ? AND match_timestamp > ?
            ORDER BY match_timestamp DESC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_match).collect())
    }

    async fn count_all_matches(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM user_photos")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    async fn save_face_data(&self, face: &FaceData) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO face_data (user_id, face_id, enrolled_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                face_id = excluded.face_id,
                enrolled_at = excluded.enrolled_at
            "#,
        )
        .bind(&face.user_id)
        .bind(&face.face_id)
        .bind(face.enrolled_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved face data for user {}", face.user_id);
        Ok(())
    }

    async fn get_face_data(&self, user_id: &str) -> Result<Option<FaceData>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, face_id, enrolled_at
            FROM face_data
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FaceData {
            user_id: row.get("user_id"),
            face_id: row.get("face_id"),
            enrolled_at: row.get("enrolled_at"),
        }))
    }

    async fn save_photo(&self, photo: &PhotoRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO photos (photo_id, matched_users, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(photo_id) DO UPDATE SET
                matched_users = excluded.matched_users
            "#,
        )
        .bind(&photo.photo_id)
        .bind(serde_json::to_string(&photo.matched_users)?)
        .bind(photo.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_photo(&self, photo_id: &str) -> Result<Option<PhotoRecord>> {
        let row = sqlx::query(
            r#"
            SELECT photo_id, matched_users, created_at
            FROM photos
            WHERE photo_id = ?
            "#,
        )
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_photo(&row)?)),
            None => Ok(None),
        }
    }

    async fn add_matched_user(&self, photo_id: &str, user_id: &str) -> Result<bool> {
        let Some(mut photo) = self.get_photo(photo_id).await? else {
            return Ok(false);
        };

        if photo.matched_users.iter().any(|u| u == user_id) {
            return Ok(false);
        }

        photo.matched_users.push(user_id.to_string());
        self.save_photo(&photo).await?;
        Ok(true)
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, last_match_update
            FROM user_profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserProfile {
            user_id: row.get("user_id"),
            last_match_update: row.get("last_match_update"),
        }))
    }

    async fn set_last_match_update(&self, user_id: &str, timestamp: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, last_match_update)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                last_match_update = excluded.last_match_update
            "#,
        )
        .bind(user_id)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        debug!("Updated last match timestamp for user {}", user_id);
        Ok(())
    }
}

#[async_trait]
impl FaceIndex for SqliteStorage {
    async fn index_face(&self, face: &IndexedFace) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexed_faces (face_id, external_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(face_id) DO UPDATE SET
                external_id = excluded.external_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&face.face_id)
        .bind(&face.external_id)
        .bind(&face.embedding)
        .execute(&self.pool)
        .await?;

        debug!("Indexed face {} ({})", face.face_id, face.external_id);
        Ok(())
    }

    async fn search_faces(
        &self,
        face_id: &str,
        threshold: f64,
        max_faces: usize,
    ) -> Result<Vec<FaceMatch>> {
        let probe_row = sqlx::query("SELECT embedding FROM indexed_faces WHERE face_id = ?")
            .bind(face_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("Face {} not found in index", face_id))?;

        let probe_bytes: Vec<u8> = probe_row.get("embedding");
        let probe: Vec<f32> = probe_bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap();
                f32::from_le_bytes(arr)
            })
            .collect();

        // Embeddings are compared in process. For large collections,
        // consider a vector search extension.
        let rows = sqlx::query(
            r#"
            SELECT face_id, external_id, embedding
            FROM indexed_faces
            WHERE face_id != ?
            "#,
        )
        .bind(face_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<FaceMatch> = rows
            .into_iter()
            .filter_map(|row| {
                let stored_bytes: Vec<u8> = row.get("embedding");
                let stored: Vec<f32> = stored_bytes
                    .chunks_exact(4)
                    .map(|chunk| {
                        let arr: [u8; 4] = chunk.try_into().unwrap();
                        f32::from_le_bytes(arr)
                    })
                    .collect();

                let similarity = similarity_percent(&probe, &stored);

                if similarity >= threshold {
                    Some(FaceMatch {
                        face_id: row.get("face_id"),
                        external_id: row.get("external_id"),
                        similarity,
                    })
                } else {
                    None
                }
            })
            .collect();

        // Sort by similarity descending
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        results.truncate(max_faces);

        Ok(results)
    }

    async fn delete_face(&self, face_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM indexed_faces WHERE face_id = ?")
            .bind(face_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
