use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ImagesRepo, RepoError};
use crate::domain::entities::LatexImageRecord;

use super::{PostgresRepositories, map_sqlx_error};

fn record_from_row(row: &PgRow) -> Result<LatexImageRecord, sqlx::Error> {
    Ok(LatexImageRecord {
        id: row.try_get::<Uuid, _>("id")?,
        tex_key: row.try_get("tex_key")?,
        image_path: row.try_get("image_path")?,
        data_url: row.try_get("data_url")?,
        compile_error: row.try_get("compile_error")?,
        creation_time: row.try_get::<OffsetDateTime, _>("creation_time")?,
        creator: row.try_get("creator")?,
    })
}

const SELECT_COLUMNS: &str =
    "id, tex_key, image_path, data_url, compile_error, creation_time, creator";

#[async_trait]
impl ImagesRepo for PostgresRepositories {
    async fn insert(&self, record: &LatexImageRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO latex_images \
             (id, tex_key, image_path, data_url, compile_error, creation_time, creator) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(&record.tex_key)
        .bind(&record.image_path)
        .bind(&record.data_url)
        .bind(&record.compile_error)
        .bind(record.creation_time)
        .bind(&record.creator)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_key(&self, tex_key: &str) -> Result<Option<LatexImageRecord>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM latex_images WHERE tex_key = $1"
        ))
        .bind(tex_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn delete_by_key(&self, tex_key: &str) -> Result<LatexImageRecord, RepoError> {
        let row = sqlx::query(&format!(
            "DELETE FROM latex_images WHERE tex_key = $1 RETURNING {SELECT_COLUMNS}"
        ))
        .bind(tex_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let row = row.ok_or(RepoError::NotFound)?;
        record_from_row(&row).map_err(map_sqlx_error)
    }
}
