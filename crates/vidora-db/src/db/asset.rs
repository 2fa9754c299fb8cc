//! Asset repository: CRUD and field-owned partial updates for the assets table.

use sqlx::{PgPool, Postgres, QueryBuilder};
use vidora_core::models::{AssetFieldUpdate, AssetId, MediaAsset, NewAsset};
use vidora_core::AppError;

const ASSET_COLUMNS: &str = r#"
    id,
    kind,
    title,
    description,
    primary_content_path,
    thumbnail_path,
    duration_seconds,
    resolution,
    orientation,
    is_processed,
    is_active,
    processing_state,
    metadata_extracted_at,
    created_at,
    updated_at
"#;

/// Repository for the assets table.
#[derive(Clone)]
pub struct AssetRepository {
    pool: PgPool,
}

impl AssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "assets"))]
    pub async fn get(&self, id: AssetId) -> Result<Option<MediaAsset>, AppError> {
        let sql = format!("SELECT {} FROM assets WHERE id = $1", ASSET_COLUMNS);
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(asset)
    }

    /// Insert a record in the draft state: inactive, unprocessed, empty paths.
    #[tracing::instrument(skip(self, new_asset), fields(db.table = "assets", kind = %new_asset.kind))]
    pub async fn create_draft(&self, new_asset: NewAsset) -> Result<MediaAsset, AppError> {
        let sql = format!(
            r#"
            INSERT INTO assets (kind, title, description)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            ASSET_COLUMNS
        );
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(new_asset.kind.to_string())
            .bind(&new_asset.title)
            .bind(&new_asset.description)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(asset_id = asset.id, kind = %asset.kind, "Asset draft created");
        Ok(asset)
    }

    /// Write exactly the fields set in `update`; everything else is left untouched.
    #[tracing::instrument(skip(self, update), fields(db.table = "assets", asset_id = id))]
    pub async fn update_fields(
        &self,
        id: AssetId,
        update: &AssetFieldUpdate,
    ) -> Result<MediaAsset, AppError> {
        update.validate()?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE assets SET updated_at = NOW()");

        if let Some(path) = &update.primary_content_path {
            qb.push(", primary_content_path = ").push_bind(path.clone());
        }
        if let Some(processed) = update.is_processed {
            qb.push(", is_processed = ").push_bind(processed);
        }
        if let Some(path) = &update.thumbnail_path {
            qb.push(", thumbnail_path = ").push_bind(path.clone());
        }
        if let Some(duration) = update.duration_seconds {
            qb.push(", duration_seconds = ").push_bind(duration);
        }
        if let Some(resolution) = &update.resolution {
            qb.push(", resolution = ").push_bind(resolution.clone());
        }
        if let Some(orientation) = update.orientation {
            qb.push(", orientation = ").push_bind(orientation.to_string());
        }
        if let Some(extracted_at) = update.metadata_extracted_at {
            qb.push(", metadata_extracted_at = ").push_bind(extracted_at);
        }
        if let Some(active) = update.is_active {
            qb.push(", is_active = ").push_bind(active);
        }
        if let Some(state) = update.processing_state {
            qb.push(", processing_state = ").push_bind(state.to_string());
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(ASSET_COLUMNS);

        let asset = qb
            .build_query_as::<MediaAsset>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::AssetNotFound(id))?;

        tracing::debug!(asset_id = id, "Asset fields updated");
        Ok(asset)
    }

    /// Point `thumbnail_path` at `path` and return the path it held before, read under
    /// the same row lock so overlapping writers each see the value they replaced.
    #[tracing::instrument(skip(self), fields(db.table = "assets", asset_id = id))]
    pub async fn swap_thumbnail(&self, id: AssetId, path: &str) -> Result<String, AppError> {
        let previous = sqlx::query_scalar::<Postgres, String>(
            r#"
            UPDATE assets AS a
            SET thumbnail_path = $2, updated_at = NOW()
            FROM (SELECT id, thumbnail_path FROM assets WHERE id = $1 FOR UPDATE) AS previous
            WHERE a.id = previous.id
            RETURNING previous.thumbnail_path
            "#,
        )
        .bind(id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::AssetNotFound(id))?;

        tracing::debug!(asset_id = id, previous = %previous, "Thumbnail path swapped");
        Ok(previous)
    }

    /// Flip `processed → ready` in one conditional statement once every artifact the
    /// asset's kind expects is present. Returns whether the row changed.
    ///
    /// When `auto_activate_videos` is set, a video that becomes ready is also activated.
    #[tracing::instrument(skip(self), fields(db.table = "assets", asset_id = id))]
    pub async fn mark_ready_if_complete(
        &self,
        id: AssetId,
        auto_activate_videos: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE assets
            SET processing_state = 'ready',
                is_active = CASE WHEN kind = 'video' AND $2 THEN TRUE ELSE is_active END,
                updated_at = NOW()
            WHERE id = $1
                AND processing_state = 'processed'
                AND is_processed
                AND (
                    kind <> 'video'
                    OR (thumbnail_path <> '' AND metadata_extracted_at IS NOT NULL)
                )
            "#,
        )
        .bind(id)
        .bind(auto_activate_videos)
        .execute(&self.pool)
        .await?;

        let became_ready = result.rows_affected() > 0;
        if became_ready {
            tracing::info!(asset_id = id, "Asset is ready");
        }
        Ok(became_ready)
    }

    #[tracing::instrument(skip(self), fields(db.table = "assets", asset_id = id))]
    pub async fn delete(&self, id: AssetId) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
