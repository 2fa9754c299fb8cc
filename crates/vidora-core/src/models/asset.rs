use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::task::TaskType;
use crate::constants::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::error::AppError;

/// Opaque numeric asset identifier (database `BIGSERIAL`).
pub type AssetId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Video,
    Slider,
}

impl AssetKind {
    /// Whether the pipeline probes this kind for duration and dimensions.
    pub fn requires_metadata(&self) -> bool {
        matches!(self, AssetKind::Video)
    }

    /// Whether a thumbnail must exist before the asset counts as ready.
    pub fn requires_thumbnail(&self) -> bool {
        matches!(self, AssetKind::Video)
    }

    pub fn primary_target(&self) -> PromotionTarget {
        match self {
            AssetKind::Video => PromotionTarget::PrimaryVideo,
            AssetKind::Slider => PromotionTarget::SliderImage,
        }
    }
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AssetKind::Video => write!(f, "video"),
            AssetKind::Slider => write!(f, "slider"),
        }
    }
}

impl FromStr for AssetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(AssetKind::Video),
            "slider" => Ok(AssetKind::Slider),
            _ => Err(anyhow::anyhow!("Invalid asset kind: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

impl Orientation {
    /// Square frames fall through to the default branch and count as horizontal.
    pub fn classify(width: u32, height: u32) -> Self {
        if height > width {
            Orientation::Vertical
        } else {
            Orientation::Horizontal
        }
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Orientation::Horizontal => write!(f, "horizontal"),
            Orientation::Vertical => write!(f, "vertical"),
        }
    }
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "horizontal" => Ok(Orientation::Horizontal),
            "vertical" => Ok(Orientation::Vertical),
            _ => Err(anyhow::anyhow!("Invalid orientation: {}", s)),
        }
    }
}

/// Pixel dimensions, persisted as `"WxH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::classify(self.width, self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| anyhow::anyhow!("Invalid resolution: {}", s))?;
        Ok(Self::new(w.trim().parse()?, h.trim().parse()?))
    }
}

/// Persisted processing state, stored next to the legacy `is_processed`/`is_active` flags.
///
/// `Draft → Promoting → Processed → Ready`, with `Failed` reachable from `Promoting`
/// when the primary promotion exhausts its attempts.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    #[default]
    Draft,
    Promoting,
    Processed,
    Ready,
    Failed,
}

impl Display for ProcessingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingState::Draft => write!(f, "draft"),
            ProcessingState::Promoting => write!(f, "promoting"),
            ProcessingState::Processed => write!(f, "processed"),
            ProcessingState::Ready => write!(f, "ready"),
            ProcessingState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessingState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProcessingState::Draft),
            "promoting" => Ok(ProcessingState::Promoting),
            "processed" => Ok(ProcessingState::Processed),
            "ready" => Ok(ProcessingState::Ready),
            "failed" => Ok(ProcessingState::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing state: {}", s)),
        }
    }
}

/// The file slot an upload promotion fills.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTarget {
    PrimaryVideo,
    Thumbnail,
    SliderImage,
}

impl PromotionTarget {
    pub fn task_type(&self) -> TaskType {
        match self {
            PromotionTarget::PrimaryVideo => TaskType::PromoteVideo,
            PromotionTarget::Thumbnail => TaskType::PromoteThumbnail,
            PromotionTarget::SliderImage => TaskType::PromoteSliderImage,
        }
    }

    /// Primary content promotions own `primary_content_path` and `is_processed`.
    pub fn writes_primary_content(&self) -> bool {
        matches!(
            self,
            PromotionTarget::PrimaryVideo | PromotionTarget::SliderImage
        )
    }

    /// Row update once retries are exhausted. Primary content fails the asset; only a
    /// primary video is also taken offline. Thumbnails leave the row alone.
    pub fn terminal_failure_update(&self) -> Option<AssetFieldUpdate> {
        match self {
            PromotionTarget::PrimaryVideo => Some(AssetFieldUpdate::failed()),
            PromotionTarget::SliderImage => Some(AssetFieldUpdate::processing_failed()),
            PromotionTarget::Thumbnail => None,
        }
    }

    pub fn activates_on_success(&self) -> bool {
        matches!(self, PromotionTarget::SliderImage)
    }

    /// The path field this target writes, read back for idempotent retries.
    pub fn current_path<'a>(&self, asset: &'a MediaAsset) -> &'a str {
        if self.writes_primary_content() {
            &asset.primary_content_path
        } else {
            &asset.thumbnail_path
        }
    }

    /// Field update persisted after a successful promotion to `path`.
    pub fn success_update(&self, path: String) -> AssetFieldUpdate {
        match self {
            PromotionTarget::PrimaryVideo => AssetFieldUpdate::primary_promoted(path),
            PromotionTarget::SliderImage => AssetFieldUpdate::primary_promoted(path).activate(),
            PromotionTarget::Thumbnail => AssetFieldUpdate::thumbnail(path),
        }
    }
}

impl Display for PromotionTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PromotionTarget::PrimaryVideo => write!(f, "primary_video"),
            PromotionTarget::Thumbnail => write!(f, "thumbnail"),
            PromotionTarget::SliderImage => write!(f, "slider_image"),
        }
    }
}

/// A video or slider-image record plus the pointers to its files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaAsset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub title: String,
    pub description: Option<String>,
    /// Empty until primary promotion succeeds. Non-empty iff `is_processed`.
    pub primary_content_path: String,
    pub thumbnail_path: String,
    pub duration_seconds: i32,
    pub resolution: Option<String>,
    pub orientation: Orientation,
    pub is_processed: bool,
    pub is_active: bool,
    pub processing_state: ProcessingState,
    pub metadata_extracted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for MediaAsset {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let decode = |column: &str, e: anyhow::Error| {
            sqlx::Error::Decode(format!("Failed to parse {}: {}", column, e).into())
        };
        Ok(MediaAsset {
            id: row.get("id"),
            kind: row
                .get::<String, _>("kind")
                .parse()
                .map_err(|e| decode("kind", e))?,
            title: row.get("title"),
            description: row.get("description"),
            primary_content_path: row.get("primary_content_path"),
            thumbnail_path: row.get("thumbnail_path"),
            duration_seconds: row.get("duration_seconds"),
            resolution: row.get("resolution"),
            orientation: row
                .get::<String, _>("orientation")
                .parse()
                .map_err(|e| decode("orientation", e))?,
            is_processed: row.get("is_processed"),
            is_active: row.get("is_active"),
            processing_state: row
                .get::<String, _>("processing_state")
                .parse()
                .map_err(|e| decode("processing_state", e))?,
            metadata_extracted_at: row.get("metadata_extracted_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl MediaAsset {
    /// A freshly created record: inactive, unprocessed, empty paths.
    pub fn draft(id: AssetId, new_asset: NewAsset) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: new_asset.kind,
            title: new_asset.title,
            description: new_asset.description,
            primary_content_path: String::new(),
            thumbnail_path: String::new(),
            duration_seconds: 0,
            resolution: None,
            orientation: Orientation::default(),
            is_processed: false,
            is_active: false,
            processing_state: ProcessingState::Draft,
            metadata_extracted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_primary_content(&self) -> bool {
        !self.primary_content_path.is_empty()
    }

    pub fn has_thumbnail(&self) -> bool {
        !self.thumbnail_path.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.processing_state == ProcessingState::Ready
    }

    /// True when a `Processed` asset carries every artifact its kind expects.
    ///
    /// Mirrors the SQL predicate used by `mark_ready_if_complete`.
    pub fn artifacts_complete(&self) -> bool {
        self.processing_state == ProcessingState::Processed
            && self.is_processed
            && (!self.kind.requires_thumbnail() || self.has_thumbnail())
            && (!self.kind.requires_metadata() || self.metadata_extracted_at.is_some())
    }
}

/// Fields supplied synchronously by the upload layer when a record is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAsset {
    pub kind: AssetKind,
    pub title: String,
    pub description: Option<String>,
}

/// Partial update of exactly the fields owned by one writer.
///
/// Build with the named constructors; `validate` rejects updates that would split
/// `primary_content_path` from `is_processed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetFieldUpdate {
    pub primary_content_path: Option<String>,
    pub is_processed: Option<bool>,
    pub thumbnail_path: Option<String>,
    pub duration_seconds: Option<i32>,
    pub resolution: Option<Option<String>>,
    pub orientation: Option<Orientation>,
    pub metadata_extracted_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    pub processing_state: Option<ProcessingState>,
}

impl AssetFieldUpdate {
    pub fn primary_promoted(path: String) -> Self {
        Self {
            primary_content_path: Some(path),
            is_processed: Some(true),
            processing_state: Some(ProcessingState::Processed),
            ..Default::default()
        }
    }

    pub fn thumbnail(path: String) -> Self {
        Self {
            thumbnail_path: Some(path),
            ..Default::default()
        }
    }

    pub fn technical(duration_seconds: i32, resolution: Resolution) -> Self {
        Self {
            duration_seconds: Some(duration_seconds),
            resolution: Some(Some(resolution.to_string())),
            orientation: Some(resolution.orientation()),
            metadata_extracted_at: Some(Some(Utc::now())),
            ..Default::default()
        }
    }

    /// Terminal primary-content failure that also takes the asset offline.
    pub fn failed() -> Self {
        Self {
            is_active: Some(false),
            ..Self::processing_failed()
        }
    }

    pub fn processing_failed() -> Self {
        Self {
            processing_state: Some(ProcessingState::Failed),
            ..Default::default()
        }
    }

    pub fn promoting() -> Self {
        Self {
            processing_state: Some(ProcessingState::Promoting),
            ..Default::default()
        }
    }

    /// Clears every pipeline-owned field before a replacement primary file is processed.
    pub fn reset_for_replacement() -> Self {
        Self {
            primary_content_path: Some(String::new()),
            is_processed: Some(false),
            thumbnail_path: Some(String::new()),
            duration_seconds: Some(0),
            resolution: Some(None),
            orientation: Some(Orientation::default()),
            metadata_extracted_at: Some(None),
            is_active: Some(false),
            processing_state: Some(ProcessingState::Promoting),
        }
    }

    pub fn activate(mut self) -> Self {
        self.is_active = Some(true);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match (&self.primary_content_path, self.is_processed) {
            (None, None) => Ok(()),
            (Some(path), Some(processed)) if path.is_empty() != processed => Ok(()),
            _ => Err(AppError::InvalidInput(
                "primary_content_path and is_processed must be updated together and agree"
                    .to_string(),
            )),
        }
    }

    /// Apply to an in-memory record (used by non-SQL stores).
    pub fn apply_to(&self, asset: &mut MediaAsset) {
        if let Some(path) = &self.primary_content_path {
            asset.primary_content_path = path.clone();
        }
        if let Some(processed) = self.is_processed {
            asset.is_processed = processed;
        }
        if let Some(path) = &self.thumbnail_path {
            asset.thumbnail_path = path.clone();
        }
        if let Some(duration) = self.duration_seconds {
            asset.duration_seconds = duration;
        }
        if let Some(resolution) = &self.resolution {
            asset.resolution = resolution.clone();
        }
        if let Some(orientation) = self.orientation {
            asset.orientation = orientation;
        }
        if let Some(extracted_at) = self.metadata_extracted_at {
            asset.metadata_extracted_at = extracted_at;
        }
        if let Some(active) = self.is_active {
            asset.is_active = active;
        }
        if let Some(state) = self.processing_state {
            asset.processing_state = state;
        }
        asset.updated_at = Utc::now();
    }
}
