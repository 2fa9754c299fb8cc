//! Application-wide constants.

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new task is created.
pub const TASK_NOTIFY_CHANNEL: &str = "vidora_new_task";

/// Resolution written when the probe tool cannot report dimensions.
pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

/// Duration written when the probe tool cannot report a duration.
pub const DEFAULT_DURATION_SECONDS: i32 = 0;

/// Offset (seconds) used for thumbnail derivation when nothing better is known.
pub const DEFAULT_THUMBNAIL_OFFSET_SECONDS: f64 = 2.0;

/// ffmpeg `-q:v` value for extracted frames (2 = high quality JPEG).
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 2;

/// Extension used for derived thumbnails.
pub const DERIVED_THUMBNAIL_EXTENSION: &str = "jpg";
