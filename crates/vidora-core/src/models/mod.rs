pub mod asset;
pub mod task;

pub use asset::{
    AssetFieldUpdate, AssetId, AssetKind, MediaAsset, NewAsset, Orientation, ProcessingState,
    PromotionTarget, Resolution,
};
pub use task::{
    DeriveThumbnailPayload, ExtractMetadataPayload, Priority, PromoteUploadPayload, Task,
    TaskFailure, TaskPayload, TaskStatus, TaskType,
};
