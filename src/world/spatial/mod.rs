//! Spatial Indexing
//!
//! Category-registered, tag-filtered spatial data over box+sphere bounds,
//! with frustum visibility queries and per-object visibility grading.

pub mod data;
pub mod system;

pub use data::{
    Category, CategoryFlags, DefaultSpatialCategories, INVALID_CATEGORY, VisibilityState,
    category_flags, category_name, find_category, register_category,
};
pub use system::{
    DEFAULT_FRAMES_BEFORE_INVISIBLE, QueryParams, QueryStats, SpatialDataHandle, SpatialSystem,
    VisitorFlow,
};
