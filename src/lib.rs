#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod gal;
pub mod render;
pub mod runtime;
pub mod world;

pub use errors::{EngineError, Result};
pub use gal::{Device, DeviceConfig, GalError, TextureCreationDesc};
pub use render::{
    Camera, CameraUsageHint, ExtractedRenderData, GpuResourcePool, RenderPipeline, RenderWorld,
    View, ViewTarget, ViewportRect,
};
pub use runtime::{Runtime, RuntimeConfig};
pub use world::{GameObjectDesc, World};
