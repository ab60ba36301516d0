//! World Module
//!
//! Game objects and their components, the update-phase scheduler, messaging,
//! the spatial system, and the software occlusion rasterizer.
//!
//! - [`object`]: scene-tree nodes with lazy transform propagation
//! - [`component`]: the component capability set, managers, and storage
//! - [`world`]: the `World` itself — phases, boundaries, messaging
//! - [`spatial`]: category/tag-indexed bounds with visibility queries
//! - [`occlusion`]: low-resolution software depth rasterizer

pub mod component;
pub mod messages;
pub mod object;
pub mod occluder;
pub mod occlusion;
pub mod spatial;
#[allow(clippy::module_inception)]
pub mod world;

pub use component::{
    AsyncContext, Component, ComponentContext, ComponentHandle, ComponentManager, StorageKind,
    UpdateCallback, UpdateFunctionDesc, UpdatePhase,
};
pub use messages::{Message, MessageQueue};
pub use object::{GameObject, GameObjectDesc, GameObjectHandle, ObjectState, Transform};
pub use occluder::OccluderComponent;
pub use occlusion::{DepthBufferPool, RasterizerView};
pub use spatial::{SpatialDataHandle, SpatialSystem, VisibilityState};
pub use world::{World, WorldError, WorldServices};
