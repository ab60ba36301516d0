//! Foundation Module
//!
//! Shared building blocks with no dependency on the GPU or the world:
//!
//! - [`handle`]: packed generational ids and the dense tables behind every
//!   handle-addressed registry in the engine
//! - [`arena`]: per-frame bump allocation with epoch validation
//! - [`interner`] / [`tags`]: interned names and named bitsets
//! - [`bounds`] / [`frustum`]: culling math
//! - [`stream`]: little-endian binary serialization primitives
//! - [`tasks`]: fork/join worker dispatch

pub mod arena;
pub mod bounds;
pub mod frustum;
pub mod handle;
pub mod interner;
pub mod stream;
pub mod tags;
pub mod tasks;

pub use arena::{ArenaRef, ArenaStamp, FrameArena};
pub use bounds::{BoundingBox, BoundingSphere, BoxSphereBounds};
pub use frustum::Frustum;
pub use handle::{GenIdx, HandleTable};
pub use interner::Symbol;
pub use tags::{Tag, TagSet};
pub use tasks::TaskPool;
