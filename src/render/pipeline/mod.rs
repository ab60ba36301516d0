//! Render Pipeline Graph
//!
//! Pass/pin declarations, the graph with its compile-once schedule, the
//! per-view execution context, and the serialization format.

pub mod pass;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod serialize;
pub mod view_context;

pub use pass::{ConnectionBinding, PassIo, PinDesc, PinKind, RenderPipelinePass};
pub use pipeline::{
    Connection, PipelineError, PipelineState, RenderPipeline, RenderPipelineHandle,
};
pub use serialize::PassFactory;
pub use view_context::RenderViewContext;
