//! Error Types
//!
//! The crate-level error type for host-facing APIs. Layer-internal errors
//! ([`GalError`], [`WorldError`], [`PipelineError`]) stay typed at their
//! seams; `EngineError` is the umbrella a host deals with.

use thiserror::Error;

use crate::gal::error::GalError;
use crate::render::pipeline::PipelineError;
use crate::world::WorldError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// GPU abstraction failure (creation, submission, device loss).
    #[error("graphics error: {0}")]
    Gal(#[from] GalError),

    /// World configuration or lifecycle failure.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// Render pipeline construction or compilation failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// File I/O (config, caches).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Host configuration parse failure.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
