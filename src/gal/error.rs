//! GAL Error Types
//!
//! Creation failures return an error code, never a panic; submission
//! failures after device loss are sticky and reported as [`GalError::DeviceLost`].

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalError {
    /// A handle's generation no longer matches its slot.
    #[error("Invalid resource handle")]
    InvalidHandle,

    /// The backend could not satisfy the allocation.
    #[error("Out of device memory")]
    OutOfDeviceMemory,

    /// The requested format is not supported for the requested usage.
    #[error("Unsupported resource format")]
    UnsupportedFormat,

    /// The creation descriptor is inconsistent (zero sizes, bad mip count, …).
    #[error("Invalid creation descriptor")]
    InvalidDesc,

    /// Pipeline creation from bytecode that failed backend compilation.
    /// Fatal at load time; draws through such a pipeline would be undefined.
    #[error("Shader compilation failed for stage {stage}: {name}")]
    ShaderCompileError {
        stage: &'static str,
        name: &'static str,
    },

    /// The device has been lost. Sticky: every later submission returns this
    /// until the device is recreated.
    #[error("Device lost")]
    DeviceLost,

    /// A timestamp result is not yet available.
    #[error("Query not ready")]
    QueryNotReady,

    /// A timestamp was retired before its result was read.
    #[error("Query expired")]
    QueryExpired,
}

pub type GalResult<T> = Result<T, GalError>;
