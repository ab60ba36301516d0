//! GAL Handle Types
//!
//! One 32-bit generational handle type per resource kind. The device
//! translates them to backend objects through dense tables; a stale
//! generation resolves to nothing rather than aliasing a reused slot.

use crate::define_handle;

define_handle!(
    /// A texture of any dimensionality.
    pub struct TextureHandle
);
define_handle!(pub struct BufferHandle);
define_handle!(
    /// A compiled shader permutation with its reflected binding tables.
    pub struct ShaderHandle
);
define_handle!(pub struct VertexDeclarationHandle);
define_handle!(
    /// Graphics or compute pipeline.
    pub struct PipelineHandle
);
define_handle!(pub struct SamplerStateHandle);
define_handle!(pub struct BlendStateHandle);
define_handle!(pub struct DepthStencilStateHandle);
define_handle!(pub struct RasterizerStateHandle);
define_handle!(
    /// A timestamp query slot.
    pub struct QueryHandle
);
define_handle!(pub struct SwapChainHandle);
define_handle!(pub struct TextureResourceViewHandle);
define_handle!(pub struct BufferResourceViewHandle);
define_handle!(pub struct TextureUavHandle);
define_handle!(pub struct BufferUavHandle);

/// A shader-visible view of either resource family. Bind sites accept this
/// so fallback substitution can hand back whichever kind the slot expects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceViewHandle {
    Texture(TextureResourceViewHandle),
    Buffer(BufferResourceViewHandle),
    TextureUav(TextureUavHandle),
    BufferUav(BufferUavHandle),
}

impl From<TextureResourceViewHandle> for ResourceViewHandle {
    fn from(h: TextureResourceViewHandle) -> Self {
        Self::Texture(h)
    }
}

impl From<BufferResourceViewHandle> for ResourceViewHandle {
    fn from(h: BufferResourceViewHandle) -> Self {
        Self::Buffer(h)
    }
}

impl From<TextureUavHandle> for ResourceViewHandle {
    fn from(h: TextureUavHandle) -> Self {
        Self::TextureUav(h)
    }
}

impl From<BufferUavHandle> for ResourceViewHandle {
    fn from(h: BufferUavHandle) -> Self {
        Self::BufferUav(h)
    }
}
