//! Fallback Resources
//!
//! When a shader expects a binding the caller never supplied, binding nothing
//! is undefined behavior on the GPU. The device instead holds a 1×1 (or
//! 1-sized) default resource per (resource kind × texture type × depth flag)
//! and substitutes it, so missing bindings read deterministic black/zero.
//! Each distinct miss logs one warning.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::descriptors::{
    BufferCreationDesc, BufferUsage, TextureCreationDesc, TextureInitData, TextureType,
    TextureUsage,
};
use super::device::Device;
use super::error::GalResult;
use super::format::ResourceFormat;
use super::handles::{
    BufferResourceViewHandle, BufferUavHandle, ResourceViewHandle, TextureResourceViewHandle,
    TextureUavHandle,
};
use super::shader::{ShaderResourceType, ShaderTextureType};

type TextureKey = (ShaderTextureType, bool);

pub struct FallbackResources {
    texture_views: FxHashMap<TextureKey, TextureResourceViewHandle>,
    texture_uavs: FxHashMap<ShaderTextureType, TextureUavHandle>,
    buffer_view: BufferResourceViewHandle,
    buffer_uav: BufferUavHandle,
    constant_buffer: super::handles::BufferHandle,
    /// Binding names already warned about.
    warned: Mutex<FxHashSet<String>>,
}

impl FallbackResources {
    pub(crate) fn empty() -> Self {
        Self {
            texture_views: FxHashMap::default(),
            texture_uavs: FxHashMap::default(),
            buffer_view: BufferResourceViewHandle::INVALID,
            buffer_uav: BufferUavHandle::INVALID,
            constant_buffer: super::handles::BufferHandle::INVALID,
            warned: Mutex::new(FxHashSet::default()),
        }
    }

    /// Creates the full fallback matrix on `device`.
    pub(crate) fn create(device: &Device) -> GalResult<Self> {
        let mut texture_views = FxHashMap::default();
        let mut texture_uavs = FxHashMap::default();

        let shapes = [
            (ShaderTextureType::Texture2D, TextureType::Texture2D, 1u32),
            (ShaderTextureType::Texture2DArray, TextureType::Texture2DArray, 1),
            (ShaderTextureType::TextureCube, TextureType::TextureCube, 6),
            (ShaderTextureType::Texture3D, TextureType::Texture3D, 1),
        ];

        let black = [0u8, 0, 0, 255];
        for (shader_type, texture_type, layers) in shapes {
            for depth in [false, true] {
                // Depth-compare samplers need a depth-format resource.
                let format = if depth {
                    ResourceFormat::D32Float
                } else {
                    ResourceFormat::Rgba8Unorm
                };
                if depth && texture_type == TextureType::Texture3D {
                    // No depth 3D textures; compare samplers never see them.
                    continue;
                }
                let desc = TextureCreationDesc {
                    texture_type,
                    width: 1,
                    height: 1,
                    depth: 1,
                    mip_levels: 1,
                    array_size: layers,
                    format,
                    usage: if depth {
                        TextureUsage::SHADER_RESOURCE | TextureUsage::DEPTH_STENCIL
                    } else {
                        TextureUsage::SHADER_RESOURCE | TextureUsage::TRANSFER_DEST
                    },
                    ..Default::default()
                };
                let init_layers: Vec<&[u8]> = (0..layers).map(|_| &black[..]).collect();
                let init = (!depth).then(|| TextureInitData {
                    subresources: &init_layers,
                });
                let texture = device.create_texture(&desc, init.as_ref())?;
                let view = device
                    .default_resource_view(texture)
                    .expect("fallback texture has a shader view");
                texture_views.insert((shader_type, depth), view);
            }

            if texture_type != TextureType::TextureCube {
                let desc = TextureCreationDesc {
                    texture_type,
                    width: 1,
                    height: 1,
                    depth: 1,
                    mip_levels: 1,
                    array_size: layers,
                    format: ResourceFormat::Rgba8Unorm,
                    usage: TextureUsage::SHADER_RESOURCE | TextureUsage::UNORDERED_ACCESS,
                    ..Default::default()
                };
                let texture = device.create_texture(&desc, None)?;
                let uav = device.create_texture_uav(texture, 0)?;
                texture_uavs.insert(shader_type, uav);
            }
        }

        let buffer_desc = BufferCreationDesc {
            total_size: 16,
            struct_size: 16,
            usage: BufferUsage::STRUCTURED_BUFFER
                | BufferUsage::SHADER_RESOURCE
                | BufferUsage::UNORDERED_ACCESS,
            immutable: false,
        };
        let buffer = device.create_buffer(&buffer_desc, Some(&[0u8; 16]))?;
        let buffer_view = device
            .default_buffer_view(buffer)
            .expect("fallback buffer has a shader view");
        let buffer_uav = device.create_buffer_uav(buffer)?;

        let constant_buffer =
            device.create_buffer(&BufferCreationDesc::constant(256), Some(&[0u8; 256]))?;

        Ok(Self {
            texture_views,
            texture_uavs,
            buffer_view,
            buffer_uav,
            constant_buffer,
            warned: Mutex::new(FxHashSet::default()),
        })
    }

    /// The substitute for an unbound shader slot. `binding_name` keys the
    /// one-time warning.
    #[must_use]
    pub fn resource_for(
        &self,
        binding_name: &str,
        resource_type: ShaderResourceType,
        texture_type: ShaderTextureType,
        depth: bool,
    ) -> Option<ResourceViewHandle> {
        self.warn_once(binding_name);
        match resource_type {
            ShaderResourceType::Texture => {
                let texture_type = if texture_type == ShaderTextureType::Unknown {
                    ShaderTextureType::Texture2D
                } else {
                    texture_type
                };
                self.texture_views
                    .get(&(texture_type, depth))
                    .copied()
                    .map(ResourceViewHandle::Texture)
            }
            ShaderResourceType::TextureRW => {
                let texture_type = if texture_type == ShaderTextureType::Unknown {
                    ShaderTextureType::Texture2D
                } else {
                    texture_type
                };
                self.texture_uavs
                    .get(&texture_type)
                    .copied()
                    .map(ResourceViewHandle::TextureUav)
            }
            ShaderResourceType::StructuredBuffer | ShaderResourceType::ByteAddressBuffer => {
                Some(ResourceViewHandle::Buffer(self.buffer_view))
            }
            ShaderResourceType::StructuredBufferRW | ShaderResourceType::ByteAddressBufferRW => {
                Some(ResourceViewHandle::BufferUav(self.buffer_uav))
            }
            ShaderResourceType::ConstantBuffer
            | ShaderResourceType::Sampler
            | ShaderResourceType::Unknown => None,
        }
    }

    /// Fallback constant buffer (256 zero bytes).
    #[must_use]
    pub fn constant_buffer(&self) -> super::handles::BufferHandle {
        self.constant_buffer
    }

    fn warn_once(&self, binding_name: &str) {
        let mut warned = self.warned.lock();
        if warned.insert(binding_name.to_owned()) {
            log::warn!(
                "shader binding '{binding_name}' was not supplied; using fallback resource"
            );
        }
    }
}
