//! Per-Instance Data Ring
//!
//! A per-frame ring buffer of [`PerInstanceData`] records plus a small
//! constant buffer carrying the current ring offset. Writers take a slice,
//! fill it, and commit: a commit at offset 0 uses `Discard` (the previous
//! contents are orphaned on wrap), everything else `NoOverwrite`.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::gal::descriptors::{BufferCreationDesc, UpdateMode};
use crate::gal::device::Device;
use crate::gal::encoder::RenderCommandEncoder;
use crate::gal::error::GalResult;
use crate::gal::handles::{BufferHandle, BufferResourceViewHandle};

pub const DEFAULT_MAX_INSTANCES: u32 = 1024;

/// One instanced object's GPU record.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct PerInstanceData {
    pub object_to_world: [[f32; 4]; 4],
    /// Inverse-transpose for normals; rows 0..3 used.
    pub object_to_world_normal: [[f32; 4]; 4],
    pub color: [f32; 4],
    /// Owning game object id, for GPU picking.
    pub game_object_id: u32,
    pub _padding: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
struct ObjectConstants {
    instance_data_offset: u32,
    _padding: [u32; 3],
}

pub struct InstanceData {
    device: Arc<Device>,
    buffer: BufferHandle,
    buffer_view: BufferResourceViewHandle,
    constant_buffer: BufferHandle,
    staging: Vec<PerInstanceData>,
    capacity: u32,
    offset: u32,
    /// Offset of the slice handed out by the last `get_instance_data`.
    pending_offset: u32,
}

impl InstanceData {
    pub fn new(device: Arc<Device>, max_instances: u32) -> GalResult<Self> {
        let capacity = max_instances.max(1);
        let desc = BufferCreationDesc::structured(
            capacity,
            std::mem::size_of::<PerInstanceData>() as u32,
        );
        let buffer = device.create_buffer(&desc, None)?;
        let buffer_view = device
            .default_buffer_view(buffer)
            .expect("instance buffer has a shader view");
        let constant_buffer = device.create_buffer(
            &BufferCreationDesc::constant(std::mem::size_of::<ObjectConstants>() as u32),
            Some(bytemuck::bytes_of(&ObjectConstants::default())),
        )?;
        Ok(Self {
            device,
            buffer,
            buffer_view,
            constant_buffer,
            staging: vec![PerInstanceData::zeroed(); capacity as usize],
            capacity,
            offset: 0,
            pending_offset: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn buffer_view(&self) -> BufferResourceViewHandle {
        self.buffer_view
    }

    #[inline]
    #[must_use]
    pub fn constant_buffer(&self) -> BufferHandle {
        self.constant_buffer
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current ring position; the next slice starts here.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Hands out a writable slice of `count` records (clamped to capacity)
    /// and the ring offset the records will land at. Wraps to 0 when the
    /// request does not fit the remainder.
    pub fn get_instance_data(&mut self, count: u32) -> (u32, &mut [PerInstanceData]) {
        let count = count.min(self.capacity);
        if self.offset + count > self.capacity {
            self.offset = 0;
        }
        self.pending_offset = self.offset;
        let range = self.offset as usize..(self.offset + count) as usize;
        (self.offset, &mut self.staging[range])
    }

    /// Uploads the last handed-out slice and advances the ring.
    ///
    /// `Discard` on wrap (offset 0), `NoOverwrite` otherwise; the offset
    /// constant buffer is updated alongside.
    pub fn update_instance_data(&mut self, encoder: &mut RenderCommandEncoder<'_>, count: u32) {
        let count = count.min(self.capacity);
        debug_assert!(
            self.pending_offset + count <= self.capacity,
            "committed more instances than were reserved"
        );
        let mode = if self.pending_offset == 0 {
            UpdateMode::Discard
        } else {
            UpdateMode::NoOverwrite
        };
        let byte_offset = self.pending_offset * std::mem::size_of::<PerInstanceData>() as u32;
        let slice =
            &self.staging[self.pending_offset as usize..(self.pending_offset + count) as usize];
        encoder.update_buffer(self.buffer, byte_offset, bytemuck::cast_slice(slice), mode);

        let constants = ObjectConstants {
            instance_data_offset: self.pending_offset,
            _padding: [0; 3],
        };
        encoder.update_buffer(
            self.constant_buffer,
            0,
            bytemuck::bytes_of(&constants),
            UpdateMode::Discard,
        );

        self.offset = self.pending_offset + count;
    }

    /// Rewinds the ring at frame start.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.pending_offset = 0;
    }

    pub fn destroy(&mut self) {
        self.device.destroy_buffer(self.buffer);
        self.device.destroy_buffer(self.constant_buffer);
    }
}
