//! GPU Resource Pool
//!
//! Recycles transient render targets and buffers between frames. Free lists
//! are keyed by creation-descriptor hash; a returned resource is tagged with
//! the frame it retired in and handed out oldest-first. A garbage collection
//! pass runs every 60 frames (or earlier when allocation pressure builds)
//! and destroys entries unused for more than 10 frames.
//!
//! All operations take a single mutex; the pool is shared between the render
//! thread and pipeline compilation.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::gal::descriptors::{BufferCreationDesc, TextureCreationDesc};
use crate::gal::device::{Device, DeviceEvent};
use crate::gal::error::{GalError, GalResult};
use crate::gal::handles::{BufferHandle, TextureHandle};

/// Every 60 frames, resources unused for more than 10 frames are collected.
const FRAMES_BETWEEN_GC: u16 = 60;
const DEFAULT_MINIMUM_AGE: u64 = 10;
const MEMORY_THRESHOLD_FOR_GC: u64 = 256 * 1024 * 1024;
const ALLOCATIONS_THRESHOLD_FOR_GC: u16 = 128;

struct TextureWithAge {
    handle: TextureHandle,
    last_used: u64,
}

struct BufferWithAge {
    handle: BufferHandle,
    last_used: u64,
}

struct Inner {
    available_textures: FxHashMap<u64, Vec<TextureWithAge>>,
    textures_in_use: FxHashSet<TextureHandle>,
    available_buffers: FxHashMap<u64, Vec<BufferWithAge>>,
    buffers_in_use: FxHashSet<BufferHandle>,

    current_frame: u64,
    frames_since_gc: u16,
    allocations_since_gc: u16,
    allocated_memory: u64,

    textures_created: u64,
    textures_destroyed: u64,
}

pub struct GpuResourcePool {
    device: Arc<Device>,
    inner: Mutex<Inner>,
}

impl GpuResourcePool {
    /// Creates the pool and hooks it onto the device's frame events.
    #[must_use]
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let pool = Arc::new(Self {
            device: device.clone(),
            inner: Mutex::new(Inner {
                available_textures: FxHashMap::default(),
                textures_in_use: FxHashSet::default(),
                available_buffers: FxHashMap::default(),
                buffers_in_use: FxHashSet::default(),
                current_frame: 0,
                frames_since_gc: 0,
                allocations_since_gc: 0,
                allocated_memory: 0,
                textures_created: 0,
                textures_destroyed: 0,
            }),
        });

        let weak: Weak<Self> = Arc::downgrade(&pool);
        device.subscribe_events(move |event| {
            if let DeviceEvent::AfterBeginFrame { frame } = event
                && let Some(pool) = weak.upgrade()
            {
                pool.on_frame_begun(*frame);
            }
        });
        pool
    }

    /// Returns a pooled render target for `desc`, creating one on miss.
    ///
    /// Hand the handle back with [`return_render_target`](Self::return_render_target);
    /// never destroy it through the device directly.
    pub fn get_render_target(&self, desc: &TextureCreationDesc) -> GalResult<TextureHandle> {
        let key = desc.calculate_hash();

        {
            let mut inner = self.inner.lock();
            if let Some(bucket) = inner.available_textures.get_mut(&key)
                && !bucket.is_empty()
            {
                // Oldest entry first: index 0 retired the longest ago.
                let entry = bucket.remove(0);
                inner.textures_in_use.insert(entry.handle);
                return Ok(entry.handle);
            }
        }

        let handle = match self.device.create_texture(desc, None) {
            Ok(handle) => handle,
            Err(GalError::OutOfDeviceMemory) => {
                // Evict everything unused and retry once.
                self.run_gc(0);
                self.device.create_texture(desc, None)?
            }
            Err(e) => return Err(e),
        };

        let mut inner = self.inner.lock();
        inner.textures_in_use.insert(handle);
        inner.textures_created += 1;
        inner.allocations_since_gc += 1;
        inner.allocated_memory += desc.memory_size();
        Ok(handle)
    }

    /// Returns a render target to the pool. Returned targets are subject to
    /// garbage collection.
    pub fn return_render_target(&self, handle: TextureHandle) {
        let Some(desc) = self.device.texture_desc(handle) else {
            log::warn!("returned render target {handle:?} is not alive");
            return;
        };
        let key = desc.calculate_hash();
        let mut inner = self.inner.lock();
        if !inner.textures_in_use.remove(&handle) {
            log::warn!("returned render target {handle:?} was not taken from this pool");
            return;
        }
        let last_used = inner.current_frame;
        inner
            .available_textures
            .entry(key)
            .or_default()
            .push(TextureWithAge { handle, last_used });
    }

    /// Returns a pooled buffer for `desc`, creating one on miss.
    pub fn get_buffer(&self, desc: &BufferCreationDesc) -> GalResult<BufferHandle> {
        let key = desc.calculate_hash();

        {
            let mut inner = self.inner.lock();
            if let Some(bucket) = inner.available_buffers.get_mut(&key)
                && !bucket.is_empty()
            {
                let entry = bucket.remove(0);
                inner.buffers_in_use.insert(entry.handle);
                return Ok(entry.handle);
            }
        }

        let handle = match self.device.create_buffer(desc, None) {
            Ok(handle) => handle,
            Err(GalError::OutOfDeviceMemory) => {
                self.run_gc(0);
                self.device.create_buffer(desc, None)?
            }
            Err(e) => return Err(e),
        };

        let mut inner = self.inner.lock();
        inner.buffers_in_use.insert(handle);
        inner.allocations_since_gc += 1;
        inner.allocated_memory += u64::from(desc.total_size);
        Ok(handle)
    }

    pub fn return_buffer(&self, handle: BufferHandle) {
        let Some(desc) = self.device.buffer_desc(handle) else {
            log::warn!("returned buffer {handle:?} is not alive");
            return;
        };
        let key = desc.calculate_hash();
        let mut inner = self.inner.lock();
        if !inner.buffers_in_use.remove(&handle) {
            log::warn!("returned buffer {handle:?} was not taken from this pool");
            return;
        }
        let last_used = inner.current_frame;
        inner
            .available_buffers
            .entry(key)
            .or_default()
            .push(BufferWithAge { handle, last_used });
    }

    /// Destroys free entries unused for at least `minimum_age` frames.
    ///
    /// Runs automatically on allocation-pressure and frame-cadence
    /// thresholds; call manually after events that strand many targets
    /// (resolution change, pipeline rebuild).
    pub fn run_gc(&self, minimum_age: u64) {
        let mut inner = self.inner.lock();
        let frame = inner.current_frame;
        let mut destroyed = 0u64;
        let mut freed_memory = 0u64;

        let device = &self.device;
        inner.available_textures.retain(|_, bucket| {
            bucket.retain(|entry| {
                let age = frame.saturating_sub(entry.last_used);
                if age >= minimum_age {
                    if let Some(desc) = device.texture_desc(entry.handle) {
                        freed_memory += desc.memory_size();
                    }
                    device.destroy_texture(entry.handle);
                    destroyed += 1;
                    false
                } else {
                    true
                }
            });
            !bucket.is_empty()
        });
        inner.available_buffers.retain(|_, bucket| {
            bucket.retain(|entry| {
                let age = frame.saturating_sub(entry.last_used);
                if age >= minimum_age {
                    if let Some(desc) = device.buffer_desc(entry.handle) {
                        freed_memory += u64::from(desc.total_size);
                    }
                    device.destroy_buffer(entry.handle);
                    false
                } else {
                    true
                }
            });
            !bucket.is_empty()
        });

        inner.textures_destroyed += destroyed;
        inner.allocated_memory = inner.allocated_memory.saturating_sub(freed_memory);
        inner.frames_since_gc = 0;
        inner.allocations_since_gc = 0;

        if destroyed > 0 {
            log::debug!("resource pool GC destroyed {destroyed} entries");
        }
    }

    fn on_frame_begun(&self, frame: u64) {
        let run = {
            let mut inner = self.inner.lock();
            inner.current_frame = frame;
            inner.frames_since_gc += 1;
            inner.frames_since_gc >= FRAMES_BETWEEN_GC
                || inner.allocations_since_gc >= ALLOCATIONS_THRESHOLD_FOR_GC
                || inner.allocated_memory >= MEMORY_THRESHOLD_FOR_GC
        };
        if run {
            self.run_gc(DEFAULT_MINIMUM_AGE);
        }
    }

    // ── Introspection ──────────────────────────────────────────────────────

    /// Live pool population: `created − destroyed`.
    #[must_use]
    pub fn live_texture_count(&self) -> u64 {
        let inner = self.inner.lock();
        inner.textures_created - inner.textures_destroyed
    }

    #[must_use]
    pub fn textures_created(&self) -> u64 {
        self.inner.lock().textures_created
    }

    #[must_use]
    pub fn free_texture_count(&self) -> usize {
        self.inner
            .lock()
            .available_textures
            .values()
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn in_use_texture_count(&self) -> usize {
        self.inner.lock().textures_in_use.len()
    }
}
