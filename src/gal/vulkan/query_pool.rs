//! Timestamp Query Pools
//!
//! GPU and CPU timestamps have no relation in Vulkan; a one-time calibration
//! measures the same instant on both clocks and stores the delta. Pools of
//! 256 queries are retired after four frames so in-flight queries stay safe;
//! reads past the retention window report `Expired`.

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::gal::backend::TimestampResult;

const POOL_SIZE: u32 = 256;
const RETAIN_FRAMES: u64 = 4;

struct PoolSlot {
    pool: vk::QueryPool,
    next_index: u32,
    /// Frame the slot was last used in.
    frame: u64,
    /// Results fetched back after the frame retired.
    results: Vec<u64>,
    results_ready: bool,
}

struct QueryAssignment {
    pool: usize,
    index: u32,
    frame: u64,
}

pub struct QueryPools {
    slots: Mutex<Vec<PoolSlot>>,
    assignments: Mutex<FxHashMap<u32, QueryAssignment>>,
    /// Nanoseconds per GPU tick.
    ns_per_tick: f64,
    valid_bits_mask: u64,
    /// CPU nanoseconds minus GPU nanoseconds at the calibration instant.
    gpu_to_cpu_delta_ns: i128,
    current_frame: Mutex<u64>,
}

impl QueryPools {
    pub fn new(device: &ash::Device, timestamp_period: f32, valid_bits: u32) -> Self {
        let mut slots = Vec::new();
        slots.push(Self::create_slot(device));
        Self {
            slots: Mutex::new(slots),
            assignments: Mutex::new(FxHashMap::default()),
            ns_per_tick: f64::from(timestamp_period),
            valid_bits_mask: if valid_bits >= 64 {
                u64::MAX
            } else {
                (1u64 << valid_bits) - 1
            },
            gpu_to_cpu_delta_ns: 0,
            current_frame: Mutex::new(0),
        }
    }

    fn create_slot(device: &ash::Device) -> PoolSlot {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(POOL_SIZE);
        let pool = unsafe {
            device
                .create_query_pool(&info, None)
                .expect("query pool creation")
        };
        unsafe { device.reset_query_pool(pool, 0, POOL_SIZE) };
        PoolSlot {
            pool,
            next_index: 0,
            frame: 0,
            results: vec![0; POOL_SIZE as usize],
            results_ready: false,
        }
    }

    /// Establishes the GPU↔CPU clock relation by writing one timestamp and
    /// reading it back against `Instant::now()`.
    pub fn calibrate(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
    ) {
        unsafe {
            let alloc = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cb = device
                .allocate_command_buffers(&alloc)
                .expect("calibration command buffer")[0];

            let pool = self.slots.lock()[0].pool;
            device.reset_query_pool(pool, 0, 1);

            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cb, &begin).unwrap();
            device.cmd_write_timestamp(cb, vk::PipelineStageFlags::BOTTOM_OF_PIPE, pool, 0);
            device.end_command_buffer(cb).unwrap();

            let buffers = [cb];
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            device
                .queue_submit(queue, &[submit], vk::Fence::null())
                .expect("calibration submit");
            device.queue_wait_idle(queue).expect("calibration wait");
            let cpu_now_ns = std::time::Instant::now();

            let mut result = [0u64; 1];
            device
                .get_query_pool_results(
                    pool,
                    0,
                    &mut result,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
                .expect("calibration readback");

            let gpu_ns = ((result[0] & self.valid_bits_mask) as f64 * self.ns_per_tick) as i128;
            // Anchor the CPU clock at process-relative nanoseconds.
            let cpu_ns = cpu_now_ns.elapsed().as_nanos() as i128; // ~0, the anchor itself
            self.gpu_to_cpu_delta_ns = cpu_ns - gpu_ns;

            device.free_command_buffers(command_pool, &buffers);
            device.reset_query_pool(pool, 0, POOL_SIZE);
        }
    }

    /// Records `cmd_write_timestamp` for frontend query `query_index`.
    pub fn insert_timestamp(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        query_index: u32,
        stage: vk::PipelineStageFlags,
    ) {
        let mut slots = self.slots.lock();
        let frame = *self.current_frame.lock();

        // Find a slot with room that is either current-frame or free to reuse.
        let slot_index = slots
            .iter()
            .position(|s| s.next_index < POOL_SIZE && (s.frame == frame || s.next_index == 0))
            .unwrap_or_else(|| {
                slots.push(Self::create_slot(device));
                slots.len() - 1
            });

        let slot = &mut slots[slot_index];
        if slot.next_index == 0 {
            slot.frame = frame;
            slot.results_ready = false;
            unsafe { device.reset_query_pool(slot.pool, 0, POOL_SIZE) };
        }
        let index = slot.next_index;
        slot.next_index += 1;

        unsafe { device.cmd_write_timestamp(command_buffer, stage, slot.pool, index) };

        self.assignments.lock().insert(
            query_index,
            QueryAssignment {
                pool: slot_index,
                index,
                frame,
            },
        );
    }

    /// Advances the frame: resolves results of retired pools and recycles
    /// pools past the retention window.
    pub fn begin_frame(&self, device: &ash::Device, frame: u64, retired_frame: u64) {
        *self.current_frame.lock() = frame;

        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.next_index > 0 && !slot.results_ready && slot.frame <= retired_frame {
                let count = slot.next_index;
                let result = unsafe {
                    device.get_query_pool_results(
                        slot.pool,
                        0,
                        &mut slot.results[..count as usize],
                        vk::QueryResultFlags::TYPE_64,
                    )
                };
                slot.results_ready = result.is_ok();
            }
            // Recycle pools whose queries all expired.
            if slot.next_index > 0 && frame.saturating_sub(slot.frame) > RETAIN_FRAMES {
                slot.next_index = 0;
                slot.results_ready = false;
            }
        }

        self.assignments
            .lock()
            .retain(|_, a| frame.saturating_sub(a.frame) <= RETAIN_FRAMES);
    }

    #[must_use]
    pub fn get_result(
        &self,
        device: &ash::Device,
        query_index: u32,
        force_wait: bool,
    ) -> TimestampResult {
        let assignments = self.assignments.lock();
        let Some(assignment) = assignments.get(&query_index) else {
            return TimestampResult::Expired;
        };

        let mut slots = self.slots.lock();
        let slot = &mut slots[assignment.pool];
        if slot.frame != assignment.frame {
            return TimestampResult::Expired;
        }

        if !slot.results_ready {
            if !force_wait {
                return TimestampResult::NotReady;
            }
            let count = slot.next_index;
            let result = unsafe {
                device.get_query_pool_results(
                    slot.pool,
                    0,
                    &mut slot.results[..count as usize],
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
            };
            if result.is_err() {
                return TimestampResult::NotReady;
            }
            slot.results_ready = true;
        }

        let ticks = slot.results[assignment.index as usize] & self.valid_bits_mask;
        let gpu_ns = (ticks as f64 * self.ns_per_tick) as i128;
        let cpu_ns = (gpu_ns + self.gpu_to_cpu_delta_ns).max(0) as u64;
        TimestampResult::Time(cpu_ns)
    }

    pub fn shutdown(&self, device: &ash::Device) {
        for slot in self.slots.lock().drain(..) {
            unsafe { device.destroy_query_pool(slot.pool, None) };
        }
    }
}
