//! Render Pipeline Graph
//!
//! A directed acyclic graph of passes connected pin-to-pin. Compilation runs
//! once per configuration: topological sort, descriptor negotiation with
//! each pass, then liveness analysis that assigns pooled physical resources
//! to connections — connections whose lifetimes do not overlap share one.
//! Execution walks the schedule per view per frame, binding transients from
//! the resource pool and returning them tagged with the frame counter.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::gal::descriptors::TextureCreationDesc;
use crate::gal::error::GalResult;
use crate::gal::handles::TextureHandle;

use super::super::extract::Extractor;
use super::super::pool::GpuResourcePool;
use super::super::view::View;
use super::pass::{ConnectionBinding, PassIo, PinKind, RenderPipelinePass, pin_index};
use super::view_context::RenderViewContext;

crate::define_handle!(
    /// Handle to a pipeline owned by the render world.
    pub struct RenderPipelineHandle
);

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pin connectivity forms a cycle; the pipeline is unusable.
    #[error("render pipeline graph contains a cycle")]
    Cycle,

    /// A pass refused its negotiated inputs during compilation.
    #[error("pass '{0}' rejected its inputs")]
    PassRejectedInputs(String),

    #[error("pass index {0} is out of range")]
    InvalidPass(u32),

    #[error("pass '{pass}' has no pin named '{pin}'")]
    InvalidPin { pass: String, pin: String },

    #[error("pin '{pin}' of pass '{pass}' is not connectable in that direction")]
    PinDirection { pass: String, pin: String },

    #[error("render pipeline is not compiled")]
    NotCompiled,

    /// A required input pin ended up without a connection.
    #[error("pass '{pass}' input pin '{pin}' is unconnected")]
    UnconnectedInput { pass: String, pin: String },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PipelineState {
    Uncompiled,
    Compiled,
    /// Compilation failed; the frontend skips rendering for views bound to
    /// this pipeline.
    Invalid,
}

/// An edge in the graph: one output pin feeding one or more input pins.
#[derive(Clone, Debug, PartialEq)]
pub struct Connection {
    pub src_node: u32,
    pub src_pin: u16,
    pub destinations: Vec<(u32, u16)>,
    /// Filled during compilation.
    pub desc: Option<TextureCreationDesc>,
}

pub(crate) struct PassNode {
    pub pass: Box<dyn RenderPipelinePass>,
    pub active: bool,
}

/// Where a connection's physical resource comes from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ResourceSource {
    /// Pool-allocated transient, by physical slot index.
    Transient(u32),
    /// The view's actual render target behind a sink pin.
    External { sink_node: u32, sink_pin: u16 },
}

struct PhysicalSlot {
    desc: TextureCreationDesc,
    /// `(first_use, last_use)` intervals assigned to this slot, in pass
    /// order. Non-overlapping by construction.
    intervals: Vec<(u32, u32)>,
}

struct CompiledSchedule {
    /// Pass indices in topological order.
    order: Vec<u32>,
    /// Physical transient slots; one pooled texture each at execution.
    slots: Vec<PhysicalSlot>,
    /// Per connection: where its resource comes from.
    sources: Vec<ResourceSource>,
    /// Per pass (by node index): pin-index → connection index.
    pin_connections: Vec<Vec<Option<u32>>>,
}

pub struct RenderPipeline {
    pub(crate) passes: Vec<PassNode>,
    connections: Vec<Connection>,
    schedule: Option<CompiledSchedule>,
    state: PipelineState,
    extractors: Vec<Box<dyn Extractor>>,
    /// Per-pass GPU timestamps, recorded when enabled.
    profiling: bool,
    /// `(begin, end)` query per pass node, created on first profiled frame.
    pass_queries: Vec<Option<(crate::gal::handles::QueryHandle, crate::gal::handles::QueryHandle)>>,
}

impl RenderPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            connections: Vec::new(),
            schedule: None,
            state: PipelineState::Uncompiled,
            extractors: Vec::new(),
            profiling: false,
            pass_queries: Vec::new(),
        }
    }

    /// Enables per-pass GPU timestamps. Results read back through
    /// [`pass_gpu_time`](Self::pass_gpu_time) a few frames later.
    pub fn set_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    /// Calibrated `(begin, end)` CPU-clock nanoseconds of a pass's last
    /// profiled execution. `None` while results are pending or expired.
    #[must_use]
    pub fn pass_gpu_time(
        &self,
        node: u32,
        device: &crate::gal::device::Device,
    ) -> Option<(u64, u64)> {
        use crate::gal::backend::TimestampResult;
        let (begin, end) = (*self.pass_queries.get(node as usize)?)?;
        match (
            device.get_timestamp_result(begin, false),
            device.get_timestamp_result(end, false),
        ) {
            (TimestampResult::Time(b), TimestampResult::Time(e)) => Some((b, e)),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Pass order of the compiled schedule.
    #[must_use]
    pub fn pass_order(&self) -> Option<&[u32]> {
        self.schedule.as_ref().map(|s| s.order.as_slice())
    }

    pub fn add_pass(&mut self, pass: Box<dyn RenderPipelinePass>) -> u32 {
        let index = self.passes.len() as u32;
        self.passes.push(PassNode { pass, active: true });
        self.invalidate();
        index
    }

    pub fn set_pass_active(&mut self, node: u32, active: bool) {
        if let Some(pass) = self.passes.get_mut(node as usize) {
            pass.active = active;
        }
    }

    #[must_use]
    pub fn pass_name(&self, node: u32) -> Option<&str> {
        self.passes.get(node as usize).map(|p| p.pass.name())
    }

    /// Per-pipeline extractors, run after the world-level ones.
    pub fn add_extractor(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    #[must_use]
    pub fn extractors(&self) -> &[Box<dyn Extractor>] {
        &self.extractors
    }

    fn invalidate(&mut self) {
        self.schedule = None;
        if self.state == PipelineState::Compiled {
            self.state = PipelineState::Uncompiled;
        }
    }

    /// Connects `src_node.src_pin` (an output or pass-through) to
    /// `dst_node.dst_pin` (an input or pass-through). One output may feed
    /// several inputs.
    pub fn connect(
        &mut self,
        src_node: u32,
        src_pin: &str,
        dst_node: u32,
        dst_pin: &str,
    ) -> Result<(), PipelineError> {
        let src = self
            .passes
            .get(src_node as usize)
            .ok_or(PipelineError::InvalidPass(src_node))?;
        let dst = self
            .passes
            .get(dst_node as usize)
            .ok_or(PipelineError::InvalidPass(dst_node))?;

        let src_pin_index =
            pin_index(src.pass.as_ref(), src_pin).ok_or_else(|| PipelineError::InvalidPin {
                pass: src.pass.name().to_owned(),
                pin: src_pin.to_owned(),
            })?;
        let dst_pin_index =
            pin_index(dst.pass.as_ref(), dst_pin).ok_or_else(|| PipelineError::InvalidPin {
                pass: dst.pass.name().to_owned(),
                pin: dst_pin.to_owned(),
            })?;

        let src_kind = src.pass.pins()[src_pin_index as usize].kind;
        if src_kind == PinKind::Input {
            return Err(PipelineError::PinDirection {
                pass: src.pass.name().to_owned(),
                pin: src_pin.to_owned(),
            });
        }
        let dst_kind = dst.pass.pins()[dst_pin_index as usize].kind;
        if dst_kind == PinKind::Output {
            return Err(PipelineError::PinDirection {
                pass: dst.pass.name().to_owned(),
                pin: dst_pin.to_owned(),
            });
        }

        // Extend an existing connection from the same output pin.
        if let Some(connection) = self
            .connections
            .iter_mut()
            .find(|c| c.src_node == src_node && c.src_pin == src_pin_index)
        {
            connection.destinations.push((dst_node, dst_pin_index));
        } else {
            self.connections.push(Connection {
                src_node,
                src_pin: src_pin_index,
                destinations: vec![(dst_node, dst_pin_index)],
                desc: None,
            });
        }
        self.invalidate();
        Ok(())
    }

    pub(crate) fn restore_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
        self.invalidate();
    }

    pub(crate) fn replace_connection(&mut self, index: usize, connection: Connection) {
        self.connections[index] = connection;
        self.invalidate();
    }

    // ── Compilation ────────────────────────────────────────────────────────

    /// Compiles the schedule for `view`'s configuration. On failure the
    /// pipeline is marked invalid and views bound to it skip rendering.
    pub fn compile(&mut self, view: &View) -> Result<(), PipelineError> {
        match self.try_compile(view) {
            Ok(schedule) => {
                self.schedule = Some(schedule);
                self.state = PipelineState::Compiled;
                Ok(())
            }
            Err(e) => {
                self.state = PipelineState::Invalid;
                self.schedule = None;
                log::error!("render pipeline compilation failed: {e}");
                Err(e)
            }
        }
    }

    fn try_compile(&mut self, view: &View) -> Result<CompiledSchedule, PipelineError> {
        // 1. Topological sort over pin connectivity.
        let order = self.topological_order()?;
        let position: FxHashMap<u32, u32> = order
            .iter()
            .enumerate()
            .map(|(pos, node)| (*node, pos as u32))
            .collect();

        // 2. Pin → connection tables, split by direction: a pass-through pin
        //    has both an arriving and a leaving connection.
        let empty_tables = || -> Vec<Vec<Option<u32>>> {
            self.passes
                .iter()
                .map(|p| vec![None; p.pass.pins().len()])
                .collect()
        };
        let mut pin_inputs = empty_tables();
        let mut pin_outputs = empty_tables();
        for (connection_index, connection) in self.connections.iter().enumerate() {
            pin_outputs[connection.src_node as usize][connection.src_pin as usize] =
                Some(connection_index as u32);
            for (dst_node, dst_pin) in &connection.destinations {
                pin_inputs[*dst_node as usize][*dst_pin as usize] =
                    Some(connection_index as u32);
            }
        }

        // 3. Descriptor negotiation in schedule order.
        let mut connection_descs: Vec<Option<TextureCreationDesc>> =
            vec![None; self.connections.len()];
        for node in &order {
            let pass_node = &self.passes[*node as usize];
            let pins = pass_node.pass.pins();

            let inputs: Vec<Option<TextureCreationDesc>> = pins
                .iter()
                .enumerate()
                .map(|(pin, desc)| {
                    if desc.kind == PinKind::Output {
                        return None;
                    }
                    pin_inputs[*node as usize][pin]
                        .and_then(|c| connection_descs[c as usize])
                })
                .collect();

            // Required inputs must have arrived by now.
            for (pin, desc) in pins.iter().enumerate() {
                if desc.kind == PinKind::Input
                    && !desc.optional
                    && inputs[pin].is_none()
                {
                    return Err(PipelineError::UnconnectedInput {
                        pass: pass_node.pass.name().to_owned(),
                        pin: desc.name.to_owned(),
                    });
                }
            }

            let mut outputs: Vec<Option<TextureCreationDesc>> = vec![None; pins.len()];
            if !pass_node
                .pass
                .get_render_target_descriptions(view, &inputs, &mut outputs)
            {
                return Err(PipelineError::PassRejectedInputs(
                    pass_node.pass.name().to_owned(),
                ));
            }

            for (pin, pin_desc) in pins.iter().enumerate() {
                let Some(connection) = pin_outputs[*node as usize][pin] else {
                    continue;
                };
                // Only the producing side publishes a descriptor.
                let produced = match pin_desc.kind {
                    PinKind::Output => outputs[pin],
                    // Pass-through forwards the input descriptor unless the
                    // pass overrode it.
                    PinKind::PassThrough => outputs[pin].or(inputs[pin]),
                    PinKind::Input => None,
                };
                if let Some(desc) = produced {
                    connection_descs[connection as usize] = Some(desc);
                }
            }
        }

        for (connection, desc) in self.connections.iter_mut().zip(&connection_descs) {
            connection.desc = *desc;
        }

        // 4. Resource unification, in schedule order so chains of
        //    pass-through pins resolve to their first producer: a
        //    pass-through pin's outgoing connection shares its incoming
        //    connection's physical resource.
        let mut resource_of: Vec<u32> = (0..self.connections.len() as u32).collect();
        for node in &order {
            let pass_node = &self.passes[*node as usize];
            for (pin, pin_desc) in pass_node.pass.pins().iter().enumerate() {
                if pin_desc.kind != PinKind::PassThrough {
                    continue;
                }
                let outgoing = pin_outputs[*node as usize][pin];
                let incoming = pin_inputs[*node as usize][pin];
                if let (Some(outgoing), Some(incoming)) = (outgoing, incoming) {
                    resource_of[outgoing as usize] = resource_of[incoming as usize];
                }
            }
        }

        // 5. External (sink-bound) resources bypass the pool.
        let mut sources: Vec<Option<ResourceSource>> = vec![None; self.connections.len()];
        for (connection_index, connection) in self.connections.iter().enumerate() {
            for (dst_node, dst_pin) in &connection.destinations {
                let pass_node = &self.passes[*dst_node as usize];
                if pass_node.pass.is_sink() {
                    let root = resource_of[connection_index] as usize;
                    sources[root] = Some(ResourceSource::External {
                        sink_node: *dst_node,
                        sink_pin: *dst_pin,
                    });
                }
            }
        }

        // 6. Liveness intervals per physical resource (first producer →
        //    last consumer), then greedy slot assignment: intervals that do
        //    not overlap may share a pooled texture.
        struct Interval {
            resource: u32,
            desc: TextureCreationDesc,
            first: u32,
            last: u32,
        }
        let mut intervals: FxHashMap<u32, Interval> = FxHashMap::default();
        for (connection_index, connection) in self.connections.iter().enumerate() {
            let root = resource_of[connection_index];
            if sources[root as usize].is_some() {
                continue; // external
            }
            let Some(desc) = connection_descs[connection_index] else {
                continue;
            };
            let first = position[&connection.src_node];
            let mut last = first;
            for (dst_node, _) in &connection.destinations {
                last = last.max(position[dst_node]);
            }
            intervals
                .entry(root)
                .and_modify(|i| {
                    i.first = i.first.min(first);
                    i.last = i.last.max(last);
                })
                .or_insert(Interval {
                    resource: root,
                    desc,
                    first,
                    last,
                });
        }

        let mut ordered_intervals: Vec<Interval> = intervals.into_values().collect();
        ordered_intervals.sort_by_key(|i| (i.first, i.last));

        let mut slots: Vec<PhysicalSlot> = Vec::new();
        for interval in &ordered_intervals {
            let slot_index = slots.iter_mut().position(|slot| {
                slot.desc == interval.desc
                    && slot
                        .intervals
                        .last()
                        .is_none_or(|(_, last)| *last < interval.first)
            });
            let slot_index = match slot_index {
                Some(index) => {
                    slots[index].intervals.push((interval.first, interval.last));
                    index
                }
                None => {
                    slots.push(PhysicalSlot {
                        desc: interval.desc,
                        intervals: vec![(interval.first, interval.last)],
                    });
                    slots.len() - 1
                }
            };
            sources[interval.resource as usize] =
                Some(ResourceSource::Transient(slot_index as u32));
        }

        // Connections resolve through their unification root.
        let resolved_sources: Vec<ResourceSource> = (0..self.connections.len())
            .map(|i| {
                let root = resource_of[i] as usize;
                sources[root].unwrap_or(ResourceSource::Transient(u32::MAX))
            })
            .collect();

        // Execution binds one connection per pin: the arriving one when the
        // pin has both (they alias the same resource anyway).
        let pin_connections: Vec<Vec<Option<u32>>> = pin_inputs
            .iter()
            .zip(&pin_outputs)
            .map(|(inputs, outputs)| {
                inputs
                    .iter()
                    .zip(outputs)
                    .map(|(input, output)| input.or(*output))
                    .collect()
            })
            .collect();

        Ok(CompiledSchedule {
            order,
            slots,
            sources: resolved_sources,
            pin_connections,
        })
    }

    fn topological_order(&self) -> Result<Vec<u32>, PipelineError> {
        let count = self.passes.len();
        let mut in_degree = vec![0usize; count];
        let mut edges: Vec<Vec<u32>> = vec![Vec::new(); count];
        for connection in &self.connections {
            for (dst_node, _) in &connection.destinations {
                if *dst_node != connection.src_node {
                    edges[connection.src_node as usize].push(*dst_node);
                    in_degree[*dst_node as usize] += 1;
                }
            }
        }

        // Lowest index first keeps the order deterministic.
        let mut ready: Vec<u32> = (0..count as u32)
            .filter(|i| in_degree[*i as usize] == 0)
            .collect();
        ready.sort_unstable_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(count);
        while let Some(node) = ready.pop() {
            order.push(node);
            for &next in &edges[node as usize] {
                in_degree[next as usize] -= 1;
                if in_degree[next as usize] == 0 {
                    ready.push(next);
                    ready.sort_unstable_by(|a, b| b.cmp(a));
                }
            }
        }

        if order.len() != count {
            return Err(PipelineError::Cycle);
        }
        Ok(order)
    }

    /// Slot count of the compiled schedule; the number of pooled textures
    /// one execution acquires.
    #[must_use]
    pub fn transient_slot_count(&self) -> usize {
        self.schedule.as_ref().map_or(0, |s| s.slots.len())
    }

    /// Whether any two connections with overlapping liveness share a slot.
    /// Diagnostic for the alias-safety invariant; always `false` for a
    /// correct compilation.
    #[must_use]
    pub fn has_aliasing_violation(&self) -> bool {
        let Some(schedule) = &self.schedule else {
            return false;
        };
        for slot in &schedule.slots {
            for pair in slot.intervals.windows(2) {
                if pair[1].0 <= pair[0].1 {
                    return true;
                }
            }
        }
        false
    }

    // ── Execution ──────────────────────────────────────────────────────────

    /// Executes the compiled schedule for one view/frame. Transients come
    /// from `pool` and return to it afterwards, tagged with the current
    /// frame.
    pub fn execute(
        &mut self,
        view: &mut View,
        ctx: &mut RenderViewContext<'_>,
        pool: &GpuResourcePool,
    ) -> GalResult<()> {
        let Some(schedule) = &self.schedule else {
            // An uncompiled or invalid pipeline renders nothing.
            return Ok(());
        };

        // Acquire one pooled texture per physical slot.
        let mut slot_textures: Vec<TextureHandle> = Vec::with_capacity(schedule.slots.len());
        for slot in &schedule.slots {
            slot_textures.push(pool.get_render_target(&slot.desc)?);
        }

        let resolve = |source: ResourceSource,
                       connection: &Connection|
         -> Option<ConnectionBinding> {
            match source {
                ResourceSource::Transient(slot) => {
                    let texture = *slot_textures.get(slot as usize)?;
                    Some(ConnectionBinding {
                        texture,
                        desc: connection.desc?,
                    })
                }
                ResourceSource::External { sink_node, sink_pin } => {
                    let sink = &self.passes[sink_node as usize];
                    let pin_name = sink.pass.pins()[sink_pin as usize].name;
                    let texture = sink.pass.sink_target(&view.target, pin_name)?;
                    Some(ConnectionBinding {
                        texture,
                        desc: connection.desc?,
                    })
                }
            }
        };

        // Pre-resolve each pass's pin bindings so the pass borrow below
        // stays disjoint from the schedule.
        let mut per_pass_bindings: Vec<Vec<Option<ConnectionBinding>>> =
            Vec::with_capacity(self.passes.len());
        for pins in &schedule.pin_connections {
            let bindings = pins
                .iter()
                .map(|connection_index| {
                    connection_index.and_then(|c| {
                        resolve(schedule.sources[c as usize], &self.connections[c as usize])
                    })
                })
                .collect();
            per_pass_bindings.push(bindings);
        }

        if self.profiling && self.pass_queries.len() < self.passes.len() {
            self.pass_queries.resize(self.passes.len(), None);
        }

        let order = schedule.order.clone();
        let profiling = self.profiling;
        let mut result = Ok(());
        for node in order {
            if profiling {
                self.record_pass_timestamp(ctx, node, true);
            }
            let pass_node = &mut self.passes[node as usize];
            let io = PassIo {
                pins: &per_pass_bindings[node as usize],
            };
            let pass_result = if pass_node.active {
                pass_node.pass.execute(ctx, &io)
            } else {
                pass_node.pass.execute_inactive(ctx, &io)
            };
            if profiling {
                self.record_pass_timestamp(ctx, node, false);
            }
            if let Err(e) = pass_result {
                result = Err(e);
                break;
            }
            self.passes[node as usize].pass.read_back_properties(view);
        }

        for texture in slot_textures {
            pool.return_render_target(texture);
        }
        result
    }

    /// Records one boundary timestamp for `node` in its own small command
    /// list, so pass implementations stay unaware of profiling.
    fn record_pass_timestamp(&mut self, ctx: &mut RenderViewContext<'_>, node: u32, begin: bool) {
        use crate::gal::backend::PipelineStage;

        let queries = match &mut self.pass_queries[node as usize] {
            Some(queries) => *queries,
            slot @ None => {
                let Ok(begin_query) = ctx.device.create_query() else {
                    return;
                };
                let Ok(end_query) = ctx.device.create_query() else {
                    ctx.device.destroy_query(begin_query);
                    return;
                };
                *slot = Some((begin_query, end_query));
                (begin_query, end_query)
            }
        };

        let name = self.passes[node as usize].pass.name();
        let Ok(mut pass) = ctx.device.begin_pass(name) else {
            return;
        };
        let (begin_query, end_query) = queries;
        if begin {
            pass.insert_timestamp(begin_query, PipelineStage::TopOfPipe);
        } else {
            pass.insert_timestamp(end_query, PipelineStage::BottomOfPipe);
        }
        ctx.device.end_pass(pass);
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new()
    }
}
