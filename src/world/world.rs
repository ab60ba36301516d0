//! World
//!
//! Owns the object allocator, the component-manager table, the update-phase
//! schedule, the message queue, and the spatial system. One `World` is
//! externally synchronized: the runtime wraps it in a read/write lock whose
//! write side covers the update phases and whose read side is shared by the
//! per-view extraction tasks. Async-phase updates additionally run against a
//! read-only [`AsyncContext`](super::component::AsyncContext), so parallel
//! component ranges never see mutable world state.
//!
//! # Frame boundary
//!
//! Object creation is immediate but the object stays "initializing" until
//! the end of the frame, when `initialize`/`on_activated` run. Destruction
//! deactivates components immediately and releases storage at the boundary.

use std::any::TypeId;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::core::handle::GenIdx;
use crate::core::interner::{self, Symbol};
use crate::core::tasks::TaskPool;

use super::component::{
    AnyComponentManager, Component, ComponentHandle, ComponentManager, LifecycleEvent,
    StorageKind, UpdatePhase,
};
use super::messages::{Message, MessageQueue};
use super::object::{GameObject, GameObjectDesc, GameObjectHandle, ObjectState, ObjectStorage, Transform};
use super::spatial::system::SpatialSystem;

#[derive(Error, Debug)]
pub enum WorldError {
    /// Update-function dependencies form a cycle. Configuration error,
    /// detected at registration.
    #[error("update dependency cycle involving '{0}'")]
    UpdateCycle(String),

    #[error("component manager for '{0}' already registered")]
    DuplicateManager(&'static str),

    #[error("component type is not registered")]
    UnknownComponentType,

    #[error("game object is not alive")]
    DeadObject,
}

/// The world subsystems components interact with, split from object storage
/// so lifecycle callbacks can borrow both.
pub struct WorldServices {
    pub world_index: u8,
    pub spatial: SpatialSystem,
    pub messages: MessageQueue,
    pub time: f64,
    pub delta: f32,
    pub frame: u64,
}

pub struct World {
    objects: ObjectStorage,
    managers: Vec<Box<dyn AnyComponentManager>>,
    manager_by_type: FxHashMap<TypeId, u16>,
    services: WorldServices,
    /// Per phase: `(manager index, update name)` in dependency order.
    schedule: [Vec<(u16, Symbol)>; 4],
    pending_object_init: Vec<GameObjectHandle>,
    pending_component_init: Vec<ComponentHandle>,
    pending_destroy: Vec<GameObjectHandle>,
    simulation_started: bool,
    task_pool: TaskPool,
}

impl World {
    #[must_use]
    pub fn new(world_index: u8, task_pool: TaskPool) -> Self {
        super::spatial::data::DefaultSpatialCategories::register();
        Self {
            objects: ObjectStorage::new(),
            managers: Vec::new(),
            manager_by_type: FxHashMap::default(),
            services: WorldServices {
                world_index,
                spatial: SpatialSystem::new(),
                messages: MessageQueue::new(),
                time: 0.0,
                delta: 0.0,
                frame: 0,
            },
            schedule: [const { Vec::new() }; 4],
            pending_object_init: Vec::new(),
            pending_component_init: Vec::new(),
            pending_destroy: Vec::new(),
            simulation_started: false,
            task_pool,
        }
    }

    #[inline]
    #[must_use]
    pub fn objects(&self) -> &ObjectStorage {
        &self.objects
    }

    #[inline]
    #[must_use]
    pub fn spatial(&self) -> &SpatialSystem {
        &self.services.spatial
    }

    #[inline]
    #[must_use]
    pub fn spatial_mut(&mut self) -> &mut SpatialSystem {
        &mut self.services.spatial
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.services.frame
    }

    #[inline]
    #[must_use]
    pub fn time(&self) -> f64 {
        self.services.time
    }

    // ── Component manager registration ─────────────────────────────────────

    /// Registers a manager for `T`. `configure` installs update functions;
    /// the phase schedule is rebuilt afterwards and dependency cycles fail
    /// registration.
    pub fn register_component_type<T: Component>(
        &mut self,
        type_name: &'static str,
        storage: StorageKind,
        configure: impl FnOnce(&mut ComponentManager<T>),
    ) -> Result<(), WorldError> {
        if self.manager_by_type.contains_key(&TypeId::of::<T>()) {
            return Err(WorldError::DuplicateManager(type_name));
        }
        let type_index = self.managers.len() as u16;
        let mut manager = ComponentManager::<T>::new(type_index, type_name, storage);
        configure(&mut manager);
        self.managers.push(Box::new(manager));
        self.manager_by_type.insert(TypeId::of::<T>(), type_index);

        if let Err(e) = self.rebuild_schedule() {
            // Roll the registration back; the world stays usable.
            self.managers.pop();
            self.manager_by_type.remove(&TypeId::of::<T>());
            let _ = self.rebuild_schedule();
            return Err(e);
        }
        Ok(())
    }

    /// Kahn topological sort per phase over update-function names.
    fn rebuild_schedule(&mut self) -> Result<(), WorldError> {
        struct Node {
            manager: u16,
            name: Symbol,
            name_str: &'static str,
            deps: Vec<Symbol>,
        }

        for (phase_index, phase) in UpdatePhase::ALL.iter().enumerate() {
            let mut nodes: Vec<Node> = Vec::new();
            for (manager_index, manager) in self.managers.iter().enumerate() {
                for desc in manager.update_descs() {
                    if desc.phase == *phase {
                        nodes.push(Node {
                            manager: manager_index as u16,
                            name: interner::intern(desc.name),
                            name_str: desc.name,
                            deps: desc.dependencies.iter().map(|d| interner::intern(d)).collect(),
                        });
                    }
                }
            }

            let position: FxHashMap<Symbol, usize> =
                nodes.iter().enumerate().map(|(i, n)| (n.name, i)).collect();
            let mut in_degree = vec![0usize; nodes.len()];
            let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
            for (i, node) in nodes.iter().enumerate() {
                for dep in &node.deps {
                    // Dependencies on other phases (or unregistered types)
                    // are already ordered by phase; ignore them here.
                    if let Some(&from) = position.get(dep) {
                        edges[from].push(i);
                        in_degree[i] += 1;
                    }
                }
            }

            let mut ready: Vec<usize> = (0..nodes.len()).filter(|i| in_degree[*i] == 0).collect();
            let mut ordered = Vec::with_capacity(nodes.len());
            while let Some(i) = ready.pop() {
                ordered.push((nodes[i].manager, nodes[i].name));
                for &next in &edges[i] {
                    in_degree[next] -= 1;
                    if in_degree[next] == 0 {
                        ready.push(next);
                    }
                }
            }

            if ordered.len() != nodes.len() {
                let stuck = nodes
                    .iter()
                    .enumerate()
                    .find(|(i, _)| in_degree[*i] > 0)
                    .map_or("<unknown>", |(_, n)| n.name_str);
                return Err(WorldError::UpdateCycle(stuck.to_owned()));
            }
            self.schedule[phase_index] = ordered;
        }
        Ok(())
    }

    // ── Object lifecycle ───────────────────────────────────────────────────

    /// Creates an object. It participates in queries immediately but its
    /// components' `initialize`/`on_activated` run at the frame boundary.
    pub fn create_object(&mut self, desc: &GameObjectDesc) -> GameObjectHandle {
        let handle = self.objects.insert(GameObject::new(desc));
        if !desc.parent.is_invalid() {
            if let Some(parent) = self.objects.get_mut(desc.parent) {
                parent.children.push(handle);
            }
        }
        self.pending_object_init.push(handle);
        handle
    }

    /// Marks the object dead: detaches it from its parent and deactivates
    /// its components now; storage is released at the next frame boundary.
    /// Children are destroyed with it.
    pub fn destroy_object(&mut self, handle: GameObjectHandle) {
        let Some(object) = self.objects.get_mut(handle) else {
            return;
        };
        if object.state == ObjectState::Dead {
            return;
        }
        object.state = ObjectState::Dead;
        let parent = object.parent;
        let children: Vec<GameObjectHandle> = object.children.to_vec();
        let components: Vec<ComponentHandle> = object.components.to_vec();
        object.parent = GameObjectHandle::INVALID;

        if let Some(parent) = self.objects.get_mut(parent) {
            parent.children.retain(|c| *c != handle);
        }
        for component in components {
            self.component_lifecycle(component, LifecycleEvent::OnDeactivated);
        }
        self.pending_destroy.push(handle);

        for child in children {
            self.destroy_object(child);
        }
    }

    #[must_use]
    pub fn is_object_alive(&self, handle: GameObjectHandle) -> bool {
        self.objects.is_alive(handle)
    }

    pub fn set_local_transform(&mut self, handle: GameObjectHandle, transform: Transform) {
        if let Some(object) = self.objects.get_mut(handle) {
            object.local = transform;
            self.objects.mark_dirty(handle);
        }
    }

    #[must_use]
    pub fn global_transform(&self, handle: GameObjectHandle) -> glam::Affine3A {
        self.objects.global_transform(handle)
    }

    // ── Components ─────────────────────────────────────────────────────────

    /// Attaches `component` to `owner`. Lifecycle callbacks run at the next
    /// frame boundary.
    pub fn create_component<T: Component>(
        &mut self,
        owner: GameObjectHandle,
        component: T,
    ) -> Result<ComponentHandle, WorldError> {
        if !self.objects.is_alive(owner) {
            return Err(WorldError::DeadObject);
        }
        let type_index = *self
            .manager_by_type
            .get(&TypeId::of::<T>())
            .ok_or(WorldError::UnknownComponentType)?;
        let manager = self.managers[type_index as usize]
            .as_any_mut()
            .downcast_mut::<ComponentManager<T>>()
            .expect("manager type");
        let id = manager.insert(owner, component);
        let handle = ComponentHandle {
            world_index: self.services.world_index,
            type_index,
            id,
        };
        if let Some(object) = self.objects.get_mut(owner) {
            object.components.push(handle);
        }
        self.pending_component_init.push(handle);
        Ok(handle)
    }

    #[must_use]
    pub fn manager<T: Component>(&self) -> Option<&ComponentManager<T>> {
        let type_index = *self.manager_by_type.get(&TypeId::of::<T>())?;
        self.managers[type_index as usize]
            .as_any()
            .downcast_ref::<ComponentManager<T>>()
    }

    #[must_use]
    pub fn manager_mut<T: Component>(&mut self) -> Option<&mut ComponentManager<T>> {
        let type_index = *self.manager_by_type.get(&TypeId::of::<T>())?;
        self.managers[type_index as usize]
            .as_any_mut()
            .downcast_mut::<ComponentManager<T>>()
    }

    #[must_use]
    pub fn get_component<T: Component>(&self, handle: ComponentHandle) -> Option<&T> {
        let type_index = *self.manager_by_type.get(&TypeId::of::<T>())?;
        if handle.type_index != type_index {
            return None;
        }
        self.manager::<T>()?.get(handle.id)
    }

    #[must_use]
    pub fn get_component_mut<T: Component>(&mut self, handle: ComponentHandle) -> Option<&mut T> {
        let type_index = *self.manager_by_type.get(&TypeId::of::<T>())?;
        if handle.type_index != type_index {
            return None;
        }
        self.manager_mut::<T>()?.get_mut(handle.id)
    }

    /// Type index assigned to `T`'s manager, if registered.
    #[must_use]
    pub fn component_type_index<T: Component>(&self) -> Option<u16> {
        self.manager_by_type.get(&TypeId::of::<T>()).copied()
    }

    fn component_lifecycle(&mut self, handle: ComponentHandle, event: LifecycleEvent) {
        let Some(manager) = self.managers.get_mut(handle.type_index as usize) else {
            return;
        };
        manager.lifecycle(handle.id, event, &mut self.objects, &mut self.services);
    }

    // ── Messaging ──────────────────────────────────────────────────────────

    /// Synchronously invokes the target component's message handler.
    pub fn send_message(&mut self, target: ComponentHandle, message: &Message) {
        let Some(manager) = self.managers.get_mut(target.type_index as usize) else {
            return;
        };
        manager.dispatch_message(target.id, message, &mut self.objects, &mut self.services);
    }

    /// Enqueues a message for delivery after `delay_seconds` of world time.
    pub fn post_message(&mut self, target: ComponentHandle, message: Message, delay_seconds: f64) {
        let now = self.services.time;
        self.services.messages.post(target, message, now, delay_seconds);
    }

    // ── Simulation ─────────────────────────────────────────────────────────

    /// Fires `on_simulation_started` on every active component. Later
    /// activations receive it at their boundary.
    pub fn start_simulation(&mut self) {
        if self.simulation_started {
            return;
        }
        self.simulation_started = true;
        for manager in &mut self.managers {
            manager.lifecycle_all(
                LifecycleEvent::OnSimulationStarted,
                &mut self.objects,
                &mut self.services,
            );
        }
    }

    /// One world frame: due messages, the four update phases with the
    /// transform flush before PostTransform, then the object boundary.
    pub fn update(&mut self, delta_seconds: f32) {
        self.services.frame += 1;
        self.services.delta = delta_seconds;
        self.services.time += f64::from(delta_seconds);
        self.services.spatial.start_new_frame();

        // Due messages are delivered before any update runs.
        let due = self.services.messages.drain_due(self.services.time);
        for (target, message) in due {
            self.send_message(target, &message);
        }

        self.run_phase(UpdatePhase::PreAsync);
        self.run_phase(UpdatePhase::Async);
        self.run_phase(UpdatePhase::PostAsync);
        self.objects.flush_transforms();
        self.run_phase(UpdatePhase::PostTransform);

        self.finish_frame();
    }

    fn run_phase(&mut self, phase: UpdatePhase) {
        let phase_index = UpdatePhase::ALL.iter().position(|p| *p == phase).unwrap();
        // The schedule is detached from `self` so managers, objects, and
        // services can be borrowed simultaneously.
        let schedule = std::mem::take(&mut self.schedule[phase_index]);
        for (manager_index, name) in &schedule {
            self.managers[*manager_index as usize].run_update(
                *name,
                &mut self.objects,
                &mut self.services,
                &self.task_pool,
            );
        }
        self.schedule[phase_index] = schedule;
    }

    /// The frame boundary: pending initializations and deferred destruction.
    fn finish_frame(&mut self) {
        // Component lifecycle for everything created this frame.
        let pending_components = std::mem::take(&mut self.pending_component_init);
        for handle in &pending_components {
            self.component_lifecycle(*handle, LifecycleEvent::Initialize);
            self.component_lifecycle(*handle, LifecycleEvent::OnActivated);
            if self.simulation_started {
                self.component_lifecycle(*handle, LifecycleEvent::OnSimulationStarted);
            }
        }

        for handle in std::mem::take(&mut self.pending_object_init) {
            if let Some(object) = self.objects.get_mut(handle)
                && object.state == ObjectState::Initializing
            {
                object.state = ObjectState::Active;
            }
        }

        // Deferred destruction: deinitialize, drop component storage, drop
        // the object.
        for handle in std::mem::take(&mut self.pending_destroy) {
            let components: Vec<ComponentHandle> = self
                .objects
                .get(handle)
                .map(|o| o.components.to_vec())
                .unwrap_or_default();
            for component in components {
                self.component_lifecycle(component, LifecycleEvent::Deinitialize);
                if let Some(manager) = self.managers.get_mut(component.type_index as usize) {
                    manager.remove(component.id);
                }
            }
            self.objects.table.remove(handle.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::component::{UpdateCallback, UpdateFunctionDesc};

    struct Tick {
        count: u32,
        activated: bool,
    }

    impl Component for Tick {
        fn on_activated(&mut self, _ctx: &mut crate::world::component::ComponentContext<'_>) {
            self.activated = true;
        }
        fn handle_message(
            &mut self,
            msg: &Message,
            _ctx: &mut crate::world::component::ComponentContext<'_>,
        ) {
            if msg.is("add") {
                self.count += msg.payload_as::<u32>().copied().unwrap_or(0);
            }
        }
    }

    fn tick_update(c: &mut Tick, _ctx: &mut crate::world::component::ComponentContext<'_>) {
        c.count += 1;
    }

    fn world_with_tick() -> World {
        let mut world = World::new(0, TaskPool::new(2));
        world
            .register_component_type::<Tick>("Tick", StorageKind::Compact, |manager| {
                manager.register_update(
                    UpdateFunctionDesc {
                        name: "Tick::update",
                        phase: UpdatePhase::PreAsync,
                        dependencies: &[],
                    },
                    UpdateCallback::Sequential(tick_update),
                );
            })
            .unwrap();
        world
    }

    #[test]
    fn components_activate_at_frame_boundary() {
        let mut world = world_with_tick();
        let object = world.create_object(&GameObjectDesc::default());
        let tick = world
            .create_component(object, Tick { count: 0, activated: false })
            .unwrap();

        // Not yet activated: the update must skip it this frame.
        world.update(0.016);
        let component = world.get_component::<Tick>(tick).unwrap();
        assert!(component.activated);
        assert_eq!(component.count, 0);

        // Next frame it ticks.
        world.update(0.016);
        assert_eq!(world.get_component::<Tick>(tick).unwrap().count, 1);
    }

    #[test]
    fn destroy_is_deferred_to_boundary() {
        let mut world = world_with_tick();
        let object = world.create_object(&GameObjectDesc::default());
        world.update(0.016);

        world.destroy_object(object);
        // Dead immediately for liveness queries, storage still present.
        assert!(!world.is_object_alive(object));
        world.update(0.016);
        assert!(world.objects().get(object).is_none());
    }

    #[test]
    fn delayed_messages_deliver_on_time() {
        let mut world = world_with_tick();
        let object = world.create_object(&GameObjectDesc::default());
        let tick = world
            .create_component(object, Tick { count: 0, activated: false })
            .unwrap();
        world.update(1.0);

        world.post_message(tick, Message::new("add", 10u32), 2.0);
        world.update(1.0); // t = 2.0, not yet due
        let base = world.get_component::<Tick>(tick).unwrap().count;
        world.update(1.5); // t = 3.5, due
        let after = world.get_component::<Tick>(tick).unwrap().count;
        assert_eq!(after - base, 10 + 1);
    }

    #[test]
    fn dependency_cycle_fails_registration() {
        struct A;
        impl Component for A {}
        fn noop(_c: &mut A, _ctx: &mut crate::world::component::ComponentContext<'_>) {}

        let mut world = World::new(0, TaskPool::new(1));
        let result = world.register_component_type::<A>("A", StorageKind::FreeList, |manager| {
            manager.register_update(
                UpdateFunctionDesc {
                    name: "A::first",
                    phase: UpdatePhase::PreAsync,
                    dependencies: &["A::second"],
                },
                UpdateCallback::Sequential(noop),
            );
            manager.register_update(
                UpdateFunctionDesc {
                    name: "A::second",
                    phase: UpdatePhase::PreAsync,
                    dependencies: &["A::first"],
                },
                UpdateCallback::Sequential(noop),
            );
        });
        assert!(matches!(result, Err(WorldError::UpdateCycle(_))));
    }

    #[test]
    fn dependencies_order_updates() {
        struct B {
            log: Vec<&'static str>,
        }
        impl Component for B {}
        fn first(c: &mut B, _ctx: &mut crate::world::component::ComponentContext<'_>) {
            c.log.push("first");
        }
        fn second(c: &mut B, _ctx: &mut crate::world::component::ComponentContext<'_>) {
            c.log.push("second");
        }

        let mut world = World::new(0, TaskPool::new(1));
        world
            .register_component_type::<B>("B", StorageKind::FreeList, |manager| {
                // Registered in reverse order; dependencies must fix it.
                manager.register_update(
                    UpdateFunctionDesc {
                        name: "B::second",
                        phase: UpdatePhase::PreAsync,
                        dependencies: &["B::first"],
                    },
                    UpdateCallback::Sequential(second),
                );
                manager.register_update(
                    UpdateFunctionDesc {
                        name: "B::first",
                        phase: UpdatePhase::PreAsync,
                        dependencies: &[],
                    },
                    UpdateCallback::Sequential(first),
                );
            })
            .unwrap();

        let object = world.create_object(&GameObjectDesc::default());
        let b = world.create_component(object, B { log: Vec::new() }).unwrap();
        world.update(0.016);
        world.update(0.016);
        let log = &world.get_component::<B>(b).unwrap().log;
        assert_eq!(log.as_slice(), ["first", "second"]);
    }
}
