//! Components & Component Managers
//!
//! A component is a polymorphic capability bundle attached to a game object.
//! Each concrete type has a [`ComponentManager`] owning its storage (compact
//! or free-list, block-allocated behind a handle table) and optionally
//! registering update functions that run at a declared phase.
//!
//! Typed [`ComponentHandle`]s carry `{world index, type index, slot id}` and
//! survive storage reallocation.

use std::any::{Any, TypeId};
use std::io;

use crate::core::handle::{GenIdx, HandleTable};
use crate::core::interner::{self, Symbol};
use crate::core::tasks::TaskPool;

use super::messages::Message;
use super::object::{GameObjectHandle, ObjectStorage};

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Typed component handle: world index, component type index, and the
/// generational slot id inside that type's storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentHandle {
    pub world_index: u8,
    pub type_index: u16,
    pub id: GenIdx,
}

impl ComponentHandle {
    pub const INVALID: Self = Self {
        world_index: 0,
        type_index: u16::MAX,
        id: GenIdx::INVALID,
    };

    #[inline]
    #[must_use]
    pub fn is_invalid(self) -> bool {
        self.id.is_invalid()
    }
}

impl Default for ComponentHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

// ─── Component trait ──────────────────────────────────────────────────────────

/// Context handed to lifecycle callbacks and message handlers.
pub struct ComponentContext<'a> {
    pub owner: GameObjectHandle,
    pub this: ComponentHandle,
    pub objects: &'a mut ObjectStorage,
    pub services: &'a mut super::world::WorldServices,
}

/// Read-only context for Async-phase updates running on worker tasks.
pub struct AsyncContext<'a> {
    pub owner: GameObjectHandle,
    pub objects: &'a ObjectStorage,
    pub time: f64,
    pub delta: f32,
    pub frame: u64,
}

/// The component capability set. All methods default to no-ops so concrete
/// types implement only what they use.
pub trait Component: Any + Send + Sync {
    fn initialize(&mut self, _ctx: &mut ComponentContext<'_>) {}
    fn deinitialize(&mut self, _ctx: &mut ComponentContext<'_>) {}
    fn on_activated(&mut self, _ctx: &mut ComponentContext<'_>) {}
    fn on_deactivated(&mut self, _ctx: &mut ComponentContext<'_>) {}
    fn on_simulation_started(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn serialize_component(&self, _w: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }
    fn deserialize_component(&mut self, _r: &mut dyn io::Read) -> io::Result<()> {
        Ok(())
    }

    fn handle_message(&mut self, _msg: &Message, _ctx: &mut ComponentContext<'_>) {}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleEvent {
    Initialize,
    Deinitialize,
    OnActivated,
    OnDeactivated,
    OnSimulationStarted,
}

// ─── Update registration ──────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UpdatePhase {
    PreAsync,
    Async,
    PostAsync,
    PostTransform,
}

impl UpdatePhase {
    pub const ALL: [Self; 4] = [Self::PreAsync, Self::Async, Self::PostAsync, Self::PostTransform];
}

#[derive(Clone, Debug)]
pub struct UpdateFunctionDesc {
    pub name: &'static str,
    pub phase: UpdatePhase,
    /// Names of update functions (any manager) that must run first.
    pub dependencies: &'static [&'static str],
}

pub enum UpdateCallback<T> {
    /// Runs on the main world thread in schedule order.
    Sequential(fn(&mut T, &mut ComponentContext<'_>)),
    /// Runs on worker tasks over non-overlapping component ranges.
    Parallel(fn(&mut T, &AsyncContext<'_>)),
}

struct RegisteredUpdate<T> {
    desc: UpdateFunctionDesc,
    name_sym: Symbol,
    callback: UpdateCallback<T>,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

/// Storage strategy for a component type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageKind {
    /// Dense array with swap-remove; iteration order is unstable but cache
    /// friendly. For hot, numerous components.
    Compact,
    /// Slot reuse through a free list; stable addresses per slot id.
    FreeList,
}

struct Entry<T> {
    component: T,
    owner: GameObjectHandle,
    active: bool,
}

enum Storage<T> {
    Compact {
        dense: Vec<Entry<T>>,
        dense_ids: Vec<GenIdx>,
        sparse: HandleTable<u32>,
    },
    FreeList(HandleTable<Entry<T>>),
}

impl<T> Storage<T> {
    fn new(kind: StorageKind) -> Self {
        match kind {
            StorageKind::Compact => Self::Compact {
                dense: Vec::new(),
                dense_ids: Vec::new(),
                sparse: HandleTable::new(),
            },
            StorageKind::FreeList => Self::FreeList(HandleTable::new()),
        }
    }

    fn insert(&mut self, entry: Entry<T>) -> GenIdx {
        match self {
            Self::Compact {
                dense,
                dense_ids,
                sparse,
            } => {
                let dense_index = dense.len() as u32;
                dense.push(entry);
                let id = sparse.insert(dense_index);
                dense_ids.push(id);
                id
            }
            Self::FreeList(table) => table.insert(entry),
        }
    }

    fn remove(&mut self, id: GenIdx) -> Option<Entry<T>> {
        match self {
            Self::Compact {
                dense,
                dense_ids,
                sparse,
            } => {
                let dense_index = sparse.remove(id)? as usize;
                let entry = dense.swap_remove(dense_index);
                dense_ids.swap_remove(dense_index);
                // The swapped-in tail entry changed its dense index.
                if dense_index < dense.len() {
                    let moved_id = dense_ids[dense_index];
                    if let Some(slot) = sparse.get_mut(moved_id) {
                        *slot = dense_index as u32;
                    }
                }
                Some(entry)
            }
            Self::FreeList(table) => table.remove(id),
        }
    }

    fn get(&self, id: GenIdx) -> Option<&Entry<T>> {
        match self {
            Self::Compact { dense, sparse, .. } => {
                let dense_index = *sparse.get(id)? as usize;
                dense.get(dense_index)
            }
            Self::FreeList(table) => table.get(id),
        }
    }

    fn get_mut(&mut self, id: GenIdx) -> Option<&mut Entry<T>> {
        match self {
            Self::Compact { dense, sparse, .. } => {
                let dense_index = *sparse.get(id)? as usize;
                dense.get_mut(dense_index)
            }
            Self::FreeList(table) => table.get_mut(id),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Compact { dense, .. } => dense.len(),
            Self::FreeList(table) => table.len(),
        }
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(GenIdx, &mut Entry<T>)) {
        match self {
            Self::Compact {
                dense, dense_ids, ..
            } => {
                for (i, entry) in dense.iter_mut().enumerate() {
                    f(dense_ids[i], entry);
                }
            }
            Self::FreeList(table) => {
                for (id, entry) in table.iter_mut() {
                    f(id, entry);
                }
            }
        }
    }
}

// ─── Manager ──────────────────────────────────────────────────────────────────

/// Type-erased manager interface the world drives.
pub(crate) trait AnyComponentManager: Send + Sync {
    fn component_type_id(&self) -> TypeId;
    fn type_index(&self) -> u16;
    fn type_name(&self) -> &'static str;
    fn len(&self) -> usize;

    fn update_descs(&self) -> Vec<UpdateFunctionDesc>;
    fn run_update(
        &mut self,
        name: Symbol,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
        pool: &TaskPool,
    );

    fn lifecycle(
        &mut self,
        id: GenIdx,
        event: LifecycleEvent,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    );
    /// Runs `event` on every active component of this manager.
    fn lifecycle_all(
        &mut self,
        event: LifecycleEvent,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    );
    fn dispatch_message(
        &mut self,
        id: GenIdx,
        msg: &Message,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    );
    fn remove(&mut self, id: GenIdx);
    fn owner_of(&self, id: GenIdx) -> Option<GameObjectHandle>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Storage plus registered update functions for one component type.
pub struct ComponentManager<T: Component> {
    type_index: u16,
    type_name: &'static str,
    storage: Storage<T>,
    updates: Vec<RegisteredUpdate<T>>,
}

impl<T: Component> ComponentManager<T> {
    #[must_use]
    pub fn new(type_index: u16, type_name: &'static str, kind: StorageKind) -> Self {
        Self {
            type_index,
            type_name,
            storage: Storage::new(kind),
            updates: Vec::new(),
        }
    }

    /// Registers an update function. Phase schedules are rebuilt by the
    /// world after registration; dependency cycles fail there.
    pub fn register_update(&mut self, desc: UpdateFunctionDesc, callback: UpdateCallback<T>) {
        let name_sym = interner::intern(desc.name);
        self.updates.push(RegisteredUpdate {
            desc,
            name_sym,
            callback,
        });
    }

    pub(crate) fn insert(&mut self, owner: GameObjectHandle, component: T) -> GenIdx {
        self.storage.insert(Entry {
            component,
            owner,
            active: false,
        })
    }

    #[must_use]
    pub fn get(&self, id: GenIdx) -> Option<&T> {
        self.storage.get(id).map(|e| &e.component)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: GenIdx) -> Option<&mut T> {
        self.storage.get_mut(id).map(|e| &mut e.component)
    }

    #[must_use]
    pub fn is_active(&self, id: GenIdx) -> bool {
        self.storage.get(id).is_some_and(|e| e.active)
    }

    pub fn for_each(&mut self, mut f: impl FnMut(GenIdx, GameObjectHandle, &mut T)) {
        self.storage.for_each_mut(|id, entry| {
            if entry.active {
                f(id, entry.owner, &mut entry.component);
            }
        });
    }
}

impl<T: Component> AnyComponentManager for ComponentManager<T> {
    fn component_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_index(&self) -> u16 {
        self.type_index
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    fn update_descs(&self) -> Vec<UpdateFunctionDesc> {
        self.updates.iter().map(|u| u.desc.clone()).collect()
    }

    fn run_update(
        &mut self,
        name: Symbol,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
        pool: &TaskPool,
    ) {
        let Some(update_index) = self.updates.iter().position(|u| u.name_sym == name) else {
            return;
        };
        let type_index = self.type_index;
        match &self.updates[update_index].callback {
            UpdateCallback::Sequential(f) => {
                let f = *f;
                self.storage.for_each_mut(|id, entry| {
                    if !entry.active {
                        return;
                    }
                    let mut ctx = ComponentContext {
                        owner: entry.owner,
                        this: ComponentHandle {
                            world_index: services.world_index,
                            type_index,
                            id,
                        },
                        objects: &mut *objects,
                        services: &mut *services,
                    };
                    f(&mut entry.component, &mut ctx);
                });
            }
            UpdateCallback::Parallel(f) => {
                let f = *f;
                let time = services.time;
                let delta = services.delta;
                let frame = services.frame;
                // Non-overlapping ranges of components go to worker tasks;
                // the world is read-only for the duration.
                match &mut self.storage {
                    Storage::Compact { dense, .. } => {
                        let objects: &ObjectStorage = &*objects;
                        pool.for_each_mut(dense, |_, entry| {
                            if entry.active {
                                let ctx = AsyncContext {
                                    owner: entry.owner,
                                    objects,
                                    time,
                                    delta,
                                    frame,
                                };
                                f(&mut entry.component, &ctx);
                            }
                        });
                    }
                    Storage::FreeList(table) => {
                        // Free-list storage is not densely indexable; run on
                        // the calling thread.
                        for (_, entry) in table.iter_mut() {
                            if entry.active {
                                let ctx = AsyncContext {
                                    owner: entry.owner,
                                    objects,
                                    time,
                                    delta,
                                    frame,
                                };
                                f(&mut entry.component, &ctx);
                            }
                        }
                    }
                }
            }
        }
    }

    fn lifecycle(
        &mut self,
        id: GenIdx,
        event: LifecycleEvent,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    ) {
        let type_index = self.type_index;
        let Some(entry) = self.storage.get_mut(id) else {
            return;
        };
        let mut ctx = ComponentContext {
            owner: entry.owner,
            this: ComponentHandle {
                world_index: services.world_index,
                type_index,
                id,
            },
            objects,
            services,
        };
        match event {
            LifecycleEvent::Initialize => entry.component.initialize(&mut ctx),
            LifecycleEvent::Deinitialize => entry.component.deinitialize(&mut ctx),
            LifecycleEvent::OnActivated => {
                entry.component.on_activated(&mut ctx);
                entry.active = true;
            }
            LifecycleEvent::OnDeactivated => {
                entry.component.on_deactivated(&mut ctx);
                entry.active = false;
            }
            LifecycleEvent::OnSimulationStarted => entry.component.on_simulation_started(&mut ctx),
        }
    }

    fn lifecycle_all(
        &mut self,
        event: LifecycleEvent,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    ) {
        let mut ids = Vec::with_capacity(self.storage.len());
        self.storage.for_each_mut(|id, entry| {
            if entry.active {
                ids.push(id);
            }
        });
        for id in ids {
            self.lifecycle(id, event, objects, services);
        }
    }

    fn dispatch_message(
        &mut self,
        id: GenIdx,
        msg: &Message,
        objects: &mut ObjectStorage,
        services: &mut super::world::WorldServices,
    ) {
        let type_index = self.type_index;
        let Some(entry) = self.storage.get_mut(id) else {
            return;
        };
        let mut ctx = ComponentContext {
            owner: entry.owner,
            this: ComponentHandle {
                world_index: services.world_index,
                type_index,
                id,
            },
            objects,
            services,
        };
        entry.component.handle_message(msg, &mut ctx);
    }

    fn remove(&mut self, id: GenIdx) {
        self.storage.remove(id);
    }

    fn owner_of(&self, id: GenIdx) -> Option<GameObjectHandle> {
        self.storage.get(id).map(|e| e.owner)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: u32,
    }
    impl Component for Counter {}

    #[test]
    fn compact_storage_swap_remove_keeps_handles_valid() {
        let mut manager = ComponentManager::<Counter>::new(0, "Counter", StorageKind::Compact);
        let a = manager.insert(GameObjectHandle::INVALID, Counter { value: 1 });
        let b = manager.insert(GameObjectHandle::INVALID, Counter { value: 2 });
        let c = manager.insert(GameObjectHandle::INVALID, Counter { value: 3 });

        // Removing the first entry swaps the last into its place.
        manager.remove(a);
        assert!(manager.get(a).is_none());
        assert_eq!(manager.get(b).unwrap().value, 2);
        assert_eq!(manager.get(c).unwrap().value, 3);
    }

    #[test]
    fn freelist_storage_reuses_slots_with_new_generation() {
        let mut manager = ComponentManager::<Counter>::new(0, "Counter", StorageKind::FreeList);
        let a = manager.insert(GameObjectHandle::INVALID, Counter { value: 1 });
        manager.remove(a);
        let b = manager.insert(GameObjectHandle::INVALID, Counter { value: 2 });
        assert_eq!(a.index(), b.index());
        assert!(manager.get(a).is_none());
        assert_eq!(manager.get(b).unwrap().value, 2);
    }
}
