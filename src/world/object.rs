//! Game Objects
//!
//! Scene-tree nodes: stable generational handles, local transforms with a
//! cached global transform, parent/child links, a tag set, and a component
//! list. Creation is immediate but objects stay "initializing" until the
//! next frame boundary; destruction is deferred to the boundary as well.
//!
//! Transform propagation is lazy: setting a local transform only marks the
//! subtree dirty. Reads compute the correct global transform on demand; the
//! cached copy is refreshed during the world's transform flush.

use glam::{Affine3A, Quat, Vec3};
use smallvec::SmallVec;

use crate::core::handle::{GenIdx, HandleTable};
use crate::core::tags::TagSet;
use crate::define_handle;

use super::component::ComponentHandle;

define_handle!(
    /// Stable handle to a game object; survives slot reuse via generations.
    pub struct GameObjectHandle
);

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    #[must_use]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectState {
    /// Created this frame; `initialize`/`on_activated` run at the boundary.
    Initializing,
    Active,
    /// Destroy requested; storage is released at the boundary.
    Dead,
}

/// Creation parameters for [`World::create_object`](super::world::World::create_object).
#[derive(Clone, Default)]
pub struct GameObjectDesc {
    pub name: Option<String>,
    pub local_transform: Transform,
    pub parent: GameObjectHandle,
    /// Dynamic objects expect frequent transform changes; visual components
    /// register their spatial data accordingly.
    pub dynamic: bool,
    pub tags: TagSet,
}

pub struct GameObject {
    pub(crate) name: Option<String>,
    pub(crate) local: Transform,
    pub(crate) cached_global: Affine3A,
    pub(crate) global_dirty: bool,
    pub(crate) parent: GameObjectHandle,
    pub(crate) children: SmallVec<[GameObjectHandle; 4]>,
    pub(crate) tags: TagSet,
    pub(crate) dynamic: bool,
    pub(crate) state: ObjectState,
    pub(crate) components: SmallVec<[ComponentHandle; 4]>,
}

impl GameObject {
    pub(crate) fn new(desc: &GameObjectDesc) -> Self {
        Self {
            name: desc.name.clone(),
            local: desc.local_transform,
            cached_global: desc.local_transform.to_affine(),
            global_dirty: true,
            parent: desc.parent,
            children: SmallVec::new(),
            tags: desc.tags,
            dynamic: desc.dynamic,
            state: ObjectState::Initializing,
            components: SmallVec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn local_transform(&self) -> Transform {
        self.local
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> GameObjectHandle {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[GameObjectHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn tags(&self) -> TagSet {
        self.tags
    }

    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn components(&self) -> &[ComponentHandle] {
        &self.components
    }
}

/// Dense object storage with handle indirection.
pub struct ObjectStorage {
    pub(crate) table: HandleTable<GameObject>,
}

impl ObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(),
        }
    }

    pub(crate) fn insert(&mut self, object: GameObject) -> GameObjectHandle {
        GameObjectHandle::from_id(self.table.insert(object))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: GameObjectHandle) -> Option<&GameObject> {
        self.table.get(handle.id())
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, handle: GameObjectHandle) -> Option<&mut GameObject> {
        self.table.get_mut(handle.id())
    }

    #[inline]
    #[must_use]
    pub fn is_alive(&self, handle: GameObjectHandle) -> bool {
        self.table
            .get(handle.id())
            .is_some_and(|o| o.state != ObjectState::Dead)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Correct global transform regardless of cache state: walks up the
    /// parent chain while any ancestor is dirty.
    #[must_use]
    pub fn global_transform(&self, handle: GameObjectHandle) -> Affine3A {
        let Some(object) = self.get(handle) else {
            return Affine3A::IDENTITY;
        };
        if !object.global_dirty && !self.any_ancestor_dirty(object.parent) {
            return object.cached_global;
        }
        let parent_global = if object.parent.is_invalid() {
            Affine3A::IDENTITY
        } else {
            self.global_transform(object.parent)
        };
        parent_global * object.local.to_affine()
    }

    fn any_ancestor_dirty(&self, mut handle: GameObjectHandle) -> bool {
        while let Some(object) = self.get(handle) {
            if object.global_dirty {
                return true;
            }
            handle = object.parent;
        }
        false
    }

    /// Marks `handle` and its subtree dirty.
    pub(crate) fn mark_dirty(&mut self, handle: GameObjectHandle) {
        let Some(object) = self.get_mut(handle) else {
            return;
        };
        if object.global_dirty {
            return;
        }
        object.global_dirty = true;
        let children: SmallVec<[GameObjectHandle; 4]> = object.children.clone();
        for child in children {
            self.mark_dirty(child);
        }
    }

    /// Refreshes cached globals for every dirty subtree. Runs once per frame
    /// after the PostTransform phase.
    pub(crate) fn flush_transforms(&mut self) {
        let roots: Vec<GameObjectHandle> = self
            .table
            .iter()
            .filter(|(_, o)| o.parent.is_invalid())
            .map(|(id, _)| GameObjectHandle::from_id(id))
            .collect();
        for root in roots {
            self.flush_subtree(root, Affine3A::IDENTITY, false);
        }
    }

    fn flush_subtree(&mut self, handle: GameObjectHandle, parent_global: Affine3A, parent_dirty: bool) {
        let Some(object) = self.get_mut(handle) else {
            return;
        };
        let dirty = parent_dirty || object.global_dirty;
        if dirty {
            object.cached_global = parent_global * object.local.to_affine();
            object.global_dirty = false;
        }
        let global = object.cached_global;
        let children: SmallVec<[GameObjectHandle; 4]> = object.children.clone();
        for child in children {
            self.flush_subtree(child, global, dirty);
        }
    }
}

impl Default for ObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_global_transform_reads_correctly_before_flush() {
        let mut storage = ObjectStorage::new();
        let parent = storage.insert(GameObject::new(&GameObjectDesc {
            local_transform: Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)),
            ..Default::default()
        }));
        let mut child_desc = GameObjectDesc {
            local_transform: Transform::from_translation(Vec3::new(0.0, 2.0, 0.0)),
            parent,
            ..Default::default()
        };
        child_desc.parent = parent;
        let child = storage.insert(GameObject::new(&child_desc));
        storage.get_mut(parent).unwrap().children.push(child);

        // No flush yet; read must still be correct.
        let global = storage.global_transform(child);
        assert_eq!(global.translation, glam::Vec3A::new(1.0, 2.0, 0.0));

        storage.flush_transforms();
        let cached = storage.get(child).unwrap().cached_global;
        assert_eq!(cached.translation, glam::Vec3A::new(1.0, 2.0, 0.0));

        // Move the parent: child cache is stale but reads stay correct.
        storage.get_mut(parent).unwrap().local =
            Transform::from_translation(Vec3::new(5.0, 0.0, 0.0));
        storage.mark_dirty(parent);
        let global = storage.global_transform(child);
        assert_eq!(global.translation, glam::Vec3A::new(5.0, 2.0, 0.0));
    }
}
