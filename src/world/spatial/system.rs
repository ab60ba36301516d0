//! Spatial System
//!
//! Indexes objects by category bitmask and tag set over box+sphere bounds
//! and answers sphere/box/frustum queries. Rarely-moving objects live in a
//! uniform grid (updates re-hash one cell, queries visit only intersecting
//! cells); objects in frequent-update categories or flagged as such stay in
//! a linear set that every query scans, so their bounds updates are O(1).
//!
//! Visibility queries record, per object, the last frame it was seen
//! directly or indirectly; [`SpatialSystem::get_visibility_state`] grades
//! objects against those stamps.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::core::bounds::{BoundingBox, BoundingSphere, BoxSphereBounds};
use crate::core::frustum::Frustum;
use crate::core::handle::{GenIdx, HandleTable};
use crate::core::tags::TagSet;
use crate::define_handle;

use super::data::{CategoryFlags, VisibilityState, category_flags};
use crate::world::object::GameObjectHandle;

define_handle!(
    /// Handle to a spatial data record.
    pub struct SpatialDataHandle
);

/// Grid cell edge length in world units.
const CELL_SIZE: f32 = 64.0;
/// Objects seen this many frames ago are still treated as visible by default.
pub const DEFAULT_FRAMES_BEFORE_INVISIBLE: u64 = 5;

/// Frame stamps far enough in the past to mean "never seen".
const NEVER: u64 = 0;

type CellCoord = (i32, i32, i32);

fn cell_of(p: Vec3) -> CellCoord {
    (
        (p.x / CELL_SIZE).floor() as i32,
        (p.y / CELL_SIZE).floor() as i32,
        (p.z / CELL_SIZE).floor() as i32,
    )
}

struct SpatialEntry {
    bounds: BoxSphereBounds,
    owner: GameObjectHandle,
    category_mask: u32,
    tags: TagSet,
    always_visible: bool,
    /// Entries in the frequent set skip the grid.
    frequent: bool,
    cell: CellCoord,
    last_seen_direct: AtomicU64,
    last_seen_indirect: AtomicU64,
}

/// Filter parameters shared by all query kinds.
#[derive(Default)]
pub struct QueryParams<'a> {
    /// Only objects with at least one of these category bits pass.
    pub category_bitmask: u32,
    /// Any-of filter; `None` disables it.
    pub include_tags: Option<TagSet>,
    /// Objects sharing any of these tags are skipped.
    pub exclude_tags: Option<TagSet>,
    /// Filled with visit counts when provided.
    pub stats: Option<&'a mut QueryStats>,
}

/// Query instrumentation.
#[derive(Clone, Copy, Default, Debug)]
pub struct QueryStats {
    pub total_objects: u32,
    pub objects_tested: u32,
    pub objects_passed: u32,
}

/// Continue or stop visiting query results.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VisitorFlow {
    Continue,
    Stop,
}

pub struct SpatialSystem {
    entries: HandleTable<SpatialEntry>,
    grid: FxHashMap<CellCoord, Vec<GenIdx>>,
    frequent: Vec<GenIdx>,
    frame_counter: u64,
}

impl SpatialSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HandleTable::new(),
            grid: FxHashMap::default(),
            frequent: Vec::new(),
            frame_counter: NEVER + 1,
        }
    }

    /// Advances the visibility frame counter. Call once per world frame.
    pub fn start_new_frame(&mut self) {
        self.frame_counter += 1;
    }

    #[inline]
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    // ── Spatial data lifecycle ─────────────────────────────────────────────

    pub fn create_spatial_data(
        &mut self,
        bounds: BoxSphereBounds,
        owner: GameObjectHandle,
        category_bitmask: u32,
        tags: TagSet,
    ) -> SpatialDataHandle {
        // A category flagged for frequent changes puts the whole record into
        // fast-update storage.
        let frequent = (0..super::data::MAX_CATEGORIES as u16).any(|bit| {
            category_bitmask & (1 << bit) != 0
                && category_flags(super::data::Category::from_index(bit))
                    .contains(CategoryFlags::FREQUENT_CHANGES)
        });
        let cell = cell_of(bounds.sphere.center);
        let id = self.entries.insert(SpatialEntry {
            bounds,
            owner,
            category_mask: category_bitmask,
            tags,
            always_visible: false,
            frequent,
            cell,
            last_seen_direct: AtomicU64::new(NEVER),
            last_seen_indirect: AtomicU64::new(NEVER),
        });
        if frequent {
            self.frequent.push(id);
        } else {
            self.grid.entry(cell).or_default().push(id);
        }
        SpatialDataHandle::from_id(id)
    }

    /// Registers spatial data that passes every spatial filter regardless of
    /// bounds (skyboxes, full-screen effects).
    pub fn create_spatial_data_always_visible(
        &mut self,
        owner: GameObjectHandle,
        category_bitmask: u32,
        tags: TagSet,
    ) -> SpatialDataHandle {
        let id = self.entries.insert(SpatialEntry {
            bounds: BoxSphereBounds::default(),
            owner,
            category_mask: category_bitmask,
            tags,
            always_visible: true,
            frequent: true,
            cell: (0, 0, 0),
            last_seen_direct: AtomicU64::new(NEVER),
            last_seen_indirect: AtomicU64::new(NEVER),
        });
        self.frequent.push(id);
        SpatialDataHandle::from_id(id)
    }

    pub fn delete_spatial_data(&mut self, handle: SpatialDataHandle) {
        let Some(entry) = self.entries.remove(handle.id()) else {
            return;
        };
        if entry.frequent {
            self.frequent.retain(|id| *id != handle.id());
        } else if let Some(cell) = self.grid.get_mut(&entry.cell) {
            cell.retain(|id| *id != handle.id());
            if cell.is_empty() {
                self.grid.remove(&entry.cell);
            }
        }
    }

    pub fn update_spatial_data_bounds(&mut self, handle: SpatialDataHandle, bounds: BoxSphereBounds) {
        let Some(entry) = self.entries.get_mut(handle.id()) else {
            return;
        };
        entry.bounds = bounds;
        if entry.frequent {
            return;
        }
        let new_cell = cell_of(bounds.sphere.center);
        if new_cell != entry.cell {
            let old_cell = entry.cell;
            entry.cell = new_cell;
            if let Some(cell) = self.grid.get_mut(&old_cell) {
                cell.retain(|id| *id != handle.id());
                if cell.is_empty() {
                    self.grid.remove(&old_cell);
                }
            }
            self.grid.entry(new_cell).or_default().push(handle.id());
        }
    }

    pub fn update_spatial_data_object(&mut self, handle: SpatialDataHandle, owner: GameObjectHandle) {
        if let Some(entry) = self.entries.get_mut(handle.id()) {
            entry.owner = owner;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Filtering ──────────────────────────────────────────────────────────

    fn passes_filters(entry: &SpatialEntry, params: &QueryParams<'_>) -> bool {
        if entry.category_mask & params.category_bitmask == 0 {
            return false;
        }
        if let Some(include) = params.include_tags
            && !include.is_empty()
            && !entry.tags.intersects(include)
        {
            return false;
        }
        if let Some(exclude) = params.exclude_tags
            && entry.tags.intersects(exclude)
        {
            return false;
        }
        true
    }

    // ── Volume queries ─────────────────────────────────────────────────────

    /// Visits every object whose bounds intersect `sphere` and whose
    /// category/tags pass `params`.
    pub fn find_objects_in_sphere(
        &self,
        sphere: &BoundingSphere,
        params: &mut QueryParams<'_>,
        mut callback: impl FnMut(GameObjectHandle) -> VisitorFlow,
    ) {
        let query_box = BoundingBox::from_center_half_extents(
            sphere.center,
            Vec3::splat(sphere.radius),
        );
        self.visit_candidates(&query_box, params, |entry| {
            if entry.always_visible || sphere.overlaps_sphere(&entry.bounds.sphere) {
                callback(entry.owner)
            } else {
                VisitorFlow::Continue
            }
        });
    }

    /// Visits every object whose bounds intersect `aabb`.
    pub fn find_objects_in_box(
        &self,
        aabb: &BoundingBox,
        params: &mut QueryParams<'_>,
        mut callback: impl FnMut(GameObjectHandle) -> VisitorFlow,
    ) {
        self.visit_candidates(aabb, params, |entry| {
            if entry.always_visible || aabb.overlaps(&entry.bounds.aabb) {
                callback(entry.owner)
            } else {
                VisitorFlow::Continue
            }
        });
    }

    fn visit_candidates(
        &self,
        query_box: &BoundingBox,
        params: &mut QueryParams<'_>,
        mut visit: impl FnMut(&SpatialEntry) -> VisitorFlow,
    ) {
        let mut tested = 0u32;
        let mut passed = 0u32;

        let min = cell_of(query_box.min);
        let max = cell_of(query_box.max);

        let mut stopped = false;
        'grid: for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    let Some(cell) = self.grid.get(&(x, y, z)) else {
                        continue;
                    };
                    for id in cell {
                        let Some(entry) = self.entries.get(*id) else {
                            continue;
                        };
                        tested += 1;
                        if !Self::passes_filters(entry, params) {
                            continue;
                        }
                        passed += 1;
                        if visit(entry) == VisitorFlow::Stop {
                            stopped = true;
                            break 'grid;
                        }
                    }
                }
            }
        }

        if !stopped {
            for id in &self.frequent {
                let Some(entry) = self.entries.get(*id) else {
                    continue;
                };
                tested += 1;
                if !Self::passes_filters(entry, params) {
                    continue;
                }
                passed += 1;
                if visit(entry) == VisitorFlow::Stop {
                    break;
                }
            }
        }

        if let Some(stats) = params.stats.as_deref_mut() {
            stats.total_objects = self.entries.len() as u32;
            stats.objects_tested += tested;
            stats.objects_passed += passed;
        }
    }

    // ── Visibility queries ─────────────────────────────────────────────────

    /// Frustum-culls matching objects, consults `is_occluded` on each
    /// candidate's AABB, appends survivors to `out`, and records visibility
    /// stamps for later [`get_visibility_state`](Self::get_visibility_state)
    /// queries.
    pub fn find_visible_objects(
        &self,
        frustum: &Frustum,
        params: &mut QueryParams<'_>,
        out: &mut Vec<GameObjectHandle>,
        mut is_occluded: impl FnMut(&BoundingBox) -> bool,
        visibility: VisibilityState,
    ) {
        let mut tested = 0u32;
        let mut passed = 0u32;

        let record = |entry: &SpatialEntry| match visibility {
            VisibilityState::Direct => {
                entry
                    .last_seen_direct
                    .fetch_max(self.frame_counter, Ordering::Relaxed);
            }
            VisibilityState::Indirect => {
                entry
                    .last_seen_indirect
                    .fetch_max(self.frame_counter, Ordering::Relaxed);
            }
            VisibilityState::Invisible => {}
        };

        for (_, entry) in self.entries.iter() {
            tested += 1;
            if !Self::passes_filters(entry, params) {
                continue;
            }
            if !entry.always_visible {
                if !frustum.intersects_sphere(&entry.bounds.sphere) {
                    continue;
                }
                if !frustum.intersects_box(&entry.bounds.aabb) {
                    continue;
                }
                if is_occluded(&entry.bounds.aabb) {
                    continue;
                }
            }
            passed += 1;
            record(entry);
            out.push(entry.owner);
        }

        if let Some(stats) = params.stats.as_deref_mut() {
            stats.total_objects = self.entries.len() as u32;
            stats.objects_tested += tested;
            stats.objects_passed += passed;
        }
    }

    /// Like [`find_visible_objects`](Self::find_visible_objects) but hands
    /// the callback each survivor's bounds and records no visibility. Used
    /// to collect occluder geometry for the software rasterizer.
    pub fn visit_visible_bounds(
        &self,
        frustum: &Frustum,
        params: &mut QueryParams<'_>,
        mut callback: impl FnMut(GameObjectHandle, &BoundingBox) -> VisitorFlow,
    ) {
        for (_, entry) in self.entries.iter() {
            if !Self::passes_filters(entry, params) {
                continue;
            }
            if !entry.always_visible {
                if !frustum.intersects_sphere(&entry.bounds.sphere) {
                    continue;
                }
                if !frustum.intersects_box(&entry.bounds.aabb) {
                    continue;
                }
            }
            if callback(entry.owner, &entry.bounds.aabb) == VisitorFlow::Stop {
                break;
            }
        }
    }

    /// Grades how recently the object was seen. An object seen within
    /// `frames_before_invisible` frames keeps its last grade.
    #[must_use]
    pub fn get_visibility_state(
        &self,
        handle: SpatialDataHandle,
        frames_before_invisible: u64,
    ) -> VisibilityState {
        let Some(entry) = self.entries.get(handle.id()) else {
            return VisibilityState::Invisible;
        };
        let direct = entry.last_seen_direct.load(Ordering::Relaxed);
        let indirect = entry.last_seen_indirect.load(Ordering::Relaxed);
        let visible_since = |stamp: u64| {
            stamp != NEVER && self.frame_counter.saturating_sub(stamp) <= frames_before_invisible
        };
        if visible_since(direct) {
            VisibilityState::Direct
        } else if visible_since(indirect) {
            VisibilityState::Indirect
        } else {
            VisibilityState::Invisible
        }
    }

    /// Bounds of a registered record, for picking and debug draw.
    #[must_use]
    pub fn spatial_data_bounds(&self, handle: SpatialDataHandle) -> Option<BoxSphereBounds> {
        self.entries.get(handle.id()).map(|e| e.bounds)
    }
}

impl Default for SpatialSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::spatial::data::{CategoryFlags, register_category};

    fn bounds_at(center: Vec3, half: f32) -> BoxSphereBounds {
        BoxSphereBounds::from_box(BoundingBox::from_center_half_extents(
            center,
            Vec3::splat(half),
        ))
    }

    #[test]
    fn sphere_query_respects_category_mask() {
        let cat_a = register_category("sys_test_a", CategoryFlags::empty());
        let cat_b = register_category("sys_test_b", CategoryFlags::empty());

        let mut system = SpatialSystem::new();
        let owner_a = GameObjectHandle::INVALID;
        system.create_spatial_data(bounds_at(Vec3::ZERO, 1.0), owner_a, cat_a.bitmask(), TagSet::EMPTY);
        system.create_spatial_data(bounds_at(Vec3::ZERO, 1.0), owner_a, cat_b.bitmask(), TagSet::EMPTY);

        let mut count = 0;
        let mut params = QueryParams {
            category_bitmask: cat_a.bitmask(),
            ..Default::default()
        };
        system.find_objects_in_sphere(
            &BoundingSphere::new(Vec3::ZERO, 2.0),
            &mut params,
            |_| {
                count += 1;
                VisitorFlow::Continue
            },
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn box_query_uses_grid_cells_across_boundaries() {
        let cat = register_category("sys_test_grid", CategoryFlags::empty());
        let mut system = SpatialSystem::new();
        // Two objects in different grid cells.
        system.create_spatial_data(
            bounds_at(Vec3::new(10.0, 0.0, 0.0), 1.0),
            GameObjectHandle::INVALID,
            cat.bitmask(),
            TagSet::EMPTY,
        );
        system.create_spatial_data(
            bounds_at(Vec3::new(200.0, 0.0, 0.0), 1.0),
            GameObjectHandle::INVALID,
            cat.bitmask(),
            TagSet::EMPTY,
        );

        let mut hits = 0;
        let mut params = QueryParams {
            category_bitmask: cat.bitmask(),
            ..Default::default()
        };
        system.find_objects_in_box(
            &BoundingBox {
                min: Vec3::new(0.0, -5.0, -5.0),
                max: Vec3::new(50.0, 5.0, 5.0),
            },
            &mut params,
            |_| {
                hits += 1;
                VisitorFlow::Continue
            },
        );
        assert_eq!(hits, 1);
    }

    #[test]
    fn visibility_stamps_grade_and_decay() {
        let cat = register_category("sys_test_vis", CategoryFlags::empty());
        let mut system = SpatialSystem::new();
        let handle = system.create_spatial_data(
            bounds_at(Vec3::new(0.0, 0.0, -5.0), 1.0),
            GameObjectHandle::INVALID,
            cat.bitmask(),
            TagSet::EMPTY,
        );

        let frustum = Frustum::from_matrix(glam::Mat4::perspective_infinite_reverse_rh(
            1.0, 1.0, 0.1,
        ));

        let mut out = Vec::new();
        let mut params = QueryParams {
            category_bitmask: cat.bitmask(),
            ..Default::default()
        };
        system.find_visible_objects(&frustum, &mut params, &mut out, |_| false, VisibilityState::Direct);
        assert_eq!(out.len(), 1);
        assert_eq!(system.get_visibility_state(handle, 2), VisibilityState::Direct);

        // Within the grace window the object stays visible.
        system.start_new_frame();
        system.start_new_frame();
        assert_eq!(system.get_visibility_state(handle, 2), VisibilityState::Direct);

        // Past it, invisible.
        system.start_new_frame();
        assert_eq!(system.get_visibility_state(handle, 2), VisibilityState::Invisible);
    }

    #[test]
    fn occlusion_callback_rejects() {
        let cat = register_category("sys_test_occ", CategoryFlags::empty());
        let mut system = SpatialSystem::new();
        system.create_spatial_data(
            bounds_at(Vec3::new(0.0, 0.0, -5.0), 1.0),
            GameObjectHandle::INVALID,
            cat.bitmask(),
            TagSet::EMPTY,
        );

        let frustum = Frustum::from_matrix(glam::Mat4::perspective_infinite_reverse_rh(
            1.0, 1.0, 0.1,
        ));
        let mut out = Vec::new();
        let mut params = QueryParams {
            category_bitmask: cat.bitmask(),
            ..Default::default()
        };
        system.find_visible_objects(&frustum, &mut params, &mut out, |_| true, VisibilityState::Direct);
        assert!(out.is_empty());
    }
}
