//! Render Data & Batches
//!
//! Render data is frame-transient and polymorphic: extractors produce one
//! record per visible object part, tagged with a batch id (equal ids may be
//! GPU-instanced), a sorting key derived from category and camera distance,
//! and the owning game object for picking.
//!
//! After extraction, every category bucket is sorted by `(sorting key,
//! batch id)` and scanned into batches: contiguous runs with identical batch
//! id and concrete type. Batches are the unit renderers consume.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::world::object::GameObjectHandle;

use super::category::{RenderCategory, render_category_count};
use super::view::Camera;

/// One frame-transient render record.
///
/// Implementations are plain data produced on the extraction thread and read
/// on the render thread.
pub trait RenderData: Send + Sync + 'static {
    /// Objects sharing a batch id (and type) may be drawn instanced.
    fn batch_id(&self) -> u32;

    /// Sorting key within `category`, usually derived from camera distance.
    /// Equal keys tie-break on batch id so instanceable objects cluster
    /// deterministically.
    fn category_sorting_key(&self, category: RenderCategory, camera: &Camera) -> u64;

    /// Owning game object, for picking.
    fn owner(&self) -> GameObjectHandle;

    fn as_any(&self) -> &dyn std::any::Any;
}

/// Distance-based sorting key helper: category criterion decides direction,
/// the top bits carry quantized distance, the bottom bits the batch id.
#[must_use]
pub fn distance_sorting_key(distance: f32, back_to_front: bool) -> u64 {
    let quantized = (distance.max(0.0).min(65_535.0) * 1024.0) as u64 & 0x3FF_FFFF;
    if back_to_front {
        0x3FF_FFFF - quantized
    } else {
        quantized
    }
}

#[derive(Clone, Copy)]
struct SortableEntry {
    data_index: u32,
    sorting_key: u64,
    batch_id: u32,
    type_id: TypeId,
}

#[derive(Default)]
struct CategoryBucket {
    entries: Vec<SortableEntry>,
    /// `(start, len)` ranges into `entries` after sort-and-batch.
    batches: Vec<(u32, u32)>,
}

/// A contiguous, sorted run of render data sharing batch id and type.
pub struct RenderDataBatch<'a> {
    store: &'a [Box<dyn RenderData>],
    entries: &'a [SortableEntry],
}

impl<'a> RenderDataBatch<'a> {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn batch_id(&self) -> u32 {
        self.entries.first().map_or(0, |e| e.batch_id)
    }

    #[must_use]
    pub fn first(&self) -> Option<&'a dyn RenderData> {
        self.entries
            .first()
            .map(|e| self.store[e.data_index as usize].as_ref())
    }

    #[must_use]
    pub fn first_sorting_key(&self) -> u64 {
        self.entries.first().map_or(0, |e| e.sorting_key)
    }

    #[must_use]
    pub fn last_sorting_key(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.sorting_key)
    }

    /// The concrete type shared by every entry of the batch.
    #[must_use]
    pub fn data_type(&self) -> Option<TypeId> {
        self.entries.first().map(|e| e.type_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a dyn RenderData> + '_ {
        self.entries
            .iter()
            .map(|e| self.store[e.data_index as usize].as_ref())
    }

    /// Typed iteration; entries of other types are impossible within a batch.
    pub fn iter_as<T: RenderData>(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.entries.iter().filter_map(|e| {
            self.store[e.data_index as usize]
                .as_ref()
                .as_any()
                .downcast_ref::<T>()
        })
    }
}

/// Everything one view extracted for one frame: per-category sortable
/// buckets plus frame-wide data (lights, probes, fog, global settings).
pub struct ExtractedRenderData {
    store: Vec<Box<dyn RenderData>>,
    buckets: Vec<CategoryBucket>,
    frame_data: Vec<Box<dyn RenderData>>,
    frame_data_by_type: FxHashMap<TypeId, u32>,
    batched: bool,
}

impl ExtractedRenderData {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Vec::new(),
            buckets: Vec::new(),
            frame_data: Vec::new(),
            frame_data_by_type: FxHashMap::default(),
            batched: false,
        }
    }

    /// Clears all buckets but keeps their capacity for reuse.
    pub fn clear(&mut self) {
        self.store.clear();
        for bucket in &mut self.buckets {
            bucket.entries.clear();
            bucket.batches.clear();
        }
        self.frame_data.clear();
        self.frame_data_by_type.clear();
        self.batched = false;
    }

    /// Adds one record to `category`, computing its sorting key against
    /// `camera` now so sorting never re-touches the data.
    pub fn add_render_data<T: RenderData>(
        &mut self,
        data: T,
        category: RenderCategory,
        camera: &Camera,
    ) {
        debug_assert!(!self.batched, "render data added after sort_and_batch");
        if !category.is_valid() {
            return;
        }
        let sorting_key = data.category_sorting_key(category, camera);
        let batch_id = data.batch_id();
        let data_index = self.store.len() as u32;
        self.store.push(Box::new(data));

        if self.buckets.len() <= category.index() {
            let needed = render_category_count().max(category.index() + 1);
            self.buckets.resize_with(needed, CategoryBucket::default);
        }
        self.buckets[category.index()].entries.push(SortableEntry {
            data_index,
            sorting_key,
            batch_id,
            type_id: TypeId::of::<T>(),
        });
    }

    /// Adds frame-wide data (lights, fog, global settings).
    pub fn add_frame_data<T: RenderData>(&mut self, data: T) {
        let index = self.frame_data.len() as u32;
        self.frame_data.push(Box::new(data));
        self.frame_data_by_type.insert(TypeId::of::<T>(), index);
    }

    /// First frame-data record of type `T`.
    #[must_use]
    pub fn frame_data<T: RenderData>(&self) -> Option<&T> {
        let index = *self.frame_data_by_type.get(&TypeId::of::<T>())?;
        self.frame_data[index as usize].as_any().downcast_ref::<T>()
    }

    /// Sorts each category by `(sorting key, batch id)` and splits sorted
    /// runs into batches of identical `(batch id, type)`.
    pub fn sort_and_batch(&mut self) {
        for bucket in &mut self.buckets {
            if bucket.entries.is_empty() {
                continue;
            }

            bucket
                .entries
                .sort_by(|a, b| {
                    a.sorting_key
                        .cmp(&b.sorting_key)
                        .then(a.batch_id.cmp(&b.batch_id))
                });

            let mut batch_start = 0u32;
            let mut current_batch = bucket.entries[0].batch_id;
            let mut current_type = bucket.entries[0].type_id;
            for i in 1..bucket.entries.len() as u32 {
                let entry = &bucket.entries[i as usize];
                if entry.batch_id != current_batch || entry.type_id != current_type {
                    bucket.batches.push((batch_start, i - batch_start));
                    batch_start = i;
                    current_batch = entry.batch_id;
                    current_type = entry.type_id;
                }
            }
            bucket
                .batches
                .push((batch_start, bucket.entries.len() as u32 - batch_start));
        }
        self.batched = true;
    }

    /// Batches of `category`, in sorted order. Empty before
    /// [`sort_and_batch`](Self::sort_and_batch).
    pub fn batches(&self, category: RenderCategory) -> impl Iterator<Item = RenderDataBatch<'_>> {
        let bucket = self.buckets.get(category.index());
        bucket
            .map(|b| {
                b.batches.iter().map(|(start, len)| RenderDataBatch {
                    store: &self.store,
                    entries: &b.entries[*start as usize..(*start + *len) as usize],
                })
            })
            .into_iter()
            .flatten()
    }

    #[must_use]
    pub fn batch_count(&self, category: RenderCategory) -> usize {
        self.buckets
            .get(category.index())
            .map_or(0, |b| b.batches.len())
    }

    #[must_use]
    pub fn entry_count(&self, category: RenderCategory) -> usize {
        self.buckets
            .get(category.index())
            .map_or(0, |b| b.entries.len())
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for ExtractedRenderData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::category::{SortCriterion, register_render_category};

    struct TestData {
        batch: u32,
        key: u64,
    }

    impl RenderData for TestData {
        fn batch_id(&self) -> u32 {
            self.batch
        }
        fn category_sorting_key(&self, _category: RenderCategory, _camera: &Camera) -> u64 {
            self.key
        }
        fn owner(&self) -> GameObjectHandle {
            GameObjectHandle::INVALID
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct OtherData {
        batch: u32,
    }

    impl RenderData for OtherData {
        fn batch_id(&self) -> u32 {
            self.batch
        }
        fn category_sorting_key(&self, _category: RenderCategory, _camera: &Camera) -> u64 {
            0
        }
        fn owner(&self) -> GameObjectHandle {
            GameObjectHandle::INVALID
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn batches_split_on_id_and_type() {
        let category = register_render_category("data_test_cat", SortCriterion::Explicit);
        let camera = Camera::default();
        let mut data = ExtractedRenderData::new();

        data.add_render_data(TestData { batch: 1, key: 0 }, category, &camera);
        data.add_render_data(TestData { batch: 1, key: 0 }, category, &camera);
        data.add_render_data(OtherData { batch: 1 }, category, &camera);
        data.add_render_data(TestData { batch: 2, key: 0 }, category, &camera);
        data.sort_and_batch();

        let batches: Vec<_> = data.batches(category).collect();
        assert_eq!(batches.len(), 3);
        // Every batch is homogeneous.
        for batch in &batches {
            let first_type = batch.data_type().unwrap();
            for entry in batch.iter() {
                assert_eq!(entry.as_any().type_id(), first_type);
            }
        }
    }

    #[test]
    fn batches_are_key_ordered() {
        let category = register_render_category("data_test_order", SortCriterion::Explicit);
        let camera = Camera::default();
        let mut data = ExtractedRenderData::new();

        for (batch, key) in [(3u32, 30u64), (1, 10), (2, 20), (1, 10), (3, 30)] {
            data.add_render_data(TestData { batch, key }, category, &camera);
        }
        data.sort_and_batch();

        let batches: Vec<_> = data.batches(category).collect();
        assert_eq!(batches.len(), 3);
        for pair in batches.windows(2) {
            assert!(pair[1].first_sorting_key() >= pair[0].last_sorting_key());
        }
        // Instanceable entries clustered.
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn frame_data_lookup_by_type() {
        let mut data = ExtractedRenderData::new();
        data.add_frame_data(TestData { batch: 0, key: 7 });
        assert_eq!(data.frame_data::<TestData>().unwrap().key, 7);
        assert!(data.frame_data::<OtherData>().is_none());
    }
}
