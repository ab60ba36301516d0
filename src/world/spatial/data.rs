//! Spatial Data Categories
//!
//! Categories are registered names mapped to bits of a 32-bit mask; spatial
//! queries filter on that mask. Categories flagged `FrequentChanges` hint
//! the index to keep those objects in fast-update storage.

use bitflags::bitflags;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::core::interner::{self, Symbol};

pub const MAX_CATEGORIES: usize = 32;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct CategoryFlags: u8 {
        /// Objects in this category change their bounds frequently.
        const FREQUENT_CHANGES = 1 << 0;
    }
}

/// A registered spatial data category. The wrapped value is the bit index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Category(u16);

pub const INVALID_CATEGORY: Category = Category(u16::MAX);

impl Category {
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u16::MAX
    }

    #[inline]
    #[must_use]
    pub const fn bitmask(self) -> u32 {
        if self.is_valid() { 1 << self.0 } else { 0 }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }

    #[inline]
    #[must_use]
    pub(crate) const fn from_index(index: u16) -> Self {
        Self(index)
    }
}

impl Default for Category {
    fn default() -> Self {
        INVALID_CATEGORY
    }
}

struct CategoryData {
    name: Symbol,
    flags: CategoryFlags,
}

static REGISTRY: once_cell::sync::Lazy<RwLock<CategoryRegistry>> =
    once_cell::sync::Lazy::new(|| {
        RwLock::new(CategoryRegistry {
            by_name: FxHashMap::default(),
            entries: Vec::new(),
        })
    });

struct CategoryRegistry {
    by_name: FxHashMap<Symbol, Category>,
    entries: Vec<CategoryData>,
}

/// Registers a category under `name`, or returns the existing one.
///
/// # Panics
///
/// Panics when more than 32 unique categories are registered.
pub fn register_category(name: &str, flags: CategoryFlags) -> Category {
    let sym = interner::intern(name);
    if let Some(category) = REGISTRY.read().by_name.get(&sym) {
        return *category;
    }
    let mut registry = REGISTRY.write();
    if let Some(category) = registry.by_name.get(&sym) {
        return *category;
    }
    let index = registry.entries.len();
    assert!(index < MAX_CATEGORIES, "spatial category registry exhausted (max 32)");
    let category = Category(index as u16);
    registry.entries.push(CategoryData { name: sym, flags });
    registry.by_name.insert(sym, category);
    category
}

/// Finds an existing category by name.
#[must_use]
pub fn find_category(name: &str) -> Category {
    interner::get(name)
        .and_then(|sym| REGISTRY.read().by_name.get(&sym).copied())
        .unwrap_or(INVALID_CATEGORY)
}

#[must_use]
pub fn category_name(category: Category) -> String {
    let registry = REGISTRY.read();
    registry
        .entries
        .get(category.0 as usize)
        .map_or_else(String::new, |e| interner::resolve(e.name).into_owned())
}

#[must_use]
pub fn category_flags(category: Category) -> CategoryFlags {
    REGISTRY
        .read()
        .entries
        .get(category.0 as usize)
        .map_or(CategoryFlags::empty(), |e| e.flags)
}

/// The categories every world registers up front.
pub struct DefaultSpatialCategories {
    pub render_static: Category,
    pub render_dynamic: Category,
    pub occlusion_static: Category,
    pub occlusion_dynamic: Category,
}

impl DefaultSpatialCategories {
    #[must_use]
    pub fn register() -> Self {
        Self {
            render_static: register_category("RenderStatic", CategoryFlags::empty()),
            render_dynamic: register_category("RenderDynamic", CategoryFlags::FREQUENT_CHANGES),
            occlusion_static: register_category("OcclusionStatic", CategoryFlags::empty()),
            occlusion_dynamic: register_category(
                "OcclusionDynamic",
                CategoryFlags::FREQUENT_CHANGES,
            ),
        }
    }
}

/// What kind of observer last saw an object.
///
/// Indirect observation (shadow or reflection views) lets expensive updates
/// such as animation run at reduced frequency.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
#[repr(u8)]
pub enum VisibilityState {
    #[default]
    Invisible = 0,
    /// Seen by a view that only indirectly shows the object.
    Indirect = 1,
    /// Seen directly by a main view.
    Direct = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_registration_is_idempotent() {
        let a = register_category("spatial_test_cat", CategoryFlags::empty());
        let b = register_category("spatial_test_cat", CategoryFlags::FREQUENT_CHANGES);
        assert_eq!(a, b);
        // First registration wins for flags.
        assert_eq!(category_flags(a), CategoryFlags::empty());
        assert_eq!(find_category("spatial_test_cat"), a);
        assert_eq!(category_name(a), "spatial_test_cat");
    }

    #[test]
    fn bitmask_is_one_bit() {
        let c = register_category("spatial_test_bit", CategoryFlags::empty());
        assert_eq!(c.bitmask().count_ones(), 1);
        assert_eq!(INVALID_CATEGORY.bitmask(), 0);
    }
}
