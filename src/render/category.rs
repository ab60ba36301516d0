//! Render Data Categories
//!
//! A category is a named bucket of render data with an associated sort
//! criterion; passes iterate categories and hand batches to the renderer
//! registered for each `(category, data type)` pair. At most 32 categories
//! exist so masks fit a `u32`.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::core::interner::{self, Symbol};

pub const MAX_RENDER_CATEGORIES: usize = 32;

/// How a category's entries are ordered before batching.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SortCriterion {
    /// Front to back by camera distance (early-Z friendly).
    #[default]
    FrontToBack,
    /// Back to front (required for blending).
    BackToFront,
    /// Sorting key is taken verbatim from the render data.
    Explicit,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RenderCategory(u16);

pub const INVALID_RENDER_CATEGORY: RenderCategory = RenderCategory(u16::MAX);

impl RenderCategory {
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u16::MAX
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for RenderCategory {
    fn default() -> Self {
        INVALID_RENDER_CATEGORY
    }
}

struct CategoryEntry {
    name: Symbol,
    criterion: SortCriterion,
}

static REGISTRY: once_cell::sync::Lazy<RwLock<Registry>> = once_cell::sync::Lazy::new(|| {
    RwLock::new(Registry {
        by_name: FxHashMap::default(),
        entries: Vec::new(),
    })
});

struct Registry {
    by_name: FxHashMap<Symbol, RenderCategory>,
    entries: Vec<CategoryEntry>,
}

/// Registers a render category, or returns the existing one.
///
/// # Panics
///
/// Panics past 32 unique categories.
pub fn register_render_category(name: &str, criterion: SortCriterion) -> RenderCategory {
    let sym = interner::intern(name);
    if let Some(category) = REGISTRY.read().by_name.get(&sym) {
        return *category;
    }
    let mut registry = REGISTRY.write();
    if let Some(category) = registry.by_name.get(&sym) {
        return *category;
    }
    let index = registry.entries.len();
    assert!(
        index < MAX_RENDER_CATEGORIES,
        "render category registry exhausted (max 32)"
    );
    let category = RenderCategory(index as u16);
    registry.entries.push(CategoryEntry {
        name: sym,
        criterion,
    });
    registry.by_name.insert(sym, category);
    category
}

#[must_use]
pub fn find_render_category(name: &str) -> RenderCategory {
    interner::get(name)
        .and_then(|sym| REGISTRY.read().by_name.get(&sym).copied())
        .unwrap_or(INVALID_RENDER_CATEGORY)
}

#[must_use]
pub fn render_category_name(category: RenderCategory) -> String {
    REGISTRY
        .read()
        .entries
        .get(category.index())
        .map_or_else(String::new, |e| interner::resolve(e.name).into_owned())
}

#[must_use]
pub fn render_category_criterion(category: RenderCategory) -> SortCriterion {
    REGISTRY
        .read()
        .entries
        .get(category.index())
        .map_or(SortCriterion::FrontToBack, |e| e.criterion)
}

#[must_use]
pub fn render_category_count() -> usize {
    REGISTRY.read().entries.len()
}

/// The category set the standard pass chain consumes.
#[derive(Clone, Copy)]
pub struct DefaultRenderCategories {
    pub lit_opaque: RenderCategory,
    pub lit_masked: RenderCategory,
    pub lit_transparent: RenderCategory,
    pub sky: RenderCategory,
    pub simple_opaque: RenderCategory,
    pub simple_transparent: RenderCategory,
    pub gui: RenderCategory,
}

impl DefaultRenderCategories {
    #[must_use]
    pub fn register() -> Self {
        Self {
            lit_opaque: register_render_category("LitOpaque", SortCriterion::FrontToBack),
            lit_masked: register_render_category("LitMasked", SortCriterion::FrontToBack),
            lit_transparent: register_render_category("LitTransparent", SortCriterion::BackToFront),
            sky: register_render_category("Sky", SortCriterion::Explicit),
            simple_opaque: register_render_category("SimpleOpaque", SortCriterion::FrontToBack),
            simple_transparent: register_render_category(
                "SimpleTransparent",
                SortCriterion::BackToFront,
            ),
            gui: register_render_category("GUI", SortCriterion::Explicit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent_and_named() {
        let a = register_render_category("cat_test_idem", SortCriterion::FrontToBack);
        let b = register_render_category("cat_test_idem", SortCriterion::BackToFront);
        assert_eq!(a, b);
        assert_eq!(render_category_criterion(a), SortCriterion::FrontToBack);
        assert_eq!(render_category_name(a), "cat_test_idem");
    }
}
