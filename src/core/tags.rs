//! Object Tags
//!
//! Tags are named bits: registration maps a string to a stable bit index in a
//! process-wide registry, and a [`TagSet`] is a 64-bit mask over those bits.
//! Spatial queries filter on include/exclude tag sets without ever touching
//! strings.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::interner::{self, Symbol};

const MAX_TAGS: usize = 64;

/// A registered tag. The wrapped value is the bit index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Tag(u8);

impl Tag {
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u64 {
        1 << self.0
    }
}

struct TagRegistry {
    by_name: FxHashMap<Symbol, Tag>,
    names: Vec<Symbol>,
}

static REGISTRY: once_cell::sync::Lazy<RwLock<TagRegistry>> =
    once_cell::sync::Lazy::new(|| {
        RwLock::new(TagRegistry {
            by_name: FxHashMap::default(),
            names: Vec::new(),
        })
    });

/// Registers a tag under `name`, or returns the existing one.
///
/// # Panics
///
/// Panics when more than 64 unique tags are registered.
pub fn register_tag(name: &str) -> Tag {
    let sym = interner::intern(name);
    if let Some(tag) = REGISTRY.read().by_name.get(&sym) {
        return *tag;
    }
    let mut reg = REGISTRY.write();
    if let Some(tag) = reg.by_name.get(&sym) {
        return *tag;
    }
    let index = reg.names.len();
    assert!(index < MAX_TAGS, "tag registry exhausted (max 64 tags)");
    let tag = Tag(index as u8);
    reg.names.push(sym);
    reg.by_name.insert(sym, tag);
    tag
}

/// Finds an existing tag by name.
#[must_use]
pub fn find_tag(name: &str) -> Option<Tag> {
    let sym = interner::get(name)?;
    REGISTRY.read().by_name.get(&sym).copied()
}

/// Returns the name a tag was registered under.
#[must_use]
pub fn tag_name(tag: Tag) -> String {
    let reg = REGISTRY.read();
    interner::resolve(reg.names[tag.0 as usize]).into_owned()
}

/// Bitset over registered [`Tag`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct TagSet(u64);

impl TagSet {
    pub const EMPTY: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, tag: Tag) {
        self.0 |= tag.bit();
    }

    #[inline]
    pub fn remove(&mut self, tag: Tag) {
        self.0 &= !tag.bit();
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }

    /// True if this set shares at least one tag with `other`.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: TagSet) -> bool {
        self.0 & other.0 != 0
    }

    /// True if this set has no tag in common with `other`.
    #[inline]
    #[must_use]
    pub const fn is_disjoint(self, other: TagSet) -> bool {
        self.0 & other.0 == 0
    }

    #[must_use]
    pub fn with(mut self, tag: Tag) -> Self {
        self.insert(tag);
        self
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let a = register_tag("tags_test_alpha");
        let b = register_tag("tags_test_alpha");
        assert_eq!(a, b);
        assert_eq!(find_tag("tags_test_alpha"), Some(a));
    }

    #[test]
    fn set_operations() {
        let a = register_tag("tags_test_a");
        let b = register_tag("tags_test_b");

        let mut set = TagSet::EMPTY;
        set.insert(a);
        assert!(set.contains(a));
        assert!(!set.contains(b));

        let other = TagSet::EMPTY.with(b);
        assert!(set.is_disjoint(other));
        assert!(!set.intersects(other));

        set.insert(b);
        assert!(set.intersects(other));
    }
}
