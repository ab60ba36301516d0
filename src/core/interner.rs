//! Global String Interner
//!
//! Converts strings into integer [`Symbol`]s for O(1) comparison and hashing.
//! Category names, immutable sampler names, shader permutation variables, and
//! object tags all flow through here so hot paths never compare strings.

use std::borrow::Cow;

use lasso::ThreadedRodeo;
use once_cell::sync::Lazy;

/// Global string interner instance (thread-safe).
static INTERNER: Lazy<ThreadedRodeo> = Lazy::new(ThreadedRodeo::new);

/// Compact integer identifier for an interned string.
pub type Symbol = lasso::Spur;

/// Interns a string and returns its Symbol.
///
/// If the string already exists in the intern pool, returns the existing
/// Symbol; otherwise adds it and returns a new one.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Attempts to get the Symbol for an already-interned string.
///
/// Returns `None` if the string was never interned. Does not allocate.
#[inline]
#[must_use]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a Symbol back to its string.
#[inline]
#[must_use]
pub fn resolve(sym: Symbol) -> Cow<'static, str> {
    Cow::Borrowed(INTERNER.resolve(&sym))
}

/// Stable 32-bit hash of an interned name, used where symbols cross a
/// serialization boundary (pass names, sampler names).
#[inline]
#[must_use]
pub fn hash_name(s: &str) -> u32 {
    xxhash_rust::xxh32::xxh32(s.as_bytes(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_and_resolve() {
        let s1 = intern("hello");
        let s2 = intern("hello");
        let s3 = intern("world");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(resolve(s1), "hello");
        assert_eq!(resolve(s3), "world");
    }

    #[test]
    fn get_does_not_intern() {
        let _ = intern("existing_name");

        assert!(get("existing_name").is_some());
        assert!(get("never_interned_name").is_none());
    }

    #[test]
    fn name_hash_is_stable() {
        assert_eq!(hash_name("Color0"), hash_name("Color0"));
        assert_ne!(hash_name("Color0"), hash_name("Color1"));
    }
}
