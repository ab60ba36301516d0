//! Shader Library Seam
//!
//! The shader compiler and resource manager are collaborators, not part of
//! the core; the render context reaches them through this trait. The
//! library resolves a named shader at a permutation into reflected bytecode,
//! consulting the on-disk permutation cache before asking its compiler.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::gal::shader::{
    PermutationSet, ShaderCreationDesc, ShaderPermutationBinary, ShaderPermutationCache,
};

/// Resolves shader names to compiled, reflected permutations.
pub trait ShaderLibrary: Send + Sync {
    /// `None` when the shader does not exist; compile errors are fatal at
    /// load time and surface here as `None` plus an error log.
    fn load_shader(
        &self,
        name: &str,
        permutations: &PermutationSet,
    ) -> Option<ShaderCreationDesc>;
}

/// Cache-backed library wrapping a compile callback. The host installs the
/// actual compiler; the core only owns the permutation-cache plumbing.
pub struct CachedShaderLibrary<F> {
    cache: ShaderPermutationCache,
    platform_id: u32,
    compile: F,
    memory: Mutex<FxHashMap<(String, u64), ShaderCreationDesc>>,
}

impl<F> CachedShaderLibrary<F>
where
    F: Fn(&str, &PermutationSet) -> Option<ShaderPermutationBinary> + Send + Sync,
{
    #[must_use]
    pub fn new(cache: ShaderPermutationCache, platform_id: u32, compile: F) -> Self {
        Self {
            cache,
            platform_id,
            compile,
            memory: Mutex::new(FxHashMap::default()),
        }
    }

    fn shader_hash(name: &str, permutations: &PermutationSet) -> u64 {
        xxhash_rust::xxh3::xxh3_64(name.as_bytes()) ^ permutations.permutation_hash()
    }
}

impl<F> ShaderLibrary for CachedShaderLibrary<F>
where
    F: Fn(&str, &PermutationSet) -> Option<ShaderPermutationBinary> + Send + Sync,
{
    fn load_shader(
        &self,
        name: &str,
        permutations: &PermutationSet,
    ) -> Option<ShaderCreationDesc> {
        let hash = Self::shader_hash(name, permutations);
        if let Some(desc) = self.memory.lock().get(&(name.to_owned(), hash)) {
            return Some(desc.clone());
        }

        let binary = self.cache.load(hash, self.platform_id).or_else(|| {
            let compiled = (self.compile)(name, permutations)?;
            if let Err(e) = self.cache.store(hash, self.platform_id, &compiled) {
                log::warn!("failed to store shader permutation {name}: {e}");
            }
            Some(compiled)
        });

        let Some(binary) = binary else {
            log::error!("shader '{name}' failed to load for permutation {permutations:?}");
            return None;
        };
        let desc = binary.to_desc(self.platform_id)?;
        self.memory
            .lock()
            .insert((name.to_owned(), hash), desc.clone());
        Some(desc)
    }
}

/// Library for tests and headless runs: every shader resolves to a minimal
/// vertex+fragment pair with an empty binding table.
#[derive(Default)]
pub struct StubShaderLibrary;

impl ShaderLibrary for StubShaderLibrary {
    fn load_shader(
        &self,
        _name: &str,
        _permutations: &PermutationSet,
    ) -> Option<ShaderCreationDesc> {
        use crate::gal::shader::ShaderStage;
        let mut desc = ShaderCreationDesc::default();
        // 4-byte aligned placeholder words; the null backend never parses.
        desc.set_bytecode(ShaderStage::Vertex, vec![0x03, 0x02, 0x23, 0x07]);
        desc.set_bytecode(ShaderStage::Fragment, vec![0x03, 0x02, 0x23, 0x07]);
        Some(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gal::shader::{PlatformBytecode, ShaderStage};

    #[test]
    fn cached_library_compiles_once() {
        let dir = std::env::temp_dir().join(format!(
            "arclight_shader_cache_test_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let compile_count = std::sync::atomic::AtomicU32::new(0);
        let library = CachedShaderLibrary::new(
            ShaderPermutationCache::new(&dir),
            1,
            |_name: &str, _perms: &PermutationSet| {
                compile_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Some(ShaderPermutationBinary {
                    platforms: vec![PlatformBytecode {
                        platform_id: 1,
                        stages: vec![(ShaderStage::Vertex, vec![0, 0, 0, 0])],
                    }],
                    bindings: Vec::new(),
                    vertex_inputs: Vec::new(),
                })
            },
        );

        let perms = PermutationSet::new();
        assert!(library.load_shader("forward", &perms).is_some());
        assert!(library.load_shader("forward", &perms).is_some());
        assert_eq!(compile_count.load(std::sync::atomic::Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
