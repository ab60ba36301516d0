//! Immutable Samplers
//!
//! Samplers referenced by hashed name and baked into descriptor-set layouts
//! at pipeline creation. Registration is global and must happen before the
//! device initializes; the device bakes the registry once and resolves names
//! to sampler-state handles afterwards.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::core::interner::{self, Symbol};

use super::descriptors::{AddressMode, CompareFunc, FilterMode, SamplerStateDesc};

static REGISTRY: once_cell::sync::Lazy<RwLock<FxHashMap<Symbol, SamplerStateDesc>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Registers `desc` under `name`. Re-registering the same name replaces the
/// descriptor; devices created afterwards pick up the new one.
pub fn register_immutable_sampler(name: &str, desc: SamplerStateDesc) {
    let sym = interner::intern(name);
    REGISTRY.write().insert(sym, desc);
}

/// Snapshot of the registry, sorted by symbol for deterministic bake order.
#[must_use]
pub fn registered_immutable_samplers() -> Vec<(Symbol, SamplerStateDesc)> {
    let mut entries: Vec<_> = REGISTRY
        .read()
        .iter()
        .map(|(sym, desc)| (*sym, *desc))
        .collect();
    entries.sort_by_key(|(sym, _)| *sym);
    entries
}

/// Registers the sampler set every shader in the engine can rely on.
pub fn register_default_samplers() {
    register_immutable_sampler("LinearSampler", SamplerStateDesc::default());
    register_immutable_sampler(
        "LinearClampSampler",
        SamplerStateDesc {
            address_u: AddressMode::ClampToEdge,
            address_v: AddressMode::ClampToEdge,
            address_w: AddressMode::ClampToEdge,
            ..Default::default()
        },
    );
    register_immutable_sampler(
        "PointSampler",
        SamplerStateDesc {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            mip_filter: FilterMode::Nearest,
            ..Default::default()
        },
    );
    register_immutable_sampler(
        "PointClampSampler",
        SamplerStateDesc {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            mip_filter: FilterMode::Nearest,
            address_u: AddressMode::ClampToEdge,
            address_v: AddressMode::ClampToEdge,
            address_w: AddressMode::ClampToEdge,
            ..Default::default()
        },
    );
    register_immutable_sampler(
        "ShadowSampler",
        SamplerStateDesc {
            address_u: AddressMode::ClampToEdge,
            address_v: AddressMode::ClampToEdge,
            address_w: AddressMode::ClampToEdge,
            compare: Some(CompareFunc::GreaterEqual),
            ..Default::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_resolves_by_name() {
        register_default_samplers();
        let entries = registered_immutable_samplers();
        let linear = interner::intern("LinearSampler");
        assert!(entries.iter().any(|(sym, _)| *sym == linear));
    }
}
