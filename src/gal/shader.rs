//! Shaders & Permutation Binaries
//!
//! A shader is a compiled artifact per permutation of named state variables
//! and platform. It carries per-stage bytecode, the reflected resource
//! binding table, and vertex input declarations. Permutation binaries are
//! persisted in the `NSSB` container format below and cached on disk as
//! `{shaderHash}.{platformId}.nssb`.
//!
//! # Container layout (little-endian)
//!
//! ```text
//! magic "NSSB", version u8
//! u32 platform count, per platform: { u32 platformId, u32 blobOffset, u32 blobSize }
//! u32 binding count,  per binding:  { u16 nameOffset, u8 set, u8 binding,
//!                                     u8 resourceType, u8 textureType,
//!                                     u8 stageMask, u8 isArray, u16 arraySize }
//! u32 input count,    per input:    { u16 nameOffset, u8 semantic, u8 format, u8 location }
//! u32 heap size, string heap (length-prefixed UTF-8, offsets point at the prefix)
//! u32 blob size, bytecode blobs (per platform: u32 stage count,
//!                                per stage { u8 stage, u32 size, bytes })
//! ```
//!
//! Readers accept any older `version` and ignore unknown trailing tables;
//! `textureType`'s top bit flags depth usage.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::core::stream;

pub const SHADER_BINARY_MAGIC: [u8; 4] = *b"NSSB";
pub const SHADER_BINARY_VERSION: u8 = 2;

const TEXTURE_TYPE_DEPTH_BIT: u8 = 0x80;

// ─── Reflection types ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex = 0,
    Geometry = 1,
    Fragment = 2,
    Compute = 3,
}

impl ShaderStage {
    pub const COUNT: usize = 4;

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Vertex),
            1 => Some(Self::Geometry),
            2 => Some(Self::Fragment),
            3 => Some(Self::Compute),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ShaderStageMask: u8 {
        const VERTEX   = 1 << 0;
        const GEOMETRY = 1 << 1;
        const FRAGMENT = 1 << 2;
        const COMPUTE  = 1 << 3;
    }
}

impl From<ShaderStage> for ShaderStageMask {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Geometry => Self::GEOMETRY,
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Compute => Self::COMPUTE,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum ShaderResourceType {
    #[default]
    Unknown = 0,
    ConstantBuffer,
    Texture,
    TextureRW,
    Sampler,
    StructuredBuffer,
    StructuredBufferRW,
    ByteAddressBuffer,
    ByteAddressBufferRW,
}

impl ShaderResourceType {
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            1 => Some(Self::ConstantBuffer),
            2 => Some(Self::Texture),
            3 => Some(Self::TextureRW),
            4 => Some(Self::Sampler),
            5 => Some(Self::StructuredBuffer),
            6 => Some(Self::StructuredBufferRW),
            7 => Some(Self::ByteAddressBuffer),
            8 => Some(Self::ByteAddressBufferRW),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::TextureRW | Self::StructuredBufferRW | Self::ByteAddressBufferRW
        )
    }

    #[inline]
    #[must_use]
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::ConstantBuffer
                | Self::StructuredBuffer
                | Self::StructuredBufferRW
                | Self::ByteAddressBuffer
                | Self::ByteAddressBufferRW
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum ShaderTextureType {
    #[default]
    Unknown = 0,
    Texture2D,
    Texture2DArray,
    TextureCube,
    Texture3D,
}

impl ShaderTextureType {
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            1 => Some(Self::Texture2D),
            2 => Some(Self::Texture2DArray),
            3 => Some(Self::TextureCube),
            4 => Some(Self::Texture3D),
            _ => None,
        }
    }
}

/// One reflected shader resource slot.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ShaderResourceBinding {
    pub name: String,
    pub set: u8,
    pub binding: u8,
    pub resource_type: ShaderResourceType,
    pub texture_type: ShaderTextureType,
    /// The shader samples this slot with a depth-comparison sampler.
    pub is_depth: bool,
    pub stages: ShaderStageMask,
    pub is_array: bool,
    pub array_size: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum VertexSemantic {
    #[default]
    Position = 0,
    Normal,
    Tangent,
    Color0,
    TexCoord0,
    TexCoord1,
    BoneIndices,
    BoneWeights,
}

impl VertexSemantic {
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Position),
            1 => Some(Self::Normal),
            2 => Some(Self::Tangent),
            3 => Some(Self::Color0),
            4 => Some(Self::TexCoord0),
            5 => Some(Self::TexCoord1),
            6 => Some(Self::BoneIndices),
            7 => Some(Self::BoneWeights),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum VertexInputFormat {
    #[default]
    Float3 = 0,
    Float,
    Float2,
    Float4,
    UByte4,
    UByte4Norm,
    Half2,
    Half4,
    UInt,
}

impl VertexInputFormat {
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Float3),
            1 => Some(Self::Float),
            2 => Some(Self::Float2),
            3 => Some(Self::Float4),
            4 => Some(Self::UByte4),
            5 => Some(Self::UByte4Norm),
            6 => Some(Self::Half2),
            7 => Some(Self::Half4),
            8 => Some(Self::UInt),
            _ => None,
        }
    }

    #[must_use]
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Float | Self::UByte4 | Self::UByte4Norm | Self::Half2 | Self::UInt => 4,
            Self::Float2 | Self::Half4 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// One reflected vertex input attribute.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ShaderVertexInput {
    pub name: String,
    pub semantic: VertexSemantic,
    pub format: VertexInputFormat,
    pub location: u8,
}

/// Creation payload for [`Device::create_shader`](super::device::Device::create_shader):
/// per-stage bytecode plus the reflected tables.
#[derive(Clone, Default, Debug)]
pub struct ShaderCreationDesc {
    pub stage_bytecode: [Option<Vec<u8>>; ShaderStage::COUNT],
    pub bindings: Vec<ShaderResourceBinding>,
    pub vertex_inputs: Vec<ShaderVertexInput>,
}

impl ShaderCreationDesc {
    #[must_use]
    pub fn bytecode(&self, stage: ShaderStage) -> Option<&[u8]> {
        self.stage_bytecode[stage as usize].as_deref()
    }

    pub fn set_bytecode(&mut self, stage: ShaderStage, bytes: Vec<u8>) {
        self.stage_bytecode[stage as usize] = Some(bytes);
    }

    #[must_use]
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stage_bytecode[stage as usize].is_some()
    }

    /// Graphics shaders need a vertex stage, compute shaders a compute
    /// stage, and the two kinds never mix.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.has_stage(ShaderStage::Vertex) ^ self.has_stage(ShaderStage::Compute)
    }

    #[must_use]
    pub fn find_binding(&self, name: &str) -> Option<&ShaderResourceBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

// ─── Permutations ─────────────────────────────────────────────────────────────

/// A set of named state variables selecting one shader variant.
///
/// Stored sorted so the permutation hash is order-independent.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PermutationSet {
    vars: BTreeMap<String, String>,
}

impl PermutationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_owned(), value.to_owned());
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Stable hash over the sorted `(name, value)` pairs.
    #[must_use]
    pub fn permutation_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(self.vars.len() * 16);
        for (k, v) in &self.vars {
            bytes.extend_from_slice(k.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
        }
        xxhash_rust::xxh3::xxh3_64(&bytes)
    }
}

// ─── Permutation binary ───────────────────────────────────────────────────────

/// Per-platform bytecode blob inside a permutation binary.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlatformBytecode {
    pub platform_id: u32,
    /// `(stage, bytecode)` pairs; a graphics permutation carries VS(+GS)+FS,
    /// a compute permutation a single CS entry.
    pub stages: Vec<(ShaderStage, Vec<u8>)>,
}

/// The serialized form of one shader permutation.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ShaderPermutationBinary {
    pub platforms: Vec<PlatformBytecode>,
    pub bindings: Vec<ShaderResourceBinding>,
    pub vertex_inputs: Vec<ShaderVertexInput>,
}

struct StringHeap {
    bytes: Vec<u8>,
    offsets: FxHashMap<String, u16>,
}

impl StringHeap {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            offsets: FxHashMap::default(),
        }
    }

    fn intern(&mut self, s: &str) -> io::Result<u16> {
        if let Some(&off) = self.offsets.get(s) {
            return Ok(off);
        }
        let off = u16::try_from(self.bytes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string heap overflow"))?;
        stream::write_str(&mut self.bytes, s)?;
        self.offsets.insert(s.to_owned(), off);
        Ok(off)
    }

    fn resolve(heap: &[u8], offset: u16) -> io::Result<String> {
        let mut cursor = Cursor::new(
            heap.get(offset as usize..)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad name offset"))?,
        );
        stream::read_str(&mut cursor)
    }
}

impl ShaderPermutationBinary {
    #[must_use]
    pub fn from_desc(platform_id: u32, desc: &ShaderCreationDesc) -> Self {
        let stages = desc
            .stage_bytecode
            .iter()
            .enumerate()
            .filter_map(|(i, code)| {
                code.as_ref()
                    .map(|c| (ShaderStage::from_u8(i as u8).unwrap(), c.clone()))
            })
            .collect();
        Self {
            platforms: vec![PlatformBytecode {
                platform_id,
                stages,
            }],
            bindings: desc.bindings.clone(),
            vertex_inputs: desc.vertex_inputs.clone(),
        }
    }

    /// Rebuilds a creation descriptor for `platform_id`.
    #[must_use]
    pub fn to_desc(&self, platform_id: u32) -> Option<ShaderCreationDesc> {
        let platform = self
            .platforms
            .iter()
            .find(|p| p.platform_id == platform_id)?;
        let mut desc = ShaderCreationDesc {
            bindings: self.bindings.clone(),
            vertex_inputs: self.vertex_inputs.clone(),
            ..Default::default()
        };
        for (stage, code) in &platform.stages {
            desc.set_bytecode(*stage, code.clone());
        }
        Some(desc)
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        // Pre-build heap and blob section so platform offsets are known.
        let mut heap = StringHeap::new();

        let mut binding_records = Vec::with_capacity(self.bindings.len());
        for b in &self.bindings {
            let name_off = heap.intern(&b.name)?;
            let mut texture_type = b.texture_type as u8;
            if b.is_depth {
                texture_type |= TEXTURE_TYPE_DEPTH_BIT;
            }
            binding_records.push((name_off, b, texture_type));
        }

        let mut input_records = Vec::with_capacity(self.vertex_inputs.len());
        for v in &self.vertex_inputs {
            let name_off = heap.intern(&v.name)?;
            input_records.push((name_off, v));
        }

        let mut blob = Vec::new();
        let mut platform_records = Vec::with_capacity(self.platforms.len());
        for p in &self.platforms {
            let offset = blob.len() as u32;
            stream::write_u32(&mut blob, p.stages.len() as u32)?;
            for (stage, code) in &p.stages {
                stream::write_u8(&mut blob, *stage as u8)?;
                stream::write_u32(&mut blob, code.len() as u32)?;
                stream::write_bytes(&mut blob, code)?;
            }
            let size = blob.len() as u32 - offset;
            platform_records.push((p.platform_id, offset, size));
        }

        stream::write_bytes(w, &SHADER_BINARY_MAGIC)?;
        stream::write_u8(w, SHADER_BINARY_VERSION)?;

        stream::write_u32(w, platform_records.len() as u32)?;
        for (id, offset, size) in platform_records {
            stream::write_u32(w, id)?;
            stream::write_u32(w, offset)?;
            stream::write_u32(w, size)?;
        }

        stream::write_u32(w, binding_records.len() as u32)?;
        for (name_off, b, texture_type) in binding_records {
            stream::write_u16(w, name_off)?;
            stream::write_u8(w, b.set)?;
            stream::write_u8(w, b.binding)?;
            stream::write_u8(w, b.resource_type as u8)?;
            stream::write_u8(w, texture_type)?;
            stream::write_u8(w, b.stages.bits())?;
            stream::write_u8(w, u8::from(b.is_array))?;
            stream::write_u16(w, b.array_size)?;
        }

        stream::write_u32(w, input_records.len() as u32)?;
        for (name_off, v) in input_records {
            stream::write_u16(w, name_off)?;
            stream::write_u8(w, v.semantic as u8)?;
            stream::write_u8(w, v.format as u8)?;
            stream::write_u8(w, v.location)?;
        }

        stream::write_u32(w, heap.bytes.len() as u32)?;
        stream::write_bytes(w, &heap.bytes)?;

        stream::write_u32(w, blob.len() as u32)?;
        stream::write_bytes(w, &blob)
    }

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let magic = stream::read_bytes(r, 4)?;
        if magic != SHADER_BINARY_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a shader permutation binary",
            ));
        }
        let version = stream::read_u8(r)?;
        if version > SHADER_BINARY_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("shader binary version {version} is newer than supported"),
            ));
        }

        let invalid = |what: &str| io::Error::new(io::ErrorKind::InvalidData, what.to_owned());

        let platform_count = stream::read_u32(r)? as usize;
        let mut platform_records = Vec::with_capacity(platform_count);
        for _ in 0..platform_count {
            let id = stream::read_u32(r)?;
            let offset = stream::read_u32(r)?;
            let size = stream::read_u32(r)?;
            platform_records.push((id, offset, size));
        }

        struct RawBinding {
            name_off: u16,
            set: u8,
            binding: u8,
            resource_type: u8,
            texture_type: u8,
            stage_mask: u8,
            is_array: u8,
            array_size: u16,
        }

        let binding_count = stream::read_u32(r)? as usize;
        let mut raw_bindings = Vec::with_capacity(binding_count);
        for _ in 0..binding_count {
            raw_bindings.push(RawBinding {
                name_off: stream::read_u16(r)?,
                set: stream::read_u8(r)?,
                binding: stream::read_u8(r)?,
                resource_type: stream::read_u8(r)?,
                texture_type: stream::read_u8(r)?,
                stage_mask: stream::read_u8(r)?,
                is_array: stream::read_u8(r)?,
                array_size: stream::read_u16(r)?,
            });
        }

        let input_count = stream::read_u32(r)? as usize;
        let mut raw_inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let name_off = stream::read_u16(r)?;
            let semantic = stream::read_u8(r)?;
            let format = stream::read_u8(r)?;
            let location = stream::read_u8(r)?;
            raw_inputs.push((name_off, semantic, format, location));
        }

        let heap_size = stream::read_u32(r)? as usize;
        let heap = stream::read_bytes(r, heap_size)?;

        let blob_size = stream::read_u32(r)? as usize;
        let blob = stream::read_bytes(r, blob_size)?;
        // Anything after the known tables belongs to a newer writer; ignore it.

        let mut bindings = Vec::with_capacity(binding_count);
        for raw in raw_bindings {
            bindings.push(ShaderResourceBinding {
                name: StringHeap::resolve(&heap, raw.name_off)?,
                set: raw.set,
                binding: raw.binding,
                resource_type: ShaderResourceType::from_u8(raw.resource_type)
                    .ok_or_else(|| invalid("bad resource type"))?,
                texture_type: ShaderTextureType::from_u8(
                    raw.texture_type & !TEXTURE_TYPE_DEPTH_BIT,
                )
                .ok_or_else(|| invalid("bad texture type"))?,
                is_depth: raw.texture_type & TEXTURE_TYPE_DEPTH_BIT != 0,
                stages: ShaderStageMask::from_bits_truncate(raw.stage_mask),
                is_array: raw.is_array != 0,
                array_size: raw.array_size,
            });
        }

        let mut vertex_inputs = Vec::with_capacity(input_count);
        for (name_off, semantic, format, location) in raw_inputs {
            vertex_inputs.push(ShaderVertexInput {
                name: StringHeap::resolve(&heap, name_off)?,
                semantic: VertexSemantic::from_u8(semantic)
                    .ok_or_else(|| invalid("bad vertex semantic"))?,
                format: VertexInputFormat::from_u8(format)
                    .ok_or_else(|| invalid("bad vertex format"))?,
                location,
            });
        }

        let mut platforms = Vec::with_capacity(platform_count);
        for (platform_id, offset, size) in platform_records {
            let end = offset
                .checked_add(size)
                .ok_or_else(|| invalid("platform blob out of range"))? as usize;
            let slice = blob
                .get(offset as usize..end)
                .ok_or_else(|| invalid("platform blob out of range"))?;
            let mut cursor = Cursor::new(slice);
            let stage_count = stream::read_u32(&mut cursor)? as usize;
            let mut stages = Vec::with_capacity(stage_count);
            for _ in 0..stage_count {
                let stage = ShaderStage::from_u8(stream::read_u8(&mut cursor)?)
                    .ok_or_else(|| invalid("bad shader stage"))?;
                let len = stream::read_u32(&mut cursor)? as usize;
                stages.push((stage, stream::read_bytes(&mut cursor, len)?));
            }
            platforms.push(PlatformBytecode {
                platform_id,
                stages,
            });
        }

        Ok(Self {
            platforms,
            bindings,
            vertex_inputs,
        })
    }
}

// ─── Permutation cache ────────────────────────────────────────────────────────

/// Default cache location, overridable with `NS_SHADER_CACHE_DIR`.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os("NS_SHADER_CACHE_DIR")
        .map_or_else(|| PathBuf::from("shader_cache"), PathBuf::from)
}

/// On-disk cache of shader permutation binaries.
pub struct ShaderPermutationCache {
    dir: PathBuf,
}

impl ShaderPermutationCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn with_default_dir() -> Self {
        Self::new(default_cache_dir())
    }

    #[must_use]
    pub fn path_for(&self, shader_hash: u64, platform_id: u32) -> PathBuf {
        self.dir
            .join(format!("{shader_hash:016x}.{platform_id}.nssb"))
    }

    pub fn load(&self, shader_hash: u64, platform_id: u32) -> Option<ShaderPermutationBinary> {
        let path = self.path_for(shader_hash, platform_id);
        let bytes = std::fs::read(&path).ok()?;
        match ShaderPermutationBinary::read(&mut Cursor::new(bytes)) {
            Ok(binary) => Some(binary),
            Err(e) => {
                log::warn!("discarding corrupt shader cache entry {}: {e}", path.display());
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    pub fn store(
        &self,
        shader_hash: u64,
        platform_id: u32,
        binary: &ShaderPermutationBinary,
    ) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut bytes = Vec::new();
        binary.write(&mut bytes)?;
        std::fs::write(self.path_for(shader_hash, platform_id), bytes)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_binary() -> ShaderPermutationBinary {
        ShaderPermutationBinary {
            platforms: vec![PlatformBytecode {
                platform_id: 1,
                stages: vec![
                    (ShaderStage::Vertex, vec![1, 2, 3, 4]),
                    (ShaderStage::Fragment, vec![5, 6, 7]),
                ],
            }],
            bindings: vec![
                ShaderResourceBinding {
                    name: "perFrame".into(),
                    set: 0,
                    binding: 0,
                    resource_type: ShaderResourceType::ConstantBuffer,
                    texture_type: ShaderTextureType::Unknown,
                    is_depth: false,
                    stages: ShaderStageMask::VERTEX | ShaderStageMask::FRAGMENT,
                    is_array: false,
                    array_size: 1,
                },
                ShaderResourceBinding {
                    name: "shadowMap".into(),
                    set: 1,
                    binding: 2,
                    resource_type: ShaderResourceType::Texture,
                    texture_type: ShaderTextureType::Texture2DArray,
                    is_depth: true,
                    stages: ShaderStageMask::FRAGMENT,
                    is_array: true,
                    array_size: 4,
                },
            ],
            vertex_inputs: vec![ShaderVertexInput {
                name: "in_position".into(),
                semantic: VertexSemantic::Position,
                format: VertexInputFormat::Float3,
                location: 0,
            }],
        }
    }

    #[test]
    fn binary_roundtrip_is_structural_identity() {
        let binary = sample_binary();
        let mut bytes = Vec::new();
        binary.write(&mut bytes).unwrap();

        let read = ShaderPermutationBinary::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, binary);
    }

    #[test]
    fn reader_ignores_trailing_tables() {
        let binary = sample_binary();
        let mut bytes = Vec::new();
        binary.write(&mut bytes).unwrap();
        // A newer writer appended a table this reader knows nothing about.
        bytes.extend_from_slice(&[0xAB; 64]);

        let read = ShaderPermutationBinary::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, binary);
    }

    #[test]
    fn reader_rejects_bad_magic() {
        let bytes = b"XXXX\x01".to_vec();
        assert!(ShaderPermutationBinary::read(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn permutation_hash_is_order_independent() {
        let mut a = PermutationSet::new();
        a.set("FOG", "1");
        a.set("SHADOWS", "PCF");

        let mut b = PermutationSet::new();
        b.set("SHADOWS", "PCF");
        b.set("FOG", "1");

        assert_eq!(a.permutation_hash(), b.permutation_hash());

        b.set("FOG", "0");
        assert_ne!(a.permutation_hash(), b.permutation_hash());
    }

    #[test]
    fn desc_roundtrip_through_binary() {
        let mut desc = ShaderCreationDesc::default();
        desc.set_bytecode(ShaderStage::Vertex, vec![9, 9, 9]);
        desc.set_bytecode(ShaderStage::Fragment, vec![1]);
        desc.bindings = sample_binary().bindings;

        let binary = ShaderPermutationBinary::from_desc(7, &desc);
        let rebuilt = binary.to_desc(7).unwrap();
        assert_eq!(rebuilt.bytecode(ShaderStage::Vertex), Some(&[9u8, 9, 9][..]));
        assert_eq!(rebuilt.bindings, desc.bindings);
        assert!(binary.to_desc(8).is_none());
    }
}
