//! Pipeline Serialization
//!
//! Passes are written in topological order as `{active, hashed name,
//! type-versioned blob}`, followed by the connection list with each
//! connection's texture description. Deserialization rebuilds passes through
//! a name-hash factory, so serialized node indices refer to positions in the
//! written pass sequence.

use std::io::{self, Read, Write};

use rustc_hash::FxHashMap;

use crate::core::interner::hash_name;
use crate::core::stream;
use crate::gal::descriptors::{SampleCount, TextureCreationDesc, TextureType, TextureUsage};
use crate::gal::format::ResourceFormat;

use super::pass::RenderPipelinePass;
use super::pipeline::{Connection, RenderPipeline};

/// Builds passes from their hashed names during deserialization.
#[derive(Default)]
pub struct PassFactory {
    constructors: FxHashMap<u32, Box<dyn Fn() -> Box<dyn RenderPipelinePass> + Send + Sync>>,
}

impl PassFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        constructor: impl Fn() -> Box<dyn RenderPipelinePass> + Send + Sync + 'static,
    ) {
        self.constructors
            .insert(hash_name(name), Box::new(constructor));
    }

    #[must_use]
    pub fn construct(&self, name_hash: u32) -> Option<Box<dyn RenderPipelinePass>> {
        self.constructors.get(&name_hash).map(|f| f())
    }
}

pub fn write_texture_desc(w: &mut impl Write, desc: &TextureCreationDesc) -> io::Result<()> {
    stream::write_u8(w, desc.texture_type as u8)?;
    stream::write_u32(w, desc.width)?;
    stream::write_u32(w, desc.height)?;
    stream::write_u32(w, desc.depth)?;
    stream::write_u32(w, desc.mip_levels)?;
    stream::write_u32(w, desc.array_size)?;
    stream::write_u8(w, desc.format as u8)?;
    stream::write_u8(w, desc.samples as u8)?;
    stream::write_u16(w, desc.usage.bits())
}

pub fn read_texture_desc(r: &mut impl Read) -> io::Result<TextureCreationDesc> {
    let invalid = |what: &str| io::Error::new(io::ErrorKind::InvalidData, what.to_owned());
    let texture_type = match stream::read_u8(r)? {
        0 => TextureType::Texture2D,
        1 => TextureType::Texture2DArray,
        2 => TextureType::TextureCube,
        3 => TextureType::Texture3D,
        _ => return Err(invalid("bad texture type")),
    };
    let width = stream::read_u32(r)?;
    let height = stream::read_u32(r)?;
    let depth = stream::read_u32(r)?;
    let mip_levels = stream::read_u32(r)?;
    let array_size = stream::read_u32(r)?;
    let format_raw = stream::read_u8(r)?;
    let format = format_from_u8(format_raw).ok_or_else(|| invalid("bad format"))?;
    let samples = match stream::read_u8(r)? {
        1 => SampleCount::None,
        2 => SampleCount::X2,
        4 => SampleCount::X4,
        8 => SampleCount::X8,
        _ => return Err(invalid("bad sample count")),
    };
    let usage = TextureUsage::from_bits_truncate(stream::read_u16(r)?);
    Ok(TextureCreationDesc {
        texture_type,
        width,
        height,
        depth,
        mip_levels,
        array_size,
        format,
        samples,
        usage,
    })
}

fn format_from_u8(v: u8) -> Option<ResourceFormat> {
    use ResourceFormat as F;
    const ALL: &[ResourceFormat] = &[
        F::Unknown,
        F::R8Unorm,
        F::R8Uint,
        F::Rg8Unorm,
        F::Rgba8Unorm,
        F::Rgba8UnormSrgb,
        F::Bgra8Unorm,
        F::Bgra8UnormSrgb,
        F::Rgba8Uint,
        F::R16Float,
        F::R16Uint,
        F::Rg16Float,
        F::Rgba16Float,
        F::R32Float,
        F::R32Uint,
        F::Rg32Float,
        F::Rgb32Float,
        F::Rgba32Float,
        F::Rgba32Uint,
        F::Rgb10A2Unorm,
        F::Rg11B10Float,
        F::D16Unorm,
        F::D24UnormS8Uint,
        F::D32Float,
        F::D32FloatS8Uint,
    ];
    ALL.iter().find(|f| **f as u8 == v).copied()
}

impl RenderPipeline {
    /// Serializes pass configuration and connectivity. Requires every pass
    /// name to be registered with the reading side's [`PassFactory`].
    pub fn serialize(&self, w: &mut impl Write) -> io::Result<()> {
        // Topological order when compiled; insertion order otherwise.
        let order: Vec<u32> = self
            .pass_order()
            .map_or_else(|| (0..self.passes.len() as u32).collect(), <[u32]>::to_vec);
        // Serialized node index per live node index.
        let mut serialized_index = vec![0u32; self.passes.len()];
        for (position, node) in order.iter().enumerate() {
            serialized_index[*node as usize] = position as u32;
        }

        stream::write_u32(w, order.len() as u32)?;
        for node in &order {
            let pass_node = &self.passes[*node as usize];
            stream::write_bool(w, pass_node.active)?;
            stream::write_u32(w, hash_name(pass_node.pass.name()))?;
            stream::write_u32(w, pass_node.pass.type_version())?;

            let mut blob = Vec::new();
            pass_node.pass.serialize_data(&mut blob)?;
            stream::write_u32(w, blob.len() as u32)?;
            stream::write_bytes(w, &blob)?;
        }

        // One record per (source, destination) pair.
        let records: Vec<(u32, u16, u32, u16, TextureCreationDesc)> = self
            .connections()
            .iter()
            .flat_map(|c| {
                c.destinations.iter().map(|(dst_node, dst_pin)| {
                    (
                        serialized_index[c.src_node as usize],
                        c.src_pin,
                        serialized_index[*dst_node as usize],
                        *dst_pin,
                        c.desc.unwrap_or_default(),
                    )
                })
            })
            .collect();
        stream::write_u32(w, records.len() as u32)?;
        for (src_node, src_pin, dst_node, dst_pin, desc) in records {
            stream::write_u32(w, src_node)?;
            stream::write_u16(w, src_pin)?;
            stream::write_u32(w, dst_node)?;
            stream::write_u16(w, dst_pin)?;
            write_texture_desc(w, &desc)?;
        }
        Ok(())
    }

    /// Rebuilds a pipeline from its serialized form. The result is
    /// uncompiled; callers compile against their view before rendering.
    pub fn deserialize(r: &mut impl Read, factory: &PassFactory) -> io::Result<Self> {
        let mut pipeline = Self::new();

        let pass_count = stream::read_u32(r)? as usize;
        for _ in 0..pass_count {
            let active = stream::read_bool(r)?;
            let name_hash = stream::read_u32(r)?;
            let version = stream::read_u32(r)?;
            let blob_size = stream::read_u32(r)? as usize;
            let blob = stream::read_bytes(r, blob_size)?;

            let Some(mut pass) = factory.construct(name_hash) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("no pass registered for name hash {name_hash:#x}"),
                ));
            };
            pass.deserialize_data(&mut io::Cursor::new(blob), version)?;
            let node = pipeline.add_pass(pass);
            pipeline.set_pass_active(node, active);
        }

        let connection_count = stream::read_u32(r)? as usize;
        for _ in 0..connection_count {
            let src_node = stream::read_u32(r)?;
            let src_pin = stream::read_u16(r)?;
            let dst_node = stream::read_u32(r)?;
            let dst_pin = stream::read_u16(r)?;
            let desc = read_texture_desc(r)?;

            // Re-merge multi-destination connections.
            let existing = pipeline
                .connections()
                .iter()
                .position(|c| c.src_node == src_node && c.src_pin == src_pin);
            if let Some(index) = existing {
                let mut connection = pipeline.connections()[index].clone();
                connection.destinations.push((dst_node, dst_pin));
                connection.desc = Some(desc);
                pipeline.replace_connection(index, connection);
            } else {
                pipeline.restore_connection(Connection {
                    src_node,
                    src_pin,
                    destinations: vec![(dst_node, dst_pin)],
                    desc: Some(desc),
                });
            }
        }
        Ok(pipeline)
    }
}
