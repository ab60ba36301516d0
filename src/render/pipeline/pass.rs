//! Pipeline Passes & Pins
//!
//! A pass is a node of the render pipeline graph. Its pins are declared by
//! an explicit list — inputs name the texture description they expect,
//! outputs declare what they produce, and pass-through pins forward one
//! physical resource from input to output side.

use std::io;

use crate::gal::descriptors::TextureCreationDesc;
use crate::gal::error::GalResult;
use crate::gal::handles::TextureHandle;

use super::super::view::{View, ViewTarget};
use super::view_context::RenderViewContext;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PinKind {
    Input,
    Output,
    /// Consumes and re-exposes the same physical resource.
    PassThrough,
}

#[derive(Clone, Copy, Debug)]
pub struct PinDesc {
    pub name: &'static str,
    pub kind: PinKind,
    /// Optional inputs leave their connection slot empty without rejecting
    /// compilation.
    pub optional: bool,
}

impl PinDesc {
    #[must_use]
    pub const fn input(name: &'static str) -> Self {
        Self {
            name,
            kind: PinKind::Input,
            optional: false,
        }
    }

    #[must_use]
    pub const fn optional_input(name: &'static str) -> Self {
        Self {
            name,
            kind: PinKind::Input,
            optional: true,
        }
    }

    #[must_use]
    pub const fn output(name: &'static str) -> Self {
        Self {
            name,
            kind: PinKind::Output,
            optional: false,
        }
    }

    #[must_use]
    pub const fn pass_through(name: &'static str) -> Self {
        Self {
            name,
            kind: PinKind::PassThrough,
            optional: true,
        }
    }
}

/// A bound connection at execution time: the physical texture plus the
/// descriptor it was allocated with.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionBinding {
    pub texture: TextureHandle,
    pub desc: TextureCreationDesc,
}

/// Per-pass connection table, indexed by pin index.
pub struct PassIo<'a> {
    pub pins: &'a [Option<ConnectionBinding>],
}

impl PassIo<'_> {
    #[must_use]
    pub fn pin(&self, index: usize) -> Option<&ConnectionBinding> {
        self.pins.get(index).and_then(Option::as_ref)
    }
}

/// A node of the render pipeline graph.
pub trait RenderPipelinePass: Send + Sync {
    fn name(&self) -> &str;

    /// The explicit pin list; order is the pin index used everywhere else.
    fn pins(&self) -> &'static [PinDesc];

    /// Serialization version of the pass-specific blob.
    fn type_version(&self) -> u32 {
        1
    }

    /// Sink passes bind the view's actual render targets instead of pooled
    /// transients.
    fn is_sink(&self) -> bool {
        false
    }

    /// For sink passes: the real target behind `pin_name`.
    fn sink_target(&self, _target: &ViewTarget, _pin_name: &str) -> Option<TextureHandle> {
        None
    }

    /// Negotiates resource descriptors during compilation. `inputs` and
    /// `outputs` are indexed by pin index; the pass fills descriptors for
    /// its outputs and may refuse (`false`), aborting compilation.
    fn get_render_target_descriptions(
        &self,
        view: &View,
        inputs: &[Option<TextureCreationDesc>],
        outputs: &mut [Option<TextureCreationDesc>],
    ) -> bool;

    /// Records the pass's GPU work.
    fn execute(&mut self, ctx: &mut RenderViewContext<'_>, io: &PassIo<'_>) -> GalResult<()>;

    /// Runs instead of `execute` when the pass is disabled. Pass-through
    /// resources forward automatically; the default does no GPU work.
    fn execute_inactive(
        &mut self,
        _ctx: &mut RenderViewContext<'_>,
        _io: &PassIo<'_>,
    ) -> GalResult<()> {
        Ok(())
    }

    /// Pass-specific serialized state (beyond the common header).
    fn serialize_data(&self, _w: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }

    fn deserialize_data(&mut self, _r: &mut dyn io::Read, _version: u32) -> io::Result<()> {
        Ok(())
    }

    /// Publishes captured values back onto the view after execution.
    fn read_back_properties(&mut self, _view: &mut View) {}
}

/// Index of the pin named `name`, resolved against the declared pin list.
#[must_use]
pub fn pin_index(pass: &dyn RenderPipelinePass, name: &str) -> Option<u16> {
    pass.pins()
        .iter()
        .position(|p| p.name == name)
        .map(|i| i as u16)
}
