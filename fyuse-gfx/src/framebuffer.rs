//! Frame buffer objects: the render targets every GPU layer draws its output tensor into.

use crate::{
    error::FrameworkError,
    geometry_buffer::{DrawCallStatistics, GeometryBuffer},
    program::{GpuProgram, ProgramBinding},
    texture::Texture,
};
use fyuse_core::define_as_any_trait;

/// A rectangular region in pixel coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Rect {
    /// Creates a rect covering `(0, 0)` to `(width, height)`.
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// The single color-attachment slot a FyuseNet frame buffer owns. There are no depth/stencil
/// attachments anywhere in this pipeline — every layer is a pure texture-to-texture transform.
pub struct Attachment {
    /// The texture this frame buffer renders into.
    pub texture: Texture,
}

/// Blend factor for the additive accumulation shallow convolution relies on (`spec.md` §4.5's
/// per-input-pass additive blending discipline).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum BlendFactor {
    /// Replace the destination value outright.
    #[default]
    One,
    /// Add to whatever is already in the destination texture.
    OneOnOne,
}

/// Drawing parameters for a single draw call. Deliberately much smaller than a general-purpose
/// renderer's equivalent: there is no depth test, stencil test, or face culling anywhere in this
/// pipeline, since every draw call is a full-screen quad writing straight into a 2D tensor texture.
#[derive(Copy, Clone, Debug, Default)]
pub struct DrawParameters {
    /// Blending mode. `None` disables blending (the common case); `Some(OneOnOne)` is what a
    /// shallow convolution layer uses across its per-input-pass accumulation loop.
    pub blend: Option<BlendFactor>,
}

define_as_any_trait!(FrameBufferAsAny => FrameBufferTrait);

/// A render target a GPU layer draws its output tensor into.
pub trait FrameBufferTrait: FrameBufferAsAny {
    /// The color attachment(s) of this frame buffer, one per 4-channel texture group.
    fn color_attachments(&self) -> &[Attachment];
    /// Clears every color attachment to `color`.
    fn clear(&mut self, viewport: Rect, color: [f32; 4]);
    /// Draws the given geometry with `program` bound, invoking `apply_uniforms` once the program
    /// is live so the caller can upload per-draw constants.
    fn draw(
        &mut self,
        geometry: &crate::geometry_buffer::GeometryBuffer,
        viewport: Rect,
        program: &GpuProgram,
        params: &DrawParameters,
        apply_uniforms: &mut dyn FnMut(&mut dyn ProgramBinding),
    ) -> Result<DrawCallStatistics, FrameworkError>;
}

/// A shared handle to a frame buffer.
pub struct FrameBuffer(pub std::rc::Rc<std::cell::RefCell<dyn FrameBufferTrait>>);

impl Clone for FrameBuffer {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl FrameBuffer {
    /// Wraps a concrete frame buffer implementation in a shared handle.
    pub fn new(inner: impl FrameBufferTrait + 'static) -> Self {
        Self(std::rc::Rc::new(std::cell::RefCell::new(inner)))
    }
}
