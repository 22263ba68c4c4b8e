//! GPU shader programs and the uniform-binding contract a layer's `forward` pass uses to drive
//! them. FyuseNet never ships shader source with this crate (it is supplied by the layer that
//! needs it and compiled through [`crate::server::GfxContext::create_program`]) — this module only
//! defines the handle and binding types layers interact with.

use crate::error::FrameworkError;
use fyuse_core::{define_as_any_trait, define_shared_wrapper};

define_as_any_trait!(GpuProgramAsAny => GpuProgramTrait);

/// Trait implemented by a backend's concrete linked shader program. All interaction happens
/// through [`ProgramBinding`] once the program is bound for a draw call.
pub trait GpuProgramTrait: GpuProgramAsAny {
    /// Looks up the location of a uniform by name, if it exists in the linked program (uniforms
    /// that are optimized out by the compiler legitimately return `None`).
    fn uniform_location(&self, name: &str) -> Option<UniformLocation>;
}

define_shared_wrapper!(GpuProgram<dyn GpuProgramTrait>);

/// An opaque handle to a uniform's location inside a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLocation(pub u32);

/// A live binding of a [`GpuProgram`] during a draw call. A layer's `forward` implementation
/// receives one of these through the `apply_uniforms` closure passed to
/// [`crate::framebuffer::FrameBuffer::draw`] and uses it to upload per-pass constants (weights,
/// biases, viewport offsets, the current sequence index, ...).
pub trait ProgramBinding {
    /// Uploads a single 32-bit integer.
    fn set_i32(&mut self, location: UniformLocation, value: i32) -> Result<(), FrameworkError>;
    /// Uploads a single 32-bit float.
    fn set_f32(&mut self, location: UniformLocation, value: f32) -> Result<(), FrameworkError>;
    /// Uploads a 2-component float vector.
    fn set_vec2(&mut self, location: UniformLocation, value: [f32; 2]) -> Result<(), FrameworkError>;
    /// Uploads a 4-component float vector.
    fn set_vec4(&mut self, location: UniformLocation, value: [f32; 4]) -> Result<(), FrameworkError>;
    /// Uploads an array of 32-bit floats (e.g. packed convolution weights).
    fn set_f32_array(
        &mut self,
        location: UniformLocation,
        values: &[f32],
    ) -> Result<(), FrameworkError>;
    /// Binds a texture to a sampler unit.
    fn set_texture(
        &mut self,
        location: UniformLocation,
        texture: &crate::texture::Texture,
        unit: u32,
    ) -> Result<(), FrameworkError>;
}
