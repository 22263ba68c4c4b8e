//! The geometry every FyuseNet draw call rasterizes: a single textured quad covering the active
//! viewport. There is exactly one vertex layout in the whole engine (position + UV), so unlike a
//! general-purpose renderer this module has no vertex-declaration DSL.

use crate::error::FrameworkError;
use fyuse_core::{define_as_any_trait, define_shared_wrapper};

/// Statistics produced by a single draw call.
#[derive(Copy, Clone, Debug, Default)]
pub struct DrawCallStatistics {
    /// Number of triangles submitted by the call.
    pub triangles: usize,
}

/// Describes the proxy quad's vertex/index data.
#[derive(Clone, Debug)]
pub struct GeometryBufferDescriptor<'a> {
    /// Interleaved `[x, y, u, v]` vertex data.
    pub vertices: &'a [f32],
    /// Triangle index data (two triangles per quad).
    pub indices: &'a [u32],
}

define_as_any_trait!(GeometryBufferAsAny => GeometryBufferTrait);

/// Trait implemented by a backend's concrete vertex-array object.
pub trait GeometryBufferTrait: GeometryBufferAsAny {
    /// Total number of indices currently stored.
    fn index_count(&self) -> usize;
    /// Replaces the vertex data in place (used when a layer's output viewport changes size). Takes
    /// `&self`, consistent with every other shared GPU resource in this crate.
    fn set_vertices(&self, vertices: &[f32]) -> Result<(), FrameworkError>;
}

define_shared_wrapper!(GeometryBuffer<dyn GeometryBufferTrait>);
