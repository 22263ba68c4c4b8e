//! Type-agnostic GPU buffer storage: vertex/index buffers for proxy quads, and the pixel buffer
//! objects the async download pipeline reads through.

use crate::error::FrameworkError;
use bytemuck::Pod;
use fyuse_core::{define_as_any_trait, define_shared_wrapper};

/// What a buffer is used for.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BufferKind {
    /// Vertex buffer for a proxy quad.
    Vertex,
    /// Index buffer for a proxy quad.
    Index,
    /// A pixel-pack buffer used by the async GPU-to-CPU download pipeline.
    PixelRead,
}

/// A hint the backend may use to place the buffer in the most appropriate memory.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BufferUsage {
    /// Written once by the host, used many times as draw input (proxy quad geometry).
    StaticDraw,
    /// Written by the GPU, read back by the host repeatedly (pixel read buffers).
    StreamRead,
}

define_as_any_trait!(GpuBufferAsAny => GpuBufferTrait);

/// Trait implemented by a backend's concrete buffer object.
pub trait GpuBufferTrait: GpuBufferAsAny {
    /// The kind the buffer was created with.
    fn kind(&self) -> BufferKind;
    /// The usage hint the buffer was created with.
    fn usage(&self) -> BufferUsage;
    /// Total size of the buffer in bytes.
    fn size(&self) -> usize;
    /// Writes raw bytes into the buffer.
    fn write_data(&self, data: &[u8]) -> Result<(), FrameworkError>;
    /// Reads raw bytes out of the buffer into `data`, up to `data.len()` bytes.
    fn read_data(&self, data: &mut [u8]) -> Result<(), FrameworkError>;
}

impl dyn GpuBufferTrait {
    /// Writes a typed slice, reinterpreting it as bytes.
    pub fn write_data_of_type<T: Pod>(&self, data: &[T]) -> Result<(), FrameworkError> {
        self.write_data(bytemuck::cast_slice(data))
    }

    /// Reads into a typed slice, reinterpreting the read bytes.
    pub fn read_data_of_type<T: Pod>(&self, data: &mut [T]) -> Result<(), FrameworkError> {
        self.read_data(bytemuck::cast_slice_mut(data))
    }
}

define_shared_wrapper!(GpuBuffer<dyn GpuBufferTrait>);
