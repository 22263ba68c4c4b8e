//! The tensor-to-texture data model: element types, storage orders, [`shape::BufferShape`], the
//! deep-tensor tiling helper, and the CPU/GPU tensor buffers built on top of them.

pub mod cpu_buffer;
pub mod gpu_buffer;
pub mod shape;
pub mod tiling;

pub use cpu_buffer::CPUBuffer;
pub use gpu_buffer::GPUBuffer;
pub use shape::{BufferShape, ElementType, StorageOrder};
pub use tiling::{compute_tiling, DeepTiler, Tile};
