//! Backend-agnostic graphics abstraction the inference engine renders through: a [`server::GfxContext`]
//! trait plus the texture/frame-buffer/buffer/program/geometry/async-read-back types every layer
//! binds against. `fyuse-gfx-gl` supplies the only concrete implementation in this workspace.

pub mod buffer;
pub mod error;
pub mod framebuffer;
pub mod geometry_buffer;
pub mod program;
pub mod read_buffer;
pub mod server;
pub mod stats;
pub mod sync;
pub mod texture;

pub use error::FrameworkError;
pub use server::{GfxCapabilities, GfxContext};
