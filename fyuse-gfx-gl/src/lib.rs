//! `glow`/`glutin` backed implementation of the `fyuse-gfx` graphics abstraction. This is the only
//! concrete [`fyuse_gfx::GfxContext`] this workspace ships; an embedding application constructs a
//! [`server::GlGfxContext`] once and hands out [`server::GlGfxContext::create_derived`] contexts to
//! the async download worker pool.

pub mod buffer;
pub mod convert;
pub mod fence;
pub mod framebuffer;
pub mod geometry_buffer;
pub mod program;
pub mod read_buffer;
pub mod server;
pub mod texture;

pub use server::GlGfxContext;
