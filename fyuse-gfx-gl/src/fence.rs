//! The `glow`-backed fence object, grounded on `fyrox-graphics/src/gl/read_buffer.rs`'s
//! `ReadRequest { fence: glow::Fence }` usage of `fence_sync`/`client_wait_sync`/`delete_sync`.

use fyuse_gfx::sync::GpuFenceTrait;
use glow::HasContext;
use std::rc::Rc;

pub struct GlFence {
    pub(crate) gl: Rc<glow::Context>,
    pub(crate) sync: glow::Fence,
}

impl GpuFenceTrait for GlFence {}

impl Drop for GlFence {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_sync(self.sync);
        }
    }
}
