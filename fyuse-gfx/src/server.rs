//! The backend-agnostic graphics context every layer renders through. A concrete backend (e.g.
//! `fyuse-gfx-gl`) implements [`GfxContext`] once; everything above this crate only ever talks to
//! the trait, never to `glow`/`glutin` directly.
//!
//! FyuseNet never presents to a screen: every frame buffer this context creates is an off-screen
//! render target feeding the next layer, so unlike `fyrox-graphics`'s `GraphicsServer` there is no
//! `back_buffer`/`swap_buffers`/polygon-fill-mode surface-presentation surface here.

use crate::{
    buffer::{BufferKind, BufferUsage, GpuBuffer},
    error::FrameworkError,
    framebuffer::{Attachment, FrameBuffer},
    geometry_buffer::{GeometryBuffer, GeometryBufferDescriptor},
    program::GpuProgram,
    read_buffer::AsyncReadBuffer,
    stats::PipelineStatistics,
    sync::GpuFence,
    texture::{Texture, TextureDescriptor},
};
use std::time::Duration;

/// Capabilities the tiling helper and the convolution weight packager need to respect.
#[derive(Copy, Clone, Debug)]
pub struct GfxCapabilities {
    /// Maximum width or height of a single 2D texture.
    pub max_texture_size: usize,
    /// Maximum number of simultaneous color attachments (render targets) a frame buffer supports.
    pub max_draw_buffers: usize,
    /// Maximum number of 4-component float vectors available to a fragment shader as uniforms.
    pub max_fragment_uniform_vectors: usize,
}

/// A graphics context: owns (or is derived from) a real GPU context, and is the sole factory for
/// every GPU-side resource a layer needs. One context is current on the engine's driving thread;
/// [`Self::create_derived`] produces a context sharing textures/buffers/programs with it for the
/// async download worker pool (`spec.md` §5).
pub trait GfxContext {
    /// Creates a texture from the given descriptor, optionally uploading `data` as its initial
    /// contents.
    fn create_texture(
        &self,
        desc: TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<Texture, FrameworkError>;

    /// Creates a frame buffer with the given color attachments. FyuseNet frame buffers never
    /// carry a depth or stencil attachment.
    fn create_frame_buffer(
        &self,
        color_attachments: Vec<Attachment>,
    ) -> Result<FrameBuffer, FrameworkError>;

    /// Replaces a frame buffer's color attachment at `index` with `texture` in place, used when a
    /// layer's output texture is swapped without rebuilding the whole FBO.
    fn update_color_attachment(
        &self,
        framebuffer: &FrameBuffer,
        index: usize,
        texture: Texture,
    ) -> Result<(), FrameworkError>;

    /// Creates a GPU buffer (vertex, index, or pixel-pack) of `size` bytes.
    fn create_buffer(
        &self,
        size: usize,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> Result<GpuBuffer, FrameworkError>;

    /// Creates the proxy-quad geometry a layer's draw calls rasterize.
    fn create_geometry_buffer(
        &self,
        desc: GeometryBufferDescriptor,
    ) -> Result<GeometryBuffer, FrameworkError>;

    /// Compiles and links a vertex/fragment shader pair into a program.
    fn create_program(
        &self,
        name: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<GpuProgram, FrameworkError>;

    /// Creates an async GPU→CPU read-back request backed by a pixel-pack buffer sized for
    /// `pixel_count` texels of `pixel_size` bytes each.
    fn create_async_read_buffer(
        &self,
        pixel_size: usize,
        pixel_count: usize,
    ) -> Result<AsyncReadBuffer, FrameworkError>;

    /// Creates a context that shares GPU object names (textures, buffers, programs) with this
    /// one, for use on a worker thread that maps PBOs asynchronously. Not every backend context is
    /// derivable (a derived context itself cannot spawn further derived contexts); such contexts
    /// return [`FrameworkError::ContextUnavailable`].
    fn create_derived(&self) -> Result<Box<dyn GfxContext>, FrameworkError>;

    /// Makes this context current on the calling thread. A derived context must be made current
    /// on its worker thread before any GPU call on that thread.
    fn make_current(&self) -> Result<(), FrameworkError>;

    /// Submits all pending GPU commands without waiting for them to complete.
    fn flush(&self);

    /// Blocks the calling thread until every submitted GPU command has completed.
    fn finish(&self);

    /// Reports the backend's resource limits.
    fn capabilities(&self) -> GfxCapabilities;

    /// Returns accumulated pipeline statistics since the context was created or last reset.
    fn pipeline_statistics(&self) -> PipelineStatistics;

    /// Resets the accumulated pipeline statistics to zero.
    fn reset_pipeline_statistics(&mut self);

    /// Inserts a fence into the GPU command stream and returns a handle to it. Used by the async
    /// download pipeline to know when a scheduled pixel transfer has actually landed in its PBO.
    fn issue_sync(&self) -> Result<GpuFence, FrameworkError>;

    /// Blocks the calling thread until `fence` signals or `timeout` elapses. `spec.md` §5's
    /// default budget is 5 seconds; callers pass that explicitly rather than relying on a
    /// context-wide default, since only the download worker thread ever calls this.
    fn wait_client_sync(&self, fence: &GpuFence, timeout: Duration) -> Result<(), FrameworkError>;

    /// Releases a fence's backend resources. A fence that already signaled (consumed by
    /// [`Self::wait_client_sync`] returning `Ok`) may still need this to free the underlying
    /// GPU object.
    fn remove_sync(&self, fence: GpuFence);
}
