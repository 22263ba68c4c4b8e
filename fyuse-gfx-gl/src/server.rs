//! The `glow`/`glutin` backed [`GfxContext`] implementation, grounded on
//! `fyrox-graphics/src/gl/server.rs`'s `GlGraphicsServer::new`. FyuseNet never presents to a
//! window, so unlike the teacher this context is built against a hidden window surface (the
//! simplest portable way to obtain a real GL context across platforms) and never swaps buffers.
//!
//! The async download pipeline (`spec.md` §5) needs a second GL context that shares object names
//! (textures, buffers) with the driving context so a worker thread can map a PBO without stalling
//! the render thread; [`GlGfxContext::create_derived`] builds exactly that, sharing `display` and
//! `config` with the parent and creating its own tiny 1x1 pbuffer surface just to have something
//! to make current against (the worker thread never draws, only reads buffers).

use crate::buffer::GlBuffer;
use crate::fence::GlFence;
use crate::framebuffer::GlFrameBuffer;
use crate::geometry_buffer::GlGeometryBuffer;
use crate::program::GlProgram;
use crate::texture::GlTexture;
use fyuse_gfx::buffer::{BufferKind, BufferUsage, GpuBuffer};
use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::framebuffer::{Attachment, FrameBuffer};
use fyuse_gfx::geometry_buffer::{GeometryBuffer, GeometryBufferDescriptor};
use fyuse_gfx::program::GpuProgram;
use fyuse_gfx::read_buffer::AsyncReadBuffer;
use fyuse_gfx::server::{GfxCapabilities, GfxContext};
use fyuse_gfx::stats::PipelineStatistics;
use fyuse_gfx::sync::GpuFence;
use fyuse_gfx::texture::{Texture, TextureDescriptor};
use glow::HasContext;
use glutin::config::{Config, ConfigTemplateBuilder};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext,
    PossiblyCurrentGlContext, Version,
};
use glutin::display::{Display, GetGlDisplay, GlDisplay};
use glutin::surface::{GlSurface, PbufferSurface, Surface, SurfaceAttributesBuilder, WindowSurface};
use glutin_winit::{DisplayBuilder, GlWindow};
use raw_window_handle::HasRawWindowHandle;
use std::cell::RefCell;
use std::ffi::CString;
use std::num::NonZeroU32;
use std::rc::Rc;
use std::time::Duration;
use winit::event_loop::EventLoopWindowTarget;
use winit::window::WindowBuilder;

enum Surf {
    Window(Surface<WindowSurface>),
    Pbuffer(Surface<PbufferSurface>),
}

pub struct GlGfxContext {
    gl: Rc<glow::Context>,
    display: Display,
    config: Config,
    context: RefCell<PossiblyCurrentContext>,
    surface: Surf,
    capabilities: GfxCapabilities,
    stats: Rc<RefCell<PipelineStatistics>>,
    derivable: bool,
}

impl GlGfxContext {
    /// Creates the primary context driving a window. This is the constructor an embedding
    /// application (or a test harness with a hidden window) calls once at startup.
    pub fn new(
        window_target: &EventLoopWindowTarget<()>,
        window_builder: WindowBuilder,
    ) -> Result<Self, FrameworkError> {
        let template = ConfigTemplateBuilder::new().prefer_hardware_accelerated(Some(true));

        let (window, config) = DisplayBuilder::new()
            .with_window_builder(Some(window_builder))
            .build(window_target, template, |mut configs| {
                configs.next().unwrap()
            })
            .map_err(|e| FrameworkError::Custom(e.to_string()))?;
        let window = window.ok_or_else(|| {
            FrameworkError::Custom("failed to create a window for the GL context".into())
        })?;

        let display = config.display();
        let raw_window_handle = window.raw_window_handle();

        let context_attributes = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(raw_window_handle));

        let attrs = window.build_surface_attributes(Default::default());
        let surface = unsafe {
            display
                .create_window_surface(&config, &attrs)
                .map_err(|e| FrameworkError::Custom(e.to_string()))?
        };

        let not_current = unsafe {
            display
                .create_context(&config, &context_attributes)
                .map_err(|e| FrameworkError::Custom(e.to_string()))?
        };
        let context = not_current
            .make_current(&surface)
            .map_err(|e| FrameworkError::Custom(e.to_string()))?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| {
                display.get_proc_address(&CString::new(s).unwrap()) as *const _
            })
        };

        Self::from_parts(gl, display, config, context, Surf::Window(surface), true)
    }

    fn from_parts(
        gl: glow::Context,
        display: Display,
        config: Config,
        context: PossiblyCurrentContext,
        surface: Surf,
        derivable: bool,
    ) -> Result<Self, FrameworkError> {
        let capabilities = unsafe {
            GfxCapabilities {
                max_texture_size: gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE) as usize,
                max_draw_buffers: gl.get_parameter_i32(glow::MAX_DRAW_BUFFERS) as usize,
                max_fragment_uniform_vectors: gl
                    .get_parameter_i32(glow::MAX_FRAGMENT_UNIFORM_VECTORS)
                    as usize,
            }
        };

        Ok(Self {
            gl: Rc::new(gl),
            display,
            config,
            context: RefCell::new(context),
            surface,
            capabilities,
            stats: Rc::new(RefCell::new(PipelineStatistics::default())),
            derivable,
        })
    }
}

impl GfxContext for GlGfxContext {
    fn create_texture(
        &self,
        desc: TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<Texture, FrameworkError> {
        let texture = GlTexture::new(self.gl.clone(), desc, data)?;
        Ok(Texture(Rc::new(texture)))
    }

    fn create_frame_buffer(
        &self,
        color_attachments: Vec<Attachment>,
    ) -> Result<FrameBuffer, FrameworkError> {
        let fbo = GlFrameBuffer::new(self.gl.clone(), color_attachments, self.stats.clone())?;
        Ok(FrameBuffer::new(fbo))
    }

    fn update_color_attachment(
        &self,
        framebuffer: &FrameBuffer,
        index: usize,
        texture: Texture,
    ) -> Result<(), FrameworkError> {
        let mut fb = framebuffer.0.borrow_mut();
        let gl_fb = fb
            .as_any_mut()
            .downcast_mut::<GlFrameBuffer>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;
        gl_fb.replace_attachment(index, Attachment { texture })
    }

    fn create_buffer(
        &self,
        size: usize,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> Result<GpuBuffer, FrameworkError> {
        let buffer = GlBuffer::new(self.gl.clone(), size, kind, usage)?;
        Ok(GpuBuffer(Rc::new(buffer)))
    }

    fn create_geometry_buffer(
        &self,
        desc: GeometryBufferDescriptor,
    ) -> Result<GeometryBuffer, FrameworkError> {
        let geometry = GlGeometryBuffer::new(self.gl.clone(), desc)?;
        Ok(GeometryBuffer(Rc::new(geometry)))
    }

    fn create_program(
        &self,
        name: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<GpuProgram, FrameworkError> {
        let program = GlProgram::new(self.gl.clone(), name, vertex_source, fragment_source)?;
        Ok(GpuProgram(Rc::new(program)))
    }

    fn create_async_read_buffer(
        &self,
        pixel_size: usize,
        pixel_count: usize,
    ) -> Result<AsyncReadBuffer, FrameworkError> {
        let buffer =
            crate::read_buffer::GlAsyncReadBuffer::new(self.gl.clone(), pixel_size, pixel_count)?;
        Ok(AsyncReadBuffer(Rc::new(buffer)))
    }

    fn create_derived(&self) -> Result<Box<dyn GfxContext>, FrameworkError> {
        if !self.derivable {
            return Err(FrameworkError::ContextUnavailable);
        }

        let context_attributes = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .with_sharing(&self.context.borrow())
            .build(None);

        let not_current = unsafe {
            self.display
                .create_context(&self.config, &context_attributes)
                .map_err(|e| FrameworkError::Custom(e.to_string()))?
        };

        let pbuffer_attrs = SurfaceAttributesBuilder::<PbufferSurface>::new().build(
            NonZeroU32::new(1).unwrap(),
            NonZeroU32::new(1).unwrap(),
        );
        let surface = unsafe {
            self.display
                .create_pbuffer_surface(&self.config, &pbuffer_attrs)
                .map_err(|e| FrameworkError::Custom(e.to_string()))?
        };

        let context = not_current
            .make_current(&surface)
            .map_err(|e| FrameworkError::Custom(e.to_string()))?;

        let display = self.display.clone();
        let gl = unsafe {
            glow::Context::from_loader_function(|s| {
                display.get_proc_address(&CString::new(s).unwrap()) as *const _
            })
        };

        let derived = Self::from_parts(
            gl,
            self.display.clone(),
            self.config.clone(),
            context,
            Surf::Pbuffer(surface),
            false,
        )?;

        Ok(Box::new(derived))
    }

    fn make_current(&self) -> Result<(), FrameworkError> {
        let context = self.context.borrow();
        match &self.surface {
            Surf::Window(s) => context
                .make_current(s)
                .map_err(|e| FrameworkError::Custom(e.to_string())),
            Surf::Pbuffer(s) => context
                .make_current(s)
                .map_err(|e| FrameworkError::Custom(e.to_string())),
        }
    }

    fn flush(&self) {
        unsafe {
            self.gl.flush();
        }
    }

    fn finish(&self) {
        unsafe {
            self.gl.finish();
        }
    }

    fn capabilities(&self) -> GfxCapabilities {
        self.capabilities
    }

    fn pipeline_statistics(&self) -> PipelineStatistics {
        *self.stats.borrow()
    }

    fn reset_pipeline_statistics(&mut self) {
        *self.stats.borrow_mut() = PipelineStatistics::default();
    }

    fn issue_sync(&self) -> Result<GpuFence, FrameworkError> {
        let sync = unsafe {
            self.gl
                .fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)
                .map_err(FrameworkError::Custom)?
        };
        Ok(GpuFence(Box::new(GlFence {
            gl: self.gl.clone(),
            sync,
        })))
    }

    fn wait_client_sync(&self, fence: &GpuFence, timeout: Duration) -> Result<(), FrameworkError> {
        let gl_fence = fence
            .0
            .as_any()
            .downcast_ref::<GlFence>()
            .ok_or(FrameworkError::ContextUnavailable)?;

        let timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;
        let result = unsafe {
            self.gl
                .client_wait_sync(gl_fence.sync, glow::SYNC_FLUSH_COMMANDS_BIT, timeout_ns)
        };

        if matches!(result, glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED) {
            Ok(())
        } else {
            Err(FrameworkError::FenceTimedOut)
        }
    }

    fn remove_sync(&self, fence: GpuFence) {
        // `GlFence::drop` deletes the native sync object; dropping the box is enough.
        drop(fence);
    }
}

