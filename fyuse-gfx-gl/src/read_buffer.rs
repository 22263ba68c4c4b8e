//! Async GPU→CPU pixel read-back, grounded directly on `fyrox-graphics/src/gl/read_buffer.rs`'s
//! `GlAsyncReadBuffer`: blit into a PBO, fence the command stream, poll the fence non-blockingly
//! with a zero-timeout `client_wait_sync` to avoid a GPU stall, map and copy once it signals.

use crate::buffer::GlBuffer;
use crate::framebuffer::GlFrameBuffer;
use fyuse_gfx::buffer::{BufferKind, BufferUsage, GpuBufferTrait};
use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::framebuffer::{FrameBufferTrait, Rect};
use fyuse_gfx::read_buffer::AsyncReadBufferTrait;
use fyuse_gfx::texture::GpuTextureTrait;
use glow::HasContext;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

struct ReadRequest {
    fence: glow::Fence,
    byte_count: usize,
}

pub struct GlAsyncReadBuffer {
    gl: Rc<glow::Context>,
    buffer: GlBuffer,
    pixel_size: usize,
    pixel_count: usize,
    request: RefCell<Option<ReadRequest>>,
    running: Cell<bool>,
}

impl GlAsyncReadBuffer {
    pub fn new(
        gl: Rc<glow::Context>,
        pixel_size: usize,
        pixel_count: usize,
    ) -> Result<Self, FrameworkError> {
        let buffer = GlBuffer::new(
            gl.clone(),
            pixel_size * pixel_count,
            BufferKind::PixelRead,
            BufferUsage::StreamRead,
        )?;

        Ok(Self {
            gl,
            buffer,
            pixel_size,
            pixel_count,
            request: RefCell::new(None),
            running: Cell::new(false),
        })
    }
}

impl AsyncReadBufferTrait for GlAsyncReadBuffer {
    fn schedule_pixels_transfer(
        &self,
        framebuffer: &dyn FrameBufferTrait,
        color_buffer_index: u32,
        rect: Option<Rect>,
    ) -> Result<(), FrameworkError> {
        if self.running.get() {
            return Err(FrameworkError::ReadBackAlreadyPending);
        }

        let gl_fb = framebuffer
            .as_any()
            .downcast_ref::<GlFrameBuffer>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;

        let rect = rect.unwrap_or_else(|| {
            let (w, h) = gl_fb
                .color_attachments()
                .first()
                .map(|a| (a.texture.width() as i32, a.texture.height() as i32))
                .unwrap_or((0, 0));
            Rect::new(w, h)
        });

        let byte_count = (rect.width as usize) * (rect.height as usize) * self.pixel_size;
        if byte_count > self.pixel_size * self.pixel_count {
            return Err(FrameworkError::InvalidTextureData {
                expected_data_size: self.pixel_size * self.pixel_count,
                actual_data_size: byte_count,
            });
        }

        unsafe {
            self.gl
                .bind_framebuffer(glow::READ_FRAMEBUFFER, gl_fb.id());
            self.gl
                .read_buffer(glow::COLOR_ATTACHMENT0 + color_buffer_index);
            self.gl
                .bind_buffer(glow::PIXEL_PACK_BUFFER, Some(self.buffer.id()));
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                glow::RGBA,
                glow::FLOAT,
                glow::PixelPackData::BufferOffset(0),
            );
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);

            let fence = self
                .gl
                .fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)
                .map_err(FrameworkError::Custom)?;

            *self.request.borrow_mut() = Some(ReadRequest { fence, byte_count });
        }

        self.running.set(true);
        Ok(())
    }

    fn is_request_running(&self) -> bool {
        self.running.get()
    }

    fn try_read(&self) -> Option<Vec<u8>> {
        let request = self.request.borrow_mut().take()?;

        let signaled = unsafe {
            // Zero timeout: a non-blocking poll. A blocking `client_wait_sync` with a real
            // timeout would stall the calling thread on the GPU, which defeats the point of
            // polling from the driving thread.
            matches!(
                self.gl
                    .client_wait_sync(request.fence, 0, 0),
                glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED
            )
        };

        if !signaled {
            *self.request.borrow_mut() = Some(request);
            return None;
        }

        let mut data = vec![0u8; request.byte_count];
        let result = self.buffer.read_data(&mut data);

        unsafe {
            self.gl.delete_sync(request.fence);
        }
        self.running.set(false);

        result.ok().map(|_| data)
    }

    fn wait_read(&self, timeout: Duration) -> Result<Vec<u8>, FrameworkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(data) = self.try_read() {
                return Ok(data);
            }
            if Instant::now() >= deadline {
                self.running.set(false);
                self.request.borrow_mut().take();
                return Err(FrameworkError::FenceTimedOut);
            }
            std::thread::yield_now();
        }
    }
}
