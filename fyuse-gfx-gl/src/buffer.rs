//! `glow`-backed GPU buffer, grounded on `fyrox-graphics/src/gl/buffer.rs`'s `GlBuffer`.

use crate::convert::{buffer_kind_to_gl_target, buffer_usage_to_gl};
use fyuse_gfx::buffer::{BufferKind, BufferUsage, GpuBufferTrait};
use fyuse_gfx::error::FrameworkError;
use glow::HasContext;
use std::rc::Rc;

pub struct GlBuffer {
    gl: Rc<glow::Context>,
    id: glow::Buffer,
    kind: BufferKind,
    usage: BufferUsage,
    size: usize,
}

impl GlBuffer {
    pub fn new(
        gl: Rc<glow::Context>,
        size: usize,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> Result<Self, FrameworkError> {
        let target = buffer_kind_to_gl_target(kind);
        let gl_usage = buffer_usage_to_gl(usage);

        unsafe {
            let id = gl.create_buffer().map_err(FrameworkError::Custom)?;
            gl.bind_buffer(target, Some(id));
            gl.buffer_data_size(target, size as i32, gl_usage);
            gl.bind_buffer(target, None);
            Ok(Self {
                gl,
                id,
                kind,
                usage,
                size,
            })
        }
    }

    pub fn id(&self) -> glow::Buffer {
        self.id
    }
}

impl GpuBufferTrait for GlBuffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn size(&self) -> usize {
        self.size
    }

    fn write_data(&self, data: &[u8]) -> Result<(), FrameworkError> {
        if data.len() > self.size {
            return Err(FrameworkError::InvalidTextureData {
                expected_data_size: self.size,
                actual_data_size: data.len(),
            });
        }

        let target = buffer_kind_to_gl_target(self.kind);
        unsafe {
            self.gl.bind_buffer(target, Some(self.id));
            self.gl.buffer_sub_data_u8_slice(target, 0, data);
            self.gl.bind_buffer(target, None);
        }

        Ok(())
    }

    fn read_data(&self, data: &mut [u8]) -> Result<(), FrameworkError> {
        if data.len() > self.size {
            return Err(FrameworkError::InvalidTextureData {
                expected_data_size: self.size,
                actual_data_size: data.len(),
            });
        }

        let target = buffer_kind_to_gl_target(self.kind);
        unsafe {
            self.gl.bind_buffer(target, Some(self.id));
            self.gl.get_buffer_sub_data(target, 0, data);
            self.gl.bind_buffer(target, None);
        }

        Ok(())
    }
}

impl Drop for GlBuffer {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_buffer(self.id);
        }
    }
}
