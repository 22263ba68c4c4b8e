//! `glow`-backed frame buffer object, grounded on `fyrox-graphics/src/gl/framebuffer.rs`'s
//! `GlFrameBuffer`. FyuseNet frame buffers never carry a depth/stencil attachment, so this is
//! considerably smaller than the teacher's version.

use crate::geometry_buffer::GlGeometryBuffer;
use crate::program::GlProgram;
use crate::texture::GlTexture;
use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::framebuffer::{Attachment, DrawParameters, FrameBufferTrait, Rect};
use fyuse_gfx::geometry_buffer::{DrawCallStatistics, GeometryBuffer};
use fyuse_gfx::program::{GpuProgram, ProgramBinding};
use fyuse_gfx::stats::PipelineStatistics;
use glow::HasContext;
use std::cell::RefCell;
use std::rc::Rc;

pub struct GlFrameBuffer {
    gl: Rc<glow::Context>,
    id: Option<glow::Framebuffer>,
    attachments: Vec<Attachment>,
    stats: Rc<RefCell<PipelineStatistics>>,
}

impl GlFrameBuffer {
    /// Constructs a frame buffer backing the given color attachments. `attachments` must be
    /// empty only for the context's default (window-backed) target; FyuseNet never renders to
    /// that target, so in practice this is always non-empty.
    pub fn new(
        gl: Rc<glow::Context>,
        attachments: Vec<Attachment>,
        stats: Rc<RefCell<PipelineStatistics>>,
    ) -> Result<Self, FrameworkError> {
        unsafe {
            let id = gl.create_framebuffer().map_err(FrameworkError::Custom)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(id));

            let mut draw_buffers = Vec::with_capacity(attachments.len());
            for (i, attachment) in attachments.iter().enumerate() {
                let texture = attachment
                    .texture
                    .as_any()
                    .downcast_ref::<GlTexture>()
                    .ok_or(FrameworkError::InvalidFrameBuffer)?;
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0 + i as u32,
                    glow::TEXTURE_2D,
                    Some(texture.id()),
                    0,
                );
                draw_buffers.push(glow::COLOR_ATTACHMENT0 + i as u32);
            }
            gl.draw_buffers(&draw_buffers);

            if gl.check_framebuffer_status(glow::FRAMEBUFFER) != glow::FRAMEBUFFER_COMPLETE {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.delete_framebuffer(id);
                return Err(FrameworkError::FailedToConstructFBO);
            }

            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            Ok(Self {
                gl,
                id: Some(id),
                attachments,
                stats,
            })
        }
    }

    pub fn id(&self) -> Option<glow::Framebuffer> {
        self.id
    }

    /// Rebinds the color attachment at `index` to a new texture in place, without reallocating
    /// the frame buffer object. Used when a layer swaps its output texture (e.g. a ping-pong
    /// buffer between forward passes) but keeps the same draw targets otherwise.
    pub fn replace_attachment(
        &mut self,
        index: usize,
        texture: Attachment,
    ) -> Result<(), FrameworkError> {
        let gl_texture = texture
            .texture
            .as_any()
            .downcast_ref::<GlTexture>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;

        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, self.id);
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0 + index as u32,
                glow::TEXTURE_2D,
                Some(gl_texture.id()),
                0,
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        if index < self.attachments.len() {
            self.attachments[index] = texture;
        } else {
            return Err(FrameworkError::InvalidElementRange {
                start: index,
                end: index,
                total: self.attachments.len(),
            });
        }

        Ok(())
    }
}

impl FrameBufferTrait for GlFrameBuffer {
    fn color_attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    fn clear(&mut self, viewport: Rect, color: [f32; 4]) {
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, self.id);
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width, viewport.height);
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
        self.stats.borrow_mut().framebuffer_binding_changes += 1;
    }

    fn draw(
        &mut self,
        geometry: &GeometryBuffer,
        viewport: Rect,
        program: &GpuProgram,
        params: &DrawParameters,
        apply_uniforms: &mut dyn FnMut(&mut dyn ProgramBinding),
    ) -> Result<DrawCallStatistics, FrameworkError> {
        let gl_program = program
            .as_any()
            .downcast_ref::<GlProgram>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;
        let gl_geometry = geometry
            .as_any()
            .downcast_ref::<GlGeometryBuffer>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;

        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, self.id);
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width, viewport.height);

            match params.blend {
                None => self.gl.disable(glow::BLEND),
                Some(fyuse_gfx::framebuffer::BlendFactor::One) => self.gl.disable(glow::BLEND),
                Some(fyuse_gfx::framebuffer::BlendFactor::OneOnOne) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func(glow::ONE, glow::ONE);
                }
            }
        }

        let mut binding = gl_program.bind();
        apply_uniforms(&mut binding);

        let index_count = gl_geometry.index_count();
        unsafe {
            self.gl.bind_vertex_array(Some(gl_geometry.vao()));
            self.gl
                .draw_elements(glow::TRIANGLES, index_count as i32, glow::UNSIGNED_INT, 0);
            self.gl.bind_vertex_array(None);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        {
            let mut stats = self.stats.borrow_mut();
            stats.draw_calls += 1;
            stats.program_binding_changes += 1;
            stats.framebuffer_binding_changes += 1;
        }

        Ok(DrawCallStatistics {
            triangles: index_count / 3,
        })
    }
}

impl Drop for GlFrameBuffer {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            unsafe {
                self.gl.delete_framebuffer(id);
            }
        }
    }
}
