//! The proxy quad's vertex array object, grounded on `fyrox-graphics/src/gl/geometry_buffer.rs`.
//! Every FyuseNet draw call shares the same `[x, y, u, v]` vertex layout, so unlike the teacher's
//! geometry buffer this one has no per-call vertex-declaration bookkeeping.

use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::geometry_buffer::{GeometryBufferDescriptor, GeometryBufferTrait};
use glow::HasContext;
use std::cell::Cell;
use std::rc::Rc;

pub struct GlGeometryBuffer {
    gl: Rc<glow::Context>,
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    ebo: glow::Buffer,
    index_count: Cell<usize>,
}

impl GlGeometryBuffer {
    pub fn new(gl: Rc<glow::Context>, desc: GeometryBufferDescriptor) -> Result<Self, FrameworkError> {
        unsafe {
            let vao = gl.create_vertex_array().map_err(FrameworkError::Custom)?;
            let vbo = gl.create_buffer().map_err(FrameworkError::Custom)?;
            let ebo = gl.create_buffer().map_err(FrameworkError::Custom)?;

            gl.bind_vertex_array(Some(vao));

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(desc.vertices),
                glow::STATIC_DRAW,
            );

            let stride = 4 * std::mem::size_of::<f32>() as i32;
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 2 * std::mem::size_of::<f32>() as i32);

            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(desc.indices),
                glow::STATIC_DRAW,
            );

            gl.bind_vertex_array(None);

            Ok(Self {
                gl,
                vao,
                vbo,
                ebo,
                index_count: Cell::new(desc.indices.len()),
            })
        }
    }

    pub fn vao(&self) -> glow::VertexArray {
        self.vao
    }
}

impl GeometryBufferTrait for GlGeometryBuffer {
    fn index_count(&self) -> usize {
        self.index_count.get()
    }

    fn set_vertices(&self, vertices: &[f32]) -> Result<(), FrameworkError> {
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            self.gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, bytemuck::cast_slice(vertices));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(())
    }
}

impl Drop for GlGeometryBuffer {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_vertex_array(self.vao);
            self.gl.delete_buffer(self.vbo);
            self.gl.delete_buffer(self.ebo);
        }
    }
}
