//! Shader compilation/linking and the live uniform-binding object, grounded on
//! `fyrox-graphics/src/gl/program.rs`'s `GlProgram`/`GlShader`.

use crate::texture::GlTexture;
use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::program::{GpuProgramTrait, ProgramBinding, UniformLocation};
use fyuse_gfx::texture::Texture;
use glow::HasContext;
use std::collections::HashMap;
use std::rc::Rc;

pub struct GlProgram {
    gl: Rc<glow::Context>,
    id: glow::Program,
    /// Indexed by the `u32` carried inside [`UniformLocation`].
    locations: Vec<glow::UniformLocation>,
    by_name: HashMap<String, UniformLocation>,
}

impl GlProgram {
    pub fn new(
        gl: Rc<glow::Context>,
        name: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, FrameworkError> {
        unsafe {
            let vertex = compile_shader(&gl, glow::VERTEX_SHADER, name, vertex_source)?;
            let fragment = compile_shader(&gl, glow::FRAGMENT_SHADER, name, fragment_source)?;

            let id = gl.create_program().map_err(FrameworkError::Custom)?;
            gl.attach_shader(id, vertex);
            gl.attach_shader(id, fragment);
            gl.link_program(id);

            let linked = gl.get_program_link_status(id);
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            if !linked {
                let error_message = gl.get_program_info_log(id);
                gl.delete_program(id);
                return Err(FrameworkError::ShaderLinkingFailed {
                    shader_name: name.to_string(),
                    error_message,
                });
            }

            let mut locations = Vec::new();
            let mut by_name = HashMap::new();
            let count = gl.get_active_uniforms(id);
            for i in 0..count {
                if let Some(info) = gl.get_active_uniform(id, i) {
                    if let Some(location) = gl.get_uniform_location(id, &info.name) {
                        let handle = UniformLocation(locations.len() as u32);
                        locations.push(location);
                        by_name.insert(info.name, handle);
                    }
                }
            }

            Ok(Self {
                gl,
                id,
                locations,
                by_name,
            })
        }
    }

    pub fn id(&self) -> glow::Program {
        self.id
    }

    /// Binds this program and returns a binding object the caller can use to upload uniforms for
    /// the draw call it is about to issue.
    pub fn bind(&self) -> GlProgramBinding<'_> {
        unsafe {
            self.gl.use_program(Some(self.id));
        }
        GlProgramBinding {
            gl: &self.gl,
            locations: &self.locations,
            next_texture_unit: 0,
        }
    }
}

unsafe fn compile_shader(
    gl: &glow::Context,
    kind: u32,
    name: &str,
    source: &str,
) -> Result<glow::Shader, FrameworkError> {
    let shader = gl.create_shader(kind).map_err(FrameworkError::Custom)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);

    if !gl.get_shader_compile_status(shader) {
        let error_message = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(FrameworkError::ShaderCompilationFailed {
            shader_name: name.to_string(),
            error_message,
        });
    }

    Ok(shader)
}

impl GpuProgramTrait for GlProgram {
    fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.by_name.get(name).copied()
    }
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_program(self.id);
        }
    }
}

/// Live binding of a [`GlProgram`] during a draw call.
pub struct GlProgramBinding<'a> {
    gl: &'a glow::Context,
    locations: &'a [glow::UniformLocation],
    next_texture_unit: u32,
}

impl<'a> GlProgramBinding<'a> {
    fn resolve(&self, location: UniformLocation) -> Option<&glow::UniformLocation> {
        self.locations.get(location.0 as usize)
    }
}

impl<'a> ProgramBinding for GlProgramBinding<'a> {
    fn set_i32(&mut self, location: UniformLocation, value: i32) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        unsafe {
            self.gl.uniform_1_i32(Some(loc), value);
        }
        Ok(())
    }

    fn set_f32(&mut self, location: UniformLocation, value: f32) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        unsafe {
            self.gl.uniform_1_f32(Some(loc), value);
        }
        Ok(())
    }

    fn set_vec2(&mut self, location: UniformLocation, value: [f32; 2]) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        unsafe {
            self.gl.uniform_2_f32(Some(loc), value[0], value[1]);
        }
        Ok(())
    }

    fn set_vec4(&mut self, location: UniformLocation, value: [f32; 4]) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        unsafe {
            self.gl
                .uniform_4_f32(Some(loc), value[0], value[1], value[2], value[3]);
        }
        Ok(())
    }

    fn set_f32_array(&mut self, location: UniformLocation, values: &[f32]) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        unsafe {
            self.gl.uniform_1_f32_slice(Some(loc), values);
        }
        Ok(())
    }

    fn set_texture(&mut self, location: UniformLocation, texture: &Texture, unit: u32) -> Result<(), FrameworkError> {
        let loc = self
            .resolve(location)
            .ok_or_else(|| FrameworkError::UnableToFindShaderUniform(format!("{location:?}")))?;
        let gl_texture = texture
            .as_any()
            .downcast_ref::<GlTexture>()
            .ok_or(FrameworkError::InvalidFrameBuffer)?;
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(gl_texture.id()));
            self.gl.uniform_1_i32(Some(loc), unit as i32);
        }
        self.next_texture_unit = self.next_texture_unit.max(unit + 1);
        Ok(())
    }
}
