//! `glow`-backed 2D texture, grounded on `fyrox-graphics/src/gl/texture.rs`'s `GlTexture`.

use crate::convert::pixel_descriptor;
use fyuse_gfx::error::FrameworkError;
use fyuse_gfx::texture::{GpuTextureTrait, PixelFormat, TextureDescriptor};
use glow::HasContext;
use std::rc::Rc;

use crate::convert::{mag_filter_to_gl, min_filter_to_gl, wrap_mode_to_gl};

pub struct GlTexture {
    gl: Rc<glow::Context>,
    id: glow::Texture,
    width: usize,
    height: usize,
    pixel_format: PixelFormat,
}

impl GlTexture {
    pub fn new(
        gl: Rc<glow::Context>,
        desc: TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<Self, FrameworkError> {
        let expected = desc.width * desc.height * desc.pixel_format.texel_size();
        if let Some(data) = data {
            if data.len() != expected {
                return Err(FrameworkError::InvalidTextureData {
                    expected_data_size: expected,
                    actual_data_size: data.len(),
                });
            }
        }

        let fmt = pixel_descriptor(desc.pixel_format);

        unsafe {
            let id = gl
                .create_texture()
                .map_err(FrameworkError::Custom)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(id));
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                min_filter_to_gl(desc.min_filter),
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                mag_filter_to_gl(desc.mag_filter),
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                wrap_mode_to_gl(desc.s_wrap_mode),
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                wrap_mode_to_gl(desc.t_wrap_mode),
            );
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                fmt.internal_format,
                desc.width as i32,
                desc.height as i32,
                0,
                fmt.format,
                fmt.data_type,
                data,
            );
            gl.bind_texture(glow::TEXTURE_2D, None);

            Ok(Self {
                gl,
                id,
                width: desc.width,
                height: desc.height,
                pixel_format: desc.pixel_format,
            })
        }
    }

    pub fn id(&self) -> glow::Texture {
        self.id
    }
}

impl GpuTextureTrait for GlTexture {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn set_data(&self, data: &[u8]) -> Result<(), FrameworkError> {
        let expected = self.width * self.height * self.pixel_format.texel_size();
        if data.len() != expected {
            return Err(FrameworkError::InvalidTextureData {
                expected_data_size: expected,
                actual_data_size: data.len(),
            });
        }

        let fmt = pixel_descriptor(self.pixel_format);

        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.id));
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                self.width as i32,
                self.height as i32,
                fmt.format,
                fmt.data_type,
                glow::PixelUnpackData::Slice(Some(data)),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }

        Ok(())
    }
}

impl Drop for GlTexture {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_texture(self.id);
        }
    }
}
