//! Lookup tables from the backend-agnostic `fyuse-gfx` enums to their GL equivalents. Grounded on
//! `fyrox-graphics/src/gl/texture.rs`'s `PixelKind`→(internal format, format, data type) table and
//! `fyrox-graphics/src/gl/buffer.rs`'s `BufferKind`/`BufferUsage` mapping, narrowed to the handful
//! of formats `spec.md` §3/§6 actually needs.

use fyuse_gfx::buffer::{BufferKind, BufferUsage};
use fyuse_gfx::texture::{MagnificationFilter, MinificationFilter, PixelFormat, WrapMode};

/// The three GL format parameters a texture upload/allocation call needs.
#[derive(Copy, Clone, Debug)]
pub struct GlPixelDescriptor {
    pub internal_format: i32,
    pub format: u32,
    pub data_type: u32,
}

pub fn pixel_descriptor(format: PixelFormat) -> GlPixelDescriptor {
    match format {
        PixelFormat::R16F => GlPixelDescriptor {
            internal_format: glow::R16F as i32,
            format: glow::RED,
            data_type: glow::HALF_FLOAT,
        },
        PixelFormat::Rgba16F => GlPixelDescriptor {
            internal_format: glow::RGBA16F as i32,
            format: glow::RGBA,
            data_type: glow::HALF_FLOAT,
        },
        PixelFormat::Rgba32F => GlPixelDescriptor {
            internal_format: glow::RGBA32F as i32,
            format: glow::RGBA,
            data_type: glow::FLOAT,
        },
        PixelFormat::Rgba8 => GlPixelDescriptor {
            internal_format: glow::RGBA8 as i32,
            format: glow::RGBA,
            data_type: glow::UNSIGNED_BYTE,
        },
        PixelFormat::R32I => GlPixelDescriptor {
            internal_format: glow::R32I as i32,
            format: glow::RED_INTEGER,
            data_type: glow::INT,
        },
    }
}

pub fn min_filter_to_gl(filter: MinificationFilter) -> i32 {
    match filter {
        MinificationFilter::Nearest => glow::NEAREST as i32,
        MinificationFilter::Linear => glow::LINEAR as i32,
    }
}

pub fn mag_filter_to_gl(filter: MagnificationFilter) -> i32 {
    match filter {
        MagnificationFilter::Nearest => glow::NEAREST as i32,
        MagnificationFilter::Linear => glow::LINEAR as i32,
    }
}

pub fn wrap_mode_to_gl(mode: WrapMode) -> i32 {
    match mode {
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE as i32,
        WrapMode::Repeat => glow::REPEAT as i32,
    }
}

pub fn buffer_kind_to_gl_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::PixelRead => glow::PIXEL_PACK_BUFFER,
    }
}

pub fn buffer_usage_to_gl(usage: BufferUsage) -> u32 {
    match usage {
        BufferUsage::StaticDraw => glow::STATIC_DRAW,
        BufferUsage::StreamRead => glow::STREAM_READ,
    }
}
