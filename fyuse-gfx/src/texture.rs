//! GPU texture descriptors and the trait a backend implements to back a [`Texture`] handle.
//!
//! FyuseNet only ever renders to and samples from plain rectangular 2D textures (there are no
//! cubemaps, texture arrays, or volume textures anywhere in the pipeline), so unlike a general
//! purpose renderer this module has no texture-kind enum beyond `width`/`height`.

use crate::error::FrameworkError;
use fyuse_core::{define_as_any_trait, define_shared_wrapper};

/// The GPU-side pixel representation of a texture. Maps onto a `StorageOrder`-aware element type
/// one level up, in `fyuse-tensor`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PixelFormat {
    /// Single 16-bit float channel.
    R16F,
    /// Four 16-bit float channels.
    Rgba16F,
    /// Four 32-bit float channels, used for the `HIGH_PRECISION` compile-time path.
    Rgba32F,
    /// Four 8-bit unsigned normalized channels.
    Rgba8,
    /// Single 32-bit signed integer channel, used for index/token buffers.
    R32I,
}

impl PixelFormat {
    /// Number of bytes a single texel of this format occupies.
    pub fn texel_size(self) -> usize {
        match self {
            PixelFormat::R16F => 2,
            PixelFormat::Rgba16F => 8,
            PixelFormat::Rgba32F => 16,
            PixelFormat::Rgba8 => 4,
            PixelFormat::R32I => 4,
        }
    }

    /// Number of channels a texel of this format carries.
    pub fn channel_count(self) -> usize {
        match self {
            PixelFormat::R16F | PixelFormat::R32I => 1,
            PixelFormat::Rgba16F | PixelFormat::Rgba32F | PixelFormat::Rgba8 => 4,
        }
    }
}

/// Minification filter applied when sampling a texture smaller on screen than its native size.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum MinificationFilter {
    /// Nearest-neighbor sampling; this is what every FyuseNet layer uses, since each texel
    /// corresponds to an exact tensor element and any smoothing would corrupt the data.
    #[default]
    Nearest,
    /// Linear interpolation between the four closest texels.
    Linear,
}

/// Magnification filter, same rationale as [`MinificationFilter`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum MagnificationFilter {
    /// Nearest-neighbor sampling.
    #[default]
    Nearest,
    /// Linear interpolation.
    Linear,
}

/// How texture coordinates outside `[0, 1]` are resolved.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum WrapMode {
    /// Clamp to the edge texel. This is the only mode FyuseNet layers use: tiled deep tensors and
    /// padded shallow tensors both rely on explicit padding rather than wrap-around sampling.
    #[default]
    ClampToEdge,
    /// Repeat the texture.
    Repeat,
}

/// Describes a texture to be created through [`crate::server::GfxContext::create_texture`].
#[derive(Clone, Debug)]
pub struct TextureDescriptor {
    /// Width in texels.
    pub width: usize,
    /// Height in texels.
    pub height: usize,
    /// Pixel format.
    pub pixel_format: PixelFormat,
    /// Minification filter.
    pub min_filter: MinificationFilter,
    /// Magnification filter.
    pub mag_filter: MagnificationFilter,
    /// Horizontal wrap mode.
    pub s_wrap_mode: WrapMode,
    /// Vertical wrap mode.
    pub t_wrap_mode: WrapMode,
}

impl TextureDescriptor {
    /// A descriptor for a nearest-filtered, clamped render target of the given size and format —
    /// the shape every intermediate tensor texture takes.
    pub fn render_target(width: usize, height: usize, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            min_filter: MinificationFilter::Nearest,
            mag_filter: MagnificationFilter::Nearest,
            s_wrap_mode: WrapMode::ClampToEdge,
            t_wrap_mode: WrapMode::ClampToEdge,
        }
    }
}

define_as_any_trait!(GpuTextureAsAny => GpuTextureTrait);

/// Trait implemented by a backend's concrete texture object.
pub trait GpuTextureTrait: GpuTextureAsAny {
    /// Width in texels.
    fn width(&self) -> usize;
    /// Height in texels.
    fn height(&self) -> usize;
    /// Pixel format the texture was created with.
    fn pixel_format(&self) -> PixelFormat;
    /// Uploads `data` as the entire contents of the texture. The length of `data` must equal
    /// `width * height * pixel_format.texel_size()`. Takes `&self`, not `&mut self`: textures are
    /// shared between producer and consumer layers through the [`Texture`] handle (an `Rc`), so
    /// backends hold their native object ID behind interior mutability the same way
    /// `fyrox-graphics`'s `GpuTexture` does.
    fn set_data(&self, data: &[u8]) -> Result<(), FrameworkError>;
}

define_shared_wrapper!(Texture<dyn GpuTextureTrait>);
