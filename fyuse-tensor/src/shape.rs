//! [`BufferShape`]: the single, unified description of a tensor's dimensions, storage order and
//! element type. Grounded on `fyusenet/base/buffershape.cpp`'s `BufferShape` (the Open Question
//! about unifying it with `CPUBufferShape` is resolved in `DESIGN.md` — there is only this one
//! type here).

use crate::cpu_buffer::CPUBuffer;
use crate::tiling::compute_tiling;
use fyuse_core::CoreError;

/// Number of channels packed into a single GPU texel on every GPU-side storage order.
pub const PIXEL_PACKING: usize = 4;

/// The element type a tensor's bytes are interpreted as.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ElementType {
    Float32,
    Float16,
    Int32,
    UInt32,
    Int16,
    UInt16,
    Int8,
    UInt8,
}

impl ElementType {
    /// Size in bytes of a single element of this type.
    pub fn type_size(self) -> usize {
        match self {
            ElementType::Float32 | ElementType::Int32 | ElementType::UInt32 => 4,
            ElementType::Float16 | ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int8 | ElementType::UInt8 => 1,
        }
    }
}

/// How a tensor's elements are arranged in memory or across GPU textures.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StorageOrder {
    /// Plain host-layout `[C][H][W]` array. No tiling, no pixel packing.
    Channelwise,
    /// One texture per group of 4 channels, each padded symmetrically by `padding` texels.
    GpuShallow,
    /// A single texture tiled as `tw x th` subrectangles, 4 channels packed per tile (RGBA).
    GpuDeep,
    /// One row per token, 4 embedding elements packed per texel; height is sequence capacity.
    GpuSequence,
}

impl StorageOrder {
    fn name(self) -> &'static str {
        match self {
            StorageOrder::Channelwise => "CHANNELWISE",
            StorageOrder::GpuShallow => "GPU_SHALLOW",
            StorageOrder::GpuDeep => "GPU_DEEP",
            StorageOrder::GpuSequence => "GPU_SEQUENCE",
        }
    }
}

fn pad_channels(channels: usize) -> usize {
    PIXEL_PACKING * ((channels + PIXEL_PACKING - 1) / PIXEL_PACKING)
}

/// Immutable value type describing a tensor's dimensions, padding, element type and storage
/// order. Construction with [`StorageOrder::GpuDeep`] computes the tile layout up front and
/// rewrites `width`/`height` to the textured extents; the original per-tile width/height are kept
/// around (`tile_width`/`tile_height`) so [`BufferShape::as_order`] can round-trip back out of the
/// deep layout.
#[derive(Copy, Clone, Debug)]
pub struct BufferShape {
    width: usize,
    height: usize,
    channels: usize,
    padding: usize,
    data_type: ElementType,
    data_order: StorageOrder,
    /// Only meaningful for `GPU_DEEP`: the per-tile width/height before tiling was applied.
    tile_extent: Option<(usize, usize)>,
}

impl PartialEq for BufferShape {
    fn eq(&self, other: &Self) -> bool {
        self.data_order == other.data_order
            && self.data_type == other.data_type
            && self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
            && self.padding == other.padding
    }
}

impl Eq for BufferShape {}

impl BufferShape {
    /// Constructs a shape for `height x width x channels`, with `padding` applied symmetrically on
    /// every spatial side. For [`StorageOrder::GpuDeep`] this also computes the tile layout via
    /// [`compute_tiling`] and rewrites `width`/`height` into the full tiled-texture extents, per
    /// invariant 1 of `spec.md` §3: `textureWidth = tw * (W + p) + p`.
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        padding: usize,
        data_type: ElementType,
        order: StorageOrder,
    ) -> Self {
        if order == StorageOrder::GpuDeep {
            let (tw, th) = compute_tiling(channels);
            Self {
                width: tw * (width + padding) + padding,
                height: th * (height + padding) + padding,
                channels,
                padding,
                data_type,
                data_order: order,
                tile_extent: Some((width, height)),
            }
        } else {
            Self {
                width: width + 2 * padding,
                height: height + 2 * padding,
                channels,
                padding,
                data_type,
                data_order: order,
                tile_extent: None,
            }
        }
    }

    /// Constructs a shape for a [`StorageOrder::GpuSequence`] tensor: `width` is the embedding
    /// dimension (in elements, not texels — see `spec.md`'s Open Questions), `height` is the
    /// sequence capacity (the maximum length, not the logical length carried in a `StateToken`).
    /// Padding is not meaningful for sequence tensors and is always 0.
    pub fn new_sequence(embed_dim: usize, seq_len: usize, data_type: ElementType) -> Self {
        Self::new_sequence_packed(embed_dim, seq_len, data_type, PIXEL_PACKING)
    }

    /// Same as [`Self::new_sequence`] but with an explicit channel-packing factor instead of the
    /// default 4.
    pub fn new_sequence_packed(
        embed_dim: usize,
        seq_len: usize,
        data_type: ElementType,
        packing: usize,
    ) -> Self {
        Self {
            width: embed_dim,
            height: seq_len,
            channels: packing,
            padding: 0,
            data_type,
            data_order: StorageOrder::GpuSequence,
            tile_extent: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn data_type(&self) -> ElementType {
        self.data_type
    }

    pub fn data_order(&self) -> StorageOrder {
        self.data_order
    }

    /// The per-tile width/height a [`StorageOrder::GpuDeep`] shape was originally constructed
    /// with, before tiling inflated `width`/`height`. `None` for every other order.
    pub fn tile_extent(&self) -> Option<(usize, usize)> {
        self.tile_extent
    }

    /// Number of bytes this shape occupies in its own (`data_order`) storage order.
    pub fn bytes(&self) -> usize {
        if self.width * self.height * self.channels == 0 {
            return 0;
        }
        let type_size = self.data_type.type_size();
        match self.data_order {
            StorageOrder::Channelwise => self.width * self.height * self.channels * type_size,
            StorageOrder::GpuShallow => {
                self.width * self.height * pad_channels(self.channels) * type_size
            }
            StorageOrder::GpuDeep => self.width * self.height * PIXEL_PACKING * type_size,
            // See spec.md's Open Questions: no channel factor here, preserved as observed.
            StorageOrder::GpuSequence => self.width * self.height * type_size,
        }
    }

    /// Number of bytes this tensor would occupy *if* stored in order `target`, without actually
    /// converting. Returns [`CoreError::UnsupportedConversion`] for the conversions the original
    /// engine never implemented (notably anything out of `GPU_SEQUENCE`).
    pub fn bytes_as(&self, target: StorageOrder) -> Result<usize, CoreError> {
        if self.width * self.height * self.channels == 0 {
            return Ok(0);
        }
        let type_size = self.data_type.type_size();
        let bytes = match self.data_order {
            StorageOrder::GpuDeep => {
                let (tw, th) = self
                    .tile_extent
                    .expect("a GPU_DEEP shape always carries a tile extent");
                match target {
                    StorageOrder::Channelwise => {
                        (tw + 2 * self.padding) * (th + 2 * self.padding) * self.channels * type_size
                    }
                    StorageOrder::GpuShallow => {
                        (tw + 2 * self.padding)
                            * (th + 2 * self.padding)
                            * pad_channels(self.channels)
                            * type_size
                    }
                    StorageOrder::GpuSequence => self.width * self.height * type_size,
                    StorageOrder::GpuDeep => self.bytes(),
                }
            }
            StorageOrder::GpuShallow => match target {
                StorageOrder::Channelwise => self.width * self.height * self.channels * type_size,
                StorageOrder::GpuDeep => {
                    let (tw, th) = compute_tiling(self.channels);
                    let tile_w = self.width - 2 * self.padding;
                    let tile_h = self.height - 2 * self.padding;
                    let fin_w = tw * (tile_w + self.padding) + self.padding;
                    let fin_h = th * (tile_h + self.padding) + self.padding;
                    fin_w * fin_h * PIXEL_PACKING * type_size
                }
                StorageOrder::GpuSequence => self.width * self.height * type_size,
                StorageOrder::GpuShallow => self.bytes(),
            },
            StorageOrder::GpuSequence => {
                return Err(CoreError::UnsupportedConversion {
                    from: StorageOrder::GpuSequence.name(),
                    to: target.name(),
                });
            }
            StorageOrder::Channelwise => match target {
                StorageOrder::GpuShallow => {
                    self.width * self.height * pad_channels(self.channels) * type_size
                }
                StorageOrder::GpuDeep => {
                    let (tw, th) = compute_tiling(self.channels);
                    let tile_w = self.width - 2 * self.padding;
                    let tile_h = self.height - 2 * self.padding;
                    let fin_w = tw * (tile_w + self.padding) + self.padding;
                    let fin_h = th * (tile_h + self.padding) + self.padding;
                    fin_w * fin_h * PIXEL_PACKING * type_size
                }
                StorageOrder::GpuSequence => self.width * self.height * type_size,
                StorageOrder::Channelwise => self.bytes(),
            },
        };
        Ok(bytes)
    }

    /// Derives a new shape in `new_order`, preserving every non-derived field (channel count,
    /// padding, element type, and — for a deep source — the original per-tile extents). Fails for
    /// `GPU_SEQUENCE`, which has no supported outbound conversion.
    pub fn as_order(&self, new_order: StorageOrder) -> Result<BufferShape, CoreError> {
        match self.data_order {
            StorageOrder::Channelwise | StorageOrder::GpuShallow => Ok(BufferShape::new(
                self.height - 2 * self.padding,
                self.width - 2 * self.padding,
                self.channels,
                self.padding,
                self.data_type,
                new_order,
            )),
            StorageOrder::GpuDeep => {
                let (tw, th) = self
                    .tile_extent
                    .expect("a GPU_DEEP shape always carries a tile extent");
                Ok(BufferShape::new(
                    th,
                    tw,
                    self.channels,
                    self.padding,
                    self.data_type,
                    new_order,
                ))
            }
            StorageOrder::GpuSequence => Err(CoreError::UnsupportedConversion {
                from: StorageOrder::GpuSequence.name(),
                to: new_order.name(),
            }),
        }
    }

    /// The number of per-4-channel slices (textures for shallow, tiles for deep) this shape
    /// requires: `ceil(channels / 4)`.
    pub fn slice_count(&self) -> usize {
        (self.channels + PIXEL_PACKING - 1) / PIXEL_PACKING
    }

    /// Allocates a new [`CPUBuffer`] sized and typed per this shape, or `None` for a zero-sized
    /// shape (mirrors `BufferShape::createCPUBuffer` returning `nullptr`).
    pub fn create_cpu_buffer(&self) -> Option<CPUBuffer> {
        if self.width * self.height * self.channels == 0 {
            return None;
        }
        Some(CPUBuffer::new(*self))
    }

    /// Same as [`Self::create_cpu_buffer`], but in storage order `order` instead of this shape's
    /// own order.
    pub fn create_cpu_buffer_as(&self, order: StorageOrder) -> Result<Option<CPUBuffer>, CoreError> {
        let shape = self.as_order(order)?;
        Ok(shape.create_cpu_buffer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channelwise_bytes_match_direct_formula() {
        let shape = BufferShape::new(8, 8, 16, 0, ElementType::Float32, StorageOrder::Channelwise);
        assert_eq!(shape.bytes(), 4096);
        assert_eq!(shape.bytes_as(StorageOrder::GpuShallow).unwrap(), 4 * 4 * 64 * 4);
    }

    #[test]
    fn deep_tiling_worked_example() {
        let shape = BufferShape::new(32, 32, 64, 1, ElementType::Float16, StorageOrder::GpuDeep);
        assert_eq!(shape.slice_count(), 16);
        assert_eq!(shape.width(), 133);
        assert_eq!(shape.height(), 133);
        assert_eq!(shape.bytes(), 133 * 133 * 4 * 2);
    }

    #[test]
    fn bytes_of_own_order_matches_bytes_as_own_order() {
        let shape = BufferShape::new(12, 9, 7, 1, ElementType::Float16, StorageOrder::GpuShallow);
        assert_eq!(shape.bytes(), shape.bytes_as(shape.data_order()).unwrap());
    }

    #[test]
    fn shallow_bytes_for_unaligned_channel_counts() {
        for channels in [1usize, 3, 4, 5, 8] {
            let shape = BufferShape::new(4, 4, channels, 0, ElementType::Float16, StorageOrder::GpuShallow);
            let padded = pad_channels(channels);
            assert_eq!(shape.bytes(), 4 * 4 * padded * 2);
            assert_eq!(shape.slice_count(), (channels + 3) / 4);
        }
    }

    #[test]
    fn sequence_bytes_have_no_channel_factor() {
        let shape = BufferShape::new_sequence(256, 1024, ElementType::Float16);
        assert_eq!(shape.bytes(), 256 * 1024 * 2);
    }

    #[test]
    fn sequence_conversion_is_unsupported() {
        let shape = BufferShape::new_sequence(256, 1024, ElementType::Float16);
        assert!(matches!(
            shape.as_order(StorageOrder::Channelwise),
            Err(CoreError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn as_order_round_trip_preserves_fields() {
        let shape = BufferShape::new(8, 8, 16, 1, ElementType::Float16, StorageOrder::Channelwise);
        let shallow = shape.as_order(StorageOrder::GpuShallow).unwrap();
        let back = shallow.as_order(StorageOrder::Channelwise).unwrap();
        assert_eq!(back.channels(), shape.channels());
        assert_eq!(back.padding(), shape.padding());
        assert_eq!(back.data_type(), shape.data_type());
    }

    #[test]
    fn single_row_sequence_is_valid() {
        let shape = BufferShape::new_sequence(64, 1, ElementType::Float16);
        assert_eq!(shape.height(), 1);
        assert!(shape.bytes() > 0);
    }
}
