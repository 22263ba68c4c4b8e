//! Host-side tensor storage: a plain byte buffer sized and typed by a [`BufferShape`]. Grounded on
//! `fyusenet/cpu/cpubuffer.cpp`.

use crate::shape::{BufferShape, StorageOrder, PIXEL_PACKING};
use crate::tiling::DeepTiler;
use bytemuck::Pod;
use fyuse_core::CoreError;
use fyuse_gfx::read_buffer::AsyncReadBufferTrait;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

/// A tensor's data held in ordinary host memory, typed and sized by a [`BufferShape`].
#[derive(Debug)]
pub struct CPUBuffer {
    shape: BufferShape,
    data: Vec<u8>,
    sequence_no: u64,
}

impl CPUBuffer {
    /// Allocates a zeroed buffer sized for `shape`.
    pub fn new(shape: BufferShape) -> Self {
        let size = shape.bytes();
        Self {
            shape,
            data: vec![0u8; size],
            sequence_no: 0,
        }
    }

    pub fn shape(&self) -> &BufferShape {
        &self.shape
    }

    pub fn bytes(&self) -> usize {
        self.shape.bytes()
    }

    /// Sequence number of the async download request this buffer's content was last refreshed
    /// from, for correlating against a `StateToken`-driven generation loop.
    pub fn sequence_no(&self) -> u64 {
        self.sequence_no
    }

    /// Reinterprets this buffer's bytes as a slice of `T`.
    pub fn map<T: Pod>(&self) -> &[T] {
        bytemuck::cast_slice(&self.data)
    }

    /// Mutable counterpart of [`Self::map`].
    pub fn map_mut<T: Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Performs a deep copy into `target`, or allocates a fresh buffer of the same shape when
    /// `target` is `None`.
    pub fn copy_to(&self, target: Option<CPUBuffer>) -> Result<CPUBuffer, CoreError> {
        let mut target = match target {
            Some(t) => {
                if t.shape != self.shape {
                    return Err(CoreError::Protocol(
                        "cannot copy buffer to incompatible target buffer".into(),
                    ));
                }
                t
            }
            None => CPUBuffer::new(self.shape),
        };
        target.data.copy_from_slice(&self.data);
        target.sequence_no = self.sequence_no;
        Ok(target)
    }

    /// Converts to [`StorageOrder::Channelwise`]. Per `spec.md` §4.3, only matching-order copies
    /// and the `deep -> channelwise`/`shallow -> channelwise` reformats are implemented; every
    /// other source order fails with [`CoreError::UnsupportedConversion`].
    pub fn to_channelwise(&self) -> Result<CPUBuffer, CoreError> {
        match self.shape.data_order() {
            StorageOrder::Channelwise => {
                let mut target = CPUBuffer::new(self.shape);
                target.data.copy_from_slice(&self.data);
                target.sequence_no = self.sequence_no;
                Ok(target)
            }
            StorageOrder::GpuDeep | StorageOrder::GpuShallow => {
                let target_shape = self.shape.as_order(StorageOrder::Channelwise)?;
                let mut target = CPUBuffer::new(target_shape);
                reformat_to_channelwise_bytes(
                    &self.data,
                    &mut target.data,
                    &self.shape,
                    self.shape.data_type().type_size(),
                );
                target.sequence_no = self.sequence_no;
                Ok(target)
            }
            StorageOrder::GpuSequence => Err(CoreError::UnsupportedConversion {
                from: "GPU_SEQUENCE",
                to: "CHANNELWISE",
            }),
        }
    }

    /// Converts to [`StorageOrder::GpuShallow`]. Only a source already in that order is
    /// supported today.
    pub fn to_gpu_shallow(&self) -> Result<CPUBuffer, CoreError> {
        if self.shape.data_order() != StorageOrder::GpuShallow {
            return Err(CoreError::UnsupportedConversion {
                from: "<unconverted>",
                to: "GPU_SHALLOW",
            });
        }
        let mut target = CPUBuffer::new(self.shape);
        target.data.copy_from_slice(&self.data);
        target.sequence_no = self.sequence_no;
        Ok(target)
    }

    /// Converts to [`StorageOrder::GpuDeep`]. Only a source already in that order is supported
    /// today.
    pub fn to_gpu_deep(&self) -> Result<CPUBuffer, CoreError> {
        if self.shape.data_order() != StorageOrder::GpuDeep {
            return Err(CoreError::UnsupportedConversion {
                from: "<unconverted>",
                to: "GPU_DEEP",
            });
        }
        let mut target = CPUBuffer::new(self.shape);
        target.data.copy_from_slice(&self.data);
        target.sequence_no = self.sequence_no;
        Ok(target)
    }

    /// Reformats this buffer's content into plain channelwise byte order, regardless of its own
    /// storage order, for debug dumping (mirrors `CPUBuffer::write`'s internal reformatting,
    /// which is the one place the original implements every conversion it otherwise leaves as
    /// `TODO`). There is no channelwise representation of a `GPU_SEQUENCE` buffer, so that order
    /// is passed through unchanged.
    pub fn to_channelwise_bytes<T: Pod + bytemuck::Zeroable>(&self) -> Vec<T> {
        match self.shape.data_order() {
            StorageOrder::Channelwise => self.map::<T>().to_vec(),
            StorageOrder::GpuShallow => {
                let len = self.channelwise_element_count();
                let mut out = vec![T::zeroed(); len];
                shallow_to_channelwise::<T>(self.map::<T>(), &mut out, &self.shape, 0);
                out
            }
            StorageOrder::GpuDeep => {
                let len = self.channelwise_element_count();
                let mut out = vec![T::zeroed(); len];
                deep_to_channelwise::<T>(self.map::<T>(), &mut out, &self.shape);
                out
            }
            StorageOrder::GpuSequence => self.map::<T>().to_vec(),
        }
    }

    /// Debug convenience: dumps this buffer's content, reformatted into channelwise byte order,
    /// to `path`. Mirrors `CPUBuffer::write`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let bytes: Vec<u8> = self.to_channelwise_bytes::<u8>();
        let mut file = std::fs::File::create(path.as_ref())
            .map_err(|e| CoreError::Resource(format!("cannot open {:?} for writing: {e}", path.as_ref())))?;
        file.write_all(&bytes)
            .map_err(|e| CoreError::Resource(format!("cannot write to {:?}: {e}", path.as_ref())))
    }

    /// Element count of this buffer's content once reformatted into channelwise order (including
    /// the zeroed padding border the original's debug dump keeps), for an element type whose size
    /// matches [`BufferShape::data_type`].
    fn channelwise_element_count(&self) -> usize {
        self.shape.bytes_as(StorageOrder::Channelwise).unwrap_or(0) / self.shape.data_type().type_size()
    }

    /// Reads the result of a scheduled async pixel transfer into this buffer, failing if the
    /// transfer holds more bytes than this buffer can hold. Sets [`Self::sequence_no`] to
    /// `sequence_no` on success.
    pub fn read_from_pbo(
        &mut self,
        read_buffer: &dyn AsyncReadBufferTrait,
        timeout: Duration,
        sequence_no: u64,
    ) -> Result<(), CoreError> {
        let bytes = read_buffer.wait_read(timeout)?;
        if bytes.len() > self.data.len() {
            return Err(CoreError::Protocol(
                "refusing to read from PBO as this would exceed buffer size".into(),
            ));
        }
        self.data[..bytes.len()].copy_from_slice(&bytes);
        self.sequence_no = sequence_no;
        Ok(())
    }
}

/// Byte-granular `deep -> channelwise` / `shallow -> channelwise` reformat backing
/// [`CPUBuffer::to_channelwise`]: works directly on raw bytes (at `item_size` stride) rather than
/// on a caller-chosen `Pod` type, since `to_channelwise` has no type parameter of its own.
fn reformat_to_channelwise_bytes(src: &[u8], tgt: &mut [u8], shape: &BufferShape, item_size: usize) {
    let padding = shape.padding();
    match shape.data_order() {
        StorageOrder::GpuDeep => {
            let (tile_w, tile_h) = shape
                .tile_extent()
                .expect("a GPU_DEEP shape always carries a tile extent");
            let (tw, th) = compute_tiling(shape.channels());
            let swidth = shape.width();
            let mut channel = 0usize;
            'tiles: for ty in 0..th {
                for tx in 0..tw {
                    let rem = (shape.channels() - channel).min(PIXEL_PACKING);
                    for l in 0..rem {
                        for y in 0..tile_h {
                            for x in 0..tile_w {
                                let sx = padding + tx * (tile_w + padding) + x;
                                let sy = padding + ty * (tile_h + padding) + y;
                                let src_idx = ((sy * swidth + sx) * PIXEL_PACKING + l) * item_size;
                                let dst_idx = (channel * (tile_w * tile_h) + y * tile_w + x) * item_size;
                                tgt[dst_idx..dst_idx + item_size]
                                    .copy_from_slice(&src[src_idx..src_idx + item_size]);
                            }
                        }
                        channel += 1;
                    }
                    if channel >= shape.channels() {
                        break 'tiles;
                    }
                }
            }
        }
        StorageOrder::GpuShallow => {
            let inner_w = shape.width() - 2 * padding;
            let inner_h = shape.height() - 2 * padding;
            let swidth = shape.width();
            let slice_stride = swidth * shape.height() * PIXEL_PACKING;
            for channel in 0..shape.channels() {
                let slice = channel / PIXEL_PACKING;
                let lane = channel % PIXEL_PACKING;
                for y in 0..inner_h {
                    for x in 0..inner_w {
                        let sx = x + padding;
                        let sy = y + padding;
                        let src_idx =
                            (slice * slice_stride + (sy * swidth + sx) * PIXEL_PACKING + lane) * item_size;
                        let dst_idx = (channel * (inner_w * inner_h) + y * inner_w + x) * item_size;
                        tgt[dst_idx..dst_idx + item_size]
                            .copy_from_slice(&src[src_idx..src_idx + item_size]);
                    }
                }
            }
        }
        StorageOrder::Channelwise | StorageOrder::GpuSequence => {
            tgt.copy_from_slice(&src[..tgt.len()]);
        }
    }
}

/// Reformats a `GPU_DEEP`-ordered slice into plain channelwise order.
fn deep_to_channelwise<T: Pod>(src: &[T], tgt: &mut [T], shape: &BufferShape) {
    let padding = shape.padding();
    let (tile_w, tile_h) = shape
        .tile_extent()
        .expect("a GPU_DEEP shape always carries a tile extent");
    let tiler = DeepTiler::new(
        tile_w,
        tile_h,
        shape.channels(),
        shape.channels(),
        1.0,
        1.0,
        0,
        padding,
        1,
        1,
        1,
        1,
        1,
        false,
        false,
    );
    let lwidth = tile_w + 2 * padding;
    let lheight = tile_h + 2 * padding;
    let swidth = tiler.viewport_width();
    let twidth = tiler.input_width();
    let theight = tiler.input_height();
    let (output_tw, output_th) = tiler.output_tiling();
    let mut channel_offset = 0usize;
    'tiles: for ty in 0..output_th {
        for tx in 0..output_tw {
            let rem = (shape.channels() - channel_offset).min(PIXEL_PACKING);
            let in_base = ((padding + ty * (theight + padding)) * swidth + padding + tx * (twidth + padding))
                * PIXEL_PACKING;
            for l in 0..rem {
                let out_base = channel_offset * (lwidth * lheight);
                for y in padding..lheight {
                    for x in padding..lwidth {
                        tgt[out_base + x + y * lwidth] = src[in_base + (y * swidth + x) * PIXEL_PACKING + l];
                    }
                }
                channel_offset += 1;
            }
            if channel_offset >= shape.channels() {
                break 'tiles;
            }
        }
    }
}

/// Reformats a `GPU_SHALLOW`-ordered slice into plain channelwise order, starting at
/// `channel_offset` in the output. Mirrors the `GpuShallow` arm of
/// [`reformat_to_channelwise_bytes`]: every channel group lives in its own contiguous
/// `width * height` RGBA-packed slice (`slice_stride` apart), the per-channel lane inside a texel
/// is `channel % PIXEL_PACKING`, and the inner (unpadded) extent is `width/height - 2*padding`.
fn shallow_to_channelwise<T: Pod>(src: &[T], tgt: &mut [T], shape: &BufferShape, channel_offset: usize) {
    let padding = shape.padding();
    let inner_w = shape.width() - 2 * padding;
    let inner_h = shape.height() - 2 * padding;
    let swidth = shape.width();
    let slice_stride = swidth * shape.height() * PIXEL_PACKING;
    for channel in 0..shape.channels() {
        let slice = channel / PIXEL_PACKING;
        let lane = channel % PIXEL_PACKING;
        for y in 0..inner_h {
            for x in 0..inner_w {
                let sx = x + padding;
                let sy = y + padding;
                let src_idx = slice * slice_stride + (sy * swidth + sx) * PIXEL_PACKING + lane;
                let dst_idx = (channel_offset + channel) * (inner_w * inner_h) + y * inner_w + x;
                tgt[dst_idx] = src[src_idx];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ElementType;

    #[test]
    fn new_buffer_is_zeroed_and_sized() {
        let shape = BufferShape::new(4, 4, 4, 0, ElementType::Float32, StorageOrder::Channelwise);
        let buf = CPUBuffer::new(shape);
        assert_eq!(buf.bytes(), 4 * 4 * 4 * 4);
        assert!(buf.map::<f32>().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn copy_to_new_target_matches_source() {
        let shape = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::Channelwise);
        let mut buf = CPUBuffer::new(shape);
        buf.map_mut::<f32>()[0] = 42.0;
        let copy = buf.copy_to(None).unwrap();
        assert_eq!(copy.map::<f32>()[0], 42.0);
    }

    #[test]
    fn copy_to_incompatible_target_fails() {
        let a = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::Channelwise);
        let b = BufferShape::new(3, 3, 4, 0, ElementType::Float32, StorageOrder::Channelwise);
        let buf = CPUBuffer::new(a);
        let target = CPUBuffer::new(b);
        assert!(matches!(buf.copy_to(Some(target)), Err(CoreError::Protocol(_))));
    }

    #[test]
    fn to_channelwise_from_channelwise_succeeds() {
        let shape = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::Channelwise);
        let buf = CPUBuffer::new(shape);
        assert!(buf.to_channelwise().is_ok());
    }

    #[test]
    fn to_channelwise_from_deep_reformats_tiles() {
        let shape = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::GpuDeep);
        let mut buf = CPUBuffer::new(shape);
        for (i, v) in buf.map_mut::<f32>().iter_mut().enumerate() {
            *v = i as f32;
        }
        let channelwise = buf.to_channelwise().unwrap();
        assert_eq!(channelwise.shape().data_order(), StorageOrder::Channelwise);
        assert_eq!(channelwise.bytes(), 2 * 2 * 4 * 4);
    }

    #[test]
    fn to_channelwise_from_shallow_reformats_slices() {
        let shape = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::GpuShallow);
        let mut buf = CPUBuffer::new(shape);
        for (i, v) in buf.map_mut::<f32>().iter_mut().enumerate() {
            *v = i as f32;
        }
        let channelwise = buf.to_channelwise().unwrap();
        assert_eq!(channelwise.shape().data_order(), StorageOrder::Channelwise);
        // Channel 0, pixel (0,0) sits at lane 0 of the first texel.
        assert_eq!(channelwise.map::<f32>()[0], buf.map::<f32>()[0]);
    }

    /// `spec.md` §8's "shallow <-> channelwise round-trip (bitwise)" property, exercised over a
    /// channel count that isn't a multiple of `PIXEL_PACKING` (5 channels -> 2 slices, second
    /// slice only half full) so every lane of every slice is covered, not just channel 0.
    #[test]
    fn shallow_to_channelwise_round_trips_every_channel_bitwise() {
        let (h, w, c) = (2usize, 3usize, 5usize);
        let shape = BufferShape::new(h, w, c, 0, ElementType::Float32, StorageOrder::GpuShallow);
        let mut buf = CPUBuffer::new(shape);
        let slice_stride = w * h * PIXEL_PACKING;
        {
            let data = buf.map_mut::<f32>();
            for channel in 0..c {
                let slice = channel / PIXEL_PACKING;
                let lane = channel % PIXEL_PACKING;
                for y in 0..h {
                    for x in 0..w {
                        let value = (channel * 100 + y * 10 + x) as f32;
                        data[slice * slice_stride + (y * w + x) * PIXEL_PACKING + lane] = value;
                    }
                }
            }
        }
        let channelwise = buf.to_channelwise_bytes::<f32>();
        for channel in 0..c {
            for y in 0..h {
                for x in 0..w {
                    let expected = (channel * 100 + y * 10 + x) as f32;
                    let idx = channel * (w * h) + y * w + x;
                    assert_eq!(
                        channelwise[idx], expected,
                        "channel {channel} at ({x},{y}) did not round-trip bitwise"
                    );
                }
            }
        }
    }

    #[test]
    fn to_channelwise_from_sequence_is_unsupported() {
        let shape = BufferShape::new_sequence(8, 4, ElementType::Float32);
        let buf = CPUBuffer::new(shape);
        assert!(matches!(
            buf.to_channelwise(),
            Err(CoreError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn deep_to_channelwise_bytes_round_trips_identity_layout() {
        let shape = BufferShape::new(2, 2, 4, 0, ElementType::Float32, StorageOrder::GpuDeep);
        let mut buf = CPUBuffer::new(shape);
        for (i, v) in buf.map_mut::<f32>().iter_mut().enumerate() {
            *v = i as f32;
        }
        let channelwise = buf.to_channelwise_bytes::<f32>();
        assert_eq!(channelwise.len(), 4 * 2 * 2);
    }
}
