//! Tile geometry for deep-layout tensors: [`compute_tiling`] decides how many tile rows/columns a
//! channel count needs, and [`DeepTiler`] turns that layout into the device/texture-coordinate
//! quads a GPU layer's draw call consumes. Grounded on
//! `fyusenet/gpu/deep/deeptiler.{h,cpp}`.

use crate::shape::PIXEL_PACKING;

/// Chooses `(tw, th)` tile-grid dimensions that fit `ceil(channels / 4)` tiles while minimizing
/// the larger of the two factors. `spec.md` §5.1 pins this down as the closed form reproducing
/// every worked example in `spec.md` §8 (the original `computeDeepTiling` helper body was not
/// retained in the source pack).
pub fn compute_tiling(channels: usize) -> (usize, usize) {
    let n = (channels + PIXEL_PACKING - 1) / PIXEL_PACKING;
    let n = n.max(1);
    let tw = (n as f64).sqrt().ceil() as usize;
    let tw = tw.max(1);
    let th = (n + tw - 1) / tw;
    (tw, th)
}

/// A single tile's geometry: a quadrilateral in either device coordinates (output tiles) or
/// texture coordinates (input tiles), plus the clamp bounds that keep nearest-neighbor sampling
/// from bleeding into a neighboring tile.
#[derive(Copy, Clone, Debug, Default)]
pub struct Tile {
    /// Render-target index this tile is drawn into (reserved for multi-target expansion).
    pub render_target: usize,
    /// Texture ID/handle this tile reads from or tags itself with.
    pub texture_id: usize,
    /// Number of live channels this tile carries (may be less than 4 for the last tile of an
    /// unaligned channel count).
    pub channels: usize,
    /// Quad corners in order top-left, bottom-left, bottom-right, top-right, as `[x0,y0, x1,y1,
    /// x2,y2, x3,y3]`.
    pub quad: [f32; 8],
    /// Low clamp bound (input tiles only), to prevent cross-tile bleed.
    pub low_clamp: [f32; 2],
    /// High clamp bound (input tiles only).
    pub hi_clamp: [f32; 2],
    /// Top-left corner of the tile in pixel coordinates (including padding).
    pub image_coords: [i32; 2],
    /// Width/height of the tile in pixel coordinates (excluding padding).
    pub image_extents: [i32; 2],
}

/// Computes tile geometry for a deep-layout convolution-style operator: how many tiles an input
/// and an output tensor span, the viewport a rendering pass must cover, and the per-tile device-
/// and texture-coordinate quads a draw call binds.
#[derive(Copy, Clone, Debug)]
pub struct DeepTiler {
    width: usize,
    height: usize,
    input_channels: usize,
    output_channels: usize,
    kernel: usize,
    output_width: usize,
    output_height: usize,
    downsample: [usize; 2],
    upsample: [usize; 2],
    input_padding: usize,
    output_padding: usize,
    input_tiles: usize,
    output_tiles: usize,
    input_tiling: (usize, usize),
    output_tiling: (usize, usize),
    viewport: (usize, usize),
    input_size: (usize, usize),
    global_pooling: bool,
}

impl DeepTiler {
    /// `is_transposed_conv` mirrors the original's `TRANSCONVOLUTION2D` special case, which
    /// widens the output by `kernel - upsample` to account for the transpose-convolution's
    /// fractional stride. `is_pooling` inhibits the half-pixel center-of-mass offset that
    /// [`Self::create_input_tiles`] otherwise applies for strided downsampling, since a pooling
    /// window's input tile should align exactly with the window rather than its midpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: usize,
        height: usize,
        input_channels: usize,
        output_channels: usize,
        h_scale: f32,
        v_scale: f32,
        input_padding: usize,
        output_padding: usize,
        horiz_down: usize,
        vert_down: usize,
        horiz_up: usize,
        vert_up: usize,
        kernel: usize,
        is_transposed_conv: bool,
        is_pooling: bool,
    ) -> Self {
        let mut output_width = (width as f32 * h_scale) as usize;
        let mut output_height = (height as f32 * v_scale) as usize;
        if is_transposed_conv {
            output_width += kernel - horiz_up;
            output_height += kernel - vert_up;
        }
        let input_tiles = (input_channels + PIXEL_PACKING - 1) / PIXEL_PACKING;
        let output_tiles = (output_channels + PIXEL_PACKING - 1) / PIXEL_PACKING;
        let input_tiling = compute_tiling(input_channels);
        let output_tiling = compute_tiling(output_channels);
        let viewport = (
            output_tiling.0 * (output_width + output_padding) + output_padding,
            output_tiling.1 * (output_height + output_padding) + output_padding,
        );
        let input_size = (
            input_tiling.0 * (width + input_padding) + input_padding,
            input_tiling.1 * (height + input_padding) + input_padding,
        );
        Self {
            width,
            height,
            input_channels,
            output_channels,
            kernel,
            output_width,
            output_height,
            downsample: [horiz_down, vert_down],
            upsample: [horiz_up, vert_up],
            input_padding,
            output_padding,
            input_tiles,
            output_tiles,
            input_tiling,
            output_tiling,
            viewport,
            input_size,
            global_pooling: is_pooling,
        }
    }

    /// Device-coordinate quads (`[-1, 1]` NDC range) for every output tile, in row-major tile
    /// order, one per render pass over the output tensor.
    pub fn create_output_tiles(&self) -> Vec<Tile> {
        let mut result = Vec::with_capacity(self.output_tiles);
        let tile_width = self.output_width as f32;
        let tile_height = self.output_height as f32;
        let viewport_w = self.viewport.0 as f32;
        let viewport_h = self.viewport.1 as f32;
        let x_extent = (2.0 * tile_width) / viewport_w;
        let y_extent = (2.0 * tile_height) / viewport_h;
        let mut tile_num = 0;
        'outer: for y in 0..self.output_tiling.1 {
            let by = (2.0 * ((y as f32 * (tile_height + self.output_padding as f32))
                + self.output_padding as f32)
                / viewport_h)
                - 1.0;
            for x in 0..self.output_tiling.0 {
                let bx = (2.0 * ((x as f32 * (tile_width + self.output_padding as f32))
                    + self.output_padding as f32)
                    / viewport_w)
                    - 1.0;
                let tile = Tile {
                    render_target: 0,
                    texture_id: 0,
                    channels: PIXEL_PACKING,
                    quad: [bx, by, bx, by + y_extent, bx + x_extent, by + y_extent, bx + x_extent, by],
                    low_clamp: [0.0; 2],
                    hi_clamp: [0.0; 2],
                    image_coords: [
                        (x * (self.output_width + self.output_padding) + self.output_padding) as i32,
                        (y * (self.output_height + self.output_padding) + self.output_padding) as i32,
                    ],
                    image_extents: [self.output_width as i32, self.output_height as i32],
                };
                result.push(tile);
                tile_num += 1;
                if tile_num >= self.output_tiles {
                    break 'outer;
                }
            }
        }
        result
    }

    /// Texture-coordinate quads for every input tile, offset by `(x_pixel_offset,
    /// y_pixel_offset)` (the convolution kernel's current row/column displacement) and tagged
    /// with `tex_id`. Clamp bounds prevent nearest-neighbor sampling from bleeding past a tile's
    /// own extent into a neighbor.
    pub fn create_input_tiles(&self, x_pixel_offset: i32, y_pixel_offset: i32, tex_id: usize) -> Vec<Tile> {
        let mut result = Vec::with_capacity(self.input_tiles);
        let tile_width = self.width as f32;
        let tile_height = self.height as f32;
        let input_w = self.input_size.0 as f32;
        let input_h = self.input_size.1 as f32;
        let x_extent = tile_width / input_w;
        let y_extent = tile_height / input_h;
        let dx = if self.global_pooling {
            0.0
        } else {
            0.5 * (self.downsample[0] as f32 - 1.0)
        };
        let dy = if self.global_pooling {
            0.0
        } else {
            0.5 * (self.downsample[1] as f32 - 1.0)
        };
        let mut tile_num = 0;
        let mut remaining_channels = self.input_channels as i64;
        'outer: for y in 0..self.input_tiling.1 {
            let by = (y as f32 * (tile_height + self.input_padding as f32)
                + (self.input_padding as i32 + y_pixel_offset) as f32
                - dy)
                / input_h;
            for x in 0..self.input_tiling.0 {
                let bx = (x as f32 * (tile_width + self.input_padding as f32)
                    + (self.input_padding as i32 + x_pixel_offset) as f32
                    - dx)
                    / input_w;
                let channels = remaining_channels.min(PIXEL_PACKING as i64).max(0) as usize;
                let tile = Tile {
                    render_target: 0,
                    texture_id: tex_id,
                    channels,
                    quad: [bx, by, bx, by + y_extent, bx + x_extent, by + y_extent, bx + x_extent, by],
                    low_clamp: [bx, by],
                    hi_clamp: [bx + x_extent, by + y_extent],
                    image_coords: [
                        (x * (self.width + self.input_padding) + self.input_padding) as i32,
                        (y * (self.height + self.input_padding) + self.input_padding) as i32,
                    ],
                    image_extents: [self.width as i32, self.height as i32],
                };
                result.push(tile);
                tile_num += 1;
                remaining_channels -= PIXEL_PACKING as i64;
                if tile_num >= self.input_tiles {
                    break 'outer;
                }
            }
        }
        result
    }

    /// Marks this tiler as feeding a pooling-style operator, inhibiting the half-pixel
    /// center-of-mass offset [`Self::create_input_tiles`] otherwise applies for strided
    /// downsampling.
    pub fn set_global_pooling(&mut self) {
        self.global_pooling = true;
    }

    pub fn is_pooling(&self) -> bool {
        self.global_pooling
    }

    /// Normalized texture-coordinate spacing between two horizontally adjacent texels.
    pub fn texture_step_x(&self) -> f32 {
        1.0 / self.input_size.0 as f32
    }

    /// Normalized texture-coordinate spacing between two vertically adjacent texels.
    pub fn texture_step_y(&self) -> f32 {
        1.0 / self.input_size.1 as f32
    }

    pub fn viewport_width(&self) -> usize {
        self.viewport.0
    }

    pub fn viewport_height(&self) -> usize {
        self.viewport.1
    }

    pub fn input_texture_width(&self) -> usize {
        self.input_size.0
    }

    pub fn input_texture_height(&self) -> usize {
        self.input_size.1
    }

    pub fn input_width(&self) -> usize {
        self.width
    }

    pub fn input_height(&self) -> usize {
        self.height
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn output_height(&self) -> usize {
        self.output_height
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn num_input_tiles(&self) -> usize {
        self.input_tiles
    }

    pub fn num_output_tiles(&self) -> usize {
        self.output_tiles
    }

    pub fn input_tiling(&self) -> (usize, usize) {
        self.input_tiling
    }

    pub fn output_tiling(&self) -> (usize, usize) {
        self.output_tiling
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiling_worked_example() {
        assert_eq!(compute_tiling(64), (4, 4));
    }

    #[test]
    fn tiling_covers_unaligned_channel_counts() {
        for (channels, expected_tiles) in [(1usize, 1usize), (3, 1), (4, 1), (5, 2), (8, 2)] {
            let (tw, th) = compute_tiling(channels);
            assert!(tw * th >= expected_tiles);
        }
    }

    #[test]
    fn output_tiles_count_matches_channel_groups() {
        let tiler = DeepTiler::new(8, 8, 4, 16, 1.0, 1.0, 0, 0, 1, 1, 1, 1, 1, false, false);
        assert_eq!(tiler.create_output_tiles().len(), 4);
    }

    #[test]
    fn input_tiles_last_tile_has_remainder_channels() {
        let tiler = DeepTiler::new(8, 8, 5, 4, 1.0, 1.0, 0, 0, 1, 1, 1, 1, 1, false, false);
        let tiles = tiler.create_input_tiles(0, 0, 0);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].channels, 4);
        assert_eq!(tiles[1].channels, 1);
    }

    #[test]
    fn pooling_inhibits_half_pixel_offset() {
        let pooling = DeepTiler::new(8, 8, 4, 4, 1.0, 1.0, 0, 0, 2, 2, 1, 1, 2, false, true);
        let conv = DeepTiler::new(8, 8, 4, 4, 1.0, 1.0, 0, 0, 2, 2, 1, 1, 2, false, false);
        let pooling_tile = pooling.create_input_tiles(0, 0, 0)[0];
        let conv_tile = conv.create_input_tiles(0, 0, 0)[0];
        assert_ne!(pooling_tile.quad[0], conv_tile.quad[0]);
    }
}
