//! Convolution weight packaging: computes how a `[outChannels][inChannels][kernel][kernel]`
//! weight tensor is split across render passes and multi-render-target (MRT) groups for GPU
//! execution. Grounded on `fyusenet/gpu/convweightarrayKxKxNxM.{h,cpp}`. Offsets and pass counts
//! only — no numeric kernel data is produced or consumed here (`spec.md` §1 scope).

use fyuse_tensor::shape::PIXEL_PACKING;

/// Describes how a convolution's weights are laid out across render passes once packed for GPU
/// execution. One `WeightPackage` is computed per compiled convolution layer; the layout order
/// (inner to outer) is kernel-x, render-target, kernel-y, input-pass, output-pass — i.e. a weight
/// element's linear offset is addressed as `[outPass][inPass][kernelY][renderTarget][kernelX]`.
#[derive(Clone, Debug)]
pub struct WeightPackage {
    kernel: usize,
    input_channels: usize,
    output_channels: usize,
    padded_input_channels: usize,
    padded_output_channels: usize,
    input_render_passes: usize,
    /// Number of render targets written by each output pass, one entry per output pass.
    mrt: Vec<usize>,
    /// Output-channel offset (in units of 4, i.e. in groups) of each output pass.
    mrt_offsets: Vec<usize>,
}

impl WeightPackage {
    /// Computes the packaging for a convolution with `input_channels` in, `output_channels` out,
    /// a `kernel`x`kernel` footprint, capped at `max_render_targets` simultaneous render targets
    /// per pass. Mirrors `ConvWeightArrayKxKxNxM`'s constructor.
    pub fn new(kernel: usize, input_channels: usize, output_channels: usize, max_render_targets: usize) -> Self {
        debug_assert!(kernel > 0);
        debug_assert!(input_channels > 0 && output_channels > 0);
        debug_assert!(max_render_targets > 0);

        let padded_input_channels = pad_to_packing(input_channels);
        let padded_output_channels = pad_to_packing(output_channels);
        let input_render_passes = padded_input_channels / PIXEL_PACKING;

        let mut mrt = Vec::new();
        let mut mrt_offsets = Vec::new();
        let mut remaining = output_channels;
        let mut offset_groups = 0usize;
        while remaining > 0 {
            let groups_this_pass = max_render_targets.min(div_ceil(remaining, PIXEL_PACKING));
            mrt.push(groups_this_pass);
            mrt_offsets.push(offset_groups);
            let channels_this_pass = groups_this_pass * PIXEL_PACKING;
            remaining = remaining.saturating_sub(channels_this_pass);
            offset_groups += groups_this_pass;
        }

        Self {
            kernel,
            input_channels,
            output_channels,
            padded_input_channels,
            padded_output_channels,
            input_render_passes,
            mrt,
            mrt_offsets,
        }
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn padded_input_channels(&self) -> usize {
        self.padded_input_channels
    }

    pub fn padded_output_channels(&self) -> usize {
        self.padded_output_channels
    }

    /// Number of render passes needed to feed every input channel group through the shader.
    pub fn input_render_passes(&self) -> usize {
        self.input_render_passes
    }

    /// Number of render passes needed to produce every output channel group.
    pub fn output_render_passes(&self) -> usize {
        self.mrt.len()
    }

    /// Render targets written by output pass `pass`.
    pub fn render_targets(&self, pass: usize) -> usize {
        self.mrt[pass]
    }

    /// Output-channel-group offset (in units of 4 channels) of output pass `pass`.
    pub fn render_target_offset(&self, pass: usize) -> usize {
        self.mrt_offsets[pass]
    }

    /// Linear offset of the weight element at `(output_pass, input_pass, kernel_y, render_target,
    /// kernel_x)` within the packed weight buffer, following the layout order documented on
    /// [`WeightPackage`].
    pub fn element_offset(
        &self,
        output_pass: usize,
        input_pass: usize,
        kernel_y: usize,
        render_target: usize,
        kernel_x: usize,
    ) -> usize {
        let rt_count = self.mrt[output_pass];
        debug_assert!(render_target < rt_count);
        debug_assert!(input_pass < self.input_render_passes);
        debug_assert!(kernel_x < self.kernel && kernel_y < self.kernel);

        let x_stride = 1usize;
        let rt_stride = self.kernel * x_stride;
        let y_stride = rt_count * rt_stride;
        let ipass_stride = self.kernel * y_stride;
        let opass_stride = self.input_render_passes * ipass_stride;

        output_pass * opass_stride
            + input_pass * ipass_stride
            + kernel_y * y_stride
            + render_target * rt_stride
            + kernel_x * x_stride
    }
}

fn pad_to_packing(channels: usize) -> usize {
    div_ceil(channels, PIXEL_PACKING) * PIXEL_PACKING
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `spec.md` §8 worked example 4: inC=12, outC=16, kernel=3, maxRT=4 must produce
    /// inputRenderPasses=3, outputRenderPasses=1.
    #[test]
    fn worked_example_four_matches_spec() {
        let pkg = WeightPackage::new(3, 12, 16, 4);
        assert_eq!(pkg.input_render_passes(), 3);
        assert_eq!(pkg.output_render_passes(), 1);
        assert_eq!(pkg.render_targets(0), 4);
        assert_eq!(pkg.render_target_offset(0), 0);
    }

    #[test]
    fn output_channels_exceeding_one_pass_split_across_passes() {
        // 20 output channels, maxRT=4: 5 groups of 4 needed, capped at 4 per pass -> passes of
        // 4,1 groups (16 then 4 channels).
        let pkg = WeightPackage::new(1, 4, 20, 4);
        assert_eq!(pkg.output_render_passes(), 2);
        assert_eq!(pkg.render_targets(0), 4);
        assert_eq!(pkg.render_targets(1), 1);
        assert_eq!(pkg.render_target_offset(1), 4);
    }

    #[test]
    fn non_multiple_of_four_channels_pad_up() {
        let pkg = WeightPackage::new(3, 9, 7, 4);
        assert_eq!(pkg.padded_input_channels(), 12);
        assert_eq!(pkg.padded_output_channels(), 8);
        assert_eq!(pkg.input_render_passes(), 3);
    }

    #[test]
    fn element_offset_is_injective_within_one_pass() {
        let pkg = WeightPackage::new(3, 12, 16, 4);
        let mut seen = std::collections::HashSet::new();
        for ipass in 0..pkg.input_render_passes() {
            for ky in 0..pkg.kernel() {
                for rt in 0..pkg.render_targets(0) {
                    for kx in 0..pkg.kernel() {
                        let off = pkg.element_offset(0, ipass, ky, rt, kx);
                        assert!(seen.insert(off), "duplicate offset {off}");
                    }
                }
            }
        }
    }
}
