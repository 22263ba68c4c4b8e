//! Cross-cutting per-layer modifiers. Bit values are reused verbatim from
//! `fyusenet/base/layerflags.h` so that a ported parameter file (whose quantization/activation
//! encoding was written against those bits) keeps meaning unchanged.

use bitflags::bitflags;

bitflags! {
    /// A bit-mask carried by a compiled layer, translated from a builder's higher-level
    /// `ActType`/`NormType`/residual configuration by [`crate::builder::LayerBuilderCommon::flags`].
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct LayerFlags: u32 {
        /// This layer has an extra input added element-wise to its result.
        const RESIDUAL_INPUT = 1;
        /// The residual input should be subject to a ReLU before being added.
        const RELU_ON_RESIDUAL = 2;
        /// Batch-norm (post) should also be applied on the residual.
        const BATCHNORM_ON_RESIDUAL = 4;
        /// This layer rescales/biases its output on write (batchnorm-type postfix).
        const POST_BATCHNORM = 8;
        /// This layer uses the deep tensor memory layout for GPU execution.
        const DEEP = 16;
        /// ReLU applied to the output on write. Not supported by GPU layers.
        const POST_RELU = 32;
        /// ReLU applied to the input on read.
        const PRE_RELU = 64;
        /// Clipping applied to the input on read.
        const PRE_CLIP = 128;
        /// Sigmoid applied to the input on read.
        const PRE_SIGMOID = 256;
        /// Tanh applied to the input on read.
        const PRE_TANH = 512;
        /// SiLU applied to the input on read.
        const PRE_SILU = 1024;
        /// GeLU applied to the input on read.
        const PRE_GELU = 2048;
    }
}

impl LayerFlags {
    /// Every bit that represents *some* activation, pre- or post-fix.
    pub const ACT_MASK: LayerFlags = LayerFlags::from_bits_truncate(
        LayerFlags::PRE_RELU.bits()
            | LayerFlags::PRE_CLIP.bits()
            | LayerFlags::PRE_SIGMOID.bits()
            | LayerFlags::PRE_TANH.bits()
            | LayerFlags::POST_RELU.bits()
            | LayerFlags::PRE_SILU.bits()
            | LayerFlags::PRE_GELU.bits(),
    );

    /// Every bit that represents a pre-fix (read-time) activation.
    pub const PRE_ACT_MASK: LayerFlags = LayerFlags::from_bits_truncate(
        LayerFlags::PRE_RELU.bits()
            | LayerFlags::PRE_CLIP.bits()
            | LayerFlags::PRE_SIGMOID.bits()
            | LayerFlags::PRE_TANH.bits()
            | LayerFlags::PRE_SILU.bits()
            | LayerFlags::PRE_GELU.bits(),
    );

    /// `true` if this layer uses the deep tensor layout.
    pub fn is_deep(self) -> bool {
        self.contains(LayerFlags::DEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_values_match_original_assignment() {
        assert_eq!(LayerFlags::RESIDUAL_INPUT.bits(), 1);
        assert_eq!(LayerFlags::RELU_ON_RESIDUAL.bits(), 2);
        assert_eq!(LayerFlags::BATCHNORM_ON_RESIDUAL.bits(), 4);
        assert_eq!(LayerFlags::POST_BATCHNORM.bits(), 8);
        assert_eq!(LayerFlags::DEEP.bits(), 16);
        assert_eq!(LayerFlags::POST_RELU.bits(), 32);
        assert_eq!(LayerFlags::PRE_RELU.bits(), 64);
        assert_eq!(LayerFlags::PRE_CLIP.bits(), 128);
        assert_eq!(LayerFlags::PRE_SIGMOID.bits(), 256);
        assert_eq!(LayerFlags::PRE_TANH.bits(), 512);
        assert_eq!(LayerFlags::PRE_SILU.bits(), 1024);
        assert_eq!(LayerFlags::PRE_GELU.bits(), 2048);
    }

    #[test]
    fn act_mask_covers_every_activation_bit() {
        let mask = LayerFlags::ACT_MASK;
        assert!(mask.contains(LayerFlags::POST_RELU));
        assert!(mask.contains(LayerFlags::PRE_RELU));
        assert!(!mask.contains(LayerFlags::DEEP));
    }

    #[test]
    fn is_deep_reads_the_deep_bit() {
        let flags = LayerFlags::DEEP | LayerFlags::RESIDUAL_INPUT;
        assert!(flags.is_deep());
        assert!(!LayerFlags::RESIDUAL_INPUT.is_deep());
    }
}
