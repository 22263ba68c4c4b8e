//! Small enumerations a [`crate::builder::LayerBuilder`] accumulates before they are folded into
//! [`crate::flags::LayerFlags`] or consumed directly by a layer. Grounded on
//! `fyusenet/base/layerflags.h`.

/// Activation function a builder may request as a layer's prefix or postfix.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum ActType {
    /// No activation.
    #[default]
    None,
    /// Simple ReLU.
    Relu,
    /// ReLU with a configurable leak (`LayerBuilderCommon::leaky_relu`).
    LeakyRelu,
    /// Clamp to `[low, high]` (`LayerBuilderCommon::clip_low`/`clip_high`).
    Clip,
    /// Sigmoid. Not implemented by any shader in this core; accepted by the builder for parity
    /// with the catalogue, rejected at `LayerFactory::compile_layers` time.
    Sigmoid,
    /// Tanh. Same status as `Sigmoid`.
    Tanh,
    /// SiLU.
    Silu,
    /// GeLU.
    Gelu,
}

/// Postfix normalization a builder may request.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum NormType {
    /// No postfix normalization.
    #[default]
    None,
    /// Batch-norm with fixed parameters loaded from the parameter provider.
    BatchNorm,
}

/// Interpolation used by a scaling/pooling-style layer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum ScalingType {
    /// Nearest-neighbor.
    #[default]
    Nearest,
    /// Bilinear.
    Linear,
}

/// Positional encoding scheme an attention layer may apply to its queries/keys.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum PosEncType {
    /// No positional encoding.
    #[default]
    None,
    /// Rotary positional encoding (RoPE), parameterized by
    /// `AttentionBuilder::rotary_theta_base`.
    Rotary,
}

/// Selection strategy a token-scoring layer applies to its logits.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum ScoringType {
    /// Always pick the highest-scoring token.
    #[default]
    Greedy,
    /// Sample from the top `k` scoring tokens.
    TopK,
    /// Sample from the smallest set of tokens whose cumulative probability exceeds `p`.
    TopP,
}

/// Which compute backend a compiled layer should run on.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum ComputeDevice {
    /// GPU execution through `fyuse-gfx` (the default and common case).
    #[default]
    Gpu,
    /// CPU execution; used for a handful of layers that are cheaper or clearer done on the host
    /// (reduction, small convolutions).
    Cpu,
}

/// On-disk/on-device precision for a parameter blob, mirroring `layerflags.h`'s `param_type`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum ParamType {
    /// 32-bit float (the default).
    #[default]
    Float32,
    /// 16-bit float.
    Float16,
    /// 8-bit quantized integer.
    Int8,
    /// 4-bit quantized integer.
    Int4,
    /// "Don't care" / use whatever the layer's own default is.
    Default,
}

/// Quantization scheme a layer applies to its weights. Only `MixedFloat` is implemented; the rest
/// of the catalogue is carried so a builder can name the full set and have unsupported ones
/// rejected explicitly rather than silently coerced.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum QuantType {
    /// No quantization.
    #[default]
    None,
    /// Mixed precision: n-bit integer weights, system-default float compute.
    MixedFloat,
    /// Mixed precision with FP16 compute.
    MixedFloat16,
    /// Mixed precision with FP32 compute.
    MixedFloat32,
    FixedInt,
    FixedInt4,
    FixedInt8,
}

/// The full layer-type catalogue, mirroring `fyusenet/base/layerflags.h`'s `LayerType` enum.
/// Not every entry here has a corresponding [`crate::layer::Layer`] implementation in this core —
/// see `SPEC_FULL.md` §5.3 for which ones are contract-only.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LayerKind {
    Add,
    Sub,
    ArgMax,
    Cast,
    Concat,
    Convolution2d,
    FracConvolution2d,
    TransConvolution2d,
    AvgPool2d,
    MaxPool2d,
    Padding2d,
    Scale2d,
    SingletonArith,
    Relu,
    Clip,
    Tanh,
    Sigmoid,
    Silu,
    Gelu,
    Reduce,
    Transpose,
    ImgExtract,
    Blur2d,
    NonMax2d,
    Rgb2Bgr,
    Deep2Shallow,
    Shallow2Deep,
    Download,
    Upload,
    Residual,
    BatchNorm,
    RmsNorm,
    Gemm,
    Linear,
    Attention,
    Embedding,
    TokenScoring,
    Custom,
    /// Catalogue entries this core treats as contract-only (e.g. `OESCONV`, which needs a
    /// platform-specific GL extension this core never binds). Carries the original numeric tag.
    Other(u16),
}
