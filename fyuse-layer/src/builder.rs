//! The fluent builder that collects a layer's declarative parameters before it is pushed to a
//! [`crate::factory::LayerFactory`]. Grounded on `fyusenet/base/layerbuilder.h`'s
//! `LayerBuilderTempl<D>` and the per-kind headers under `fyusenet/gpu/`; re-expressed as a sum
//! type (`SPEC_FULL.md` §6) instead of a CRTP template hierarchy.

use crate::flags::LayerFlags;
use crate::types::{
    ActType, ComputeDevice, LayerKind, NormType, ParamType, PosEncType, QuantType, ScalingType,
    ScoringType,
};

/// Fields every layer builder carries, regardless of kind. Mirrors the member variables of
/// `LayerBuilderTempl<D>`.
#[derive(Clone, Debug)]
pub struct LayerBuilderCommon {
    name: String,
    number: i32,
    kind: LayerKind,
    device: ComputeDevice,
    width: usize,
    height: usize,
    input_channels: usize,
    output_channels: usize,
    input_padding: usize,
    output_padding: usize,
    residual_padding: usize,
    downsample: (usize, usize),
    upsample: (usize, usize),
    max_sequence_len: usize,
    pre_act: ActType,
    pre_act_mask: u16,
    post_act: ActType,
    residual_act: ActType,
    post_norm: NormType,
    leaky_relu: f32,
    clip_low: f32,
    clip_high: f32,
    rank: u32,
    flags: LayerFlags,
    residual_norm: bool,
}

impl LayerBuilderCommon {
    /// Creates an otherwise-default builder for a layer of `kind`, named `name`, with number `-1`
    /// (invalid — a valid non-negative number must be set with [`Self::number`] before the
    /// builder can be pushed to a factory).
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            number: -1,
            kind,
            device: ComputeDevice::Gpu,
            width: 0,
            height: 0,
            input_channels: 0,
            output_channels: 0,
            input_padding: 0,
            output_padding: 0,
            residual_padding: 0,
            downsample: (1, 1),
            upsample: (1, 1),
            max_sequence_len: 0,
            pre_act: ActType::None,
            pre_act_mask: 0xFFFF,
            post_act: ActType::None,
            residual_act: ActType::None,
            post_norm: NormType::None,
            leaky_relu: 0.0,
            clip_low: 0.0,
            clip_high: 0.0,
            rank: 0,
            flags: LayerFlags::empty(),
            residual_norm: false,
        }
    }

    pub fn number(mut self, number: i32) -> Self {
        debug_assert!(number >= 0);
        self.number = number;
        self
    }

    /// Sets output channels, input spatial size (height/width) and input channels in one call —
    /// the common case where a layer reshapes its channel count but not its spatial footprint.
    pub fn shape(mut self, out_channels: usize, height: usize, width: usize, in_channels: usize) -> Self {
        self.height = height;
        self.width = width;
        self.input_channels = in_channels;
        self.output_channels = out_channels;
        self
    }

    /// Sets height/width/channels with input and output channels equal — the common case for a
    /// layer that doesn't change channel count.
    pub fn shape_same(mut self, height: usize, width: usize, channels: usize) -> Self {
        self.height = height;
        self.width = width;
        self.input_channels = channels;
        self.output_channels = channels;
        self
    }

    pub fn size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.input_channels = channels;
        self.output_channels = channels;
        self
    }

    pub fn in_channels(mut self, channels: usize) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn out_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn downsample(mut self, factor: usize) -> Self {
        self.downsample = (factor, factor);
        self
    }

    pub fn downsample_xy(mut self, horizontal: usize, vertical: usize) -> Self {
        self.downsample = (horizontal, vertical);
        self
    }

    pub fn upsample(mut self, factor: usize) -> Self {
        self.upsample = (factor, factor);
        self
    }

    pub fn upsample_xy(mut self, horizontal: usize, vertical: usize) -> Self {
        self.upsample = (horizontal, vertical);
        self
    }

    pub fn input_padding(mut self, padding: usize) -> Self {
        self.input_padding = padding;
        self
    }

    pub fn output_padding(mut self, padding: usize) -> Self {
        self.output_padding = padding;
        self
    }

    pub fn residual_padding(mut self, padding: usize) -> Self {
        self.residual_padding = padding;
        self
    }

    /// Sets the prefix activation applied to input data on read, with an optional mask
    /// controlling which input ports it applies to (defaults to all 16 bits set).
    pub fn prefix_act(mut self, act: ActType, mask: u16) -> Self {
        self.pre_act = act;
        self.pre_act_mask = mask;
        self
    }

    /// Postfix activation applied to output data on write. Not supported by GPU layers (per
    /// `spec.md` §4.6); `LayerFactory::compile_layers` rejects the combination.
    pub fn postfix_act(mut self, act: ActType) -> Self {
        self.post_act = act;
        self
    }

    pub fn postfix_norm(mut self, norm: NormType) -> Self {
        self.post_norm = norm;
        self
    }

    /// Marks this layer as using the deep tensor memory layout.
    pub fn deep(mut self) -> Self {
        self.flags.insert(LayerFlags::DEEP);
        self
    }

    /// Marks this layer as accepting an additive residual input, optionally applying `act`
    /// (only `None` or `Relu` are legal) to the residual before the add, and whether the layer's
    /// own postfix norm (if any) is also applied to the residual.
    pub fn residual(mut self, act: ActType, postfix_norm: bool) -> Self {
        debug_assert!(matches!(act, ActType::None | ActType::Relu));
        self.flags.insert(LayerFlags::RESIDUAL_INPUT);
        if act == ActType::Relu {
            self.flags.insert(LayerFlags::RELU_ON_RESIDUAL);
        } else {
            self.flags.remove(LayerFlags::RELU_ON_RESIDUAL);
        }
        self.residual_act = act;
        self.residual_norm = postfix_norm;
        self
    }

    pub fn leaky_relu(mut self, leak: f32) -> Self {
        self.leaky_relu = leak;
        self
    }

    pub fn clip(mut self, low: f32, high: f32) -> Self {
        self.clip_low = low;
        self.clip_high = high;
        self
    }

    pub fn rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub fn sequence(mut self, max_len: usize) -> Self {
        debug_assert!(max_len > 0);
        self.max_sequence_len = max_len;
        self
    }

    pub fn device(mut self, device: ComputeDevice) -> Self {
        self.device = device;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number_raw(&self) -> i32 {
        self.number
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn compute_device(&self) -> ComputeDevice {
        self.device
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn in_channels_count(&self) -> usize {
        self.input_channels
    }

    pub fn out_channels_count(&self) -> usize {
        self.output_channels
    }

    pub fn input_padding_value(&self) -> usize {
        self.input_padding
    }

    pub fn output_padding_value(&self) -> usize {
        self.output_padding
    }

    pub fn residual_padding_value(&self) -> usize {
        self.residual_padding
    }

    pub fn downsample_factors(&self) -> (usize, usize) {
        self.downsample
    }

    pub fn upsample_factors(&self) -> (usize, usize) {
        self.upsample
    }

    pub fn max_sequence_len(&self) -> usize {
        self.max_sequence_len
    }

    /// `true` if this builder is primed to build a sequence-learning layer.
    pub fn is_sequence(&self) -> bool {
        self.max_sequence_len > 0
    }

    /// `true` if this builder is for a deep-tensor format layer.
    pub fn is_deep(&self) -> bool {
        self.flags.contains(LayerFlags::DEEP)
    }

    /// Combines the directly-set flags (`DEEP`, `RESIDUAL_INPUT`, `RELU_ON_RESIDUAL`) with the
    /// ones derived from `pre_act`/`post_act`/`post_norm`/`residual_act`, mirroring
    /// `LayerBuilderTempl::getFlags`.
    pub fn resolved_flags(&self) -> LayerFlags {
        let mut full = self.flags;
        full |= match self.pre_act {
            ActType::None => LayerFlags::empty(),
            ActType::Relu | ActType::LeakyRelu => LayerFlags::PRE_RELU,
            ActType::Clip => LayerFlags::PRE_CLIP,
            ActType::Silu => LayerFlags::PRE_SILU,
            ActType::Gelu => LayerFlags::PRE_GELU,
            ActType::Sigmoid => LayerFlags::PRE_SIGMOID,
            ActType::Tanh => LayerFlags::PRE_TANH,
        };
        full |= match self.post_act {
            ActType::None => LayerFlags::empty(),
            ActType::Relu | ActType::LeakyRelu => LayerFlags::POST_RELU,
            _ => LayerFlags::empty(),
        };
        if self.post_norm == NormType::BatchNorm {
            full |= LayerFlags::POST_BATCHNORM;
        }
        if self.residual_act == ActType::Relu {
            full |= LayerFlags::RELU_ON_RESIDUAL;
        }
        if self.residual_norm && self.flags.contains(LayerFlags::POST_BATCHNORM) {
            full |= LayerFlags::BATCHNORM_ON_RESIDUAL;
        }
        full
    }

    pub fn pre_act(&self) -> ActType {
        self.pre_act
    }

    pub fn pre_act_mask(&self) -> u16 {
        self.pre_act_mask
    }

    pub fn post_act(&self) -> ActType {
        self.post_act
    }

    pub fn post_norm(&self) -> NormType {
        self.post_norm
    }

    pub fn leaky_relu_slope(&self) -> f32 {
        self.leaky_relu
    }

    pub fn clip_bounds(&self) -> (f32, f32) {
        (self.clip_low, self.clip_high)
    }

    pub fn rank_value(&self) -> u32 {
        self.rank
    }
}

/// Convolution-specific fields, layered on top of [`LayerBuilderCommon`]. Covers
/// `CONVOLUTION2D`/`FRACCONVOLUTION2D`/`TRANSCONVOLUTION2D`.
#[derive(Clone, Debug)]
pub struct ConvBuilder {
    pub common: LayerBuilderCommon,
    pub kernel: usize,
    pub dilation: usize,
    pub group_size: usize,
}

/// Pooling/scaling-specific fields. Covers `AVGPOOL2D`/`MAXPOOL2D`/`SCALE2D`.
#[derive(Clone, Debug)]
pub struct PoolBuilder {
    pub common: LayerBuilderCommon,
    pub kernel: usize,
    pub scaling: ScalingType,
}

/// A standalone activation layer (`RELU`/`CLIP`/`TANH`/`SIGMOID`/`SILU`/`GELU`) — distinct from a
/// prefix/postfix activation folded into another layer's flags.
#[derive(Clone, Debug)]
pub struct ActivationBuilder {
    pub common: LayerBuilderCommon,
    pub act: ActType,
}

/// `DEEP2SHALLOW`/`SHALLOW2DEEP` storage-order conversion layers.
#[derive(Clone, Debug)]
pub struct ConversionBuilder {
    pub common: LayerBuilderCommon,
}

/// A `REDUCE` layer: sums its input channels down to one. Always runs on the CPU;
/// `ComputeDevice::Gpu` is rejected at [`crate::factory::LayerFactory::compile_layers`] time.
#[derive(Clone, Debug)]
pub struct ReduceBuilder {
    pub common: LayerBuilderCommon,
}

impl ReduceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: LayerBuilderCommon::new(name, LayerKind::Reduce)
                .out_channels(1)
                .device(ComputeDevice::Cpu),
        }
    }
}

/// An `UPLOAD` layer: accepts a host-side `CPUBuffer` and uploads it into a `GPUBuffer`.
#[derive(Clone, Debug)]
pub struct UploadBuilder {
    pub common: LayerBuilderCommon,
}

/// A `DOWNLOAD` layer: reads back a `GPUBuffer` into a `CPUBuffer`, synchronously or async (see
/// `fyuse-engine::download`).
#[derive(Clone, Debug)]
pub struct DownloadBuilder {
    pub common: LayerBuilderCommon,
    pub asynchronous: bool,
}

/// An explicit `BATCHNORM` layer (distinct from the `POST_BATCHNORM` flag folded into another
/// layer).
#[derive(Clone, Debug)]
pub struct BatchNormBuilder {
    pub common: LayerBuilderCommon,
}

/// An `RMSNORM` layer.
#[derive(Clone, Debug)]
pub struct RmsNormBuilder {
    pub common: LayerBuilderCommon,
    pub epsilon: f32,
}

/// `LINEAR`/`GEMM` layers: a matrix/matrix multiply with optional bias.
#[derive(Clone, Debug)]
pub struct LinearBuilder {
    pub common: LayerBuilderCommon,
    pub bias: bool,
    pub gemm: bool,
}

/// An `ATTENTION` layer. Field set grounded on `attentionlayerbuilder.h`.
#[derive(Clone, Debug)]
pub struct AttentionBuilder {
    pub common: LayerBuilderCommon,
    pub heads: usize,
    pub head_dim: usize,
    pub pos_encoding: PosEncType,
    pub rotary_theta_base: f32,
    pub causal: bool,
    pub incremental: bool,
    pub auto_residual: bool,
    pub quant_type: QuantType,
    pub weight_type: ParamType,
    pub quant_group_size: usize,
}

/// An `EMBEDDING` layer. Field set grounded on `embeddinglayerbuilder.h`.
#[derive(Clone, Debug)]
pub struct EmbeddingBuilder {
    pub common: LayerBuilderCommon,
    pub table_rows: usize,
    pub source_type: ParamType,
    pub device_type: ParamType,
}

/// A `TOKENSCORING` layer. Field set grounded on `tokenscoringlayerbuilder.h`.
#[derive(Clone, Debug)]
pub struct TokenScoringBuilder {
    pub common: LayerBuilderCommon,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub table_rows: usize,
    pub scoring_type: ScoringType,
    pub device_type: ParamType,
}

/// A `CUSTOM` layer hook: the only builder-level escape hatch for functionality this core does
/// not itself implement (`spec.md` §1's "plugin system" non-goal is about *runtime* loading; a
/// statically-linked custom layer is still expressible through this builder).
#[derive(Clone, Debug)]
pub struct CustomBuilder {
    pub common: LayerBuilderCommon,
    pub tag: String,
}

impl ConvBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: LayerBuilderCommon::new(name, LayerKind::Convolution2d),
            kernel: 1,
            dilation: 1,
            group_size: 1,
        }
    }
}

impl PoolBuilder {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        debug_assert!(matches!(
            kind,
            LayerKind::AvgPool2d | LayerKind::MaxPool2d | LayerKind::Scale2d
        ));
        Self {
            common: LayerBuilderCommon::new(name, kind),
            kernel: 1,
            scaling: ScalingType::Nearest,
        }
    }
}

impl AttentionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: LayerBuilderCommon::new(name, LayerKind::Attention),
            heads: 0,
            head_dim: 0,
            pos_encoding: PosEncType::None,
            rotary_theta_base: 1.0,
            causal: false,
            incremental: false,
            auto_residual: false,
            quant_type: QuantType::None,
            weight_type: ParamType::Float32,
            quant_group_size: 0,
        }
    }

    pub fn causal(mut self) -> Self {
        self.causal = true;
        self
    }

    pub fn heads(mut self, num: usize) -> Self {
        self.heads = num;
        self
    }

    pub fn head_dim(mut self, dim: usize) -> Self {
        self.head_dim = dim;
        self
    }

    pub fn positional_encoding(mut self, enc: PosEncType) -> Self {
        self.pos_encoding = enc;
        self
    }

    pub fn rotary_theta_base(mut self, base: f32) -> Self {
        self.rotary_theta_base = base;
        self
    }

    /// Only `QuantType::MixedFloat` is supported; any other quantization type is accepted here
    /// (so the full catalogue can be named) but rejected at
    /// [`crate::factory::LayerFactory::compile_layers`] time, mirroring the original's
    /// constructor-time `THROW_EXCEPTION_ARGS`.
    pub fn quantize(mut self, quant_type: QuantType, weight_type: ParamType) -> Self {
        self.quant_type = quant_type;
        self.weight_type = weight_type;
        self
    }

    pub fn quant_group_size(mut self, group_size: usize) -> Self {
        self.quant_group_size = group_size;
        self
    }

    pub fn auto_residual(mut self) -> Self {
        self.auto_residual = true;
        self
    }

    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }
}

impl EmbeddingBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: LayerBuilderCommon::new(name, LayerKind::Embedding).in_channels(1),
            table_rows: 0,
            source_type: ParamType::Float32,
            device_type: ParamType::Default,
        }
    }

    pub fn table_rows(mut self, rows: usize) -> Self {
        self.table_rows = rows;
        self
    }

    pub fn compute_precision(mut self, precision: ParamType) -> Self {
        self.device_type = precision;
        self
    }
}

impl TokenScoringBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            common: LayerBuilderCommon::new(name, LayerKind::TokenScoring).out_channels(1),
            temperature: 0.0,
            top_k: 1,
            top_p: 0.0,
            table_rows: 0,
            scoring_type: ScoringType::Greedy,
            device_type: ParamType::Default,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self.scoring_type = ScoringType::TopK;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self.scoring_type = ScoringType::TopP;
        self
    }

    pub fn table_rows(mut self, rows: usize) -> Self {
        self.table_rows = rows;
        self
    }

    pub fn compute_precision(mut self, precision: ParamType) -> Self {
        self.device_type = precision;
        self
    }
}

/// The declarative description of one layer, pending compilation by a
/// [`crate::factory::LayerFactory`]. A sum type over per-kind payload structs, each embedding a
/// [`LayerBuilderCommon`] (`SPEC_FULL.md` §6's "sum-type builder" redesign).
#[derive(Clone, Debug)]
pub enum LayerBuilder {
    Conv(ConvBuilder),
    Pool(PoolBuilder),
    Activation(ActivationBuilder),
    Deep2Shallow(ConversionBuilder),
    Shallow2Deep(ConversionBuilder),
    Reduce(ReduceBuilder),
    Upload(UploadBuilder),
    Download(DownloadBuilder),
    BatchNorm(BatchNormBuilder),
    RmsNorm(RmsNormBuilder),
    Linear(LinearBuilder),
    Attention(AttentionBuilder),
    Embedding(EmbeddingBuilder),
    TokenScoring(TokenScoringBuilder),
    Custom(CustomBuilder),
}

impl LayerBuilder {
    pub fn common(&self) -> &LayerBuilderCommon {
        match self {
            LayerBuilder::Conv(b) => &b.common,
            LayerBuilder::Pool(b) => &b.common,
            LayerBuilder::Activation(b) => &b.common,
            LayerBuilder::Deep2Shallow(b) => &b.common,
            LayerBuilder::Shallow2Deep(b) => &b.common,
            LayerBuilder::Reduce(b) => &b.common,
            LayerBuilder::Upload(b) => &b.common,
            LayerBuilder::Download(b) => &b.common,
            LayerBuilder::BatchNorm(b) => &b.common,
            LayerBuilder::RmsNorm(b) => &b.common,
            LayerBuilder::Linear(b) => &b.common,
            LayerBuilder::Attention(b) => &b.common,
            LayerBuilder::Embedding(b) => &b.common,
            LayerBuilder::TokenScoring(b) => &b.common,
            LayerBuilder::Custom(b) => &b.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut LayerBuilderCommon {
        match self {
            LayerBuilder::Conv(b) => &mut b.common,
            LayerBuilder::Pool(b) => &mut b.common,
            LayerBuilder::Activation(b) => &mut b.common,
            LayerBuilder::Deep2Shallow(b) => &mut b.common,
            LayerBuilder::Shallow2Deep(b) => &mut b.common,
            LayerBuilder::Reduce(b) => &mut b.common,
            LayerBuilder::Upload(b) => &mut b.common,
            LayerBuilder::Download(b) => &mut b.common,
            LayerBuilder::BatchNorm(b) => &mut b.common,
            LayerBuilder::RmsNorm(b) => &mut b.common,
            LayerBuilder::Linear(b) => &mut b.common,
            LayerBuilder::Attention(b) => &mut b.common,
            LayerBuilder::Embedding(b) => &mut b.common,
            LayerBuilder::TokenScoring(b) => &mut b.common,
            LayerBuilder::Custom(b) => &mut b.common,
        }
    }

    pub fn number(&self) -> i32 {
        self.common().number_raw()
    }

    pub fn kind(&self) -> LayerKind {
        self.common().kind()
    }

    pub fn compute_device(&self) -> ComputeDevice {
        self.common().compute_device()
    }

    /// Sets the layer number and returns `self`, the way `push(factory)` is usually chained onto
    /// the final builder call site.
    pub fn with_number(mut self, number: i32) -> Self {
        *self.common_mut() = self.common().clone().number(number);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_sets_flags_and_tracks_activation() {
        let common = LayerBuilderCommon::new("res", LayerKind::Convolution2d).residual(ActType::Relu, false);
        assert!(common.resolved_flags().contains(LayerFlags::RESIDUAL_INPUT));
        assert!(common.resolved_flags().contains(LayerFlags::RELU_ON_RESIDUAL));
    }

    #[test]
    fn resolved_flags_folds_prefix_activation() {
        let common = LayerBuilderCommon::new("act", LayerKind::Convolution2d).prefix_act(ActType::Silu, 0xFFFF);
        assert!(common.resolved_flags().contains(LayerFlags::PRE_SILU));
    }

    #[test]
    fn deep_marks_deep_flag() {
        let common = LayerBuilderCommon::new("d", LayerKind::Convolution2d).deep();
        assert!(common.is_deep());
    }

    #[test]
    fn token_scoring_defaults_to_single_output_channel_and_greedy() {
        let b = TokenScoringBuilder::new("scorer");
        assert_eq!(b.common.out_channels_count(), 1);
        assert_eq!(b.scoring_type, ScoringType::Greedy);
    }

    #[test]
    fn embedding_defaults_to_single_input_channel() {
        let b = EmbeddingBuilder::new("embed");
        assert_eq!(b.common.in_channels_count(), 1);
    }

    #[test]
    fn attention_builder_accumulates_fields() {
        let b = AttentionBuilder::new("attn")
            .heads(8)
            .head_dim(64)
            .positional_encoding(PosEncType::Rotary)
            .rotary_theta_base(10000.0)
            .causal()
            .incremental();
        assert_eq!(b.heads, 8);
        assert_eq!(b.head_dim, 64);
        assert!(b.causal);
        assert!(b.incremental);
        assert_eq!(b.pos_encoding, PosEncType::Rotary);
    }
}
