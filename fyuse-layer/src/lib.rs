//! The layer-factory / builder / compiled-layer pipeline: a fluent [`builder::LayerBuilder`] sum
//! type, the [`factory::LayerFactory`] that resolves pushed builders into an ordered sequence of
//! compiled layers, the [`layer::Layer`] capability every compiled layer implements, the
//! cross-cutting [`flags::LayerFlags`] bitmask, the parameter-provider contract layers pull
//! weights through, and the convolution weight-packaging layout.

pub mod backend;
pub mod builder;
pub mod conv;
pub mod cpu;
pub mod factory;
pub mod flags;
pub mod gpu;
pub mod layer;
pub mod params;
pub mod types;

pub use backend::StdLayerBackend;
pub use builder::LayerBuilder;
pub use cpu::{CpuConv, CpuReduce};
pub use factory::{LayerBackend, LayerFactory};
pub use flags::LayerFlags;
pub use gpu::{
    GpuActivation, GpuAttention, GpuBatchNorm, GpuConv, GpuCustom, GpuDeepShallowConvert, GpuDownload,
    GpuElementArith, GpuEmbedding, GpuLayerCommon, GpuLinear, GpuPool, GpuRmsNorm, GpuTokenScoring, GpuUpload,
};
pub use layer::{BufferSpec, Layer, PortRole, StateToken};
pub use params::{Blob, ParameterProvider};
