//! The production [`crate::factory::LayerBackend`]: turns a compiled [`crate::builder::LayerBuilder`]
//! into the concrete `Gpu*`/`Cpu*` struct its kind and [`crate::types::ComputeDevice`] call for.
//! Grounded on `fyusenet/gpu/gpulayerfactory.cpp`'s switch-over-`LayerType` dispatch, re-expressed
//! over the sum-type builder instead of a raw `LayerBuilder*` downcast.

use crate::builder::LayerBuilder;
use crate::cpu::{CpuConv, CpuReduce};
use crate::factory::LayerBackend;
use crate::gpu::{
    GpuActivation, GpuAttention, GpuBatchNorm, GpuConv, GpuCustom, GpuDeepShallowConvert, GpuDownload,
    GpuEmbedding, GpuLayerCommon, GpuLinear, GpuPool, GpuRmsNorm, GpuTokenScoring, GpuUpload,
};
use crate::layer::{Layer, StateToken};
use crate::types::ComputeDevice;
use fyuse_core::CoreError;
use fyuse_gfx::server::GfxContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type CustomHook = Box<dyn Fn() -> Box<dyn FnMut(&mut GpuLayerCommon, u64, &StateToken) -> Result<(), CoreError>>>;

/// The backend every real network build goes through: holds the [`GfxContext`] every GPU layer
/// needs and a by-tag registry of statically-linked custom layer hooks.
pub struct StdLayerBackend {
    context: Rc<dyn GfxContext>,
    max_render_targets: usize,
    custom_hooks: RefCell<HashMap<String, CustomHook>>,
}

impl StdLayerBackend {
    /// Builds a backend bound to `context`, capping convolution multi-render-target passes at
    /// `context`'s reported `max_draw_buffers`.
    pub fn new(context: Rc<dyn GfxContext>) -> Self {
        let max_render_targets = context.capabilities().max_draw_buffers.max(1);
        Self {
            context,
            max_render_targets,
            custom_hooks: RefCell::new(HashMap::new()),
        }
    }

    /// Registers the forward hook a [`crate::builder::CustomBuilder`] of the given `tag` resolves
    /// to at instantiation time. `hook_factory` is called once per matching builder, so a stateful
    /// hook (e.g. one closing over its own small buffer) gets a fresh instance per layer.
    pub fn register_custom(
        &self,
        tag: impl Into<String>,
        hook_factory: impl Fn() -> Box<dyn FnMut(&mut GpuLayerCommon, u64, &StateToken) -> Result<(), CoreError>> + 'static,
    ) {
        self.custom_hooks.borrow_mut().insert(tag.into(), Box::new(hook_factory));
    }
}

impl LayerBackend for StdLayerBackend {
    fn instantiate(&self, builder: LayerBuilder) -> Result<Box<dyn Layer>, CoreError> {
        let device = builder.compute_device();
        match (&builder, device) {
            (LayerBuilder::Conv(b), ComputeDevice::Cpu) => {
                let common = &b.common;
                Ok(Box::new(CpuConv::new(
                    common.number_raw(),
                    common.name(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    common.out_channels_count(),
                    b.kernel,
                )))
            }
            (LayerBuilder::Reduce(b), _) => {
                let common = &b.common;
                Ok(Box::new(CpuReduce::new(
                    common.number_raw(),
                    common.name(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                )))
            }
            (LayerBuilder::Conv(b), ComputeDevice::Gpu) => {
                let common = &b.common;
                Ok(Box::new(GpuConv::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    common.out_channels_count(),
                    b.kernel,
                    self.max_render_targets,
                    common.output_padding_value(),
                    common.resolved_flags(),
                    common.is_deep(),
                )))
            }
            (LayerBuilder::Pool(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuPool::new(
                    common.number_raw(),
                    common.name(),
                    common.kind(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    b.kernel,
                )))
            }
            (LayerBuilder::Activation(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuActivation::new(
                    common.number_raw(),
                    common.name(),
                    common.kind(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    common.leaky_relu_slope(),
                    common.clip_bounds(),
                )))
            }
            (LayerBuilder::Deep2Shallow(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuDeepShallowConvert::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    true,
                )))
            }
            (LayerBuilder::Shallow2Deep(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuDeepShallowConvert::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    false,
                )))
            }
            (LayerBuilder::Upload(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuUpload::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.out_channels_count(),
                )))
            }
            (LayerBuilder::Download(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuDownload::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    b.asynchronous,
                )))
            }
            (LayerBuilder::BatchNorm(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuBatchNorm::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                )))
            }
            (LayerBuilder::RmsNorm(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuRmsNorm::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    b.epsilon,
                )))
            }
            (LayerBuilder::Linear(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuLinear::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    common.out_channels_count(),
                    b.bias,
                )))
            }
            (LayerBuilder::Attention(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuAttention::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    b.heads,
                    b.head_dim,
                    b.causal,
                    b.incremental,
                )))
            }
            (LayerBuilder::Embedding(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuEmbedding::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    common.out_channels_count(),
                    b.table_rows,
                )))
            }
            (LayerBuilder::TokenScoring(b), _) => {
                let common = &b.common;
                Ok(Box::new(GpuTokenScoring::new(
                    common.number_raw(),
                    common.name(),
                    self.context.clone(),
                    b.table_rows,
                    b.temperature,
                    b.top_k,
                    b.top_p,
                )))
            }
            (LayerBuilder::Custom(b), _) => {
                let common = &b.common;
                let hooks = self.custom_hooks.borrow();
                let hook_factory = hooks.get(&b.tag).ok_or_else(|| {
                    CoreError::Configuration(format!("no custom layer registered for tag \"{}\"", b.tag))
                })?;
                let hook = hook_factory();
                Ok(Box::new(GpuCustom::new(
                    common.number_raw(),
                    common.name(),
                    b.tag.clone(),
                    self.context.clone(),
                    common.width(),
                    common.height(),
                    common.in_channels_count(),
                    hook,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ConvBuilder, CustomBuilder, LayerBuilderCommon, ReduceBuilder};
    use crate::types::LayerKind;
    use fyuse_gfx::buffer::{BufferKind, BufferUsage, GpuBuffer, GpuBufferTrait};
    use fyuse_gfx::error::FrameworkError;
    use fyuse_gfx::framebuffer::{Attachment, FrameBuffer, FrameBufferTrait, DrawParameters};
    use fyuse_gfx::geometry_buffer::{DrawCallStatistics, GeometryBuffer, GeometryBufferDescriptor, GeometryBufferTrait};
    use fyuse_gfx::program::{GpuProgram, GpuProgramTrait, ProgramBinding, UniformLocation};
    use fyuse_gfx::read_buffer::{AsyncReadBuffer, AsyncReadBufferTrait};
    use fyuse_gfx::server::GfxCapabilities;
    use fyuse_gfx::stats::PipelineStatistics;
    use fyuse_gfx::sync::{GpuFence, GpuFenceTrait};
    use fyuse_gfx::texture::{GpuTextureTrait, PixelFormat, Texture, TextureDescriptor};
    use std::time::Duration;

    struct NullFence;
    impl GpuFenceTrait for NullFence {}

    struct NullTexture;
    impl GpuTextureTrait for NullTexture {
        fn width(&self) -> usize {
            1
        }
        fn height(&self) -> usize {
            1
        }
        fn pixel_format(&self) -> PixelFormat {
            PixelFormat::Rgba32F
        }
        fn set_data(&self, _data: &[u8]) -> Result<(), FrameworkError> {
            Ok(())
        }
    }

    struct NullFrameBuffer;
    impl FrameBufferTrait for NullFrameBuffer {
        fn color_attachments(&self) -> &[Attachment] {
            &[]
        }
        fn clear(&mut self, _viewport: fyuse_gfx::framebuffer::Rect, _color: [f32; 4]) {}
        fn draw(
            &mut self,
            _geometry: &GeometryBuffer,
            _viewport: fyuse_gfx::framebuffer::Rect,
            _program: &GpuProgram,
            _params: &DrawParameters,
            _apply_uniforms: &mut dyn FnMut(&mut dyn ProgramBinding),
        ) -> Result<DrawCallStatistics, FrameworkError> {
            Ok(DrawCallStatistics { triangles: 2 })
        }
    }

    struct NullProgram;
    impl GpuProgramTrait for NullProgram {
        fn uniform_location(&self, _name: &str) -> Option<UniformLocation> {
            Some(UniformLocation(0))
        }
    }

    struct NullGeometry;
    impl GeometryBufferTrait for NullGeometry {
        fn index_count(&self) -> usize {
            6
        }
        fn set_vertices(&self, _vertices: &[f32]) -> Result<(), FrameworkError> {
            Ok(())
        }
    }

    struct NullReadBuffer;
    impl AsyncReadBufferTrait for NullReadBuffer {
        fn schedule_pixels_transfer(
            &self,
            _framebuffer: &dyn FrameBufferTrait,
            _color_buffer_index: u32,
            _rect: Option<fyuse_gfx::framebuffer::Rect>,
        ) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn is_request_running(&self) -> bool {
            false
        }
        fn try_read(&self) -> Option<Vec<u8>> {
            Some(vec![0u8; 4])
        }
        fn wait_read(&self, _timeout: Duration) -> Result<Vec<u8>, FrameworkError> {
            Ok(vec![0u8; 4])
        }
    }

    struct NullGpuBuffer(usize, BufferKind, BufferUsage);
    impl GpuBufferTrait for NullGpuBuffer {
        fn kind(&self) -> BufferKind {
            self.1
        }
        fn usage(&self) -> BufferUsage {
            self.2
        }
        fn size(&self) -> usize {
            self.0
        }
        fn write_data(&self, _data: &[u8]) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn read_data(&self, _data: &mut [u8]) -> Result<(), FrameworkError> {
            Ok(())
        }
    }

    struct NullGfxContext;
    impl GfxContext for NullGfxContext {
        fn create_texture(&self, _desc: TextureDescriptor, _data: Option<&[u8]>) -> Result<Texture, FrameworkError> {
            Ok(Texture(Rc::new(NullTexture)))
        }
        fn create_frame_buffer(&self, _color_attachments: Vec<Attachment>) -> Result<FrameBuffer, FrameworkError> {
            Ok(FrameBuffer::new(NullFrameBuffer))
        }
        fn update_color_attachment(&self, _framebuffer: &FrameBuffer, _index: usize, _texture: Texture) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn create_buffer(&self, size: usize, kind: BufferKind, usage: BufferUsage) -> Result<GpuBuffer, FrameworkError> {
            Ok(GpuBuffer(Rc::new(NullGpuBuffer(size, kind, usage))))
        }
        fn create_geometry_buffer(&self, _desc: GeometryBufferDescriptor) -> Result<GeometryBuffer, FrameworkError> {
            Ok(GeometryBuffer(Rc::new(NullGeometry)))
        }
        fn create_program(&self, _name: &str, _vertex_source: &str, _fragment_source: &str) -> Result<GpuProgram, FrameworkError> {
            Ok(GpuProgram(Rc::new(NullProgram)))
        }
        fn create_async_read_buffer(&self, _pixel_size: usize, _pixel_count: usize) -> Result<AsyncReadBuffer, FrameworkError> {
            Ok(AsyncReadBuffer(Rc::new(NullReadBuffer)))
        }
        fn create_derived(&self) -> Result<Box<dyn GfxContext>, FrameworkError> {
            Ok(Box::new(NullGfxContext))
        }
        fn make_current(&self) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn flush(&self) {}
        fn finish(&self) {}
        fn capabilities(&self) -> GfxCapabilities {
            GfxCapabilities {
                max_texture_size: 8192,
                max_draw_buffers: 8,
                max_fragment_uniform_vectors: 256,
            }
        }
        fn pipeline_statistics(&self) -> PipelineStatistics {
            PipelineStatistics::default()
        }
        fn reset_pipeline_statistics(&mut self) {}
        fn issue_sync(&self) -> Result<GpuFence, FrameworkError> {
            Ok(GpuFence(Box::new(NullFence)))
        }
        fn wait_client_sync(&self, _fence: &GpuFence, _timeout: Duration) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn remove_sync(&self, _fence: GpuFence) {}
    }

    fn backend() -> StdLayerBackend {
        StdLayerBackend::new(Rc::new(NullGfxContext))
    }

    #[test]
    fn conv_builder_on_cpu_device_resolves_to_cpu_conv() {
        let builder = LayerBuilder::Conv(ConvBuilder {
            common: LayerBuilderCommon::new("c", LayerKind::Convolution2d)
                .number(0)
                .shape_same(4, 4, 3)
                .device(ComputeDevice::Cpu),
            kernel: 3,
            dilation: 1,
            group_size: 1,
        });
        let layer = backend().instantiate(builder).unwrap();
        assert_eq!(layer.device(), ComputeDevice::Cpu);
    }

    #[test]
    fn conv_builder_on_gpu_device_resolves_to_gpu_conv() {
        let builder = LayerBuilder::Conv(ConvBuilder {
            common: LayerBuilderCommon::new("c", LayerKind::Convolution2d)
                .number(0)
                .shape_same(4, 4, 3)
                .device(ComputeDevice::Gpu),
            kernel: 3,
            dilation: 1,
            group_size: 1,
        });
        let layer = backend().instantiate(builder).unwrap();
        assert_eq!(layer.device(), ComputeDevice::Gpu);
    }

    #[test]
    fn reduce_builder_resolves_to_cpu_reduce() {
        let builder = LayerBuilder::Reduce(ReduceBuilder {
            common: ReduceBuilder::new("r").common.number(0).shape_same(2, 2, 4),
        });
        let layer = backend().instantiate(builder).unwrap();
        assert_eq!(layer.kind(), LayerKind::Reduce);
        assert_eq!(layer.device(), ComputeDevice::Cpu);
    }

    #[test]
    fn unregistered_custom_tag_fails() {
        let builder = LayerBuilder::Custom(CustomBuilder {
            common: LayerBuilderCommon::new("x", LayerKind::Custom).number(0).shape_same(1, 1, 1),
            tag: "unregistered".into(),
        });
        assert!(matches!(backend().instantiate(builder), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn registered_custom_tag_resolves() {
        let backend = backend();
        backend.register_custom("double", || {
            let hook: Box<dyn FnMut(&mut GpuLayerCommon, u64, &StateToken) -> Result<(), CoreError>> =
                Box::new(|_common: &mut GpuLayerCommon, _seq: u64, _state: &StateToken| Ok(()));
            hook
        });
        let builder = LayerBuilder::Custom(CustomBuilder {
            common: LayerBuilderCommon::new("x", LayerKind::Custom).number(0).shape_same(1, 1, 1),
            tag: "double".into(),
        });
        let layer = backend.instantiate(builder).unwrap();
        assert_eq!(layer.kind(), LayerKind::Custom);
    }
}
