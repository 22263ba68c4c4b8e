//! Resolves a compiled layer's declared I/O ports into concrete, shared GPU textures and wires
//! producer output onto consumer input. Grounded on `spec.md` §4.8 and the refcounted-resource
//! lifetime discipline of `fyrox-core/src/pool/mod.rs`, applied here to texture slices addressed
//! by `(layer number, port, role, slice)` instead of pool entries addressed by `Handle`.

use fyuse_core::CoreError;
use fyuse_gfx::server::GfxContext;
use fyuse_gfx::texture::{Texture, TextureDescriptor};
use fyuse_layer::{BufferSpec, Layer, PortRole};
use std::collections::HashMap;

/// Identifies one allocated texture slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
struct SlotKey {
    layer_no: i32,
    port: usize,
    role: PortRole,
    slice: usize,
}

struct Slot {
    texture: Texture,
    /// Number of consumers currently wired to this slot.
    refcount: usize,
}

/// Owns every texture allocated on behalf of a compiled layer graph's declared ports, and the
/// wiring between them. One instance per [`crate::engine::Engine`] (`SPEC_FULL.md` §6's
/// explicitly-owned-manager redesign — no process-wide singleton).
#[derive(Default)]
pub struct BufferManager {
    slots: HashMap<SlotKey, Slot>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates one texture per channel-group `spec` declares (`spec.md` §4.8:
    /// `ceil(channels / 4)` for [`fyuse_tensor::shape::StorageOrder::GpuShallow`], one for a deep
    /// or sequence port), through `context`, and registers them under `layer_no`. Returns the
    /// freshly allocated textures in slice order.
    pub fn allocate_output(
        &mut self,
        context: &dyn GfxContext,
        layer_no: i32,
        spec: &BufferSpec,
    ) -> Result<Vec<Texture>, CoreError> {
        let slice_count = spec.slice_count();
        let mut textures = Vec::with_capacity(slice_count);
        for slice in 0..slice_count {
            let key = SlotKey {
                layer_no,
                port: spec.port,
                role: spec.role,
                slice,
            };
            let texture = context
                .create_texture(
                    TextureDescriptor::render_target(spec.width, spec.height, spec.pixel_format),
                    None,
                )
                .map_err(CoreError::from)?;
            textures.push(texture.clone());
            self.slots.insert(key, Slot { texture, refcount: 0 });
        }
        Ok(textures)
    }

    /// Wires the texture(s) previously allocated for `(producer_layer_no, producer_port,
    /// producer_role)` onto `consumer`, binding each slice through [`Layer::add_input_texture`] or
    /// [`Layer::add_residual_texture`] depending on `consumer_spec.role`, and bumps their
    /// refcount. Fails with [`CoreError::Protocol`] if the producer's port was never allocated.
    pub fn connect(
        &mut self,
        producer_layer_no: i32,
        producer_port: usize,
        producer_role: PortRole,
        consumer: &mut dyn Layer,
        consumer_spec: &BufferSpec,
    ) -> Result<(), CoreError> {
        let slice_count = consumer_spec.slice_count();
        for slice in 0..slice_count {
            let key = SlotKey {
                layer_no: producer_layer_no,
                port: producer_port,
                role: producer_role,
                slice,
            };
            let slot = self.slots.get_mut(&key).ok_or_else(|| {
                CoreError::Protocol(format!(
                    "layer {producer_layer_no} never allocated output port {producer_port} slice {slice}"
                ))
            })?;
            slot.refcount += 1;
            let texture = slot.texture.clone();
            match consumer_spec.role {
                PortRole::Residual => consumer.add_residual_texture(texture, slice)?,
                PortRole::Source | PortRole::Dest => consumer.add_input_texture(texture, slice)?,
            }
        }
        Ok(())
    }

    /// Reverses one [`Self::connect`] call: decrements the refcount of every slice of
    /// `(producer_layer_no, producer_port, producer_role)` and frees any slice whose refcount
    /// reaches zero. Called from a consumer's [`Layer::cleanup`] path as the engine tears down a
    /// layer graph.
    pub fn disconnect(&mut self, producer_layer_no: i32, producer_port: usize, producer_role: PortRole) {
        let keys: Vec<SlotKey> = self
            .slots
            .keys()
            .filter(|k| k.layer_no == producer_layer_no && k.port == producer_port && k.role == producer_role)
            .copied()
            .collect();
        for key in keys {
            if let Some(slot) = self.slots.get_mut(&key) {
                slot.refcount = slot.refcount.saturating_sub(1);
                if slot.refcount == 0 {
                    self.slots.remove(&key);
                }
            }
        }
    }

    /// Frees `(layer_no, port, role)` unconditionally, regardless of refcount — used for a
    /// network's terminal output port, which by definition has no in-graph consumer to decrement
    /// it for.
    pub fn free(&mut self, layer_no: i32, port: usize, role: PortRole) {
        self.slots
            .retain(|k, _| !(k.layer_no == layer_no && k.port == port && k.role == role));
    }

    /// Number of texture slots currently alive. Exposed for leak-detection in tests.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fyuse_gfx::error::FrameworkError;
    use fyuse_gfx::framebuffer::Attachment;
    use fyuse_gfx::geometry_buffer::GeometryBufferDescriptor;
    use fyuse_gfx::server::GfxCapabilities;
    use fyuse_gfx::stats::PipelineStatistics;
    use fyuse_gfx::sync::GpuFence;
    use fyuse_gfx::texture::{GpuTextureTrait, PixelFormat};
    use fyuse_layer::StateToken;
    use fyuse_tensor::shape::ElementType;
    use fyuse_tensor::StorageOrder;
    use std::time::Duration;

    struct NullTexture {
        width: usize,
        height: usize,
        format: PixelFormat,
    }

    impl GpuTextureTrait for NullTexture {
        fn width(&self) -> usize {
            self.width
        }
        fn height(&self) -> usize {
            self.height
        }
        fn pixel_format(&self) -> PixelFormat {
            self.format
        }
        fn set_data(&self, _data: &[u8]) -> Result<(), FrameworkError> {
            Ok(())
        }
    }

    struct NullContext;

    impl GfxContext for NullContext {
        fn create_texture(
            &self,
            desc: TextureDescriptor,
            _data: Option<&[u8]>,
        ) -> Result<Texture, FrameworkError> {
            Ok(Texture(std::rc::Rc::new(NullTexture {
                width: desc.width,
                height: desc.height,
                format: desc.pixel_format,
            })))
        }
        fn create_frame_buffer(
            &self,
            _color_attachments: Vec<Attachment>,
        ) -> Result<fyuse_gfx::framebuffer::FrameBuffer, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn update_color_attachment(
            &self,
            _framebuffer: &fyuse_gfx::framebuffer::FrameBuffer,
            _index: usize,
            _texture: Texture,
        ) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn create_buffer(
            &self,
            _size: usize,
            _kind: fyuse_gfx::buffer::BufferKind,
            _usage: fyuse_gfx::buffer::BufferUsage,
        ) -> Result<fyuse_gfx::buffer::GpuBuffer, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn create_geometry_buffer(
            &self,
            _desc: GeometryBufferDescriptor,
        ) -> Result<fyuse_gfx::geometry_buffer::GeometryBuffer, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn create_program(
            &self,
            _name: &str,
            _vertex_source: &str,
            _fragment_source: &str,
        ) -> Result<fyuse_gfx::program::GpuProgram, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn create_async_read_buffer(
            &self,
            _pixel_size: usize,
            _pixel_count: usize,
        ) -> Result<fyuse_gfx::read_buffer::AsyncReadBuffer, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn create_derived(&self) -> Result<Box<dyn GfxContext>, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn make_current(&self) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn flush(&self) {}
        fn finish(&self) {}
        fn capabilities(&self) -> GfxCapabilities {
            GfxCapabilities {
                max_texture_size: 4096,
                max_draw_buffers: 8,
                max_fragment_uniform_vectors: 256,
            }
        }
        fn pipeline_statistics(&self) -> PipelineStatistics {
            PipelineStatistics::default()
        }
        fn reset_pipeline_statistics(&mut self) {}
        fn issue_sync(&self) -> Result<GpuFence, FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn wait_client_sync(&self, _fence: &GpuFence, _timeout: Duration) -> Result<(), FrameworkError> {
            Err(FrameworkError::ContextUnavailable)
        }
        fn remove_sync(&self, _fence: GpuFence) {}
    }

    struct RecordingLayer {
        bound_inputs: Vec<(Texture, usize)>,
    }

    impl Layer for RecordingLayer {
        fn number(&self) -> i32 {
            1
        }
        fn name(&self) -> &str {
            "recording"
        }
        fn kind(&self) -> fyuse_layer::types::LayerKind {
            fyuse_layer::types::LayerKind::Other(0)
        }
        fn flags(&self) -> fyuse_layer::LayerFlags {
            fyuse_layer::LayerFlags::empty()
        }
        fn device(&self) -> fyuse_layer::types::ComputeDevice {
            fyuse_layer::types::ComputeDevice::Gpu
        }
        fn required_input_buffers(&self) -> Vec<BufferSpec> {
            Vec::new()
        }
        fn required_output_buffers(&self) -> Vec<BufferSpec> {
            Vec::new()
        }
        fn setup(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        fn is_valid(&self) -> bool {
            true
        }
        fn forward(&mut self, _sequence_no: u64, _state: &StateToken) -> Result<(), CoreError> {
            Ok(())
        }
        fn load_parameters(&mut self, _provider: &dyn fyuse_layer::ParameterProvider) -> Result<(), CoreError> {
            Ok(())
        }
        fn cleanup(&mut self) {}
        fn add_input_texture(&mut self, texture: Texture, channel_group: usize) -> Result<(), CoreError> {
            self.bound_inputs.push((texture, channel_group));
            Ok(())
        }
    }

    fn shallow_spec(port: usize, role: PortRole, channels: usize) -> BufferSpec {
        BufferSpec {
            port,
            role,
            width: 8,
            height: 8,
            pixel_format: PixelFormat::Rgba16F,
            element_type: ElementType::Float16,
            channels,
            order: StorageOrder::GpuShallow,
        }
    }

    #[test]
    fn allocate_output_creates_one_texture_per_slice() {
        let context = NullContext;
        let mut manager = BufferManager::new();
        let spec = shallow_spec(0, PortRole::Source, 9);
        let textures = manager.allocate_output(&context, 0, &spec).unwrap();
        assert_eq!(textures.len(), 3);
        assert_eq!(manager.slot_count(), 3);
    }

    #[test]
    fn connect_binds_every_slice_and_increments_refcount() {
        let context = NullContext;
        let mut manager = BufferManager::new();
        let producer_spec = shallow_spec(0, PortRole::Source, 5);
        manager.allocate_output(&context, 0, &producer_spec).unwrap();
        let consumer_spec = shallow_spec(0, PortRole::Dest, 5);
        let mut consumer = RecordingLayer { bound_inputs: Vec::new() };
        manager
            .connect(0, 0, PortRole::Source, &mut consumer, &consumer_spec)
            .unwrap();
        assert_eq!(consumer.bound_inputs.len(), 2);
    }

    #[test]
    fn disconnect_frees_slot_once_refcount_hits_zero() {
        let context = NullContext;
        let mut manager = BufferManager::new();
        let producer_spec = shallow_spec(0, PortRole::Source, 4);
        manager.allocate_output(&context, 0, &producer_spec).unwrap();
        let consumer_spec = shallow_spec(0, PortRole::Dest, 4);
        let mut consumer = RecordingLayer { bound_inputs: Vec::new() };
        manager
            .connect(0, 0, PortRole::Source, &mut consumer, &consumer_spec)
            .unwrap();
        assert_eq!(manager.slot_count(), 1);
        manager.disconnect(0, 0, PortRole::Source);
        assert_eq!(manager.slot_count(), 0);
    }

    #[test]
    fn connect_without_prior_allocation_fails() {
        let mut manager = BufferManager::new();
        let consumer_spec = shallow_spec(0, PortRole::Dest, 4);
        let mut consumer = RecordingLayer { bound_inputs: Vec::new() };
        let result = manager.connect(0, 0, PortRole::Source, &mut consumer, &consumer_spec);
        assert!(matches!(result, Err(CoreError::Protocol(_))));
    }
}
