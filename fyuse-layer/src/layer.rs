//! The `Layer` capability every compiled layer exposes, plus the CPU/GPU variants that route a
//! [`crate::builder::LayerBuilder`] payload to a concrete implementation. Grounded on `spec.md`
//! §4.5's public contract and `fyusenet/base/neuralnetwork.cpp`/`gpu/gpulayerbase.cpp`'s
//! `setup`/`forward`/`cleanup` discipline.

use crate::flags::LayerFlags;
use crate::types::{ComputeDevice, LayerKind};
use fyuse_core::CoreError;
use fyuse_gfx::framebuffer::FrameBuffer;
use fyuse_gfx::texture::{PixelFormat, Texture};
use fyuse_tensor::shape::{ElementType, StorageOrder};
use std::collections::HashSet;

/// Which dataflow role a declared I/O port plays.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PortRole {
    /// A regular producer→consumer tensor port.
    Source,
    /// A regular producer→consumer tensor port, from the consumer's point of view (same wire,
    /// opposite end — kept distinct from `Source` so `required_input_buffers`/
    /// `required_output_buffers` read naturally at each call site).
    Dest,
    /// An additive residual input (`spec.md` §4.5's `RESIDUAL_INPUT` flag).
    Residual,
}

/// One port's declared shape/format/order, returned by [`Layer::required_input_buffers`] /
/// [`Layer::required_output_buffers`]. Mirrors `spec.md` §4.5's `BufferSpec`.
#[derive(Copy, Clone, Debug)]
pub struct BufferSpec {
    /// Index of the port within this layer's input or output array.
    pub port: usize,
    /// Dataflow role this port plays.
    pub role: PortRole,
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    pub element_type: ElementType,
    pub channels: usize,
    pub order: StorageOrder,
}

impl BufferSpec {
    /// Number of texture slices this port's declared shape requires:
    /// `ceil(channels / 4)` for [`StorageOrder::GpuShallow`], `1` for deep/sequence orders.
    pub fn slice_count(&self) -> usize {
        match self.order {
            StorageOrder::GpuShallow => (self.channels + 3) / 4,
            StorageOrder::GpuDeep | StorageOrder::GpuSequence | StorageOrder::Channelwise => 1,
        }
    }
}

/// The state threaded through a single `forward` call, scoped to that call. Mirrors `spec.md`
/// §3/§6's `StateToken`.
#[derive(Clone, Debug, Default)]
pub struct StateToken {
    /// Number of rows (tokens) this run covers.
    pub seq_length: usize,
    /// Absolute position of this run's first row within the ongoing sequence.
    pub seq_index: usize,
    /// Layer numbers the engine must skip this run.
    pub mask_layers: HashSet<i32>,
}

impl StateToken {
    /// A token for a full, non-incremental run over `seq_length` rows starting at row 0, with no
    /// layer masked.
    pub fn full(seq_length: usize) -> Self {
        Self {
            seq_length,
            seq_index: 0,
            mask_layers: HashSet::new(),
        }
    }

    /// `true` if `layer_no` should be skipped on this run.
    pub fn is_masked(&self, layer_no: i32) -> bool {
        self.mask_layers.contains(&layer_no)
    }
}

/// Capability every compiled layer exposes, whether it runs on the CPU or the GPU. Grounded on
/// `spec.md` §4.5's "Public contract (every layer)".
pub trait Layer {
    /// Layer number, as declared by its builder.
    fn number(&self) -> i32;

    /// Layer name, as declared by its builder.
    fn name(&self) -> &str;

    /// Catalogue kind this layer instantiates.
    fn kind(&self) -> LayerKind;

    /// Resolved flag mask (`spec.md` §4.5's "Layer flags").
    fn flags(&self) -> LayerFlags;

    /// Which backend this layer executes on.
    fn device(&self) -> ComputeDevice;

    /// One spec per input port/channel-group, including residual ports.
    fn required_input_buffers(&self) -> Vec<BufferSpec>;

    /// One spec per output port/channel-group.
    fn required_output_buffers(&self) -> Vec<BufferSpec>;

    /// Compiles shaders, builds vertex/index buffers, allocates output FBOs, and marks the layer
    /// valid. Must be called exactly once, after every required input texture has been bound and
    /// before the first [`Layer::forward`].
    fn setup(&mut self) -> Result<(), CoreError>;

    /// `true` once [`Layer::setup`] has completed successfully.
    fn is_valid(&self) -> bool;

    /// Executes one forward pass. Preconditions: [`Layer::is_valid`]; every input port is
    /// populated; the FBO set is consistent with the layer's current output bindings (a dirty
    /// output binding is reconciled internally before drawing, per `spec.md` §4.5's "Updating
    /// outputs sets a dirty flag" note). The caller is responsible for skipping this call when
    /// `state.is_masked(self.number())`.
    fn forward(&mut self, sequence_no: u64, state: &StateToken) -> Result<(), CoreError>;

    /// Fetches this layer's named weight/bias/norm blobs from `provider` and populates whatever
    /// GPU resources they back. Must be called before [`Layer::setup`] for any layer whose
    /// catalogue kind carries parameters.
    fn load_parameters(&mut self, provider: &dyn crate::params::ParameterProvider) -> Result<(), CoreError>;

    /// Releases every buffer, texture and shader this layer owns. Idempotent.
    fn cleanup(&mut self);

    /// Binds `texture` as input port `port`, channel-group `channel_group`. GPU layer
    /// implementations override this; the default rejects the call with
    /// [`CoreError::Protocol`], which is what a CPU layer (fed by a [`fyuse_tensor::CPUBuffer`],
    /// not a texture — `spec.md` §4.5's "Variants: CPU layers") should do if it is ever
    /// mistakenly wired like a GPU one.
    fn add_input_texture(&mut self, _texture: Texture, _channel_group: usize) -> Result<(), CoreError> {
        Err(CoreError::Protocol(format!(
            "layer \"{}\" does not accept texture input bindings",
            self.name()
        )))
    }

    /// Replaces the texture already bound at `(port, channel_group)`.
    fn update_input_texture(&mut self, texture: Texture, channel_group: usize) -> Result<(), CoreError> {
        self.add_input_texture(texture, channel_group)
    }

    /// Binds `texture` as output port `port`, channel-group `channel_group`, optional
    /// `shadow_index` selecting a secondary logical view (`spec.md`'s "Shadow index").
    fn add_output_texture(
        &mut self,
        _texture: Texture,
        _channel_group: usize,
        _shadow_index: usize,
    ) -> Result<(), CoreError> {
        Err(CoreError::Protocol(format!(
            "layer \"{}\" does not accept texture output bindings",
            self.name()
        )))
    }

    /// Binds `texture` as the additive residual input (`spec.md` §4.5, `RESIDUAL_INPUT` flag).
    fn add_residual_texture(&mut self, _texture: Texture, _channel_group: usize) -> Result<(), CoreError> {
        Err(CoreError::Protocol(format!(
            "layer \"{}\" does not accept a residual texture binding",
            self.name()
        )))
    }

    /// Clears every input texture binding. No-op for a layer that never accepted any.
    fn clear_input_textures(&mut self) {}

    /// Clears every output texture binding and invalidates this layer's FBO set; the next
    /// [`Layer::forward`] rebuilds it via an internal `update_fbos`. No-op for a layer that never
    /// bound any.
    fn clear_output_textures(&mut self) {}

    /// Clears the residual texture binding. No-op for a layer that never bound one.
    fn clear_residual_textures(&mut self) {}

    /// The output frame buffer this layer currently renders into, once [`Layer::setup`] has run.
    /// `None` for a layer with no GPU-side output (every CPU layer, and any GPU layer before
    /// `setup`).
    fn frame_buffer(&self) -> Option<&FrameBuffer> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_token_full_masks_nothing() {
        let token = StateToken::full(37);
        assert_eq!(token.seq_length, 37);
        assert_eq!(token.seq_index, 0);
        assert!(!token.is_masked(0));
    }

    #[test]
    fn buffer_spec_slice_count_matches_order() {
        let shallow = BufferSpec {
            port: 0,
            role: PortRole::Source,
            width: 8,
            height: 8,
            pixel_format: PixelFormat::Rgba16F,
            element_type: ElementType::Float16,
            channels: 9,
            order: StorageOrder::GpuShallow,
        };
        assert_eq!(shallow.slice_count(), 3);

        let deep = BufferSpec {
            order: StorageOrder::GpuDeep,
            ..shallow
        };
        assert_eq!(deep.slice_count(), 1);
    }

    #[test]
    fn mask_layers_is_respected() {
        let mut token = StateToken::full(1);
        token.mask_layers.insert(2);
        assert!(token.is_masked(2));
        assert!(!token.is_masked(3));
    }
}
