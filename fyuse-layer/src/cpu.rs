//! CPU-backed layer variants — `spec.md` §4.5's "Variants: CPU layers (few; reduce, tiny-conv)"
//! and §9's `{CpuConv, CpuReduce, ...}`. Unlike a GPU layer, a CPU layer never binds a texture: it
//! is staged with a [`fyuse_tensor::CPUBuffer`] before `forward` and its result is retrieved with
//! `take_output`, the same staging discipline [`crate::gpu::GpuUpload::stage`]/
//! [`crate::gpu::GpuDownload::take_output`] use for the GPU↔host boundary. `add_input_texture`/
//! `add_output_texture` keep the [`Layer`] trait's default rejection, since these layers are never
//! wired with GPU handles.

use crate::flags::LayerFlags;
use crate::layer::{BufferSpec, Layer, PortRole, StateToken};
use crate::params::ParameterProvider;
use crate::types::{ComputeDevice, LayerKind};
use fyuse_core::CoreError;
use fyuse_gfx::texture::PixelFormat;
use fyuse_tensor::shape::{BufferShape, ElementType, StorageOrder};
use fyuse_tensor::CPUBuffer;

fn channelwise_spec(port: usize, role: PortRole, width: usize, height: usize, channels: usize) -> BufferSpec {
    BufferSpec {
        port,
        role,
        width,
        height,
        pixel_format: PixelFormat::Rgba32F,
        element_type: ElementType::Float32,
        channels,
        order: StorageOrder::Channelwise,
    }
}

/// Sums a channelwise `CPUBuffer` down to a single output channel — the cheap host-side
/// reduction `spec.md` names as one of the handful of layers not worth a GPU round trip (e.g. a
/// tiny scalar head on top of an otherwise GPU-resident network). Grounded on `spec.md` §4.5.
pub struct CpuReduce {
    number: i32,
    name: String,
    width: usize,
    height: usize,
    input_channels: usize,
    input: Option<CPUBuffer>,
    output: Option<CPUBuffer>,
    valid: bool,
}

impl CpuReduce {
    pub fn new(number: i32, name: impl Into<String>, width: usize, height: usize, input_channels: usize) -> Self {
        Self {
            number,
            name: name.into(),
            width,
            height,
            input_channels,
            input: None,
            output: None,
            valid: false,
        }
    }

    /// Queues `buffer` to be reduced on the next `forward` call.
    pub fn stage(&mut self, buffer: CPUBuffer) {
        self.input = Some(buffer);
    }

    /// Takes the most recently produced output, if any.
    pub fn take_output(&mut self) -> Option<CPUBuffer> {
        self.output.take()
    }
}

impl Layer for CpuReduce {
    fn number(&self) -> i32 {
        self.number
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> LayerKind {
        LayerKind::Reduce
    }
    fn flags(&self) -> LayerFlags {
        LayerFlags::empty()
    }
    fn device(&self) -> ComputeDevice {
        ComputeDevice::Cpu
    }
    fn required_input_buffers(&self) -> Vec<BufferSpec> {
        vec![channelwise_spec(0, PortRole::Source, self.width, self.height, self.input_channels)]
    }
    fn required_output_buffers(&self) -> Vec<BufferSpec> {
        vec![channelwise_spec(0, PortRole::Dest, self.width, self.height, 1)]
    }
    fn setup(&mut self) -> Result<(), CoreError> {
        self.valid = true;
        Ok(())
    }
    fn is_valid(&self) -> bool {
        self.valid
    }
    fn forward(&mut self, _sequence_no: u64, _state: &StateToken) -> Result<(), CoreError> {
        if !self.valid {
            return Err(CoreError::Protocol(format!(
                "reduce layer \"{}\" forwarded before setup",
                self.name
            )));
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| CoreError::Protocol(format!("reduce layer \"{}\" has no staged input", self.name)))?;
        let plane = self.width * self.height;
        let src = input.map::<f32>();
        if src.len() < plane * self.input_channels {
            return Err(CoreError::Protocol(format!(
                "reduce layer \"{}\" received a buffer smaller than its declared shape",
                self.name
            )));
        }
        let out_shape = BufferShape::new(self.height, self.width, 1, 0, input.shape().data_type(), StorageOrder::Channelwise);
        let mut out = CPUBuffer::new(out_shape);
        {
            let dst = out.map_mut::<f32>();
            for pixel in 0..plane {
                let mut sum = 0.0f32;
                for channel in 0..self.input_channels {
                    sum += src[channel * plane + pixel];
                }
                dst[pixel] = sum;
            }
        }
        self.output = Some(out);
        Ok(())
    }
    fn load_parameters(&mut self, _provider: &dyn ParameterProvider) -> Result<(), CoreError> {
        Ok(())
    }
    fn cleanup(&mut self) {
        self.input = None;
        self.output = None;
        self.valid = false;
    }
}

/// A direct, un-tiled 2D convolution computed on the host — `spec.md`'s "tiny-conv": small enough
/// (few input/output channels, small kernel) that the texture round trip and shader-pass
/// bookkeeping a [`crate::gpu::GpuConv`] needs isn't worth paying for. Weights are loaded flat,
/// `[out][in][ky][kx]`, same convention `spec.md` §4.5 uses for the GPU packaging before it gets
/// reshuffled into render-pass packages.
pub struct CpuConv {
    number: i32,
    name: String,
    width: usize,
    height: usize,
    input_channels: usize,
    output_channels: usize,
    kernel: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    input: Option<CPUBuffer>,
    output: Option<CPUBuffer>,
    valid: bool,
}

impl CpuConv {
    pub fn new(
        number: i32,
        name: impl Into<String>,
        width: usize,
        height: usize,
        input_channels: usize,
        output_channels: usize,
        kernel: usize,
    ) -> Self {
        Self {
            number,
            name: name.into(),
            width,
            height,
            input_channels,
            output_channels,
            kernel,
            weights: vec![0.0; output_channels * input_channels * kernel * kernel],
            bias: vec![0.0; output_channels],
            input: None,
            output: None,
            valid: false,
        }
    }

    pub fn stage(&mut self, buffer: CPUBuffer) {
        self.input = Some(buffer);
    }

    pub fn take_output(&mut self) -> Option<CPUBuffer> {
        self.output.take()
    }
}

impl Layer for CpuConv {
    fn number(&self) -> i32 {
        self.number
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> LayerKind {
        LayerKind::Convolution2d
    }
    fn flags(&self) -> LayerFlags {
        LayerFlags::empty()
    }
    fn device(&self) -> ComputeDevice {
        ComputeDevice::Cpu
    }
    fn required_input_buffers(&self) -> Vec<BufferSpec> {
        vec![channelwise_spec(0, PortRole::Source, self.width, self.height, self.input_channels)]
    }
    fn required_output_buffers(&self) -> Vec<BufferSpec> {
        vec![channelwise_spec(0, PortRole::Dest, self.width, self.height, self.output_channels)]
    }
    fn setup(&mut self) -> Result<(), CoreError> {
        if self.weights.len() != self.output_channels * self.input_channels * self.kernel * self.kernel {
            return Err(CoreError::Protocol(format!(
                "conv layer \"{}\" set up with a weight blob of the wrong size",
                self.name
            )));
        }
        self.valid = true;
        Ok(())
    }
    fn is_valid(&self) -> bool {
        self.valid
    }
    fn forward(&mut self, _sequence_no: u64, _state: &StateToken) -> Result<(), CoreError> {
        if !self.valid {
            return Err(CoreError::Protocol(format!(
                "conv layer \"{}\" forwarded before setup",
                self.name
            )));
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| CoreError::Protocol(format!("conv layer \"{}\" has no staged input", self.name)))?;
        let (w, h, k) = (self.width as isize, self.height as isize, self.kernel as isize);
        let half = k / 2;
        let plane = (w * h) as usize;
        let src = input.map::<f32>();
        if src.len() < plane * self.input_channels {
            return Err(CoreError::Protocol(format!(
                "conv layer \"{}\" received a buffer smaller than its declared shape",
                self.name
            )));
        }
        let out_shape = BufferShape::new(
            self.height,
            self.width,
            self.output_channels,
            0,
            input.shape().data_type(),
            StorageOrder::Channelwise,
        );
        let mut out = CPUBuffer::new(out_shape);
        {
            let dst = out.map_mut::<f32>();
            for oc in 0..self.output_channels {
                for y in 0..h {
                    for x in 0..w {
                        let mut acc = self.bias[oc];
                        for ic in 0..self.input_channels {
                            for ky in 0..k {
                                let sy = y + ky - half;
                                if sy < 0 || sy >= h {
                                    continue;
                                }
                                for kx in 0..k {
                                    let sx = x + kx - half;
                                    if sx < 0 || sx >= w {
                                        continue;
                                    }
                                    let weight_idx = ((oc * self.input_channels + ic) * self.kernel as usize + ky as usize)
                                        * self.kernel as usize
                                        + kx as usize;
                                    let src_idx = ic * plane + (sy * w + sx) as usize;
                                    acc += self.weights[weight_idx] * src[src_idx];
                                }
                            }
                        }
                        dst[oc * plane + (y * w + x) as usize] = acc;
                    }
                }
            }
        }
        self.output = Some(out);
        Ok(())
    }
    fn load_parameters(&mut self, provider: &dyn ParameterProvider) -> Result<(), CoreError> {
        let weights = provider.get(&format!("{}.weights", self.name), self.number, 0)?;
        self.weights = weights.with(|values: &Vec<f32>| values.clone())?;
        if let Ok(bias) = provider.get(&format!("{}.bias", self.name), self.number, 0) {
            self.bias = bias.with(|values: &Vec<f32>| values.clone())?;
        }
        Ok(())
    }
    fn cleanup(&mut self) {
        self.input = None;
        self.output = None;
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWeights {
        weights: Vec<f32>,
        bias: Vec<f32>,
    }

    impl ParameterProvider for FixedWeights {
        fn get(&self, name: &str, _layer_no: i32, _sub_index: usize) -> Result<crate::params::Blob, CoreError> {
            if name.ends_with(".weights") {
                Ok(crate::params::Blob::new(self.weights.clone()))
            } else {
                Ok(crate::params::Blob::new(self.bias.clone()))
            }
        }
        fn data_type(&self, _name: &str, _layer_no: i32, _sub_index: usize) -> Result<ElementType, CoreError> {
            Ok(ElementType::Float32)
        }
    }

    #[test]
    fn cpu_reduce_sums_channels_per_pixel() {
        let mut layer = CpuReduce::new(0, "reduce", 2, 2, 3);
        layer.setup().unwrap();
        let shape = BufferShape::new(2, 2, 3, 0, ElementType::Float32, StorageOrder::Channelwise);
        let mut input = CPUBuffer::new(shape);
        for (i, v) in input.map_mut::<f32>().iter_mut().enumerate() {
            *v = i as f32;
        }
        layer.stage(input);
        layer.forward(0, &StateToken::full(1)).unwrap();
        let output = layer.take_output().unwrap();
        // pixel 0: channel 0 -> 0, channel 1 -> 4, channel 2 -> 8 => 12
        assert_eq!(output.map::<f32>()[0], 12.0);
    }

    #[test]
    fn cpu_conv_applies_identity_kernel() {
        let mut layer = CpuConv::new(1, "conv", 2, 2, 1, 1, 1);
        let provider = FixedWeights {
            weights: vec![1.0],
            bias: vec![0.5],
        };
        layer.load_parameters(&provider).unwrap();
        layer.setup().unwrap();
        let shape = BufferShape::new(2, 2, 1, 0, ElementType::Float32, StorageOrder::Channelwise);
        let mut input = CPUBuffer::new(shape);
        for (i, v) in input.map_mut::<f32>().iter_mut().enumerate() {
            *v = i as f32;
        }
        layer.stage(input);
        layer.forward(0, &StateToken::full(1)).unwrap();
        let output = layer.take_output().unwrap();
        assert_eq!(output.map::<f32>(), &[0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn cpu_conv_rejects_forward_before_setup() {
        let mut layer = CpuConv::new(2, "conv", 2, 2, 1, 1, 1);
        layer.stage(CPUBuffer::new(BufferShape::new(2, 2, 1, 0, ElementType::Float32, StorageOrder::Channelwise)));
        assert!(matches!(layer.forward(0, &StateToken::full(1)), Err(CoreError::Protocol(_))));
    }
}
