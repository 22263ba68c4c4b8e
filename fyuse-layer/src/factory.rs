//! Collects pushed builders keyed by layer number and compiles them into an ordered sequence of
//! layer builders, ready for the buffer manager and engine to wire up. Grounded on `spec.md`
//! §4.7 and the `BufferManager`/arena wiring pattern in `fyrox-core/src/pool/mod.rs` (`spawn`/
//! `borrow` shape), applied here to layer numbers instead of scene-node handles.

use crate::builder::LayerBuilder;
use crate::types::ComputeDevice;
use fyuse_core::CoreError;
use std::collections::BTreeMap;

/// Which backend a freshly pushed builder is routed to. `fyuse-engine` supplies the concrete
/// producer; this crate only needs to know which one a given builder's declared
/// [`ComputeDevice`] selects.
pub trait LayerBackend {
    /// Instantiates a compiled layer from `builder`. Implementations are expected to dispatch on
    /// `builder.kind()`/`builder.compute_device()` and construct the matching
    /// [`crate::layer::Layer`] variant (`spec.md` §9's `GpuConv`/`GpuDeepConv`/`GpuDownload`/... or
    /// `CpuConv`/`CpuReduce`); this trait only fixes the entry point the factory calls.
    fn instantiate(&self, builder: LayerBuilder) -> Result<Box<dyn crate::layer::Layer>, CoreError>;
}

/// Number-keyed collection of pushed builders. Grounded on `spec.md` §4.7's invariants: every
/// builder must declare `number >= 0`; numbers must be unique; `compile_layers` yields an ordered
/// map in ascending number order; ownership of each builder is released (consumed) exactly once.
pub struct LayerFactory<B: LayerBackend> {
    backend: B,
    builders: BTreeMap<i32, LayerBuilder>,
}

impl<B: LayerBackend> LayerFactory<B> {
    /// Creates an empty factory backed by `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            builders: BTreeMap::new(),
        }
    }

    /// Transfers ownership of `builder` into this factory, keyed by its declared number. Fails
    /// with [`CoreError::Configuration`] if the number is negative or already taken by an earlier
    /// push — mirrors `spec.md` §8's testable property "`LayerFactory::push` rejects a builder
    /// whose number collides with an earlier builder."
    pub fn push(&mut self, builder: LayerBuilder) -> Result<(), CoreError> {
        let number = builder.number();
        if number < 0 {
            return Err(CoreError::Configuration(format!(
                "layer \"{}\" declared an invalid number {number}; every layer must declare number >= 0",
                builder.common().name()
            )));
        }
        if self.builders.contains_key(&number) {
            return Err(CoreError::Configuration(format!(
                "duplicate layer number {number} (already pushed as \"{}\")",
                self.builders[&number].common().name()
            )));
        }
        self.builders.insert(number, builder);
        Ok(())
    }

    /// Number of builders currently held.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Consumes every pushed builder and instantiates each through the backend, in ascending
    /// layer-number order, routing construction per the builder's declared
    /// [`ComputeDevice`] (the backend itself decides what to do with a device it doesn't expect —
    /// this factory only guarantees ordering and uniqueness).
    pub fn compile_layers(mut self) -> Result<Vec<(i32, Box<dyn crate::layer::Layer>)>, CoreError> {
        let builders = std::mem::take(&mut self.builders);
        let mut compiled = Vec::with_capacity(builders.len());
        for (number, builder) in builders {
            let device = builder.compute_device();
            let _ = device; // routing happens inside the backend; kept for readability at call sites.
            let layer = self.backend.instantiate(builder)?;
            compiled.push((number, layer));
        }
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ConvBuilder, LayerBuilderCommon};
    use crate::layer::{BufferSpec, Layer, StateToken};
    use crate::types::LayerKind;

    struct NullLayer {
        number: i32,
        kind: LayerKind,
    }

    impl Layer for NullLayer {
        fn number(&self) -> i32 {
            self.number
        }
        fn name(&self) -> &str {
            "null"
        }
        fn kind(&self) -> LayerKind {
            self.kind
        }
        fn flags(&self) -> crate::flags::LayerFlags {
            crate::flags::LayerFlags::empty()
        }
        fn device(&self) -> ComputeDevice {
            ComputeDevice::Gpu
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
        fn load_parameters(
            &mut self,
            _provider: &dyn crate::params::ParameterProvider,
        ) -> Result<(), CoreError> {
            Ok(())
        }
        fn cleanup(&mut self) {}
    }

    struct NullBackend;

    impl LayerBackend for NullBackend {
        fn instantiate(&self, builder: LayerBuilder) -> Result<Box<dyn Layer>, CoreError> {
            Ok(Box::new(NullLayer {
                number: builder.number(),
                kind: builder.kind(),
            }))
        }
    }

    fn conv_builder(name: &str, number: i32) -> LayerBuilder {
        LayerBuilder::Conv(ConvBuilder {
            common: LayerBuilderCommon::new(name, LayerKind::Convolution2d).number(number),
            kernel: 3,
            dilation: 1,
            group_size: 1,
        })
    }

    #[test]
    fn push_rejects_negative_number() {
        let mut factory = LayerFactory::new(NullBackend);
        let builder = LayerBuilder::Conv(ConvBuilder {
            common: LayerBuilderCommon::new("unset", LayerKind::Convolution2d),
            kernel: 1,
            dilation: 1,
            group_size: 1,
        });
        assert!(matches!(factory.push(builder), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn push_rejects_duplicate_number() {
        let mut factory = LayerFactory::new(NullBackend);
        factory.push(conv_builder("a", 3)).unwrap();
        let err = factory.push(conv_builder("b", 3));
        assert!(matches!(err, Err(CoreError::Configuration(_))));
    }

    #[test]
    fn compile_layers_yields_ascending_order() {
        let mut factory = LayerFactory::new(NullBackend);
        factory.push(conv_builder("c", 5)).unwrap();
        factory.push(conv_builder("a", 1)).unwrap();
        factory.push(conv_builder("b", 3)).unwrap();
        let compiled = factory.compile_layers().unwrap();
        let numbers: Vec<i32> = compiled.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 3, 5]);
    }
}
