//! The `Engine`/`NeuralNetwork` orchestration layer: builds a [`fyuse_layer::LayerFactory`]'s
//! output into an addressable layer graph, wires it through a [`crate::buffer_manager::BufferManager`],
//! and drives `setup`/`forward` across it in ascending layer-number order. Grounded on
//! `spec.md` §4.9 and the arena-not-pointer-graph redesign (`SPEC_FULL.md` §6): layers live in a
//! [`fyuse_core::pool::Pool`] addressed by [`fyuse_core::pool::Handle`], with a number→handle
//! index standing in for the original's raw layer-number lookup.

use crate::buffer_manager::BufferManager;
use crate::config::EngineConfig;
use crate::download::{DownloadEvent, DownloadJob, DownloadPool, DownloadTask};
use fyuse_core::pool::{Handle, Pool};
use fyuse_core::CoreError;
use fyuse_gfx::read_buffer::AsyncReadBuffer;
use fyuse_gfx::server::GfxContext;
use fyuse_layer::{Layer, LayerBackend, LayerFactory, ParameterProvider, StateToken};
use fyuse_tensor::CPUBuffer;
use std::collections::HashMap;

/// A compiled layer graph addressed by layer number, built once from a
/// [`fyuse_layer::LayerFactory::compile_layers`] result and never re-ordered afterward.
pub struct LayerGraph {
    pool: Pool<Box<dyn Layer>>,
    by_number: HashMap<i32, Handle<Box<dyn Layer>>>,
    order: Vec<i32>,
}

impl LayerGraph {
    fn from_compiled(compiled: Vec<(i32, Box<dyn Layer>)>) -> Self {
        let mut pool = Pool::with_capacity(compiled.len());
        let mut by_number = HashMap::with_capacity(compiled.len());
        let mut order = Vec::with_capacity(compiled.len());
        for (number, layer) in compiled {
            let handle = pool.spawn(layer);
            by_number.insert(number, handle);
            order.push(number);
        }
        Self { pool, by_number, order }
    }

    /// Borrows the layer declared under `number`, if one was compiled.
    pub fn get(&self, number: i32) -> Option<&dyn Layer> {
        let handle = *self.by_number.get(&number)?;
        self.pool.try_borrow(handle).map(|b| b.as_ref())
    }

    /// Mutably borrows the layer declared under `number`, if one was compiled.
    pub fn get_mut(&mut self, number: i32) -> Option<&mut dyn Layer> {
        let handle = *self.by_number.get(&number)?;
        self.pool.try_borrow_mut(handle).map(|b| b.as_mut())
    }

    /// Every compiled layer's number, in ascending order — the order [`Engine::setup`] and
    /// [`Engine::forward`] walk the graph in.
    pub fn numbers_in_order(&self) -> &[i32] {
        &self.order
    }

    /// Number of layers in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The three hooks a concrete network implements to describe itself. `spec.md` §4.9's
/// `NeuralNetwork` contract, split into declare/wire/load-weights stages so each can be unit
/// tested against a stub [`LayerBackend`] independent of a real GPU context.
pub trait NeuralNetwork<B: LayerBackend> {
    /// Pushes every layer this network is made of onto `factory`, in any order — `factory`
    /// tracks declared layer numbers and [`LayerFactory::compile_layers`] sorts them.
    fn build_layers(&self, factory: &mut LayerFactory<B>) -> Result<(), CoreError>;

    /// Allocates output textures for every producer port via `buffers` and wires each consumer's
    /// declared input/residual ports onto the matching producer.
    fn connect_layers(
        &self,
        graph: &mut LayerGraph,
        buffers: &mut BufferManager,
        context: &dyn GfxContext,
    ) -> Result<(), CoreError>;

    /// Loads every parameterized layer's weights from `provider`. Must run before
    /// [`Engine::setup`].
    fn initialize_weights(&self, graph: &mut LayerGraph, provider: &dyn ParameterProvider) -> Result<(), CoreError>;
}

/// Owns a compiled layer graph, its buffer manager, its graphics context, and the async download
/// worker pool. One instance per running model (`SPEC_FULL.md` §6: no process-wide singleton).
pub struct Engine {
    context: Box<dyn GfxContext>,
    graph: LayerGraph,
    buffers: BufferManager,
    download_pool: DownloadPool,
    config: EngineConfig,
    next_sequence_no: u64,
}

impl Engine {
    /// Builds an engine from `network`: declares layers through `backend`, compiles them,
    /// allocates and wires their buffers on `context`, and starts the download worker pool.
    /// [`Self::initialize_weights`] and [`Self::setup`] must still run before the first
    /// [`Self::forward`].
    pub fn build<B: LayerBackend>(
        network: &dyn NeuralNetwork<B>,
        backend: B,
        context: Box<dyn GfxContext>,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        let mut factory = LayerFactory::new(backend);
        network.build_layers(&mut factory)?;
        let compiled = factory.compile_layers()?;
        let mut graph = LayerGraph::from_compiled(compiled);
        let mut buffers = BufferManager::new();
        network.connect_layers(&mut graph, &mut buffers, context.as_ref())?;
        let download_pool = DownloadPool::new(config.download_worker_threads)?;
        Ok(Self {
            context,
            graph,
            buffers,
            download_pool,
            config,
            next_sequence_no: 0,
        })
    }

    /// Loads every layer's weights from `provider` via `network`'s
    /// [`NeuralNetwork::initialize_weights`] hook.
    pub fn initialize_weights<B: LayerBackend>(
        &mut self,
        network: &dyn NeuralNetwork<B>,
        provider: &dyn ParameterProvider,
    ) -> Result<(), CoreError> {
        network.initialize_weights(&mut self.graph, provider)
    }

    /// Runs [`Layer::setup`] on every layer in ascending number order. Must be called exactly
    /// once, after weights are loaded and every port is wired, before the first
    /// [`Self::forward`].
    pub fn setup(&mut self) -> Result<(), CoreError> {
        self.context.make_current().map_err(CoreError::from)?;
        for number in self.graph.numbers_in_order().to_vec() {
            let layer = self
                .graph
                .get_mut(number)
                .ok_or_else(|| CoreError::Protocol(format!("layer {number} missing from graph")))?;
            layer.setup()?;
        }
        Ok(())
    }

    /// Runs one forward step across every non-masked layer in ascending number order, making this
    /// engine's context current on the calling thread first. Returns the sequence number this run
    /// was stamped with, for correlating any async downloads scheduled during it.
    pub fn forward(&mut self, state: &StateToken) -> Result<u64, CoreError> {
        self.context.make_current().map_err(CoreError::from)?;
        let sequence_no = self.next_sequence_no;
        self.next_sequence_no += 1;
        for number in self.graph.numbers_in_order().to_vec() {
            if state.is_masked(number) {
                continue;
            }
            let layer = self
                .graph
                .get_mut(number)
                .ok_or_else(|| CoreError::Protocol(format!("layer {number} missing from graph")))?;
            layer.forward(sequence_no, state)?;
        }
        Ok(sequence_no)
    }

    /// Schedules an async GPU→CPU download of `target`'s shape on a context derived from this
    /// engine's own, stamped with `sequence_no` (normally the value [`Self::forward`] returned for
    /// the run that produced the data being read back). `spec.md` §5: "each [worker] bound to a
    /// derived context."
    pub fn schedule_download(
        &self,
        sequence_no: u64,
        read_buffer: AsyncReadBuffer,
        target: CPUBuffer,
        on_event: Option<Box<dyn Fn(DownloadEvent) + Send>>,
    ) -> Result<DownloadTask, CoreError> {
        let derived = self.context.create_derived().map_err(CoreError::from)?;
        let job = DownloadJob {
            sequence_no,
            context: derived,
            read_buffer,
            target,
            timeout: self.config.fence_timeout(),
            on_event,
        };
        Ok(self.download_pool.schedule(job))
    }

    pub fn buffers(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    pub fn graph(&mut self) -> &mut LayerGraph {
        &mut self.graph
    }

    pub fn context(&self) -> &dyn GfxContext {
        self.context.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tears down every layer's GPU resources. Idempotent, since [`Layer::cleanup`] is.
    pub fn cleanup(&mut self) {
        for number in self.graph.numbers_in_order().to_vec() {
            if let Some(layer) = self.graph.get_mut(number) {
                layer.cleanup();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fyuse_layer::types::{ComputeDevice, LayerKind};
    use fyuse_layer::{BufferSpec, LayerBuilder, LayerFlags};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingLayer {
        number: i32,
        calls: Rc<RefCell<Vec<i32>>>,
    }

    impl Layer for RecordingLayer {
        fn number(&self) -> i32 {
            self.number
        }
        fn name(&self) -> &str {
            "recording"
        }
        fn kind(&self) -> LayerKind {
            LayerKind::Other(0)
        }
        fn flags(&self) -> LayerFlags {
            LayerFlags::empty()
        }
        fn device(&self) -> ComputeDevice {
            ComputeDevice::Cpu
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
            self.calls.borrow_mut().push(self.number);
            Ok(())
        }
        fn load_parameters(&mut self, _provider: &dyn ParameterProvider) -> Result<(), CoreError> {
            Ok(())
        }
        fn cleanup(&mut self) {}
    }

    struct RecordingBackend {
        calls: Rc<RefCell<Vec<i32>>>,
    }

    impl LayerBackend for RecordingBackend {
        fn instantiate(&self, builder: LayerBuilder) -> Result<Box<dyn Layer>, CoreError> {
            Ok(Box::new(RecordingLayer {
                number: builder.number(),
                calls: self.calls.clone(),
            }))
        }
    }

    struct ThreeLayerNetwork;

    impl NeuralNetwork<RecordingBackend> for ThreeLayerNetwork {
        fn build_layers(&self, factory: &mut LayerFactory<RecordingBackend>) -> Result<(), CoreError> {
            use fyuse_layer::builder::{ConvBuilder, LayerBuilderCommon};
            for number in [2, 0, 1] {
                factory.push(LayerBuilder::Conv(ConvBuilder {
                    common: LayerBuilderCommon::new(format!("layer{number}"), LayerKind::Convolution2d)
                        .number(number),
                    kernel: 1,
                    dilation: 1,
                    group_size: 1,
                }))?;
            }
            Ok(())
        }

        fn connect_layers(
            &self,
            _graph: &mut LayerGraph,
            _buffers: &mut BufferManager,
            _context: &dyn GfxContext,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        fn initialize_weights(&self, _graph: &mut LayerGraph, _provider: &dyn ParameterProvider) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn graph_of_three(calls: Rc<RefCell<Vec<i32>>>) -> LayerGraph {
        let network = ThreeLayerNetwork;
        let mut factory = LayerFactory::new(RecordingBackend { calls });
        network.build_layers(&mut factory).unwrap();
        LayerGraph::from_compiled(factory.compile_layers().unwrap())
    }

    #[test]
    fn layer_graph_preserves_ascending_order_regardless_of_push_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let graph = graph_of_three(calls);
        assert_eq!(graph.numbers_in_order(), &[0, 1, 2]);
    }

    #[test]
    fn layer_graph_get_resolves_by_declared_number() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let graph = graph_of_three(calls);
        assert_eq!(graph.get(1).unwrap().number(), 1);
        assert!(graph.get(99).is_none());
    }
}
