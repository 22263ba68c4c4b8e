//! Ties the layer catalogue (`fyuse-layer`) to a concrete graphics context (`fyuse-gfx`): manages
//! intermediate texture lifetime, orchestrates a compiled layer graph through `setup`/`forward`,
//! supplies the in-memory parameter provider checkpoint loaders populate, and drives the
//! asynchronous GPU→CPU download pipeline. One [`engine::Engine`] per running model.

pub mod buffer_manager;
pub mod config;
pub mod download;
pub mod engine;
pub mod params;

pub use buffer_manager::BufferManager;
pub use config::{EngineConfig, PrecisionMode};
pub use download::{DownloadEvent, DownloadJob, DownloadPool, DownloadTask};
pub use engine::{Engine, LayerGraph, NeuralNetwork};
pub use params::{with_param, MapParameterProvider};
