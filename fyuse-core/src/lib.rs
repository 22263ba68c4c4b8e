//! Shared primitives for the FyuseNet crates: logging, error taxonomy, a generational arena, and
//! the `as_any`/shared-handle macros used to build trait-object based GPU resource wrappers.

pub mod as_any;
pub mod bytes;
pub mod error;
pub mod log;
pub mod pool;
pub mod shared;

pub use error::CoreError;
pub use log::{Log, LogMessage, MessageKind};
pub use pool::{Handle, Pool};
