//! Errors shared across every layer of the FyuseNet stack.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// The engine-wide error taxonomy. Graphics-API-local errors (shader compile failures, incomplete
/// FBOs, and the like) are reported by `fyuse-gfx`'s own `FrameworkError` and folded into
/// [`CoreError::Gfx`] as they cross into engine-level code.
#[derive(Debug)]
pub enum CoreError {
    /// A network or layer was described in a way the builder/factory cannot honor: unknown layer
    /// type, a layer number reused by two builders, or a flag/activation combination that is not
    /// supported together.
    Configuration(String),
    /// Allocating or binding a GPU or host resource failed.
    Resource(String),
    /// A component was used out of the order its contract requires (e.g. `forward` called before
    /// `setup`, or a buffer mapped twice without an intervening unmap).
    Protocol(String),
    /// An asynchronous operation did not complete inside its configured time budget.
    Timeout(String),
    /// A tensor storage-order conversion that is not implemented was requested.
    UnsupportedConversion {
        /// The order converted from.
        from: &'static str,
        /// The order that was requested.
        to: &'static str,
    },
    /// A lower-level graphics error bubbled up unchanged.
    Gfx(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            CoreError::Resource(msg) => write!(f, "resource error: {msg}"),
            CoreError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            CoreError::Timeout(msg) => write!(f, "timed out: {msg}"),
            CoreError::UnsupportedConversion { from, to } => {
                write!(f, "unsupported conversion from {from} to {to}")
            }
            CoreError::Gfx(msg) => write!(f, "graphics error: {msg}"),
        }
    }
}

impl Error for CoreError {}

impl From<String> for CoreError {
    fn from(msg: String) -> Self {
        CoreError::Configuration(msg)
    }
}

impl From<&str> for CoreError {
    fn from(msg: &str) -> Self {
        CoreError::Configuration(msg.to_owned())
    }
}
