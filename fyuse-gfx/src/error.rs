//! Errors local to the graphics abstraction layer.

use std::error::Error;
use std::ffi::NulError;
use std::fmt::{Display, Formatter};

/// Set of possible graphics-API level errors.
#[derive(Debug)]
pub enum FrameworkError {
    /// Compilation of a shader has failed.
    ShaderCompilationFailed {
        /// Name of the shader.
        shader_name: String,
        /// Compiler error message.
        error_message: String,
    },
    /// Linking a shader program failed.
    ShaderLinkingFailed {
        /// Name of the shader.
        shader_name: String,
        /// Linker error message.
        error_message: String,
    },
    /// Shader source contains invalid characters.
    FaultyShaderSource,
    /// There is no such shader uniform (could have been optimized out).
    UnableToFindShaderUniform(String),
    /// Texture data has insufficient size for the requested format and dimensions.
    InvalidTextureData {
        /// Expected data size in bytes.
        expected_data_size: usize,
        /// Actual data size in bytes.
        actual_data_size: usize,
    },
    /// `None` was passed as texture data where the backend requires initial contents.
    EmptyTextureData,
    /// Tried to draw an element range that the geometry buffer does not have.
    InvalidElementRange {
        /// First index.
        start: usize,
        /// Last index.
        end: usize,
        /// Total amount of elements available.
        total: usize,
    },
    /// A frame buffer could not be constructed or is incomplete.
    InvalidFrameBuffer,
    /// The GPU backend failed to construct a frame buffer object.
    FailedToConstructFBO,
    /// An async read-back request was scheduled while a previous one was still pending.
    ReadBackAlreadyPending,
    /// A GPU fence did not signal inside the configured wait budget.
    FenceTimedOut,
    /// Custom/internal error, usually produced by a specific backend.
    Custom(String),
    /// The graphics context is no longer usable (e.g. its window or surface was destroyed).
    ContextUnavailable,
}

impl Display for FrameworkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameworkError::ShaderCompilationFailed {
                shader_name,
                error_message,
            } => write!(
                f,
                "compilation of \"{shader_name}\" shader failed: {error_message}"
            ),
            FrameworkError::ShaderLinkingFailed {
                shader_name,
                error_message,
            } => write!(f, "linking shader \"{shader_name}\" failed: {error_message}"),
            FrameworkError::FaultyShaderSource => {
                write!(f, "shader source contains invalid characters")
            }
            FrameworkError::UnableToFindShaderUniform(v) => {
                write!(f, "there is no such shader uniform: {v}")
            }
            FrameworkError::InvalidTextureData {
                expected_data_size,
                actual_data_size,
            } => write!(
                f,
                "texture data has insufficient size: expected {expected_data_size}, actual {actual_data_size}"
            ),
            FrameworkError::EmptyTextureData => {
                write!(f, "no texture data was provided where the backend requires some")
            }
            FrameworkError::InvalidElementRange { start, end, total } => write!(
                f,
                "tried to draw an element range the geometry buffer does not have: start {start}, end {end}, total {total}"
            ),
            FrameworkError::InvalidFrameBuffer => write!(f, "frame buffer is invalid"),
            FrameworkError::FailedToConstructFBO => {
                write!(f, "the backend failed to construct a frame buffer object")
            }
            FrameworkError::ReadBackAlreadyPending => {
                write!(f, "an async read-back request was already pending on this buffer")
            }
            FrameworkError::FenceTimedOut => write!(f, "GPU fence did not signal in time"),
            FrameworkError::Custom(v) => write!(f, "{v}"),
            FrameworkError::ContextUnavailable => write!(f, "graphics context is no longer usable"),
        }
    }
}

impl Error for FrameworkError {}

impl From<NulError> for FrameworkError {
    fn from(_: NulError) -> Self {
        Self::FaultyShaderSource
    }
}

impl From<String> for FrameworkError {
    fn from(v: String) -> Self {
        Self::Custom(v)
    }
}

impl From<FrameworkError> for fyuse_core::CoreError {
    fn from(e: FrameworkError) -> Self {
        fyuse_core::CoreError::Gfx(e.to_string())
    }
}
