//! An async read-back request: the GPU-to-CPU half of `spec.md` §5's download pipeline. A backend
//! implementation schedules a pixel transfer from a frame buffer into a pixel-pack buffer behind
//! a GPU fence, then lets the caller poll (non-blocking) or wait (blocking, bounded) for it.

use crate::error::FrameworkError;
use crate::framebuffer::{FrameBufferTrait, Rect};
use bytemuck::Pod;
use fyuse_core::{define_as_any_trait, define_shared_wrapper};
use std::time::Duration;

define_as_any_trait!(AsyncReadBufferAsAny => AsyncReadBufferTrait);

/// Trait for objects representing an in-flight pixel transfer request.
pub trait AsyncReadBufferTrait: AsyncReadBufferAsAny {
    /// Begins the transfer of `rect` (or the whole attachment, if `None`) from
    /// `color_buffer_index` of `framebuffer` into this object's backing pixel buffer. After this
    /// call returns, [`Self::is_request_running`] is `true` until [`Self::try_read`] consumes the
    /// result.
    fn schedule_pixels_transfer(
        &self,
        framebuffer: &dyn FrameBufferTrait,
        color_buffer_index: u32,
        rect: Option<Rect>,
    ) -> Result<(), FrameworkError>;

    /// Returns `true` if a request has been scheduled and not yet consumed by [`Self::try_read`].
    /// This stays `true` even after the GPU has actually finished the transfer — it only tracks
    /// whether the caller has collected the result yet.
    fn is_request_running(&self) -> bool;

    /// Non-blocking poll: returns the transferred bytes if the GPU fence has signaled, or `None`
    /// if the transfer is still in flight. Once this returns `Some`,
    /// [`Self::is_request_running`] becomes `false`.
    fn try_read(&self) -> Option<Vec<u8>>;

    /// Blocks the calling thread until the fence signals or `timeout` elapses, then behaves like
    /// [`Self::try_read`]. Returns [`FrameworkError::FenceTimedOut`] on timeout. `spec.md` §5
    /// specifies a 5 second default budget for this wait.
    fn wait_read(&self, timeout: Duration) -> Result<Vec<u8>, FrameworkError>;
}

impl dyn AsyncReadBufferTrait {
    /// Same as [`AsyncReadBufferTrait::try_read`], but reinterprets the bytes as `T`.
    pub fn try_read_of_type<T: Pod>(&self) -> Option<Vec<T>> {
        let bytes = self.try_read()?;
        Some(bytemuck::cast_slice(&bytes).to_vec())
    }

    /// Same as [`AsyncReadBufferTrait::wait_read`], but reinterprets the bytes as `T`.
    pub fn wait_read_of_type<T: Pod>(&self, timeout: Duration) -> Result<Vec<T>, FrameworkError> {
        let bytes = self.wait_read(timeout)?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }
}

define_shared_wrapper!(AsyncReadBuffer<dyn AsyncReadBufferTrait>);
