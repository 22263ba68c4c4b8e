//! GPU fences: the synchronization primitive the async download pipeline blocks on (`spec.md`
//! §5). A fence is inserted into the command stream right after the blit into a PBO and signals
//! once the GPU has actually reached that point, which is the earliest point at which mapping the
//! PBO for read is guaranteed not to return stale or partial data.

use fyuse_core::define_as_any_trait;

define_as_any_trait!(GpuFenceAsAny => GpuFenceTrait);

/// Trait implemented by a backend's concrete fence object. Opaque to everything above
/// `fyuse-gfx`; callers only ever pass a [`GpuFence`] back to
/// [`crate::server::GfxContext::wait_client_sync`]/[`crate::server::GfxContext::remove_sync`].
pub trait GpuFenceTrait: GpuFenceAsAny {}

/// An owned handle to a fence created by [`crate::server::GfxContext::issue_sync`].
pub struct GpuFence(pub Box<dyn GpuFenceTrait>);
