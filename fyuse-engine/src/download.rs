//! Asynchronous GPU→CPU download pipeline (`spec.md` §5): a pool of worker threads, each driving
//! a *derived* [`GfxContext`] that shares GPU object names with the context the engine renders
//! on, runs the readback sequence `wait_client_sync → map PBO → memcpy to CPU buffer → clear PBO
//! pending flag → notify engine callback → optionally notify user callback`. Grounded on
//! `fyrox-core/src/task.rs`'s `futures::executor::ThreadPool`-based task dispatch, composed with
//! `fyuse-gfx::read_buffer::AsyncReadBuffer`'s fence-poll contract (the fence wait itself is the
//! backend's job, inside `AsyncReadBufferTrait::wait_read`).

use fyuse_core::CoreError;
use fyuse_gfx::read_buffer::AsyncReadBuffer;
use fyuse_gfx::server::GfxContext;
use fyuse_tensor::CPUBuffer;
use futures::executor::{ThreadPool, ThreadPoolBuilder};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// Progress notifications fired while a [`DownloadTask`] is in flight. `spec.md` §9's "Async
/// continuations" redesign keeps this as a notification hook, not the primary completion
/// mechanism — that is [`DownloadTask::wait`]/[`DownloadTask::try_poll`].
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// The transfer has been scheduled and a worker has picked it up.
    Commenced {
        /// Forward-step sequence number this download belongs to.
        sequence_no: u64,
    },
    /// The transfer completed successfully.
    Done {
        /// Forward-step sequence number this download belongs to.
        sequence_no: u64,
    },
    /// The transfer failed (typically [`CoreError::Timeout`]).
    Failed {
        /// Forward-step sequence number this download belongs to.
        sequence_no: u64,
        /// Human-readable failure reason.
        error_message: String,
    },
}

/// One scheduled GPU→CPU readback. `context` must be a context derived from (and sharing object
/// names with) the context the triggering `forward` call ran on — the caller is responsible for
/// calling [`GfxContext::create_derived`] before constructing this, per `spec.md` §5.
pub struct DownloadJob {
    /// Forward-step sequence number this download belongs to.
    pub sequence_no: u64,
    /// The derived context this job's worker thread makes current before touching any GPU object.
    pub context: Box<dyn GfxContext>,
    /// The pending pixel transfer request to wait on.
    pub read_buffer: AsyncReadBuffer,
    /// The host buffer the transferred bytes are written into.
    pub target: CPUBuffer,
    /// Fence-wait budget; `spec.md` §5's default is 5 seconds.
    pub timeout: Duration,
    /// Progress-notification sink for this job, if the caller wants one.
    pub on_event: Option<Box<dyn Fn(DownloadEvent) + Send>>,
}

/// Bundles everything one worker needs so it can cross the thread boundary as a single unit.
///
/// Safety: `context` and `read_buffer` are resources of a *derived* context created specifically
/// for this one job (`spec.md` §5: "each bound to a derived context") and are never touched again
/// from the thread that scheduled the job once this struct has been constructed — there is
/// exactly one live handle to each, held by the worker that receives this struct, so there is no
/// concurrent access for `Send` to race against even though the underlying `Rc`/GL handles are
/// not generically thread-safe.
struct CrossThreadJob(DownloadJob);
unsafe impl Send for CrossThreadJob {}

/// A handle to an in-flight (or completed) download. The primary completion mechanism per
/// `spec.md` §9 — callers that don't need progress notifications can simply hold this and call
/// [`Self::wait`] or [`Self::try_poll`].
pub struct DownloadTask {
    sequence_no: u64,
    receiver: Receiver<Result<CPUBuffer, CoreError>>,
}

impl DownloadTask {
    /// The forward-step sequence number this task belongs to.
    pub fn sequence_no(&self) -> u64 {
        self.sequence_no
    }

    /// Blocks until the worker reports a result, bounded by the job's own fence-wait timeout (this
    /// call adds no additional budget of its own).
    pub fn wait(self) -> Result<CPUBuffer, CoreError> {
        self.receiver
            .recv()
            .map_err(|_| CoreError::Protocol("download worker dropped without reporting a result".into()))?
    }

    /// Non-blocking poll: `None` while still in flight, `Some` once the worker has reported.
    pub fn try_poll(&self) -> Option<Result<CPUBuffer, CoreError>> {
        match self.receiver.recv_timeout(Duration::from_secs(0)) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CoreError::Protocol(
                "download worker dropped without reporting a result".into(),
            ))),
        }
    }
}

/// Owns the worker thread pool that runs every scheduled [`DownloadJob`]. One instance per
/// engine, per `spec.md` §9's "Global mutable state" redesign note (no process-wide singleton).
pub struct DownloadPool {
    thread_pool: ThreadPool,
}

impl DownloadPool {
    /// Creates a pool of `worker_threads` OS threads, each available to run one
    /// [`DownloadJob`] at a time.
    pub fn new(worker_threads: usize) -> Result<Self, CoreError> {
        let thread_pool = ThreadPoolBuilder::new()
            .pool_size(worker_threads.max(1))
            .name_prefix("fyuse-download-")
            .create()
            .map_err(|e| CoreError::Resource(format!("failed to create download worker pool: {e}")))?;
        Ok(Self { thread_pool })
    }

    /// Schedules `job` onto the pool and returns a handle the caller can wait or poll on. Fires
    /// [`DownloadEvent::Commenced`] synchronously before returning, matching `spec.md` §8 scenario
    /// 5's "the user callback must receive `DOWNLOAD_COMMENCED` immediately".
    pub fn schedule(&self, job: DownloadJob) -> DownloadTask {
        let sequence_no = job.sequence_no;
        if let Some(on_event) = &job.on_event {
            on_event(DownloadEvent::Commenced { sequence_no });
        }
        let (result_tx, result_rx) = mpsc::channel();
        let wrapped = CrossThreadJob(job);
        self.thread_pool.spawn_ok(async move {
            let CrossThreadJob(mut job) = wrapped;
            let outcome = run_job(&mut job);
            if let Some(on_event) = &job.on_event {
                match &outcome {
                    Ok(_) => on_event(DownloadEvent::Done { sequence_no }),
                    Err(e) => on_event(DownloadEvent::Failed {
                        sequence_no,
                        error_message: e.to_string(),
                    }),
                }
            }
            let _ = result_tx.send(outcome);
        });
        DownloadTask {
            sequence_no,
            receiver: result_rx,
        }
    }
}

/// The actual worker-thread body: make the derived context current, then run the readback
/// sequence. `AsyncReadBufferTrait::wait_read` (called through
/// [`CPUBuffer::read_from_pbo`]) is where the fence wait (`context.wait_client_sync`, in the
/// backend's implementation) actually happens.
fn run_job(job: &mut DownloadJob) -> Result<CPUBuffer, CoreError> {
    job.context.make_current().map_err(CoreError::from)?;
    job.target
        .read_from_pbo(&*job.read_buffer, job.timeout, job.sequence_no)?;
    Ok(job.target.copy_to(None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_construction_respects_minimum_size() {
        let pool = DownloadPool::new(0);
        assert!(pool.is_ok());
    }
}
