//! Lightweight pipeline statistics, useful when diagnosing why a network's forward pass is slower
//! than expected (e.g. an unexpectedly large number of texture rebinds from a layer that forgot to
//! cache its program).

use std::fmt::{Display, Formatter};

/// Cumulative counters for a run of the pipeline.
#[derive(Debug, Default, Copy, Clone)]
pub struct PipelineStatistics {
    /// Total number of texture bindings performed.
    pub texture_binding_changes: usize,
    /// Total number of frame buffer bindings performed.
    pub framebuffer_binding_changes: usize,
    /// Total number of program (shader) bindings performed.
    pub program_binding_changes: usize,
    /// Total number of draw calls issued.
    pub draw_calls: usize,
}

impl std::ops::AddAssign for PipelineStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.texture_binding_changes += rhs.texture_binding_changes;
        self.framebuffer_binding_changes += rhs.framebuffer_binding_changes;
        self.program_binding_changes += rhs.program_binding_changes;
        self.draw_calls += rhs.draw_calls;
    }
}

impl Display for PipelineStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "draw calls: {}, textures bound: {}, fbos bound: {}, programs bound: {}",
            self.draw_calls,
            self.texture_binding_changes,
            self.framebuffer_binding_changes,
            self.program_binding_changes
        )
    }
}
