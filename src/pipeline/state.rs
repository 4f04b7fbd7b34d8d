use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    NotStarted,
    Running,
    Done,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        PipelineStatus::NotStarted
    }
}

impl PipelineStatus {
    fn as_u8(self) -> u8 {
        match self {
            PipelineStatus::NotStarted => 0,
            PipelineStatus::Running => 1,
            PipelineStatus::Done => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineStatus::NotStarted,
            1 => PipelineStatus::Running,
            _ => PipelineStatus::Done,
        }
    }
}

/// Process-wide latch for the startup cycle: `NotStarted -> Running -> Done`,
/// never backwards.
#[derive(Debug, Default)]
pub struct StartupLatch(AtomicU8);

impl StartupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Claims the single run. Only the first caller gets `true`.
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(
                PipelineStatus::NotStarted.as_u8(),
                PipelineStatus::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Claims the single run and hands back a guard that marks the latch
    /// `Done` when dropped, including when the owning future is cancelled.
    pub fn begin(&self) -> Option<StartupRun<'_>> {
        self.try_begin().then_some(StartupRun { latch: self })
    }

    pub fn finish(&self) {
        self.0.store(PipelineStatus::Done.as_u8(), Ordering::Release);
    }
}

/// Held for the duration of the startup cycle.
#[must_use = "dropping the guard finishes the startup run"]
pub struct StartupRun<'a> {
    latch: &'a StartupLatch,
}

impl Drop for StartupRun<'_> {
    fn drop(&mut self) {
        self.latch.finish();
    }
}
