//! Build progress as an explicit linear state machine.
//!
//! ```text
//! Pending → Running(Download) → Running(Extract) → ... → Running(Register) → Done
//!              │                     │                        │
//!              └─────────────────────┴────────────────────────┴→ Failed { step, error }
//! ```

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

/// One step of an image build, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    Download,
    Extract,
    LocateOffset,
    Mount,
    BootFiles,
    RootFs,
    Convert,
    Unmount,
    Publish,
    Register,
}

impl BuildStep {
    pub const ALL: [BuildStep; 10] = [
        BuildStep::Download,
        BuildStep::Extract,
        BuildStep::LocateOffset,
        BuildStep::Mount,
        BuildStep::BootFiles,
        BuildStep::RootFs,
        BuildStep::Convert,
        BuildStep::Unmount,
        BuildStep::Publish,
        BuildStep::Register,
    ];

    /// Task name used in logs and pipeline metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStep::Download => "package_download",
            BuildStep::Extract => "disk_extract",
            BuildStep::LocateOffset => "partition_offset",
            BuildStep::Mount => "disk_mount",
            BuildStep::BootFiles => "boot_files_copy",
            BuildStep::RootFs => "rootfs_copy",
            BuildStep::Convert => "image_convert",
            BuildStep::Unmount => "disk_unmount",
            BuildStep::Publish => "image_publish",
            BuildStep::Register => "package_register",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<BuildStep> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn is_first(&self) -> bool {
        self.index() == 0
    }

    pub fn is_last(&self) -> bool {
        self.next().is_none()
    }
}

impl std::fmt::Display for BuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Pending,
    Running(BuildStep),
    Done,
    Failed { step: BuildStep, error: String },
}

impl BuildState {
    /// Enter `step`. Only the step after the current one may start.
    pub fn start(&mut self, step: BuildStep) -> SpotstackResult<()> {
        let allowed = match self {
            BuildState::Pending => step.is_first(),
            BuildState::Running(current) => current.next() == Some(step),
            BuildState::Done | BuildState::Failed { .. } => false,
        };
        if !allowed {
            return Err(SpotstackError::InvalidState(format!(
                "cannot start build step {} from {:?}",
                step, self
            )));
        }
        *self = BuildState::Running(step);
        Ok(())
    }

    /// Leave the last step.
    pub fn finish(&mut self) -> SpotstackResult<()> {
        if !matches!(self, BuildState::Running(step) if step.is_last()) {
            return Err(SpotstackError::InvalidState(format!(
                "cannot finish build from {:?}",
                self
            )));
        }
        *self = BuildState::Done;
        Ok(())
    }

    /// Record a failure at the current step. A failure before any step
    /// started is attributed to the first step.
    pub fn fail(&mut self, error: impl Into<String>) {
        let step = match self {
            BuildState::Running(step) => *step,
            BuildState::Failed { step, .. } => *step,
            BuildState::Pending | BuildState::Done => BuildStep::ALL[0],
        };
        *self = BuildState::Failed {
            step,
            error: error.into(),
        };
    }

    pub fn current_step(&self) -> Option<BuildStep> {
        match self {
            BuildState::Running(step) | BuildState::Failed { step, .. } => Some(*step),
            BuildState::Pending | BuildState::Done => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Done | BuildState::Failed { .. })
    }
}
