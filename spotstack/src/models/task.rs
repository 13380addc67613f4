use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Completion value that marks a task as finished.
///
/// Tasks carry no status enum: `completed == COMPLETED_DONE` is the only
/// terminal signal, and progress is never reported in between.
pub const COMPLETED_DONE: u8 = 100;

/// Caller-visible progress record for one provisioning request.
///
/// Invariant: `is_error` implies `completed == COMPLETED_DONE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub ecp_uuid: String,
    pub vm_uuid: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub completed: u8,
    pub is_error: bool,
    pub message: Option<String>,
}

impl Task {
    pub fn new(vm_uuid: &str) -> Self {
        Self::with_id(&super::generate_id(), vm_uuid)
    }

    pub fn with_id(ecp_uuid: &str, vm_uuid: &str) -> Self {
        Self {
            ecp_uuid: ecp_uuid.to_string(),
            vm_uuid: vm_uuid.to_string(),
            started: Utc::now(),
            ended: None,
            completed: 0,
            is_error: false,
            message: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed == COMPLETED_DONE
    }

    /// Mark the task finished successfully.
    pub fn succeed(&mut self, message: impl Into<String>) {
        self.finish(false, message.into());
    }

    /// Mark the task finished with an error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.finish(true, message.into());
    }

    fn finish(&mut self, is_error: bool, message: String) {
        self.completed = COMPLETED_DONE;
        self.is_error = is_error;
        self.message = Some(message);
        self.ended = Some(Utc::now());
    }
}
