//! The exit-status contract shared with the remote update script.
//!
//! The script has no other channel back to the orchestrator: every branch in
//! the update loop is decided from one of these codes.

/// No further updates pending and no restart required.
pub const CONVERGED: i32 = 0;

/// Updates were installed and the machine must restart before continuing.
pub const RESTART_REQUIRED: i32 = 101;

/// Interpretation of a raw update-script exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Converged,
    RestartRequired,
    Failed(i32),
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            CONVERGED => ExitStatus::Converged,
            RESTART_REQUIRED => ExitStatus::RestartRequired,
            other => ExitStatus::Failed(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Converged => CONVERGED,
            ExitStatus::RestartRequired => RESTART_REQUIRED,
            ExitStatus::Failed(code) => code,
        }
    }

    /// The pending-reboot check reuses the same codes as a yes/no answer.
    /// `None` means the check itself failed.
    pub fn reboot_state(self) -> Option<RebootState> {
        match self {
            ExitStatus::Converged => Some(RebootState::Clear),
            ExitStatus::RestartRequired => Some(RebootState::Pending),
            ExitStatus::Failed(_) => None,
        }
    }
}

impl From<i32> for ExitStatus {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootState {
    Clear,
    Pending,
}
