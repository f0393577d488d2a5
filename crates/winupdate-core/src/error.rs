use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the connection layer, as opposed to a command that ran
/// and exited non-zero.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("upload to '{path}' failed: {message}")]
    Upload { path: String, message: String },

    #[error("process error: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The restart sub-step (or update phase) an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Upload,
    Update,
    IssueRestart,
    WaitForAvailability,
    DrainPendingReboot,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Upload => "upload",
            Step::Update => "update",
            Step::IssueRestart => "issue restart",
            Step::WaitForAvailability => "wait for availability",
            Step::DrainPendingReboot => "drain pending reboot",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Windows update script exited with non-zero exit status: {status}")]
    ScriptFailed { status: i32 },

    #[error("{step}: remote command exited with status {status}")]
    CommandRejected { step: Step, status: i32 },

    #[error("{step}: gave up after {budget:?} ({attempts} attempts){}", last_error_suffix(.last_error))]
    TimedOut {
        step: Step,
        budget: Duration,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("{step}: cancelled")]
    Cancelled { step: Step },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("cannot decode PowerShell command: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl UpdateError {
    /// True when a retry budget ran out, as opposed to a command failing.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, UpdateError::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpdateError::Cancelled { .. })
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(": last error: {e}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
