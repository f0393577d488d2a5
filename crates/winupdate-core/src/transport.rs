use async_trait::async_trait;

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// RemoteInvocation
// ---------------------------------------------------------------------------

/// One command to execute on the target, plus which exit statuses count as
/// the command having done its job.
#[derive(Debug, Clone)]
pub struct RemoteInvocation {
    command: String,
    accepts: fn(i32) -> bool,
}

fn zero(status: i32) -> bool {
    status == 0
}

fn any(_status: i32) -> bool {
    true
}

impl RemoteInvocation {
    /// An invocation that expects exit status 0.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            accepts: zero,
        }
    }

    pub fn accepting(mut self, accepts: fn(i32) -> bool) -> Self {
        self.accepts = accepts;
        self
    }

    /// An invocation whose exit status is not inspected.
    pub fn accepting_any(self) -> Self {
        self.accepting(any)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn accepts(&self, status: i32) -> bool {
        (self.accepts)(status)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The connection to the target machine.
///
/// `run` returns the command's exit status whatever it is; an `Err` means the
/// command could not be executed at all (unreachable host, broken session,
/// spawn failure). Futures returned by `run` must be safe to drop: the
/// orchestrator drops them on cancellation or when a retry budget runs out.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload(&self, path: &str, contents: &[u8]) -> Result<(), TransportError>;

    async fn run(&self, invocation: &RemoteInvocation) -> Result<i32, TransportError>;
}

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------
