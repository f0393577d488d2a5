//! `winupdate-core`: drives a remote machine through update/restart cycles
//! until its update script reports nothing left to do.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator          ← upload scripts once, then loop on the exit status
//!     │
//!     ├── command       ← PowerShell -EncodedCommand invocations
//!     ├── elevated      ← scheduled-task wrappers that run as another user
//!     ├── exit_status   ← 0 = converged, 101 = restart required
//!     ▼
//! RestartSequencer      ← restart, wait for liveness, drain pending reboot
//!     │
//!     ▼
//! retry                 ← fixed delay, wall-clock budget, cancellation
//!     │
//!     ▼
//! dyn Transport         ← upload(path, bytes) / run(command) -> exit status
//! ```

pub mod command;
pub mod config;
pub mod elevated;
pub mod error;
pub mod exit_status;
pub mod io;
pub mod orchestrator;
pub mod restart;
pub mod retry;
pub mod transport;

pub use config::Config;
pub use error::{Result, Step, TransportError, UpdateError};
pub use exit_status::ExitStatus;
pub use orchestrator::{Orchestrator, ProvisionReport};
pub use transport::{RemoteInvocation, Transport};
