//! The update/restart loop.
//!
//! ```text
//!            ┌────────── 101 ──────────┐
//!            ▼                         │
//!   setup ─► Updating ── 0 ──► Done    │
//!            │   ▲                     │
//!            │   └──── Restarting ◄────┘
//!            └── other status / transport error ──► fatal
//! ```
//!
//! There is no cap on the number of cycles. A target that keeps asking for a
//! restart loops until the caller cancels.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::file_command;
use crate::config::Config;
use crate::elevated::ElevatedScript;
use crate::error::{Result, Step, UpdateError};
use crate::exit_status::ExitStatus;
use crate::restart::RestartSequencer;
use crate::transport::{RemoteInvocation, Transport};

/// Outcome of a session that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub update_runs: u32,
    pub restarts: u32,
}

/// Per-call state of one orchestration.
#[derive(Debug, Default)]
pub struct UpdateSession {
    pub iteration: u32,
    pub restarts: u32,
    pub last_status: Option<ExitStatus>,
}

pub struct Orchestrator<'a> {
    transport: &'a dyn Transport,
    config: &'a Config,
    update_script: &'a [u8],
}

impl<'a> Orchestrator<'a> {
    /// `update_script` is the body of the script uploaded to
    /// `config.paths.update_script`.
    pub fn new(
        transport: &'a dyn Transport,
        config: &'a Config,
        update_script: &'a [u8],
    ) -> Self {
        Self {
            transport,
            config,
            update_script,
        }
    }

    /// Run the update script until it reports no more work, restarting the
    /// target whenever it asks for one.
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<ProvisionReport> {
        self.upload_scripts(cancel).await?;

        let pending_reboot = file_command(&self.config.paths.elevated_pending_reboot);
        let sequencer = RestartSequencer::new(
            self.transport,
            &self.config.commands,
            &pending_reboot,
            self.config.retry_policy(),
        );

        let mut session = UpdateSession::default();
        loop {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled { step: Step::Update });
            }

            session.iteration += 1;
            let status = self.update(cancel, session.iteration).await?;
            session.last_status = Some(status);
            debug!(?session, "update run finished");

            match status {
                ExitStatus::Converged => {
                    info!(
                        update_runs = session.iteration,
                        restarts = session.restarts,
                        "Windows update finished, no restart pending"
                    );
                    return Ok(ProvisionReport {
                        update_runs: session.iteration,
                        restarts: session.restarts,
                    });
                }
                ExitStatus::RestartRequired => {
                    sequencer.restart(cancel).await?;
                    session.restarts += 1;
                }
                ExitStatus::Failed(status) => return Err(UpdateError::ScriptFailed { status }),
            }
        }
    }

    async fn update(&self, cancel: &CancellationToken, iteration: u32) -> Result<ExitStatus> {
        info!(iteration, "Running Windows update...");
        let invocation = RemoteInvocation::new(file_command(&self.config.paths.elevated_update));

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpdateError::Cancelled { step: Step::Update }),
            res = self.transport.run(&invocation) => res?,
        };
        debug!(status, "update script exited");
        Ok(ExitStatus::from_code(status))
    }

    async fn upload_scripts(&self, cancel: &CancellationToken) -> Result<()> {
        let paths = &self.config.paths;

        info!("Uploading the Windows update elevated script...");
        let update = ElevatedScript::update(self.config);
        self.upload(cancel, &paths.elevated_update, update.render().as_bytes())
            .await?;

        info!("Uploading the Windows update check for reboot required elevated script...");
        let pending = ElevatedScript::pending_reboot(self.config);
        self.upload(
            cancel,
            &paths.elevated_pending_reboot,
            pending.render().as_bytes(),
        )
        .await?;

        info!("Uploading the Windows update script...");
        self.upload(cancel, &paths.update_script, self.update_script)
            .await
    }

    async fn upload(&self, cancel: &CancellationToken, path: &str, contents: &[u8]) -> Result<()> {
        debug!(path, bytes = contents.len(), "uploading");
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(UpdateError::Cancelled { step: Step::Upload }),
            res = self.transport.upload(path, contents) => res.map_err(UpdateError::from),
        }
    }
}
