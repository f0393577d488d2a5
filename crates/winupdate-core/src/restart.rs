use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RemoteCommands;
use crate::error::{Result, Step, UpdateError};
use crate::exit_status::{ExitStatus, RebootState};
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::transport::{RemoteInvocation, Transport};

/// Reboots the target and waits until it is back and settled.
///
/// Each sub-step gets the full retry budget of its own. Exhausting any of
/// them fails the whole restart.
pub struct RestartSequencer<'a> {
    transport: &'a dyn Transport,
    commands: &'a RemoteCommands,
    pending_reboot_command: &'a str,
    policy: RetryPolicy,
}

impl<'a> RestartSequencer<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        commands: &'a RemoteCommands,
        pending_reboot_command: &'a str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            commands,
            pending_reboot_command,
            policy,
        }
    }

    pub async fn restart(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Restarting the machine...");
        self.issue_restart(cancel).await?;

        info!("Waiting for machine to become available...");
        self.wait_for_availability(cancel).await?;

        info!("Waiting for pending reboot work to finish...");
        self.drain_pending_reboot(cancel).await
    }

    /// The machine may be busy and reject the restart; keep asking.
    async fn issue_restart(&self, cancel: &CancellationToken) -> Result<()> {
        let step = Step::IssueRestart;
        let invocation = RemoteInvocation::new(self.commands.restart.as_str());
        self.retry_step(step, cancel, || self.run_expecting(step, &invocation))
            .await
    }

    /// Probe with a delayed test restart. It cannot run until the machine is
    /// back up; once it does, cancel the scheduled restart straight away.
    async fn wait_for_availability(&self, cancel: &CancellationToken) -> Result<()> {
        let step = Step::WaitForAvailability;
        let probe = RemoteInvocation::new(self.commands.test_restart.as_str());
        let abort = RemoteInvocation::new(self.commands.abort_restart.as_str()).accepting_any();
        self.retry_step(step, cancel, || async {
            self.run_expecting(step, &probe).await?;
            debug!("machine answered liveness probe, aborting test restart");
            self.transport.run(&abort).await?;
            Ok::<(), UpdateError>(())
        })
        .await
    }

    /// Some updates finish installing only after the first reboot.
    async fn drain_pending_reboot(&self, cancel: &CancellationToken) -> Result<()> {
        let step = Step::DrainPendingReboot;
        let check = RemoteInvocation::new(self.pending_reboot_command);
        self.retry_step(step, cancel, || async {
            let status = self.transport.run(&check).await?;
            match ExitStatus::from_code(status).reboot_state() {
                Some(RebootState::Clear) => Ok(()),
                Some(RebootState::Pending) => {
                    debug!("reboot still pending");
                    Err(UpdateError::CommandRejected { step, status })
                }
                None => Err(UpdateError::CommandRejected { step, status }),
            }
        })
        .await
    }

    async fn run_expecting(&self, step: Step, invocation: &RemoteInvocation) -> Result<()> {
        let status = self.transport.run(invocation).await?;
        if invocation.accepts(status) {
            Ok(())
        } else {
            Err(UpdateError::CommandRejected { step, status })
        }
    }

    async fn retry_step<F, Fut>(
        &self,
        step: Step,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        retry(&self.policy, cancel, action)
            .await
            .map_err(|e| step_failure(step, self.policy, e))
    }
}

fn step_failure(step: Step, policy: RetryPolicy, err: RetryError<UpdateError>) -> UpdateError {
    match err {
        RetryError::Cancelled { .. } => UpdateError::Cancelled { step },
        RetryError::TimedOut {
            attempts,
            last_error,
        } => UpdateError::TimedOut {
            step,
            budget: policy.budget,
            attempts,
            last_error: last_error.map(|e| e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::{Call, FakeTransport, Outcome};
    use std::time::Duration;
    use tokio::time::Instant;

    const PENDING: &str = "pending-reboot-check";

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(600))
    }

    fn sequencer<'a>(t: &'a FakeTransport, commands: &'a RemoteCommands) -> RestartSequencer<'a> {
        RestartSequencer::new(t, commands, PENDING, policy())
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_runs_each_step_once_in_order() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            t.runs(),
            vec![
                commands.restart.clone(),
                commands.test_restart.clone(),
                commands.abort_restart.clone(),
                PENDING.to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_are_retried_at_fixed_delay() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.queue(
            &commands.test_restart,
            [Outcome::Unreachable, Outcome::Unreachable, Outcome::Exit(1)],
        );

        let start = Instant::now();
        sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(t.run_count(&commands.test_restart), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(15));

        // abort follows the first successful probe immediately, and only it
        let runs = t.runs();
        let abort_at = runs
            .iter()
            .position(|c| *c == commands.abort_restart)
            .unwrap();
        assert_eq!(runs[abort_at - 1], commands.test_restart);
        assert_eq!(
            runs[..abort_at]
                .iter()
                .filter(|c| **c == commands.test_restart)
                .count(),
            4
        );
        assert_eq!(t.run_count(&commands.abort_restart), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_restart_is_retried() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.queue(&commands.restart, [Outcome::Exit(1115), Outcome::Exit(1115)]);
        sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(t.run_count(&commands.restart), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_reboot_is_drained() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.queue(PENDING, [Outcome::Exit(101), Outcome::Exit(101), Outcome::Exit(3)]);
        sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(t.run_count(PENDING), 4);
        // the probe isn't repeated while draining
        assert_eq!(t.run_count(&commands.test_restart), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_is_fatal_and_distinct() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.fallback(&commands.test_restart, Outcome::Unreachable);

        let start = Instant::now();
        let err = sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_budget_exhausted());
        match &err {
            UpdateError::TimedOut {
                step, last_error, ..
            } => {
                assert_eq!(*step, Step::WaitForAvailability);
                assert!(last_error.as_deref().unwrap().contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() <= Duration::from_secs(600));
        assert_eq!(t.run_count(PENDING), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_surfaces_as_cancelled() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.fallback(&commands.restart, Outcome::Exit(1));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        let err = sequencer(&t, &commands).restart(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!err.is_budget_exhausted());
        assert_eq!(t.run_count(&commands.restart), 3);
        assert!(!t.calls().contains(&Call::Run(commands.test_restart.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_failure_retries_the_probe() {
        let t = FakeTransport::new();
        let commands = RemoteCommands::default();
        t.queue(&commands.abort_restart, [Outcome::Unreachable]);
        sequencer(&t, &commands)
            .restart(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(t.run_count(&commands.test_restart), 2);
        assert_eq!(t.run_count(&commands.abort_restart), 2);
    }
}
