use crate::cmd::load_config;
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use winupdate_core::config::WarnLevel;
use winupdate_core::{Config, Orchestrator};
use winupdate_ssh::{SshTarget, SshTransport, DEFAULT_PORT};

#[derive(Args)]
pub struct RunArgs {
    /// Target host name or address
    #[arg(long)]
    host: String,

    /// Login user for ssh (default: ssh's own default)
    #[arg(long, short = 'u')]
    user: Option<String>,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Private key passed to ssh and scp with -i
    #[arg(long, short = 'i')]
    identity: Option<PathBuf>,

    /// Extra ssh client option (repeatable), e.g. -o StrictHostKeyChecking=no
    #[arg(long = "ssh-option", short = 'o', value_name = "KEY=VALUE")]
    ssh_options: Vec<String>,

    /// Password for the elevated identity (overrides the config file)
    #[arg(long, env = "WINUPDATE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Per-step restart budget in minutes (overrides the config file)
    #[arg(long, value_name = "MINUTES")]
    restart_timeout: Option<u64>,

    #[arg(long, env = "WINUPDATE_SSH", default_value = "ssh", hide = true)]
    ssh_program: PathBuf,

    #[arg(long, env = "WINUPDATE_SCP", default_value = "scp", hide = true)]
    scp_program: PathBuf,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(minutes) = self.restart_timeout {
            config.restart_timeout_minutes = minutes;
        }
        config.normalize();
    }

    fn target(&self) -> SshTarget {
        let mut target = SshTarget::new(self.host.clone());
        target.user = self.user.clone();
        target.port = self.port;
        target.identity = self.identity.clone();
        target.options = self.ssh_options.clone();
        target.ssh_program = self.ssh_program.clone();
        target.scp_program = self.scp_program.clone();
        target
    }
}

pub fn run(config_path: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);

    for w in config.validate() {
        if w.level == WarnLevel::Warning {
            warn!("config: {}", w.message);
        }
    }
    config.ensure_valid().context("invalid config")?;
    let script = config.read_update_script()?;

    let transport = SshTransport::new(args.target());
    let rt = tokio::runtime::Runtime::new()?;

    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                on_interrupt.cancel();
            }
        });

        Orchestrator::new(&transport, &config, &script)
            .provision(&cancel)
            .await
    });
    let report = report.with_context(|| format!("Windows update on {} failed", args.host))?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Windows update on {} finished: {} update run(s), {} restart(s)",
            args.host, report.update_runs, report.restarts
        );
    }
    Ok(())
}
