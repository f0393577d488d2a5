use crate::cmd::load_config;
use clap::{Args, ValueEnum};
use std::path::Path;
use winupdate_core::command::{decode_powershell, pending_reboot_command, UpdateCommand};
use winupdate_core::elevated::ElevatedScript;

#[derive(Clone, Copy, ValueEnum)]
pub enum Artifact {
    /// Encoded update script invocation
    Update,
    /// Encoded pending-reboot check
    PendingReboot,
    /// Scheduled-task wrapper around the update invocation
    ElevatedUpdate,
    /// Scheduled-task wrapper around the pending-reboot check
    ElevatedPendingReboot,
}

#[derive(Args)]
pub struct RenderArgs {
    #[arg(value_enum)]
    artifact: Artifact,

    /// Print the PowerShell behind -EncodedCommand instead of the encoded line
    #[arg(long)]
    decode: bool,
}

pub fn run(config_path: &Path, args: RenderArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let encoded = match args.artifact {
        Artifact::Update => UpdateCommand::from_config(&config).encoded(),
        Artifact::PendingReboot => pending_reboot_command(&config.paths.update_script),
        Artifact::ElevatedUpdate | Artifact::ElevatedPendingReboot => {
            if args.decode {
                anyhow::bail!("--decode applies to 'update' and 'pending-reboot' only");
            }
            let wrapper = match args.artifact {
                Artifact::ElevatedUpdate => ElevatedScript::update(&config),
                _ => ElevatedScript::pending_reboot(&config),
            };
            print!("{}", wrapper.render());
            return Ok(());
        }
    };

    if args.decode {
        println!("{}", decode_powershell(&encoded)?);
    } else {
        println!("{encoded}");
    }
    Ok(())
}
