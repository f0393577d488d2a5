#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn winupdate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("winupdate").unwrap();
    cmd.current_dir(dir.path())
        .env("WINUPDATE_CONFIG", dir.path().join("winupdate.yaml"))
        .env_remove("WINUPDATE_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("winupdate.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

// ---------------------------------------------------------------------------
// winupdate config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_defaults_once() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let text = std::fs::read_to_string(dir.path().join("winupdate.yaml")).unwrap();
    assert!(text.contains("restart_timeout_minutes: 240"));
    assert!(text.contains("username: SYSTEM"));
    assert!(text.contains("update_limit: 1000"));

    std::fs::write(dir.path().join("winupdate.yaml"), "update_limit: 3\n").unwrap();
    winupdate(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("winupdate.yaml")).unwrap(),
        "update_limit: 3\n"
    );
}

#[test]
fn config_validate_clean() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "update_limit: 10\n");
    winupdate(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_reports_errors_and_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "filters:\n  - ''\n");
    winupdate(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] filters[0] is empty"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_validate_json_lists_warnings() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "username: admin\n");
    let out = winupdate(&dir)
        .args(["--json", "config", "validate"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let warnings = value["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["level"], "warning");
}

#[test]
fn config_validate_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn config_show_redacts_password() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "username: admin\npassword: hunter2\n");
    winupdate(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("username: admin"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn config_flag_overrides_env() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("other.yaml");
    std::fs::write(&other, "update_limit: 42\n").unwrap();
    winupdate(&dir)
        .args(["--config", other.to_str().unwrap(), "--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"update_limit\": 42"));
}

// ---------------------------------------------------------------------------
// winupdate render
// ---------------------------------------------------------------------------

#[test]
fn render_update_is_encoded() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["render", "update"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "PowerShell -ExecutionPolicy Bypass -OutputFormat Text -EncodedCommand ",
        ));
}

#[test]
fn render_update_decoded_uses_config() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "search_criteria: \"IsInstalled=0 and Type='Software'\"\n\
         filters:\n  - include:$true\nupdate_limit: 5\n",
    );
    winupdate(&dir)
        .args(["render", "update", "--decode"])
        .assert()
        .success()
        .stdout(
            "C:/Windows/Temp/winupdate.ps1 -SearchCriteria 'IsInstalled=0 and Type=''Software''' \
             -Filters 'include:$true' -UpdateLimit 5\n",
        );
}

#[test]
fn render_pending_reboot_decoded() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["render", "pending-reboot", "--decode"])
        .assert()
        .success()
        .stdout("C:/Windows/Temp/winupdate.ps1 -OnlyCheckForRebootRequired\n");
}

#[test]
fn render_elevated_wrapper() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["render", "elevated-pending-reboot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RegisterTaskDefinition"))
        .stdout(predicate::str::contains("$name = 'winupdate-pending-reboot-"));
}

#[test]
fn render_elevated_rejects_decode() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir)
        .args(["render", "elevated-update", "--decode"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--decode applies to"));
}

// ---------------------------------------------------------------------------
// winupdate run
// ---------------------------------------------------------------------------

#[test]
fn run_requires_host() {
    let dir = TempDir::new().unwrap();
    winupdate(&dir).arg("run").assert().failure();
}

#[test]
fn run_without_update_script_fails_before_connecting() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "update_script: missing.ps1\n");
    winupdate(&dir)
        .args(["run", "--host", "win-01"])
        .env("WINUPDATE_SSH", "/nonexistent/ssh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read update script"));
}

#[cfg(unix)]
mod fake_ssh {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A target whose update script asks for one restart, then converges.
    /// Every remote command is appended to `ssh.log`, every upload
    /// destination to `scp.log`.
    fn fake_target(dir: &TempDir, update_status_after_restart: i32) {
        let root = dir.path().display();
        script(
            &dir.path().join("ssh"),
            &format!(
                r#"for a do cmd=$a; done
echo "$cmd" >> '{root}/ssh.log'
case "$cmd" in
  *winupdate-elevated.ps1)
    if [ -f '{root}/restarted' ]; then exit {update_status_after_restart}; fi
    echo "Installing 1 update"
    exit 101 ;;
  *-r\ -t\ 0*) touch '{root}/restarted'; exit 0 ;;
  *) exit 0 ;;
esac"#
            ),
        );
        script(
            &dir.path().join("scp"),
            &format!(r#"for a do dest=$a; done; echo "$dest" >> '{root}/scp.log'"#),
        );
        std::fs::write(dir.path().join("windows-update.ps1"), "exit 0\n").unwrap();
        write_config(
            dir,
            "restart_timeout_minutes: 1\nretry_delay_seconds: 1\nupdate_script: windows-update.ps1\n",
        );
    }

    fn run(dir: &TempDir) -> Command {
        let mut cmd = winupdate(dir);
        cmd.args(["--json", "run", "--host", "win-01", "--user", "Administrator"])
            .env("WINUPDATE_SSH", dir.path().join("ssh"))
            .env("WINUPDATE_SCP", dir.path().join("scp"));
        cmd
    }

    #[test]
    fn run_cycles_until_converged() {
        let dir = TempDir::new().unwrap();
        fake_target(&dir, 0);

        let out = run(&dir).output().unwrap();
        assert!(
            out.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(report["update_runs"], 2);
        assert_eq!(report["restarts"], 1);

        let uploads = std::fs::read_to_string(dir.path().join("scp.log")).unwrap();
        let uploads: Vec<&str> = uploads.lines().collect();
        assert_eq!(
            uploads,
            [
                "Administrator@win-01:C:/Windows/Temp/winupdate-elevated.ps1",
                "Administrator@win-01:C:/Windows/Temp/winupdate-pending-reboot-elevated.ps1",
                "Administrator@win-01:C:/Windows/Temp/winupdate.ps1",
            ]
        );

        let commands = std::fs::read_to_string(dir.path().join("ssh.log")).unwrap();
        let commands: Vec<&str> = commands.lines().collect();
        assert_eq!(commands.len(), 6, "{commands:#?}");
        assert!(commands[0].ends_with("-File C:/Windows/Temp/winupdate-elevated.ps1"));
        assert!(commands[1].starts_with("shutdown.exe -f -r -t 0"));
        assert!(commands[2].starts_with("shutdown.exe -f -r -t 60"));
        assert_eq!(commands[3], "shutdown.exe -a");
        assert!(commands[4].ends_with("-File C:/Windows/Temp/winupdate-pending-reboot-elevated.ps1"));
        assert_eq!(commands[5], commands[0]);
    }

    #[test]
    fn run_fails_on_unexpected_update_status() {
        let dir = TempDir::new().unwrap();
        fake_target(&dir, 5);

        run(&dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "Windows update script exited with non-zero exit status: 5",
            ))
            .stderr(predicate::str::contains("Windows update on win-01 failed"));
    }
}
