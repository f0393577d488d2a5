use crate::error::{Result, UpdateError};
use crate::io;
use crate::retry::{RetryPolicy, DEFAULT_DELAY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity that needs no password to run the elevated task.
pub const SYSTEM_USER: &str = "SYSTEM";

/// Largest accepted `restart_timeout_minutes` (one week).
pub const MAX_RESTART_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemotePaths
// ---------------------------------------------------------------------------

/// Where the uploaded scripts live on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemotePaths {
    #[serde(default = "default_update_script_path")]
    pub update_script: String,
    #[serde(default = "default_elevated_update_path")]
    pub elevated_update: String,
    #[serde(default = "default_elevated_pending_reboot_path")]
    pub elevated_pending_reboot: String,
}

fn default_update_script_path() -> String {
    "C:/Windows/Temp/winupdate.ps1".to_string()
}

fn default_elevated_update_path() -> String {
    "C:/Windows/Temp/winupdate-elevated.ps1".to_string()
}

fn default_elevated_pending_reboot_path() -> String {
    "C:/Windows/Temp/winupdate-pending-reboot-elevated.ps1".to_string()
}

impl Default for RemotePaths {
    fn default() -> Self {
        Self {
            update_script: default_update_script_path(),
            elevated_update: default_elevated_update_path(),
            elevated_pending_reboot: default_elevated_pending_reboot_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteCommands
// ---------------------------------------------------------------------------

/// Restart-related commands run on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCommands {
    /// Forced, immediate restart.
    #[serde(default = "default_restart_command")]
    pub restart: String,
    /// Schedules a restart far enough out to act as a liveness probe.
    #[serde(default = "default_test_restart_command")]
    pub test_restart: String,
    /// Cancels the restart scheduled by `test_restart`.
    #[serde(default = "default_abort_restart_command")]
    pub abort_restart: String,
}

fn default_restart_command() -> String {
    "shutdown.exe -f -r -t 0 -c \"winupdate restart\"".to_string()
}

fn default_test_restart_command() -> String {
    "shutdown.exe -f -r -t 60 -c \"winupdate restart test\"".to_string()
}

fn default_abort_restart_command() -> String {
    "shutdown.exe -a".to_string()
}

impl Default for RemoteCommands {
    fn default() -> Self {
        Self {
            restart: default_restart_command(),
            test_restart: default_test_restart_command(),
            abort_restart: default_abort_restart_command(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Budget for each restart sub-step.
    #[serde(default = "default_restart_timeout_minutes")]
    pub restart_timeout_minutes: u64,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Identity the update script runs as through the elevated wrapper.
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// `IUpdateSearcher::Search` criteria; `None` leaves the script default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_criteria: Option<String>,
    /// Updates matching no filter are not installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    /// Maximum updates installed by one script run.
    #[serde(default = "default_update_limit")]
    pub update_limit: u32,

    /// Local update script uploaded to `paths.update_script`. Relative paths
    /// resolve against the config file's directory.
    #[serde(default = "default_update_script")]
    pub update_script: PathBuf,

    #[serde(default)]
    pub paths: RemotePaths,
    #[serde(default)]
    pub commands: RemoteCommands,
}

fn default_restart_timeout_minutes() -> u64 {
    4 * 60
}

fn default_retry_delay_seconds() -> u64 {
    DEFAULT_DELAY.as_secs()
}

fn default_username() -> String {
    SYSTEM_USER.to_string()
}

fn default_update_limit() -> u32 {
    1000
}

fn default_update_script() -> PathBuf {
    PathBuf::from("windows-update.ps1")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restart_timeout_minutes: default_restart_timeout_minutes(),
            retry_delay_seconds: default_retry_delay_seconds(),
            username: default_username(),
            password: String::new(),
            search_criteria: None,
            filters: Vec::new(),
            update_limit: default_update_limit(),
            update_script: default_update_script(),
            paths: RemotePaths::default(),
            commands: RemoteCommands::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&data)?;
        if config.update_script.is_relative() {
            if let Some(dir) = path.parent() {
                config.update_script = dir.join(&config.update_script);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let mut config: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data)?
        };
        config.normalize();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(path, data.as_bytes())
    }

    /// Replace zero or empty settings with their defaults.
    pub fn normalize(&mut self) {
        if self.restart_timeout_minutes == 0 {
            self.restart_timeout_minutes = default_restart_timeout_minutes();
        }
        if self.retry_delay_seconds == 0 {
            self.retry_delay_seconds = default_retry_delay_seconds();
        }
        if self.username.trim().is_empty() {
            self.username = default_username();
        }
        if self.update_limit == 0 {
            self.update_limit = default_update_limit();
        }
        if self
            .search_criteria
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            self.search_criteria = None;
        }
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_minutes.saturating_mul(60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_delay_seconds),
            self.restart_timeout(),
        )
    }

    pub fn is_system_user(&self) -> bool {
        self.username.eq_ignore_ascii_case(SYSTEM_USER)
    }

    /// Read the local update script named by `update_script`.
    pub fn read_update_script(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.update_script).map_err(|e| {
            UpdateError::InvalidConfig(format!(
                "cannot read update script '{}': {e}",
                self.update_script.display()
            ))
        })
    }

    /// Check the config for mistakes that would only surface on the target.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.username.trim().is_empty() {
            warnings.push(ConfigWarning::error("username must not be empty"));
        }
        if self.is_system_user() && !self.password.is_empty() {
            warnings.push(ConfigWarning::warning(
                "password is ignored when running as SYSTEM",
            ));
        }
        if !self.is_system_user() && self.password.is_empty() {
            warnings.push(ConfigWarning::warning(format!(
                "no password set for user '{}'; the elevated task will fail to register",
                self.username
            )));
        }

        for (i, filter) in self.filters.iter().enumerate() {
            if filter.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!("filters[{i}] is empty")));
            } else if filter.contains(',') {
                warnings.push(ConfigWarning::warning(format!(
                    "filters[{i}] contains ',' which is also the filter separator"
                )));
            }
        }

        if self.update_limit == 0 {
            warnings.push(ConfigWarning::error("update_limit must be positive"));
        }
        if self.restart_timeout_minutes > MAX_RESTART_TIMEOUT_MINUTES {
            warnings.push(ConfigWarning::error(format!(
                "restart_timeout_minutes ({}) exceeds the maximum of {MAX_RESTART_TIMEOUT_MINUTES}",
                self.restart_timeout_minutes
            )));
        }
        if self.retry_delay_seconds >= self.restart_timeout().as_secs() {
            warnings.push(ConfigWarning::warning(format!(
                "retry delay ({}s) is not shorter than the restart timeout ({}m); \
                 each restart step gets a single attempt",
                self.retry_delay_seconds, self.restart_timeout_minutes
            )));
        }

        let remote = [
            ("paths.update_script", &self.paths.update_script),
            ("paths.elevated_update", &self.paths.elevated_update),
            (
                "paths.elevated_pending_reboot",
                &self.paths.elevated_pending_reboot,
            ),
            ("commands.restart", &self.commands.restart),
            ("commands.test_restart", &self.commands.test_restart),
            ("commands.abort_restart", &self.commands.abort_restart),
        ];
        for (name, value) in remote {
            if value.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!("{name} must not be empty")));
            }
        }

        warnings
    }

    /// Fail on the first error-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(UpdateError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
