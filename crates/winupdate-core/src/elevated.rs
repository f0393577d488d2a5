//! Wrapper scripts that run a command as another identity.
//!
//! The wrapper registers a one-shot scheduled task for the configured user,
//! runs it, streams the task's redirected output back to stdout and exits
//! with the task's result code. The wrapped command's exit status therefore
//! becomes the wrapper's exit status, which keeps the update protocol intact
//! across the elevation hop.

use uuid::Uuid;

use crate::command::{escape_powershell_string, pending_reboot_command, UpdateCommand};
use crate::config::{Config, SYSTEM_USER};

// TASK_LOGON_PASSWORD / TASK_LOGON_SERVICE_ACCOUNT
const LOGON_PASSWORD: u8 = 1;
const LOGON_SERVICE_ACCOUNT: u8 = 5;

const TEMPLATE: &str = r#"$name = {{task_name_ps}}
$log = [System.Environment]::ExpandEnvironmentVariables("%SYSTEMROOT%\Temp\$name.out")
$s = New-Object -ComObject "Schedule.Service"
$s.Connect()
$t = $s.NewTask($null)
$xml = [xml]@'
<?xml version="1.0" encoding="UTF-16"?>
<Task version="1.2" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <RegistrationInfo>
    <Description>{{description}}</Description>
  </RegistrationInfo>
  <Principals>
    <Principal id="Author">
      <UserId>{{user_xml}}</UserId>
      <LogonType>{{logon_type_xml}}</LogonType>
      <RunLevel>HighestAvailable</RunLevel>
    </Principal>
  </Principals>
  <Settings>
    <MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy>
    <DisallowStartIfOnBatteries>false</DisallowStartIfOnBatteries>
    <StopIfGoingOnBatteries>false</StopIfGoingOnBatteries>
    <AllowHardTerminate>true</AllowHardTerminate>
    <StartWhenAvailable>false</StartWhenAvailable>
    <RunOnlyIfNetworkAvailable>false</RunOnlyIfNetworkAvailable>
    <IdleSettings>
      <StopOnIdleEnd>false</StopOnIdleEnd>
      <RestartOnIdle>false</RestartOnIdle>
    </IdleSettings>
    <AllowStartOnDemand>true</AllowStartOnDemand>
    <Enabled>true</Enabled>
    <Hidden>false</Hidden>
    <RunOnlyIfIdle>false</RunOnlyIfIdle>
    <WakeToRun>false</WakeToRun>
    <ExecutionTimeLimit>PT24H</ExecutionTimeLimit>
    <Priority>4</Priority>
  </Settings>
  <Actions Context="Author">
    <Exec>
      <Command>cmd</Command>
      <Arguments>/c {{command_xml}} &gt; %SYSTEMROOT%\Temp\{{task_name_xml}}.out 2&gt;&amp;1</Arguments>
    </Exec>
  </Actions>
</Task>
'@
$t.XmlText = $xml.OuterXml
$f = $s.GetFolder("\")
$f.RegisterTaskDefinition($name, $t, 6, {{user_ps}}, {{password_ps}}, {{logon_type}}, $null) | Out-Null
$t = $f.GetTask("\$name")
$t.Run($null) | Out-Null
$timeout = 10
$sec = 0
while ((!($t.state -eq 4)) -and ($sec -lt $timeout)) {
  Start-Sleep -s 1
  $sec++
}
$line = 0
do {
  Start-Sleep -m 100
  if (Test-Path $log) {
    Get-Content $log | Select-Object -Skip $line | ForEach-Object {
      $line += 1
      Write-Output "$_"
    }
  }
} while (!($t.state -eq 3))
$result = $t.LastTaskResult
$f.DeleteTask("\$name", 0)
[System.Runtime.Interopservices.Marshal]::ReleaseComObject($s) | Out-Null
exit $result
"#;

/// A rendered-on-demand elevated wrapper around one command.
#[derive(Debug, Clone)]
pub struct ElevatedScript {
    pub username: String,
    pub password: String,
    pub task_name: String,
    pub description: String,
    pub command: String,
}

impl ElevatedScript {
    /// Wrapper for `command` running as the configured identity, under a
    /// fresh task name derived from `task_prefix`.
    pub fn for_config(
        config: &Config,
        task_prefix: &str,
        description: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            task_name: unique_task_name(task_prefix),
            description: description.into(),
            command: command.into(),
        }
    }

    /// Wrapper uploaded to `paths.elevated_update`.
    pub fn update(config: &Config) -> Self {
        Self::for_config(
            config,
            "winupdate",
            "Windows update elevated task",
            UpdateCommand::from_config(config).encoded(),
        )
    }

    /// Wrapper uploaded to `paths.elevated_pending_reboot`.
    pub fn pending_reboot(config: &Config) -> Self {
        Self::for_config(
            config,
            "winupdate-pending-reboot",
            "Windows update pending reboot elevated task",
            pending_reboot_command(&config.paths.update_script),
        )
    }

    fn is_system(&self) -> bool {
        self.username.eq_ignore_ascii_case(SYSTEM_USER)
    }

    pub fn render(&self) -> String {
        let (logon_type, logon_type_xml, password_ps) = if self.is_system() {
            (LOGON_SERVICE_ACCOUNT, "ServiceAccount", "$null".to_string())
        } else {
            (
                LOGON_PASSWORD,
                "Password",
                escape_powershell_string(&self.password),
            )
        };

        fill(TEMPLATE, |key| match key {
            "task_name_ps" => Some(escape_powershell_string(&self.task_name)),
            "task_name_xml" => Some(xml_escape(&self.task_name)),
            "description" => Some(xml_escape(&self.description)),
            "user_xml" => Some(xml_escape(&self.username)),
            "user_ps" => Some(escape_powershell_string(&self.username)),
            "password_ps" => Some(password_ps.clone()),
            "logon_type" => Some(logon_type.to_string()),
            "logon_type_xml" => Some(logon_type_xml.to_string()),
            "command_xml" => Some(xml_escape(&self.command)),
            _ => None,
        })
    }
}

pub fn unique_task_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Substitute `{{key}}` placeholders in one pass, so substituted values are
/// never themselves scanned for placeholders. Unknown keys are left as-is.
fn fill(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
