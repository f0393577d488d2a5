//! Command lines for invoking the remote update script.
//!
//! The literal script invocation is never sent inline. It is encoded as
//! UTF-16LE, base64'd and handed to PowerShell through `-EncodedCommand`, so
//! quoting, length and control characters survive any transport.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::Config;
use crate::error::{Result, UpdateError};

const POWERSHELL: &str = "PowerShell -ExecutionPolicy Bypass -OutputFormat Text";

// ---------------------------------------------------------------------------
// UpdateCommand
// ---------------------------------------------------------------------------

/// One invocation of the update script on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand<'a> {
    pub script_path: &'a str,
    pub search_criteria: Option<&'a str>,
    pub filters: &'a [String],
    pub update_limit: u32,
}

impl<'a> UpdateCommand<'a> {
    /// The update invocation described by `config`.
    pub fn from_config(config: &'a Config) -> Self {
        Self {
            script_path: &config.paths.update_script,
            search_criteria: config.search_criteria.as_deref(),
            filters: &config.filters,
            update_limit: config.update_limit,
        }
    }

    /// The literal PowerShell invocation, before encoding.
    pub fn script(&self) -> String {
        format!(
            "{}{}{} -UpdateLimit {}",
            self.script_path,
            search_criteria_argument(self.search_criteria),
            filters_argument(self.filters),
            self.update_limit
        )
    }

    pub fn encoded(&self) -> String {
        encoded_powershell(&self.script())
    }
}

/// The literal invocation that only asks whether a reboot is still pending.
pub fn pending_reboot_script(script_path: &str) -> String {
    format!("{script_path} -OnlyCheckForRebootRequired")
}

pub fn pending_reboot_command(script_path: &str) -> String {
    encoded_powershell(&pending_reboot_script(script_path))
}

/// Command that runs an uploaded script file directly.
pub fn file_command(path: &str) -> String {
    format!("{POWERSHELL} -File {path}")
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encoded_powershell(script: &str) -> String {
    format!(
        "{POWERSHELL} -EncodedCommand {}",
        STANDARD.encode(encode_utf16le(script))
    )
}

pub fn encode_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Recover the literal script from an `-EncodedCommand` payload.
///
/// Accepts either the bare base64 payload or a full command line produced by
/// [`encoded_powershell`].
pub fn decode_powershell(encoded: &str) -> Result<String> {
    let payload = encoded
        .trim()
        .rsplit_once("-EncodedCommand ")
        .map(|(_, p)| p)
        .unwrap_or(encoded.trim());

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| UpdateError::Decode(format!("invalid base64 payload: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(UpdateError::Decode(
            "payload is not UTF-16LE: odd byte count".into(),
        ));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| UpdateError::Decode(format!("payload is not UTF-16LE: {e}")))
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Wrap `value` in a PowerShell single-quoted literal, doubling embedded
/// single quotes. This is the only sanitization applied to parameters.
pub fn escape_powershell_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn search_criteria_argument(search_criteria: Option<&str>) -> String {
    match search_criteria {
        Some(criteria) if !criteria.is_empty() => {
            format!(" -SearchCriteria {}", escape_powershell_string(criteria))
        }
        _ => String::new(),
    }
}

// Separator commas are not escaped; the script splits the array.
fn filters_argument(filters: &[String]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = filters
        .iter()
        .map(|f| escape_powershell_string(f))
        .collect();
    format!(" -Filters {}", joined.join(","))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
