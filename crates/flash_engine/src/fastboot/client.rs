//! Bootloader protocol client
//!
//! Wraps the `fastboot` command-line tool. fastboot historically writes
//! results to stdout or stderr depending on the build, so command output
//! is the merged stream. A command issued while no device is detected
//! fails fast without invoking the tool.

use crate::config::{TIMING_CONFIG, TOOL_PATHS};
use crate::error::{FlashError, Result};
#[cfg(test)]
use crate::runner::RawOutput;
use crate::runner::Runner;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastbootState {
    Connected,
    Disconnected,
}

/// Parse `fastboot getvar all` output. Only `(bootloader) key: value`
/// lines count; everything else is status noise.
pub fn parse_var_map(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in raw.lines() {
        let Some(rest) = line.strip_prefix("(bootloader) ") else {
            continue;
        };
        let Some((key, value)) = rest.split_once(": ") else {
            continue;
        };
        map.insert(key.to_string(), value.trim_end_matches('\n').to_string());
    }
    map
}

pub fn model_from_var_map(vars: &HashMap<String, String>) -> String {
    vars.get("product")
        .filter(|v| !v.is_empty())
        .or_else(|| vars.get("sku"))
        .cloned()
        .unwrap_or_default()
}

pub fn imei_from_var_map(vars: &HashMap<String, String>) -> String {
    vars.get("imei").cloned().unwrap_or_default()
}

pub fn is_ab_from_var_map(vars: &HashMap<String, String>) -> bool {
    vars.get("slot-count")
        .or_else(|| vars.get("slot-slot"))
        .map(|v| v == "2")
        .unwrap_or(false)
}

pub fn active_slot_from_var_map(vars: &HashMap<String, String>) -> String {
    vars.get("current-slot")
        .filter(|v| !v.is_empty())
        .or_else(|| vars.get("running-slot"))
        .map(|v| v.to_lowercase().trim_matches('_').to_string())
        .unwrap_or_default()
}

/// In doubt, reports locked.
pub fn is_unlocked_from_var_map(vars: &HashMap<String, String>) -> bool {
    let unlocked = vars.get("unlocked").map(String::as_str).unwrap_or("");
    let securestate = vars.get("securestate").map(String::as_str).unwrap_or("");
    unlocked.eq_ignore_ascii_case("yes")
        || unlocked.eq_ignore_ascii_case("true")
        || securestate.eq_ignore_ascii_case("unlocked")
}

/// Bootloader protocol client
#[derive(Debug)]
pub struct FastbootClient {
    runner: Runner,
}

impl FastbootClient {
    pub fn new() -> Self {
        Self {
            runner: Runner::system(TOOL_PATHS.fastboot.clone()),
        }
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            runner: Runner::system(path),
        }
    }

    #[cfg(test)]
    pub fn scripted(outputs: Vec<RawOutput>) -> Self {
        Self {
            runner: Runner::scripted(outputs),
        }
    }

    #[cfg(test)]
    pub fn remaining_script(&self) -> usize {
        self.runner.remaining()
    }

    pub async fn state(&self) -> FastbootState {
        let out = match self
            .runner
            .output(&["devices"], TIMING_CONFIG.tool.query_timeout)
            .await
        {
            Ok(out) => out,
            Err(_) => return FastbootState::Disconnected,
        };
        if out.stdout.trim().is_empty() {
            FastbootState::Disconnected
        } else {
            FastbootState::Connected
        }
    }

    async fn available(&self) -> bool {
        self.state().await == FastbootState::Connected
    }

    /// Run a fastboot command and return the merged output stream. Fails
    /// fast with `Disconnected` when no device is detected, without
    /// invoking the tool for the command itself.
    pub async fn command(&self, args: &[&str]) -> Result<String> {
        self.command_with_timeout(args, TIMING_CONFIG.tool.command_timeout)
            .await
    }

    pub async fn command_with_timeout(&self, args: &[&str], timeout_secs: u64) -> Result<String> {
        if !self.available().await {
            return Err(FlashError::Disconnected);
        }

        let out = self.runner.output(args, timeout_secs).await?;
        if out.is_empty() {
            return Err(FlashError::Disconnected);
        }
        Ok(out.merged())
    }

    pub async fn reboot(&self, to_bootloader: bool) -> Result<()> {
        if to_bootloader {
            self.command(&["reboot", "bootloader"]).await.map(|_| ())
        } else {
            self.command(&["reboot"]).await.map(|_| ())
        }
    }

    pub async fn var_map(&self) -> Result<HashMap<String, String>> {
        let raw = self.command(&["getvar", "all"]).await?;
        Ok(parse_var_map(&raw))
    }

    pub async fn var(&self, name: &str) -> Result<String> {
        Ok(self.var_map().await?.get(name).cloned().unwrap_or_default())
    }

    pub async fn model(&self) -> Result<String> {
        Ok(model_from_var_map(&self.var_map().await?))
    }

    pub async fn imei(&self) -> Result<String> {
        Ok(imei_from_var_map(&self.var_map().await?))
    }

    pub async fn is_ab(&self) -> Result<bool> {
        Ok(is_ab_from_var_map(&self.var_map().await?))
    }

    pub async fn active_slot(&self) -> Result<String> {
        Ok(active_slot_from_var_map(&self.var_map().await?))
    }

    pub async fn is_unlocked(&self) -> Result<bool> {
        Ok(is_unlocked_from_var_map(&self.var_map().await?))
    }

    /// Boot a recovery image without flashing it
    pub async fn boot_recovery(&self, img_file: &str) -> Result<()> {
        let result = self
            .command_with_timeout(&["boot", img_file], TIMING_CONFIG.tool.transfer_timeout)
            .await?;

        tracing::info!("fastboot boot output:\n{}", result);

        if result.contains("Sending") && result.contains("Booting") && result.contains("OKAY") {
            Ok(())
        } else {
            Err(FlashError::UnknownResponse(result))
        }
    }

    /// Flash a recovery image to the given partition
    pub async fn flash_recovery(&self, img_file: &str, partition: &str) -> Result<()> {
        let result = self
            .command_with_timeout(
                &["flash", partition, img_file],
                TIMING_CONFIG.tool.transfer_timeout,
            )
            .await?;

        tracing::info!("fastboot flash output:\n{}", result);

        if result.contains("no such partition") || result.contains("invalid partition") {
            Err(FlashError::NotFound(format!("unknown partition {}", partition)))
        } else if result.contains("Sending") && result.contains("Writing") && result.contains("OKAY")
        {
            Ok(())
        } else {
            Err(FlashError::UnknownResponse(result))
        }
    }
}

impl Default for FastbootClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GETVAR_ALL: &str = "\
(bootloader) product: pixox
(bootloader) current-slot: _A
(bootloader) slot-count: 2
(bootloader) unlocked: no
(bootloader) securestate: locked
(bootloader) imei: 358240051111110
all: listed
Finished. Total time: 0.002s
";

    #[test]
    fn parses_bootloader_prefixed_lines_only() {
        let vars = parse_var_map(GETVAR_ALL);
        assert_eq!(vars.get("product").unwrap(), "pixox");
        assert_eq!(vars.len(), 6);
        assert!(!vars.contains_key("all"));
    }

    #[test]
    fn derivations_over_var_map() {
        let vars = parse_var_map(GETVAR_ALL);
        assert_eq!(model_from_var_map(&vars), "pixox");
        assert_eq!(imei_from_var_map(&vars), "358240051111110");
        assert!(is_ab_from_var_map(&vars));
        assert_eq!(active_slot_from_var_map(&vars), "a");
        assert!(!is_unlocked_from_var_map(&vars));
    }

    #[test]
    fn securestate_marks_unlocked() {
        let mut vars = HashMap::new();
        vars.insert("securestate".to_string(), "UNLOCKED".to_string());
        assert!(is_unlocked_from_var_map(&vars));
    }

    #[tokio::test]
    async fn command_while_disconnected_fails_without_invoking_tool() {
        let client = FastbootClient::scripted(vec![
            RawOutput::new("", ""), // fastboot devices: nothing attached
        ]);
        assert!(matches!(
            client.command(&["getvar", "all"]).await,
            Err(FlashError::Disconnected)
        ));
        // Only the state probe was consumed; the command itself never ran
        assert_eq!(client.remaining_script(), 0);
    }

    #[tokio::test]
    async fn boot_recovery_accepts_okay_transcript() {
        let client = FastbootClient::scripted(vec![
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new(
                "",
                "Sending 'boot.img' (28672 KB) OKAY [ 0.902s]\nBooting OKAY [ 0.049s]\nFinished.\n",
            ),
        ]);
        client.boot_recovery("twrp.img").await.unwrap();
    }

    #[tokio::test]
    async fn flash_recovery_reports_unknown_partition() {
        let client = FastbootClient::scripted(vec![
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new("", "FAILED (remote: no such partition)\n"),
        ]);
        assert!(matches!(
            client.flash_recovery("twrp.img", "recovery").await,
            Err(FlashError::NotFound(_))
        ));
    }
}
