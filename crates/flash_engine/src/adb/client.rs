//! Debug-bridge protocol client
//!
//! Wraps the `adb` command-line tool. Connectivity is re-derived from the
//! tool's output on every call; USB state can change between calls, so
//! nothing is cached here.

use crate::adb::props::{self, parse_prop_map};
use crate::config::{TIMING_CONFIG, TOOL_PATHS};
use crate::device::StateTarget;
use crate::error::{FlashError, Result};
use crate::runner::{trim_output, RawOutput, Runner};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Connection state as reported by the debug bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbState {
    Disconnected,
    Unauthorized,
    Booting,
    Android,
    Recovery,
    Sideload,
    Unknown,
}

/// Outcome of classifying `adb get-state` output, before the boot-complete
/// refinement that distinguishes `Booting` from `Android`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawState {
    Disconnected,
    Unauthorized,
    Device,
    Recovery,
    Sideload,
    DaemonStarting,
    Unknown,
}

fn classify_get_state(out: &RawOutput) -> RawState {
    let stderr = out.stderr.as_str();
    let stdout = out.stdout.as_str();
    if stderr.starts_with("error: no device") || stderr.starts_with("error: device offline") {
        RawState::Disconnected
    } else if stderr.starts_with("error: insufficient permissions")
        || stderr.starts_with("error: device unauthorized")
        || stderr.starts_with("error: device still authorizing")
    {
        RawState::Unauthorized
    } else if stdout.starts_with("device") {
        RawState::Device
    } else if stdout.starts_with("sideload") {
        RawState::Sideload
    } else if stdout.starts_with("recovery") {
        RawState::Recovery
    } else if stderr.contains("daemon not running; starting now") {
        RawState::DaemonStarting
    } else {
        RawState::Unknown
    }
}

/// How a command's stderr should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StderrClass {
    Disconnected,
    Unauthorized,
    /// Known noise, the command still succeeded
    Benign,
    Unknown,
}

fn classify_command_stderr(stderr: &str) -> StderrClass {
    if stderr.contains("no devices/emulators found") || stderr.contains("device offline") {
        StderrClass::Disconnected
    } else if stderr.contains("device unauthorized") || stderr.contains("device still authorizing")
    {
        StderrClass::Unauthorized
    } else if stderr.contains("daemon not running; starting now")
        || stderr.contains("adb: failed to read command: Success")
        || stderr.contains("adb: failed to read command: No error")
    {
        StderrClass::Benign
    } else {
        StderrClass::Unknown
    }
}

/// Debug-bridge protocol client
#[derive(Debug)]
pub struct AdbClient {
    runner: Runner,
}

impl AdbClient {
    pub fn new() -> Self {
        Self {
            runner: Runner::system(TOOL_PATHS.adb.clone()),
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

    /// Current debug-bridge state. `device` with incomplete boot props is
    /// reported as `Booting`.
    pub async fn state(&self) -> AdbState {
        // One retry when the command only started the adb daemon
        for _ in 0..2 {
            let out = match self
                .runner
                .output(&["get-state"], TIMING_CONFIG.tool.query_timeout)
                .await
            {
                Ok(out) => out,
                Err(_) => return AdbState::Disconnected,
            };

            match classify_get_state(&out) {
                RawState::Disconnected => return AdbState::Disconnected,
                RawState::Unauthorized => return AdbState::Unauthorized,
                RawState::Recovery => return AdbState::Recovery,
                RawState::Sideload => return AdbState::Sideload,
                RawState::Device => {
                    return if self.is_boot_complete().await.unwrap_or(true) {
                        AdbState::Android
                    } else {
                        AdbState::Booting
                    };
                }
                RawState::DaemonStarting => continue,
                RawState::Unknown => {
                    tracing::warn!(
                        stdout = %out.stdout.trim(),
                        stderr = %out.stderr.trim(),
                        "unknown adb state"
                    );
                    return AdbState::Unknown;
                }
            }
        }

        AdbState::Unknown
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await != AdbState::Disconnected
    }

    /// Run an adb command and return its trimmed stdout. stderr is
    /// classified: disconnections and authorization failures become typed
    /// errors, known daemon noise is tolerated, anything else is logged
    /// with the raw text.
    pub async fn command(&self, args: &[&str]) -> Result<String> {
        self.command_with_timeout(args, TIMING_CONFIG.tool.command_timeout)
            .await
    }

    pub async fn command_with_timeout(&self, args: &[&str], timeout_secs: u64) -> Result<String> {
        let out = self.runner.output(args, timeout_secs).await?;

        if !out.stderr.trim().is_empty() {
            match classify_command_stderr(&out.stderr) {
                StderrClass::Disconnected => return Err(FlashError::Disconnected),
                StderrClass::Unauthorized => return Err(FlashError::Unauthorized),
                StderrClass::Benign => {}
                StderrClass::Unknown => {
                    tracing::error!(
                        command = %args.join(" "),
                        stdout = %out.stdout.trim(),
                        stderr = %out.stderr.trim(),
                        "adb command gave an unexpected error"
                    );
                }
            }
        }

        Ok(trim_output(&out.stdout))
    }

    pub async fn start_server(&self) -> Result<()> {
        self.command(&["start-server"]).await.map(|_| ())
    }

    pub async fn kill_server(&self) -> Result<()> {
        self.command(&["kill-server"]).await.map(|_| ())
    }

    /// Full `getprop` dump parsed into a map
    pub async fn prop_map(&self) -> Result<HashMap<String, String>> {
        let stdout = self.command(&["shell", "getprop"]).await?;
        Ok(parse_prop_map(&stdout))
    }

    pub async fn prop(&self, name: &str) -> Result<String> {
        Ok(self
            .prop_map()
            .await?
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn model(&self) -> Result<String> {
        Ok(props::model_from_prop_map(&self.prop_map().await?))
    }

    pub async fn codename(&self) -> Result<String> {
        Ok(props::codename_from_prop_map(&self.prop_map().await?))
    }

    pub async fn brand(&self) -> Result<String> {
        Ok(props::brand_from_prop_map(&self.prop_map().await?))
    }

    pub async fn is_ab(&self) -> Result<bool> {
        Ok(props::is_ab_from_prop_map(&self.prop_map().await?))
    }

    pub async fn cpu_arch(&self) -> Result<String> {
        props::cpu_arch_from_prop_map(&self.prop_map().await?)
    }

    /// Boot-complete props are queried individually; the full prop map is
    /// not reliable before booting has finished.
    pub async fn is_boot_complete(&self) -> Result<bool> {
        let dev = self.command(&["shell", "getprop", "dev.bootcomplete"]).await?;
        if dev.starts_with('1') {
            return Ok(true);
        }
        let sys = self
            .command(&["shell", "getprop", "sys.boot_completed"])
            .await?;
        Ok(sys.starts_with('1'))
    }

    pub async fn android_version(&self) -> Result<String> {
        self.prop("ro.build.version.release").await
    }

    pub async fn major_android_version(&self) -> Result<u32> {
        let version = self.android_version().await?;
        version
            .split('.')
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| {
                FlashError::Parse(format!("unable to parse major android version: {}", version))
            })
    }

    /// The IMEI is not a property; it is scraped from the telephony
    /// service, with the invocation depending on the Android generation.
    pub async fn imei(&self) -> Result<String> {
        lazy_static! {
            static ref DIGIT_DOT: Regex = Regex::new(r"\d\.").unwrap();
            static ref DIGIT: Regex = Regex::new(r"\d").unwrap();
            static ref LONG_DIGITS: Regex = Regex::new(r"\d{15,}").unwrap();
        }

        let major = self.major_android_version().await.unwrap_or(0);
        if major >= 5 {
            let raw = self
                .command(&["shell", "service", "call", "iphonesubinfo", "1"])
                .await?;
            let dotted: String = DIGIT_DOT
                .find_iter(&raw)
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join("");
            let imei: String = DIGIT
                .find_iter(&dotted)
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join("");
            Ok(imei)
        } else {
            let raw = self.command(&["shell", "dumpsys", "iphonesubinfo"]).await?;
            Ok(LONG_DIGITS
                .find_iter(&raw)
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(""))
        }
    }

    /// Translate a logical target to the debug-bridge reboot verb. The
    /// `Bootloader` target branches on brand: Samsung devices have no
    /// fastboot mode and reboot into heimdall's download mode instead.
    pub async fn reboot(&self, target: StateTarget) -> Result<()> {
        let verb = match target {
            StateTarget::Fastboot => "bootloader",
            StateTarget::Heimdall => "download",
            StateTarget::Bootloader => {
                let brand = self.brand().await?;
                return if brand.eq_ignore_ascii_case("samsung") {
                    Box::pin(self.reboot(StateTarget::Heimdall)).await
                } else {
                    Box::pin(self.reboot(StateTarget::Fastboot)).await
                };
            }
            StateTarget::Recovery => "recovery",
            StateTarget::Sideload => "sideload",
            StateTarget::Android => {
                self.command(&["reboot"]).await?;
                return Ok(());
            }
        };
        self.command(&["reboot", verb]).await?;
        Ok(())
    }

    pub async fn push(&self, local: &str, remote: &str) -> Result<()> {
        self.command_with_timeout(
            &["push", local, remote],
            TIMING_CONFIG.tool.transfer_timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn pull(&self, remote: &str, local: &str) -> Result<()> {
        self.command_with_timeout(
            &["pull", remote, local],
            TIMING_CONFIG.tool.transfer_timeout,
        )
        .await
        .map(|_| ())
    }

    /// Stream a package to a device waiting in sideload mode
    pub async fn sideload(&self, file: &str) -> Result<()> {
        self.command_with_timeout(&["sideload", file], TIMING_CONFIG.tool.transfer_timeout)
            .await
            .map(|_| ())
    }
}

impl Default for AdbClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unauthorized_stderr_is_unauthorized_not_disconnected() {
        let client = AdbClient::scripted(vec![RawOutput::new(
            "",
            "error: device unauthorized.\nThis adb server's $ADB_VENDOR_KEYS is not set\n",
        )]);
        assert_eq!(client.state().await, AdbState::Unauthorized);
    }

    #[tokio::test]
    async fn no_device_stderr_is_disconnected() {
        let client = AdbClient::scripted(vec![RawOutput::new("", "error: no device found\n")]);
        assert_eq!(client.state().await, AdbState::Disconnected);
    }

    #[tokio::test]
    async fn device_with_incomplete_boot_is_booting() {
        let client = AdbClient::scripted(vec![
            RawOutput::new("device\n", ""),
            RawOutput::new("0\n", ""), // dev.bootcomplete
            RawOutput::new("0\n", ""), // sys.boot_completed
        ]);
        assert_eq!(client.state().await, AdbState::Booting);
    }

    #[tokio::test]
    async fn device_with_complete_boot_is_android() {
        let client = AdbClient::scripted(vec![
            RawOutput::new("device\n", ""),
            RawOutput::new("1\n", ""),
        ]);
        assert_eq!(client.state().await, AdbState::Android);
    }

    #[tokio::test]
    async fn recovery_and_sideload_states_pass_through() {
        let client = AdbClient::scripted(vec![RawOutput::new("recovery\n", "")]);
        assert_eq!(client.state().await, AdbState::Recovery);
        let client = AdbClient::scripted(vec![RawOutput::new("sideload\n", "")]);
        assert_eq!(client.state().await, AdbState::Sideload);
    }

    #[tokio::test]
    async fn command_classifies_disconnection() {
        let client = AdbClient::scripted(vec![RawOutput::new(
            "",
            "adb: no devices/emulators found\n",
        )]);
        assert!(matches!(
            client.command(&["shell", "getprop"]).await,
            Err(FlashError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn command_tolerates_daemon_start_noise() {
        let client = AdbClient::scripted(vec![RawOutput::new(
            "ok\n",
            "* daemon not running; starting now at tcp:5037\n* daemon started successfully\n",
        )]);
        assert_eq!(client.command(&["shell", "echo", "ok"]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn reboot_maps_logical_targets_to_verbs() {
        // Bootloader on a non-samsung brand reboots to fastboot
        let client = AdbClient::scripted(vec![
            RawOutput::new("[ro.product.brand]: [motorola]\n", ""),
            RawOutput::new("", ""),
        ]);
        client.reboot(StateTarget::Bootloader).await.unwrap();
        assert_eq!(client.remaining_script(), 0);

        // Bootloader on samsung reboots to download mode
        let client = AdbClient::scripted(vec![
            RawOutput::new("[ro.product.brand]: [samsung]\n", ""),
            RawOutput::new("", ""),
        ]);
        client.reboot(StateTarget::Bootloader).await.unwrap();
        assert_eq!(client.remaining_script(), 0);
    }
}
