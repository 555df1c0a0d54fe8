//! Heimdall (vendor-flash) protocol client
//!
//! Samsung devices expose a download mode instead of fastboot; heimdall is
//! the open-source flasher for it. Like fastboot, results land on stdout
//! or stderr depending on the build, so command output is the merged
//! stream, and commands fail fast while no device is detected.

use crate::config::{TIMING_CONFIG, TOOL_PATHS};
use crate::error::{FlashError, Result};
#[cfg(test)]
use crate::runner::RawOutput;
use crate::runner::Runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeimdallState {
    Connected,
    Disconnected,
}

/// Vendor-flash protocol client
#[derive(Debug)]
pub struct HeimdallClient {
    runner: Runner,
}

impl HeimdallClient {
    pub fn new() -> Self {
        Self {
            runner: Runner::system(TOOL_PATHS.heimdall.clone()),
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

    pub async fn state(&self) -> HeimdallState {
        let out = match self
            .runner
            .output(&["detect"], TIMING_CONFIG.tool.query_timeout)
            .await
        {
            Ok(out) => out,
            Err(_) => return HeimdallState::Disconnected,
        };
        if out.stdout.trim().is_empty() {
            HeimdallState::Disconnected
        } else {
            HeimdallState::Connected
        }
    }

    async fn available(&self) -> bool {
        self.state().await == HeimdallState::Connected
    }

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

    /// Flash a recovery image to the named PIT partition. A
    /// driver-access failure is reported as `DeviceAccess` so the caller
    /// can run the driver-reinstall side-flow and retry.
    pub async fn flash_recovery(&self, img_file: &str, partition: &str) -> Result<()> {
        self.flash_recovery_with_timeout(img_file, partition, TIMING_CONFIG.tool.transfer_timeout)
            .await
    }

    pub async fn flash_recovery_with_timeout(
        &self,
        img_file: &str,
        partition: &str,
        timeout_secs: u64,
    ) -> Result<()> {
        let flag = format!("--{}", partition);
        let result = self
            .command_with_timeout(&["flash", &flag, img_file, "--no-reboot"], timeout_secs)
            .await?;

        tracing::info!("heimdall flash output:\n{}", result);

        let lower = result.to_lowercase();
        if lower.contains("upload successful") {
            Ok(())
        } else if lower.contains("failed to access device") {
            tracing::error!("heimdall failed to access device: {}", result);
            Err(FlashError::DeviceAccess)
        } else if lower.contains("upload failed") {
            Err(FlashError::Failed(
                "heimdall failed to flash recovery".to_string(),
            ))
        } else {
            Err(FlashError::UnknownResponse(result))
        }
    }

    /// heimdall has no reboot verb; printing the partition table makes the
    /// device leave download mode as a side effect.
    pub async fn reboot(&self) -> Result<()> {
        self.command(&["print-pit"]).await.map(|_| ())
    }
}

impl Default for HeimdallClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_while_disconnected_fails_without_invoking_tool() {
        let client = HeimdallClient::scripted(vec![RawOutput::new("", "")]);
        assert!(matches!(
            client.command(&["print-pit"]).await,
            Err(FlashError::Disconnected)
        ));
        assert_eq!(client.remaining_script(), 0);
    }

    #[tokio::test]
    async fn flash_recovery_success() {
        let client = HeimdallClient::scripted(vec![
            RawOutput::new("Device detected\n", ""),
            RawOutput::new("Uploading RECOVERY\n100%\nRECOVERY upload successful\n", ""),
        ]);
        client.flash_recovery("twrp.img", "RECOVERY").await.unwrap();
    }

    #[tokio::test]
    async fn driver_failure_is_typed_for_the_side_flow() {
        let client = HeimdallClient::scripted(vec![
            RawOutput::new("Device detected\n", ""),
            RawOutput::new("", "ERROR: Failed to access device. libusb error: -12\n"),
        ]);
        assert!(matches!(
            client.flash_recovery("twrp.img", "RECOVERY").await,
            Err(FlashError::DeviceAccess)
        ));
    }

    #[tokio::test]
    async fn unknown_output_is_surfaced() {
        let client = HeimdallClient::scripted(vec![
            RawOutput::new("Device detected\n", ""),
            RawOutput::new("something new\n", ""),
        ]);
        assert!(matches!(
            client.flash_recovery("twrp.img", "RECOVERY").await,
            Err(FlashError::UnknownResponse(_))
        ));
    }
}
