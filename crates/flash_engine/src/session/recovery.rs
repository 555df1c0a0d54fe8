//! Recovery boot/flash step
//!
//! Most devices can boot a recovery image straight from the bootloader.
//! Devices whose recovery lives in a dedicated partition get the image
//! flashed there instead, after which the operator must hold a
//! device-specific key combination; the session blocks until the device
//! surfaces in recovery. Samsung devices flash over heimdall, where a
//! driver-access failure triggers a one-shot driver-reinstall side-flow.

use super::FlashSession;
#[cfg(target_os = "windows")]
use crate::acquire;
use crate::config::TIMING_CONFIG;
use crate::device::{DeviceState, StateTarget};
use crate::error::{FlashError, Result};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BOOT_INSTRUCTIONS: &str = "Please reboot directly into recovery without booting \
Android in between. Unfortunately, no instructions have been found on how to do this with your \
device, sorry.\nHint: Usually, you can achieve this by holding a combination of hardware buttons \
on your device.";

const DRIVER_NOTICE: &str = "Please install/replace the drivers for your device...\nSelect from \
the list what could be your device and press the button. (Sometimes it can be names like \
05c6:9008, SGH-T959V or Generic Serial.)";

#[cfg(target_os = "windows")]
const ZADIG_URL: &str = "https://zadig.akeo.ie/downloads/zadig-2.8.exe";

impl FlashSession {
    /// Bring the device into a ready TWRP: boot or flash the image unless
    /// the plan says TWRP is already installed, then rendezvous on
    /// recovery.
    pub(crate) async fn boot_twrp_step(&mut self) -> Result<()> {
        tracing::info!("arrived at TWRP booting step");

        if !self.skip_flash_recovery {
            self.status("Trying to boot/flash TWRP...");

            let img = self
                .file("twrp_img")
                .cloned()
                .ok_or_else(|| {
                    FlashError::Failed("cannot boot TWRP: missing image file".to_string())
                })?;

            let instructions = match self
                .boot_recovery_image(&img, TIMING_CONFIG.tool.transfer_timeout)
                .await
            {
                Ok(instructions) => instructions,
                Err(FlashError::DeviceAccess) => {
                    // One driver-reinstall attempt, then a retry with a
                    // longer timeout; a second failure is terminal
                    self.reinstall_drivers().await?;
                    self.boot_recovery_image(&img, TIMING_CONFIG.tool.transfer_timeout_extended)
                        .await?
                }
                Err(err) => return Err(err),
            };

            self.check_manual_recovery_boot(instructions).await?;

            tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.reboot_settle))
                .await;
        }

        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Recovery).await?;
        Ok(())
    }

    /// Boot the image, or flash it when the device's recovery partition is
    /// not the primary boot partition. Returns the manual key-combination
    /// instructions when the image was flashed and the operator has to
    /// boot it themselves.
    pub(crate) async fn boot_recovery_image(
        &self,
        img_file: &Path,
        timeout_secs: u64,
    ) -> Result<Option<String>> {
        self.device.ensure_flashing().await?;

        if !img_file.exists() {
            return Err(FlashError::NotFound(format!(
                "{} does not exist, can't flash or boot it",
                img_file.display()
            )));
        }

        if !self.device.state().await.is_bootloader() {
            self.device.ensure_flashing().await?;
            self.device.request_state(StateTarget::Bootloader).await?;
        }

        let dev = self.device.snapshot().await;
        let instructions = self
            .lookup
            .recovery_key_combination(&dev.codename)
            .or_else(|| self.lookup.recovery_key_combination(&dev.brand))
            .unwrap_or_else(|| DEFAULT_BOOT_INSTRUCTIONS.to_string());
        let partition = self.lookup.recovery_partition(&dev.codename);

        let img = img_file.to_string_lossy();
        match self.device.state().await {
            DeviceState::Fastboot => match partition {
                None => {
                    self.fastboot.boot_recovery(&img).await?;
                    Ok(None)
                }
                Some(partition) if partition.eq_ignore_ascii_case("boot") => {
                    self.fastboot.boot_recovery(&img).await?;
                    Ok(None)
                }
                Some(partition) => {
                    self.fastboot.flash_recovery(&img, &partition).await?;
                    Ok(Some(instructions))
                }
            },
            DeviceState::Heimdall => {
                let partition = partition.unwrap_or_else(|| "RECOVERY".to_string());
                self.heimdall
                    .flash_recovery_with_timeout(&img, &partition, timeout_secs)
                    .await?;
                Ok(Some(instructions))
            }
            _ => Err(FlashError::Failed(
                "cannot flash or boot recovery: device bootloader not connected".to_string(),
            )),
        }
    }

    /// When the image was flashed rather than booted, show the operator
    /// the key combination and block until the device leaves the
    /// bootloader family. Landing anywhere but recovery is terminal.
    pub(crate) async fn check_manual_recovery_boot(
        &mut self,
        instructions: Option<String>,
    ) -> Result<()> {
        let Some(text) = instructions else {
            return Ok(());
        };

        // TWRP is now actually installed, not just temporarily booted
        self.skip_flash_recovery = true;
        self.status(&text);
        self.notify_operator(&text);

        loop {
            let state = self.device.state().await;
            if !matches!(
                state,
                DeviceState::Fastboot | DeviceState::Heimdall | DeviceState::Disconnected
            ) {
                break;
            }
            self.device.ensure_flashing().await?;
            tokio::time::sleep(Duration::from_secs_f64(
                TIMING_CONFIG.poll.operator_wait_interval,
            ))
            .await;
        }

        if self.device.state().await != DeviceState::Recovery {
            tracing::warn!("manually booting recovery failed");
            Err(FlashError::ManualBootFailed)
        } else {
            tracing::info!("manually booting recovery succeeded");
            Ok(())
        }
    }

    /// Reboot into TWRP a second time (A/B flows): directly when TWRP is
    /// installed, through the full boot/flash step otherwise. Waits for
    /// readiness.
    pub(crate) async fn reboot_twrp(&mut self) -> Result<()> {
        tracing::info!("trying to boot/flash TWRP again");
        self.status("Rebooting TWRP...");

        if self.skip_flash_recovery {
            self.device.ensure_flashing().await?;
            self.device.request_state(StateTarget::Recovery).await?;
        } else {
            let img = self
                .file("twrp_img")
                .cloned()
                .ok_or_else(|| {
                    FlashError::Failed("cannot boot TWRP: missing image file".to_string())
                })?;
            let instructions = self
                .boot_recovery_image(&img, TIMING_CONFIG.tool.transfer_timeout)
                .await?;
            self.check_manual_recovery_boot(instructions).await?;

            tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.reboot_settle))
                .await;
            self.device.ensure_flashing().await?;
            self.device.request_state(StateTarget::Recovery).await?;
        }

        self.wait_twrp_ready().await
    }

    /// Driver-reinstall side-flow. On Windows this fetches zadig and
    /// launches it elevated with a canned configuration; elsewhere the
    /// operator is told to check cabling and udev rules.
    pub(crate) async fn reinstall_drivers(&self) -> Result<()> {
        self.notify_operator(DRIVER_NOTICE);

        #[cfg(target_os = "windows")]
        {
            let zadig = self.work_dir.join("zadig.exe");
            acquire::download(&zadig, ZADIG_URL, "").await?;
            self.write_zadig_config().await?;

            let output = tokio::process::Command::new("Powershell")
                .arg("-Command")
                .arg(format!(
                    "& {{ Start-Process \"{}\" -Verb RunAs }}",
                    zadig.display()
                ))
                .output()
                .await
                .map_err(FlashError::Io)?;
            tracing::info!(
                "zadig stdout: {} stderr: {}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        #[cfg(not(target_os = "windows"))]
        {
            tracing::info!(
                "driver reinstallation flow is windows-only; check the cable and udev rules"
            );
        }

        Ok(())
    }

    #[cfg(target_os = "windows")]
    async fn write_zadig_config(&self) -> Result<()> {
        const ZADIG_INI: &str = "[general]\n\
advanced_mode = false\n\
exit_on_success = true\n\
log_level = 0\n\
\n\
[device]\n\
list_all = true\n\
include_hubs = false\n\
trim_whitespaces = true\n\
\n\
[driver]\n\
default_driver = 0\n\
extract_only = false\n\
\n\
[security]\n";

        std::fs::create_dir_all(&self.work_dir)?;
        tokio::fs::write(self.work_dir.join("zadig.ini"), ZADIG_INI).await?;
        Ok(())
    }
}
