//! Flashing orchestrator
//!
//! Runs one install session as a linear pipeline with branches: acquire
//! files, unlock the bootloader if needed, boot or flash the recovery
//! image, wipe and sideload the ROM (A-only or A/B path), then finalize
//! with the optional extra packages. The session runs on its own task;
//! progress is published through a watch channel and every blocking step
//! is preceded by a cancellation checkpoint.
//!
//! This module provides:
//! - `plan`: operator choices for one session
//! - `unlock`: the brand-dispatched bootloader unlock sub-flow
//! - `recovery`: recovery boot/flash, manual-boot handling, driver
//!   side-flow

mod plan;
mod recovery;
mod unlock;

pub use plan::{ExtraToggles, FlashPlan, GappsFlavor, WipeMode};

use crate::acquire;
use crate::config::TIMING_CONFIG;
use crate::device::{DeviceHandle, DeviceState, StateTarget};
use crate::error::{FlashError, Result};
use crate::fastboot::FastbootClient;
use crate::heimdall::HeimdallClient;
use crate::lookup::LookupProvider;
use crate::twrp::TwrpClient;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Asks the operator for a vendor unlock code, given the unlock data to
/// hand to the vendor's portal. `None` aborts the unlock.
pub type UnlockCodePrompt = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Shows the operator a message that needs their attention (key
/// combinations, driver installation, factory-reset warnings).
pub type OperatorNotice = Box<dyn Fn(&str) + Send + Sync>;

/// Operator interaction points of a session
pub struct SessionCallbacks {
    pub unlock_code: Option<UnlockCodePrompt>,
    pub notice: Option<OperatorNotice>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self {
            unlock_code: None,
            notice: None,
        }
    }
}

/// One install session. Construct, subscribe to the status channel, then
/// `run()` on its own task.
pub struct FlashSession {
    device: DeviceHandle,
    fastboot: Arc<FastbootClient>,
    heimdall: Arc<HeimdallClient>,
    twrp: Arc<TwrpClient>,
    lookup: Arc<dyn LookupProvider>,
    plan: FlashPlan,
    callbacks: SessionCallbacks,
    work_dir: PathBuf,
    files: HashMap<String, PathBuf>,
    /// Runtime copy of the plan flag: set when TWRP got flashed (manual
    /// boot), cleared when an A/B ROM replaced the recovery partition
    skip_flash_recovery: bool,
    status: watch::Sender<String>,
}

impl FlashSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: DeviceHandle,
        fastboot: Arc<FastbootClient>,
        heimdall: Arc<HeimdallClient>,
        twrp: Arc<TwrpClient>,
        lookup: Arc<dyn LookupProvider>,
        plan: FlashPlan,
        callbacks: SessionCallbacks,
        work_dir: impl Into<PathBuf>,
    ) -> (Self, watch::Receiver<String>) {
        let (status, status_rx) = watch::channel(String::new());
        let skip_flash_recovery = plan.skip_flash_recovery;
        (
            Self {
                device,
                fastboot,
                heimdall,
                twrp,
                lookup,
                plan,
                callbacks,
                work_dir: work_dir.into(),
                files: HashMap::new(),
                skip_flash_recovery,
                status,
            },
            status_rx,
        )
    }

    fn status(&self, message: &str) {
        tracing::info!("{}", message);
        let _ = self.status.send(message.to_string());
    }

    fn notify_operator(&self, message: &str) {
        tracing::info!("operator notice: {}", message);
        if let Some(notice) = &self.callbacks.notice {
            notice(message);
        }
    }

    fn file(&self, key: &str) -> Option<&PathBuf> {
        self.files.get(key)
    }

    #[cfg(test)]
    fn insert_file(&mut self, key: &str, path: PathBuf) {
        self.files.insert(key.to_string(), path);
    }

    /// Run the whole pipeline. Unlock and recovery-boot failures abort
    /// with an operator-facing message; `Cancelled` is returned silently
    /// whenever the operator withdrew the session.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("starting flashing procedure");

        self.status("Downloading files...");
        if let Err(err) = self.acquire_files().await {
            self.status(&format!("Failed to download the necessary files: {}", err));
            return Err(err);
        }
        self.status("Files downloaded successfully!");

        self.device.set_flashing(true).await;

        let dev = self.device.snapshot().await;
        if !dev.is_unlocked && !self.plan.skip_unlock {
            self.status("Trying to unlock the bootloader...");
            if let Err(err) = self.unlock_flow().await {
                if !err.is_cancelled() {
                    self.status(&format!("Unlocking the device seems to have failed: {}", err));
                }
                return Err(err);
            }
            self.status("Bootloader unlocked successfully!");
        }

        if let Err(err) = self.boot_twrp_step().await {
            match &err {
                FlashError::Cancelled => {}
                FlashError::ManualBootFailed => {
                    self.status("Manually booting TWRP failed.\n\nPlease restart and try again.");
                }
                other => {
                    self.status(&format!("Error booting TWRP: {}", other));
                }
            }
            return Err(err);
        }

        let is_ab = self.device.snapshot().await.is_ab;
        let install = if is_ab {
            self.install_on_ab().await
        } else {
            self.install_on_a_only().await
        };
        if let Err(err) = install {
            if !err.is_cancelled() {
                self.status(&format!("Error during installation: {}", err));
            }
            return Err(err);
        }

        Ok(())
    }

    /// Resolve every needed file: operator-supplied paths win, the rest is
    /// downloaded concurrently. Any retrieval failure aborts the session
    /// before flashing starts.
    async fn acquire_files(&mut self) -> Result<()> {
        let mut specs = self.plan.downloads.clone();

        // Relative destinations land in the session work directory
        for spec in &mut specs {
            if spec.dest.is_relative() {
                spec.dest = self.work_dir.join(&spec.dest);
            }
        }

        if let Some(rom) = &self.plan.user_rom {
            self.files.insert("rom".to_string(), rom.clone());
            specs.retain(|s| s.key != "rom");
        }
        if let Some(img) = &self.plan.user_recovery_img {
            self.files.insert("twrp_img".to_string(), img.clone());
            specs.retain(|s| s.key != "twrp_img");
        }

        for spec in &specs {
            self.files.insert(spec.key.clone(), spec.dest.clone());
        }

        acquire::download_all(specs).await.map_err(|errors| {
            let summary = errors
                .iter()
                .map(|e| format!("{}: {}", e.label, e.source))
                .collect::<Vec<_>>()
                .join("; ");
            FlashError::Failed(summary)
        })
    }

    /// A-only install: wipe, then sideload the ROM
    async fn install_on_a_only(&mut self) -> Result<()> {
        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Recovery).await?;
        tracing::info!("begin A-only installation");

        self.wait_twrp_ready().await?;
        self.status("Great! Now relax and watch the magic happen!");
        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;

        if let Some(rom) = self.file("rom").cloned() {
            self.status("Installing the operating system rom...");
            self.flash_rom(&rom, self.plan.wipe).await?;
            tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;
        }

        self.finish_installation().await
    }

    /// A/B install: optionally mirror the partitions, sideload the ROM,
    /// then reboot recovery again because the ROM replaced it
    async fn install_on_ab(&mut self) -> Result<()> {
        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Recovery).await?;
        tracing::info!("begin A/B installation");

        self.wait_twrp_ready().await?;
        self.status("Great! Now relax and watch the magic happen!");
        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;

        if self.plan.copy_partitions {
            if let Some(zip) = self.file("copypartitions").cloned() {
                self.status("Sideloading copy-partitions.zip...");
                let copy_result = self.flash_zip(&zip).await;
                if let Err(err) = &copy_result {
                    if err.is_cancelled() {
                        return Err(FlashError::Cancelled);
                    }
                    tracing::error!("error flashing {}: {}; proceeding anyway", zip.display(), err);
                }
                tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle))
                    .await;

                // The failed sideload may have left recovery wedged; boot
                // it again before installing the ROM
                if copy_result.is_err() {
                    self.reboot_twrp().await?;
                }
            }
        }

        if let Some(rom) = self.file("rom").cloned() {
            self.status("Installing the operating system rom...");
            self.flash_rom(&rom, self.plan.wipe).await?;
            // Flashing an A/B rom replaces the recovery partition
            self.skip_flash_recovery = false;
        }

        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;

        // Back into recovery so the active slot switches
        self.reboot_twrp().await?;

        self.finish_installation().await
    }

    /// Wipe per plan, then sideload the ROM zip
    pub(crate) async fn flash_rom(&self, zip_file: &Path, wipe: WipeMode) -> Result<()> {
        self.device.ensure_flashing().await?;

        if !zip_file.exists() {
            return Err(FlashError::NotFound(format!(
                "{} does not exist, can't flash it",
                zip_file.display()
            )));
        }

        if self.device.state().await != DeviceState::Recovery {
            self.device.ensure_flashing().await?;
            self.device.request_state(StateTarget::Recovery).await?;
        }

        match wipe {
            WipeMode::Clean => {
                tracing::info!("clean-wiping the device");
                self.twrp.wipe_clean().await?;
            }
            WipeMode::Dirty => {
                tracing::info!("dirty-wiping the device");
                self.twrp.wipe_dirty().await?;
            }
        }

        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Sideload).await?;

        tracing::info!("sideloading the rom zip");
        self.twrp.sideload(zip_file).await
    }

    /// Sideload a single zip, requesting recovery and sideload states as
    /// needed
    pub(crate) async fn flash_zip(&self, zip_file: &Path) -> Result<()> {
        self.device.ensure_flashing().await?;

        if !zip_file.exists() {
            return Err(FlashError::NotFound(format!(
                "{} does not exist, can't flash it",
                zip_file.display()
            )));
        }

        if self.device.state().await != DeviceState::Recovery {
            self.device.ensure_flashing().await?;
            self.device.request_state(StateTarget::Recovery).await?;
        }

        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Sideload).await?;
        self.twrp.sideload(zip_file).await
    }

    /// Sideload an optional extra; failures are logged and never abort the
    /// remaining extras
    async fn flash_extra(&self, key: &str, label: &str) -> Result<()> {
        let Some(zip) = self.file(key).cloned() else {
            return Ok(());
        };

        tracing::info!("start {} installation", label);
        self.status(&format!("Installing {}...", label));
        if let Err(err) = self.flash_zip(&zip).await {
            if err.is_cancelled() {
                return Err(FlashError::Cancelled);
            }
            tracing::error!("error flashing {}: {}; proceeding anyway", zip.display(), err);
        }
        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;
        Ok(())
    }

    /// Push the NanoDroid setup, flash the enabled extras, reboot to
    /// Android and reset the device instance
    async fn finish_installation(&mut self) -> Result<()> {
        tracing::info!("sending the NanoDroid setup file");
        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.wipe_settle)).await;
        if let Err(err) = self
            .twrp
            .send_nanodroid_setup(&self.plan.nanodroid_setup())
            .await
        {
            tracing::error!("error sending the NanoDroid setup file: {}", err);
        }

        let gapps_label = match self.plan.extras.gapps {
            GappsFlavor::Microg => "MicroG",
            _ => "Google framework and apps",
        };
        self.flash_extra("gapps", gapps_label).await?;
        self.flash_extra("aurora", "Aurora Store").await?;
        self.flash_extra("fdroid", "F-Droid").await?;
        self.flash_extra("gsyncswype", "Google sync adapters and/or Swype libraries")
            .await?;
        self.flash_extra("patcher", "the signature spoofing patcher")
            .await?;

        tracing::info!("finished");
        self.status("Installation finished!\n\nNotice: The first boot will take longer.");

        self.device.ensure_flashing().await?;
        self.device.request_state(StateTarget::Recovery).await?;
        self.twrp.adb().reboot(StateTarget::Android).await?;

        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.finish_settle)).await;

        // A finished session resets everything for the next device
        self.device.reset().await;
        Ok(())
    }

    /// Busy-wait until the pulled recovery log shows TWRP is ready. The
    /// operator may need to unlock on-device encryption first.
    async fn wait_twrp_ready(&self) -> Result<()> {
        loop {
            self.device.ensure_flashing().await?;
            match self.twrp.is_ready().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => tracing::error!("unable to check if TWRP is ready: {}", err),
            }
            self.status(
                "Waiting for TWRP to be ready...\n\nIf you can, please unlock TWRP on your device screen.",
            );
            tokio::time::sleep(Duration::from_secs_f64(
                TIMING_CONFIG.poll.operator_wait_interval,
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::AdbClient;
    use crate::device::DeviceMonitor;
    use crate::lookup::StaticLookup;

    fn session_with_plan(plan: FlashPlan) -> (FlashSession, DeviceHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let adb = Arc::new(AdbClient::scripted(vec![]));
        let fastboot = Arc::new(FastbootClient::scripted(vec![]));
        let heimdall = Arc::new(HeimdallClient::scripted(vec![]));
        let twrp = Arc::new(TwrpClient::new(adb, dir.path()));
        let lookup = Arc::new(StaticLookup::new());
        let (_monitor, handle) = DeviceMonitor::new(
            Arc::new(AdbClient::scripted(vec![])),
            fastboot.clone(),
            heimdall.clone(),
            twrp.clone(),
            lookup.clone(),
        );
        let (session, _rx) = FlashSession::new(
            handle.clone(),
            fastboot,
            heimdall,
            twrp,
            lookup,
            plan,
            SessionCallbacks::default(),
            dir.path(),
        );
        (session, handle, dir)
    }

    #[tokio::test]
    async fn flash_rom_is_cancelled_before_any_command() {
        let (session, handle, dir) = session_with_plan(FlashPlan::new(WipeMode::Clean));
        let rom = dir.path().join("rom.zip");
        std::fs::write(&rom, b"zip").unwrap();

        // flashing was never set; the checkpoint fires before any
        // protocol-client command
        assert!(!handle.flashing().await);
        assert!(matches!(
            session.flash_rom(&rom, WipeMode::Clean).await,
            Err(FlashError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn flash_zip_is_cancelled_before_any_command() {
        let (session, _handle, dir) = session_with_plan(FlashPlan::new(WipeMode::Dirty));
        let zip = dir.path().join("extra.zip");
        std::fs::write(&zip, b"zip").unwrap();

        assert!(matches!(
            session.flash_zip(&zip).await,
            Err(FlashError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn flash_rom_requires_an_existing_file() {
        let (session, handle, _dir) = session_with_plan(FlashPlan::new(WipeMode::Clean));
        handle.set_flashing(true).await;
        assert!(matches!(
            session
                .flash_rom(Path::new("/nonexistent/rom.zip"), WipeMode::Clean)
                .await,
            Err(FlashError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn extra_package_failures_do_not_abort() {
        let (mut session, handle, _dir) = session_with_plan(FlashPlan::new(WipeMode::Clean));
        handle.set_flashing(true).await;
        // The zip is missing, but extras never abort the pipeline.
        // (Flashing it would also need recovery; the failure comes first.)
        session.insert_file("fdroid", PathBuf::from("/nonexistent/fdroid.zip"));
        session.flash_extra("fdroid", "F-Droid").await.unwrap();
    }

    #[tokio::test]
    async fn user_supplied_files_bypass_acquisition() {
        let mut plan = FlashPlan::new(WipeMode::Clean);
        plan.user_rom = Some(PathBuf::from("/roms/custom.zip"));
        plan.user_recovery_img = Some(PathBuf::from("/roms/twrp.img"));
        let (mut session, _handle, _dir) = session_with_plan(plan);

        session.acquire_files().await.unwrap();
        assert_eq!(
            session.file("rom").unwrap(),
            &PathBuf::from("/roms/custom.zip")
        );
        assert_eq!(
            session.file("twrp_img").unwrap(),
            &PathBuf::from("/roms/twrp.img")
        );
    }
}
