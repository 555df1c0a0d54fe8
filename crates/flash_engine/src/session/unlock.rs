//! Bootloader unlock sub-flow
//!
//! Samsung needs no unlock. Sony and Motorola run a two-phase flow: the
//! unlock data is retrieved from the device, handed to the operator for
//! the vendor's unlock portal, and the returned code feeds the
//! brand-specific unlock command. Every other supported brand uses the
//! generic `oem unlock`. A `NotAllowed` refusal is terminal: the OEM
//! unlock toggle must be enabled on the device first.

use super::FlashSession;
use crate::config::TIMING_CONFIG;
use crate::device::{DeviceState, StateTarget};
use crate::error::{FlashError, Result};
use std::time::Duration;

const FACTORY_RESET_NOTICE: &str = "Your device has been wiped and is now rebooting. This means \
unlocking the bootloader was probably successful!\nPlease reactivate USB Debugging in the system \
settings to continue: In Settings > About Phone: Tap 7 times on Build Number. Then in Settings > \
Developer Options: Activate USB Debugging.";

impl FlashSession {
    pub(crate) async fn unlock_flow(&self) -> Result<()> {
        self.device.ensure_flashing().await?;

        let dev = self.device.snapshot().await;
        let brand = dev.brand.to_lowercase();
        if brand.is_empty() {
            return Err(FlashError::Failed("unknown brand".to_string()));
        }
        if brand == "samsung" {
            // Samsung bootloaders accept unsigned images once OEM unlock
            // is toggled; there is no unlock command to run
            return Ok(());
        }

        let unlock_data = match self.unlock_data_for(&brand, &dev.imei).await {
            Ok(data) => data,
            Err(FlashError::NotAvailable(msg)) if msg.contains("already unlocked") => {
                self.device.set_unlocked().await;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match brand.as_str() {
            "sony" | "motorola" => {
                let data = unlock_data.unwrap_or_default();
                let code = self.prompt_unlock_code(&brand, &data)?;

                self.device.ensure_flashing().await?;
                self.device.request_state(StateTarget::Bootloader).await?;

                self.fastboot.unlock(&brand, &code).await?;
            }
            _ => {
                self.device.ensure_flashing().await?;
                self.device.request_state(StateTarget::Bootloader).await?;
                self.fastboot.unlock_generic().await?;
            }
        }

        self.device.set_unlocked().await;

        // Some devices factory-reset and reboot on unlock; if the device
        // drops off the cable now, tell the operator what happened and
        // what to re-enable.
        tokio::time::sleep(Duration::from_secs_f64(TIMING_CONFIG.session.unlock_settle)).await;
        if self.device.state().await == DeviceState::Disconnected {
            self.notify_operator(FACTORY_RESET_NOTICE);
        }

        Ok(())
    }

    /// Retrieve whatever the vendor portal needs. `Ok(None)` means the
    /// brand needs no unlock data.
    async fn unlock_data_for(&self, brand: &str, cached_imei: &str) -> Result<Option<String>> {
        self.device.ensure_flashing().await?;

        match brand {
            "samsung" | "oneplus" | "nvidia" => Ok(None),
            "sony" => {
                // The IMEI is readable over adb while Android runs; only
                // fall back to fastboot when it was never cached
                if !cached_imei.is_empty() {
                    Ok(Some(cached_imei.to_string()))
                } else {
                    self.fastboot.unlock_data("sony").await
                }
            }
            _ => {
                self.device.ensure_flashing().await?;
                self.device.request_state(StateTarget::Bootloader).await?;
                self.fastboot.unlock_data(brand).await
            }
        }
    }

    /// Hand the unlock data to the operator and wait for the vendor code
    fn prompt_unlock_code(&self, brand: &str, unlock_data: &str) -> Result<String> {
        let Some(prompt) = &self.callbacks.unlock_code else {
            return Err(FlashError::Failed(format!(
                "unlocking a {} device requires an operator-supplied unlock code",
                brand
            )));
        };

        match prompt(unlock_data) {
            Some(code) if !code.trim().is_empty() => Ok(code.trim().to_string()),
            _ => Err(FlashError::Failed("no unlock code provided".to_string())),
        }
    }
}
