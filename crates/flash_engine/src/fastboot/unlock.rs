//! Brand-specific OEM unlock operations
//!
//! Every vendor prints a different human-readable result for
//! `fastboot oem unlock`; the raw text is classified into a small outcome
//! set. The ambiguous "re-run this command" confirmation prompt is
//! answered by re-issuing the identical command exactly once per
//! occurrence. Unrecognized output is never treated as success; it is
//! surfaced with the raw text so it can be classified later.

use super::client::FastbootClient;
use crate::error::{FlashError, Result};

/// Classified result of an unlock command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    AlreadyUnlocked,
    Succeeded,
    /// OEM unlock toggle not enabled in the device settings
    NotAllowed,
    Failed,
    /// The bootloader asks for the same command again to confirm
    NeedsRetry,
    Unknown(String),
}

fn classify_motorola(raw: &str) -> UnlockOutcome {
    let lower = raw.to_lowercase();
    if lower.contains("allow oem unlock") {
        UnlockOutcome::NotAllowed
    } else if lower.contains("re-run this command") {
        UnlockOutcome::NeedsRetry
    } else if lower.contains("already unlocked") {
        UnlockOutcome::AlreadyUnlocked
    } else if lower.contains("failed") {
        UnlockOutcome::Failed
    } else if lower.contains("is unlocked")
        || lower.contains("succe")
        || lower.contains("okay")
        || lower.contains("complete")
    {
        UnlockOutcome::Succeeded
    } else {
        UnlockOutcome::Unknown(raw.to_string())
    }
}

fn classify_sony(raw: &str) -> UnlockOutcome {
    let lower = raw.to_lowercase();
    if lower.contains("not allowed") {
        UnlockOutcome::NotAllowed
    } else if lower.contains("already") {
        UnlockOutcome::AlreadyUnlocked
    } else if lower.contains("re-run this command") {
        UnlockOutcome::NeedsRetry
    } else if lower.contains("failed") {
        UnlockOutcome::Failed
    } else if lower.contains("is unlocked") || lower.contains("succe") || lower.contains("okay") {
        UnlockOutcome::Succeeded
    } else {
        UnlockOutcome::Unknown(raw.to_string())
    }
}

fn classify_generic(raw: &str) -> UnlockOutcome {
    let lower = raw.to_lowercase();
    if lower.contains("allow oem unlock") {
        UnlockOutcome::NotAllowed
    } else if lower.contains("re-run this command") {
        UnlockOutcome::NeedsRetry
    } else if lower.contains("failed") {
        UnlockOutcome::Failed
    } else if lower.contains("total time: 0.000s") {
        // An unlock that finishes instantly did nothing: already unlocked
        UnlockOutcome::AlreadyUnlocked
    } else if lower.contains("is unlocked") || lower.contains("succe") || lower.contains("okay") {
        UnlockOutcome::Succeeded
    } else {
        UnlockOutcome::Unknown(raw.to_string())
    }
}

pub(crate) fn classify_unlock_output(brand: &str, raw: &str) -> UnlockOutcome {
    match brand.to_lowercase().as_str() {
        "motorola" => classify_motorola(raw),
        "sony" => classify_sony(raw),
        _ => classify_generic(raw),
    }
}

/// Motorola's unlock data arrives as `(bootloader) ` or `INFO`
/// continuation lines that must be concatenated. Outputs mentioning
/// slots, "not found" or unlock state are status chatter, not data.
pub(crate) fn parse_motorola_unlock_data(raw: &str) -> Option<String> {
    if raw.contains("slot") || raw.contains("not found") || raw.contains("nlock") {
        return None;
    }

    let mut result = String::new();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("(bootloader) ") {
            result.push_str(rest.split(' ').next().unwrap_or(""));
        } else if let Some(rest) = line.strip_prefix("INFO") {
            result.push_str(rest.trim_matches(' '));
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

impl FastbootClient {
    /// Run an unlock command and resolve its classified outcome, answering
    /// one "re-run this command" prompt per invocation.
    async fn resolve_unlock(&self, brand: &str, args: &[&str]) -> Result<()> {
        for attempt in 0..2 {
            let result = self.command(args).await?;
            tracing::info!("fastboot {} output:\n{}", args.join(" "), result);

            match classify_unlock_output(brand, &result) {
                UnlockOutcome::Succeeded => {
                    tracing::info!("bootloader successfully unlocked");
                    return Ok(());
                }
                UnlockOutcome::AlreadyUnlocked => {
                    tracing::info!("bootloader already unlocked");
                    return Ok(());
                }
                UnlockOutcome::NotAllowed => {
                    tracing::warn!("OEM unlock has apparently not been enabled");
                    return Err(FlashError::NotAllowed(
                        "OEM unlock has not been enabled in the device settings".to_string(),
                    ));
                }
                UnlockOutcome::Failed => {
                    tracing::warn!("bootloader unlock failed");
                    return Err(FlashError::Failed("bootloader unlock failed".to_string()));
                }
                UnlockOutcome::NeedsRetry if attempt == 0 => {
                    tracing::info!("re-running the unlock command to confirm the unlock request");
                }
                UnlockOutcome::NeedsRetry => {
                    return Err(FlashError::UnknownResponse(result));
                }
                UnlockOutcome::Unknown(raw) => {
                    return Err(FlashError::UnknownResponse(raw));
                }
            }
        }
        unreachable!("unlock retry loop always returns")
    }

    /// Brand-dispatched unlock. Samsung never reaches this (no unlock
    /// needed); unsupported brands report not-available.
    pub async fn unlock(&self, brand: &str, unlock_code: &str) -> Result<()> {
        match brand.to_lowercase().as_str() {
            "motorola" => self.unlock_motorola(unlock_code).await,
            "sony" => self.unlock_sony(unlock_code).await,
            "oneplus" | "nvidia" | "generic" => self.unlock_generic().await,
            other => Err(FlashError::NotAvailable(format!(
                "unlock not implemented for brand {}",
                other
            ))),
        }
    }

    pub async fn unlock_motorola(&self, unlock_code: &str) -> Result<()> {
        self.resolve_unlock("motorola", &["oem", "unlock", unlock_code])
            .await
    }

    pub async fn unlock_sony(&self, unlock_code: &str) -> Result<()> {
        let code = format!("0x{}", unlock_code);
        self.resolve_unlock("sony", &["oem", "unlock", &code]).await
    }

    pub async fn unlock_generic(&self) -> Result<()> {
        self.resolve_unlock("generic", &["oem", "unlock"]).await
    }

    /// Data the operator must hand to the vendor's unlock portal.
    /// `Ok(None)` means the brand needs no unlock data.
    pub async fn unlock_data(&self, brand: &str) -> Result<Option<String>> {
        if self.is_unlocked().await? {
            return Err(FlashError::NotAvailable("already unlocked".to_string()));
        }

        match brand.to_lowercase().as_str() {
            "motorola" => {
                let raw = self.command(&["oem", "get_unlock_data"]).await?;
                tracing::info!("fastboot oem get_unlock_data output:\n{}", raw);
                parse_motorola_unlock_data(&raw)
                    .map(Some)
                    .ok_or_else(|| FlashError::Parse("unable to parse unlock data".to_string()))
            }
            // Sony's unlock portal wants the IMEI
            "sony" => Ok(Some(self.imei().await?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RawOutput;

    #[test]
    fn classifies_not_allowed_before_failure() {
        assert_eq!(
            classify_unlock_output("generic", "FAILED (remote: Please allow OEM unlock first)"),
            UnlockOutcome::NotAllowed
        );
        assert_eq!(
            classify_unlock_output("sony", "FAILED (remote: oem unlock not allowed)"),
            UnlockOutcome::NotAllowed
        );
    }

    #[test]
    fn classifies_success_variants() {
        assert_eq!(
            classify_unlock_output("motorola", "(bootloader) Bootloader is unlocked! OKAY"),
            UnlockOutcome::Succeeded
        );
        assert_eq!(
            classify_unlock_output("motorola", "Device already unlocked"),
            UnlockOutcome::AlreadyUnlocked
        );
    }

    #[test]
    fn unrecognized_output_is_surfaced_not_swallowed() {
        match classify_unlock_output("generic", "some brand new firmware message") {
            UnlockOutcome::Unknown(raw) => assert!(raw.contains("firmware")),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn parses_motorola_unlock_data_from_bootloader_lines() {
        let raw = "(bootloader) 0A40040192024205#4C4D3556313230\n\
(bootloader) 30373731363031303332323239#BD00\n\
(bootloader) 8A672BA4746C2CE02328A2AC0C39F95\n\
(bootloader) 1A3E5#1F53280002000000000000000\n\
(bootloader) 0000000\n";
        let data = parse_motorola_unlock_data(raw).unwrap();
        assert!(data.starts_with("0A40040192024205#4C4D3556313230"));
        assert!(!data.contains(' '));
    }

    #[test]
    fn parses_motorola_unlock_data_from_info_lines() {
        let raw = "INFO 0A40040192024205#4C4D\nINFO 3556313230#BD00\n";
        assert_eq!(
            parse_motorola_unlock_data(raw).unwrap(),
            "0A40040192024205#4C4D3556313230#BD00"
        );
    }

    #[test]
    fn status_chatter_is_not_unlock_data() {
        assert!(parse_motorola_unlock_data("(bootloader) slot-count: not found").is_none());
    }

    #[tokio::test]
    async fn rerun_prompt_is_answered_exactly_once() {
        // devices, unlock -> re-run, devices, unlock -> success
        let client = FastbootClient::scripted(vec![
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new(
                "(bootloader) To continue, re-run this command within 5 seconds.\nOKAY? no\n",
                "",
            ),
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new("(bootloader) Bootloader is unlocked! OKAY\n", ""),
        ]);
        client.unlock_generic().await.unwrap();
        assert_eq!(client.remaining_script(), 0);
    }

    #[tokio::test]
    async fn second_rerun_prompt_is_an_error() {
        let rerun = "(bootloader) To continue, re-run this command within 5 seconds.\n";
        let client = FastbootClient::scripted(vec![
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new(rerun, ""),
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new(rerun, ""),
        ]);
        assert!(matches!(
            client.unlock_generic().await,
            Err(FlashError::UnknownResponse(_))
        ));
    }

    #[tokio::test]
    async fn not_allowed_is_terminal() {
        let client = FastbootClient::scripted(vec![
            RawOutput::new("serial\tfastboot\n", ""),
            RawOutput::new("", "FAILED (remote: Please allow OEM unlock first)\n"),
        ]);
        assert!(matches!(
            client.unlock_motorola("CODE").await,
            Err(FlashError::NotAllowed(_))
        ));
        // No automatic retry after a terminal refusal
        assert_eq!(client.remaining_script(), 0);
    }
}
