//! TWRP recovery shell operations

use super::log::{self, data_partition_line};
use super::setup::{render_nanodroid_setup, NANODROID_SETUP_FILENAME};
use crate::adb::{AdbClient, AdbState};
use crate::config::TIMING_CONFIG;
use crate::error::{FlashError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const REMOTE_LOG_PATH: &str = "/tmp/recovery.log";
const REMOTE_SETUP_DIR: &str = "/data/media/0/";

fn wrong_state(expected: &str, actual: AdbState) -> FlashError {
    FlashError::WrongState {
        expected: expected.to_string(),
        actual: format!("{:?}", actual).to_lowercase(),
    }
}

/// Recovery shell client. `work_dir` holds the pulled recovery log and the
/// staged setup file; the log copy is overwritten on every pull.
#[derive(Debug)]
pub struct TwrpClient {
    adb: Arc<AdbClient>,
    work_dir: PathBuf,
}

impl TwrpClient {
    pub fn new(adb: Arc<AdbClient>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            adb,
            work_dir: work_dir.into(),
        }
    }

    pub fn adb(&self) -> &AdbClient {
        &self.adb
    }

    fn log_path(&self) -> PathBuf {
        self.work_dir.join("recovery.log")
    }

    /// Run `twrp <args>` in the recovery shell
    async fn twrp_cmd(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["shell", "twrp"];
        full.extend_from_slice(args);
        self.adb.command(&full).await
    }

    pub async fn is_connected(&self) -> bool {
        self.adb.state().await == AdbState::Recovery
    }

    /// Version of the connected TWRP build
    pub async fn version_connected(&self) -> Result<String> {
        lazy_static! {
            static ref VERSION: Regex = Regex::new(r"\d+\.[.\d]*\d+").unwrap();
        }
        let raw = self.twrp_cmd(&["version"]).await?;
        Ok(VERSION
            .find_iter(&raw)
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(""))
    }

    pub async fn wipe(&self, partition: &str) -> Result<()> {
        let state = self.adb.state().await;
        if state != AdbState::Recovery {
            tracing::warn!("device not in recovery mode, cannot wipe partitions");
            return Err(wrong_state("recovery", state));
        }
        self.twrp_cmd(&["wipe", partition]).await.map(|_| ())
    }

    /// Wipe the caches, leaving user data in place
    pub async fn wipe_dirty(&self) -> Result<()> {
        self.settle().await;
        self.wipe("cache").await?;
        self.settle().await;
        self.wipe("dalvik").await?;
        Ok(())
    }

    /// Format data, then wipe caches and the data partition
    pub async fn wipe_clean(&self) -> Result<()> {
        tracing::info!("formatting the data partition");
        self.settle().await;
        self.format_data().await?;

        tracing::info!("wiping the device caches");
        self.settle().await;
        self.wipe_dirty().await?;

        tracing::info!("wiping the data partition");
        self.settle().await;
        self.wipe("data").await?;
        Ok(())
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs_f64(
            TIMING_CONFIG.session.wipe_settle,
        ))
        .await;
    }

    /// Format the data partition. Tries the structured `twrp format data`
    /// command first; recovery builds that predate it fall back to
    /// formatting the raw partition with the matching filesystem tool.
    pub async fn format_data(&self) -> Result<()> {
        self.unmount_data().await?;

        let state = self.adb.state().await;
        if state == AdbState::Recovery {
            if let Err(err) = self.format_data_ors().await {
                tracing::info!("structured format failed ({}), trying oldschool format", err);
                self.format_data_oldschool().await?;
            }
        }

        self.mount_data().await?;
        Ok(())
    }

    async fn format_data_ors(&self) -> Result<()> {
        let stdout = self.twrp_cmd(&["format", "data"]).await?;
        if stdout.contains("Unrecognized script command") {
            Err(FlashError::NotAvailable(
                "recovery does not support: twrp format data".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn format_data_oldschool(&self) -> Result<()> {
        let path_candidates = self.data_partition_path_candidates().await?;
        let fs_candidates = self.data_partition_filesystem_candidates().await?;

        for data_fs in &fs_candidates {
            for data_path in &path_candidates {
                tracing::info!("attempting to format {} as {}", data_path, data_fs);
                match data_fs.as_str() {
                    "f2fs" => {
                        let r = self
                            .adb
                            .command(&["shell", "mkfs.f2fs", "-t", "0", data_path])
                            .await?;
                        if r.to_lowercase().contains("format successful") {
                            return Ok(());
                        }
                        tracing::info!("f2fs format did not seem to work:\n{}", r);
                    }
                    "ext4" => {
                        let r = self
                            .adb
                            .command(&["shell", "make_ext4fs", data_path])
                            .await?;
                        if r.to_lowercase().contains("created filesystem") {
                            return Ok(());
                        }
                        tracing::info!("ext4 format did not seem to work:\n{}", r);
                    }
                    "" => {
                        return Err(FlashError::Failed(
                            "unknown data partition filesystem".to_string(),
                        ))
                    }
                    other => {
                        return Err(FlashError::Failed(format!(
                            "unable to format data to {}",
                            other
                        )))
                    }
                }
            }
        }

        Err(FlashError::Failed("failed to format data".to_string()))
    }

    /// Paths under which the partition mounted as /data is accessible,
    /// discovered from both fstab flavors and the recovery log.
    async fn data_partition_path_candidates(&self) -> Result<Vec<String>> {
        let state = self.adb.state().await;
        if state != AdbState::Recovery {
            return Err(wrong_state("recovery", state));
        }

        let mut candidates = Vec::new();

        let fstab = self.adb.command(&["shell", "cat", "/etc/fstab"]).await?;
        for line in fstab.lines() {
            if line.contains("/data") {
                if let Some(first) = line.split(' ').next() {
                    candidates.push(first.to_string());
                    break;
                }
            }
        }

        let recovery_fstab = self
            .adb
            .command(&["shell", "cat", "/etc/recovery.fstab"])
            .await?;
        for line in recovery_fstab.lines() {
            if line.contains("/data") {
                let fields: Vec<&str> = line.split(' ').collect();
                if fields.len() > 2 {
                    candidates.push(fields[2].to_string());
                    break;
                }
            }
        }

        if let Ok(log) = self.pull_and_read_log().await {
            if let Some(line) = data_partition_line(&log) {
                if let Some(dev) = line.split(' ').find(|part| part.contains("/dev/")) {
                    candidates.push(dev.to_string());
                }
            }
        }

        candidates.retain(|c| !c.is_empty());
        candidates.dedup();
        Ok(candidates)
    }

    async fn data_partition_filesystem_candidates(&self) -> Result<Vec<String>> {
        let state = self.adb.state().await;
        if state != AdbState::Recovery {
            return Err(wrong_state("recovery", state));
        }

        let mut candidates = Vec::new();

        let fstab = self.adb.command(&["shell", "cat", "/etc/fstab"]).await?;
        for line in fstab.lines() {
            if line.contains("/data") {
                let fields: Vec<&str> = line.split(' ').collect();
                if fields.len() > 2 {
                    candidates.push(fields[2].to_string());
                }
            }
        }

        let recovery_fstab = self
            .adb
            .command(&["shell", "cat", "/etc/recovery.fstab"])
            .await?;
        for line in recovery_fstab.lines() {
            if line.contains("/data") {
                let fields: Vec<&str> = line.split(' ').collect();
                if fields.len() > 1 {
                    candidates.push(fields[1].to_string());
                }
            }
        }

        candidates.retain(|c| !c.is_empty());
        candidates.dedup();
        if candidates.is_empty() {
            Err(FlashError::Failed(
                "unable to determine the data partition filesystem".to_string(),
            ))
        } else {
            Ok(candidates)
        }
    }

    pub async fn is_data_mounted(&self) -> Result<bool> {
        let mounts = self.adb.command(&["shell", "cat", "/proc/mounts"]).await?;
        Ok(mounts.lines().any(|line| line.contains("/data")))
    }

    /// Idempotent: checks the mount table first
    pub async fn mount_data(&self) -> Result<()> {
        if !self.is_data_mounted().await? {
            self.adb.command(&["shell", "mount", "/data"]).await?;
        }
        Ok(())
    }

    /// Idempotent: checks the mount table first
    pub async fn unmount_data(&self) -> Result<()> {
        if self.is_data_mounted().await? {
            self.adb.command(&["shell", "umount", "/data"]).await?;
        }
        Ok(())
    }

    /// The data partition exists and reports a non-zero size
    pub async fn is_data_usable(&self) -> Result<bool> {
        let log = self.pull_and_read_log().await?;
        if let Some(line) = data_partition_line(&log) {
            // "backup size: 0mb" appears on the same line; match the
            // partition size field specifically
            Ok(!line.contains("| size: 0mb"))
        } else {
            self.mount_data().await?;
            self.is_data_mounted().await
        }
    }

    /// Put the recovery into sideload mode
    pub async fn open_sideload(&self) -> Result<()> {
        let state = self.adb.state().await;
        if state != AdbState::Recovery {
            tracing::warn!("device not in recovery mode, cannot open sideload");
            return Err(wrong_state("recovery", state));
        }
        self.twrp_cmd(&["sideload"]).await.map(|_| ())
    }

    /// Stream a package to the device. The device must already be in
    /// sideload mode and the file must exist.
    pub async fn sideload(&self, file: &Path) -> Result<()> {
        if !file.exists() {
            return Err(FlashError::NotFound(format!(
                "{} does not exist, can't sideload it",
                file.display()
            )));
        }

        let state = self.adb.state().await;
        if state != AdbState::Sideload {
            tracing::warn!("device not in sideload mode, cannot sideload {}", file.display());
            return Err(wrong_state("sideload", state));
        }

        self.adb.sideload(&file.to_string_lossy()).await
    }

    async fn pull_log(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.work_dir)?;
        self.adb
            .pull(REMOTE_LOG_PATH, &self.work_dir.to_string_lossy())
            .await?;
        let path = self.log_path();
        if !path.exists() {
            return Err(FlashError::NotFound(format!(
                "{} missing after pull",
                path.display()
            )));
        }
        Ok(path)
    }

    async fn read_log(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.log_path()).await?)
    }

    async fn pull_and_read_log(&self) -> Result<String> {
        self.pull_log().await?;
        self.read_log().await
    }

    /// True once the pulled log shows TWRP reached its main page
    pub async fn is_ready(&self) -> Result<bool> {
        let log = self.pull_and_read_log().await?;
        Ok(log::is_ready_log(&log))
    }

    /// Whether the most recent sideload succeeded. Only log lines appended
    /// since the previous pull count, so a result from an earlier install
    /// is never reported twice.
    pub async fn was_last_sideload_successful(&self) -> Result<bool> {
        let previous_lines = match self.read_log().await {
            Ok(log) => log.lines().count(),
            Err(_) => 0,
        };

        let log = self.pull_and_read_log().await?;
        let new_lines = log.lines().count();
        let skip = if previous_lines >= new_lines {
            0
        } else {
            previous_lines
        };

        log::last_install_result(&log, skip)
    }

    pub async fn is_missing_space(&self) -> Result<bool> {
        let log = self.pull_and_read_log().await?;
        Ok(log::is_missing_space(&log))
    }

    pub async fn rom_has_native_sigspoof(&self) -> Result<bool> {
        let log = self.pull_and_read_log().await?;
        Ok(log::has_native_sigspoof(&log))
    }

    /// Render the NanoDroid setup file, push it to the data partition and
    /// verify it arrived.
    pub async fn send_nanodroid_setup(&self, setup: &HashMap<String, String>) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        let staged = self.work_dir.join(NANODROID_SETUP_FILENAME);
        tokio::fs::write(&staged, render_nanodroid_setup(setup)).await?;

        self.adb
            .push(&staged.to_string_lossy(), REMOTE_SETUP_DIR)
            .await?;

        let remote = format!("{}{}", REMOTE_SETUP_DIR, NANODROID_SETUP_FILENAME);
        let listing = self.adb.command(&["shell", "ls", &remote]).await?;
        if listing.contains("No such file or directory") {
            tracing::warn!("failed to send {}", NANODROID_SETUP_FILENAME);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RawOutput;

    fn client_with(outputs: Vec<RawOutput>) -> (TwrpClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let adb = Arc::new(AdbClient::scripted(outputs));
        (TwrpClient::new(adb, dir.path()), dir)
    }

    #[tokio::test]
    async fn mount_data_is_idempotent() {
        // First call mounts, second short-circuits on the mount table
        let (client, _dir) = client_with(vec![
            RawOutput::new("tmpfs /tmp tmpfs rw 0 0\n", ""),
            RawOutput::new("", ""),
            RawOutput::new("/dev/block/dm-0 /data ext4 rw 0 0\n", ""),
        ]);
        client.mount_data().await.unwrap();
        client.mount_data().await.unwrap();
        assert_eq!(client.adb().remaining_script(), 0);
    }

    #[tokio::test]
    async fn sideload_requires_sideload_state() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("rom.zip");
        std::fs::write(&zip, b"zip").unwrap();

        let (client, _work) = client_with(vec![RawOutput::new("recovery\n", "")]);
        assert!(matches!(
            client.sideload(&zip).await,
            Err(FlashError::WrongState { .. })
        ));
    }

    #[tokio::test]
    async fn sideload_requires_existing_file() {
        let (client, _work) = client_with(vec![]);
        assert!(matches!(
            client.sideload(Path::new("/nonexistent/rom.zip")).await,
            Err(FlashError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn wipe_requires_recovery_state() {
        let (client, _work) = client_with(vec![RawOutput::new("device\n", ""), RawOutput::new("1\n", "")]);
        assert!(matches!(
            client.wipe("cache").await,
            Err(FlashError::WrongState { .. })
        ));
    }

    #[tokio::test]
    async fn version_connected_extracts_numeric_version() {
        let (client, _work) = client_with(vec![RawOutput::new("TWRP version 3.7.0-9.0\n", "")]);
        assert_eq!(client.version_connected().await.unwrap(), "3.7.0");
    }

    #[tokio::test]
    async fn last_sideload_result_tracks_appended_lines() {
        let (client, dir) = client_with(vec![
            // pull consumes one adb call; the pulled file is simulated by
            // writing it before the check
            RawOutput::new("", ""),
        ]);
        let log = "startup\nUpdater process ended with RC=0\n";
        std::fs::write(dir.path().join("recovery.log"), log).unwrap();
        assert!(client.was_last_sideload_successful().await.unwrap());
    }
}
