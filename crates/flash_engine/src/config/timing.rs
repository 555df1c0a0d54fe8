//! Timing configuration for device polling and flashing operations

use lazy_static::lazy_static;
use std::env;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Polling cadence of the device state machine
#[derive(Debug, Clone)]
pub struct PollTimingConfig {
    /// Seconds between state-machine ticks
    pub interval: f64,
    /// Seconds between re-checks while waiting on the operator
    pub operator_wait_interval: f64,
}

impl Default for PollTimingConfig {
    fn default() -> Self {
        Self {
            interval: env_f64("DROIDFLASH_POLL_INTERVAL", 1.0),
            operator_wait_interval: env_f64("DROIDFLASH_OPERATOR_WAIT_INTERVAL", 1.0),
        }
    }
}

/// Timeouts applied to backend tool invocations, in seconds
#[derive(Debug, Clone)]
pub struct ToolTimingConfig {
    /// Quick queries: get-state, devices, detect, getprop
    pub query_timeout: u64,
    /// Ordinary commands: reboot, wipe, mount
    pub command_timeout: u64,
    /// Long transfers: sideload, flash, boot
    pub transfer_timeout: u64,
    /// Transfer timeout after a driver reinstall, when the first try failed
    pub transfer_timeout_extended: u64,
}

impl Default for ToolTimingConfig {
    fn default() -> Self {
        Self {
            query_timeout: env_u64("DROIDFLASH_QUERY_TIMEOUT", 10),
            command_timeout: env_u64("DROIDFLASH_COMMAND_TIMEOUT", 60),
            transfer_timeout: env_u64("DROIDFLASH_TRANSFER_TIMEOUT", 1800),
            transfer_timeout_extended: env_u64("DROIDFLASH_TRANSFER_TIMEOUT_EXTENDED", 3600),
        }
    }
}

/// Settling pauses inside the flashing pipeline, in seconds
#[derive(Debug, Clone)]
pub struct SessionTimingConfig {
    /// Pause between successive wipe/format commands
    pub wipe_settle: f64,
    /// Pause after issuing a recovery boot before polling again
    pub reboot_settle: f64,
    /// Pause after the final reboot to Android before resetting the device
    pub finish_settle: f64,
    /// Window after an unlock in which a disconnect means a factory reset
    pub unlock_settle: f64,
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            wipe_settle: env_f64("DROIDFLASH_WIPE_SETTLE", 1.0),
            reboot_settle: env_f64("DROIDFLASH_REBOOT_SETTLE", 5.0),
            finish_settle: env_f64("DROIDFLASH_FINISH_SETTLE", 20.0),
            unlock_settle: env_f64("DROIDFLASH_UNLOCK_SETTLE", 5.0),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub poll: PollTimingConfig,
    pub tool: ToolTimingConfig,
    pub session: SessionTimingConfig,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll: PollTimingConfig::default(),
            tool: ToolTimingConfig::default(),
            session: SessionTimingConfig::default(),
        }
    }
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}
