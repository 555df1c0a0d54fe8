//! Device state machine
//!
//! One `Device` value represents the physical phone on the USB cable. It
//! lives behind a shared lock, is mutated only by the polling task
//! ([`monitor::DeviceMonitor`]), and is replaced wholesale — never
//! field-wise — when a different physical device shows up or a session
//! finishes, so stale identity fields cannot leak into the next device.
//!
//! This module provides:
//! - `state`: connection states and state-change targets
//! - `monitor`: the 1 Hz polling task and the request/rendezvous queue
//! - `identity`: lazy population of the write-once identity fields

mod identity;
mod monitor;
mod state;

pub use monitor::{DeviceHandle, DeviceMonitor};
pub use state::{DeviceState, StateTarget};

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Brands for which a bootloader unlock flow exists
pub const UNLOCKABLE_BRANDS: &[&str] = &["sony", "motorola", "samsung", "nvidia", "oneplus"];

/// Ring capacity of the observed-state history
pub const HISTORY_CAPACITY: usize = 64;

/// Everything known about the connected device. Identity fields are
/// populated lazily, at most once, and never overwritten for the lifetime
/// of the instance; a different physical device replaces the instance
/// instead.
#[derive(Debug, Clone)]
pub struct Device {
    pub state: DeviceState,
    /// Observed states with their detection time, most recent first,
    /// ring-capped
    pub states_history: VecDeque<(DateTime<Utc>, DeviceState)>,
    /// True while an install session is active; false means the next
    /// checkpoint treats the session as cancelled
    pub flashing: bool,
    /// True while identity fields are being populated
    pub scanning: bool,

    pub model: String,
    pub codename: String,
    /// The model matched several prefix-incompatible codenames
    pub codename_ambiguous: bool,
    pub brand: String,
    pub brand_unlockable: bool,
    /// Marketing name
    pub name: String,
    pub arch: String,
    pub imei: String,
    pub is_ab: bool,
    /// Distinguishes "not A/B" from "not yet determined"
    pub is_ab_checked: bool,
    pub is_unlocked: bool,
    pub is_supported: bool,
    pub is_supported_checked: bool,
    pub twrp_version_connected: String,

    pub adb_props: HashMap<String, String>,
    pub fastboot_vars: HashMap<String, String>,
}

impl Device {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Disconnected,
            states_history: VecDeque::new(),
            flashing: false,
            scanning: false,
            model: String::new(),
            codename: String::new(),
            codename_ambiguous: false,
            brand: String::new(),
            brand_unlockable: false,
            name: String::new(),
            arch: String::new(),
            imei: String::new(),
            is_ab: false,
            is_ab_checked: false,
            is_unlocked: false,
            is_supported: true,
            is_supported_checked: false,
            twrp_version_connected: String::new(),
            adb_props: HashMap::new(),
            fastboot_vars: HashMap::new(),
        }
    }

    /// Prepend a state to the history, evicting the oldest entry once the
    /// ring is full.
    pub fn record_state(&mut self, state: DeviceState) {
        self.states_history.push_front((Utc::now(), state));
        self.states_history.truncate(HISTORY_CAPACITY);
        self.state = state;
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_ring_capped() {
        let mut device = Device::new();
        for _ in 0..(HISTORY_CAPACITY + 10) {
            device.record_state(DeviceState::Android);
            device.record_state(DeviceState::Disconnected);
        }
        assert_eq!(device.states_history.len(), HISTORY_CAPACITY);
        assert_eq!(device.states_history[0].1, DeviceState::Disconnected);
    }

    #[test]
    fn fresh_device_has_no_identity() {
        let device = Device::new();
        assert!(device.model.is_empty());
        assert!(!device.is_ab_checked);
        assert!(device.is_supported);
        assert_eq!(device.state, DeviceState::Disconnected);
    }
}
