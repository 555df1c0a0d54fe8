//! Device connection states and state-change targets

use std::fmt;

/// What mode the physical device is currently in, as reconciled from the
/// three protocol backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    /// ADB answers but Android has not finished booting
    Booting,
    Unauthorized,
    Android,
    Recovery,
    Sideload,
    /// Bootloader reachable over the fastboot protocol
    Fastboot,
    /// Download mode reachable over the heimdall protocol
    Heimdall,
    Unknown,
    /// Synthetic device used by the simulation hook
    Simulated,
}

impl DeviceState {
    /// States in which the debug bridge is the live protocol
    pub fn is_adb(&self) -> bool {
        matches!(
            self,
            DeviceState::Booting
                | DeviceState::Unauthorized
                | DeviceState::Android
                | DeviceState::Recovery
                | DeviceState::Sideload
        )
    }

    /// States in which a bootloader-family protocol is the live protocol
    pub fn is_bootloader(&self) -> bool {
        matches!(self, DeviceState::Fastboot | DeviceState::Heimdall)
    }

    /// States in which identity fields can be populated
    pub fn is_identifiable(&self) -> bool {
        matches!(
            self,
            DeviceState::Android | DeviceState::Recovery | DeviceState::Fastboot
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Booting => "booting",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Android => "android",
            DeviceState::Recovery => "recovery",
            DeviceState::Sideload => "sideload",
            DeviceState::Fastboot => "fastboot",
            DeviceState::Heimdall => "heimdall",
            DeviceState::Unknown => "unknown",
            DeviceState::Simulated => "simulated",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical target of a state request or reboot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    Android,
    Recovery,
    Sideload,
    /// Either bootloader-family state, whichever the device speaks
    Bootloader,
    Fastboot,
    Heimdall,
}

impl StateTarget {
    pub fn satisfied_by(&self, state: DeviceState) -> bool {
        match self {
            StateTarget::Android => state == DeviceState::Android,
            StateTarget::Recovery => state == DeviceState::Recovery,
            StateTarget::Sideload => state == DeviceState::Sideload,
            StateTarget::Bootloader => state.is_bootloader(),
            StateTarget::Fastboot => state == DeviceState::Fastboot,
            StateTarget::Heimdall => state == DeviceState::Heimdall,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateTarget::Android => "android",
            StateTarget::Recovery => "recovery",
            StateTarget::Sideload => "sideload",
            StateTarget::Bootloader => "bootloader",
            StateTarget::Fastboot => "fastboot",
            StateTarget::Heimdall => "heimdall",
        }
    }
}

impl fmt::Display for StateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootloader_target_accepts_both_protocols() {
        assert!(StateTarget::Bootloader.satisfied_by(DeviceState::Fastboot));
        assert!(StateTarget::Bootloader.satisfied_by(DeviceState::Heimdall));
        assert!(!StateTarget::Bootloader.satisfied_by(DeviceState::Recovery));
    }

    #[test]
    fn exact_targets_require_exact_states() {
        assert!(StateTarget::Recovery.satisfied_by(DeviceState::Recovery));
        assert!(!StateTarget::Recovery.satisfied_by(DeviceState::Sideload));
    }
}
