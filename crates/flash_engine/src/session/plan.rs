//! Flash plan: everything the operator chose before starting a session

use crate::acquire::DownloadSpec;
use crate::error::{FlashError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeMode {
    /// Format data, wipe caches, wipe data
    Clean,
    /// Wipe caches only, keep user data
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GappsFlavor {
    #[default]
    None,
    Microg,
    Opengapps,
}

/// Optional packages flashed after the ROM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraToggles {
    #[serde(default)]
    pub gapps: GappsFlavor,
    #[serde(default)]
    pub aurora: bool,
    #[serde(default)]
    pub fdroid: bool,
    #[serde(default)]
    pub play_store: bool,
    #[serde(default)]
    pub gsync: bool,
    #[serde(default)]
    pub swype: bool,
    #[serde(default)]
    pub sigspoof: bool,
}

/// Parameters of one install session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashPlan {
    pub wipe: WipeMode,
    #[serde(default)]
    pub skip_unlock: bool,
    /// TWRP is already installed; reboot into it instead of flashing it
    #[serde(default)]
    pub skip_flash_recovery: bool,
    /// Mirror the system partitions before replacing them (A/B devices)
    #[serde(default)]
    pub copy_partitions: bool,
    /// Operator-supplied ROM file, bypassing acquisition
    #[serde(default)]
    pub user_rom: Option<PathBuf>,
    /// Operator-supplied recovery image, bypassing acquisition
    #[serde(default)]
    pub user_recovery_img: Option<PathBuf>,
    #[serde(default)]
    pub extras: ExtraToggles,
    #[serde(default)]
    pub downloads: Vec<DownloadSpec>,
}

impl FlashPlan {
    pub fn new(wipe: WipeMode) -> Self {
        Self {
            wipe,
            skip_unlock: false,
            skip_flash_recovery: false,
            copy_partitions: false,
            user_rom: None,
            user_recovery_img: None,
            extras: ExtraToggles::default(),
            downloads: Vec::new(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| FlashError::Parse(format!("flash plan {}: {}", path.display(), e)))
    }

    /// NanoDroid install-time configuration derived from the package
    /// toggles. The play code is a two-digit field: first digit Play
    /// Store, second Aurora Store.
    pub fn nanodroid_setup(&self) -> HashMap<String, String> {
        let mut setup = HashMap::new();

        if self.extras.gapps == GappsFlavor::Microg {
            setup.insert("microg".to_string(), "1".to_string());
            setup.insert("mapsv1".to_string(), "1".to_string());
        }
        if self.extras.fdroid {
            setup.insert("fdroid".to_string(), "1".to_string());
        }
        if self.extras.gsync {
            setup.insert("gsync".to_string(), "1".to_string());
        }
        if self.extras.swype {
            setup.insert("swipe".to_string(), "1".to_string());
        }

        let play = match (self.extras.play_store, self.extras.aurora) {
            (true, true) => "30",
            (false, true) => "21",
            (true, false) => "10",
            (false, false) => "01",
        };
        setup.insert("play".to_string(), play.to_string());

        setup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_code_combines_both_store_toggles() {
        let mut plan = FlashPlan::new(WipeMode::Clean);
        plan.extras.play_store = true;
        plan.extras.aurora = true;
        assert_eq!(plan.nanodroid_setup().get("play").unwrap(), "30");

        plan.extras.play_store = false;
        assert_eq!(plan.nanodroid_setup().get("play").unwrap(), "21");

        plan.extras.aurora = false;
        assert_eq!(plan.nanodroid_setup().get("play").unwrap(), "01");
    }

    #[test]
    fn microg_enables_maps_shim() {
        let mut plan = FlashPlan::new(WipeMode::Dirty);
        plan.extras.gapps = GappsFlavor::Microg;
        let setup = plan.nanodroid_setup();
        assert_eq!(setup.get("microg").unwrap(), "1");
        assert_eq!(setup.get("mapsv1").unwrap(), "1");
    }

    #[test]
    fn plan_round_trips_through_json() {
        let mut plan = FlashPlan::new(WipeMode::Clean);
        plan.copy_partitions = true;
        plan.extras.fdroid = true;
        let json = serde_json::to_string(&plan).unwrap();
        let back: FlashPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.wipe, WipeMode::Clean);
        assert!(back.copy_partitions);
        assert!(back.extras.fdroid);
    }
}
