//! Lazy population of the write-once identity fields
//!
//! Runs inside the polling task whenever the device surfaces in a state
//! that can answer identity queries. At most one property fetch per
//! backend per device instance; every field is derived from the cached
//! maps through the pure derivation functions where possible.

use super::{Device, DeviceState, UNLOCKABLE_BRANDS};
use crate::adb::{self, AdbClient};
use crate::error::FlashError;
use crate::fastboot::{self, FastbootClient};
use crate::lookup::{prefix_of_all, LookupProvider};
use crate::twrp::TwrpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Narrow ambiguous codename candidates by matching them against the live
/// property/variable values; devices usually carry their codename in at
/// least one of them.
pub fn resolve_codename_candidates(
    candidates: &[String],
    props: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> Option<String> {
    let mut matched: Vec<String> = candidates
        .iter()
        .filter(|candidate| {
            props.values().any(|v| v.contains(candidate.as_str()))
                || vars.values().any(|v| v.contains(candidate.as_str()))
        })
        .cloned()
        .collect();
    matched.sort();
    matched.dedup();

    prefix_of_all(&matched).ok().flatten()
}

pub(super) struct IdentityReader<'a> {
    pub adb: &'a AdbClient,
    pub fastboot: &'a FastbootClient,
    pub twrp: &'a TwrpClient,
    pub lookup: &'a dyn LookupProvider,
}

impl IdentityReader<'_> {
    /// Fill every still-empty identity field appropriate to the current
    /// state. Fields already populated are left untouched, even if a
    /// fresh read would differ; a genuinely different device replaces the
    /// instance instead of mutating it.
    pub async fn read_missing_props(&self, shared: &Arc<RwLock<Device>>) {
        {
            shared.write().await.scanning = true;
        }
        let mut dev = shared.read().await.clone();

        match dev.state {
            DeviceState::Android | DeviceState::Recovery => {
                if dev.adb_props.is_empty() {
                    match self.adb.prop_map().await {
                        Ok(props) => dev.adb_props = props,
                        Err(err) => tracing::error!("unable to get adb props map: {}", err),
                    }
                }
            }
            DeviceState::Fastboot => {
                if dev.fastboot_vars.is_empty() {
                    match self.fastboot.var_map().await {
                        Ok(vars) => dev.fastboot_vars = vars,
                        Err(err) => tracing::error!("unable to get fastboot vars map: {}", err),
                    }
                }
            }
            _ => {}
        }

        if dev.model.is_empty() {
            if !dev.adb_props.is_empty() {
                dev.model = adb::model_from_prop_map(&dev.adb_props);
            } else if !dev.fastboot_vars.is_empty() {
                dev.model = fastboot::model_from_var_map(&dev.fastboot_vars);
            }
        }

        if dev.codename.is_empty() {
            if !dev.model.is_empty() {
                match self.lookup.model_to_codename(&dev.model) {
                    Ok(Some(codename)) => {
                        dev.codename = codename;
                        dev.codename_ambiguous = false;
                    }
                    Ok(None) => {}
                    Err(FlashError::Ambiguous(_)) => {
                        let candidates = self.lookup.model_to_codename_candidates(&dev.model);
                        match resolve_codename_candidates(
                            &candidates,
                            &dev.adb_props,
                            &dev.fastboot_vars,
                        ) {
                            Some(codename) => {
                                dev.codename = codename;
                                dev.codename_ambiguous = false;
                            }
                            None => dev.codename_ambiguous = true,
                        }
                    }
                    Err(err) => {
                        tracing::error!("unable to lookup model to codename: {}", err)
                    }
                }
            }
            if dev.codename.is_empty() && !dev.adb_props.is_empty() {
                dev.codename = adb::codename_from_prop_map(&dev.adb_props);
            }
        }

        if dev.brand.is_empty() {
            if !dev.codename.is_empty() {
                match self.lookup.codename_to_brand(&dev.codename) {
                    Ok(Some(brand)) => dev.brand = brand,
                    Ok(None) | Err(FlashError::Ambiguous(_)) => {}
                    Err(err) => tracing::error!("unable to lookup codename to brand: {}", err),
                }
            }
            if dev.brand.is_empty() && !dev.adb_props.is_empty() {
                dev.brand = adb::brand_from_prop_map(&dev.adb_props);
            }
        }

        if !dev.brand_unlockable && !dev.brand.is_empty() {
            dev.brand_unlockable = UNLOCKABLE_BRANDS.contains(&dev.brand.to_lowercase().as_str());
        }

        if dev.name.is_empty() && !dev.codename.is_empty() {
            match self.lookup.codename_to_name(&dev.codename) {
                Ok(Some(name)) => dev.name = name,
                Ok(None) | Err(FlashError::Ambiguous(_)) => {}
                Err(err) => tracing::error!("unable to lookup codename to name: {}", err),
            }
        }

        if dev.arch.is_empty() && !dev.adb_props.is_empty() {
            match adb::cpu_arch_from_prop_map(&dev.adb_props) {
                Ok(arch) => dev.arch = arch,
                Err(err) => tracing::error!("unable to read cpu arch from adb props: {}", err),
            }
        }

        if dev.imei.is_empty() {
            if dev.state == DeviceState::Android {
                match self.adb.imei().await {
                    Ok(imei) => dev.imei = imei,
                    Err(err) => tracing::info!("unable to read imei: {}", err),
                }
            } else if dev.state == DeviceState::Fastboot && !dev.fastboot_vars.is_empty() {
                dev.imei = fastboot::imei_from_var_map(&dev.fastboot_vars);
            }
        }

        if !dev.is_ab_checked {
            if !dev.adb_props.is_empty() {
                dev.is_ab = adb::is_ab_from_prop_map(&dev.adb_props);
                dev.is_ab_checked = true;
            } else if !dev.fastboot_vars.is_empty() {
                dev.is_ab = fastboot::is_ab_from_var_map(&dev.fastboot_vars);
                dev.is_ab_checked = true;
            }
        }

        // Recheck until the device turns out unlocked
        if !dev.is_unlocked {
            if !dev.fastboot_vars.is_empty() {
                dev.is_unlocked = fastboot::is_unlocked_from_var_map(&dev.fastboot_vars);
            }
            if !dev.is_unlocked
                && !dev.adb_props.is_empty()
                && adb::is_custom_rom_from_prop_map(&dev.adb_props)
            {
                dev.is_unlocked = true;
            }
            if !dev.is_unlocked && dev.state == DeviceState::Recovery {
                dev.is_unlocked = true;
            }
        }

        if !dev.is_supported_checked && !dev.codename.is_empty() {
            dev.is_supported = self.lookup.is_supported(&dev.codename);
            dev.is_supported_checked = true;
        }

        if dev.state == DeviceState::Recovery && dev.twrp_version_connected.is_empty() {
            match self.twrp.version_connected().await {
                Ok(version) => dev.twrp_version_connected = version,
                Err(err) => {
                    tracing::error!("unable to determine version of connected twrp: {}", err)
                }
            }
        } else if dev.state != DeviceState::Recovery {
            dev.twrp_version_connected.clear();
        }

        // Write back; only the polling task calls this, so the write-once
        // merge just refreshes identity fields while leaving the
        // operator-owned flashing flag alone.
        let mut guard = shared.write().await;
        let flashing = guard.flashing;
        let state = guard.state;
        let history = std::mem::take(&mut guard.states_history);
        *guard = dev;
        guard.flashing = flashing;
        guard.state = state;
        guard.states_history = history;
        guard.scanning = false;
    }

    /// Whether the connected hardware looks like the device we already
    /// identified. In doubt, assume it is the same one.
    pub async fn is_same_device(&self, cached: &Device, state: DeviceState) -> bool {
        // Nothing identified yet means nothing to contradict
        if cached.model.is_empty() && cached.codename.is_empty() {
            return true;
        }

        match state {
            DeviceState::Android | DeviceState::Recovery | DeviceState::Booting => {
                let model = match self.adb.model().await {
                    Ok(model) => model,
                    Err(err) => {
                        tracing::error!("unable to read model from adb: {}", err);
                        return true;
                    }
                };

                if !model.is_empty() && model != cached.model {
                    match self.lookup.model_to_codename(&model) {
                        Ok(Some(codename)) => {
                            return codename.is_empty() || codename == cached.codename;
                        }
                        Ok(None) => return true,
                        Err(FlashError::Ambiguous(_)) => return true,
                        Err(err) => {
                            tracing::error!("unable to lookup model to codename: {}", err);
                            return true;
                        }
                    }
                }

                if model.is_empty() {
                    let codename = match self.adb.codename().await {
                        Ok(codename) => codename,
                        Err(err) => {
                            tracing::error!("unable to read codename from adb: {}", err);
                            return true;
                        }
                    };
                    return cached.codename == codename;
                }

                true
            }
            DeviceState::Fastboot => {
                let model = match self.fastboot.model().await {
                    Ok(model) => model,
                    Err(err) => {
                        tracing::error!("unable to read model from fastboot: {}", err);
                        return true;
                    }
                };

                if !model.is_empty() && model != cached.model {
                    match self.lookup.model_to_codename(&model) {
                        Ok(Some(codename)) => {
                            return codename.is_empty() || codename == cached.codename;
                        }
                        _ => return true,
                    }
                }

                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_resolve_against_prop_values() {
        let candidates = vec!["pixox".to_string(), "polaris".to_string()];
        let mut props = HashMap::new();
        props.insert("ro.build.product".to_string(), "pixox".to_string());
        let vars = HashMap::new();
        assert_eq!(
            resolve_codename_candidates(&candidates, &props, &vars).unwrap(),
            "pixox"
        );
    }

    #[test]
    fn unmatched_candidates_stay_unresolved() {
        let candidates = vec!["klte".to_string(), "hlte".to_string()];
        let props = HashMap::new();
        let vars = HashMap::new();
        assert!(resolve_codename_candidates(&candidates, &props, &vars).is_none());
    }

    #[test]
    fn prefix_compatible_matches_collapse() {
        let candidates = vec!["gts28wifi".to_string(), "gts28wifichn".to_string()];
        let mut vars = HashMap::new();
        vars.insert("product".to_string(), "gts28wifichn".to_string());
        // Both candidates are substrings of the var value
        let props = HashMap::new();
        assert_eq!(
            resolve_codename_candidates(&candidates, &props, &vars).unwrap(),
            "gts28wifi"
        );
    }
}
