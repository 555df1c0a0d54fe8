//! Device lookup collaborator
//!
//! Maps between marketing models, codenames, brands and per-device
//! flashing metadata (recovery partition name, manual key combinations,
//! support status). Lookups return a value, `None` for not-found, or an
//! `Ambiguous` error the caller resolves against live device properties
//! or by asking the operator.

mod tables;

use crate::error::{FlashError, Result};
use serde::Deserialize;
use std::path::Path;

pub use tables::{CODENAME_SUFFIXES, KEY_COMBINATIONS, RECOVERY_PARTITIONS};

/// One row of the device table: brand, marketing name, codename, model
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    pub brand: String,
    pub name: String,
    pub codename: String,
    pub model: String,
}

/// Lookup interface consumed by the state machine and the orchestrator
pub trait LookupProvider: Send + Sync {
    /// Unique codename for a model, or `None`, or `Ambiguous`
    fn model_to_codename(&self, model: &str) -> Result<Option<String>>;

    /// All codename candidates for a model, suffix-stripped and deduped
    fn model_to_codename_candidates(&self, model: &str) -> Vec<String>;

    fn codename_to_brand(&self, codename: &str) -> Result<Option<String>>;

    /// Unique marketing name, shortest-common-prefix disambiguated
    fn codename_to_name(&self, codename: &str) -> Result<Option<String>>;

    /// Partition to flash the recovery image to, when it is not bootable
    /// from the primary boot partition
    fn recovery_partition(&self, codename: &str) -> Option<String>;

    /// Operator instructions for manually booting recovery
    fn recovery_key_combination(&self, codename_or_brand: &str) -> Option<String>;

    /// Unknown codenames count as supported
    fn is_supported(&self, codename: &str) -> bool;
}

/// Strip trailing regional/radio variants (`_ds`, `_cdma`, ...) so variant
/// codenames collapse onto their base device.
pub fn strip_codename_suffix(codename: &str) -> String {
    for suffix in CODENAME_SUFFIXES {
        if let Some(stripped) = codename.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    codename.to_string()
}

/// If every candidate starts with the shortest one, the shortest wins
/// (e.g. `gts28wifi` and `gts28wifichn`). A single candidate wins
/// outright; zero candidates yield `None`; anything else is ambiguous.
pub fn prefix_of_all(candidates: &[String]) -> Result<Option<String>> {
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates[0].clone())),
        _ => {
            let shortest = candidates
                .iter()
                .min_by_key(|c| c.len())
                .expect("non-empty candidates");
            if candidates.iter().all(|c| c.starts_with(shortest.as_str())) {
                Ok(Some(shortest.clone()))
            } else {
                Err(FlashError::Ambiguous(candidates.join(", ")))
            }
        }
    }
}

/// In-memory lookup over the seed tables plus an optional device table
#[derive(Debug, Default)]
pub struct StaticLookup {
    records: Vec<DeviceRecord>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<DeviceRecord>) -> Self {
        Self { records }
    }

    /// Load the device table from a JSON file (an array of records)
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let records: Vec<DeviceRecord> = serde_json::from_str(&data)
            .map_err(|e| FlashError::Parse(format!("device table {}: {}", path.display(), e)))?;
        Ok(Self { records })
    }

    /// A model string that already appears in the codename column needs no
    /// translation.
    fn is_codename(&self, s: &str) -> bool {
        let lower = s.to_lowercase();
        tables::MODEL_CODENAMES.values().any(|v| *v == lower)
            || self
                .records
                .iter()
                .any(|r| r.codename.eq_ignore_ascii_case(s))
    }

    fn candidates_from_records(&self, model: &str) -> Vec<String> {
        let mut matches: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.model.eq_ignore_ascii_case(model))
            .map(|r| r.codename.to_lowercase())
            .collect();

        if matches.is_empty() {
            matches = self
                .records
                .iter()
                .filter(|r| r.name.eq_ignore_ascii_case(model))
                .map(|r| r.codename.to_lowercase())
                .collect();
        }

        let mut stripped: Vec<String> = matches
            .iter()
            .map(|c| strip_codename_suffix(c))
            .filter(|c| !c.is_empty())
            .collect();
        stripped.sort();
        stripped.dedup();
        stripped
    }

    fn names_for_codename(&self, codename: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .filter(|r| {
                r.codename.eq_ignore_ascii_case(codename)
                    || strip_codename_suffix(&r.codename.to_lowercase())
                        == codename.to_lowercase()
            })
            .map(|r| r.name.clone())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl LookupProvider for StaticLookup {
    fn model_to_codename(&self, model: &str) -> Result<Option<String>> {
        let lower = model.to_lowercase();
        if let Some(codename) = tables::MODEL_CODENAMES.get(lower.as_str()) {
            return Ok(Some((*codename).to_string()));
        }

        if self.is_codename(model) {
            return Ok(Some(lower));
        }

        prefix_of_all(&self.candidates_from_records(model))
    }

    fn model_to_codename_candidates(&self, model: &str) -> Vec<String> {
        let lower = model.to_lowercase();
        if let Some(codename) = tables::MODEL_CODENAMES.get(lower.as_str()) {
            return vec![(*codename).to_string()];
        }
        self.candidates_from_records(model)
    }

    fn codename_to_brand(&self, codename: &str) -> Result<Option<String>> {
        let lower = codename.to_lowercase();
        if let Some(brand) = tables::CODENAME_BRANDS.get(lower.as_str()) {
            return Ok(Some((*brand).to_string()));
        }

        let mut brands: Vec<String> = self
            .records
            .iter()
            .filter(|r| {
                r.codename.eq_ignore_ascii_case(codename)
                    || strip_codename_suffix(&r.codename.to_lowercase()) == lower
            })
            .map(|r| r.brand.to_lowercase())
            .filter(|b| !b.is_empty())
            .collect();
        brands.sort();
        brands.dedup();

        match brands.len() {
            0 => Ok(None),
            1 => Ok(Some(brands.remove(0))),
            _ => Err(FlashError::Ambiguous(format!(
                "brand of {}: {}",
                codename,
                brands.join(", ")
            ))),
        }
    }

    fn codename_to_name(&self, codename: &str) -> Result<Option<String>> {
        prefix_of_all(&self.names_for_codename(codename))
    }

    fn recovery_partition(&self, codename: &str) -> Option<String> {
        tables::RECOVERY_PARTITIONS
            .get(codename.to_lowercase().as_str())
            .map(|p| (*p).to_string())
    }

    fn recovery_key_combination(&self, codename_or_brand: &str) -> Option<String> {
        tables::KEY_COMBINATIONS
            .get(codename_or_brand.to_lowercase().as_str())
            .map(|k| (*k).to_string())
    }

    fn is_supported(&self, codename: &str) -> bool {
        !tables::UNSUPPORTED.contains(codename.to_lowercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(brand: &str, name: &str, codename: &str, model: &str) -> DeviceRecord {
        DeviceRecord {
            brand: brand.to_string(),
            name: name.to_string(),
            codename: codename.to_string(),
            model: model.to_string(),
        }
    }

    #[test]
    fn prefix_rule_picks_the_shortest_common_prefix() {
        let candidates = vec!["gts28wifi".to_string(), "gts28wifichn".to_string()];
        assert_eq!(prefix_of_all(&candidates).unwrap().unwrap(), "gts28wifi");
    }

    #[test]
    fn incompatible_candidates_are_ambiguous() {
        let candidates = vec!["klte".to_string(), "hlte".to_string()];
        assert!(matches!(
            prefix_of_all(&candidates),
            Err(FlashError::Ambiguous(_))
        ));
    }

    #[test]
    fn suffix_stripping_collapses_variants() {
        assert_eq!(strip_codename_suffix("serrano3g_ds"), "serrano3g");
        assert_eq!(strip_codename_suffix("klte_cdma"), "klte");
        assert_eq!(strip_codename_suffix("bacon"), "bacon");
    }

    #[test]
    fn model_resolves_through_device_table() {
        let lookup = StaticLookup::with_records(vec![
            record("Google", "Pixox", "pixox", "Pixox"),
            record("Google", "Pixox XL", "pixox_xl", "Pixox XL"),
        ]);
        assert_eq!(
            lookup.model_to_codename("Pixox").unwrap().unwrap(),
            "pixox"
        );
        assert_eq!(
            lookup.codename_to_brand("pixox").unwrap().unwrap(),
            "google"
        );
    }

    #[test]
    fn a_codename_passed_as_model_maps_to_itself() {
        let lookup = StaticLookup::with_records(vec![record("Samsung", "Galaxy S5", "klte", "SM-G900F")]);
        assert_eq!(lookup.model_to_codename("klte").unwrap().unwrap(), "klte");
    }

    #[test]
    fn seed_table_takes_precedence() {
        let lookup = StaticLookup::new();
        assert_eq!(
            lookup.model_to_codename("SM-G900F").unwrap().unwrap(),
            "klte"
        );
        assert_eq!(
            lookup.codename_to_brand("klte").unwrap().unwrap(),
            "samsung"
        );
    }

    #[test]
    fn unknown_codenames_count_as_supported() {
        let lookup = StaticLookup::new();
        assert!(lookup.is_supported("somedevice"));
    }

    #[test]
    fn key_combination_falls_back_to_brand_at_the_caller() {
        let lookup = StaticLookup::new();
        assert!(lookup.recovery_key_combination("samsung").is_some());
        assert!(lookup.recovery_key_combination("nope").is_none());
    }
}
