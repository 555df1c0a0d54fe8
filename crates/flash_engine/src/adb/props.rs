//! Property-map parsing and pure identity derivations
//!
//! `adb shell getprop` dumps `[key]: [value]` lines. Callers batch one
//! fetch of the full map and derive model, brand, codename and friends
//! through these pure functions instead of issuing one query per field.

use crate::error::{FlashError, Result};
use std::collections::HashMap;

/// Parse a bracketed `getprop` dump into a map. Malformed lines (embedded
/// line breaks split a value across lines) are dropped with a log line.
pub fn parse_prop_map(stdout: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in stdout.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if !line.starts_with('[') || !line.ends_with(']') {
            if !line.trim().is_empty() {
                tracing::debug!("dropped line from adb getprop: {}", line);
            }
            continue;
        }
        let Some((key, value)) = line.split_once(": ") else {
            tracing::debug!("dropped line from adb getprop: {}", line);
            continue;
        };
        map.insert(
            key.trim_matches(['[', ']']).to_string(),
            value.trim_matches(['[', ']']).to_string(),
        );
    }
    map
}

pub fn model_from_prop_map(props: &HashMap<String, String>) -> String {
    non_empty(props, &["ro.product.model", "ro.omni.device"])
}

/// Codename straight from the props. Unreliable, used only when the
/// model-to-codename lookup comes up empty.
pub fn codename_from_prop_map(props: &HashMap<String, String>) -> String {
    non_empty(
        props,
        &["ro.build.product", "ro.product.device", "ro.product.name"],
    )
}

pub fn brand_from_prop_map(props: &HashMap<String, String>) -> String {
    non_empty(props, &["ro.product.brand", "ro.product.manufacturer"])
}

pub fn is_ab_from_prop_map(props: &HashMap<String, String>) -> bool {
    props
        .get("ro.build.ab_update")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn cpu_arch_from_prop_map(props: &HashMap<String, String>) -> Result<String> {
    let abi = props
        .get("ro.product.cpu.abi")
        .map(String::as_str)
        .unwrap_or("");
    match abi.to_lowercase().as_str() {
        "armeabi-v7a" => Ok("arm".to_string()),
        "arm64-v8a" => Ok("arm64".to_string()),
        "x86" | "x86_64" => Ok(abi.to_lowercase()),
        "" => Ok(String::new()),
        other => Err(FlashError::Parse(format!(
            "unknown cpu architecture: {}",
            other
        ))),
    }
}

/// Custom ROMs ship userdebug builds; a userdebug build implies the
/// bootloader already accepts unsigned images.
pub fn is_custom_rom_from_prop_map(props: &HashMap<String, String>) -> bool {
    props
        .get("ro.build.type")
        .map(|v| v == "userdebug")
        .unwrap_or(false)
        || props
            .get("ro.build.flavor")
            .map(|v| v.contains("userdebug"))
            .unwrap_or(false)
        || props
            .get("ro.build.display.id")
            .map(|v| v.contains("userdebug"))
            .unwrap_or(false)
}

fn non_empty(props: &HashMap<String, String>, keys: &[&str]) -> String {
    for key in keys {
        if let Some(v) = props.get(*key) {
            if !v.is_empty() {
                return v.clone();
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "[ro.product.model]: [Pixox]\r\n\
[ro.product.brand]: [google]\n\
[ro.build.product]: [pixox]\n\
[ro.product.cpu.abi]: [arm64-v8a]\n\
[ro.build.ab_update]: [true]\n\
broken line without brackets\n\
[ro.build.type]: [user]\n";

    #[test]
    fn parses_bracketed_dump_and_drops_malformed_lines() {
        let props = parse_prop_map(DUMP);
        assert_eq!(props.get("ro.product.model").unwrap(), "Pixox");
        assert_eq!(props.len(), 6);
    }

    #[test]
    fn derivations_match_live_queries_over_same_props() {
        let props = parse_prop_map(DUMP);
        assert_eq!(model_from_prop_map(&props), "Pixox");
        assert_eq!(brand_from_prop_map(&props), "google");
        assert_eq!(codename_from_prop_map(&props), "pixox");
        assert_eq!(cpu_arch_from_prop_map(&props).unwrap(), "arm64");
        assert!(is_ab_from_prop_map(&props));
        assert!(!is_custom_rom_from_prop_map(&props));
    }

    #[test]
    fn model_falls_back_to_omni_device() {
        let mut props = HashMap::new();
        props.insert("ro.omni.device".to_string(), "bacon".to_string());
        assert_eq!(model_from_prop_map(&props), "bacon");
    }

    #[test]
    fn unknown_abi_is_an_error() {
        let mut props = HashMap::new();
        props.insert("ro.product.cpu.abi".to_string(), "mips".to_string());
        assert!(cpu_arch_from_prop_map(&props).is_err());
    }

    #[test]
    fn userdebug_flavor_marks_custom_rom() {
        let mut props = HashMap::new();
        props.insert(
            "ro.build.flavor".to_string(),
            "lineage_pixox-userdebug".to_string(),
        );
        assert!(is_custom_rom_from_prop_map(&props));
    }
}
