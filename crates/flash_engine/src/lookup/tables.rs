//! Seed lookup tables
//!
//! Small curated tables compiled into the binary. The bulk device table
//! is loaded at runtime (`StaticLookup::from_json_file`); these entries
//! cover devices the table misrepresents plus per-device flashing
//! metadata with no upstream source.

use phf::{phf_map, phf_set};

/// Regional/radio variant suffixes stripped off codenames
pub const CODENAME_SUFFIXES: &[&str] = &[
    "_n", "_f", "_t", "_ds", "_nt", "_u2", "_ud2", "_uds", "_cdma", "_umts", "_udstv", "_umtsds",
];

/// Model → codename overrides (keys lowercased)
pub static MODEL_CODENAMES: phf::Map<&'static str, &'static str> = phf_map! {
    "sm-g900f" => "klte",
    "sm-g920f" => "zeroflte",
    "nexus 5" => "hammerhead",
    "nexus 5x" => "bullhead",
    "pixel 2" => "walleye",
    "moto g (4)" => "athene",
    "moto z4" => "foles",
    "oneplus a3003" => "oneplus3",
    "xt1602" => "harpia",
    "d5803" => "aries",
};

/// Codename → brand overrides (keys lowercased)
pub static CODENAME_BRANDS: phf::Map<&'static str, &'static str> = phf_map! {
    "klte" => "samsung",
    "zeroflte" => "samsung",
    "hammerhead" => "lg",
    "bullhead" => "lg",
    "walleye" => "google",
    "athene" => "motorola",
    "foles" => "motorola",
    "harpia" => "motorola",
    "oneplus3" => "oneplus",
    "aries" => "sony",
};

/// Devices whose recovery image must be flashed to a named partition
/// instead of booted from the bootloader (keys lowercased)
pub static RECOVERY_PARTITIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "klte" => "RECOVERY",
    "zeroflte" => "RECOVERY",
    "serrano3g" => "RECOVERY",
    "a5y17lte" => "RECOVERY",
    "harpia" => "recovery",
};

/// Manual recovery-boot instructions by codename or brand (keys lowercased)
pub static KEY_COMBINATIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "samsung" => "Hold Volume Up + Home + Power until the device vibrates, then release Power and keep holding the other keys until recovery appears.",
    "motorola" => "Hold Volume Down + Power for a few seconds, then select Recovery with the volume keys and confirm with Power.",
    "sony" => "With the device off, hold Volume Down while plugging in the USB cable until the notification light turns green.",
    "klte" => "Hold Volume Up + Home + Power until the Samsung logo appears, then release Power only.",
};

/// Codenames known to be unsupported (everything else counts as supported)
pub static UNSUPPORTED: phf::Set<&'static str> = phf_set! {
    "mako",
    "manta",
};
