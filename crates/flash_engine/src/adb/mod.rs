//! ADB (Android Debug Bridge) client
//!
//! This module provides:
//! - `client`: the debug-bridge protocol client (state, commands, reboot)
//! - `props`: property-map parsing and pure identity derivations

mod client;
mod props;

pub use client::{AdbClient, AdbState};
pub use props::{
    brand_from_prop_map, codename_from_prop_map, cpu_arch_from_prop_map, is_ab_from_prop_map,
    is_custom_rom_from_prop_map, model_from_prop_map, parse_prop_map,
};
