//! Fastboot (bootloader) protocol client
//!
//! This module provides:
//! - `client`: connection state, commands, variable map and derivations
//! - `unlock`: brand-specific OEM unlock operations and response
//!   classification

mod client;
mod unlock;

pub use client::{
    active_slot_from_var_map, imei_from_var_map, is_ab_from_var_map, is_unlocked_from_var_map,
    model_from_var_map, parse_var_map, FastbootClient, FastbootState,
};
pub use unlock::UnlockOutcome;
