//! TWRP recovery shell client
//!
//! Built on top of the debug-bridge client; valid only while the device is
//! in recovery (sideload operations require sideload mode). TWRP exposes
//! no structured status channel, so progress is inferred by pulling
//! `/tmp/recovery.log` and searching for marker substrings.
//!
//! This module provides:
//! - `client`: wipe/format/mount/sideload operations
//! - `log`: the pulled-log tracker and all marker substrings
//! - `setup`: NanoDroid setup-file rendering and push

mod client;
mod log;
mod setup;

pub use client::TwrpClient;
pub use log::{
    has_native_sigspoof, is_missing_space, is_ready_log, last_install_result, LOW_SPACE_MARKERS,
    READY_MARKER, UPDATER_RESULT_MARKER,
};
pub use setup::{render_nanodroid_setup, NANODROID_SETUP_FILENAME};
