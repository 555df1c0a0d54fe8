//! Configuration module for flash_engine
//!
//! This module contains:
//! - `timing`: timing configurations for polling, settling and tool timeouts
//! - `tools`: backend tool paths (adb, fastboot, heimdall)

mod timing;
mod tools;

pub use timing::{
    PollTimingConfig, SessionTimingConfig, TimingConfig, ToolTimingConfig, TIMING_CONFIG,
};
pub use tools::{ToolPaths, TOOL_PATHS};
