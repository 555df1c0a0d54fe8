//! Backend tool paths
//!
//! Each protocol client shells out to a command-line tool. The tools are
//! looked up on PATH by default and can be pinned to bundled binaries via
//! environment variables.

use lazy_static::lazy_static;
use std::env;

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub adb: String,
    pub fastboot: String,
    pub heimdall: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            adb: env::var("DROIDFLASH_ADB").unwrap_or_else(|_| "adb".to_string()),
            fastboot: env::var("DROIDFLASH_FASTBOOT").unwrap_or_else(|_| "fastboot".to_string()),
            heimdall: env::var("DROIDFLASH_HEIMDALL").unwrap_or_else(|_| "heimdall".to_string()),
        }
    }
}

lazy_static! {
    /// Global tool path configuration instance
    pub static ref TOOL_PATHS: ToolPaths = ToolPaths::default();
}
