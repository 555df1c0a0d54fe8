//! flash_engine: device state machine and flashing orchestrator
//!
//! This library drives an Android device through a full unlock →
//! recovery-boot → wipe → install → finalize pipeline over USB:
//! - Protocol clients for the three mutually-exclusive backends (adb,
//!   fastboot, heimdall), each classifying raw tool output into a typed
//!   error taxonomy
//! - A TWRP recovery shell client with log-scraping progress detection
//! - A 1 Hz device state machine with a FIFO request/rendezvous queue
//! - The flashing orchestrator with per-brand unlock flows and
//!   A-only/A/B install paths
//!
//! # Example
//!
//! ```no_run
//! use flash_engine::{
//!     AdbClient, DeviceMonitor, FastbootClient, FlashPlan, FlashSession, HeimdallClient,
//!     SessionCallbacks, StaticLookup, TwrpClient, WipeMode,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let adb = Arc::new(AdbClient::new());
//!     let fastboot = Arc::new(FastbootClient::new());
//!     let heimdall = Arc::new(HeimdallClient::new());
//!     let twrp = Arc::new(TwrpClient::new(adb.clone(), "work"));
//!     let lookup = Arc::new(StaticLookup::new());
//!
//!     let (monitor, device) =
//!         DeviceMonitor::new(adb, fastboot.clone(), heimdall.clone(), twrp.clone(), lookup.clone());
//!     let _poller = monitor.spawn();
//!
//!     let (session, mut status) = FlashSession::new(
//!         device,
//!         fastboot,
//!         heimdall,
//!         twrp,
//!         lookup,
//!         FlashPlan::new(WipeMode::Clean),
//!         SessionCallbacks::default(),
//!         "work",
//!     );
//!     tokio::spawn(async move {
//!         while status.changed().await.is_ok() {
//!             println!("{}", *status.borrow());
//!         }
//!     });
//!     let result = session.run().await;
//!     println!("Result: {:?}", result);
//! }
//! ```

// Core modules
pub mod error;

// Configuration module
pub mod config;

// Tool invocation
pub mod runner;

// Protocol clients
pub mod adb;
pub mod fastboot;
pub mod heimdall;
pub mod twrp;

// Core functionality
pub mod acquire;
pub mod device;
pub mod lookup;
pub mod session;

// Re-export commonly used types and functions
pub use error::{FlashError, Result};

// Config re-exports
pub use config::{TimingConfig, ToolPaths, TIMING_CONFIG, TOOL_PATHS};

// Protocol client re-exports
pub use adb::{AdbClient, AdbState};
pub use fastboot::{FastbootClient, FastbootState, UnlockOutcome};
pub use heimdall::{HeimdallClient, HeimdallState};
pub use twrp::TwrpClient;

// Device re-exports
pub use device::{Device, DeviceHandle, DeviceMonitor, DeviceState, StateTarget};

// Lookup re-exports
pub use lookup::{DeviceRecord, LookupProvider, StaticLookup};

// Acquisition re-exports
pub use acquire::{download, download_all, DownloadSpec, RetrievalError};

// Session re-exports
pub use session::{
    ExtraToggles, FlashPlan, FlashSession, GappsFlavor, OperatorNotice, SessionCallbacks,
    UnlockCodePrompt, WipeMode,
};
