//! droidflash - install a custom Android ROM over USB
//!
//! Usage:
//!     droidflash [OPTIONS]
//!
//! Environment Variables:
//!     DROIDFLASH_ADB: Path to the adb binary (default: adb on PATH)
//!     DROIDFLASH_FASTBOOT: Path to the fastboot binary
//!     DROIDFLASH_HEIMDALL: Path to the heimdall binary
//!     DROIDFLASH_WORK_DIR: Working directory for downloads and logs
//!     DROIDFLASH_DEVICE_TABLE: JSON device lookup table
//!     RUST_LOG: Log filter (default: info)

use anyhow::{anyhow, Result};
use clap::Parser;
use flash_engine::{
    AdbClient, DeviceHandle, DeviceMonitor, DeviceState, FastbootClient, FlashPlan, FlashSession,
    GappsFlavor, HeimdallClient, SessionCallbacks, StaticLookup, TwrpClient, WipeMode,
};
use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// droidflash - automated Android unlocking, TWRP and ROM installation
#[derive(Parser, Debug)]
#[command(name = "droidflash")]
#[command(about = "Automated Android unlocking, TWRP and ROM installation over USB")]
#[command(after_help = r#"Examples:
    # Watch the device connection state
    droidflash --watch

    # Show the detected device and exit
    droidflash --info

    # Install from a prepared plan file
    droidflash --plan plan.json

    # Install operator-supplied files, keeping user data
    droidflash --rom lineage.zip --recovery-img twrp.img --keep-data

    # Skip the unlock step on an already-unlocked device
    droidflash --plan plan.json --skip-unlock
"#)]
struct Cli {
    /// Flash plan JSON file (wipe mode, package toggles, download specs)
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,

    /// ROM zip supplied by the operator, bypassing downloads
    #[arg(long, value_name = "FILE")]
    rom: Option<PathBuf>,

    /// Recovery image supplied by the operator, bypassing downloads
    #[arg(long, value_name = "FILE")]
    recovery_img: Option<PathBuf>,

    /// Keep user data: dirty-wipe instead of clean-wipe
    #[arg(long)]
    keep_data: bool,

    /// Do not try to unlock the bootloader
    #[arg(long)]
    skip_unlock: bool,

    /// TWRP is already installed; reboot into it instead of flashing it
    #[arg(long)]
    skip_flash_recovery: bool,

    /// Sideload copy-partitions.zip before the ROM (A/B devices)
    #[arg(long)]
    copy_partitions: bool,

    // Package toggles
    /// Install MicroG
    #[arg(long)]
    microg: bool,

    /// Install F-Droid
    #[arg(long)]
    fdroid: bool,

    /// Install Aurora Store
    #[arg(long)]
    aurora: bool,

    /// Install the Play Store (via the MicroG package)
    #[arg(long)]
    play_store: bool,

    /// Install Google sync adapters
    #[arg(long)]
    gsync: bool,

    /// Install the signature spoofing patcher
    #[arg(long)]
    sigspoof: bool,

    /// Device lookup table (JSON array of {brand, name, codename, model})
    #[arg(long, env = "DROIDFLASH_DEVICE_TABLE", value_name = "FILE")]
    device_table: Option<PathBuf>,

    /// Working directory for downloads, pulled logs and staged files
    #[arg(long, env = "DROIDFLASH_WORK_DIR", default_value = "work")]
    work_dir: PathBuf,

    /// Watch device connection states until interrupted
    #[arg(long)]
    watch: bool,

    /// Print the detected device and exit
    #[arg(long)]
    info: bool,

    /// Simulate a connected device by model name instead of polling USB
    #[arg(long, value_name = "MODEL")]
    simulate: Option<String>,
}

/// Check that the backend tools are reachable before doing anything
async fn check_system_requirements() -> bool {
    let mut all_passed = true;

    for (tool, required) in [("adb", true), ("fastboot", true), ("heimdall", false)] {
        print!("Checking {} installation... ", tool);
        io::stdout().flush().ok();

        if which::which(tool).is_ok() {
            println!("OK");
        } else if required {
            println!("FAILED");
            println!("   Error: {} is not installed or not in PATH.", tool);
            println!("   Solution:");
            println!("     - macOS: brew install android-platform-tools");
            println!("     - Linux: sudo apt install android-tools-{}", tool);
            println!("     - Windows: https://developer.android.com/studio/releases/platform-tools");
            all_passed = false;
        } else {
            println!("not found (only needed for Samsung devices)");
        }
    }

    all_passed
}

fn build_plan(args: &Cli) -> Result<FlashPlan> {
    let mut plan = match &args.plan {
        Some(path) => FlashPlan::from_json_file(path).map_err(|e| anyhow!(e))?,
        None => FlashPlan::new(WipeMode::Clean),
    };

    if args.keep_data {
        plan.wipe = WipeMode::Dirty;
    }
    plan.skip_unlock |= args.skip_unlock;
    plan.skip_flash_recovery |= args.skip_flash_recovery;
    plan.copy_partitions |= args.copy_partitions;
    if args.rom.is_some() {
        plan.user_rom = args.rom.clone();
    }
    if args.recovery_img.is_some() {
        plan.user_recovery_img = args.recovery_img.clone();
    }
    if args.microg {
        plan.extras.gapps = GappsFlavor::Microg;
    }
    plan.extras.fdroid |= args.fdroid;
    plan.extras.aurora |= args.aurora;
    plan.extras.play_store |= args.play_store;
    plan.extras.gsync |= args.gsync;
    plan.extras.sigspoof |= args.sigspoof;

    if plan.user_rom.is_none() && !plan.downloads.iter().any(|d| d.key == "rom") {
        return Err(anyhow!(
            "no ROM to install: pass --rom or a plan file with a rom download"
        ));
    }
    if plan.user_recovery_img.is_none() && !plan.downloads.iter().any(|d| d.key == "twrp_img") {
        return Err(anyhow!(
            "no recovery image: pass --recovery-img or a plan file with a twrp_img download"
        ));
    }

    Ok(plan)
}

/// Ask the operator for the vendor unlock code on stdin
fn prompt_unlock_code(unlock_data: &str) -> Option<String> {
    println!();
    println!("{}", "=".repeat(60));
    println!("Bootloader unlock data for the vendor's unlock portal:");
    println!();
    println!("    {}", unlock_data);
    println!();
    println!("Request your unlock code there, then enter it below.");
    println!("{}", "=".repeat(60));
    print!("Unlock code (empty to abort): ");
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    let code = line.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

fn print_device(dev: &flash_engine::Device) {
    println!("State:      {}", dev.state);
    println!("Model:      {}", dev.model);
    println!("Codename:   {}", dev.codename);
    println!("Brand:      {}", dev.brand);
    println!("Name:       {}", dev.name);
    println!("Arch:       {}", dev.arch);
    println!(
        "Partitions: {}",
        if !dev.is_ab_checked {
            "undetermined"
        } else if dev.is_ab {
            "A/B"
        } else {
            "A-only"
        }
    );
    println!("Unlocked:   {}", dev.is_unlocked);
    println!("Supported:  {}", dev.is_supported);
    if !dev.twrp_version_connected.is_empty() {
        println!("TWRP:       {}", dev.twrp_version_connected);
    }
}

/// Wait until the monitor has identified the device (or a timeout passes)
async fn wait_for_identity(device: &DeviceHandle) {
    for _ in 0..15 {
        let dev = device.snapshot().await;
        if dev.state != DeviceState::Disconnected && !dev.scanning && !dev.model.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn watch_states(device: DeviceHandle) {
    let mut last = DeviceState::Unknown;
    println!("Watching device connection (Ctrl-C to stop)...");
    loop {
        let state = device.state().await;
        if state != last {
            println!("-> {}", state);
            last = state;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let args = Cli::parse();

    if args.simulate.is_none() && !check_system_requirements().await {
        std::process::exit(1);
    }

    let adb = Arc::new(AdbClient::new());
    let fastboot = Arc::new(FastbootClient::new());
    let heimdall = Arc::new(HeimdallClient::new());
    let twrp = Arc::new(TwrpClient::new(adb.clone(), args.work_dir.join("log")));
    let lookup = Arc::new(match &args.device_table {
        Some(path) => StaticLookup::from_json_file(path).map_err(|e| anyhow!(e))?,
        None => StaticLookup::new(),
    });

    let (monitor, device) = DeviceMonitor::new(
        adb,
        fastboot.clone(),
        heimdall.clone(),
        twrp.clone(),
        lookup.clone(),
    );
    let _poller = monitor.spawn();

    if let Some(model) = &args.simulate {
        device.simulate(model).await;
    }

    if args.info {
        wait_for_identity(&device).await;
        print_device(&device.snapshot().await);
        return Ok(());
    }

    if args.watch {
        watch_states(device).await;
        return Ok(());
    }

    let plan = build_plan(&args)?;

    let callbacks = SessionCallbacks {
        unlock_code: Some(Box::new(prompt_unlock_code)),
        notice: Some(Box::new(|message: &str| {
            println!();
            println!("{}", "=".repeat(60));
            println!("{}", message);
            println!("{}", "=".repeat(60));
        })),
    };

    let (session, mut status) = FlashSession::new(
        device.clone(),
        fastboot,
        heimdall,
        twrp,
        lookup,
        plan,
        callbacks,
        &args.work_dir,
    );

    // First Ctrl-C cancels the session cooperatively, a second one exits
    let canceller = device.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current step...");
            canceller.set_flashing(false).await;
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    // Live status line
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let message = status.borrow().clone();
            if !message.is_empty() {
                println!("{}", message);
            }
        }
    });

    match session.run().await {
        Ok(()) => {
            println!("\nInstallation finished. The first boot will take longer than usual.");
            Ok(())
        }
        Err(err) if err.is_cancelled() => {
            println!("\nSession cancelled.");
            Ok(())
        }
        Err(err) => Err(anyhow!(err)),
    }
}
