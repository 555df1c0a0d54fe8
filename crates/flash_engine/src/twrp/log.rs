//! Recovery log scraping
//!
//! All marker substrings live in this one table: TWRP builds occasionally
//! reword their log lines, and chasing that drift should be a one-file
//! change. The log is pulled fresh from the device on every check and
//! overwrites the previous host-side copy.

use crate::error::{FlashError, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// TWRP has finished starting up and rendered its main page
pub const READY_MARKER: &str = "Set page: 'main";

/// Prefix of the line reporting an install's exit status
pub const UPDATER_RESULT_MARKER: &str = "Updater process ended with ";

/// Phrases any of which indicate the install ran out of space
pub const LOW_SPACE_MARKERS: &[&str] = &[
    "Less than 512 MB free space availabe from TWRP",
    "No space left on device",
    "not enough space available!",
    "unzip: failed to extract /dev/tmp/",
];

/// The line describing the mounted data partition and its size
pub const DATA_LINE_PREFIX: &str = "/data | /dev";

const SIGSPOOF_PATCHER_MARKER: &str = "Framework Patcher";
const SIGSPOOF_NATIVE_MARKER: &str = "ROM has native signature spoofing already";

/// Below this size the log is too young for the low-space heuristic; early
/// startup lines produce false positives.
const LOW_SPACE_MIN_LINES: usize = 100;

/// True once TWRP has rendered its main page
pub fn is_ready_log(log: &str) -> bool {
    log.lines().any(|line| line.contains(READY_MARKER))
}

/// Result of the most recent install, considering only lines appended
/// since the previous pull (`skip_lines`) so a stale result from an
/// earlier install is never reported again.
pub fn last_install_result(log: &str, skip_lines: usize) -> Result<bool> {
    lazy_static! {
        static ref RESULT: Regex =
            Regex::new(&format!("{}(.*)", UPDATER_RESULT_MARKER)).unwrap();
    }

    let lines: Vec<&str> = log.lines().collect();
    let last = lines
        .iter()
        .skip(skip_lines)
        .rev()
        .find_map(|line| RESULT.captures(line))
        .map(|caps| caps[1].trim().to_string());

    match last.as_deref() {
        Some("RC=0") => Ok(true),
        Some("ERROR: 1") => Ok(false),
        Some(other) => Err(FlashError::Parse(format!(
            "unknown sideload result in the recovery log: {}",
            other
        ))),
        None => Err(FlashError::Parse(
            "unable to parse last sideload result".to_string(),
        )),
    }
}

/// Low-space heuristic. Only trusted once the log has grown past its
/// startup chatter.
pub fn is_missing_space(log: &str) -> bool {
    let lines: Vec<&str> = log.lines().collect();
    if lines.len() < LOW_SPACE_MIN_LINES {
        return false;
    }
    lines
        .iter()
        .any(|line| LOW_SPACE_MARKERS.iter().any(|m| line.contains(m)))
}

/// True when the log reports, after its last Framework Patcher run, that
/// the ROM already spoofs signatures natively.
pub fn has_native_sigspoof(log: &str) -> bool {
    let lines: Vec<&str> = log.lines().collect();
    let Some(last_patcher) = lines
        .iter()
        .rposition(|line| line.contains(SIGSPOOF_PATCHER_MARKER))
    else {
        tracing::debug!("no Framework Patcher lines in the recovery log");
        return false;
    };
    lines[last_patcher..]
        .iter()
        .any(|line| line.contains(SIGSPOOF_NATIVE_MARKER))
}

/// The `/data | /dev...` partition line, if TWRP logged one
pub fn data_partition_line(log: &str) -> Option<&str> {
    log.lines().find(|line| line.starts_with(DATA_LINE_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_marker_detection() {
        assert!(is_ready_log("I:operation start\nI:Set page: 'main'\n"));
        assert!(!is_ready_log("I:Set page: 'splash'\n"));
    }

    #[test]
    fn last_install_result_parses_success_and_failure() {
        let log = "line\nUpdater process ended with RC=0\n";
        assert!(last_install_result(log, 0).unwrap());
        let log = "line\nUpdater process ended with ERROR: 1\n";
        assert!(!last_install_result(log, 0).unwrap());
    }

    #[test]
    fn stale_results_before_the_previous_pull_are_ignored() {
        let log = "Updater process ended with RC=0\nsome new line\n";
        // The RC=0 line predates the previous pull (skip 1 line)
        assert!(last_install_result(log, 1).is_err());
    }

    #[test]
    fn last_occurrence_wins() {
        let log = "Updater process ended with RC=0\nUpdater process ended with ERROR: 1\n";
        assert!(!last_install_result(log, 0).unwrap());
    }

    #[test]
    fn low_space_needs_a_grown_log() {
        let short = format!("{}\n", LOW_SPACE_MARKERS[1]);
        assert!(!is_missing_space(&short));

        let mut long = "I:chatter\n".repeat(120);
        long.push_str("E:No space left on device\n");
        assert!(is_missing_space(&long));
    }

    #[test]
    fn native_sigspoof_only_counts_after_the_last_patcher_run() {
        let log = "ROM has native signature spoofing already\n\
Framework Patcher starting\n\
patching services.jar\n";
        assert!(!has_native_sigspoof(log));

        let log = "Framework Patcher starting\n\
ROM has native signature spoofing already\n";
        assert!(has_native_sigspoof(log));
    }
}
