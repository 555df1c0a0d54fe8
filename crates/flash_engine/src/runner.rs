//! Backend tool invocation
//!
//! Every protocol client shells out to its command-line tool through a
//! [`Runner`]. Tests substitute a scripted runner so no test ever spawns a
//! real backend tool.

use crate::error::{FlashError, Result};
use std::time::Duration;
use tokio::process::Command;

/// Captured output of one tool invocation
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// fastboot and heimdall write results to stdout or stderr depending on
    /// version. Returns the non-empty stream, or the longer one if both
    /// carry text, trimmed.
    pub fn merged(&self) -> String {
        let stdout = self.stdout.trim_matches(['\n', ' ']);
        let stderr = self.stderr.trim_matches(['\n', ' ']);
        if stderr.is_empty() || (!stdout.is_empty() && stdout.len() >= stderr.len()) {
            stdout.to_string()
        } else {
            stderr.to_string()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }
}

/// Invokes a backend tool and captures its output
#[derive(Debug)]
pub enum Runner {
    /// Spawn the real tool
    System { program: String },
    /// Replay a pre-recorded transcript (tests only)
    #[cfg(test)]
    Scripted(std::sync::Mutex<std::collections::VecDeque<RawOutput>>),
}

impl Runner {
    pub fn system(program: impl Into<String>) -> Self {
        Self::System {
            program: program.into(),
        }
    }

    #[cfg(test)]
    pub fn scripted(outputs: Vec<RawOutput>) -> Self {
        Self::Scripted(std::sync::Mutex::new(outputs.into_iter().collect()))
    }

    /// Number of scripted outputs not yet consumed (tests only)
    #[cfg(test)]
    pub fn remaining(&self) -> usize {
        match self {
            Self::Scripted(q) => q.lock().unwrap().len(),
            _ => 0,
        }
    }

    pub async fn output(&self, args: &[&str], timeout_secs: u64) -> Result<RawOutput> {
        match self {
            Self::System { program } => {
                let output = tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    Command::new(program).args(args).output(),
                )
                .await
                .map_err(|_| {
                    FlashError::Timeout(format!(
                        "{} {} timed out after {}s",
                        program,
                        args.join(" "),
                        timeout_secs
                    ))
                })?
                .map_err(FlashError::Io)?;

                Ok(RawOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            #[cfg(test)]
            Self::Scripted(queue) => queue.lock().unwrap().pop_front().ok_or_else(|| {
                FlashError::CommandFailed(format!("scripted transcript exhausted at {:?}", args))
            }),
        }
    }
}

/// Trim the trailing newline and padding a backend tool leaves on stdout
pub fn trim_output(s: &str) -> String {
    s.trim_matches(['\n', ' ']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_prefers_nonempty_stream() {
        let out = RawOutput::new("", "FAILED (remote: oem unlock not allowed)\n");
        assert_eq!(out.merged(), "FAILED (remote: oem unlock not allowed)");
    }

    #[test]
    fn merged_prefers_longer_when_both_present() {
        let out = RawOutput::new("OKAY\n", "Sending 'recovery' (12345 KB) OKAY\n");
        assert_eq!(out.merged(), "Sending 'recovery' (12345 KB) OKAY");
    }

    #[tokio::test]
    async fn scripted_runner_replays_in_order() {
        let runner = Runner::scripted(vec![
            RawOutput::new("first", ""),
            RawOutput::new("second", ""),
        ]);
        assert_eq!(runner.output(&["x"], 1).await.unwrap().stdout, "first");
        assert_eq!(runner.output(&["y"], 1).await.unwrap().stdout, "second");
        assert!(runner.output(&["z"], 1).await.is_err());
    }
}
