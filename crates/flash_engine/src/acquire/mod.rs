//! File acquisition
//!
//! Downloads the ROM, recovery image and optional packages. Downloads are
//! idempotent: an existing destination is trusted, a re-download verifies
//! the upstream checksum sidecar when one is published. The orchestrator
//! fans out one task per file and collects per-item failures keyed by a
//! human-readable label and the source URL.

use crate::error::{FlashError, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use uuid::Uuid;

const USER_AGENT: &str = "droidflash";

/// One file the session needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// Key the orchestrator uses to find the file ("rom", "twrp_img", ...)
    pub key: String,
    /// Human-readable label for error reporting
    pub label: String,
    pub url: String,
    /// Checksum sidecar suffix (".sha256", "?sha256", ...), empty for none
    pub checksum_suffix: String,
    pub dest: PathBuf,
}

/// A single failed retrieval, keyed for operator display
#[derive(Debug)]
pub struct RetrievalError {
    pub label: String,
    pub url: String,
    pub source: FlashError,
}

fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(FlashError::Http)?)
}

/// Suffixes we can verify; everything else is accepted with a log line
fn is_sha256_suffix(suffix: &str) -> bool {
    matches!(suffix, ".sha256" | "?sha256" | ".sha256sum" | "?sha256sum")
}

/// Download `url` to `dest` unless the file already exists. The existing
/// file is assumed correct; forcing a refresh is the caller's business.
pub async fn download(dest: &Path, url: &str, checksum_suffix: &str) -> Result<()> {
    if dest.exists() {
        return Ok(());
    }
    download_and_overwrite(dest, url, checksum_suffix).await
}

/// Download unconditionally, streaming to a temp file that is renamed into
/// place only after the checksum (when available) matches.
pub async fn download_and_overwrite(dest: &Path, url: &str, checksum_suffix: &str) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let client = http_client()?;

    let verify = !checksum_suffix.is_empty() && !url.ends_with(checksum_suffix);
    let expected = if verify {
        fetch_checksum(&client, url, checksum_suffix).await?
    } else {
        None
    };

    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(FlashError::Failed(format!(
            "bad status downloading {}: {}",
            url,
            resp.status()
        )));
    }

    let tmp = dest.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut hasher = Sha256::new();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    if let Some(expected) = expected {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(&expected) {
            let _ = std::fs::remove_file(&tmp);
            return Err(FlashError::ChecksumMismatch(dest.display().to_string()));
        }
    }

    tokio::fs::rename(&tmp, dest).await?;
    Ok(())
}

/// First word of the checksum sidecar, or `None` when the sidecar is not
/// retrievable or uses a digest we do not compute — the file is accepted
/// in that case.
async fn fetch_checksum(client: &Client, url: &str, suffix: &str) -> Result<Option<String>> {
    if !is_sha256_suffix(suffix) {
        tracing::info!(
            "cannot verify {} checksums for {}, accepting the download as-is",
            suffix,
            url
        );
        return Ok(None);
    }

    let checksum_url = format!("{}{}", url, suffix);
    let resp = match client.get(&checksum_url).send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::info!("checksum file {} not retrievable: {}", checksum_url, err);
            return Ok(None);
        }
    };
    if !resp.status().is_success() {
        tracing::info!(
            "could not verify the integrity of {} because {} returns status {}",
            url,
            checksum_url,
            resp.status()
        );
        return Ok(None);
    }

    let body = resp.text().await?;
    Ok(body.split_whitespace().next().map(|w| w.to_string()))
}

/// Fan out one download task per spec. All tasks run to completion; any
/// failures are drained afterwards and returned together.
pub async fn download_all(specs: Vec<DownloadSpec>) -> std::result::Result<(), Vec<RetrievalError>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut handles = Vec::with_capacity(specs.len());
    for spec in specs {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            tracing::info!("downloading {} from {}", spec.label, spec.url);
            if let Err(err) = download(&spec.dest, &spec.url, &spec.checksum_suffix).await {
                let _ = tx.send(RetrievalError {
                    label: spec.label,
                    url: spec.url,
                    source: err,
                });
            }
        }));
    }
    drop(tx);

    for handle in handles {
        let _ = handle.await;
    }

    let mut errors = Vec::new();
    while let Some(err) = rx.recv().await {
        tracing::error!(
            "error retrieving {} from {}: {}",
            err.label,
            err.url,
            err.source
        );
        errors.push(err);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_destination_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rom.zip");
        std::fs::write(&dest, b"cached").unwrap();

        // The URL is unreachable; if the download ran it would fail
        download(&dest, "http://127.0.0.1:1/rom.zip", "")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn fanout_reports_failures_by_label() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![DownloadSpec {
            key: "rom".to_string(),
            label: "Operating system ROM".to_string(),
            url: "http://127.0.0.1:1/rom.zip".to_string(),
            checksum_suffix: String::new(),
            dest: dir.path().join("rom.zip"),
        }];

        let errors = download_all(specs).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].label, "Operating system ROM");
        assert!(errors[0].url.contains("rom.zip"));
    }

    #[test]
    fn only_sha256_family_suffixes_are_verifiable() {
        assert!(is_sha256_suffix(".sha256"));
        assert!(is_sha256_suffix("?sha256sum"));
        assert!(!is_sha256_suffix(".md5"));
    }
}
