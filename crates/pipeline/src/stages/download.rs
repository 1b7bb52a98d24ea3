//! Download stage: stream a remote file to local scratch with a size
//! ceiling.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use es_domain::error::{Error, Result};

use crate::cancel::CancelToken;

/// Stream `url` into `dest`, failing once more than `limit_bytes` have been
/// received. Checks the cancel token between chunks. Returns bytes written.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    limit_bytes: u64,
    cancel: &CancelToken,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(if status >= 500 || status == 429 {
            Error::VendorTransient {
                provider: "download".into(),
                message: format!("HTTP {status} fetching {url}"),
            }
        } else {
            Error::InvalidFormat(format!("HTTP {status} fetching {url}"))
        });
    }

    // Reject early when the server announces an oversized body.
    if let Some(len) = resp.content_length() {
        if len > limit_bytes {
            return Err(Error::InvalidParam(format!(
                "remote file is {len} bytes, limit is {limit_bytes}"
            )));
        }
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = resp.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(Error::Cancelled);
        }
        let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
        written += chunk.len() as u64;
        if written > limit_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(Error::InvalidParam(format!(
                "download exceeded the {limit_bytes}-byte limit"
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    tracing::debug!(url, bytes = written, "download complete");
    Ok(written)
}
