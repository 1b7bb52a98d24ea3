//! Transcode stage: normalize arbitrary media to mono PCM WAV at the
//! configured sample rate via an ffmpeg subprocess.

use std::path::Path;
use std::process::Stdio;

use es_domain::error::{Error, Result};

/// Run ffmpeg to produce the canonical audio file.
pub async fn transcode(
    ffmpeg_bin: &str,
    input: &Path,
    output: &Path,
    sample_rate: u32,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = tokio::process::Command::new(ffmpeg_bin)
        .arg("-hide_banner")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(sample_rate.to_string())
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg("-y")
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Config(format!("failed to spawn {ffmpeg_bin}: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        return Err(Error::InvalidFormat(format!(
            "ffmpeg exited with {}: {tail}",
            result.status
        )));
    }
    Ok(())
}

/// Probe media duration by parsing ffmpeg's `-i` banner output.
/// Returns `None` when no duration line is present.
pub async fn probe_duration(ffmpeg_bin: &str, input: &Path) -> Result<Option<f64>> {
    // `ffmpeg -i` without output exits non-zero but still prints the
    // stream banner; the exit code is irrelevant here.
    let result = tokio::process::Command::new(ffmpeg_bin)
        .arg("-hide_banner")
        .arg("-i")
        .arg(input)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Config(format!("failed to spawn {ffmpeg_bin}: {e}")))?;

    Ok(parse_duration(&String::from_utf8_lossy(&result.stderr)))
}

/// Parse `Duration: HH:MM:SS.cc` out of ffmpeg banner text.
pub(crate) fn parse_duration(banner: &str) -> Option<f64> {
    let line = banner.lines().find(|l| l.trim_start().starts_with("Duration:"))?;
    let value = line.trim_start().strip_prefix("Duration:")?.trim();
    let time = value.split(',').next()?.trim();
    if time == "N/A" {
        return None;
    }

    let mut parts = time.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_ffmpeg_duration_line() {
        let banner = "Input #0, mp3, from 'ep.mp3':\n  Duration: 00:10:00.50, start: 0.0, bitrate: 128 kb/s\n";
        assert_eq!(parse_duration(banner), Some(600.5));
    }

    #[test]
    fn parses_hours() {
        let banner = "  Duration: 01:02:03.00, bitrate: 64 kb/s";
        assert_eq!(parse_duration(banner), Some(3723.0));
    }

    #[test]
    fn missing_or_na_duration_is_none() {
        assert_eq!(parse_duration("no banner here"), None);
        assert_eq!(parse_duration("  Duration: N/A, bitrate: N/A"), None);
    }
}
