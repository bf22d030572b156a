use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use urlrelay_core::core::traits::MediaProbe;
use urlrelay_core::models::media::MediaMetadata;

use crate::core::process;

pub struct FfprobeProbe;

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> anyhow::Result<MediaMetadata> {
        let output = process::command("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).context("Failed to parse ffprobe output")?;
        Ok(parse_probe(&json))
    }
}

/// Missing fields read as 0.
fn parse_probe(json: &serde_json::Value) -> MediaMetadata {
    let duration = json["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let video = json["streams"].as_array().and_then(|streams| {
        streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("video"))
    });
    let dimension = |key: &str| {
        video
            .and_then(|s| s[key].as_u64())
            .map(|v| v as u32)
            .unwrap_or(0)
    };

    MediaMetadata {
        duration_seconds: duration.max(0.0) as u32,
        width: dimension("width"),
        height: dimension("height"),
    }
}
