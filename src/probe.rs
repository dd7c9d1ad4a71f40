//! Media decoding capability used by the media probe stage.
//!
//! [`MediaDecoder`] is the seam: production uses [`FfprobeDecoder`], which
//! runs `ffprobe` against the object URL; tests substitute a fake.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::MediaConfig;
use crate::error::ResolveError;

/// Structural metadata of the first video stream (or the image).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Zero when the decoder cannot tell (e.g. still images).
    pub frame_count: u64,
    /// Frames per second; zero when unknown.
    pub fps: f64,
}

#[async_trait]
pub trait MediaDecoder: Send + Sync {
    /// Opens the media at `url`. Failing to open is an error, never a
    /// default value.
    async fn probe(&self, url: &str) -> Result<MediaInfo, ResolveError>;
}

/// Runs `ffprobe -of json` as a subprocess.
pub struct FfprobeDecoder {
    binary: String,
    timeout: Duration,
}

impl FfprobeDecoder {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            binary: config.ffprobe.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Parses an ffprobe rational such as `30000/1001`. `0/0` yields `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_probe_output(url: &str, stdout: &[u8]) -> Result<MediaInfo, ResolveError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::decoder(url, format!("unreadable ffprobe output: {}", e)))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::decoder(url, "no video stream"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ResolveError::decoder(url, "stream has no dimensions")),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .or_else(|| {
            let duration: f64 = stream.duration.as_deref()?.parse().ok()?;
            (fps > 0.0).then(|| (duration * fps).round() as u64)
        })
        .unwrap_or(0);

    Ok(MediaInfo {
        width,
        height,
        frame_count,
        fps,
    })
}

#[async_trait]
impl MediaDecoder for FfprobeDecoder {
    async fn probe(&self, url: &str) -> Result<MediaInfo, ResolveError> {
        let child = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,nb_frames,r_frame_rate,avg_frame_rate,duration",
                "-of",
                "json",
            ])
            .arg(url)
            .kill_on_drop(true)
            .output();

        let output = timeout(self.timeout, child)
            .await
            .map_err(|_| {
                ResolveError::decoder(url, format!("ffprobe timed out after {:?}", self.timeout))
            })?
            .map_err(|e| ResolveError::decoder(url, format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::decoder(
                url,
                format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        parse_probe_output(url, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates() {
        assert_eq!(parse_rate("25/1"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    #[test]
    fn video_stream() {
        let json = br#"{"streams":[{"width":1280,"height":720,"r_frame_rate":"30/1",
            "avg_frame_rate":"30/1","duration":"10.000000","nb_frames":"300"}]}"#;
        let info = parse_probe_output("http://x/v.mp4", json).unwrap();
        assert_eq!(
            info,
            MediaInfo {
                width: 1280,
                height: 720,
                frame_count: 300,
                fps: 30.0,
            }
        );
    }

    #[test]
    fn frame_count_falls_back_to_duration() {
        let json = br#"{"streams":[{"width":640,"height":480,"r_frame_rate":"25/1",
            "avg_frame_rate":"0/0","duration":"4.0"}]}"#;
        let info = parse_probe_output("http://x/v.mp4", json).unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.frame_count, 100);
    }

    #[test]
    fn image_stream_has_no_frames() {
        let json = br#"{"streams":[{"width":800,"height":600,"r_frame_rate":"0/0"}]}"#;
        let info = parse_probe_output("http://x/a.png", json).unwrap();
        assert_eq!((info.width, info.height), (800, 600));
        assert_eq!(info.frame_count, 0);
    }

    #[test]
    fn missing_stream_is_a_decoder_error() {
        let err = parse_probe_output("http://x/a", br#"{"streams":[]}"#).unwrap_err();
        assert!(matches!(err, ResolveError::Decoder { .. }));
    }
}
