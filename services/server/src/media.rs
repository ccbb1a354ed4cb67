//! External media tooling behind an abstract interface.
//!
//! Probing, thumbnail extraction and DASH segmentation shell out to
//! ffprobe/ffmpeg with blocking subprocess calls, so async callers must
//! run them under `spawn_blocking`. The trait keeps the core testable
//! without the binaries installed; tests swap in a stub.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("spawning {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: std::io::Error,
    },
    #[error("{tool} failed: {detail}")]
    Failed { tool: &'static str, detail: String },
}

/// Sidecar written next to the segments of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub duration: i64,
    pub total_segments: u32,
}

/// Media collaborator operations.
///
/// Methods block until the external tool exits. Call sites on the async
/// runtime wrap them in `tokio::task::spawn_blocking`.
pub trait MediaTools: Send + Sync {
    /// Container duration in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64, MediaError>;
    /// Grab one frame at `timestamp` (e.g. `"00:00:03"`) as a JPEG.
    fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        timestamp: &str,
    ) -> Result<(), MediaError>;
    /// Produce the DASH init + media segments for `video_id` under the
    /// segment root; returns the per-video segment directory.
    fn segment(&self, video_id: i64, input: &Path) -> Result<PathBuf, MediaError>;
}

pub struct FfmpegTools {
    segment_root: PathBuf,
}

impl FfmpegTools {
    pub fn new(segment_root: PathBuf) -> Self {
        Self { segment_root }
    }
}

impl MediaTools for FfmpegTools {
    fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .output()
            .map_err(|source| MediaError::Spawn {
                tool: "ffprobe",
                source,
            })?;
        if !output.status.success() {
            return Err(MediaError::Failed {
                tool: "ffprobe",
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<f64>().map_err(|_| MediaError::Failed {
            tool: "ffprobe",
            detail: format!("unparseable duration: {text:?}"),
        })
    }

    fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        timestamp: &str,
    ) -> Result<(), MediaError> {
        let result = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-ss", timestamp, "-vframes", "1", "-q:v", "2"])
            .arg(output)
            .output()
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg",
                source,
            })?;
        if !result.status.success() {
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                detail: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn segment(&self, video_id: i64, input: &Path) -> Result<PathBuf, MediaError> {
        let dir = self.segment_root.join(video_id.to_string());
        std::fs::create_dir_all(&dir).map_err(|source| MediaError::Spawn {
            tool: "ffmpeg",
            source,
        })?;
        let result = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-c", "copy", "-f", "dash", "-seg_duration", "4"])
            .args(["-init_seg_name", "init-stream$RepresentationID$.m4s"])
            .args([
                "-media_seg_name",
                "chunk-stream$RepresentationID$-$Number%05d$.m4s",
            ])
            .arg(dir.join("manifest.mpd"))
            .output()
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg",
                source,
            })?;
        if !result.status.success() {
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                detail: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        // Best-effort sidecar so ws_init does not have to count files.
        let duration = self.probe_duration(input).unwrap_or(0.0) as i64;
        let total_segments = count_media_segments(&dir);
        let info = SegmentInfo {
            duration,
            total_segments,
        };
        if let Ok(json) = serde_json::to_string_pretty(&info) {
            let _ = std::fs::write(dir.join("segment_info.json"), json);
        }
        info!(video_id, total_segments, "segmentation finished");
        Ok(dir)
    }
}

/// Count `chunk-stream0-NNNNN.m4s` files, stopping at the first missing
/// index.
pub fn count_media_segments(dir: &Path) -> u32 {
    let mut count = 0u32;
    while dir
        .join(format!("chunk-stream0-{count:05}.m4s"))
        .is_file()
    {
        count += 1;
    }
    count
}

/// Read the `segment_info.json` sidecar of a segment directory.
pub fn read_segment_info(dir: &Path) -> Option<SegmentInfo> {
    let raw = std::fs::read_to_string(dir.join("segment_info.json")).ok()?;
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_counting_stops_at_first_gap() {
        let dir = tempfile::tempdir().unwrap();
        for i in [0u32, 1, 2, 4] {
            std::fs::write(dir.path().join(format!("chunk-stream0-{i:05}.m4s")), b"x").unwrap();
        }
        // Index 3 is missing, so 4 is never reached.
        assert_eq!(count_media_segments(dir.path()), 3);
    }

    #[test]
    fn sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let info = SegmentInfo {
            duration: 93,
            total_segments: 24,
        };
        std::fs::write(
            dir.path().join("segment_info.json"),
            serde_json::to_string(&info).unwrap(),
        )
        .unwrap();
        assert_eq!(read_segment_info(dir.path()), Some(info));
        assert_eq!(read_segment_info(&dir.path().join("missing")), None);
    }
}
