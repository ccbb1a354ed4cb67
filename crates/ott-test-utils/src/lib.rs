// ott-test-utils: shared test clients for the streaming suite.
//
// Provides a typed WebSocket client for driving the control plane and a
// raw UDP client for transport scenarios, plus small fixture helpers.

pub mod mock_ws_client;
pub mod udp_client;

pub use mock_ws_client::MockWsClient;
pub use udp_client::UdpClient;

use std::path::{Path, PathBuf};

/// Create a fake DASH segment tree for one video id:
/// `{root}/{video_id}/init-stream0.m4s` plus `count` media chunks.
/// Returns the per-video directory.
pub fn write_fake_segments(root: &Path, video_id: i64, count: u32) -> std::io::Result<PathBuf> {
    let dir = root.join(video_id.to_string());
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("init-stream0.m4s"), b"init-bytes")?;
    for i in 0..count {
        std::fs::write(
            dir.join(format!("chunk-stream0-{i:05}.m4s")),
            format!("segment-{i}").as_bytes(),
        )?;
    }
    Ok(dir)
}
