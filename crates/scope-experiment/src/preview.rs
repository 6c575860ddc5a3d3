//! Live preview as a cancellable background task.
//!
//! The loop holds a preview lease from the [`CaptureArbiter`] for its whole
//! lifetime. Each iteration checks the stop signal, captures a frame,
//! stretches it to 8-bit grayscale, encodes it as JPEG and publishes it on a
//! `watch` channel. A scheduled capture stops the loop through the arbiter;
//! the stop is observed once per iteration.

use crate::capture::CaptureArbiter;
use scope_core::{Camera, ScopeError, ScopeResult, StopSignal};
use scope_storage::{encode_jpeg, stretch_to_gray};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Preview loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Delay between published frames, in milliseconds.
    pub poll_interval_ms: u64,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            jpeg_quality: 80,
        }
    }
}

impl PreviewConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One published preview frame.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    /// JPEG bytes of the stretched grayscale image.
    pub jpeg: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frame counter, starting at 1.
    pub seq: u64,
}

/// Handle to a running preview loop.
pub struct PreviewHandle {
    stop: StopSignal,
    frames: watch::Receiver<Option<Arc<PreviewFrame>>>,
    task: JoinHandle<ScopeResult<u64>>,
}

impl PreviewHandle {
    /// Receiver of the latest published frame.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PreviewFrame>>> {
        self.frames.clone()
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for it; returns the number of frames published.
    pub async fn stop(self) -> ScopeResult<u64> {
        self.stop.stop();
        self.task
            .await
            .map_err(|e| ScopeError::Hardware(format!("preview task failed: {e}")))?
    }
}

/// Start a preview loop; fails with `CameraBusy` if the camera is held.
pub fn start_preview(arbiter: &CaptureArbiter, config: PreviewConfig) -> ScopeResult<PreviewHandle> {
    let stop = StopSignal::new();
    let lease = arbiter.try_acquire_preview(stop.clone())?;
    let (tx, rx) = watch::channel(None);
    let signal = stop.clone();

    let task = tokio::spawn(async move {
        info!(interval_ms = config.poll_interval_ms, "Live preview started");
        let mut seq = 0u64;
        while !signal.is_stopped() {
            let frame = match lease.capture().await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Preview capture failed, stopping preview");
                    return Err(e);
                }
            };
            let gray = stretch_to_gray(&frame);
            let jpeg = encode_jpeg(&gray, config.jpeg_quality)?;
            seq += 1;
            tx.send_replace(Some(Arc::new(PreviewFrame {
                jpeg,
                width: gray.width,
                height: gray.height,
                seq,
            })));
            debug!(seq, "Published preview frame");
            if !signal.sleep(config.poll_interval()).await {
                break;
            }
        }
        info!(frames = seq, "Live preview stopped");
        Ok(seq)
    });

    Ok(PreviewHandle {
        stop,
        frames: rx,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_driver_mock::MockCamera;

    #[tokio::test(start_paused = true)]
    async fn publishes_frames_until_stopped() {
        let arbiter = CaptureArbiter::new(Arc::new(MockCamera::new(16, 8)));
        let preview = start_preview(&arbiter, PreviewConfig::default()).unwrap();
        let mut frames = preview.subscribe();

        frames.changed().await.unwrap();
        let first = frames.borrow_and_update().clone().unwrap();
        assert_eq!((first.width, first.height, first.seq), (16, 8, 1));
        assert_eq!(&first.jpeg[..2], &[0xFF, 0xD8]);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(preview.is_running());
        assert!(arbiter.is_busy());

        let published = preview.stop().await.unwrap();
        assert!(published >= 3);
        assert!(!arbiter.is_busy());
    }
}
