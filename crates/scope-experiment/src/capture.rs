//! Exclusive camera ownership.
//!
//! The camera is one physical resource. [`CaptureArbiter`] keeps it private
//! and hands out [`CaptureLease`]s; only a lease holder can capture. There are
//! two ways in:
//!
//! - [`CaptureArbiter::acquire`] for scheduled work (acquisitions, z-stacks,
//!   snapshots, autofocus). A running preview is asked to stop, and the call
//!   waits until its lease is released. A preview that slips in while the
//!   call is waiting is stopped as well.
//! - [`CaptureArbiter::try_acquire_preview`] for live preview. It never waits:
//!   if anyone holds the camera it fails with `ScopeError::CameraBusy`.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use scope_core::{Camera, RgbFrame, ScopeError, ScopeResult, StopSignal};
use scope_storage::ImageWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::{debug, info};

/// Who holds a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOwner {
    /// Scheduled capture work.
    Exclusive,
    /// Live preview loop.
    Preview,
}

/// Single owner of the camera.
pub struct CaptureArbiter {
    camera: Arc<dyn Camera>,
    token: Arc<Mutex<()>>,
    preview_stop: SyncMutex<Option<StopSignal>>,
    preview_started: Notify,
}

impl CaptureArbiter {
    /// Take ownership of the camera.
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self {
            camera,
            token: Arc::new(Mutex::new(())),
            preview_stop: SyncMutex::new(None),
            preview_started: Notify::new(),
        }
    }

    /// Whether a lease is outstanding.
    pub fn is_busy(&self) -> bool {
        self.token.try_lock().is_err()
    }

    /// Exclusive lease for scheduled work; stops a running preview first.
    pub async fn acquire(&self) -> CaptureLease {
        let lock = self.token.clone().lock_owned();
        tokio::pin!(lock);
        let guard = loop {
            self.stop_preview();
            tokio::select! {
                biased;
                guard = &mut lock => break guard,
                () = self.preview_started.notified() => {}
            }
        };
        debug!("Camera acquired for scheduled capture");
        CaptureLease {
            camera: self.camera.clone(),
            owner: CaptureOwner::Exclusive,
            _guard: guard,
        }
    }

    /// Lease for a preview loop stopped by `stop`; fails if the camera is held.
    pub fn try_acquire_preview(&self, stop: StopSignal) -> ScopeResult<CaptureLease> {
        let guard = self.token.clone().try_lock_owned().map_err(|_| {
            ScopeError::CameraBusy("camera is in use by a scheduled capture".to_string())
        })?;
        *self.preview_stop.lock() = Some(stop);
        self.preview_started.notify_one();
        Ok(CaptureLease {
            camera: self.camera.clone(),
            owner: CaptureOwner::Preview,
            _guard: guard,
        })
    }

    fn stop_preview(&self) {
        if let Some(preview) = self.preview_stop.lock().take() {
            info!("Stopping live preview for scheduled capture");
            preview.stop();
        }
    }
}

/// Proof of camera ownership; the camera is released when this drops.
pub struct CaptureLease {
    camera: Arc<dyn Camera>,
    owner: CaptureOwner,
    _guard: OwnedMutexGuard<()>,
}

impl CaptureLease {
    /// Who holds this lease.
    pub fn owner(&self) -> CaptureOwner {
        self.owner
    }

    /// Capture one frame and write it to `path` (format from the extension).
    pub async fn capture_to(&self, path: &Path) -> ScopeResult<PathBuf> {
        let frame = self.camera.capture().await?;
        ImageWriter::write_frame_async(frame, path.to_path_buf()).await
    }
}

#[async_trait]
impl Camera for CaptureLease {
    async fn set_controls(&self, exposure_us: Option<u32>, gain: Option<f64>) -> ScopeResult<()> {
        self.camera.set_controls(exposure_us, gain).await
    }

    fn exposure_us(&self) -> u32 {
        self.camera.exposure_us()
    }

    fn gain(&self) -> f64 {
        self.camera.gain()
    }

    async fn capture(&self) -> ScopeResult<RgbFrame> {
        self.camera.capture().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_driver_mock::MockCamera;
    use std::time::Duration;

    fn arbiter() -> CaptureArbiter {
        CaptureArbiter::new(Arc::new(MockCamera::new(8, 8)))
    }

    #[tokio::test]
    async fn preview_is_refused_while_camera_is_held() {
        let arbiter = arbiter();
        let lease = arbiter.acquire().await;
        assert!(arbiter.is_busy());

        let err = arbiter.try_acquire_preview(StopSignal::new()).err();
        assert!(matches!(err, Some(ScopeError::CameraBusy(_))));

        drop(lease);
        assert!(!arbiter.is_busy());
        let preview = arbiter.try_acquire_preview(StopSignal::new()).unwrap();
        assert_eq!(preview.owner(), CaptureOwner::Preview);
    }

    #[tokio::test]
    async fn scheduled_capture_stops_preview_and_waits_for_release() {
        let arbiter = Arc::new(arbiter());
        let stop = StopSignal::new();
        let preview = arbiter.try_acquire_preview(stop.clone()).unwrap();

        let contender = arbiter.clone();
        let waiter = tokio::spawn(async move { contender.acquire().await.owner() });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(stop.is_stopped());
        assert!(!waiter.is_finished());

        drop(preview);
        assert_eq!(waiter.await.unwrap(), CaptureOwner::Exclusive);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scheduled_capture_is_not_held_up_by_a_racing_preview() {
        let arbiter = Arc::new(arbiter());
        for _ in 0..200 {
            let contender = arbiter.clone();
            let exclusive = tokio::spawn(async move { contender.acquire().await.owner() });
            let racer = arbiter.clone();
            let preview = tokio::spawn(async move {
                let stop = StopSignal::new();
                if let Ok(lease) = racer.try_acquire_preview(stop.clone()) {
                    stop.sleep(Duration::from_secs(3600)).await;
                    drop(lease);
                }
            });

            let owner = tokio::time::timeout(Duration::from_secs(5), exclusive)
                .await
                .expect("scheduled capture waited on the preview")
                .unwrap();
            assert_eq!(owner, CaptureOwner::Exclusive);

            // A preview that started after the exclusive lease was released
            // is stopped by the next scheduled capture.
            drop(arbiter.acquire().await);
            preview.await.unwrap();
        }
    }

    #[tokio::test]
    async fn lease_forwards_camera_controls() {
        let arbiter = arbiter();
        let lease = arbiter.acquire().await;
        lease.set_controls(Some(20_000), Some(4.0)).await.unwrap();
        assert_eq!(lease.exposure_us(), 20_000);
        assert_eq!(lease.gain(), 4.0);
        assert_eq!(lease.capture().await.unwrap().width, 8);
    }
}
