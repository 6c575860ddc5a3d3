//! AcquisitionEngine - executes acquisition plans on the microscope.
//!
//! A run is a nested loop:
//!
//! ```text
//! timelapse frame
//! └── saved position (absolute move)
//!     └── mosaic cell (serpentine raster, relative moves)
//!         ├── autofocus (optional)
//!         ├── fluorescence capture
//!         └── brightfield capture
//! ```
//!
//! The z-stack is a separate entry point ([`AcquisitionEngine::run_zstack`]).
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()   ┌─────────┐  abort()  ┌──────────┐
//! │ Idle │─────────▶│ Running │──────────▶│ Aborting │
//! └──────┘          └────┬────┘           └────┬─────┘
//!    ▲                   │ finished            │ cell boundary
//!    └───────────────────┴─────────────────────┘
//! ```
//!
//! The camera lease is held for the whole run, so a live preview is stopped
//! at start and refused until the run ends. Abort is checked between cells
//! and during the timelapse interval; a cell that has started always
//! completes its capture sequence. On abort or on any error every light is
//! switched off, `RunAborted` is emitted and the error is returned. A run
//! future dropped before it finishes (task aborted, panic) does the same
//! cleanup when it is dropped.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = AcquisitionEngine::new(microscope);
//! let mut events = engine.subscribe();
//! let report = engine.run(&plan, "run/sample").await?;
//! ```

use crate::autofocus::{autofocus, AutofocusSettings, FocusResult};
use crate::capture::{CaptureArbiter, CaptureLease};
use crate::mosaic::{MosaicCell, MosaicRaster};
use crate::naming::{zstack_slice_path, ImageName};
use crate::plan::{AcquisitionPlan, ZStackSettings};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use scope_core::{Camera, Illuminator, Position, ScopeError, ScopeResult, Stage, StopSignal};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

const EVENT_CAPACITY: usize = 256;

/// The device set an engine drives.
#[derive(Clone)]
pub struct Microscope {
    /// XYZ stage.
    pub stage: Arc<dyn Stage>,
    /// Camera owner.
    pub arbiter: Arc<CaptureArbiter>,
    /// Transmitted-light zone.
    pub brightfield: Arc<dyn Illuminator>,
    /// Excitation zone.
    pub fluorescence: Arc<dyn Illuminator>,
}

/// Settle delays, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionTiming {
    /// Wait after every light change.
    pub light_settle_ms: u64,
    /// Added to the exposure time after each capture.
    pub capture_margin_ms: u64,
    /// Wait after each z-stack move.
    pub slice_settle_ms: u64,
}

impl Default for AcquisitionTiming {
    fn default() -> Self {
        Self {
            light_settle_ms: 200,
            capture_margin_ms: 100,
            slice_settle_ms: 100,
        }
    }
}

impl AcquisitionTiming {
    fn light_settle(&self) -> Duration {
        Duration::from_millis(self.light_settle_ms)
    }

    fn slice_settle(&self) -> Duration {
        Duration::from_millis(self.slice_settle_ms)
    }

    /// Exposure-proportional wait after a capture.
    fn after_capture(&self, exposure_us: u32) -> Duration {
        Duration::from_micros(u64::from(exposure_us)) + Duration::from_millis(self.capture_margin_ms)
    }
}

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run in progress
    Idle,
    /// Executing a run
    Running,
    /// Abort requested, finishing the current cell
    Aborting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Progress notifications broadcast during a run.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// A run began.
    RunStarted {
        /// Run identifier.
        run_uid: String,
        /// Total cell visits planned (zero for z-stacks).
        planned_cells: usize,
        /// Start time.
        time: DateTime<Utc>,
    },
    /// The stage arrived at a mosaic cell.
    CellStarted {
        /// Run identifier.
        run_uid: String,
        /// The cell.
        visit: CellVisit,
    },
    /// An image file was written.
    ImageSaved {
        /// Run identifier.
        run_uid: String,
        /// Channel label, or `z` for z-stack slices.
        channel: String,
        /// File path.
        path: PathBuf,
    },
    /// A timelapse frame finished.
    FrameCompleted {
        /// Run identifier.
        run_uid: String,
        /// Frame index.
        frame: u32,
    },
    /// The run completed.
    RunFinished {
        /// Run identifier.
        run_uid: String,
        /// Images written.
        images: usize,
        /// End time.
        time: DateTime<Utc>,
    },
    /// The run stopped early.
    RunAborted {
        /// Run identifier.
        run_uid: String,
        /// Error or abort reason.
        reason: String,
        /// End time.
        time: DateTime<Utc>,
    },
}

/// One mosaic cell visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellVisit {
    /// Timelapse frame.
    pub frame: u32,
    /// Saved position index, `None` when imaging at the start location.
    pub position: Option<usize>,
    /// Cell index within the mosaic.
    pub index: u32,
    /// Mosaic row.
    pub row: u32,
    /// Column label used in file names.
    pub column_label: u32,
}

/// What a completed run produced.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionReport {
    /// Run identifier.
    pub run_uid: String,
    /// Cells in visit order.
    pub visits: Vec<CellVisit>,
    /// Files in write order.
    pub images: Vec<PathBuf>,
}

/// Executes acquisition plans against a [`Microscope`].
pub struct AcquisitionEngine {
    scope: Microscope,
    timing: AcquisitionTiming,
    autofocus: AutofocusSettings,
    state: RwLock<EngineState>,
    stop: Mutex<StopSignal>,
    events: broadcast::Sender<AcquisitionEvent>,
}

impl AcquisitionEngine {
    /// Engine with default timing and autofocus settings.
    pub fn new(scope: Microscope) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scope,
            timing: AcquisitionTiming::default(),
            autofocus: AutofocusSettings::default(),
            state: RwLock::new(EngineState::Idle),
            stop: Mutex::new(StopSignal::new()),
            events,
        }
    }

    /// Replace the settle delays.
    pub fn with_timing(mut self, timing: AcquisitionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Replace the autofocus parameters.
    pub fn with_autofocus(mut self, settings: AutofocusSettings) -> Self {
        self.autofocus = settings;
        self
    }

    /// The driven device set.
    pub fn microscope(&self) -> &Microscope {
        &self.scope
    }

    /// Subscribe to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Ask the running plan to stop at the next cell boundary.
    pub fn abort(&self) -> ScopeResult<()> {
        let mut state = self.state.write();
        match *state {
            EngineState::Running => {
                info!("Abort requested");
                *state = EngineState::Aborting;
                self.stop.lock().stop();
                Ok(())
            }
            other => Err(ScopeError::InvalidInput(format!(
                "cannot abort: engine is {other}"
            ))),
        }
    }

    // =========================================================================
    // Positions
    // =========================================================================

    /// Append the device-reported stage position to `plan`.
    pub async fn save_position(
        &self,
        plan: &mut AcquisitionPlan,
        name: impl Into<String>,
    ) -> ScopeResult<usize> {
        let here = self.scope.stage.reconcile().await?;
        let name = name.into();
        info!(%name, x = here.x, y = here.y, z = here.z, "Saved position");
        Ok(plan.add_position(name, here))
    }

    /// Move to saved position `index`.
    pub async fn go_to_position(&self, plan: &AcquisitionPlan, index: usize) -> ScopeResult<()> {
        let saved = plan.position(index)?;
        debug!(name = %saved.name, "Moving to saved position");
        self.scope.stage.move_to(saved.position).await
    }

    // =========================================================================
    // Single operations
    // =========================================================================

    /// Autofocus at the current location with brightfield on.
    pub async fn autofocus_here(&self) -> ScopeResult<FocusResult> {
        let lease = self.scope.arbiter.acquire().await;
        self.scope.brightfield.set_on(true)?;
        autofocus(self.scope.stage.as_ref(), &lease, &self.autofocus).await
    }

    /// Capture one frame to `path`.
    pub async fn snapshot(&self, path: &Path) -> ScopeResult<PathBuf> {
        let lease = self.scope.arbiter.acquire().await;
        let written = lease.capture_to(path).await?;
        info!(path = ?written, "Snapshot saved");
        Ok(written)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Execute `plan`, writing images under `prefix`.
    #[instrument(skip(self, plan), fields(prefix = %prefix))]
    pub async fn run(&self, plan: &AcquisitionPlan, prefix: &str) -> ScopeResult<AcquisitionReport> {
        plan.validate()?;
        let (stop, guard) = self.begin()?;
        let run_uid = guard.run_uid.clone();
        let positions = plan.positions.len().max(1);
        self.emit(AcquisitionEvent::RunStarted {
            run_uid: run_uid.clone(),
            planned_cells: (plan.timelapse.frame_count as usize)
                .saturating_mul(positions)
                .saturating_mul(plan.mosaic.cell_count() as usize),
            time: Utc::now(),
        });
        info!(%run_uid, frames = plan.timelapse.frame_count, positions, "Acquisition started");

        let lease = self.scope.arbiter.acquire().await;
        let mut report = AcquisitionReport {
            run_uid: run_uid.clone(),
            ..Default::default()
        };
        let result = self
            .execute(plan, prefix, &lease, &stop, &mut report)
            .await;
        drop(lease);
        self.finish(guard, result.map(|()| report))
    }

    /// Capture a z-stack centred on the current plane.
    ///
    /// The stage moves up by the top offset, then each slice steps down by
    /// `step_mm`, settles and is written to `<prefix>_<slice>.tif`. Lights
    /// are left as they are.
    #[instrument(skip(self, settings), fields(slices = settings.slice_count, prefix = %prefix))]
    pub async fn run_zstack(
        &self,
        settings: &ZStackSettings,
        prefix: &str,
    ) -> ScopeResult<AcquisitionReport> {
        if settings.slice_count == 0 || !settings.step_mm.is_finite() {
            return Err(ScopeError::InvalidInput(format!(
                "z-stack needs at least one slice and a finite step, got {} x {}",
                settings.slice_count, settings.step_mm
            )));
        }
        let (stop, guard) = self.begin()?;
        let run_uid = guard.run_uid.clone();
        self.emit(AcquisitionEvent::RunStarted {
            run_uid: run_uid.clone(),
            planned_cells: 0,
            time: Utc::now(),
        });

        let lease = self.scope.arbiter.acquire().await;
        let mut report = AcquisitionReport {
            run_uid: run_uid.clone(),
            ..Default::default()
        };
        let result = self
            .execute_zstack(settings, prefix, &lease, &stop, &mut report)
            .await;
        drop(lease);
        self.finish(guard, result.map(|()| report))
    }

    fn begin(&self) -> ScopeResult<(StopSignal, RunGuard<'_>)> {
        let mut state = self.state.write();
        if *state != EngineState::Idle {
            return Err(ScopeError::InvalidInput(format!(
                "cannot start: engine is {}",
                *state
            )));
        }
        *state = EngineState::Running;
        let signal = StopSignal::new();
        *self.stop.lock() = signal.clone();
        let guard = RunGuard {
            engine: self,
            run_uid: uuid::Uuid::new_v4().to_string(),
            armed: true,
        };
        Ok((signal, guard))
    }

    fn finish(
        &self,
        guard: RunGuard<'_>,
        result: ScopeResult<AcquisitionReport>,
    ) -> ScopeResult<AcquisitionReport> {
        let run_uid = guard.disarm();
        let run_uid = run_uid.as_str();
        match &result {
            Ok(report) => {
                info!(%run_uid, images = report.images.len(), "Acquisition finished");
                self.emit(AcquisitionEvent::RunFinished {
                    run_uid: run_uid.to_string(),
                    images: report.images.len(),
                    time: Utc::now(),
                });
            }
            Err(e) => {
                self.lights_off();
                match e {
                    ScopeError::Cancelled => warn!(%run_uid, "Acquisition aborted"),
                    other => error!(%run_uid, error = %other, "Acquisition failed"),
                }
                self.emit(AcquisitionEvent::RunAborted {
                    run_uid: run_uid.to_string(),
                    reason: e.to_string(),
                    time: Utc::now(),
                });
            }
        }
        *self.state.write() = EngineState::Idle;
        result
    }

    async fn execute(
        &self,
        plan: &AcquisitionPlan,
        prefix: &str,
        camera: &CaptureLease,
        stop: &StopSignal,
        report: &mut AcquisitionReport,
    ) -> ScopeResult<()> {
        let channels = &plan.channels;
        let scope = &self.scope;
        let interval = plan.timelapse.interval()?;
        scope.fluorescence.set_rgb_color(channels.fluorescence_color)?;
        scope.fluorescence.set_intensity(1.0)?;
        scope.brightfield.set_rgb_color(channels.brightfield_color)?;
        scope.brightfield.set_intensity(1.0)?;
        scope.brightfield.set_on(true)?;

        let start = if plan.positions.is_empty() {
            Some(scope.stage.reconcile().await?)
        } else {
            None
        };
        let label_positions = plan.positions.len() > 1;

        for frame in 0..plan.timelapse.frame_count {
            let stops: Vec<(Option<usize>, Position)> = match start {
                Some(here) => vec![(None, here)],
                None => plan
                    .positions
                    .iter()
                    .enumerate()
                    .map(|(k, saved)| (Some(k), saved.position))
                    .collect(),
            };

            for (k, position) in stops {
                scope.stage.move_to(position).await?;
                for cell in MosaicRaster::new(&plan.mosaic) {
                    if stop.is_stopped() {
                        return Err(ScopeError::Cancelled);
                    }
                    let visit = CellVisit {
                        frame,
                        position: k,
                        index: cell.index,
                        row: cell.row,
                        column_label: cell.column_label,
                    };
                    let name_position = if label_positions { k } else { None };
                    self.visit_cell(plan, prefix, camera, &cell, visit, name_position, report)
                        .await?;
                }
            }

            self.emit(AcquisitionEvent::FrameCompleted {
                run_uid: report.run_uid.clone(),
                frame,
            });
            if frame + 1 < plan.timelapse.frame_count {
                debug!(frame, ?interval, "Waiting for next timelapse frame");
                if !stop.sleep(interval).await {
                    return Err(ScopeError::Cancelled);
                }
            }
            scope.brightfield.set_on(false)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn visit_cell(
        &self,
        plan: &AcquisitionPlan,
        prefix: &str,
        camera: &CaptureLease,
        cell: &MosaicCell,
        visit: CellVisit,
        name_position: Option<usize>,
        report: &mut AcquisitionReport,
    ) -> ScopeResult<()> {
        let scope = &self.scope;
        let channels = &plan.channels;
        let settle = self.timing.light_settle();

        scope.stage.move_relative(cell.dx, cell.dy, None).await?;
        debug!(row = visit.row, column = visit.column_label, "Cell reached");
        report.visits.push(visit);
        self.emit(AcquisitionEvent::CellStarted {
            run_uid: report.run_uid.clone(),
            visit,
        });

        if plan.autofocus {
            scope.brightfield.set_on(true)?;
            autofocus(scope.stage.as_ref(), camera, &self.autofocus).await?;
        }

        scope.brightfield.set_on(false)?;
        sleep(settle).await;
        scope.fluorescence.set_on(true)?;
        sleep(settle).await;
        let path = image_path(prefix, camera, &visit, name_position, &channels.fluorescence_label);
        self.capture(camera, &channels.fluorescence_label, path, report)
            .await?;
        sleep(self.timing.after_capture(camera.exposure_us())).await;
        scope.fluorescence.set_on(false)?;
        sleep(settle).await;

        scope
            .brightfield
            .set_intensity(channels.brightfield_capture_intensity)?;
        scope.brightfield.set_on(true)?;
        sleep(settle).await;
        let path = image_path(prefix, camera, &visit, name_position, &channels.brightfield_label);
        self.capture(camera, &channels.brightfield_label, path, report)
            .await?;
        sleep(self.timing.after_capture(camera.exposure_us())).await;
        scope
            .brightfield
            .set_intensity(channels.brightfield_restore_intensity)?;
        Ok(())
    }

    async fn execute_zstack(
        &self,
        settings: &ZStackSettings,
        prefix: &str,
        camera: &CaptureLease,
        stop: &StopSignal,
        report: &mut AcquisitionReport,
    ) -> ScopeResult<()> {
        let stage = &self.scope.stage;
        stage
            .move_relative(0.0, 0.0, Some(settings.top_offset()))
            .await?;
        for slice in 0..settings.slice_count {
            if stop.is_stopped() {
                return Err(ScopeError::Cancelled);
            }
            stage
                .move_relative(0.0, 0.0, Some(-settings.step_mm))
                .await?;
            sleep(self.timing.slice_settle()).await;
            self.capture(camera, "z", zstack_slice_path(prefix, slice), report)
                .await?;
            sleep(self.timing.after_capture(camera.exposure_us())).await;
        }
        Ok(())
    }

    async fn capture(
        &self,
        camera: &CaptureLease,
        channel: &str,
        path: PathBuf,
        report: &mut AcquisitionReport,
    ) -> ScopeResult<()> {
        let written = camera.capture_to(&path).await?;
        debug!(%channel, path = ?written, "Image saved");
        self.emit(AcquisitionEvent::ImageSaved {
            run_uid: report.run_uid.clone(),
            channel: channel.to_string(),
            path: written.clone(),
        });
        report.images.push(written);
        Ok(())
    }

    fn lights_off(&self) {
        for light in [&self.scope.fluorescence, &self.scope.brightfield] {
            if let Err(e) = light.set_on(false) {
                error!(light = light.name(), error = %e, "Failed to switch light off");
            }
        }
    }

    fn emit(&self, event: AcquisitionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Puts the engine back to idle with the lights off when a run is dropped
/// before [`AcquisitionEngine::finish`] sees its result.
struct RunGuard<'a> {
    engine: &'a AcquisitionEngine,
    run_uid: String,
    armed: bool,
}

impl RunGuard<'_> {
    fn disarm(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.run_uid)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let engine = self.engine;
        engine.lights_off();
        warn!(run_uid = %self.run_uid, "Acquisition dropped before completion");
        engine.emit(AcquisitionEvent::RunAborted {
            run_uid: self.run_uid.clone(),
            reason: "run dropped before completion".to_string(),
            time: Utc::now(),
        });
        *engine.state.write() = EngineState::Idle;
    }
}

fn image_path(
    prefix: &str,
    camera: &dyn Camera,
    visit: &CellVisit,
    position: Option<usize>,
    channel: &str,
) -> PathBuf {
    ImageName {
        prefix,
        timepoint: visit.frame,
        channel,
        exposure_us: camera.exposure_us(),
        gain: camera.gain(),
        column: visit.column_label,
        row: visit.row,
        position,
    }
    .to_path()
}
