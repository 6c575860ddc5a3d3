//! Three-axis stage controller on top of [`GcodeTransport`].
//!
//! # Position tracking
//!
//! Two positions are kept apart:
//!
//! - the **tracked** position, updated optimistically after each acknowledged
//!   move (addition for relative moves, replacement for absolute moves)
//! - the **device** position, only ever obtained with an explicit `M114`
//!   query
//!
//! [`GcodeStage::reconcile`] waits for the motion queue to drain (`M400`),
//! queries the device and overwrites the tracked estimate. Callers do this
//! before anything precision-dependent (autofocus, saving a position).
//!
//! # Coordinate mode
//!
//! The controller starts in relative mode (`G91` is sent on connect) and
//! remembers the last mode it sent. A mode command precedes a move only when
//! the mode changes, unless `always_resend_mode` is configured.
//!
//! After a timeout or a closed link the device mode is unknown and a late
//! `ok` may still be on its way. The remembered mode is dropped and pending
//! input is flushed before the next command, so the next move always re-sends
//! its mode command.

use crate::response::{parse_position_report, AxisReport};
use crate::transport::{GcodeTransport, ACK_PREFIX};
use async_trait::async_trait;
use scope_core::{CoordinateMode, Position, ScopeError, ScopeResult, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Homing G-code.
pub const HOME: &str = "G28";
/// Wait for all queued moves to finish.
pub const FINISH_MOVES: &str = "M400";
/// Report current position.
pub const REPORT_POSITION: &str = "M114";

/// Stage controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Send the mode command before every move, even when unchanged.
    pub always_resend_mode: bool,
    /// Silence timeout for slow commands (homing, `M400`, `M190`).
    #[serde(with = "duration_ms")]
    pub long_timeout: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            always_resend_mode: false,
            long_timeout: Duration::from_secs(120),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Manual jog direction, as on the control pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JogDirection {
    /// +Y
    North,
    /// -Y
    South,
    /// +X
    East,
    /// -X
    West,
    /// +Z
    Up,
    /// -Z
    Down,
}

impl JogDirection {
    /// Relative move for a jog of `step` millimeters.
    #[must_use]
    pub fn delta(self, step: f64) -> (f64, f64, Option<f64>) {
        match self {
            JogDirection::North => (0.0, step, None),
            JogDirection::South => (0.0, -step, None),
            JogDirection::East => (step, 0.0, None),
            JogDirection::West => (-step, 0.0, None),
            JogDirection::Up => (0.0, 0.0, Some(step)),
            JogDirection::Down => (0.0, 0.0, Some(-step)),
        }
    }

    /// Whether this direction moves the focus axis.
    #[must_use]
    pub fn is_vertical(self) -> bool {
        matches!(self, JogDirection::Up | JogDirection::Down)
    }
}

struct StageInner {
    transport: GcodeTransport,
    mode: Option<CoordinateMode>,
    tracked: Position,
    desynced: bool,
}

impl StageInner {
    async fn send(&mut self, code: &str, await_ack: bool) -> ScopeResult<String> {
        let timeout = self.transport.timeout();
        self.send_within(code, await_ack, timeout).await
    }

    async fn send_within(
        &mut self,
        code: &str,
        await_ack: bool,
        timeout: Duration,
    ) -> ScopeResult<String> {
        if self.desynced {
            let dropped = self.transport.flush_input_buffer().await;
            debug!(bytes = dropped, "Resynchronised serial link");
            self.desynced = false;
        }
        let result = self
            .transport
            .send_command_with_timeout(code, await_ack, timeout)
            .await;
        self.note_link_state(&result);
        result
    }

    async fn read_line(&mut self, command: &str) -> ScopeResult<String> {
        let result = self.transport.read_line(command).await;
        self.note_link_state(&result);
        result
    }

    fn note_link_state<T>(&mut self, result: &ScopeResult<T>) {
        if let Err(ScopeError::Timeout { .. } | ScopeError::Disconnected(_)) = result {
            if self.mode.take().is_some() {
                warn!("Device coordinate mode unknown after link failure");
            }
            self.desynced = true;
        }
    }
}

/// G-code stage controller.
///
/// Exclusively owns the transport, the last-sent coordinate mode and the
/// tracked position. All access goes through one async mutex, so a command
/// and its response are never interleaved with another caller's.
pub struct GcodeStage {
    inner: Mutex<StageInner>,
    config: StageConfig,
}

impl GcodeStage {
    /// Take ownership of a transport and put the device in relative mode.
    pub async fn connect(transport: GcodeTransport, config: StageConfig) -> ScopeResult<Self> {
        let stage = Self {
            inner: Mutex::new(StageInner {
                transport,
                mode: None,
                tracked: Position::ORIGIN,
                desynced: false,
            }),
            config,
        };

        {
            let mut inner = stage.inner.lock().await;
            stage.ensure_mode(&mut inner, CoordinateMode::Relative).await?;
        }
        info!("G-code stage connected in relative mode");
        Ok(stage)
    }

    /// Last coordinate mode sent to the device.
    pub async fn mode(&self) -> Option<CoordinateMode> {
        self.inner.lock().await.mode
    }

    /// Configuration in use.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    async fn ensure_mode(&self, inner: &mut StageInner, mode: CoordinateMode) -> ScopeResult<()> {
        if inner.mode == Some(mode) && !self.config.always_resend_mode {
            return Ok(());
        }
        // Unknown until the device acknowledges the new mode.
        let previous = inner.mode.take();
        inner.send(mode.gcode(), true).await?;
        if previous != Some(mode) {
            debug!(%mode, "Coordinate mode changed");
        }
        inner.mode = Some(mode);
        Ok(())
    }

    /// Send `M114` and return the raw token map.
    ///
    /// Stale input is flushed first. The data line is read without waiting
    /// for the ack, then the trailing `ok` is consumed; if that line is not an
    /// ack the report is rejected.
    #[instrument(skip(self), err)]
    pub async fn query_position_report(&self) -> ScopeResult<BTreeMap<String, f64>> {
        let mut inner = self.inner.lock().await;
        Self::query_locked(&mut inner)
            .await
            .map(|report| report.axes().clone())
    }

    async fn query_locked(inner: &mut StageInner) -> ScopeResult<AxisReport> {
        inner.transport.flush_input_buffer().await;
        inner.desynced = false;
        let data = inner.send(REPORT_POSITION, false).await?;
        let ack = inner.read_line(REPORT_POSITION).await?;
        if !ack.starts_with(ACK_PREFIX) {
            error!(response = %data, trailer = %ack, "Error reading stage position");
            return Err(ScopeError::Protocol(format!(
                "expected 'ok' after position report, got '{ack}'"
            )));
        }
        parse_position_report(&data).map_err(|e| {
            error!(response = %data, error = %e, "Malformed stage position report");
            e
        })
    }

    /// Block until the firmware's motion queue is empty (`M400`).
    #[instrument(skip(self), err)]
    pub async fn finish_moves(&self) -> ScopeResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .send_within(FINISH_MOVES, true, self.config.long_timeout)
            .await?;
        Ok(())
    }

    /// Heat the bed and hold until it is within one degree of `celsius`
    /// (`M190 S<t-1> R<t+1>`).
    #[instrument(skip(self), err)]
    pub async fn wait_for_bed_temperature(&self, celsius: i32) -> ScopeResult<()> {
        let code = bed_temperature_command(celsius);
        let mut inner = self.inner.lock().await;
        inner
            .send_within(&code, true, self.config.long_timeout)
            .await?;
        info!(celsius, "Bed temperature reached");
        Ok(())
    }

    /// Jog by `step` millimeters in `direction`.
    #[instrument(skip(self), err)]
    pub async fn jog(&self, direction: JogDirection, step: f64) -> ScopeResult<()> {
        let (dx, dy, dz) = direction.delta(step);
        self.move_relative(dx, dy, dz).await
    }
}

/// `M190` command holding the bed within ±1 °C of `celsius`.
#[must_use]
pub fn bed_temperature_command(celsius: i32) -> String {
    format!("M190 S{} R{}", celsius - 1, celsius + 1)
}

fn motion_command(x: f64, y: f64, z: Option<f64>) -> String {
    match z {
        Some(z) => format!("G0 X {x} Y {y} Z {z}"),
        None => format!("G0 X {x} Y {y}"),
    }
}

#[async_trait]
impl Stage for GcodeStage {
    #[instrument(skip(self), err)]
    async fn move_relative(&self, dx: f64, dy: f64, dz: Option<f64>) -> ScopeResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_mode(&mut inner, CoordinateMode::Relative).await?;
        inner.send(&motion_command(dx, dy, dz), true).await?;
        inner.tracked = inner.tracked.offset(dx, dy, dz);
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn move_absolute(&self, x: f64, y: f64, z: Option<f64>) -> ScopeResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_mode(&mut inner, CoordinateMode::Absolute).await?;
        inner.send(&motion_command(x, y, z), true).await?;
        let z = z.unwrap_or(inner.tracked.z);
        inner.tracked = Position::new(x, y, z);
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn home(&self) -> ScopeResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .send_within(HOME, true, self.config.long_timeout)
            .await?;
        inner.tracked = Position::ORIGIN;
        info!("Stage homed");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn query_position(&self) -> ScopeResult<Position> {
        let mut inner = self.inner.lock().await;
        Self::query_locked(&mut inner).await?.to_position()
    }

    async fn tracked_position(&self) -> Position {
        self.inner.lock().await.tracked
    }

    #[instrument(skip(self), err)]
    async fn reconcile(&self) -> ScopeResult<Position> {
        let mut inner = self.inner.lock().await;
        inner
            .send_within(FINISH_MOVES, true, self.config.long_timeout)
            .await?;
        let device = Self::query_locked(&mut inner).await?.to_position()?;
        if device != inner.tracked {
            debug!(tracked = %inner.tracked, %device, "Tracked position corrected");
        }
        inner.tracked = device;
        Ok(device)
    }
}
