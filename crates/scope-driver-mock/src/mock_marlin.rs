//! Simulated Marlin firmware behind an in-memory serial link.
//!
//! [`MockMarlin::spawn`] starts a firmware task on one end of a
//! `tokio::io::duplex` pair and hands back the other end, ready to be wrapped
//! by the G-code transport. The firmware understands the command set the
//! stage controller uses:
//!
//! | Command | Reply |
//! |---|---|
//! | `G90` / `G91` | `ok` |
//! | `G0`/`G1` `X <v> Y <v> [Z <v>]` | `ok` (position updated per mode) |
//! | `G28` | `echo:busy: processing`, position report, `ok` |
//! | `M400` | `ok` |
//! | `M114` | position report, `ok` |
//! | `M190 S<lo> R<hi>` | temperature report, `ok` |
//! | anything else | `echo:Unknown command: "<line>"`, `ok` |
//!
//! Like the real firmware it boots in absolute mode and reports positions
//! with two decimals.

use crate::common::MockMode;
use parking_lot::Mutex;
use scope_core::{CoordinateMode, Position};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing::{debug, trace};

/// Steps per millimeter used for the `Count` section of position reports.
const STEPS_PER_MM: (f64, f64, f64) = (80.0, 80.0, 400.0);

/// Fault to inject into the simulated firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum MarlinFault {
    /// Send this line instead of the `ok` that follows an `M114` report.
    BadPositionAck(String),
    /// Stop replying to anything (commands are still recorded).
    Silent,
}

#[derive(Debug)]
struct FirmwareState {
    position: Position,
    mode: CoordinateMode,
    commands: Vec<String>,
    fault: Option<MarlinFault>,
    bed_target: Option<i32>,
}

/// Builder for [`MockMarlin`].
#[derive(Debug, Clone)]
pub struct MockMarlinBuilder {
    mode: MockMode,
    start: Position,
    fault: Option<MarlinFault>,
    buffer_size: usize,
}

impl Default for MockMarlinBuilder {
    fn default() -> Self {
        Self {
            mode: MockMode::Instant,
            start: Position::ORIGIN,
            fault: None,
            buffer_size: 4096,
        }
    }
}

impl MockMarlinBuilder {
    /// Set operational mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Position the firmware believes it is at after boot.
    pub fn start_position(mut self, position: Position) -> Self {
        self.start = position;
        self
    }

    /// Inject a fault from the start.
    pub fn fault(mut self, fault: MarlinFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Spawn the firmware task. Must be called inside a tokio runtime.
    ///
    /// Returns the control handle and the host end of the serial link.
    pub fn spawn(self) -> (MockMarlin, DuplexStream) {
        let (host, device) = tokio::io::duplex(self.buffer_size);
        let state = Arc::new(Mutex::new(FirmwareState {
            position: self.start,
            mode: CoordinateMode::Absolute,
            commands: Vec::new(),
            fault: self.fault,
            bed_target: None,
        }));

        tokio::spawn(run_firmware(device, state.clone(), self.mode));
        (MockMarlin { state }, host)
    }
}

/// Control handle for a running simulated firmware.
///
/// Cloning the handle shares the same firmware.
#[derive(Debug, Clone)]
pub struct MockMarlin {
    state: Arc<Mutex<FirmwareState>>,
}

impl MockMarlin {
    /// Spawn a firmware with default settings.
    pub fn spawn() -> (Self, DuplexStream) {
        MockMarlinBuilder::default().spawn()
    }

    /// Create builder for advanced configuration.
    pub fn builder() -> MockMarlinBuilder {
        MockMarlinBuilder::default()
    }

    /// Every line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Forget recorded commands.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// True machine position.
    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    /// Move the machine behind the controller's back (missed steps, a bumped stage).
    pub fn set_position(&self, position: Position) {
        self.state.lock().position = position;
    }

    /// Current positioning mode.
    pub fn mode(&self) -> CoordinateMode {
        self.state.lock().mode
    }

    /// Last `M190` target, if any.
    pub fn bed_target(&self) -> Option<i32> {
        self.state.lock().bed_target
    }

    /// Replace (or clear) the injected fault.
    pub fn set_fault(&self, fault: Option<MarlinFault>) {
        self.state.lock().fault = fault;
    }
}

async fn run_firmware(stream: DuplexStream, state: Arc<Mutex<FirmwareState>>, mode: MockMode) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(raw)) = lines.next_line().await {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        trace!(command = %line, "Mock firmware received");

        let replies = {
            let mut state = state.lock();
            state.commands.push(line.to_string());
            state.respond(line)
        };

        let delay = mode.reply_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        for reply in replies {
            if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                return;
            }
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
    debug!("Mock firmware link closed");
}

fn ok() -> Vec<String> {
    vec!["ok".to_string()]
}

impl FirmwareState {
    fn respond(&mut self, line: &str) -> Vec<String> {
        if self.fault == Some(MarlinFault::Silent) {
            return Vec::new();
        }

        let mut words = line.split_whitespace();
        let code = words.next().unwrap_or_default();
        match code {
            "G90" => {
                self.mode = CoordinateMode::Absolute;
                ok()
            }
            "G91" => {
                self.mode = CoordinateMode::Relative;
                ok()
            }
            "G0" | "G1" => match parse_axis_words(words) {
                Ok(axes) => {
                    self.apply_move(axes);
                    ok()
                }
                Err(reason) => vec![format!("echo:{reason}"), "ok".to_string()],
            },
            "G28" => {
                self.position = Position::ORIGIN;
                vec![
                    "echo:busy: processing".to_string(),
                    self.position_report(),
                    "ok".to_string(),
                ]
            }
            "M400" => ok(),
            "M114" => {
                let trailer = match &self.fault {
                    Some(MarlinFault::BadPositionAck(line)) => line.clone(),
                    _ => "ok".to_string(),
                };
                vec![self.position_report(), trailer]
            }
            "M190" => {
                let target = words
                    .find_map(|w| w.strip_prefix('S'))
                    .and_then(|s| s.parse::<i32>().ok())
                    .map(|low| low + 1);
                self.bed_target = target;
                let t = target.unwrap_or(0);
                vec![
                    format!(" T:21.00 /0.00 B:{t}.00 /{t}.00 @:0 B@:0"),
                    "ok".to_string(),
                ]
            }
            _ => vec![
                format!("echo:Unknown command: \"{line}\""),
                "ok".to_string(),
            ],
        }
    }

    fn apply_move(&mut self, axes: [Option<f64>; 3]) {
        let [x, y, z] = axes;
        let p = self.position;
        self.position = match self.mode {
            CoordinateMode::Absolute => Position::new(
                x.unwrap_or(p.x),
                y.unwrap_or(p.y),
                z.unwrap_or(p.z),
            ),
            CoordinateMode::Relative => p.offset(x.unwrap_or(0.0), y.unwrap_or(0.0), z),
        };
    }

    fn position_report(&self) -> String {
        let p = self.position;
        format!(
            "X:{:.2} Y:{:.2} Z:{:.2} E:0.00 Count X:{} Y:{} Z:{}",
            p.x,
            p.y,
            p.z,
            (p.x * STEPS_PER_MM.0).round() as i64,
            (p.y * STEPS_PER_MM.1).round() as i64,
            (p.z * STEPS_PER_MM.2).round() as i64,
        )
    }
}

/// Parse `X 1.5 Y -2 Z 0.1` as well as the compact `X1.5 Y-2 Z0.1`.
fn parse_axis_words<'a>(
    words: impl Iterator<Item = &'a str>,
) -> Result<[Option<f64>; 3], String> {
    let mut axes = [None; 3];
    let mut words = words;

    while let Some(word) = words.next() {
        let axis_len = word.chars().next().map_or(0, char::len_utf8);
        let (axis, inline) = word.split_at(axis_len);
        let raw = if inline.is_empty() {
            words
                .next()
                .ok_or_else(|| format!("missing value for axis {axis}"))?
        } else {
            inline
        };
        let value: f64 = raw
            .parse()
            .map_err(|_| format!("bad value '{raw}' for axis {axis}"))?;
        let slot = match axis {
            "X" => 0,
            "Y" => 1,
            "Z" => 2,
            "E" | "F" => continue,
            other => return Err(format!("unknown axis '{other}'")),
        };
        axes[slot] = Some(value);
    }
    Ok(axes)
}
