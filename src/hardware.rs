//! Device assembly from settings.
//!
//! The stage is the printer's Marlin controller on `serial.port`, or the
//! simulated firmware when `simulate` is set. No camera or LED-strip driver
//! ships with this workspace, so the synthetic camera and the recording strip
//! stand in for them; in simulation the camera's contrast follows the
//! simulated z axis so autofocus has something to find. Commands that need
//! the camera or the lights are therefore refused against a real stage (see
//! [`check_peripherals`]).

use crate::config::Settings;
use anyhow::{bail, Context, Result};
use scope_core::Camera;
use scope_driver_marlin::{GcodeStage, GcodeTransport};
use scope_driver_mock::{FocusModel, MockCamera, MockMarlin, RecordingStrip};
use scope_driver_neopixel::{LightBus, LightZone};
use scope_experiment::{AcquisitionEngine, CaptureArbiter, Microscope};
use std::sync::Arc;
use tracing::{info, warn};

/// Z position where the simulated sample is in focus, in millimeters.
pub const SIMULATED_FOCUS_Z: f64 = 0.2;

/// Everything the CLI drives.
pub struct Hardware {
    /// Stage controller.
    pub stage: Arc<GcodeStage>,
    /// Acquisition engine over the assembled microscope.
    pub engine: AcquisitionEngine,
    /// Light bus owning the strip buffer.
    pub lights: LightBus,
    /// Transmitted-light zone.
    pub brightfield: LightZone,
    /// Excitation zone.
    pub fluorescence: LightZone,
    /// Simulated firmware, when running with `simulate`.
    pub simulator: Option<MockMarlin>,
}

impl Hardware {
    /// Open the stage and assemble the microscope.
    pub async fn connect(settings: &Settings, simulate: bool) -> Result<Self> {
        let (transport, simulator) = if simulate {
            let (marlin, link) = MockMarlin::spawn();
            info!("Using simulated Marlin firmware");
            (
                GcodeTransport::new(Box::new(link), settings.serial.timeout()),
                Some(marlin),
            )
        } else {
            let transport = GcodeTransport::open(
                &settings.serial.port,
                settings.serial.baud_rate,
                settings.serial.timeout(),
            )
            .await
            .with_context(|| format!("Failed to open stage on {}", settings.serial.port))?;
            (transport, None)
        };
        let stage = Arc::new(
            GcodeStage::connect(transport, settings.stage_config())
                .await
                .context("Stage did not accept the initial mode command")?,
        );

        if simulator.is_none() {
            warn!(
                "No camera or LED-strip driver attached: frames are synthetic and lights only \
                 update an in-memory strip"
            );
        }
        let camera = build_camera(settings, simulator.as_ref());
        camera
            .set_controls(Some(settings.camera.exposure_us), Some(settings.camera.gain))
            .await?;

        let lights = LightBus::new(RecordingStrip::new());
        let light_settings = &settings.lights;
        let brightfield = lights
            .add_zone(&light_settings.zone_config("brightfield", &light_settings.brightfield))?;
        let fluorescence = lights
            .add_zone(&light_settings.zone_config("fluorescence", &light_settings.fluorescence))?;

        let scope = Microscope {
            stage: stage.clone(),
            arbiter: Arc::new(CaptureArbiter::new(camera)),
            brightfield: Arc::new(brightfield.clone()),
            fluorescence: Arc::new(fluorescence.clone()),
        };
        let engine = AcquisitionEngine::new(scope)
            .with_timing(settings.timing.clone())
            .with_autofocus(settings.autofocus.clone());

        info!(
            simulate,
            pixels = light_settings.total_pixels,
            "Microscope assembled"
        );
        Ok(Self {
            stage,
            engine,
            lights,
            brightfield,
            fluorescence,
            simulator,
        })
    }

    /// Zone by configured name.
    pub fn zone(&self, name: &str) -> Option<&LightZone> {
        match name {
            "brightfield" | "bf" => Some(&self.brightfield),
            "fluorescence" | "gfp" => Some(&self.fluorescence),
            _ => None,
        }
    }
}

/// Refuse `command` when it needs the camera or the lights and the stage is
/// real, since those peripherals are only simulated.
pub fn check_peripherals(command: &str, simulate: bool) -> Result<()> {
    if !simulate {
        bail!(
            "'{command}' needs the camera or the lights, which are only available \
             with --simulate"
        );
    }
    Ok(())
}

fn build_camera(settings: &Settings, simulator: Option<&MockMarlin>) -> Arc<dyn Camera> {
    let mut builder = MockCamera::builder(settings.camera.width, settings.camera.height);
    if let Some(marlin) = simulator {
        let probe = marlin.clone();
        builder = builder.focus_model(FocusModel::valley(
            move || probe.position().z,
            SIMULATED_FOCUS_Z,
            0.5,
        ));
    }
    Arc::new(builder.build())
}
