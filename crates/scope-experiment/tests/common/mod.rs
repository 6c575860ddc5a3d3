//! Simulated microscope shared by the integration tests.

#![allow(dead_code)]

use scope_core::{Camera, Position};
use scope_driver_marlin::{GcodeStage, GcodeTransport, StageConfig};
use scope_driver_mock::{MockCamera, MockMarlin, RecordingStrip};
use scope_driver_neopixel::{LightBus, LightZone, ZoneConfig};
use scope_experiment::{AcquisitionEngine, AcquisitionTiming, CaptureArbiter, Microscope};
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub engine: Arc<AcquisitionEngine>,
    pub marlin: MockMarlin,
    pub strip: RecordingStrip,
    pub brightfield: LightZone,
    pub fluorescence: LightZone,
    pub arbiter: Arc<CaptureArbiter>,
}

pub async fn stage(start: Position) -> (Arc<GcodeStage>, MockMarlin) {
    let (marlin, link) = MockMarlin::builder().start_position(start).spawn();
    let transport = GcodeTransport::new(Box::new(link), Duration::from_secs(1));
    let stage = GcodeStage::connect(transport, StageConfig::default())
        .await
        .unwrap();
    (Arc::new(stage), marlin)
}

pub async fn rig(camera: impl Camera + 'static, timing: AcquisitionTiming) -> Rig {
    let (stage, marlin) = stage(Position::ORIGIN).await;
    let strip = RecordingStrip::new();
    let bus = LightBus::new(strip.clone());
    let brightfield = bus
        .add_zone(&ZoneConfig::new("brightfield", 0, 4, 8))
        .unwrap();
    let fluorescence = bus
        .add_zone(&ZoneConfig::new("fluorescence", 4, 8, 8))
        .unwrap();
    let arbiter = Arc::new(CaptureArbiter::new(Arc::new(camera)));

    let scope = Microscope {
        stage,
        arbiter: arbiter.clone(),
        brightfield: Arc::new(brightfield.clone()),
        fluorescence: Arc::new(fluorescence.clone()),
    };
    Rig {
        engine: Arc::new(AcquisitionEngine::new(scope).with_timing(timing)),
        marlin,
        strip,
        brightfield,
        fluorescence,
        arbiter,
    }
}

pub fn no_settle() -> AcquisitionTiming {
    AcquisitionTiming {
        light_settle_ms: 0,
        capture_margin_ms: 0,
        slice_settle_ms: 0,
    }
}

pub fn fast_camera() -> MockCamera {
    MockCamera::builder(8, 8).exposure_us(1_000).build()
}
