//! End-to-end runs of the acquisition engine on simulated hardware.

mod common;

use common::{fast_camera, no_settle, rig};
use scope_core::{Illuminator, Position, Rgb, ScopeError};
use scope_driver_mock::MockCamera;
use scope_experiment::{
    start_preview, AcquisitionEvent, AcquisitionPlan, AcquisitionTiming, EngineState,
    PreviewConfig, ZStackSettings,
};
use std::path::PathBuf;
use std::time::Duration;

fn mosaic_plan(rows: u32, columns: u32) -> AcquisitionPlan {
    let mut plan = AcquisitionPlan::default();
    plan.add_position("well", Position::new(10.0, 20.0, 1.0));
    plan.set_mosaic(rows, columns);
    plan
}

#[tokio::test]
async fn two_by_two_mosaic_visits_serpentine_and_names_both_channels() {
    let rig = rig(fast_camera(), no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("sample");
    let prefix = prefix.to_str().unwrap();
    let mut events = rig.engine.subscribe();

    let report = rig.engine.run(&mosaic_plan(2, 2), prefix).await.unwrap();

    let cells: Vec<(u32, u32)> = report
        .visits
        .iter()
        .map(|v| (v.row, v.column_label))
        .collect();
    assert_eq!(cells, vec![(0, 0), (0, 1), (1, 2), (1, 1)]);

    let names: Vec<String> = report
        .images
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let mut expected = Vec::new();
    for (row, col) in cells {
        for channel in ["GFP", "BF"] {
            expected.push(format!(
                "sample_0h00_{channel}_exp-0.001s_gain1_mosa_x{col}_y{row}.tif"
            ));
        }
    }
    assert_eq!(names, expected);
    assert!(report.images.iter().all(|p| p.exists()));

    assert_eq!(
        rig.marlin.commands(),
        vec![
            "G91",
            "G90",
            "G0 X 10 Y 20 Z 1",
            "G91",
            "G0 X 1.5 Y 1.5",
            "G0 X 1.5 Y 0",
            "G0 X -1.5 Y 1.5",
            "G0 X -1.5 Y 0",
        ]
    );
    assert_eq!(rig.marlin.position(), Position::new(10.0, 23.0, 1.0));

    // Every light is off afterwards, brightfield back at full intensity.
    assert!(!rig.brightfield.is_on());
    assert!(!rig.fluorescence.is_on());
    assert_eq!(rig.brightfield.intensity(), 1.0);
    assert_eq!(rig.fluorescence.color(), Rgb::BLUE);
    assert_eq!(rig.strip.last().unwrap(), vec![Rgb::OFF; 8]);
    assert_eq!(rig.engine.state(), EngineState::Idle);

    assert!(matches!(
        events.recv().await.unwrap(),
        AcquisitionEvent::RunStarted { planned_cells: 4, .. }
    ));
    let mut saved = 0;
    loop {
        match events.recv().await.unwrap() {
            AcquisitionEvent::ImageSaved { .. } => saved += 1,
            AcquisitionEvent::RunFinished { images, .. } => {
                assert_eq!(images, 8);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(saved, 8);
}

#[tokio::test]
async fn fluorescence_is_lit_alone_during_its_capture() {
    let rig = rig(fast_camera(), no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("one");

    rig.engine
        .run(&mosaic_plan(1, 1), prefix.to_str().unwrap())
        .await
        .unwrap();

    let half = Rgb::WHITE.scaled(0.5);
    let blue_only = [vec![Rgb::OFF; 4], vec![Rgb::BLUE; 4]].concat();
    let dim_bf = [vec![half; 4], vec![Rgb::OFF; 4]].concat();
    let pushes = rig.strip.pushes();
    let blue_at = pushes.iter().position(|p| *p == blue_only).unwrap();
    let dim_at = pushes.iter().position(|p| *p == dim_bf).unwrap();
    assert!(blue_at < dim_at);
}

#[tokio::test]
async fn several_positions_get_position_suffix_and_timelapse_repeats() {
    let rig = rig(fast_camera(), no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("tl");
    let mut plan = AcquisitionPlan::default();
    plan.add_position("a", Position::new(1.0, 1.0, 0.5));
    plan.add_position("b", Position::new(5.0, 1.0, 0.5));
    plan.set_timelapse(2, 0.01);

    let report = rig
        .engine
        .run(&plan, prefix.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(report.visits.len(), 4);
    assert_eq!(report.images.len(), 8);
    let frames: Vec<(u32, Option<usize>)> =
        report.visits.iter().map(|v| (v.frame, v.position)).collect();
    assert_eq!(
        frames,
        vec![(0, Some(0)), (0, Some(1)), (1, Some(0)), (1, Some(1))]
    );
    assert!(report.images[7]
        .to_string_lossy()
        .ends_with("tl_1h00_BF_exp-0.001s_gain1_mosa_x0_y0_pos1.tif"));
}

#[tokio::test]
async fn empty_position_list_images_where_the_stage_is() {
    let rig = rig(fast_camera(), no_settle()).await;
    rig.marlin.set_position(Position::new(3.0, 4.0, 0.25));
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("here");
    let mut plan = AcquisitionPlan::default();
    plan.set_timelapse(2, 0.0);

    let report = rig
        .engine
        .run(&plan, prefix.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(report.visits.len(), 2);
    assert!(report.visits.iter().all(|v| v.position.is_none()));
    // Each frame returns to the start before stepping into the cell.
    assert_eq!(rig.marlin.position(), Position::new(4.5, 5.5, 0.25));
}

#[tokio::test]
async fn capture_failure_aborts_with_lights_off() {
    let camera = MockCamera::builder(8, 8)
        .exposure_us(1_000)
        .fail_at_capture(3)
        .build();
    let rig = rig(camera, no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("fail");
    let mut events = rig.engine.subscribe();

    let err = rig
        .engine
        .run(&mosaic_plan(2, 2), prefix.to_str().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ScopeError::Hardware(_)));
    assert!(!rig.brightfield.is_on());
    assert!(!rig.fluorescence.is_on());
    assert_eq!(rig.engine.state(), EngineState::Idle);
    assert!(!rig.arbiter.is_busy());

    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        if let AcquisitionEvent::RunAborted { reason, .. } = event {
            assert!(reason.contains("Hardware"));
            aborted = true;
        }
    }
    assert!(aborted);
}

#[tokio::test]
async fn abort_stops_at_a_cell_boundary() {
    let timing = AcquisitionTiming {
        light_settle_ms: 20,
        ..no_settle()
    };
    let rig = rig(fast_camera(), timing).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix: PathBuf = dir.path().join("abort");

    assert!(rig.engine.abort().is_err());

    let engine = rig.engine.clone();
    let plan = mosaic_plan(3, 3);
    let run = tokio::spawn(async move { engine.run(&plan, prefix.to_str().unwrap()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.engine.state(), EngineState::Running);
    rig.engine.abort().unwrap();
    assert_eq!(rig.engine.state(), EngineState::Aborting);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ScopeError::Cancelled));
    assert_eq!(rig.engine.state(), EngineState::Idle);
    assert!(!rig.brightfield.is_on());
    assert!(!rig.fluorescence.is_on());

    // Only whole cells were captured.
    let written = std::fs::read_dir(dir.path()).unwrap().count();
    assert!(written > 0 && written < 18);
    assert_eq!(written % 2, 0);
}

#[tokio::test]
async fn acquisition_stops_preview_and_refuses_new_one() {
    let timing = AcquisitionTiming {
        light_settle_ms: 20,
        ..no_settle()
    };
    let rig = rig(fast_camera(), timing).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("busy");

    let preview = start_preview(&rig.arbiter, PreviewConfig::default()).unwrap();
    let engine = rig.engine.clone();
    let plan = mosaic_plan(2, 2);
    let run = tokio::spawn(async move { engine.run(&plan, prefix.to_str().unwrap()).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!preview.is_running());
    assert!(matches!(
        start_preview(&rig.arbiter, PreviewConfig::default()).err(),
        Some(ScopeError::CameraBusy(_))
    ));

    run.await.unwrap().unwrap();
    assert!(preview.stop().await.unwrap() >= 1);
    assert!(start_preview(&rig.arbiter, PreviewConfig::default()).is_ok());
}

#[tokio::test]
async fn unrunnable_interval_is_rejected_before_anything_moves() {
    let rig = rig(fast_camera(), no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("never");
    let mut plan = mosaic_plan(1, 1);
    plan.set_timelapse(2, 1e20);

    let err = rig
        .engine
        .run(&plan, prefix.to_str().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ScopeError::InvalidInput(_)));
    assert_eq!(rig.engine.state(), EngineState::Idle);
    assert!(!rig.brightfield.is_on());
    assert_eq!(rig.marlin.commands(), vec!["G91"]);
    assert_eq!(rig.strip.push_count(), 0);
}

#[tokio::test]
async fn dropped_run_returns_to_idle_with_lights_off() {
    let rig = rig(fast_camera(), no_settle()).await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("dropped");
    let mut events = rig.engine.subscribe();
    let mut plan = mosaic_plan(1, 1);
    plan.set_timelapse(2, 3600.0);

    let engine = rig.engine.clone();
    let run = tokio::spawn(async move { engine.run(&plan, prefix.to_str().unwrap()).await });

    // The first frame is done and the run is waiting out the interval.
    loop {
        if let AcquisitionEvent::FrameCompleted { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(rig.engine.state(), EngineState::Running);
    assert!(rig.brightfield.is_on());

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    assert_eq!(rig.engine.state(), EngineState::Idle);
    assert!(!rig.brightfield.is_on());
    assert!(!rig.fluorescence.is_on());
    assert!(!rig.arbiter.is_busy());
    assert!(matches!(
        events.recv().await.unwrap(),
        AcquisitionEvent::RunAborted { .. }
    ));

    // The engine accepts the next run.
    let next = dir.path().join("next");
    rig.engine
        .run(&mosaic_plan(1, 1), next.to_str().unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn zstack_steps_down_from_top_offset() {
    let rig = rig(fast_camera(), no_settle()).await;
    rig.marlin.set_position(Position::new(0.0, 0.0, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("stack");
    let settings = ZStackSettings {
        slice_count: 5,
        step_mm: 0.1,
    };

    let report = rig
        .engine
        .run_zstack(&settings, prefix.to_str().unwrap())
        .await
        .unwrap();

    let mut expected = vec!["G91".to_string(), "G0 X 0 Y 0 Z 0.3".to_string()];
    expected.extend(std::iter::repeat("G0 X 0 Y 0 Z -0.1".to_string()).take(5));
    assert_eq!(rig.marlin.commands(), expected);

    let names: Vec<String> = report
        .images
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["stack_0.tif", "stack_1.tif", "stack_2.tif", "stack_3.tif", "stack_4.tif"]
    );
    assert!((rig.marlin.position().z - 0.8).abs() < 1e-9);
    // Lights are untouched by a z-stack.
    assert_eq!(rig.strip.push_count(), 0);
}

#[tokio::test]
async fn saved_positions_come_from_the_device() {
    let rig = rig(fast_camera(), no_settle()).await;
    rig.marlin.set_position(Position::new(7.0, 8.0, 0.5));
    let mut plan = AcquisitionPlan::default();

    let index = rig.engine.save_position(&mut plan, "dish").await.unwrap();
    assert_eq!(index, 0);
    assert_eq!(plan.positions[0].position, Position::new(7.0, 8.0, 0.5));

    rig.marlin.set_position(Position::ORIGIN);
    rig.engine.go_to_position(&plan, 0).await.unwrap();
    assert_eq!(rig.marlin.position(), Position::new(7.0, 8.0, 0.5));
    assert!(rig.engine.go_to_position(&plan, 3).await.is_err());
}
