//! Stage controller against the simulated Marlin firmware.

use scope_core::{CoordinateMode, Position, ScopeError, Stage};
use scope_driver_marlin::{GcodeStage, GcodeTransport, JogDirection, StageConfig};
use scope_driver_mock::{MarlinFault, MockMarlin};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

async fn connected(config: StageConfig) -> (GcodeStage, MockMarlin) {
    let (marlin, link) = MockMarlin::spawn();
    let transport = GcodeTransport::new(Box::new(link), Duration::from_secs(1));
    let stage = GcodeStage::connect(transport, config).await.unwrap();
    (stage, marlin)
}

#[tokio::test]
async fn connect_selects_relative_mode() {
    let (stage, marlin) = connected(StageConfig::default()).await;

    assert_eq!(marlin.commands(), vec!["G91"]);
    assert_eq!(marlin.mode(), CoordinateMode::Relative);
    assert_eq!(stage.mode().await, Some(CoordinateMode::Relative));
    assert_eq!(stage.tracked_position().await, Position::ORIGIN);
}

#[tokio::test]
async fn absolute_move_replaces_tracked_position() {
    let (stage, marlin) = connected(StageConfig::default()).await;

    stage.move_absolute(12.5, 7.0, Some(3.25)).await.unwrap();
    assert_eq!(stage.tracked_position().await, Position::new(12.5, 7.0, 3.25));

    stage.move_absolute(1.0, 2.0, None).await.unwrap();
    assert_eq!(stage.tracked_position().await, Position::new(1.0, 2.0, 3.25));

    assert_eq!(
        marlin.commands(),
        vec!["G91", "G90", "G0 X 12.5 Y 7 Z 3.25", "G0 X 1 Y 2"]
    );
    assert_eq!(marlin.position(), Position::new(1.0, 2.0, 3.25));
}

#[tokio::test]
async fn relative_moves_accumulate_until_home() {
    let (stage, marlin) = connected(StageConfig::default()).await;

    stage.move_relative(1.5, -0.5, None).await.unwrap();
    stage.move_relative(0.25, 1.0, Some(0.5)).await.unwrap();
    stage.move_relative(-1.0, 0.0, Some(-0.25)).await.unwrap();
    assert_eq!(stage.tracked_position().await, Position::new(0.75, 0.5, 0.25));

    // Mode was already relative, so no mode command precedes the moves.
    assert_eq!(marlin.commands().iter().filter(|c| *c == "G91").count(), 1);

    stage.home().await.unwrap();
    assert_eq!(stage.tracked_position().await, Position::ORIGIN);
    assert_eq!(marlin.position(), Position::ORIGIN);
}

#[tokio::test]
async fn always_resend_mode_repeats_mode_command() {
    let config = StageConfig {
        always_resend_mode: true,
        ..StageConfig::default()
    };
    let (stage, marlin) = connected(config).await;

    stage.move_relative(1.0, 0.0, None).await.unwrap();
    stage.move_relative(1.0, 0.0, None).await.unwrap();

    assert_eq!(
        marlin.commands(),
        vec!["G91", "G91", "G0 X 1 Y 0", "G91", "G0 X 1 Y 0"]
    );
}

#[tokio::test]
async fn query_leaves_tracked_position_alone() {
    let (stage, marlin) = connected(StageConfig::default()).await;
    stage.move_relative(2.0, 3.0, Some(1.0)).await.unwrap();
    marlin.set_position(Position::new(2.5, 3.0, 1.0));

    let device = stage.query_position().await.unwrap();
    assert_eq!(device, Position::new(2.5, 3.0, 1.0));
    assert_eq!(stage.tracked_position().await, Position::new(2.0, 3.0, 1.0));

    let report = stage.query_position_report().await.unwrap();
    assert_eq!(report.get("E"), Some(&0.0));
    assert_eq!(report.get("X"), Some(&2.5));
}

#[tokio::test]
async fn reconcile_drains_moves_then_overwrites_estimate() {
    let (stage, marlin) = connected(StageConfig::default()).await;
    stage.move_relative(1.0, 1.0, None).await.unwrap();
    marlin.set_position(Position::new(0.75, 1.0, 0.0));
    marlin.clear_commands();

    let device = stage.reconcile().await.unwrap();

    assert_eq!(device, Position::new(0.75, 1.0, 0.0));
    assert_eq!(stage.tracked_position().await, device);
    assert_eq!(marlin.commands(), vec!["M400", "M114"]);
}

#[tokio::test]
async fn missing_ack_after_report_is_a_protocol_error() {
    let (stage, marlin) = connected(StageConfig::default()).await;
    stage.move_absolute(4.0, 4.0, Some(1.0)).await.unwrap();
    marlin.set_fault(Some(MarlinFault::BadPositionAck("echo:busy".to_string())));

    let err = stage.query_position().await.unwrap_err();
    assert!(matches!(err, ScopeError::Protocol(_)));
    assert!(err.invalidates_position());

    let err = stage.reconcile().await.unwrap_err();
    assert!(matches!(err, ScopeError::Protocol(_)));
    assert_eq!(stage.tracked_position().await, Position::new(4.0, 4.0, 1.0));

    // The link recovers once the firmware behaves again.
    marlin.set_fault(None);
    assert_eq!(
        stage.query_position().await.unwrap(),
        Position::new(4.0, 4.0, 1.0)
    );
}

#[tokio::test(start_paused = true)]
async fn silent_firmware_times_out_instead_of_hanging() {
    let (stage, marlin) = connected(StageConfig::default()).await;
    marlin.set_fault(Some(MarlinFault::Silent));

    let err = stage.move_relative(1.0, 0.0, None).await.unwrap_err();
    match err {
        ScopeError::Timeout { command, waited } => {
            assert_eq!(command, "G0 X 1 Y 0");
            assert_eq!(waited, Duration::from_secs(1));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // Unacknowledged moves do not touch the estimate.
    assert_eq!(stage.tracked_position().await, Position::ORIGIN);
}

#[tokio::test]
async fn bed_temperature_and_jog() {
    let (stage, marlin) = connected(StageConfig::default()).await;

    stage.wait_for_bed_temperature(37).await.unwrap();
    assert_eq!(marlin.bed_target(), Some(37));
    assert!(marlin.commands().contains(&"M190 S36 R38".to_string()));

    stage.jog(JogDirection::North, 1.0).await.unwrap();
    stage.jog(JogDirection::Up, 0.5).await.unwrap();
    assert_eq!(stage.tracked_position().await, Position::new(0.0, 1.0, 0.5));
    assert_eq!(marlin.position(), Position::new(0.0, 1.0, 0.5));
}

/// Firmware that acks every command, but only after `delay` for `slow`.
fn spawn_slow_ack_firmware(
    slow: &'static str,
    delay: Duration,
) -> (DuplexStream, mpsc::UnboundedReceiver<String>) {
    let (host, device) = tokio::io::duplex(1024);
    let (log, received) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut host = BufReader::new(host);
        loop {
            let mut line = String::new();
            match host.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = line.trim().to_string();
            let late = command == slow;
            let _ = log.send(command);
            if late {
                tokio::time::sleep(delay).await;
            }
            if host.get_mut().write_all(b"ok\n").await.is_err() {
                break;
            }
        }
    });
    (device, received)
}

#[tokio::test(start_paused = true)]
async fn late_mode_ack_forces_mode_resend() {
    let (link, mut received) = spawn_slow_ack_firmware("G90", Duration::from_millis(500));
    let transport = GcodeTransport::new(Box::new(link), Duration::from_millis(100));
    let stage = GcodeStage::connect(transport, StageConfig::default())
        .await
        .unwrap();

    let err = stage.move_absolute(3.0, 3.0, None).await.unwrap_err();
    assert!(matches!(err, ScopeError::Timeout { ref command, .. } if command == "G90"));
    assert_eq!(stage.mode().await, None);

    // Let the late ack land on the link before moving again.
    tokio::time::sleep(Duration::from_millis(600)).await;
    stage.move_relative(0.5, 0.0, None).await.unwrap();

    assert_eq!(stage.mode().await, Some(CoordinateMode::Relative));
    assert_eq!(stage.tracked_position().await, Position::new(0.5, 0.0, 0.0));

    let mut commands = Vec::new();
    while let Ok(command) = received.try_recv() {
        commands.push(command);
    }
    assert_eq!(commands, vec!["G91", "G90", "G91", "G0 X 0.5 Y 0"]);
}

#[tokio::test]
async fn malformed_position_report_is_a_protocol_error() {
    let (host, device) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut host = BufReader::new(host);
        loop {
            let mut line = String::new();
            match host.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let reply: &[u8] = if line.trim() == "M114" {
                b"X:abc Y:0.00 Z:0.00 Count X:0\nok\n"
            } else {
                b"ok\n"
            };
            if host.get_mut().write_all(reply).await.is_err() {
                break;
            }
        }
    });
    let transport = GcodeTransport::new(Box::new(device), Duration::from_secs(1));
    let stage = GcodeStage::connect(transport, StageConfig::default())
        .await
        .unwrap();

    let err = stage.query_position().await.unwrap_err();
    assert!(matches!(err, ScopeError::Protocol(_)));

    // The trailing ack was consumed, so the link stays in step.
    stage.move_relative(1.0, 0.0, None).await.unwrap();
    assert_eq!(stage.mode().await, Some(CoordinateMode::Relative));
    assert_eq!(stage.tracked_position().await, Position::new(1.0, 0.0, 0.0));
}
