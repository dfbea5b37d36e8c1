//! Control loop tests against the mock lever

use lever_protocol::{Direction, MockCommand, MockTransport};
use lever_pull::PullPhase;
use pull_scheduler::ScheduleConfig;
use rig::{LeverConfig, Rig, RigConfig, RigError, TransportKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);

fn mock_config() -> RigConfig {
    RigConfig {
        transport: TransportKind::Mock,
        levers: vec![
            LeverConfig {
                port: Some("MOCK0".to_string()),
                ..LeverConfig::default()
            },
            LeverConfig {
                port: Some("MOCK1".to_string()),
                force_grams: 35,
                direction: Direction::Reverse,
                ..LeverConfig::default()
            },
        ],
        schedule: ScheduleConfig {
            interval_s: 0.5,
            ..ScheduleConfig::default()
        },
        ..RigConfig::default()
    }
}

#[test]
fn test_startup_applies_lever_settings() {
    let mock = MockTransport::new();
    let mut rig = Rig::new(mock_config(), Arc::new(mock.clone()));
    let mut worker = rig.start_stepped().unwrap();

    let start = Instant::now();
    for i in 0..4 {
        rig.tick(start + TICK * i);
        worker.step();
    }

    let handles = rig.registry().handles();
    assert!(rig.registry().is_open(handles[0]));
    assert!(rig.registry().is_open(handles[1]));
    assert_eq!(mock.force_on("MOCK1"), Some(35));
    assert_eq!(mock.direction_on("MOCK1"), Some(Direction::Reverse));
    assert_eq!(rig.registry().canonical_force(handles[1]), Some(35));
}

#[test]
fn test_scheduled_pull_runs_a_cycle() {
    let mock = MockTransport::new();
    let mut rig = Rig::new(mock_config(), Arc::new(mock.clone()));
    let mut worker = rig.start_stepped().unwrap();

    let start = Instant::now();
    for i in 0..300 {
        rig.tick(start + TICK * i);
        worker.step();
    }

    let summary = rig.shutdown();
    assert!(summary.scheduled_pulls >= 2, "{:?}", summary);
    assert!(summary.completed_cycles >= 1, "{:?}", summary);
    assert!(summary.pulls >= 1, "reverse phase never moved the lever: {:?}", summary);
    assert!(summary.releases >= 1, "{:?}", summary);
    assert_eq!(summary.levers_open, 2);

    let directions: Vec<_> = mock
        .commands_for("MOCK0")
        .into_iter()
        .filter_map(|c| match c {
            MockCommand::SetDirection(d) => Some(d),
            _ => None,
        })
        .collect();
    assert!(directions.contains(&Direction::Reverse));
}

#[test]
fn test_automated_pull_idle_before_schedule() {
    let mut rig = Rig::new(mock_config(), Arc::new(MockTransport::new()));
    let mut worker = rig.start_stepped().unwrap();

    let start = Instant::now();
    for i in 0..20 {
        rig.tick(start + TICK * i);
        worker.step();
    }

    assert_eq!(rig.automated_pull().phase(), PullPhase::Idle);
    assert_eq!(rig.summary().scheduled_pulls, 0);
    assert_eq!(rig.summary().ticks, 20);
}

#[test]
fn test_failed_port_leaves_lever_closed() {
    let mock = MockTransport::new();
    mock.refuse_port("MOCK1");
    let mut rig = Rig::new(mock_config(), Arc::new(mock.clone()));
    let mut worker = rig.start_stepped().unwrap();

    let start = Instant::now();
    for i in 0..4 {
        rig.tick(start + TICK * i);
        worker.step();
    }

    let handles = rig.registry().handles();
    assert!(rig.registry().is_open(handles[0]));
    assert!(!rig.registry().is_open(handles[1]));
    assert!(rig.registry().open_error(handles[1]).is_some());
    assert_eq!(rig.shutdown().levers_open, 1);
}

#[test]
fn test_invalid_config_rejected_at_start() {
    let config = RigConfig {
        pull_lever: 5,
        ..mock_config()
    };
    let mut rig = Rig::new(config, Arc::new(MockTransport::new()));
    assert!(matches!(rig.start_stepped(), Err(RigError::Invalid(_))));
}

#[test]
fn test_detection_restarts_after_telemetry_gap() {
    let mock = MockTransport::new();
    mock.pin_position("MOCK0", 1000.0);
    let config = RigConfig {
        levers: mock_config().levers[..1].to_vec(),
        ..mock_config()
    };
    let mut rig = Rig::new(config, Arc::new(mock.clone()));
    let mut worker = rig.start_stepped().unwrap();

    let start = Instant::now();
    let mut now = start;
    for _ in 0..4 {
        rig.tick(now);
        worker.step();
        now += TICK;
    }
    assert_eq!(rig.summary().pulls, 1);

    mock.set_silent(true);
    worker.step();
    rig.tick(now);
    now += TICK;

    // Still held high; the gap cleared the detector so this counts again.
    mock.set_silent(false);
    for _ in 0..3 {
        worker.step();
        rig.tick(now);
        now += TICK;
    }
    assert_eq!(rig.summary().pulls, 2);
    assert_eq!(rig.summary().releases, 0);
}
