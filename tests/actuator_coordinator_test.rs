//! Integration tests for the actuator coordinator
//!
//! Every test drives the coordinator through its public handle with simulated steppers and
//! servos, then checks the emitted event stream and the tracked positions.

use rig_control::control::{
    ActuatorCoordinator, ActuatorDevices, ActuatorEvent, ActuatorGroup, ActuatorHandle,
    ActuatorRequest, LensChange, LensIndex, MotionTarget, PositionState, ServoAxis, ServoMotion,
    RequestFactory, ServoMove, StageMove, StageTarget, StopReason,
};
use rig_control::config::RigConfig;
use rig_control::hardware::mock::{MockServo, MockStepper};
use rig_control::hardware::Direction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

struct TestRig {
    stage: MockStepper,
    turret: MockStepper,
    brightness: MockServo,
    handle: ActuatorHandle,
}

fn spawn_rig(initial: PositionState, stage: MockStepper) -> TestRig {
    let turret = MockStepper::new();
    let brightness = MockServo::new();
    let devices = ActuatorDevices {
        stage: Arc::new(stage.clone()),
        turret: Arc::new(turret.clone()),
        pan: Arc::new(MockServo::new()),
        tilt: Arc::new(MockServo::new()),
        brightness: Arc::new(brightness.clone()),
    };
    let (coordinator, handle) = ActuatorCoordinator::new(devices, initial, 8192);
    coordinator.spawn();
    TestRig {
        stage,
        turret,
        brightness,
        handle,
    }
}

fn drain(events: &mut broadcast::Receiver<ActuatorEvent>) -> Vec<ActuatorEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn stage_at(position: i64) -> PositionState {
    PositionState {
        stage: position,
        ..Default::default()
    }
}

fn count_started(events: &[ActuatorEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ActuatorEvent::Started { .. }))
        .count()
}

fn count_finished(events: &[ActuatorEvent]) -> usize {
    events.iter().filter(|e| e.is_finished()).count()
}

fn progress_positions(events: &[ActuatorEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            ActuatorEvent::Progress { position, .. } => Some(*position),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_stage_runs_exact_step_count() {
    let rig = spawn_rig(stage_at(100), MockStepper::new());
    let mut events = rig.handle.subscribe();

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(150),
            current: 100,
            min: 0,
            max: 200,
        }))
        .await
        .unwrap();

    assert_eq!(outcome.position, 150);
    assert_eq!(outcome.steps, 50);
    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(rig.stage.steps_taken(), 50);
    assert_eq!(rig.handle.positions().stage, 150);

    let events = drain(&mut events);
    assert_eq!(count_started(&events), 1);
    assert_eq!(count_finished(&events), 1);
    assert_eq!(progress_positions(&events), (101..=150).collect::<Vec<_>>());
    assert!(matches!(
        events.first(),
        Some(ActuatorEvent::Started { position: 100, .. })
    ));
    assert!(events.last().is_some_and(|e| e.is_finished() && e.position() == 150));
}

#[tokio::test]
async fn test_stage_cancel_after_n_steps() {
    let stage = MockStepper::new();
    let rig = spawn_rig(stage_at(100), stage.clone());
    let mut events = rig.handle.subscribe();

    // Cancel from inside the tenth step, as an operator pressing stop mid-move would
    let canceller = rig.handle.clone();
    stage.on_step(move |count| {
        if count == 10 {
            canceller.stop(ActuatorGroup::Stage);
        }
    });

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(150),
            current: 100,
            min: 0,
            max: 200,
        }))
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.position, 110);
    assert_eq!(outcome.steps, 10);
    assert_eq!(rig.stage.steps_taken(), 10);

    let events = drain(&mut events);
    let progress = progress_positions(&events);
    assert_eq!(progress.last(), Some(&110));
    assert_eq!(progress.len(), 10);

    // Nothing follows the completion event
    assert!(events.last().is_some_and(|e| matches!(
        e,
        ActuatorEvent::Finished {
            position: 110,
            reason: StopReason::Cancelled,
            ..
        }
    )));
    assert!(!rig.handle.is_running(ActuatorGroup::Stage));
}

#[tokio::test]
async fn test_stage_at_bound_completes_with_zero_steps() {
    let rig = spawn_rig(stage_at(200), MockStepper::new());
    let mut events = rig.handle.subscribe();

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(201),
            current: 200,
            min: 0,
            max: 200,
        }))
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::BoundsReached);
    assert_eq!(outcome.steps, 0);
    assert_eq!(outcome.position, 200);
    assert_eq!(rig.stage.steps_taken(), 0);

    let events = drain(&mut events);
    assert_eq!(events.len(), 2);
    assert_eq!(count_started(&events), 1);
    assert_eq!(count_finished(&events), 1);
}

#[tokio::test]
async fn test_nudge_queued_during_move_starts_from_final_position() {
    let rig = spawn_rig(
        stage_at(0),
        MockStepper::with_settle(Duration::from_millis(2)),
    );
    let factory = RequestFactory::new(&RigConfig::default());
    let mut positions = rig.handle.watch_positions();

    rig.handle
        .submit(factory.stage_to(100, &rig.handle.positions()))
        .await
        .unwrap();
    timeout(Duration::from_secs(5), positions.wait_for(|p| p.stage >= 19))
        .await
        .unwrap()
        .unwrap();

    // Built while the stage is around 19, executed once it has reached 100
    let nudge = factory.stage_nudge(Direction::Up, &rig.handle.positions());
    let outcome = timeout(Duration::from_secs(5), rig.handle.execute(nudge))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.position, 101);
    assert_eq!(outcome.steps, 1);
    assert_eq!(rig.stage.net_position(), 101);
    assert_eq!(rig.handle.positions().stage, 101);
}

#[tokio::test]
async fn test_stage_hardware_failure_keeps_position() {
    let stage = MockStepper::new();
    stage.set_failing(true);
    let rig = spawn_rig(stage_at(100), stage);
    let mut events = rig.handle.subscribe();

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(105),
            current: 100,
            min: 0,
            max: 200,
        }))
        .await
        .unwrap();

    assert_eq!(outcome.position, 100);
    assert_eq!(outcome.steps, 0);
    assert_eq!(outcome.faults, 5);
    assert_eq!(rig.handle.positions().stage, 100);
    assert!(progress_positions(&drain(&mut events)).is_empty());
}

#[tokio::test]
async fn test_turret_advances_to_next_lens() {
    let rig = spawn_rig(PositionState::default(), MockStepper::new());
    let mut events = rig.handle.subscribe();
    let lens0 = LensIndex::new(0).unwrap();

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Turret(LensChange {
            lens: lens0,
            current: 0,
            stops: [0, 2000, 4000],
        }))
        .await
        .unwrap();

    assert_eq!(outcome.position, 2000);
    assert_eq!(outcome.target, MotionTarget::Turret(LensIndex::new(1).unwrap()));
    assert_eq!(rig.turret.net_position(), 2000);

    let positions = rig.handle.positions();
    assert_eq!(positions.turret, 2000);
    assert_eq!(positions.lens.value(), 1);

    let events = drain(&mut events);
    let progress = progress_positions(&events);
    assert_eq!(progress, (1..=2000).collect::<Vec<_>>());
    assert!(events
        .iter()
        .filter(|e| matches!(e, ActuatorEvent::Progress { .. }))
        .all(|e| e.target() == MotionTarget::Turret(lens0)));
}

#[tokio::test]
async fn test_cancelled_turret_keeps_lens_index() {
    let turret = MockStepper::new();
    let devices = ActuatorDevices {
        stage: Arc::new(MockStepper::new()),
        turret: Arc::new(turret.clone()),
        pan: Arc::new(MockServo::new()),
        tilt: Arc::new(MockServo::new()),
        brightness: Arc::new(MockServo::new()),
    };
    let (coordinator, handle) = ActuatorCoordinator::new(devices, PositionState::default(), 8192);
    coordinator.spawn();

    let canceller = handle.clone();
    turret.on_step(move |count| {
        if count == 500 {
            canceller.stop(ActuatorGroup::Turret);
        }
    });

    let outcome = handle
        .execute(ActuatorRequest::Turret(LensChange {
            lens: LensIndex::new(0).unwrap(),
            current: 0,
            stops: [0, 2000, 4000],
        }))
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.position, 500);
    assert_eq!(outcome.target, MotionTarget::Turret(LensIndex::new(0).unwrap()));
    assert_eq!(handle.positions().lens.value(), 0);
    assert_eq!(handle.positions().turret, 500);
}

#[tokio::test]
async fn test_brightness_set_is_absolute() {
    let rig = spawn_rig(PositionState::default(), MockStepper::new());

    let outcome = rig
        .handle
        .execute(ActuatorRequest::Servo(ServoMove {
            axis: ServoAxis::Brightness,
            motion: ServoMotion::Set(120),
            current: 0,
            step: 0,
            min: 0,
            max: 180,
        }))
        .await
        .unwrap();

    assert_eq!(outcome.position, 120);
    assert_eq!(rig.brightness.angles(), vec![120]);
    assert_eq!(rig.handle.positions().brightness, 120);
}

#[tokio::test]
async fn test_request_slot_holds_one_pending_request() {
    let stage = MockStepper::with_settle(Duration::from_millis(20));
    let rig = spawn_rig(stage_at(0), stage);

    let to = |target| {
        ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(target),
            current: 0,
            min: 0,
            max: 200,
        })
    };

    // First request is dequeued and starts stepping (about 200 ms of work)
    rig.handle.submit(to(10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(rig.handle.running_group(), Some(ActuatorGroup::Stage));
    assert!(!rig.handle.is_running(ActuatorGroup::Turret));

    // Second fills the slot, third has to wait for the first to finish
    rig.handle.submit(to(12)).await.unwrap();
    let third = timeout(Duration::from_millis(50), rig.handle.submit(to(13))).await;
    assert!(third.is_err(), "slot accepted a second pending request");

    // Once the first request finishes, the slot frees up again
    timeout(Duration::from_secs(5), rig.handle.submit(to(13)))
        .await
        .unwrap()
        .unwrap();

    let mut positions = rig.handle.watch_positions();
    timeout(
        Duration::from_secs(5),
        positions.wait_for(|p| p.stage == 13),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_coordinator_closed_after_task_ends() {
    let devices = ActuatorDevices {
        stage: Arc::new(MockStepper::new()),
        turret: Arc::new(MockStepper::new()),
        pan: Arc::new(MockServo::new()),
        tilt: Arc::new(MockServo::new()),
        brightness: Arc::new(MockServo::new()),
    };
    let (coordinator, handle) = ActuatorCoordinator::new(devices, PositionState::default(), 16);
    drop(coordinator);

    let result = handle
        .submit(ActuatorRequest::Stage(StageMove {
            target: StageTarget::Absolute(1),
            current: 0,
            min: 0,
            max: 200,
        }))
        .await;
    assert!(result.is_err());
}
