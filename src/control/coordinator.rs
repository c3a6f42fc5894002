//! Actuator coordinator
//!
//! The single owner of every actuator on the rig. It runs in a dedicated Tokio task and
//! executes [`ActuatorRequest`]s one at a time, in the order they leave the request slot.
//!
//! # Architecture
//!
//! - **Request slot**: an mpsc channel of capacity 1. Submitting while a request is pending
//!   suspends the submitter until the coordinator dequeues it. Requests are then run to
//!   completion before the next one is read.
//! - **Run flags**: one flag per [`ActuatorGroup`], raised when a request is dequeued and
//!   lowered when it finishes. [`ActuatorHandle::stop`] lowers it early; the stage and turret
//!   loops poll it once per increment. Servo moves are atomic and ignore it.
//! - **Events**: [`ActuatorEvent`]s go out on a broadcast channel. Every request produces
//!   exactly one `Started` and one `Finished`, with `Progress` for each completed increment.
//! - **Positions**: a watch channel holds the latest [`PositionState`]. Only this task writes
//!   it, and only with positions inside the request bounds.
//!
//! The coordinator is the authority on where each actuator is. A request carrying a stale
//! `current` value (built while an earlier request was still queued) is rebased onto the
//! tracked position before it runs.
//!
//! Interactive callers (the command authority and the operator console) do not wait on the
//! slot themselves. They enqueue into a [`RequestQueue`], whose forwarding task does the
//! waiting.
//!
//! ```text
//! CommandAuthority ──┐
//!                    ├──> RequestQueue ──┐                      ┌──> broadcast<ActuatorEvent>
//! Operator console ──┘                   ├──> slot (cap 1) ──> Coordinator task
//! Tests ─────────────────────────────────┘                      └──> watch<PositionState>
//! ```

use crate::control::messages::{
    ActuatorEvent, ActuatorGroup, ActuatorRequest, Job, LensChange, MotionOutcome, MotionTarget,
    PositionState, ServoAxis, ServoMove, StageMove, StopReason,
};
use crate::error::{RigError, RigResult};
use crate::hardware::{Actuator, Direction, Servo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Devices driven by the coordinator
#[derive(Clone)]
pub struct ActuatorDevices {
    pub stage: Arc<dyn Actuator>,
    pub turret: Arc<dyn Actuator>,
    pub pan: Arc<dyn Servo>,
    pub tilt: Arc<dyn Servo>,
    pub brightness: Arc<dyn Servo>,
}

impl ActuatorDevices {
    fn servo(&self, axis: ServoAxis) -> &dyn Servo {
        match axis {
            ServoAxis::Pan => self.pan.as_ref(),
            ServoAxis::Tilt => self.tilt.as_ref(),
            ServoAxis::Brightness => self.brightness.as_ref(),
        }
    }
}

struct Shared {
    stage_running: AtomicBool,
    turret_running: AtomicBool,
    servo_running: AtomicBool,
    events: broadcast::Sender<ActuatorEvent>,
    positions: watch::Sender<PositionState>,
}

impl Shared {
    fn flag(&self, group: ActuatorGroup) -> &AtomicBool {
        match group {
            ActuatorGroup::Stage => &self.stage_running,
            ActuatorGroup::Turret => &self.turret_running,
            ActuatorGroup::Servo => &self.servo_running,
        }
    }

    fn emit(&self, event: ActuatorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Cloneable handle for submitting requests and observing the coordinator
#[derive(Clone)]
pub struct ActuatorHandle {
    slot: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl ActuatorHandle {
    /// Queue a request without waiting for it to run
    ///
    /// Waits while another request occupies the slot.
    pub async fn submit(&self, request: ActuatorRequest) -> RigResult<()> {
        self.slot
            .send(Job {
                request,
                done: None,
            })
            .await
            .map_err(|_| RigError::CoordinatorClosed)
    }

    /// Queue a request and wait for it to finish
    pub async fn execute(&self, request: ActuatorRequest) -> RigResult<MotionOutcome> {
        let (done, rx) = oneshot::channel();
        self.slot
            .send(Job {
                request,
                done: Some(done),
            })
            .await
            .map_err(|_| RigError::CoordinatorClosed)?;
        rx.await.map_err(|_| RigError::CoordinatorClosed)
    }

    /// Cancel the running stage or turret motion
    ///
    /// Returns whether the group was running. Stopping an idle group does nothing, and
    /// servo moves cannot be interrupted.
    pub fn stop(&self, group: ActuatorGroup) -> bool {
        if group == ActuatorGroup::Servo {
            debug!("Servo moves are not interruptible");
            return false;
        }

        let was_running = self.shared.flag(group).swap(false, Ordering::SeqCst);
        if was_running {
            info!(%group, "Stop requested");
        }
        was_running
    }

    pub fn is_running(&self, group: ActuatorGroup) -> bool {
        self.shared.flag(group).load(Ordering::SeqCst)
    }

    /// The group currently executing, if any
    pub fn running_group(&self) -> Option<ActuatorGroup> {
        ActuatorGroup::ALL
            .into_iter()
            .find(|group| self.is_running(*group))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActuatorEvent> {
        self.shared.events.subscribe()
    }

    /// Latest tracked positions
    pub fn positions(&self) -> PositionState {
        *self.shared.positions.borrow()
    }

    pub fn watch_positions(&self) -> watch::Receiver<PositionState> {
        self.shared.positions.subscribe()
    }

    /// Start the task that feeds a [`RequestQueue`] into the slot, in order
    pub fn spawn_queue(&self, capacity: usize) -> (RequestQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let handle = self.clone();
        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if let Err(e) = handle.submit(request).await {
                    warn!(error = %e, "Actuator request queue stopped");
                    break;
                }
            }
            debug!("Actuator request queue closed");
        });
        (RequestQueue { tx }, task)
    }
}

/// Ordered backlog in front of the request slot
///
/// [`RequestQueue::enqueue`] never waits: one forwarding task moves requests into the slot
/// as it frees up, so callers stay responsive while a long motion runs.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<ActuatorRequest>,
}

impl RequestQueue {
    /// Hand a request to the forwarding task
    ///
    /// Fails with `ActuatorBacklogFull` when the backlog is at capacity.
    pub fn enqueue(&self, request: ActuatorRequest) -> RigResult<()> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => RigError::ActuatorBacklogFull,
            TrySendError::Closed(_) => RigError::CoordinatorClosed,
        })
    }
}

/// Outcome of the shared step loop
struct LoopOutcome {
    position: i64,
    reason: StopReason,
    steps: u64,
    faults: u64,
}

/// Parameters of one stepper run
struct StepPlan {
    start: i64,
    direction: Option<Direction>,
    iterations: u64,
    min: i64,
    max: i64,
}

/// Serialized executor for stage, turret and servo requests
pub struct ActuatorCoordinator {
    devices: ActuatorDevices,
    requests: mpsc::Receiver<Job>,
    shared: Arc<Shared>,
}

impl ActuatorCoordinator {
    /// Create a coordinator and the handle used to reach it
    pub fn new(
        devices: ActuatorDevices,
        initial: PositionState,
        event_capacity: usize,
    ) -> (Self, ActuatorHandle) {
        let (slot, requests) = mpsc::channel(1);
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (positions, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            stage_running: AtomicBool::new(false),
            turret_running: AtomicBool::new(false),
            servo_running: AtomicBool::new(false),
            events,
            positions,
        });

        let coordinator = Self {
            devices,
            requests,
            shared: shared.clone(),
        };
        (coordinator, ActuatorHandle { slot, shared })
    }

    /// Spawn the coordinator task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process requests until every handle has been dropped
    pub async fn run(mut self) {
        info!("Actuator coordinator started");

        while let Some(job) = self.requests.recv().await {
            let outcome = self.execute(job.request).await;
            if let Some(done) = job.done {
                let _ = done.send(outcome);
            }
        }

        info!("Request slot closed, actuator coordinator shutting down");
    }

    async fn execute(&self, request: ActuatorRequest) -> MotionOutcome {
        let group = request.group();
        let flag = self.shared.flag(group);
        flag.store(true, Ordering::SeqCst);

        let outcome = match request {
            ActuatorRequest::Stage(stage) => self.run_stage(stage).await,
            ActuatorRequest::Turret(change) => self.run_turret(change).await,
            ActuatorRequest::Servo(servo) => self.run_servo(servo).await,
        };

        flag.store(false, Ordering::SeqCst);
        self.shared.emit(outcome.into());
        info!(
            %group,
            position = outcome.position,
            steps = outcome.steps,
            reason = ?outcome.reason,
            "Motion finished"
        );
        outcome
    }

    async fn run_stage(&self, request: StageMove) -> MotionOutcome {
        let tracked = self.shared.positions.borrow().stage;
        let current = rebase("stage", request.current, tracked);
        // Relative targets resolve here, against the position the move actually starts from
        let goal = request.target.resolve(current);
        let target = MotionTarget::Stage;

        self.shared.emit(ActuatorEvent::Started {
            target,
            position: current,
        });
        debug!(from = current, to = goal, "Stage move started");

        let plan = StepPlan {
            start: current,
            direction: Direction::towards(current, goal),
            iterations: goal.abs_diff(current),
            min: request.min,
            max: request.max,
        };

        let result = self
            .step_loop(self.devices.stage.as_ref(), ActuatorGroup::Stage, plan, |position| {
                self.shared.positions.send_modify(|p| p.stage = position);
                self.shared.emit(ActuatorEvent::Progress { target, position });
            })
            .await;

        MotionOutcome {
            target,
            position: result.position,
            reason: result.reason,
            steps: result.steps,
            faults: result.faults,
        }
    }

    async fn run_turret(&self, request: LensChange) -> MotionOutcome {
        let tracked = *self.shared.positions.borrow();
        if request.lens != tracked.lens {
            debug!(
                requested = %request.lens,
                tracked = %tracked.lens,
                "Rebasing lens change onto tracked index"
            );
        }
        let change = LensChange {
            lens: tracked.lens,
            current: rebase("turret", request.current, tracked.turret),
            stops: request.stops,
        };

        let goal = change.target();
        let direction = change.lens.transition_direction();
        let target = MotionTarget::Turret(change.lens);

        self.shared.emit(ActuatorEvent::Started {
            target,
            position: change.current,
        });
        debug!(lens = %change.lens, from = change.current, to = goal, "Lens change started");

        let remaining = (goal - change.current).saturating_mul(direction.delta());
        let plan = StepPlan {
            start: change.current,
            direction: Some(direction),
            iterations: u64::try_from(remaining).unwrap_or(0),
            min: change.stops.iter().copied().min().unwrap_or(goal),
            max: change.stops.iter().copied().max().unwrap_or(goal),
        };

        let result = self
            .step_loop(self.devices.turret.as_ref(), ActuatorGroup::Turret, plan, |position| {
                self.shared.positions.send_modify(|p| p.turret = position);
                self.shared.emit(ActuatorEvent::Progress { target, position });
            })
            .await;

        let lens = if result.reason != StopReason::Cancelled && result.position == goal {
            let next = change.lens.next();
            self.shared.positions.send_modify(|p| p.lens = next);
            next
        } else {
            change.lens
        };

        MotionOutcome {
            target: MotionTarget::Turret(lens),
            position: result.position,
            reason: result.reason,
            steps: result.steps,
            faults: result.faults,
        }
    }

    async fn run_servo(&self, request: ServoMove) -> MotionOutcome {
        let tracked = self.shared.positions.borrow().servo(request.axis);
        let request = ServoMove {
            current: rebase("servo", request.current, tracked),
            ..request
        };
        let target = MotionTarget::Servo(request.axis);

        self.shared.emit(ActuatorEvent::Started {
            target,
            position: request.current,
        });

        let goal = request.target();
        let reason = if goal == request.unclamped_target() {
            StopReason::Completed
        } else {
            StopReason::BoundsReached
        };

        let mut outcome = MotionOutcome {
            target,
            position: request.current,
            reason,
            steps: 0,
            faults: 0,
        };
        if goal == request.current {
            return outcome;
        }

        match self.devices.servo(request.axis).set_angle(goal).await {
            Ok(()) => {
                self.shared
                    .positions
                    .send_modify(|p| p.set_servo(request.axis, goal));
                outcome.position = goal;
                outcome.steps = 1;
            }
            Err(e) => {
                let err = RigError::HardwareUnavailable(e.to_string());
                warn!(axis = ?request.axis, error = %err, "Servo move failed");
                outcome.faults = 1;
            }
        }
        outcome
    }

    /// Step one increment at a time, polling the run flag and bounds before each step
    async fn step_loop<F>(
        &self,
        actuator: &dyn Actuator,
        group: ActuatorGroup,
        plan: StepPlan,
        mut on_step: F,
    ) -> LoopOutcome
    where
        F: FnMut(i64),
    {
        let mut outcome = LoopOutcome {
            position: plan.start,
            reason: StopReason::Completed,
            steps: 0,
            faults: 0,
        };
        let Some(direction) = plan.direction else {
            return outcome;
        };
        let flag = self.shared.flag(group);

        for _ in 0..plan.iterations {
            if !flag.load(Ordering::SeqCst) {
                outcome.reason = StopReason::Cancelled;
                break;
            }

            let next = outcome.position + direction.delta();
            if next < plan.min || next > plan.max {
                outcome.reason = StopReason::BoundsReached;
                break;
            }

            match actuator.move_step(direction).await {
                Ok(()) => {
                    outcome.position = next;
                    outcome.steps += 1;
                    on_step(next);
                }
                Err(e) => {
                    let err = RigError::HardwareUnavailable(e.to_string());
                    warn!(%group, position = outcome.position, error = %err, "Step failed");
                    outcome.faults += 1;
                }
            }
        }
        outcome
    }
}

fn rebase(group: &str, requested: i64, tracked: i64) -> i64 {
    if requested != tracked {
        debug!(group, requested, tracked, "Rebasing request onto tracked position");
    }
    tracked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::messages::{LensIndex, ServoMotion, StageTarget};
    use crate::hardware::mock::{MockServo, MockStepper};

    struct Rig {
        stage: MockStepper,
        pan: MockServo,
        handle: ActuatorHandle,
    }

    fn rig(initial: PositionState) -> Rig {
        let stage = MockStepper::new();
        let pan = MockServo::new();
        let devices = ActuatorDevices {
            stage: Arc::new(stage.clone()),
            turret: Arc::new(MockStepper::new()),
            pan: Arc::new(pan.clone()),
            tilt: Arc::new(MockServo::new()),
            brightness: Arc::new(MockServo::new()),
        };
        let (coordinator, handle) = ActuatorCoordinator::new(devices, initial, 8192);
        coordinator.spawn();
        Rig { stage, pan, handle }
    }

    #[tokio::test]
    async fn test_stage_move_down() {
        let rig = rig(PositionState {
            stage: 20,
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Stage(StageMove {
                target: StageTarget::Absolute(5),
                current: 20,
                min: 0,
                max: 200,
            }))
            .await
            .unwrap();

        assert_eq!(outcome.position, 5);
        assert_eq!(outcome.steps, 15);
        assert_eq!(rig.stage.net_position(), -15);
        assert_eq!(rig.handle.positions().stage, 5);
        assert!(!rig.handle.is_running(ActuatorGroup::Stage));
    }

    #[tokio::test]
    async fn test_stage_stops_at_bound() {
        let rig = rig(PositionState {
            stage: 198,
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Stage(StageMove {
                target: StageTarget::Absolute(250),
                current: 198,
                min: 0,
                max: 200,
            }))
            .await
            .unwrap();

        assert_eq!(outcome.reason, StopReason::BoundsReached);
        assert_eq!(outcome.position, 200);
        assert_eq!(outcome.steps, 2);
    }

    #[tokio::test]
    async fn test_stale_request_is_rebased() {
        let rig = rig(PositionState {
            stage: 10,
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Stage(StageMove {
                target: StageTarget::Absolute(12),
                current: 0,
                min: 0,
                max: 200,
            }))
            .await
            .unwrap();
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.position, 12);
    }

    #[tokio::test]
    async fn test_servo_move_is_clamped() {
        let rig = rig(PositionState {
            pan: 175,
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Servo(ServoMove {
                axis: ServoAxis::Pan,
                motion: ServoMotion::Increase,
                current: 175,
                step: 10,
                min: 0,
                max: 180,
            }))
            .await
            .unwrap();

        assert_eq!(outcome.position, 180);
        assert_eq!(outcome.reason, StopReason::BoundsReached);
        assert_eq!(rig.pan.angles(), vec![180]);
        assert_eq!(rig.handle.positions().pan, 180);
    }

    #[tokio::test]
    async fn test_servo_failure_keeps_position() {
        let rig = rig(PositionState {
            pan: 90,
            ..Default::default()
        });
        rig.pan.set_failing(true);
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Servo(ServoMove {
                axis: ServoAxis::Pan,
                motion: ServoMotion::Decrease,
                current: 90,
                step: 10,
                min: 0,
                max: 180,
            }))
            .await
            .unwrap();

        assert_eq!(outcome.position, 90);
        assert_eq!(outcome.faults, 1);
        assert_eq!(rig.handle.positions().pan, 90);
    }

    #[tokio::test]
    async fn test_stop_on_idle_group_is_noop() {
        let rig = rig(PositionState::default());
        assert!(!rig.handle.stop(ActuatorGroup::Stage));
        assert!(!rig.handle.stop(ActuatorGroup::Servo));
        assert_eq!(rig.handle.running_group(), None);
    }

    #[tokio::test]
    async fn test_turret_wraps_back_to_first_lens() {
        let rig = rig(PositionState {
            turret: 40,
            lens: LensIndex::new(2).unwrap(),
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Turret(LensChange {
                lens: LensIndex::new(2).unwrap(),
                current: 40,
                stops: [0, 20, 40],
            }))
            .await
            .unwrap();

        assert_eq!(outcome.reason, StopReason::Completed);
        assert_eq!(outcome.position, 0);
        assert_eq!(outcome.steps, 40);
        assert_eq!(outcome.target, MotionTarget::Turret(LensIndex::new(0).unwrap()));
        assert_eq!(rig.handle.positions().lens.value(), 0);
    }

    #[tokio::test]
    async fn test_turret_beyond_stops_hits_bound() {
        let rig = rig(PositionState {
            turret: 4000,
            lens: LensIndex::new(2).unwrap(),
            ..Default::default()
        });
        let outcome = rig
            .handle
            .execute(ActuatorRequest::Turret(LensChange {
                lens: LensIndex::new(2).unwrap(),
                current: 4000,
                stops: [0, 20, 40],
            }))
            .await
            .unwrap();

        assert_eq!(outcome.reason, StopReason::BoundsReached);
        assert_eq!(outcome.steps, 0);
        assert_eq!(outcome.target, MotionTarget::Turret(LensIndex::new(2).unwrap()));
    }
}
