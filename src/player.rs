//! Gesture player.
//!
//! Drives the shared pose through one gesture at a time. Each play is a
//! motion session that goes Idle -> Running -> Completed | Cancelled.
//! Cancellation is only observed at step boundaries: right before a pose is
//! applied and while suspended between poses. A new `play()` cancels the
//! running session and waits for it to let go of the arm before moving.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::force::ForceReadings;
use crate::gate::PowerGate;
use crate::gesture::Gesture;
use crate::interpolate::{clamp_speed, Trajectory};
use crate::joint::{JointState, SharedJoints};
use crate::recorder::Recording;
use crate::telemetry::{EventType, TelemetryEvent, TelemetrySink};

/// Lifecycle phase of a motion session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Observable state of the most recent motion session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session number, starting at 1. Zero before the first play.
    pub id: u64,
    pub phase: Phase,
    /// Index of the last pose fully applied.
    pub step: usize,
    /// Number of poses the session emits when it runs to completion.
    pub total_steps: usize,
    /// Pose at session start.
    pub start: JointState,
}

/// How a play ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Every pose was applied; carries the final pose.
    Completed(JointState),
    /// Interrupted between steps; carries the pose the arm holds.
    Cancelled(JointState),
    /// Power was off; nothing happened.
    GateClosed,
}

impl PlayOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PlayOutcome::Completed(_))
    }
}

struct MotionSession {
    id: u64,
    cancel: CancellationToken,
    gate: PowerGate,
    /// Power cut count when the play was accepted.
    epoch: u64,
    status: Arc<Mutex<SessionStatus>>,
}

impl MotionSession {
    fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.gate.cut_since(self.epoch)
    }

    /// Suspend between two steps. Returns false if the session was
    /// interrupted while waiting.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.interrupted();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.gate.wait_cut(self.epoch) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        // A newer session owns the status from here on.
        if status.id == self.id {
            f(&mut status);
        }
    }
}

/// Plays gestures on the shared pose. Clones share the same arm and session.
#[derive(Clone)]
pub struct Player {
    joints: SharedJoints,
    gate: PowerGate,
    telemetry: Arc<dyn TelemetrySink>,
    speed: Arc<AtomicU8>,
    next_id: Arc<AtomicU64>,
    active: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    motion: Arc<tokio::sync::Mutex<()>>,
    status: Arc<Mutex<SessionStatus>>,
}

impl Player {
    pub fn new(
        joints: SharedJoints,
        gate: PowerGate,
        telemetry: Arc<dyn TelemetrySink>,
        speed: u8,
    ) -> Self {
        Self {
            joints,
            gate,
            telemetry,
            speed: Arc::new(AtomicU8::new(clamp_speed(speed))),
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(Mutex::new(None)),
            motion: Arc::new(tokio::sync::Mutex::new(())),
            status: Arc::new(Mutex::new(SessionStatus::default())),
        }
    }

    /// Motor speed in percent, used for interpolated moves.
    pub fn speed(&self) -> u8 {
        self.speed.load(Ordering::Relaxed)
    }

    /// Set the motor speed, clamped to 10..=100. Takes effect on the next play.
    pub fn set_speed(&self, speed: u8) -> u8 {
        let speed = clamp_speed(speed);
        self.speed.store(speed, Ordering::Relaxed);
        speed
    }

    /// State of the most recent session.
    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel the running session, if any. It stops at its next step boundary.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((id, cancel)) = active.as_ref() {
            tracing::debug!("Cancelling motion session {}", id);
            cancel.cancel();
        }
    }

    /// Perform a gesture, returning once it completes or is interrupted.
    pub async fn play(&self, gesture: &Gesture) -> PlayOutcome {
        if !self.gate.is_open() {
            tracing::debug!("Play ignored: power is off");
            return PlayOutcome::GateClosed;
        }
        let epoch = self.gate.epoch();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((prev, prev_cancel)) = active.replace((id, cancel.clone())) {
                tracing::info!("Session {} superseded by session {}", prev, id);
                prev_cancel.cancel();
            }
        }

        // Wait for the previous session to leave the arm.
        let _motion = self.motion.lock().await;

        let session = MotionSession {
            id,
            cancel,
            gate: self.gate.clone(),
            epoch,
            status: self.status.clone(),
        };
        let start = self.joints.snapshot();
        let total_steps = match gesture {
            Gesture::Pose(_) => crate::interpolate::STEPS as usize + 1,
            Gesture::Recorded(rec) => rec.len(),
        };
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            *status = SessionStatus {
                id,
                phase: Phase::Running,
                step: 0,
                total_steps,
                start,
            };
        }

        let completed = if session.interrupted() {
            false
        } else {
            match gesture {
                Gesture::Pose(target) => self.run_move(&session, start, *target).await,
                Gesture::Recorded(rec) => self.run_replay(&session, rec).await,
            }
        };

        self.finish(&session, completed)
    }

    async fn run_move(
        &self,
        session: &MotionSession,
        start: JointState,
        target: JointState,
    ) -> bool {
        let trajectory = Trajectory::new(start, target, self.speed());
        let delay = trajectory.step_delay();
        tracing::info!(
            "Session {}: move {:?} -> {:?} ({}ms/step)",
            session.id,
            trajectory.start().to_array(),
            trajectory.target().to_array(),
            delay.as_millis()
        );
        for (step, pose) in trajectory.enumerate() {
            if step > 0 && !session.pause(delay).await {
                return false;
            }
            if !self.apply_step(session, step, &pose) {
                return false;
            }
        }
        true
    }

    async fn run_replay(&self, session: &MotionSession, rec: &Recording) -> bool {
        tracing::info!(
            "Session {}: replay {} frames over {}ms",
            session.id,
            rec.len(),
            rec.duration().as_millis()
        );
        let mut delays = rec.delays();
        for (step, frame) in rec.frames().iter().enumerate() {
            if step > 0 {
                let delay = delays.next().unwrap_or_default();
                if !session.pause(delay).await {
                    return false;
                }
            }
            if !self.apply_step(session, step, &frame.pose) {
                return false;
            }
        }
        true
    }

    fn apply_step(&self, session: &MotionSession, step: usize, pose: &JointState) -> bool {
        if session.interrupted() {
            return false;
        }
        self.joints.apply(pose);
        session.update(|s| s.step = step);
        true
    }

    fn finish(&self, session: &MotionSession, completed: bool) -> PlayOutcome {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(active.as_ref(), Some((id, _)) if *id == session.id) {
                *active = None;
            }
        }

        let pose = self.joints.snapshot();
        if completed {
            session.update(|s| s.phase = Phase::Completed);
            tracing::info!("Session {} completed", session.id);
            let forces = ForceReadings::from_pose(&pose, self.gate.is_open());
            self.telemetry
                .emit(TelemetryEvent::new(EventType::Gesture, pose, &forces));
            PlayOutcome::Completed(pose)
        } else {
            session.update(|s| s.phase = Phase::Cancelled);
            tracing::info!(
                "Session {} cancelled at {:?}",
                session.id,
                pose.to_array()
            );
            PlayOutcome::Cancelled(pose)
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("speed", &self.speed())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
