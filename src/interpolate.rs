//! Trajectory interpolation between two poses.
//!
//! A move is always 20 equal steps (21 poses counting both endpoints). Each
//! intermediate angle is rounded to a whole degree, halves toward +inf, so the
//! same move always produces the same poses.

use std::time::Duration;

use crate::joint::{Joint, JointState};

/// Number of steps in an interpolated move.
pub const STEPS: u32 = 20;

/// Slowest accepted motor speed, in percent.
pub const MIN_SPEED: u8 = 10;
/// Fastest accepted motor speed, in percent.
pub const MAX_SPEED: u8 = 100;

/// Clamp a motor speed percentage into `[MIN_SPEED, MAX_SPEED]`.
pub fn clamp_speed(speed: u8) -> u8 {
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Delay between two interpolation steps at the given speed.
///
/// `(100 - speed) * 2` ms: 0ms at full speed, 180ms at the slowest setting.
pub fn step_delay(speed: u8) -> Duration {
    let speed = clamp_speed(speed);
    Duration::from_millis(u64::from(MAX_SPEED - speed) * 2)
}

// Round to nearest, halves toward +inf.
fn round_half_up(x: f64) -> i32 {
    (x + 0.5).floor() as i32
}

/// Pose at step `step` of a move from `start` to `target`.
///
/// Step 0 is `start` and step [`STEPS`] is `target` exactly.
pub fn pose_at(start: &JointState, target: &JointState, step: u32) -> JointState {
    let step = step.min(STEPS);
    if step == STEPS {
        return *target;
    }
    let progress = f64::from(step) / f64::from(STEPS);
    let mut pose = JointState::ZERO;
    for joint in Joint::ALL {
        let from = f64::from(start.get(joint));
        let to = f64::from(target.get(joint));
        pose.set(joint, round_half_up(from + (to - from) * progress));
    }
    pose
}

/// Lazy sequence of poses for one interpolated move.
///
/// A clone continues from the same step independently of the original.
#[derive(Clone, Debug)]
pub struct Trajectory {
    start: JointState,
    target: JointState,
    delay: Duration,
    next: u32,
}

impl Trajectory {
    /// Plan a move from `start` to `target` at `speed` percent.
    pub fn new(start: JointState, target: JointState, speed: u8) -> Self {
        Self {
            start,
            target,
            delay: step_delay(speed),
            next: 0,
        }
    }

    pub fn start(&self) -> &JointState {
        &self.start
    }

    pub fn target(&self) -> &JointState {
        &self.target
    }

    /// Delay the caller should wait between two emitted poses.
    pub fn step_delay(&self) -> Duration {
        self.delay
    }

    /// Total number of poses in the move, endpoints included.
    pub fn pose_count(&self) -> usize {
        STEPS as usize + 1
    }

    /// Rewind to the first pose.
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for Trajectory {
    type Item = JointState;

    fn next(&mut self) -> Option<JointState> {
        if self.next > STEPS {
            return None;
        }
        let pose = pose_at(&self.start, &self.target, self.next);
        self.next += 1;
        Some(pose)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (STEPS + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Trajectory {}
