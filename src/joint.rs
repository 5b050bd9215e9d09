//! Joint model for the 8-DoF arm.
//!
//! The arm has three arm joints (`shoulder`, `elbow`, `wrist`) that rotate in
//! `[-90, 90]` degrees and five finger joints (`thumb` .. `pinky`) that flex
//! in `[0, 90]` degrees. Angles are whole degrees. Every write goes through
//! [`Joint::clamp`], so a [`JointState`] can never hold an out-of-range value.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Lower bound of the arm joints, in degrees.
pub const ARM_MIN: i32 = -90;
/// Upper bound of the arm joints, in degrees.
pub const ARM_MAX: i32 = 90;
/// Lower bound of the finger joints, in degrees.
pub const FINGER_MIN: i32 = 0;
/// Upper bound of the finger joints, in degrees.
pub const FINGER_MAX: i32 = 90;

/// One of the eight actuated joints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Joint {
    Shoulder,
    Elbow,
    Wrist,
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Joint {
    /// All joints, arm first, in wire order.
    pub const ALL: [Joint; 8] = [
        Joint::Shoulder,
        Joint::Elbow,
        Joint::Wrist,
        Joint::Thumb,
        Joint::Index,
        Joint::Middle,
        Joint::Ring,
        Joint::Pinky,
    ];

    /// The five finger joints.
    pub const FINGERS: [Joint; 5] = [
        Joint::Thumb,
        Joint::Index,
        Joint::Middle,
        Joint::Ring,
        Joint::Pinky,
    ];

    /// Field name used on the wire (`"shoulder"`, `"thumb"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Joint::Shoulder => "shoulder",
            Joint::Elbow => "elbow",
            Joint::Wrist => "wrist",
            Joint::Thumb => "thumb",
            Joint::Index => "index",
            Joint::Middle => "middle",
            Joint::Ring => "ring",
            Joint::Pinky => "pinky",
        }
    }

    /// Check if this is a finger joint.
    pub fn is_finger(self) -> bool {
        !matches!(self, Joint::Shoulder | Joint::Elbow | Joint::Wrist)
    }

    /// Closed range of legal angles for this joint.
    pub fn range(self) -> (i32, i32) {
        if self.is_finger() {
            (FINGER_MIN, FINGER_MAX)
        } else {
            (ARM_MIN, ARM_MAX)
        }
    }

    /// Clamp an angle into this joint's legal range.
    pub fn clamp(self, degrees: i32) -> i32 {
        let (min, max) = self.range();
        degrees.clamp(min, max)
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Joint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Joint::ALL
            .into_iter()
            .find(|j| j.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::UnknownJoint(s.to_string()))
    }
}

/// A complete pose of the arm.
///
/// Serializes to the `joint_data` object used by gesture records and
/// telemetry events. Deserialization clamps every field, so a pose read from
/// an external store is always legal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct JointState {
    pub shoulder: i32,
    pub elbow: i32,
    pub wrist: i32,
    pub thumb: i32,
    pub index: i32,
    pub middle: i32,
    pub ring: i32,
    pub pinky: i32,
}

impl JointState {
    /// All joints at zero: arm straight, hand open.
    pub const ZERO: JointState = JointState {
        shoulder: 0,
        elbow: 0,
        wrist: 0,
        thumb: 0,
        index: 0,
        middle: 0,
        ring: 0,
        pinky: 0,
    };

    /// Build a pose from raw angles, clamping each joint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shoulder: i32,
        elbow: i32,
        wrist: i32,
        thumb: i32,
        index: i32,
        middle: i32,
        ring: i32,
        pinky: i32,
    ) -> Self {
        Self::from_array([shoulder, elbow, wrist, thumb, index, middle, ring, pinky])
    }

    /// Build a pose with the arm at zero and the given finger angles.
    pub fn hand(thumb: i32, index: i32, middle: i32, ring: i32, pinky: i32) -> Self {
        Self::new(0, 0, 0, thumb, index, middle, ring, pinky)
    }

    /// Build a pose from angles in [`Joint::ALL`] order, clamping each joint.
    pub fn from_array(values: [i32; 8]) -> Self {
        let mut pose = JointState::ZERO;
        for (joint, value) in Joint::ALL.into_iter().zip(values) {
            pose.set(joint, value);
        }
        pose
    }

    /// Angles in [`Joint::ALL`] order.
    pub fn to_array(&self) -> [i32; 8] {
        [
            self.shoulder,
            self.elbow,
            self.wrist,
            self.thumb,
            self.index,
            self.middle,
            self.ring,
            self.pinky,
        ]
    }

    pub fn get(&self, joint: Joint) -> i32 {
        match joint {
            Joint::Shoulder => self.shoulder,
            Joint::Elbow => self.elbow,
            Joint::Wrist => self.wrist,
            Joint::Thumb => self.thumb,
            Joint::Index => self.index,
            Joint::Middle => self.middle,
            Joint::Ring => self.ring,
            Joint::Pinky => self.pinky,
        }
    }

    /// Write one joint, clamping into its range. Returns the stored value.
    pub fn set(&mut self, joint: Joint, degrees: i32) -> i32 {
        let value = joint.clamp(degrees);
        let slot = match joint {
            Joint::Shoulder => &mut self.shoulder,
            Joint::Elbow => &mut self.elbow,
            Joint::Wrist => &mut self.wrist,
            Joint::Thumb => &mut self.thumb,
            Joint::Index => &mut self.index,
            Joint::Middle => &mut self.middle,
            Joint::Ring => &mut self.ring,
            Joint::Pinky => &mut self.pinky,
        };
        *slot = value;
        value
    }

    /// Return a copy with every joint clamped into range.
    pub fn clamped(&self) -> Self {
        Self::from_array(self.to_array())
    }

    /// Check that every joint is within its legal range.
    pub fn is_valid(&self) -> bool {
        Joint::ALL.into_iter().all(|j| {
            let (min, max) = j.range();
            (min..=max).contains(&self.get(j))
        })
    }
}

// Raw mirror of the wire shape; converted through the clamping constructor.
#[derive(Deserialize)]
struct RawJointState {
    #[serde(default)]
    shoulder: i32,
    #[serde(default)]
    elbow: i32,
    #[serde(default)]
    wrist: i32,
    #[serde(default)]
    thumb: i32,
    #[serde(default)]
    index: i32,
    #[serde(default)]
    middle: i32,
    #[serde(default)]
    ring: i32,
    #[serde(default)]
    pinky: i32,
}

impl<'de> Deserialize<'de> for JointState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawJointState::deserialize(deserializer)?;
        Ok(JointState::new(
            raw.shoulder,
            raw.elbow,
            raw.wrist,
            raw.thumb,
            raw.index,
            raw.middle,
            raw.ring,
            raw.pinky,
        ))
    }
}

/// The live pose of the arm, shared between the player, the recorder and
/// direct joint control.
///
/// Every access copies a whole [`JointState`] under the lock, so readers
/// never observe a partially written pose.
#[derive(Clone, Debug, Default)]
pub struct SharedJoints {
    inner: Arc<Mutex<JointState>>,
}

impl SharedJoints {
    pub fn new(pose: JointState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pose.clamped())),
        }
    }

    // The pose is plain data; a panic elsewhere cannot leave it half written.
    fn lock(&self) -> MutexGuard<'_, JointState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current pose.
    pub fn snapshot(&self) -> JointState {
        *self.lock()
    }

    /// Replace the whole pose.
    pub fn apply(&self, pose: &JointState) {
        *self.lock() = pose.clamped();
    }

    /// Write one joint (clamped). Returns the resulting pose.
    pub fn update(&self, joint: Joint, degrees: i32) -> JointState {
        let mut pose = self.lock();
        pose.set(joint, degrees);
        *pose
    }
}
