//! Gesture recorder.
//!
//! Samples the live pose on a fixed period into a [`Recording`]. A recording
//! session is an owned [`RecordingHandle`]: `Recorder::start` hands it out and
//! [`RecordingHandle::stop`] consumes it and returns the frames. Dropping the
//! handle without stopping ends the session and discards the frames.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{EngineError, Result};
use crate::gate::PowerGate;
use crate::gesture::GestureRecord;
use crate::joint::{JointState, SharedJoints};

/// Default sampling period.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

/// One sampled pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub pose: JointState,
    pub timestamp: Instant,
}

/// Time-ordered frames captured by one recording session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recording {
    frames: Vec<Frame>,
}

impl Recording {
    /// Wrap frames, ordering them by timestamp.
    pub fn from_frames(mut frames: Vec<Frame>) -> Self {
        frames.sort_by_key(|f| f.timestamp);
        Self { frames }
    }

    /// Build a recording of `poses` spaced `interval` apart, starting now.
    pub fn from_poses(poses: impl IntoIterator<Item = JointState>, interval: Duration) -> Self {
        let start = Instant::now();
        let frames = poses
            .into_iter()
            .enumerate()
            .map(|(i, pose)| Frame {
                pose: pose.clamped(),
                timestamp: start + interval * i as u32,
            })
            .collect();
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Time between the first and last frame. Zero with fewer than two frames.
    pub fn duration(&self) -> Duration {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => Duration::ZERO,
        }
    }

    /// Delay to wait after each frame before the next one. The last frame
    /// has none.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.frames
            .windows(2)
            .map(|w| w[1].timestamp.saturating_duration_since(w[0].timestamp))
    }

    /// Promote this recording to a gesture record for the gesture store.
    ///
    /// The stored pose is the first frame and the duration is the recording
    /// length in milliseconds.
    pub fn to_record(
        &self,
        id: impl Into<String>,
        name: &str,
        description: &str,
    ) -> Result<GestureRecord> {
        let first = self
            .first()
            .ok_or_else(|| EngineError::validation("recording has no frames"))?;
        if name.trim().is_empty() {
            return Err(EngineError::validation("gesture name is empty"));
        }
        Ok(GestureRecord {
            id: id.into(),
            name: name.trim().to_string(),
            description: description.to_string(),
            joint_data: first.pose,
            duration: self.duration().as_millis() as u64,
            is_preset: false,
        })
    }
}

/// Samples the shared pose while power is on.
#[derive(Clone, Debug)]
pub struct Recorder {
    joints: SharedJoints,
    gate: PowerGate,
    period: Duration,
}

impl Recorder {
    pub fn new(joints: SharedJoints, gate: PowerGate, period: Duration) -> Self {
        Self {
            joints,
            gate,
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start a recording session.
    ///
    /// Returns `None` without starting anything when power is off. The
    /// sampling task runs on the runtime that awaits this call.
    pub async fn start(&self) -> Option<RecordingHandle> {
        if !self.gate.is_open() {
            tracing::debug!("Recording not started: power is off");
            return None;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sample_loop(
            self.joints.clone(),
            self.gate.clone(),
            self.period,
            cancel.clone(),
        ));
        tracing::info!("Recording started ({}ms period)", self.period.as_millis());
        Some(RecordingHandle {
            guard: cancel.drop_guard(),
            task,
            started: Instant::now(),
        })
    }
}

/// An active recording session.
#[derive(Debug)]
pub struct RecordingHandle {
    guard: DropGuard,
    task: JoinHandle<Vec<Frame>>,
    started: Instant,
}

impl RecordingHandle {
    /// Time since the session started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop sampling and return everything captured so far.
    pub async fn stop(self) -> Recording {
        self.guard.disarm().cancel();
        let frames = match self.task.await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Recording task failed: {}", e);
                Vec::new()
            }
        };
        let recording = Recording::from_frames(frames);
        tracing::info!(
            "Recording stopped: {} frames over {}ms",
            recording.len(),
            recording.duration().as_millis()
        );
        recording
    }
}

async fn sample_loop(
    joints: SharedJoints,
    gate: PowerGate,
    period: Duration,
    cancel: CancellationToken,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    // First sample one period after start, not immediately.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !gate.is_open() {
                    continue;
                }
                frames.push(Frame {
                    pose: joints.snapshot(),
                    timestamp: Instant::now(),
                });
            }
        }
    }

    frames
}
