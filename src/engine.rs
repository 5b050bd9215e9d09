//! The arm engine: one owner for the pose, the power gate and the active
//! motion sessions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bionic_arm::{presets, ArmEngine, EngineConfig, LogSink};
//!
//! # async fn demo() {
//! let engine = ArmEngine::new(EngineConfig::default(), Arc::new(LogSink));
//! engine.play_gesture(&presets::grip().into()).await;
//! println!("{:?}", engine.snapshot());
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::diagnostics::{run_diagnostics, DiagnosticStatus};
use crate::error::Result;
use crate::force::ForceReadings;
use crate::gate::PowerGate;
use crate::gesture::Gesture;
use crate::joint::{Joint, JointState, SharedJoints};
use crate::player::{PlayOutcome, Player, SessionStatus};
use crate::recorder::{Recorder, Recording, RecordingHandle};
use crate::sequence::{SequenceOutcome, SequenceRunner, SequenceSpec};
use crate::telemetry::{EventType, TelemetryEvent, TelemetrySink};

/// Result of a direct joint write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointUpdate {
    /// The joint was written. `clamped` is set when the requested value was
    /// out of range and the nearest bound was stored instead.
    Applied { pose: JointState, clamped: bool },
    /// Power was off; nothing was written.
    GateClosed,
}

/// Result of a calibration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Calibration {
    Completed { count: u64 },
    Interrupted,
    GateClosed,
}

/// Motion control engine for the arm. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ArmEngine {
    joints: SharedJoints,
    gate: PowerGate,
    player: Player,
    runner: SequenceRunner,
    recorder: Recorder,
    telemetry: Arc<dyn TelemetrySink>,
    calibration_time: Duration,
    calibrations: Arc<AtomicU64>,
}

impl ArmEngine {
    /// Build an engine with every joint at zero.
    pub fn new(config: EngineConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::with_pose(config, telemetry, JointState::ZERO)
    }

    /// Build an engine starting from `pose` (clamped).
    pub fn with_pose(
        config: EngineConfig,
        telemetry: Arc<dyn TelemetrySink>,
        pose: JointState,
    ) -> Self {
        let config = config.normalized();
        let joints = SharedJoints::new(pose);
        let gate = PowerGate::new(config.powered);
        let player = Player::new(
            joints.clone(),
            gate.clone(),
            telemetry.clone(),
            config.motor_speed,
        );
        let runner = SequenceRunner::new(player.clone(), gate.clone());
        let recorder = Recorder::new(joints.clone(), gate.clone(), config.sample_period());
        Self {
            joints,
            gate,
            player,
            runner,
            recorder,
            telemetry,
            calibration_time: config.calibration_time(),
            calibrations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copy of the current pose.
    pub fn snapshot(&self) -> JointState {
        self.joints.snapshot()
    }

    pub fn is_powered(&self) -> bool {
        self.gate.is_open()
    }

    /// Switch power. Turning it off stops running motion at its next step
    /// and leaves the arm where it is.
    pub fn set_power(&self, powered: bool) {
        self.gate.set(powered);
    }

    /// Handle to the shared power gate.
    pub fn gate(&self) -> &PowerGate {
        &self.gate
    }

    pub fn speed(&self) -> u8 {
        self.player.speed()
    }

    pub fn set_speed(&self, speed: u8) -> u8 {
        self.player.set_speed(speed)
    }

    /// Write one joint directly. Out-of-range values are clamped.
    pub fn set_joint(&self, joint: Joint, degrees: i32) -> JointUpdate {
        if !self.gate.is_open() {
            return JointUpdate::GateClosed;
        }
        let pose = self.joints.update(joint, degrees);
        let clamped = pose.get(joint) != degrees;
        if clamped {
            tracing::debug!("{} = {} clamped to {}", joint, degrees, pose.get(joint));
        }
        self.emit(EventType::JointUpdate, pose);
        JointUpdate::Applied { pose, clamped }
    }

    /// Write one joint by wire name (`"thumb"`, `"elbow"`, ...).
    pub fn set_joint_by_name(&self, name: &str, degrees: i32) -> Result<JointUpdate> {
        let joint: Joint = name.parse()?;
        Ok(self.set_joint(joint, degrees))
    }

    /// Snap every joint to zero immediately.
    pub fn reset_position(&self) -> bool {
        if !self.gate.is_open() {
            return false;
        }
        self.player.cancel();
        self.joints.apply(&JointState::ZERO);
        true
    }

    /// Play one gesture. Cancels any gesture already playing.
    pub async fn play_gesture(&self, gesture: &Gesture) -> PlayOutcome {
        self.player.play(gesture).await
    }

    /// Play a sequence. Cancels any sequence already running.
    pub async fn play_sequence(&self, spec: &SequenceSpec) -> Result<SequenceOutcome> {
        self.runner.run(spec).await
    }

    /// Stop whatever is moving the arm, at the next step boundary.
    pub fn cancel(&self) {
        self.runner.cancel();
        self.player.cancel();
    }

    /// State of the most recent motion session.
    pub fn session(&self) -> SessionStatus {
        self.player.status()
    }

    /// Start recording. `None` when power is off.
    pub async fn start_recording(&self) -> Option<RecordingHandle> {
        self.recorder.start().await
    }

    /// Stop a recording session and take its frames.
    pub async fn stop_recording(&self, handle: RecordingHandle) -> Recording {
        handle.stop().await
    }

    /// Derived finger forces for the current pose.
    pub fn forces(&self) -> ForceReadings {
        ForceReadings::from_pose(&self.snapshot(), self.is_powered())
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticStatus> {
        run_diagnostics(&self.snapshot(), self.is_powered())
    }

    /// Number of calibrations completed since start.
    pub fn calibration_count(&self) -> u64 {
        self.calibrations.load(Ordering::Relaxed)
    }

    /// Run a calibration cycle and report it to telemetry.
    pub async fn calibrate(&self) -> Calibration {
        if !self.gate.is_open() {
            return Calibration::GateClosed;
        }
        let epoch = self.gate.epoch();
        tracing::info!(
            "Calibrating ({}ms)",
            self.calibration_time.as_millis()
        );
        tokio::select! {
            biased;
            _ = self.gate.wait_cut(epoch) => {
                tracing::warn!("Calibration interrupted by power off");
                return Calibration::Interrupted;
            }
            _ = tokio::time::sleep(self.calibration_time) => {}
        }
        let pose = self.snapshot();
        let forces = ForceReadings::from_pose(&pose, true);
        self.telemetry.emit(
            TelemetryEvent::new(EventType::Calibration, pose, &forces).with_meta("success", true),
        );
        let count = self.calibrations.fetch_add(1, Ordering::Relaxed) + 1;
        Calibration::Completed { count }
    }

    fn emit(&self, event_type: EventType, pose: JointState) {
        let forces = ForceReadings::from_pose(&pose, self.gate.is_open());
        self.telemetry
            .emit(TelemetryEvent::new(event_type, pose, &forces));
    }
}

impl std::fmt::Debug for ArmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmEngine")
            .field("pose", &self.snapshot())
            .field("powered", &self.is_powered())
            .field("player", &self.player)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::presets;
    use crate::telemetry::{NullSink, TelemetryChannel};

    #[test]
    fn test_set_joint_clamps() {
        let (sink, mut rx) = TelemetryChannel::new(8);
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(sink));
        match engine.set_joint(Joint::Ring, 150) {
            JointUpdate::Applied { pose, clamped } => {
                assert!(clamped);
                assert_eq!(pose.ring, 90);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.snapshot().ring, 90);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::JointUpdate);
        assert_eq!(event.force_data["ring"], 100);
    }

    #[test]
    fn test_set_joint_by_name() {
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(NullSink));
        assert!(engine.set_joint_by_name("wrist", -30).is_ok());
        assert_eq!(engine.snapshot().wrist, -30);
        assert!(engine.set_joint_by_name("tail", 10).is_err());
    }

    #[tokio::test]
    async fn test_power_off_blocks_direct_control() {
        let engine = ArmEngine::with_pose(
            EngineConfig::default(),
            Arc::new(NullSink),
            presets::point(),
        );
        engine.set_power(false);
        assert_eq!(engine.set_joint(Joint::Thumb, 0), JointUpdate::GateClosed);
        assert!(!engine.reset_position());
        assert!(engine.start_recording().await.is_none());
        assert_eq!(engine.snapshot(), presets::point());
        assert_eq!(engine.forces(), ForceReadings::default());

        engine.set_power(true);
        assert!(engine.reset_position());
        assert_eq!(engine.snapshot(), JointState::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibrate() {
        let (sink, mut rx) = TelemetryChannel::new(8);
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(sink));
        let start = tokio::time::Instant::now();
        assert_eq!(engine.calibrate().await, Calibration::Completed { count: 1 });
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::Calibration);
        assert_eq!(event.metadata["success"], true);

        engine.set_power(false);
        assert_eq!(engine.calibrate().await, Calibration::GateClosed);
        assert_eq!(engine.calibration_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_interrupted() {
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(NullSink));
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.calibrate().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.set_power(false);
        assert_eq!(task.await.unwrap(), Calibration::Interrupted);
        assert_eq!(engine.calibration_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_pulse_interrupts_calibration() {
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(NullSink));
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.calibrate().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.set_power(false);
        engine.set_power(true);
        assert_eq!(task.await.unwrap(), Calibration::Interrupted);
        assert_eq!(engine.calibration_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_then_replay() {
        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(NullSink));
        let handle = engine.start_recording().await.unwrap();
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.play_gesture(&presets::peace().into()).await });
        }
        // Samples land at 100ms..=2400ms; the move ends at 2000ms.
        tokio::time::sleep(Duration::from_millis(2450)).await;
        let recording = engine.stop_recording(handle).await;
        assert_eq!(recording.len(), 24);
        assert_eq!(recording.last().unwrap().pose, presets::peace());

        assert!(engine.reset_position());
        let outcome = engine.play_gesture(&recording.clone().into()).await;
        assert_eq!(outcome, PlayOutcome::Completed(presets::peace()));
        assert_eq!(engine.session().total_steps, 24);

        let record = recording.to_record("rec-1", "Peace wave", "").unwrap();
        assert_eq!(record.duration, 2300);
        assert_eq!(record.joint_data, recording.first().unwrap().pose);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_sequence() {
        use crate::sequence::SequenceStep;

        let engine = ArmEngine::new(EngineConfig::default(), Arc::new(NullSink));
        let spec = SequenceSpec::new(
            vec![
                SequenceStep::new(presets::grip(), Duration::from_millis(500)),
                SequenceStep::new(presets::open(), Duration::from_millis(500)),
            ],
            3,
        )
        .unwrap();
        let task = {
            let engine = engine.clone();
            let spec = spec.clone();
            tokio::spawn(async move { engine.play_sequence(&spec).await })
        };
        // First move takes 2000ms at speed 50, then a 500ms pause.
        tokio::time::sleep(Duration::from_millis(2200)).await;
        engine.cancel();
        assert_eq!(
            task.await.unwrap().unwrap(),
            SequenceOutcome::Cancelled { plays: 1 }
        );
        assert_eq!(engine.snapshot(), presets::grip());
    }
}
