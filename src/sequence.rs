//! Sequence runner.
//!
//! Plays an ordered list of gestures, pausing after each one, for a number of
//! loops. The runner only checks for power loss and cancellation between
//! gestures; inside a gesture the player's own step-boundary rules apply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::gate::PowerGate;
use crate::gesture::{Gesture, GestureCatalog, SequenceRecord};
use crate::player::{PlayOutcome, Player};

/// One entry of a sequence: a gesture and the pause that follows it.
#[derive(Clone, Debug)]
pub struct SequenceStep {
    pub gesture: Gesture,
    pub delay: Duration,
}

impl SequenceStep {
    pub fn new(gesture: impl Into<Gesture>, delay: Duration) -> Self {
        Self {
            gesture: gesture.into(),
            delay,
        }
    }
}

/// What the runner plays.
#[derive(Clone, Debug)]
pub struct SequenceSpec {
    pub steps: Vec<SequenceStep>,
    pub loop_count: u32,
}

impl SequenceSpec {
    /// Build and validate a spec.
    pub fn new(steps: Vec<SequenceStep>, loop_count: u32) -> Result<Self> {
        let spec = Self { steps, loop_count };
        spec.validate()?;
        Ok(spec)
    }

    /// Resolve a stored sequence against a gesture catalog.
    pub fn from_record(record: &SequenceRecord, catalog: &GestureCatalog) -> Result<Self> {
        if record.timings.len() != record.gesture_ids.len() {
            return Err(EngineError::validation(format!(
                "sequence '{}' has {} gestures but {} timings",
                record.name,
                record.gesture_ids.len(),
                record.timings.len()
            )));
        }
        let steps = record
            .gesture_ids
            .iter()
            .zip(&record.timings)
            .map(|(id, &ms)| {
                let gesture = catalog
                    .get(id)
                    .ok_or_else(|| EngineError::UnknownGesture(id.clone()))?;
                Ok(SequenceStep::new(gesture.gesture(), Duration::from_millis(ms)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(steps, record.loop_count)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EngineError::validation("sequence has no gestures"));
        }
        if self.loop_count == 0 {
            return Err(EngineError::validation("loop count must be at least 1"));
        }
        Ok(())
    }

    /// Number of gesture plays in a full run.
    pub fn total_plays(&self) -> usize {
        self.steps.len() * self.loop_count as usize
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every gesture of every loop completed.
    Completed { plays: usize },
    /// Stopped early; `plays` gestures had completed.
    Cancelled { plays: usize },
    /// Power was off; nothing happened.
    GateClosed,
}

/// Runs sequences on a [`Player`]. At most one run is active at a time.
#[derive(Clone, Debug)]
pub struct SequenceRunner {
    player: Player,
    gate: PowerGate,
    next_id: Arc<AtomicU64>,
    active: Arc<Mutex<Option<(u64, CancellationToken)>>>,
}

impl SequenceRunner {
    pub fn new(player: Player, gate: PowerGate) -> Self {
        Self {
            player,
            gate,
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Stop the active run at its next gesture boundary.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, cancel)) = active.as_ref() {
            cancel.cancel();
        }
    }

    /// Play `spec` to completion or until interrupted.
    ///
    /// An invalid spec is rejected before anything moves. A previous run is
    /// cancelled when this one starts.
    pub async fn run(&self, spec: &SequenceSpec) -> Result<SequenceOutcome> {
        spec.validate()?;
        if !self.gate.is_open() {
            tracing::debug!("Sequence ignored: power is off");
            return Ok(SequenceOutcome::GateClosed);
        }
        let epoch = self.gate.epoch();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((prev, prev_cancel)) = active.replace((id, cancel.clone())) {
                tracing::info!("Sequence run {} superseded by run {}", prev, id);
                prev_cancel.cancel();
            }
        }

        tracing::info!(
            "Sequence run {}: {} gestures x {} loops",
            id,
            spec.steps.len(),
            spec.loop_count
        );
        let outcome = self.run_loops(spec, &cancel, epoch).await;

        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(active.as_ref(), Some((active_id, _)) if *active_id == id) {
                *active = None;
            }
        }
        tracing::info!("Sequence run {} finished: {:?}", id, outcome);
        Ok(outcome)
    }

    async fn run_loops(
        &self,
        spec: &SequenceSpec,
        cancel: &CancellationToken,
        epoch: u64,
    ) -> SequenceOutcome {
        let total = spec.total_plays();
        let mut plays = 0;

        for lap in 0..spec.loop_count {
            tracing::debug!("Loop {}/{}", lap + 1, spec.loop_count);
            for step in &spec.steps {
                if cancel.is_cancelled() || self.gate.cut_since(epoch) {
                    return SequenceOutcome::Cancelled { plays };
                }
                match self.player.play(&step.gesture).await {
                    PlayOutcome::Completed(_) => plays += 1,
                    PlayOutcome::Cancelled(_) | PlayOutcome::GateClosed => {
                        return SequenceOutcome::Cancelled { plays };
                    }
                }
                if plays < total && !self.pause(step.delay, cancel, epoch).await {
                    return SequenceOutcome::Cancelled { plays };
                }
            }
        }

        SequenceOutcome::Completed { plays }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken, epoch: u64) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.gate.wait_cut(epoch) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::presets;
    use crate::joint::{JointState, SharedJoints};
    use crate::telemetry::{EventType, TelemetryChannel, TelemetryEvent};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Fixture = (
        SequenceRunner,
        SharedJoints,
        PowerGate,
        mpsc::Receiver<TelemetryEvent>,
    );

    fn runner(speed: u8) -> Fixture {
        let joints = SharedJoints::default();
        let gate = PowerGate::new(true);
        let (sink, rx) = TelemetryChannel::new(64);
        let player = Player::new(joints.clone(), gate.clone(), Arc::new(sink), speed);
        (SequenceRunner::new(player, gate.clone()), joints, gate, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_in_order_with_delays() {
        let (runner, joints, _, mut rx) = runner(100);
        let g1 = presets::grip();
        let g2 = presets::peace();
        let spec = SequenceSpec::new(
            vec![
                SequenceStep::new(g1, Duration::from_millis(500)),
                SequenceStep::new(g2, Duration::from_millis(500)),
            ],
            2,
        )
        .unwrap();

        let arrivals = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push((Instant::now(), event));
            }
            seen
        });

        let start = Instant::now();
        let outcome = runner.run(&spec).await.unwrap();
        assert_eq!(outcome, SequenceOutcome::Completed { plays: 4 });
        // Three pauses between four plays; no pause after the last one.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert_eq!(joints.snapshot(), g2);

        drop(runner);
        let seen = arrivals.await.unwrap();
        let poses: Vec<JointState> = seen.iter().map(|(_, e)| e.joint_data).collect();
        assert_eq!(poses, vec![g1, g2, g1, g2]);
        assert!(seen.iter().all(|(_, e)| e.event_type == EventType::Gesture));
        for pair in seen.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sequence_rejected() {
        let (runner, joints, _, _rx) = runner(50);
        let spec = SequenceSpec {
            steps: Vec::new(),
            loop_count: 1,
        };
        let err = runner.run(&spec).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(joints.snapshot(), JointState::ZERO);
        assert!(SequenceSpec::new(Vec::new(), 3).is_err());
    }

    #[test]
    fn test_zero_loops_rejected() {
        let steps = vec![SequenceStep::new(presets::ok(), Duration::ZERO)];
        assert!(SequenceSpec::new(steps, 0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_off_stops_between_gestures() {
        let (runner, joints, gate, _rx) = runner(100);
        let spec = SequenceSpec::new(
            vec![
                SequenceStep::new(presets::grip(), Duration::from_secs(2)),
                SequenceStep::new(presets::point(), Duration::from_secs(2)),
            ],
            3,
        )
        .unwrap();
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(&spec).await })
        };

        // First gesture is done and the runner is pausing after it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.set(false);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, SequenceOutcome::Cancelled { plays: 1 });
        assert_eq!(joints.snapshot(), presets::grip());

        gate.set(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(joints.snapshot(), presets::grip(), "nothing resumes on power on");
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_pulse_during_pause_stops_run() {
        let (runner, joints, gate, _rx) = runner(100);
        let spec = SequenceSpec::new(
            vec![
                SequenceStep::new(presets::grip(), Duration::from_secs(2)),
                SequenceStep::new(presets::point(), Duration::from_secs(2)),
            ],
            3,
        )
        .unwrap();
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(&spec).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.set(false);
        gate.set(true);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, SequenceOutcome::Cancelled { plays: 1 });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(joints.snapshot(), presets::grip());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_while_off_is_noop() {
        let (runner, _, gate, _rx) = runner(50);
        gate.set(false);
        let spec = SequenceSpec::new(vec![SequenceStep::new(presets::grip(), Duration::ZERO)], 1)
            .unwrap();
        assert_eq!(runner.run(&spec).await.unwrap(), SequenceOutcome::GateClosed);
    }

    #[test]
    fn test_from_record() {
        let catalog = GestureCatalog::with_presets();
        let record = SequenceRecord::new(
            "s1",
            "Demo",
            vec!["preset-grip".into(), "preset-ok".into()],
            2,
        );
        let spec = SequenceSpec::from_record(&record, &catalog).unwrap();
        assert_eq!(spec.total_plays(), 4);
        assert_eq!(spec.steps[1].delay, Duration::from_millis(2000));
        assert_eq!(spec.steps[1].gesture.final_pose(), Some(presets::ok()));

        let mut bad = record.clone();
        bad.gesture_ids.push("missing".into());
        bad.timings.push(100);
        assert!(matches!(
            SequenceSpec::from_record(&bad, &catalog),
            Err(EngineError::UnknownGesture(id)) if id == "missing"
        ));

        let mut mismatched = record;
        mismatched.timings.pop();
        assert!(matches!(
            SequenceSpec::from_record(&mismatched, &catalog),
            Err(EngineError::Validation(_))
        ));
    }
}
