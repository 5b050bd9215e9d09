//! Power gate shared by every motion-producing component.
//!
//! The gate is backed by a `tokio::sync::watch` channel so that suspended
//! motion steps can wake up the moment power is cut instead of waiting out
//! their delay. Besides the on/off flag it counts power cuts: a session that
//! remembers the count at its start sees a cut even if power came back on
//! before the session was next polled.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Power {
    on: bool,
    /// Number of on -> off transitions so far.
    cuts: u64,
}

/// Process-wide power flag. Cheap to clone; all clones share one state.
#[derive(Clone, Debug)]
pub struct PowerGate {
    tx: Arc<watch::Sender<Power>>,
}

impl PowerGate {
    /// Create a gate in the given state.
    pub fn new(powered: bool) -> Self {
        let (tx, _rx) = watch::channel(Power {
            on: powered,
            cuts: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Check if power is on.
    pub fn is_open(&self) -> bool {
        self.tx.borrow().on
    }

    /// Switch power on or off. Returns the previous state.
    ///
    /// Closing the gate does not touch the joint state; in-flight motion
    /// stops at its next step boundary. Opening it resumes nothing.
    pub fn set(&self, powered: bool) -> bool {
        let mut previous = powered;
        self.tx.send_if_modified(|power| {
            previous = power.on;
            if power.on == powered {
                return false;
            }
            power.on = powered;
            if !powered {
                power.cuts += 1;
            }
            true
        });
        if previous != powered {
            tracing::info!("Power {}", if powered { "on" } else { "off" });
        }
        previous
    }

    /// Number of power cuts so far. Record it when a session starts and
    /// pass it to [`cut_since`](Self::cut_since) or
    /// [`wait_cut`](Self::wait_cut).
    pub fn epoch(&self) -> u64 {
        self.tx.borrow().cuts
    }

    /// Check if power is off now or was cut at any point after `epoch`.
    pub fn cut_since(&self, epoch: u64) -> bool {
        let power = *self.tx.borrow();
        !power.on || power.cuts != epoch
    }

    /// Resolve once [`cut_since`](Self::cut_since) holds for `epoch`.
    /// Resolves immediately if it already does.
    pub async fn wait_cut(&self, epoch: u64) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so wait_for cannot fail here.
        let _ = rx.wait_for(|p| !p.on || p.cuts != epoch).await;
    }

    /// Resolve once the gate is closed. Resolves immediately if it already is.
    pub async fn closed(&self) {
        self.wait_cut(self.epoch()).await
    }
}

impl Default for PowerGate {
    fn default() -> Self {
        Self::new(true)
    }
}
