//! Shared health-check ticker.
//!
//! One ticker task feeds a broadcast channel; every device session holds its
//! own receiver, so each live session observes every tick.

use std::time::Duration;

use tokio::select;
use tokio::sync::broadcast;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

/// Ticks buffered per receiver before it is reported as lagging.
const TICK_BUFFER: usize = 16;

/// A unitless health-check tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

#[derive(Debug, Clone)]
pub struct Heartbeat {
    pulse: Duration,
    sender: broadcast::Sender<Tick>,
}

impl Heartbeat {
    /// A zero `pulse` disables health polling.
    pub fn new(pulse: Duration) -> Self {
        let (sender, _) = broadcast::channel(TICK_BUFFER);
        Self { pulse, sender }
    }

    pub fn pulse(&self) -> Duration {
        self.pulse
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.sender.subscribe()
    }

    /// Broadcasts one tick, returning how many sessions received it.
    pub(crate) fn beat(&self) -> usize {
        // no live sessions is not an error
        self.sender.send(Tick).unwrap_or(0)
    }

    /// Sends one tick per pulse until `stop` fires. Returns at once when
    /// polling is disabled; subscribers then never see a tick.
    pub async fn run(&self, stop: CancellationToken) {
        if self.pulse.is_zero() {
            info!("Health check polling disabled");
            return;
        }

        info!("Heart beating every {} seconds", self.pulse.as_secs());
        let mut ticker = interval_at(Instant::now() + self.pulse, self.pulse);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = stop.cancelled() => {
                    info!("Heartbeat stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let receivers = self.beat();
                    debug!(receivers, "heartbeat");
                }
            }
        }
    }
}
