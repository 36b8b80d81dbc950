//! Per-kind device reporting loop behind `ListAndWatch`.

use std::sync::Arc;

use tokio::select;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::hardware::Hardware;
use crate::heartbeat::Tick;

/// Name of an allocatable class of hardware, e.g. `gpu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Health values understood by the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub health: Health,
}

/// Full device list; each one replaces the previous.
pub type Snapshot = Vec<DeviceRecord>;

/// Builds `count` records `{kind}0..{kind}{count-1}` sharing one health.
pub fn build_snapshot(kind: &ResourceKind, count: usize, health: Health) -> Snapshot {
    (0..count)
        .map(|i| DeviceRecord {
            id: format!("{kind}{i}"),
            health,
        })
        .collect()
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The plugin was stopped.
    Stopped,
    /// The receiving side hung up.
    ConsumerGone,
}

pub struct DeviceSession {
    kind: ResourceKind,
    hardware: Arc<dyn Hardware>,
    heartbeat: broadcast::Receiver<Tick>,
    stop: CancellationToken,
}

impl DeviceSession {
    pub fn new(
        kind: ResourceKind,
        hardware: Arc<dyn Hardware>,
        heartbeat: broadcast::Receiver<Tick>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            kind,
            hardware,
            heartbeat,
            stop,
        }
    }

    /// Emits an all-healthy snapshot, then one snapshot per heartbeat tick
    /// until stopped or `updates` is closed.
    ///
    /// The unit count is taken once at start; ticks only refresh health.
    pub async fn run(mut self, updates: mpsc::Sender<Snapshot>) -> SessionEnd {
        let count = self.hardware.count_units();
        info!(kind = %self.kind, count, "device session started");

        let initial = build_snapshot(&self.kind, count, Health::Healthy);
        if let Err(end) = emit(&updates, &self.stop, initial).await {
            return end;
        }

        let mut ticking = true;
        loop {
            select! {
                biased;
                _ = self.stop.cancelled() => {
                    info!(kind = %self.kind, "device session stopped");
                    return SessionEnd::Stopped;
                }
                _ = updates.closed() => {
                    info!(kind = %self.kind, "device list consumer disconnected");
                    return SessionEnd::ConsumerGone;
                }
                tick = self.heartbeat.recv(), if ticking => {
                    let ticks = match tick {
                        Ok(Tick) => 1,
                        // ticks evicted from the buffer are still owed a snapshot each
                        Err(RecvError::Lagged(missed)) => {
                            warn!(kind = %self.kind, missed, "session lagged behind heartbeat");
                            missed
                        }
                        Err(RecvError::Closed) => {
                            debug!(kind = %self.kind, "heartbeat closed");
                            ticking = false;
                            continue;
                        }
                    };

                    for _ in 0..ticks {
                        let health = if self.hardware.is_available() {
                            Health::Healthy
                        } else {
                            Health::Unhealthy
                        };
                        let snapshot = build_snapshot(&self.kind, count, health);
                        if let Err(end) = emit(&updates, &self.stop, snapshot).await {
                            return end;
                        }
                    }
                }
            }
        }
    }
}

async fn emit(
    updates: &mpsc::Sender<Snapshot>,
    stop: &CancellationToken,
    snapshot: Snapshot,
) -> Result<(), SessionEnd> {
    select! {
        biased;
        sent = updates.send(snapshot) => sent.map_err(|_| {
            warn!("failed to send device list, consumer is gone");
            SessionEnd::ConsumerGone
        }),
        _ = stop.cancelled() => Err(SessionEnd::Stopped),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::heartbeat::Heartbeat;

    #[derive(Default)]
    struct FakeHardware {
        units: AtomicUsize,
        unavailable: AtomicBool,
        probes: AtomicUsize,
    }

    impl FakeHardware {
        fn with_units(units: usize) -> Arc<Self> {
            let hardware = Self::default();
            hardware.units.store(units, Ordering::SeqCst);
            Arc::new(hardware)
        }

        fn set_available(&self, available: bool) {
            self.unavailable.store(!available, Ordering::SeqCst);
        }
    }

    impl Hardware for FakeHardware {
        fn count_units(&self) -> usize {
            self.units.load(Ordering::SeqCst)
        }

        fn is_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !self.unavailable.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        heartbeat: Heartbeat,
        stop: CancellationToken,
        snapshots: mpsc::Receiver<Snapshot>,
        task: tokio::task::JoinHandle<SessionEnd>,
    }

    fn start(hardware: Arc<FakeHardware>) -> Harness {
        let heartbeat = Heartbeat::new(Duration::from_secs(5));
        let stop = CancellationToken::new();
        let (tx, snapshots) = mpsc::channel(1);
        let session = DeviceSession::new(
            ResourceKind::from("gpu"),
            hardware,
            heartbeat.subscribe(),
            stop.clone(),
        );
        let task = tokio::spawn(session.run(tx));
        Harness {
            heartbeat,
            stop,
            snapshots,
            task,
        }
    }

    fn tick(harness: &Harness) {
        assert_eq!(harness.heartbeat.beat(), 1, "session should be subscribed");
    }

    #[test]
    fn snapshot_ids_are_positional() {
        let snapshot = build_snapshot(&ResourceKind::from("gpu"), 3, Health::Unhealthy);
        let ids: Vec<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["gpu0", "gpu1", "gpu2"]);
        assert!(snapshot.iter().all(|d| d.health == Health::Unhealthy));
    }

    #[test(tokio::test)]
    async fn emits_one_snapshot_per_tick() {
        let hardware = FakeHardware::with_units(2);
        let mut harness = start(hardware.clone());

        let initial = harness.snapshots.recv().await.expect("initial snapshot");
        assert_eq!(initial, build_snapshot(&"gpu".into(), 2, Health::Healthy));

        for _ in 0..3 {
            tick(&harness);
            let snapshot = harness.snapshots.recv().await.expect("tick snapshot");
            assert_eq!(snapshot.len(), 2, "list is rebuilt, never appended");
        }
        assert_eq!(hardware.probes.load(Ordering::SeqCst), 3);

        harness.stop.cancel();
        assert_eq!(harness.task.await.expect("no panic"), SessionEnd::Stopped);
        assert!(harness.snapshots.recv().await.is_none());
    }

    #[test(tokio::test)]
    async fn lagging_session_still_reports_every_tick() {
        const TICKS: usize = 20;
        let hardware = FakeHardware::with_units(2);
        let mut harness = start(hardware.clone());

        // more ticks than the heartbeat buffers before the session reads any
        for _ in 0..TICKS {
            tick(&harness);
        }

        let initial = harness.snapshots.recv().await.expect("initial snapshot");
        assert_eq!(initial.len(), 2);
        for i in 0..TICKS {
            let snapshot = harness.snapshots.recv().await.unwrap_or_else(|| panic!("snapshot {i}"));
            assert_eq!(snapshot, build_snapshot(&"gpu".into(), 2, Health::Healthy));
        }
        assert_eq!(hardware.probes.load(Ordering::SeqCst), TICKS);

        harness.stop.cancel();
        assert_eq!(harness.task.await.expect("no panic"), SessionEnd::Stopped);
        assert!(harness.snapshots.recv().await.is_none(), "no snapshot beyond the tick count");
    }

    #[test(tokio::test)]
    async fn health_follows_probe_and_count_is_kept() {
        let hardware = FakeHardware::with_units(2);
        let mut harness = start(hardware.clone());
        harness.snapshots.recv().await.expect("initial snapshot");

        tick(&harness);
        let healthy = harness.snapshots.recv().await.expect("snapshot");
        assert!(healthy.iter().all(|d| d.health == Health::Healthy));

        hardware.set_available(false);
        hardware.units.store(7, Ordering::SeqCst);
        tick(&harness);
        let unhealthy = harness.snapshots.recv().await.expect("snapshot");
        assert_eq!(unhealthy, build_snapshot(&"gpu".into(), 2, Health::Unhealthy));

        harness.stop.cancel();
        assert_eq!(harness.task.await.expect("no panic"), SessionEnd::Stopped);
    }

    #[test(tokio::test)]
    async fn stop_before_any_tick_yields_single_snapshot() {
        let mut harness = start(FakeHardware::with_units(4));

        harness.stop.cancel();
        assert_eq!(harness.task.await.expect("no panic"), SessionEnd::Stopped);

        let initial = harness.snapshots.recv().await.expect("initial snapshot");
        assert_eq!(initial.len(), 4);
        assert!(harness.snapshots.recv().await.is_none());
    }

    #[test(tokio::test)]
    async fn dropped_consumer_ends_session() {
        let mut harness = start(FakeHardware::with_units(1));
        harness.snapshots.recv().await.expect("initial snapshot");

        drop(harness.snapshots);
        assert_eq!(harness.task.await.expect("no panic"), SessionEnd::ConsumerGone);
    }

    #[test(tokio::test)]
    async fn closed_heartbeat_waits_for_stop() {
        let hardware = FakeHardware::with_units(1);
        let (tx, mut snapshots) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let receiver = {
            let heartbeat = Heartbeat::new(Duration::ZERO);
            heartbeat.subscribe()
        };
        let session = DeviceSession::new("gpu".into(), hardware.clone(), receiver, stop.clone());
        let task = tokio::spawn(session.run(tx));

        snapshots.recv().await.expect("initial snapshot");
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        stop.cancel();
        assert_eq!(task.await.expect("no panic"), SessionEnd::Stopped);
        assert_eq!(hardware.probes.load(Ordering::SeqCst), 0);
    }
}
