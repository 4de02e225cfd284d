use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use bnode_model::PoolEvent;

/// Consumer of worker pool lifecycle events.
///
/// Each subscriber gets its own bounded queue and worker; a slow subscriber
/// loses events instead of slowing the pool down.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &PoolEvent);

    fn name(&self) -> &'static str;

    fn queue_capacity(&self) -> usize {
        1024
    }
}

struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<PoolEvent>>,
    dropped: AtomicU64,
}

/// Fan-out of pool events to subscribers.
#[derive(Clone, Default)]
pub struct Bus {
    lanes: Arc<Vec<Lane>>,
}

impl Bus {
    /// Starts one worker per subscriber. Must be called inside a tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let lanes = subscribers
            .into_iter()
            .map(|sub| {
                let (tx, mut rx) = mpsc::channel::<Arc<PoolEvent>>(sub.queue_capacity().max(1));
                let name = sub.name();
                tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        sub.on_event(&ev).await;
                    }
                    trace!(subscriber = name, "subscriber worker stopped");
                });
                Lane {
                    name,
                    tx,
                    dropped: AtomicU64::new(0),
                }
            })
            .collect();

        Self {
            lanes: Arc::new(lanes),
        }
    }

    /// Bus without subscribers.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PoolEvent) {
        if self.lanes.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for lane in self.lanes.iter() {
            if lane.tx.try_send(Arc::clone(&event)).is_err() {
                let n = lane.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!(subscriber = lane.name, dropped = n, "subscriber queue full; event dropped");
                }
            }
        }
    }

    /// Events dropped so far for the named subscriber.
    pub fn dropped(&self, name: &str) -> u64 {
        self.lanes
            .iter()
            .filter(|l| l.name == name)
            .map(|l| l.dropped.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnode_model::EventKind;
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<EventKind>>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &PoolEvent) {
            self.seen.lock().await.push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn events_reach_every_subscriber_in_order() {
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let bus = Bus::new(vec![
            Arc::new(Recorder { seen: a.clone() }),
            Arc::new(Recorder { seen: b.clone() }),
        ]);

        bus.emit(PoolEvent::new(EventKind::PoolStarted));
        bus.emit(PoolEvent::new(EventKind::ShutdownRequested));

        for _ in 0..50 {
            if a.lock().await.len() == 2 && b.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let expected = vec![EventKind::PoolStarted, EventKind::ShutdownRequested];
        assert_eq!(*a.lock().await, expected);
        assert_eq!(*b.lock().await, expected);
    }

    #[test]
    fn silent_bus_accepts_events() {
        let bus = Bus::silent();
        bus.emit(PoolEvent::new(EventKind::PoolStarted));
        assert_eq!(bus.dropped("journal"), 0);
    }
}
