//! Presence transitions and their delivery to the light controller.
//!
//! The tracker pushes [`PresenceEvent`]s into an unbounded channel and never
//! waits on the consumer. [`EventDispatcher`] drains the channel in order and
//! runs each collaborator call in its own task, so a failing or panicking
//! call is logged and the next event is still delivered.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::util::MacAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A transition derived by the presence tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A tracked device went from offline to online.
    Arrived {
        /// The device.
        link_address: MacAddr,
        /// Its IPv4 address, absent for Bluetooth-only confirmation.
        network_address: Option<Ipv4Addr>,
    },
    /// The online set became empty.
    AllDeparted,
}

/// Sending half of the event channel, held by the tracker.
pub type EventSender = mpsc::UnboundedSender<PresenceEvent>;

/// Receiving half of the event channel, held by the dispatcher.
pub type EventReceiver = mpsc::UnboundedReceiver<PresenceEvent>;

/// Create the channel connecting a tracker to a dispatcher.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Side effects driven by presence.
pub trait LightController: Send + Sync + 'static {
    /// Someone came home.
    fn on_arrive(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Everyone left.
    fn on_depart(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Time-of-day source.
pub trait SunsetProvider: Send + Sync {
    /// Whether the sun has set and not yet risen.
    fn is_past_sunset(&self) -> bool;
}

/// Delivers presence events to a [`LightController`].
pub struct EventDispatcher<L> {
    lights: Arc<L>,
    events: EventReceiver,
}

impl<L: LightController> EventDispatcher<L> {
    /// Create a dispatcher reading from `events`.
    #[must_use]
    pub const fn new(lights: Arc<L>, events: EventReceiver) -> Self {
        Self { lights, events }
    }

    /// Deliver events until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.dispatch(event).await;
        }
        tracing::info!("Presence event channel closed, dispatcher stopping");
    }

    /// Run the dispatcher as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn dispatch(&self, event: PresenceEvent) {
        let lights = Arc::clone(&self.lights);
        let (callback, call) = match event {
            PresenceEvent::Arrived {
                link_address,
                network_address,
            } => {
                tracing::info!(
                    mac = %link_address,
                    ip = ?network_address,
                    "Device arrived, running arrive action"
                );
                (
                    "on_arrive",
                    tokio::spawn(async move { lights.on_arrive().await }),
                )
            }
            PresenceEvent::AllDeparted => {
                tracing::info!("All devices departed, running depart action");
                (
                    "on_depart",
                    tokio::spawn(async move { lights.on_depart().await }),
                )
            }
        };

        match call.await {
            Ok(Ok(())) => tracing::debug!(callback, "Light action finished"),
            Ok(Err(e)) => tracing::error!(callback, error = %e, "Light action failed"),
            Err(e) => tracing::error!(callback, error = %e, "Light action panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingLights {
        arrivals: AtomicUsize,
        departures: AtomicUsize,
        fail_arrive: bool,
        panic_arrive: bool,
    }

    impl LightController for RecordingLights {
        async fn on_arrive(&self) -> anyhow::Result<()> {
            self.arrivals.fetch_add(1, Ordering::SeqCst);
            assert!(!self.panic_arrive, "bridge client bug");
            if self.fail_arrive {
                anyhow::bail!("bridge unreachable");
            }
            Ok(())
        }

        async fn on_depart(&self) -> anyhow::Result<()> {
            self.departures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn arrived() -> PresenceEvent {
        PresenceEvent::Arrived {
            link_address: MacAddr(0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01),
            network_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
        }
    }

    async fn deliver(lights: Arc<RecordingLights>, events: &[PresenceEvent]) {
        let (tx, rx) = channel();
        for event in events {
            tx.send(*event).unwrap();
        }
        drop(tx);
        EventDispatcher::new(lights, rx).run().await;
    }

    #[tokio::test]
    async fn test_maps_events_to_callbacks() {
        let lights = Arc::new(RecordingLights::default());
        deliver(
            Arc::clone(&lights),
            &[arrived(), arrived(), PresenceEvent::AllDeparted],
        )
        .await;

        assert_eq!(lights.arrivals.load(Ordering::SeqCst), 2);
        assert_eq!(lights.departures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_delivery() {
        let lights = Arc::new(RecordingLights {
            fail_arrive: true,
            ..Default::default()
        });
        deliver(Arc::clone(&lights), &[arrived(), PresenceEvent::AllDeparted]).await;

        assert_eq!(lights.arrivals.load(Ordering::SeqCst), 1);
        assert_eq!(lights.departures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let lights = Arc::new(RecordingLights {
            panic_arrive: true,
            ..Default::default()
        });
        deliver(
            Arc::clone(&lights),
            &[arrived(), PresenceEvent::AllDeparted, arrived()],
        )
        .await;

        assert_eq!(lights.arrivals.load(Ordering::SeqCst), 2);
        assert_eq!(lights.departures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sender_never_blocks_without_consumer() {
        let (tx, _rx) = channel();
        for _ in 0..1000 {
            tx.send(PresenceEvent::AllDeparted).unwrap();
        }
    }
}
