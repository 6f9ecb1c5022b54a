//! Slave side
//!
//! A slave runs two loops sharing one [`ClockEstimate`]: the sync receiver,
//! which turns SYNC/FOLLOW_UP pairs into a gap, and the delay prober, which
//! the receiver starts once it has matched its first pair.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::{Config, Result};
use crate::network;
use crate::time::{SharedClock, SystemClock};

mod estimate;
mod prober;
mod receiver;

pub use self::estimate::{ClockEstimate, TimeReport};
pub use self::prober::{round_trip_delay, DelayProber, DelayRound};
pub use self::receiver::{PendingSync, ProberSlot, SyncEvent, SyncReceiver, SyncState};

/// A configured slave that has not been started
pub struct Slave {
    config: Config,
    clock: SharedClock,
    socket: Option<UdpSocket>,
}

impl Slave {
    /// Creates a slave that binds the configured group port when spawned
    pub fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Slave {
            config,
            clock: SystemClock::shared(),
            socket: None,
        })
    }

    /// Creates a slave around an already bound sync socket
    pub fn with_socket(config: Config, socket: UdpSocket) -> Result<Self> {
        config.validate()?;
        Ok(Slave {
            config,
            clock: SystemClock::shared(),
            socket: Some(socket),
        })
    }

    /// Replaces the local clock
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Starts the sync receiver
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(self) -> Result<SlaveHandle> {
        let estimate = Arc::new(ClockEstimate::new());
        let prober = ProberSlot::default();
        let mut receiver = SyncReceiver::new(
            self.config.clone(),
            self.clock,
            estimate.clone(),
            prober.clone(),
        );
        let sync_addr = match self.socket {
            Some(socket) => {
                let addr = socket.local_addr()?;
                receiver = receiver.with_socket(socket)?;
                addr
            }
            None => network::group_listen_addr(&self.config),
        };

        let (shutdown, rx) = watch::channel(false);
        tracing::info!("slave starting for group {}", self.config.sync_target());

        Ok(SlaveHandle {
            sync_addr,
            estimate,
            prober,
            receiver: tokio::spawn(receiver.run(rx)),
            shutdown,
        })
    }
}

/// Handle to a running slave
///
/// Dropping the handle stops both loops.
pub struct SlaveHandle {
    sync_addr: SocketAddr,
    estimate: Arc<ClockEstimate>,
    prober: ProberSlot,
    receiver: JoinHandle<SyncReceiver>,
    shutdown: watch::Sender<bool>,
}

impl SlaveHandle {
    /// Address the sync receiver listens on
    pub fn sync_addr(&self) -> SocketAddr {
        self.sync_addr
    }

    /// Shared gap and delay estimate
    pub fn estimate(&self) -> Arc<ClockEstimate> {
        self.estimate.clone()
    }

    /// Stream of published time reports
    pub fn subscribe(&self) -> watch::Receiver<Option<TimeReport>> {
        self.estimate.subscribe()
    }

    /// Whether the receiver has ended, by shutdown or failure
    pub fn is_finished(&self) -> bool {
        self.receiver.is_finished()
    }

    /// Stops both loops and waits for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        if let Err(err) = self.receiver.await {
            tracing::error!("sync receiver task failed: {}", err);
        }
        let prober = self.prober.lock().await.take();
        if let Some(prober) = prober {
            if let Err(err) = prober.await {
                tracing::error!("delay prober task failed: {}", err);
            }
        }
        tracing::info!("slave stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn test_spawn_outside_runtime_panics() {
        let slave = Slave::bind(Config::default()).unwrap();
        let _ = slave.spawn();
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let config = Config {
            group: "127.0.0.1".parse().unwrap(),
            sync_port: 0,
            ..Default::default()
        };
        let handle = Slave::bind(config).unwrap().spawn().unwrap();
        assert_eq!(handle.sync_addr(), "127.0.0.1:0".parse().unwrap());
        assert!(handle.estimate().latest_report().is_none());
        handle.shutdown().await;
    }
}
