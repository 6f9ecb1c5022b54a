//! Master side
//!
//! The master runs two independent loops: the sync broadcaster, which
//! announces its clock to the group, and the delay responder, which answers
//! slaves measuring their network delay.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::{Config, Result};
use crate::network;
use crate::time::{SharedClock, SystemClock};

mod broadcaster;
mod responder;

pub use self::broadcaster::SyncBroadcaster;
pub use self::responder::{respond, DelayResponder};

/// A master whose sockets are bound but whose loops are not running yet
pub struct Master {
    config: Config,
    clock: SharedClock,
    sync_socket: UdpSocket,
    delay_socket: UdpSocket,
}

impl Master {
    /// Binds the group sender and the delay port from `config`
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, since the sockets are
    /// registered with its reactor.
    pub fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let unspecified = network::unspecified_for(&config.group);
        let sync_socket = network::bind_group_sender(&config, SocketAddr::new(unspecified, 0))?;
        let delay_socket = network::bind_unicast(SocketAddr::new(unspecified, config.delay_port))?;
        Self::with_sockets(config, sync_socket, delay_socket)
    }

    /// Creates a master around already bound sockets
    pub fn with_sockets(config: Config, sync_socket: UdpSocket, delay_socket: UdpSocket) -> Result<Self> {
        config.validate()?;
        Ok(Master {
            config,
            clock: SystemClock::shared(),
            sync_socket,
            delay_socket,
        })
    }

    /// Replaces the master clock
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Starts both loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<MasterHandle> {
        let broadcaster = SyncBroadcaster::new(self.config.clone(), self.clock.clone())
            .with_socket(self.sync_socket)?;
        let responder = DelayResponder::new(self.config.clone(), self.clock)
            .with_socket(self.delay_socket)?;
        let delay_addr = responder.local_addr();

        let (shutdown, rx) = watch::channel(false);
        tracing::info!(
            "master starting: group {}, delay port {}",
            self.config.sync_target(),
            delay_addr
        );

        Ok(MasterHandle {
            delay_addr,
            broadcaster: tokio::spawn(broadcaster.run(rx.clone())),
            responder: tokio::spawn(responder.run(rx)),
            shutdown,
        })
    }
}

/// Handle to a running master
///
/// Dropping the handle stops both loops.
pub struct MasterHandle {
    delay_addr: SocketAddr,
    broadcaster: JoinHandle<SyncBroadcaster>,
    responder: JoinHandle<DelayResponder>,
    shutdown: watch::Sender<bool>,
}

impl MasterHandle {
    /// Address the delay responder is bound to
    pub fn delay_addr(&self) -> SocketAddr {
        self.delay_addr
    }

    /// Whether either loop has ended, by shutdown or failure
    pub fn is_finished(&self) -> bool {
        self.broadcaster.is_finished() || self.responder.is_finished()
    }

    /// Stops both loops and waits for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        let (broadcaster, responder) = futures::future::join(self.broadcaster, self.responder).await;
        match broadcaster {
            Ok(broadcaster) => tracing::info!("{} sync rounds sent", broadcaster.sync_id()),
            Err(err) => tracing::error!("sync broadcaster task failed: {}", err),
        }
        match responder {
            Ok(responder) => tracing::info!("{} delay requests answered", responder.answered()),
            Err(err) => tracing::error!("delay responder task failed: {}", err),
        }
        tracing::info!("master stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> Config {
        Config {
            group: "127.0.0.1".parse().unwrap(),
            delay_port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_inside_runtime() {
        let master = Master::bind(loopback_config()).unwrap();
        let handle = master.spawn().unwrap();
        assert!(handle.delay_addr().ip().is_unspecified());
        assert_ne!(handle.delay_addr().port(), 0);
        handle.shutdown().await;
    }

    #[test]
    #[should_panic]
    fn test_bind_outside_runtime_panics() {
        let _ = Master::bind(loopback_config());
    }
}
