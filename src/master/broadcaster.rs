use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::codec::Encoder;

use crate::core::{Config, Result};
use crate::network;
use crate::protocol::{Message, MessageCodec, MAX_MESSAGE_SIZE};
use crate::time::{util::format_millis, SharedClock};
use crate::util::{self, Worker};

/// Master loop that announces the master clock to the group
///
/// Every sync interval it sends a SYNC followed by a FOLLOW_UP carrying the
/// time the SYNC left. Round ids start at 0 and increase by one per round.
pub struct SyncBroadcaster {
    config: Config,
    clock: SharedClock,
    target: SocketAddr,
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
    sync_id: u64,
    codec: MessageCodec,
}

impl SyncBroadcaster {
    /// Creates a broadcaster sending to the configured group
    pub fn new(config: Config, clock: SharedClock) -> Self {
        let bind_addr = SocketAddr::new(network::unspecified_for(&config.group), 0);
        SyncBroadcaster {
            target: config.sync_target(),
            config,
            clock,
            bind_addr,
            socket: None,
            sync_id: 0,
            codec: MessageCodec::new(),
        }
    }

    /// Uses an already bound socket for the first run
    pub fn with_socket(mut self, socket: UdpSocket) -> Result<Self> {
        self.bind_addr = socket.local_addr()?;
        self.socket = Some(socket);
        Ok(self)
    }

    /// Id of the next sync round
    pub fn sync_id(&self) -> u64 {
        self.sync_id
    }

    /// Destination of SYNC and FOLLOW_UP
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Runs the broadcast loop under the configured retry policy
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Self {
        let policy = self.config.retry.clone();
        util::supervise(self, policy, shutdown).await
    }

    async fn send(&mut self, socket: &UdpSocket, buf: &mut BytesMut, message: Message) -> Result<()> {
        buf.clear();
        self.codec.encode(message, buf)?;
        socket.send_to(&buf[..], self.target).await?;
        Ok(())
    }
}

impl Worker for SyncBroadcaster {
    fn name(&self) -> &'static str {
        "sync broadcaster"
    }

    fn bind(&mut self) -> Result<UdpSocket> {
        match self.socket.take() {
            Some(socket) => Ok(socket),
            None => network::bind_group_sender(&self.config, self.bind_addr),
        }
    }

    async fn serve(
        &mut self,
        socket: UdpSocket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(
            "{} sending to {} every {:?}",
            self.name(),
            self.target,
            self.config.sync_interval
        );
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);

        loop {
            let id = self.sync_id;
            self.send(&socket, &mut buf, Message::Sync { id }).await?;
            // Taken once the SYNC has left the socket.
            let sent_at = self.clock.now_millis();
            tracing::info!("[{}] SYNC sent at {} ({})", id, sent_at, format_millis(sent_at));

            self.send(&socket, &mut buf, Message::FollowUp { id, timestamp: sent_at })
                .await?;
            tracing::debug!("[{}] FOLLOW_UP sent", id);

            self.sync_id += 1;
            if util::sleep_or_shutdown(self.config.sync_interval, shutdown).await {
                return Ok(());
            }
        }
    }
}
