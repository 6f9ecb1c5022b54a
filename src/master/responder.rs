use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::codec::Encoder;

use crate::core::{Config, Error, Result};
use crate::network;
use crate::protocol::{Message, MessageCodec, MAX_MESSAGE_SIZE};
use crate::time::SharedClock;
use crate::util::{self, Worker};

/// Builds the reply to a delay-port message received at `receipt_time`
pub fn respond(message: Message, receipt_time: i64) -> Result<Message> {
    match message {
        Message::DelayRequest { id } => Ok(Message::DelayResponse {
            id,
            timestamp: receipt_time,
        }),
        other => Err(Error::unexpected_kind("delay", other.kind())),
    }
}

/// Master loop that answers DELAY_REQUESTs
///
/// Each request is answered to its sender with the master time at which it
/// arrived. Replies are stateless; any number of slaves may probe at once.
pub struct DelayResponder {
    config: Config,
    clock: SharedClock,
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
    codec: MessageCodec,
    answered: u64,
}

impl DelayResponder {
    /// Creates a responder for the configured delay port
    pub fn new(config: Config, clock: SharedClock) -> Self {
        DelayResponder {
            bind_addr: SocketAddr::new(network::unspecified_for(&config.group), config.delay_port),
            config,
            clock,
            socket: None,
            codec: MessageCodec::new(),
            answered: 0,
        }
    }

    /// Uses an already bound socket for the first run
    pub fn with_socket(mut self, socket: UdpSocket) -> Result<Self> {
        self.bind_addr = socket.local_addr()?;
        self.socket = Some(socket);
        Ok(self)
    }

    /// Address requests are accepted on
    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Number of requests answered so far
    pub fn answered(&self) -> u64 {
        self.answered
    }

    /// Runs the response loop under the configured retry policy
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Self {
        let policy = self.config.retry.clone();
        util::supervise(self, policy, shutdown).await
    }
}

impl Worker for DelayResponder {
    fn name(&self) -> &'static str {
        "delay responder"
    }

    fn bind(&mut self) -> Result<UdpSocket> {
        match self.socket.take() {
            Some(socket) => Ok(socket),
            None => network::bind_unicast(self.bind_addr),
        }
    }

    async fn serve(
        &mut self,
        socket: UdpSocket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("{} listening on {}", self.name(), self.bind_addr);
        let mut recv_buf = vec![0u8; self.config.recv_buf_size];
        let mut send_buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);

        loop {
            let received = tokio::select! {
                received = socket.recv_from(&mut recv_buf) => received,
                _ = util::shutdown_requested(shutdown) => return Ok(()),
            };

            let (len, source) = match received {
                Ok(received) => received,
                Err(err) if network::is_transient(&err) => {
                    tracing::debug!("{}: transient receive error: {}", self.name(), err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let receipt_time = self.clock.now_millis();

            let reply = match self
                .codec
                .decode_datagram(&recv_buf[..len])
                .and_then(|message| respond(message, receipt_time))
            {
                Ok(reply) => reply,
                Err(err) => {
                    util::log_discarded(self.name(), &err);
                    continue;
                }
            };

            send_buf.clear();
            self.codec.encode(reply, &mut send_buf)?;
            match socket.send_to(&send_buf, source).await {
                Ok(_) => {
                    self.answered += 1;
                    tracing::debug!("{} to {}", reply, source);
                }
                Err(err) if network::is_transient(&err) => {
                    tracing::debug!("{}: reply to {} failed: {}", self.name(), source, err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
