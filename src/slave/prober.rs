use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::Encoder;

use crate::core::{Config, Error, Result};
use crate::network;
use crate::protocol::{Message, MessageCodec, MAX_MESSAGE_SIZE};
use crate::time::SharedClock;
use crate::util::{self, Worker};
use super::estimate::ClockEstimate;

/// Computes the one-way delay from a delay round
///
/// `send_time_estimate` is the slave's master-equivalent time at sending,
/// already corrected by the previous gap and delay. This differs from the
/// four-raw-timestamp PTP formula and inherits any staleness in that
/// correction.
pub fn round_trip_delay(master_receipt_time: i64, send_time_estimate: i64) -> i64 {
    master_receipt_time.saturating_sub(send_time_estimate) / 2
}

/// The single outstanding DELAY_REQUEST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRound {
    /// Delay round id
    pub id: u64,
    /// `now + gap + delay` at the moment of sending
    pub send_time_estimate: i64,
}

impl DelayRound {
    /// Opens round `id` from the local clock reading and the current estimates
    pub fn open(id: u64, now: i64, gap: i64, delay: i64) -> Self {
        DelayRound {
            id,
            send_time_estimate: now.saturating_add(gap).saturating_add(delay),
        }
    }

    /// Whether `reply` answers an earlier round that already timed out
    pub fn is_stale(&self, reply: &Message) -> bool {
        matches!(reply, Message::DelayResponse { id, .. } if *id < self.id)
    }

    /// Closes the round with the master's reply, yielding the new delay
    pub fn complete(&self, reply: Message) -> Result<i64> {
        match reply {
            Message::DelayResponse { id, timestamp } if id == self.id => {
                Ok(round_trip_delay(timestamp, self.send_time_estimate))
            }
            Message::DelayResponse { id, .. } => Err(Error::id_mismatch(Some(self.id), id)),
            other => Err(Error::unexpected_kind("delay", other.kind())),
        }
    }
}

/// Slave loop that measures the network delay to the master
///
/// Sends one DELAY_REQUEST at a time and waits for its reply before the
/// next randomized pause, so at most one request is ever outstanding.
pub struct DelayProber {
    config: Config,
    clock: SharedClock,
    estimate: Arc<ClockEstimate>,
    master: SocketAddr,
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
    delay_id: u64,
    codec: MessageCodec,
    rng: StdRng,
}

impl DelayProber {
    /// Creates a prober for the master at `master_ip`; the socket is bound on first run
    pub fn new(
        config: Config,
        clock: SharedClock,
        estimate: Arc<ClockEstimate>,
        master_ip: IpAddr,
    ) -> Self {
        let bind_addr = SocketAddr::new(network::unspecified_for(&master_ip), 0);
        DelayProber {
            master: config.delay_target(master_ip),
            config,
            clock,
            estimate,
            bind_addr,
            socket: None,
            delay_id: 0,
            codec: MessageCodec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Uses an already bound socket for the first run
    pub fn with_socket(mut self, socket: UdpSocket) -> Result<Self> {
        self.bind_addr = socket.local_addr()?;
        self.socket = Some(socket);
        Ok(self)
    }

    /// Delay responder address requests are sent to
    pub fn master(&self) -> SocketAddr {
        self.master
    }

    /// Id of the next DELAY_REQUEST
    pub fn delay_id(&self) -> u64 {
        self.delay_id
    }

    /// Runs the probe loop under the configured retry policy
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Self {
        let policy = self.config.retry.clone();
        util::supervise(self, policy, shutdown).await
    }

    /// Applies the reply to the outstanding round
    fn settle(&mut self, round: &DelayRound, reply: Message) {
        match round.complete(reply) {
            Ok(delay) => {
                self.estimate.set_delay(delay);
                tracing::info!("[{}] delay: {}", round.id, delay);
            }
            Err(err) => util::log_discarded(self.name(), &err),
        }
    }
}

impl Worker for DelayProber {
    fn name(&self) -> &'static str {
        "delay prober"
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
        tracing::info!("{} launched, master at {}", self.name(), self.master);
        let mut send_buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        let mut recv_buf = vec![0u8; self.config.recv_buf_size];
        let response_timeout = self.config.response_timeout;

        loop {
            let (gap, delay) = self.estimate.snapshot();
            let round = DelayRound::open(self.delay_id, self.clock.now_millis(), gap, delay);

            send_buf.clear();
            self.codec.encode(Message::DelayRequest { id: round.id }, &mut send_buf)?;
            socket.send_to(&send_buf, self.master).await?;
            tracing::debug!("[{}] DELAY_REQUEST sent to {}", round.id, self.master);

            // Late replies to timed-out rounds are skipped without ending this round.
            let deadline = response_timeout.map(|limit| Instant::now() + limit);
            loop {
                let received = tokio::select! {
                    received = async {
                        match deadline {
                            Some(deadline) => timeout_at(deadline, socket.recv_from(&mut recv_buf))
                                .await
                                .ok(),
                            None => Some(socket.recv_from(&mut recv_buf).await),
                        }
                    } => received,
                    _ = util::shutdown_requested(shutdown) => return Ok(()),
                };

                match received {
                    Some(Ok((len, _))) => match self.codec.decode_datagram(&recv_buf[..len]) {
                        Ok(reply) if round.is_stale(&reply) => {
                            tracing::debug!("[{}] skipping late {}", round.id, reply);
                            continue;
                        }
                        Ok(reply) => self.settle(&round, reply),
                        Err(err) => util::log_discarded(self.name(), &err),
                    },
                    Some(Err(err)) if network::is_transient(&err) => {
                        tracing::debug!("{}: transient receive error: {}", self.name(), err);
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        tracing::warn!(
                            "[{}] no DELAY_RESPONSE within {:?}",
                            round.id,
                            response_timeout.unwrap_or_default()
                        );
                    }
                }
                break;
            }

            self.delay_id += 1;
            let pause = util::probe_interval(&mut self.rng, self.config.sync_interval);
            if util::sleep_or_shutdown(pause, shutdown).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_round_trip_delay() {
        assert_eq!(round_trip_delay(2050, 2000), 25);
        assert_eq!(round_trip_delay(2000, 2050), -25);
        // Truncates toward zero.
        assert_eq!(round_trip_delay(2001, 2000), 0);
        assert_eq!(round_trip_delay(1999, 2000), 0);
    }

    #[test]
    fn test_round_uses_gap_and_previous_delay() {
        let round = DelayRound::open(3, 1_000, 990, 10);
        assert_eq!(round.send_time_estimate, 2_000);

        let first = DelayRound::open(0, 1_000, 1_000, 0);
        assert_eq!(first.send_time_estimate, 2_000);
    }

    #[test]
    fn test_complete_matching_response() {
        let round = DelayRound { id: 4, send_time_estimate: 2_000 };
        let delay = round
            .complete(Message::DelayResponse { id: 4, timestamp: 2_050 })
            .unwrap();
        assert_eq!(delay, 25);
    }

    #[test]
    fn test_complete_rejects_other_rounds_and_kinds() {
        let round = DelayRound { id: 4, send_time_estimate: 2_000 };

        let err = round
            .complete(Message::DelayResponse { id: 3, timestamp: 2_050 })
            .unwrap_err();
        assert!(matches!(err, Error::IdMismatch { expected: Some(4), received: 3 }));

        let err = round.complete(Message::Sync { id: 4 }).unwrap_err();
        assert!(matches!(err, Error::UnexpectedKind { .. }));
    }

    #[test]
    fn test_stale_replies() {
        let round = DelayRound { id: 4, send_time_estimate: 2_000 };

        assert!(round.is_stale(&Message::DelayResponse { id: 3, timestamp: 0 }));
        assert!(!round.is_stale(&Message::DelayResponse { id: 4, timestamp: 0 }));
        assert!(!round.is_stale(&Message::DelayResponse { id: 5, timestamp: 0 }));
        assert!(!round.is_stale(&Message::DelayRequest { id: 3 }));
    }

    #[test]
    fn test_mismatched_response_leaves_delay() {
        let estimate = Arc::new(ClockEstimate::new());
        estimate.set_delay(12);
        let mut prober = DelayProber::new(
            Config::default(),
            Arc::new(ManualClock::new(0)),
            estimate.clone(),
            "127.0.0.1".parse().unwrap(),
        );

        let round = DelayRound { id: 1, send_time_estimate: 2_000 };
        prober.settle(&round, Message::DelayResponse { id: 0, timestamp: 9_999 });
        assert_eq!(estimate.delay(), 12);

        prober.settle(&round, Message::DelayResponse { id: 1, timestamp: 2_050 });
        assert_eq!(estimate.delay(), 25);
    }

    #[test]
    fn test_master_target() {
        let config = Config {
            delay_port: 5_000,
            ..Default::default()
        };
        let prober = DelayProber::new(
            config,
            Arc::new(ManualClock::new(0)),
            Arc::new(ClockEstimate::new()),
            "10.1.2.3".parse().unwrap(),
        );
        assert_eq!(prober.master(), "10.1.2.3:5000".parse().unwrap());
        assert_eq!(prober.delay_id(), 0);
    }
}
