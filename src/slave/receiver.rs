use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::core::{Config, Error, Result};
use crate::network;
use crate::protocol::{Message, MessageCodec};
use crate::time::{util::format_millis, SharedClock};
use crate::util::{self, Worker};
use super::estimate::{ClockEstimate, TimeReport};
use super::prober::DelayProber;

/// Slot holding the lazily started delay prober task
pub type ProberSlot = Arc<Mutex<Option<JoinHandle<DelayProber>>>>;

/// The sync round waiting for its FOLLOW_UP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSync {
    /// Sync round id
    pub id: u64,
    /// Local time the SYNC was received
    pub receipt_time: i64,
}

/// Outcome of feeding one message to [`SyncState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A SYNC opened a new round
    Opened(PendingSync),
    /// A FOLLOW_UP closed the pending round
    Matched {
        /// The round that was closed
        round: PendingSync,
        /// `master_send_time - receipt_time`
        gap: i64,
        /// Whether this is the first round ever matched
        first: bool,
    },
}

/// SYNC/FOLLOW_UP correlation for one slave
///
/// Only the most recent SYNC is remembered; a new SYNC replaces the pending
/// round whether or not it was matched.
#[derive(Debug, Default)]
pub struct SyncState {
    pending: Option<PendingSync>,
    matched_once: bool,
}

impl SyncState {
    /// Creates a state with no pending round
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending round, if any
    pub fn pending(&self) -> Option<PendingSync> {
        self.pending
    }

    /// Applies a message received at local time `now`
    pub fn on_message(&mut self, message: Message, now: i64) -> Result<SyncEvent> {
        match message {
            Message::Sync { id } => {
                let round = PendingSync { id, receipt_time: now };
                self.pending = Some(round);
                Ok(SyncEvent::Opened(round))
            }
            Message::FollowUp { id, timestamp } => match self.pending {
                Some(round) if round.id == id => {
                    let first = !self.matched_once;
                    self.matched_once = true;
                    Ok(SyncEvent::Matched {
                        round,
                        gap: timestamp.saturating_sub(round.receipt_time),
                        first,
                    })
                }
                pending => Err(Error::id_mismatch(pending.map(|round| round.id), id)),
            },
            other => Err(Error::unexpected_kind("sync", other.kind())),
        }
    }
}

/// Slave loop that listens for SYNC/FOLLOW_UP pairs
///
/// Each matched pair updates the shared gap. The first match starts the
/// delay prober against the FOLLOW_UP's source address; once a delay is
/// known every match also publishes a corrected time report.
pub struct SyncReceiver {
    config: Config,
    clock: SharedClock,
    estimate: Arc<ClockEstimate>,
    prober: ProberSlot,
    state: SyncState,
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
    codec: MessageCodec,
}

impl SyncReceiver {
    /// Creates a receiver listening on the configured group port
    pub fn new(
        config: Config,
        clock: SharedClock,
        estimate: Arc<ClockEstimate>,
        prober: ProberSlot,
    ) -> Self {
        SyncReceiver {
            bind_addr: network::group_listen_addr(&config),
            config,
            clock,
            estimate,
            prober,
            state: SyncState::new(),
            socket: None,
            codec: MessageCodec::new(),
        }
    }

    /// Uses an already bound socket for the first run
    ///
    /// The socket joins the configured group if it is a multicast address.
    pub fn with_socket(mut self, socket: UdpSocket) -> Result<Self> {
        network::join_group(&socket, &self.config.group)?;
        self.bind_addr = socket.local_addr()?;
        self.socket = Some(socket);
        Ok(self)
    }

    /// Correlation state
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Runs the receive loop under the configured retry policy
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Self {
        let policy = self.config.retry.clone();
        util::supervise(self, policy, shutdown).await
    }

    /// Handles one decoded message from `source`, received at local time `now`
    pub async fn process(
        &mut self,
        message: Message,
        source: SocketAddr,
        now: i64,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let (round, gap, first) = match self.state.on_message(message, now)? {
            SyncEvent::Opened(round) => {
                tracing::debug!("[{}] SYNC received at {}", round.id, round.receipt_time);
                return Ok(());
            }
            SyncEvent::Matched { round, gap, first } => (round, gap, first),
        };

        self.estimate.set_gap(gap);
        tracing::info!("[{}] gap: {}", round.id, gap);

        if first {
            self.start_prober(source.ip(), shutdown.clone()).await;
        }

        if self.estimate.has_delay() {
            let delay = self.estimate.delay();
            let local_time_estimate = round.receipt_time.saturating_add(gap).saturating_add(delay);
            tracing::info!(
                "[{}] LOCAL TIME: {} ({})",
                round.id,
                local_time_estimate,
                format_millis(local_time_estimate)
            );
            self.estimate.publish(TimeReport {
                sync_id: round.id,
                receipt_time: round.receipt_time,
                gap,
                delay,
                local_time_estimate,
            });
        }

        Ok(())
    }

    async fn start_prober(&self, master_ip: IpAddr, shutdown: watch::Receiver<bool>) {
        let mut slot = self.prober.lock().await;
        if slot.is_some() {
            return;
        }

        let prober = DelayProber::new(
            self.config.clone(),
            self.clock.clone(),
            self.estimate.clone(),
            master_ip,
        );
        tracing::info!("starting delay prober against {}", prober.master());
        *slot = Some(tokio::spawn(prober.run(shutdown)));
    }
}

impl Worker for SyncReceiver {
    fn name(&self) -> &'static str {
        "sync receiver"
    }

    fn bind(&mut self) -> Result<UdpSocket> {
        match self.socket.take() {
            Some(socket) => Ok(socket),
            None => network::bind_group_receiver(&self.config, self.bind_addr),
        }
    }

    async fn serve(
        &mut self,
        socket: UdpSocket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("{} listening on {} for group {}", self.name(), self.bind_addr, self.config.group);
        let mut recv_buf = vec![0u8; self.config.recv_buf_size];

        let result = loop {
            let received = tokio::select! {
                received = socket.recv_from(&mut recv_buf) => received,
                _ = util::shutdown_requested(shutdown) => break Ok(()),
            };

            let (len, source) = match received {
                Ok(received) => received,
                Err(err) if network::is_transient(&err) => {
                    tracing::debug!("{}: transient receive error: {}", self.name(), err);
                    continue;
                }
                Err(err) => break Err(Error::from(err)),
            };
            let now = self.clock.now_millis();

            let outcome = match self.codec.decode_datagram(&recv_buf[..len]) {
                Ok(message) => self.process(message, source, now, shutdown).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                util::log_discarded(self.name(), &err);
            }
        };

        if let Err(err) = network::leave_group(&socket, &self.config.group) {
            tracing::warn!("{}: failed to leave group: {}", self.name(), err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_gap_from_matched_pair() {
        let mut state = SyncState::new();

        let event = state.on_message(Message::Sync { id: 7 }, 1_000).unwrap();
        assert_eq!(event, SyncEvent::Opened(PendingSync { id: 7, receipt_time: 1_000 }));

        let event = state
            .on_message(Message::FollowUp { id: 7, timestamp: 990 }, 1_004)
            .unwrap();
        assert_eq!(
            event,
            SyncEvent::Matched {
                round: PendingSync { id: 7, receipt_time: 1_000 },
                gap: -10,
                first: true,
            }
        );
    }

    #[test]
    fn test_only_first_match_is_first() {
        let mut state = SyncState::new();
        for id in 0..3 {
            state.on_message(Message::Sync { id }, 100).unwrap();
            let event = state
                .on_message(Message::FollowUp { id, timestamp: 150 }, 101)
                .unwrap();
            assert!(matches!(event, SyncEvent::Matched { first, .. } if first == (id == 0)));
        }
    }

    #[test]
    fn test_follow_up_mismatch() {
        let mut state = SyncState::new();

        let err = state
            .on_message(Message::FollowUp { id: 1, timestamp: 5 }, 0)
            .unwrap_err();
        assert!(matches!(err, Error::IdMismatch { expected: None, received: 1 }));

        state.on_message(Message::Sync { id: 2 }, 10).unwrap();
        let err = state
            .on_message(Message::FollowUp { id: 1, timestamp: 5 }, 11)
            .unwrap_err();
        assert!(matches!(err, Error::IdMismatch { expected: Some(2), received: 1 }));
        assert_eq!(state.pending(), Some(PendingSync { id: 2, receipt_time: 10 }));
    }

    #[test]
    fn test_new_sync_overwrites_pending() {
        let mut state = SyncState::new();
        state.on_message(Message::Sync { id: 1 }, 10).unwrap();
        state.on_message(Message::Sync { id: 2 }, 20).unwrap();

        assert!(state.on_message(Message::FollowUp { id: 1, timestamp: 0 }, 21).is_err());
        assert!(state.on_message(Message::FollowUp { id: 2, timestamp: 0 }, 22).is_ok());
    }

    #[test]
    fn test_delay_kinds_rejected() {
        let mut state = SyncState::new();
        let err = state.on_message(Message::DelayRequest { id: 0 }, 0).unwrap_err();
        assert!(matches!(err, Error::UnexpectedKind { .. }));
        let err = state
            .on_message(Message::DelayResponse { id: 0, timestamp: 0 }, 0)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedKind { .. }));
    }

    fn receiver() -> (SyncReceiver, Arc<ClockEstimate>, ProberSlot) {
        let estimate = Arc::new(ClockEstimate::new());
        let slot = ProberSlot::default();
        let receiver = SyncReceiver::new(
            Config::default(),
            Arc::new(ManualClock::new(0)),
            estimate.clone(),
            slot.clone(),
        );
        (receiver, estimate, slot)
    }

    #[tokio::test]
    async fn test_mismatched_follow_up_has_no_side_effect() {
        let (mut receiver, estimate, slot) = receiver();
        let (_tx, shutdown) = watch::channel(false);
        let source: SocketAddr = "127.0.0.1:4445".parse().unwrap();

        receiver
            .process(Message::Sync { id: 3 }, source, 1_000, &shutdown)
            .await
            .unwrap();
        let err = receiver
            .process(Message::FollowUp { id: 4, timestamp: 990 }, source, 1_001, &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::IdMismatch { .. }));
        assert!(!estimate.has_gap());
        assert_eq!(estimate.gap(), 0);
        assert!(slot.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_first_match_starts_one_prober() {
        let (mut receiver, estimate, slot) = receiver();
        let (tx, shutdown) = watch::channel(false);
        let source: SocketAddr = "127.0.0.1:4445".parse().unwrap();

        for id in 0..3 {
            receiver
                .process(Message::Sync { id }, source, 1_000, &shutdown)
                .await
                .unwrap();
            receiver
                .process(Message::FollowUp { id, timestamp: 990 }, source, 1_001, &shutdown)
                .await
                .unwrap();
        }

        assert_eq!(estimate.gap(), -10);
        assert!(estimate.latest_report().is_none());

        tx.send(true).unwrap();
        let handle = slot.lock().await.take().expect("prober started");
        let prober = handle.await.unwrap();
        assert_eq!(prober.master(), "127.0.0.1:4446".parse().unwrap());
    }

    #[tokio::test]
    async fn test_report_once_delay_known() {
        let (mut receiver, estimate, _slot) = receiver();
        let (_tx, shutdown) = watch::channel(true);
        let source: SocketAddr = "127.0.0.1:4445".parse().unwrap();

        estimate.set_delay(4);
        receiver
            .process(Message::Sync { id: 9 }, source, 1_000, &shutdown)
            .await
            .unwrap();
        receiver
            .process(Message::FollowUp { id: 9, timestamp: 1_500 }, source, 1_002, &shutdown)
            .await
            .unwrap();

        let report = estimate.latest_report().expect("report published");
        assert_eq!(report.sync_id, 9);
        assert_eq!(report.gap, 500);
        assert_eq!(report.delay, 4);
        assert_eq!(report.local_time_estimate, 1_504);
    }
}
