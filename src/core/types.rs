use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::error::{Error, Result};

/// Bounded restart policy for a loop that hit a transport failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of restarts allowed; zero ends the loop on the first failure
    pub max_retries: u32,
    /// Wait before the first restart
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy that never restarts
    pub fn disabled() -> Self {
        RetryPolicy {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Returns whether any restart is allowed
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::disabled()
    }
}

/// Configuration shared by master and slave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Group address for SYNC/FOLLOW_UP; multicast groups are joined by slaves
    pub group: IpAddr,
    /// Port the group traffic is sent to
    pub sync_port: u16,
    /// Master port for DELAY_REQUEST
    pub delay_port: u16,
    /// Period between SYNC/FOLLOW_UP pairs
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub sync_interval: Duration,
    /// How long a prober waits for its DELAY_RESPONSE; `None` waits indefinitely
    #[serde(default)]
    #[serde(serialize_with = "super::serde::serialize_opt_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_opt_duration")]
    pub response_timeout: Option<Duration>,
    /// Receive buffer size in bytes
    pub recv_buf_size: usize,
    /// Multicast hop limit for outgoing group traffic
    pub multicast_ttl: u32,
    /// Deliver group traffic to listeners on the sending host
    pub multicast_loop: bool,
    /// Restart policy after transport failures
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group: IpAddr::V4(Ipv4Addr::new(228, 5, 6, 7)),
            sync_port: super::DEFAULT_SYNC_PORT,
            delay_port: super::DEFAULT_DELAY_PORT,
            sync_interval: Duration::from_millis(2000),
            response_timeout: None,
            recv_buf_size: super::DEFAULT_RECV_BUF_SIZE,
            multicast_ttl: 1,
            multicast_loop: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Address SYNC/FOLLOW_UP pairs are sent to
    pub fn sync_target(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.sync_port)
    }

    /// Address of the master's delay responder, given the master's IP
    pub fn delay_target(&self, master: IpAddr) -> SocketAddr {
        SocketAddr::new(master, self.delay_port)
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(Error::config("Sync interval must be positive"));
        }

        if self.recv_buf_size < crate::protocol::MAX_MESSAGE_SIZE {
            return Err(Error::config(format!(
                "Receive buffer must hold at least {} bytes",
                crate::protocol::MAX_MESSAGE_SIZE
            )));
        }

        if let Some(timeout) = self.response_timeout {
            if timeout.is_zero() {
                return Err(Error::config("Response timeout must be positive"));
            }
        }

        if self.retry.is_enabled() && self.retry.initial_backoff.is_zero() {
            return Err(Error::config("Retry backoff must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.group, "228.5.6.7".parse::<IpAddr>().unwrap());
        assert_eq!(config.sync_port, 4445);
        assert_eq!(config.delay_port, 4446);
        assert_eq!(config.sync_interval, Duration::from_millis(2000));
        assert_eq!(config.response_timeout, None);
        assert!(!config.retry.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_targets() {
        let config = Config::default();
        assert_eq!(config.sync_target(), "228.5.6.7:4445".parse().unwrap());

        let master: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(config.delay_target(master), "10.0.0.2:4446".parse().unwrap());
    }

    #[test]
    fn test_config_validation() {
        let config = Config {
            sync_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            recv_buf_size: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            response_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            retry: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::from_secs(1),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
