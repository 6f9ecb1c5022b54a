//! Core types for the time protocol
//!
//! This module contains the error type and the configuration shared by
//! the master and slave roles.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{Config, RetryPolicy};

/// Default port for SYNC/FOLLOW_UP group traffic
pub const DEFAULT_SYNC_PORT: u16 = 4445;

/// Default master port for DELAY_REQUEST
pub const DEFAULT_DELAY_PORT: u16 = 4446;

/// Default receive buffer size in bytes
pub const DEFAULT_RECV_BUF_SIZE: usize = 256;
