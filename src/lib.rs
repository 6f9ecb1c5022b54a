//! PTP Lite: a simplified precision time protocol over UDP
//!
//! A master announces its clock to a multicast group with SYNC/FOLLOW_UP
//! pairs and answers DELAY_REQUESTs on a unicast port. A slave combines the
//! observed clock gap with the measured one-way delay into an estimate of
//! the master's time.
//!
//! ```no_run
//! use ptp_lite::{Config, Master, Slave};
//!
//! # async fn run() -> ptp_lite::Result<()> {
//! let master = Master::bind(Config::default())?.spawn()?;
//! let slave = Slave::bind(Config::default())?.spawn()?;
//!
//! let mut reports = slave.subscribe();
//! reports.changed().await.ok();
//! println!("{:?}", *reports.borrow());
//!
//! slave.shutdown().await;
//! master.shutdown().await;
//! # Ok(())
//! # }
//! ```
pub mod core;
pub mod master;
pub mod network;
pub mod protocol;
pub mod slave;
pub mod time;
pub mod util;

// Re-export commonly used items
pub use core::{Config, Error, Result, RetryPolicy};
pub use master::{Master, MasterHandle};
pub use protocol::{Message, MessageKind};
pub use slave::{ClockEstimate, Slave, SlaveHandle, TimeReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
