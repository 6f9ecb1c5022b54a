//! Protocol implementation module
//!
//! This module defines the four protocol messages and their fixed
//! big-endian wire layout:
//!
//! ```text
//! offset 0   u32  kind tag (0=SYNC, 1=FOLLOW_UP, 2=DELAY_REQUEST, 3=DELAY_RESPONSE)
//! offset 4   u64  exchange id
//! offset 12  i64  timestamp, epoch ms (FOLLOW_UP and DELAY_RESPONSE only)
//! ```

pub mod codec;
pub mod message;

pub use self::codec::MessageCodec;
pub use self::message::{Message, MessageKind};

/// Size of the kind tag plus exchange id
pub const HEADER_SIZE: usize = 12;

/// Size of a message carrying a timestamp
pub const MAX_MESSAGE_SIZE: usize = 20;
