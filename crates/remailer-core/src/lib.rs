//! # Remailer Core
//!
//! Shared data model, configuration, errors, and the trait seams the
//! scheduling core depends on. No I/O beyond config file access — stores and
//! channel senders live in their own crates behind the traits defined here.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RemailerConfig;
pub use error::{RemailerError, Result};
pub use traits::{ChannelSender, Clock, DispatchStore, LogStore, ScheduleStore, SendOutcome, SystemClock};
pub use types::{ChannelTag, DeliveryLog, DeliveryStatus, Message, Schedule};
