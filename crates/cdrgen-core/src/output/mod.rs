//! Output layer: per-endpoint channels and the manager that runs them

pub mod channel;
pub mod manager;

pub use channel::{Channel, ChannelInfo, ChannelState, ChannelStats, SentRecord};
pub use manager::{OutputManager, Totals};
