//! UDP multicast transport for named, length-delimited messages.
//!
//! Messages are addressed to a textual channel and carried over an IPv4
//! multicast group. Small messages travel in a single datagram; large
//! messages are split into fragments and reassembled at the receiver.
//! Delivery is best-effort: no acknowledgement, retransmission, or
//! cross-sender ordering.

pub mod config;
pub mod error;
pub mod fragment;
pub mod msg;
pub mod recv;
pub mod ring;
pub mod send;
pub mod slab;
pub mod socket;
pub mod transport;

pub use config::UdpmConfig;
pub use error::TransportError;
pub use msg::Message;
pub use recv::TransportStats;
pub use transport::{Transport, UdpmTransport};
