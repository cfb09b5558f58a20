//! Core wire formats, constants, and channel types for the Groupcast
//! multicast transport.
//!
//! This crate defines the datagram headers, magic numbers, and the validated
//! channel-name type shared by senders and receivers. It performs no I/O.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod types;
pub mod wire;

pub use constants::{
    CHANNEL_MAX, FRAGMENT_MAX_PAYLOAD, LONG_HEADER_SIZE, MAGIC_LONG, MAGIC_SHORT, MAX_DATAGRAM,
    MAX_FRAGMENTS, MTU, RECV_SLAB_SIZE, SHORT_HEADER_SIZE, SHORT_MESSAGE_MAX,
};
pub use error::WireError;
pub use types::ChannelName;
pub use wire::{LongHeader, PacketKind, ShortHeader};
