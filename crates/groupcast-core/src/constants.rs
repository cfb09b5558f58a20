//! Protocol constants for the Groupcast wire format.

/// Magic number opening a single-datagram message, ASCII "ZC02".
///
/// Written in network byte order. Deployed peers recognise exactly this
/// value; it must never change.
pub const MAGIC_SHORT: u32 = 0x5a43_3032;

/// Magic number opening one fragment of a multi-datagram message,
/// ASCII "ZC03".
pub const MAGIC_LONG: u32 = 0x5a43_3033;

/// Largest application payload accepted for a single send (1 MiB).
pub const MTU: usize = 1 << 20;

/// Longest channel name, excluding the wire NUL terminator.
pub const CHANNEL_MAX: usize = 63;

/// Size of the short header: magic(4) + seqno(4).
pub const SHORT_HEADER_SIZE: usize = 8;

/// Size of the long header: magic(4) + seqno(4) + msg_size(4) +
/// fragment_offset(4) + fragment_no(2) + fragments_in_msg(2).
pub const LONG_HEADER_SIZE: usize = 20;

/// Largest `channel + NUL + payload` that still travels in a single
/// datagram. Chosen to stay under a conservative Ethernet-path MTU.
pub const SHORT_MESSAGE_MAX: usize = 1400;

/// Per-datagram body bound on the fragment path, same order as
/// [`SHORT_MESSAGE_MAX`] so short and fragmented traffic see the same
/// network path behavior.
pub const FRAGMENT_MAX_PAYLOAD: usize = 1400;

/// Largest number of fragments a single message may be split into
/// (the wire field is a u16).
pub const MAX_FRAGMENTS: usize = 65535;

/// Largest possible UDP datagram.
pub const MAX_DATAGRAM: usize = 65535;

/// Size of one receive slab, enough for any single datagram.
pub const RECV_SLAB_SIZE: usize = 65536;
