//! Datagram wire format: header parsing, serialization, and classification.
//!
//! Two packet kinds share the wire, distinguished by a 32-bit magic at
//! byte 0. Short packets carry a whole message; long packets carry one
//! fragment of a message that did not fit in a single datagram. All
//! multi-byte integers are big-endian.
//!
//! ```ascii
//! short:  magic(4) seqno(4) channel\0 payload...
//! long:   magic(4) seqno(4) msg_size(4) fragment_offset(4)
//!         fragment_no(2) fragments_in_msg(2) body...
//! ```
//!
//! The body of fragment 0 is the NUL-terminated channel followed by the
//! first payload bytes; later fragments carry payload bytes only.

use alloc::vec::Vec;

use crate::constants::{
    CHANNEL_MAX, LONG_HEADER_SIZE, MAGIC_LONG, MAGIC_SHORT, SHORT_HEADER_SIZE,
};
use crate::error::WireError;
use crate::types::ChannelName;

/// Packet kind, decided by the leading magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Short,
    Long,
}

/// Classify a datagram by its magic.
///
/// Anything shorter than the short header or carrying an unknown magic is
/// rejected; long packets must additionally be able to hold the long
/// header.
pub fn classify(raw: &[u8]) -> Result<PacketKind, WireError> {
    if raw.len() < SHORT_HEADER_SIZE {
        return Err(WireError::Truncated {
            min: SHORT_HEADER_SIZE,
            actual: raw.len(),
        });
    }
    let magic = u32::from_be_bytes(raw[0..4].try_into().expect("slice is exactly 4 bytes"));
    match magic {
        MAGIC_SHORT => Ok(PacketKind::Short),
        MAGIC_LONG => {
            if raw.len() < LONG_HEADER_SIZE {
                return Err(WireError::Truncated {
                    min: LONG_HEADER_SIZE,
                    actual: raw.len(),
                });
            }
            Ok(PacketKind::Long)
        }
        other => Err(WireError::BadMagic(other)),
    }
}

/// Header of a single-datagram message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortHeader {
    pub seqno: u32,
}

impl ShortHeader {
    /// Parse a short header, checking magic and length.
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < SHORT_HEADER_SIZE {
            return Err(WireError::Truncated {
                min: SHORT_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        let magic = u32::from_be_bytes(raw[0..4].try_into().expect("slice is exactly 4 bytes"));
        if magic != MAGIC_SHORT {
            return Err(WireError::BadMagic(magic));
        }
        let seqno = u32::from_be_bytes(raw[4..8].try_into().expect("slice is exactly 4 bytes"));
        Ok(ShortHeader { seqno })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC_SHORT.to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
    }
}

/// Header of one fragment of a multi-datagram message.
///
/// Every fragment of a message carries the same `seqno`, `msg_size`, and
/// `fragments_in_msg`; `msg_size` counts payload bytes only, excluding
/// the channel name carried by fragment 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongHeader {
    pub seqno: u32,
    pub msg_size: u32,
    pub fragment_offset: u32,
    pub fragment_no: u16,
    pub fragments_in_msg: u16,
}

impl LongHeader {
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < LONG_HEADER_SIZE {
            return Err(WireError::Truncated {
                min: LONG_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        let magic = u32::from_be_bytes(raw[0..4].try_into().expect("slice is exactly 4 bytes"));
        if magic != MAGIC_LONG {
            return Err(WireError::BadMagic(magic));
        }
        Ok(LongHeader {
            seqno: u32::from_be_bytes(raw[4..8].try_into().expect("slice is exactly 4 bytes")),
            msg_size: u32::from_be_bytes(raw[8..12].try_into().expect("slice is exactly 4 bytes")),
            fragment_offset: u32::from_be_bytes(
                raw[12..16].try_into().expect("slice is exactly 4 bytes"),
            ),
            fragment_no: u16::from_be_bytes(
                raw[16..18].try_into().expect("slice is exactly 2 bytes"),
            ),
            fragments_in_msg: u16::from_be_bytes(
                raw[18..20].try_into().expect("slice is exactly 2 bytes"),
            ),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC_LONG.to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&self.msg_size.to_be_bytes());
        buf.extend_from_slice(&self.fragment_offset.to_be_bytes());
        buf.extend_from_slice(&self.fragment_no.to_be_bytes());
        buf.extend_from_slice(&self.fragments_in_msg.to_be_bytes());
    }
}

/// Parse a NUL-terminated channel name from the start of `raw`.
///
/// Returns the channel and the number of bytes consumed, including the
/// terminator.
pub fn parse_channel(raw: &[u8]) -> Result<(&str, usize), WireError> {
    // Only the first CHANNEL_MAX + 1 bytes can legally hold the name and
    // its terminator, so an overlong name is reported as such rather than
    // as unterminated.
    match raw.iter().position(|&b| b == 0) {
        None => {
            if raw.len() > CHANNEL_MAX {
                Err(WireError::ChannelTooLong {
                    max: CHANNEL_MAX,
                    actual: raw.len(),
                })
            } else {
                Err(WireError::UnterminatedChannel)
            }
        }
        Some(0) => Err(WireError::EmptyChannel),
        Some(nul) if nul > CHANNEL_MAX => Err(WireError::ChannelTooLong {
            max: CHANNEL_MAX,
            actual: nul,
        }),
        Some(nul) => {
            let name = core::str::from_utf8(&raw[..nul]).map_err(|_| WireError::InvalidChannel)?;
            Ok((name, nul + 1))
        }
    }
}

/// Encode a complete single-datagram message.
pub fn encode_short(seqno: u32, channel: &ChannelName, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SHORT_HEADER_SIZE + channel.len() + 1 + payload.len());
    ShortHeader { seqno }.write_to(&mut buf);
    buf.extend_from_slice(channel.as_str().as_bytes());
    buf.push(0);
    buf.extend_from_slice(payload);
    buf
}

/// Encode fragment 0, which carries the channel name ahead of the first
/// payload bytes.
pub fn encode_first_fragment(header: &LongHeader, channel: &ChannelName, chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LONG_HEADER_SIZE + channel.len() + 1 + chunk.len());
    header.write_to(&mut buf);
    buf.extend_from_slice(channel.as_str().as_bytes());
    buf.push(0);
    buf.extend_from_slice(chunk);
    buf
}

/// Encode a fragment after the first: header and payload bytes only.
pub fn encode_fragment(header: &LongHeader, chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LONG_HEADER_SIZE + chunk.len());
    header.write_to(&mut buf);
    buf.extend_from_slice(chunk);
    buf
}
