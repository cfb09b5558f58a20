//! Error types for the groupcast-core crate.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The datagram is shorter than the smallest parseable header.
    Truncated { min: usize, actual: usize },
    /// The leading magic matches neither packet kind.
    BadMagic(u32),
    /// The channel name exceeds the wire limit.
    ChannelTooLong { max: usize, actual: usize },
    /// No NUL terminator found where a channel name was expected.
    UnterminatedChannel,
    /// The channel name is empty.
    EmptyChannel,
    /// The channel name contains bytes that are not valid UTF-8 or an
    /// interior NUL.
    InvalidChannel,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { min, actual } => {
                write!(f, "datagram too short: need at least {min} bytes, got {actual}")
            }
            WireError::BadMagic(v) => write!(f, "bad magic: 0x{v:08x}"),
            WireError::ChannelTooLong { max, actual } => {
                write!(f, "channel name too long: {actual} bytes, limit is {max}")
            }
            WireError::UnterminatedChannel => write!(f, "channel name is not NUL-terminated"),
            WireError::EmptyChannel => write!(f, "channel name is empty"),
            WireError::InvalidChannel => write!(f, "channel name is not valid"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WireError {}
