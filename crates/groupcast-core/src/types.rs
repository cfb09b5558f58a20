//! Validated newtypes shared across the transport.

use alloc::string::String;
use core::fmt;

use crate::constants::CHANNEL_MAX;
use crate::error::WireError;

/// A validated channel name.
///
/// Invariants: non-empty, at most [`CHANNEL_MAX`] bytes, and free of
/// interior NULs so it can be NUL-terminated on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Result<Self, WireError> {
        let name = name.into();
        validate_channel(&name)?;
        Ok(ChannelName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes, excluding the wire NUL terminator.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        // The non-empty invariant makes this always false; kept for the
        // conventional len/is_empty pairing.
        self.0.is_empty()
    }
}

/// Check a channel name against the wire invariants.
pub fn validate_channel(name: &str) -> Result<(), WireError> {
    if name.is_empty() {
        return Err(WireError::EmptyChannel);
    }
    if name.len() > CHANNEL_MAX {
        return Err(WireError::ChannelTooLong {
            max: CHANNEL_MAX,
            actual: name.len(),
        });
    }
    if name.as_bytes().contains(&0) {
        return Err(WireError::InvalidChannel);
    }
    Ok(())
}

impl TryFrom<&str> for ChannelName {
    type Error = WireError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ChannelName::new(value)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["T", "POSE", "camera/left", "a_b-c.d"] {
            let ch = ChannelName::new(name).unwrap();
            assert_eq!(ch.as_str(), name);
        }
    }

    #[test]
    fn accepts_name_at_the_limit() {
        let name = "x".repeat(CHANNEL_MAX);
        let ch = ChannelName::new(name.as_str()).unwrap();
        assert_eq!(ch.len(), CHANNEL_MAX);
    }

    #[test]
    fn rejects_name_over_the_limit() {
        let name = "x".repeat(CHANNEL_MAX + 1);
        assert_eq!(
            ChannelName::new(name.as_str()),
            Err(WireError::ChannelTooLong {
                max: CHANNEL_MAX,
                actual: CHANNEL_MAX + 1
            })
        );
    }

    #[test]
    fn rejects_empty_name() {
        assert_eq!(ChannelName::new(""), Err(WireError::EmptyChannel));
    }

    #[test]
    fn rejects_interior_nul() {
        assert_eq!(ChannelName::new("a\0b"), Err(WireError::InvalidChannel));
    }

    #[test]
    fn display_matches_as_str() {
        let ch = ChannelName::new("STATUS").unwrap();
        assert_eq!(ch.to_string(), "STATUS");
    }
}
