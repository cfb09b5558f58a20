//! The caller-visible message type.

use std::fmt;

use tokio::sync::mpsc;

use crate::slab::PacketSlab;

/// Backing storage for a received message.
///
/// Short messages stay in the receive slab they arrived in; reassembled
/// messages own the contiguous heap buffer built up from their fragments.
enum Payload {
    Slab {
        slab: Option<PacketSlab>,
        returns: mpsc::UnboundedSender<PacketSlab>,
    },
    Heap(Vec<u8>),
}

/// A complete received message.
///
/// The message owns its payload. Dropping a slab-backed message hands the
/// slab back to the receive engine, which reconciles ring accounting on
/// its next pass; holding many messages for a long time therefore starves
/// the receive path (visible as dropped datagrams and a health warning)
/// rather than corrupting it.
pub struct Message {
    channel: String,
    recv_utime: i64,
    payload: Payload,
}

impl Message {
    pub(crate) fn from_slab(slab: PacketSlab, returns: mpsc::UnboundedSender<PacketSlab>) -> Self {
        let channel = slab
            .channel
            .as_ref()
            .expect("short-path slab is classified before it becomes a message")
            .as_str()
            .to_owned();
        Message {
            channel,
            recv_utime: slab.recv_utime,
            payload: Payload::Slab {
                slab: Some(slab),
                returns,
            },
        }
    }

    pub(crate) fn from_fragments(channel: String, recv_utime: i64, payload: Vec<u8>) -> Self {
        Message {
            channel,
            recv_utime,
            payload: Payload::Heap(payload),
        }
    }

    /// Channel this message was published on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Microsecond timestamp of the first datagram of this message.
    pub fn recv_utime(&self) -> i64 {
        self.recv_utime
    }

    /// The message payload.
    pub fn payload(&self) -> &[u8] {
        match &self.payload {
            Payload::Slab { slab, .. } => slab
                .as_ref()
                .expect("slab is only taken in Drop")
                .payload(),
            Payload::Heap(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Payload::Slab { slab, returns } = &mut self.payload {
            if let Some(slab) = slab.take() {
                // The engine may already be gone on shutdown; the slab
                // memory is freed either way.
                let _ = returns.send(slab);
            }
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("recv_utime", &self.recv_utime)
            .field("len", &self.len())
            .finish()
    }
}
