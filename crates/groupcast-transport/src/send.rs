//! Message transmission: serialization, fragmentation, and sequencing.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use groupcast_core::constants::{FRAGMENT_MAX_PAYLOAD, MAX_FRAGMENTS, MTU, SHORT_MESSAGE_MAX};
use groupcast_core::types::ChannelName;
use groupcast_core::wire::{self, LongHeader};

use crate::error::TransportError;

/// Serialises and transmits messages, assigning sequence numbers.
///
/// Held behind a lock by the transport so that fragments of one message
/// are never interleaved with another send and each message consumes
/// exactly one sequence number.
#[derive(Debug)]
pub(crate) struct SendPipeline {
    socket: Arc<UdpSocket>,
    dest: SocketAddrV4,
    seqno: u32,
}

impl SendPipeline {
    pub fn new(socket: Arc<UdpSocket>, dest: SocketAddrV4) -> Self {
        Self {
            socket,
            dest,
            seqno: 0,
        }
    }

    /// Send one message, choosing the single-datagram or fragment path by
    /// wire size.
    pub async fn send(
        &mut self,
        channel: &ChannelName,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if payload.len() > MTU {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: MTU,
            });
        }

        let wire_size = channel.len() + 1 + payload.len();
        if wire_size <= SHORT_MESSAGE_MAX {
            self.send_short(channel, payload).await
        } else {
            self.send_fragmented(channel, payload).await
        }
    }

    async fn send_short(
        &mut self,
        channel: &ChannelName,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let datagram = wire::encode_short(self.seqno, channel, payload);
        trace!(
            channel = %channel,
            bytes = payload.len(),
            datagram = datagram.len(),
            "transmitting short message"
        );

        let sent = self.socket.send_to(&datagram, SocketAddr::V4(self.dest)).await?;
        if sent != datagram.len() {
            return Err(TransportError::ShortWrite {
                sent,
                expected: datagram.len(),
            });
        }

        self.seqno = self.seqno.wrapping_add(1);
        Ok(())
    }

    async fn send_fragmented(
        &mut self,
        channel: &ChannelName,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let fragments = Fragments::new(self.seqno, channel, payload)?;
        debug!(
            channel = %channel,
            bytes = payload.len(),
            fragments = fragments.fragments_in_msg(),
            "transmitting fragmented message"
        );

        let outcome = self.transmit_fragments(fragments).await;
        // The sequence number advances even when a fragment failed to
        // send: the wire has already seen it on the earlier fragments.
        self.seqno = self.seqno.wrapping_add(1);
        outcome
    }

    async fn transmit_fragments(&self, fragments: Fragments<'_>) -> Result<(), TransportError> {
        for datagram in fragments {
            let sent = self.socket.send_to(&datagram, SocketAddr::V4(self.dest)).await?;
            if sent != datagram.len() {
                // A partial fragment is unrecoverable; the rest of the
                // message is abandoned.
                return Err(TransportError::ShortWrite {
                    sent,
                    expected: datagram.len(),
                });
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn seqno(&self) -> u32 {
        self.seqno
    }
}

/// Iterator over the datagrams of one fragmented message.
///
/// Fragment 0 carries the NUL-terminated channel ahead of the first
/// payload bytes; every fragment carries the same sequence number,
/// declared size, and fragment count.
#[derive(Debug)]
pub(crate) struct Fragments<'a> {
    seqno: u32,
    channel: &'a ChannelName,
    payload: &'a [u8],
    fragments_in_msg: u16,
    next_no: u16,
    offset: usize,
}

impl<'a> Fragments<'a> {
    pub fn new(
        seqno: u32,
        channel: &'a ChannelName,
        payload: &'a [u8],
    ) -> Result<Self, TransportError> {
        let wire_size = channel.len() + 1 + payload.len();
        let needed = wire_size.div_ceil(FRAGMENT_MAX_PAYLOAD);
        if needed > MAX_FRAGMENTS {
            return Err(TransportError::TooManyFragments {
                needed,
                max: MAX_FRAGMENTS,
            });
        }
        Ok(Self {
            seqno,
            channel,
            payload,
            fragments_in_msg: needed as u16,
            next_no: 0,
            offset: 0,
        })
    }

    pub fn fragments_in_msg(&self) -> u16 {
        self.fragments_in_msg
    }
}

impl Iterator for Fragments<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.next_no >= self.fragments_in_msg {
            return None;
        }

        let header = LongHeader {
            seqno: self.seqno,
            msg_size: self.payload.len() as u32,
            fragment_offset: self.offset as u32,
            fragment_no: self.next_no,
            fragments_in_msg: self.fragments_in_msg,
        };

        let datagram = if self.next_no == 0 {
            // The channel name shares the first fragment with the leading
            // payload bytes.
            let chunk_len =
                (FRAGMENT_MAX_PAYLOAD - (self.channel.len() + 1)).min(self.payload.len());
            let chunk = &self.payload[..chunk_len];
            self.offset += chunk_len;
            wire::encode_first_fragment(&header, self.channel, chunk)
        } else {
            let chunk_len = FRAGMENT_MAX_PAYLOAD.min(self.payload.len() - self.offset);
            let chunk = &self.payload[self.offset..self.offset + chunk_len];
            self.offset += chunk_len;
            wire::encode_fragment(&header, chunk)
        };

        self.next_no += 1;
        Some(datagram)
    }
}
