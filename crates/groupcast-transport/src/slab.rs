//! Receive slab descriptors and the free-descriptor queue.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};

use groupcast_core::constants::RECV_SLAB_SIZE;
use groupcast_core::types::ChannelName;

use crate::ring::SlabTicket;

/// One reusable receive buffer with its datagram metadata.
///
/// A slab cycles between the free queue and the receive path. While it
/// holds a datagram it carries a ring ticket charging its memory against
/// the ring; classification fills in the channel and payload window.
#[derive(Debug)]
pub struct PacketSlab {
    buf: Box<[u8]>,
    /// Ring charge for the current datagram, if checked out.
    pub(crate) ticket: Option<SlabTicket>,
    /// Sender of the current datagram.
    pub(crate) from: SocketAddrV4,
    /// Receive timestamp in microseconds since the epoch.
    pub(crate) recv_utime: i64,
    /// Received datagram length.
    pub(crate) size: usize,
    /// Channel parsed during classification (short path).
    pub(crate) channel: Option<ChannelName>,
    /// Payload window within `buf`, set during classification.
    pub(crate) data_offset: usize,
    pub(crate) data_size: usize,
}

impl PacketSlab {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; RECV_SLAB_SIZE].into_boxed_slice(),
            ticket: None,
            from: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            recv_utime: 0,
            size: 0,
            channel: None,
            data_offset: 0,
            data_size: 0,
        }
    }

    /// The received datagram bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// The payload window established during classification.
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.data_offset..self.data_offset + self.data_size]
    }

    /// Whole backing buffer, for receiving into.
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Clear per-datagram state before returning to the free queue.
    pub(crate) fn reset(&mut self) {
        self.ticket = None;
        self.from = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        self.recv_utime = 0;
        self.size = 0;
        self.channel = None;
        self.data_offset = 0;
        self.data_size = 0;
    }
}

impl Default for PacketSlab {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO of free slab descriptors.
#[derive(Debug)]
pub struct SlabQueue {
    slabs: VecDeque<PacketSlab>,
    capacity: usize,
}

impl SlabQueue {
    /// Create a queue pre-filled with `capacity` fresh descriptors.
    pub fn with_slabs(capacity: usize) -> Self {
        let mut slabs = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            slabs.push_back(PacketSlab::new());
        }
        Self { slabs, capacity }
    }

    pub fn pop(&mut self) -> Option<PacketSlab> {
        self.slabs.pop_front()
    }

    /// Return a descriptor to the queue. The descriptor population is
    /// fixed at startup, so the bound can only be exceeded by a logic
    /// error.
    pub fn push(&mut self, slab: PacketSlab) {
        debug_assert!(self.slabs.len() < self.capacity, "slab queue overflow");
        self.slabs.push_back(slab);
    }

    pub fn len(&self) -> usize {
        self.slabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slabs_hold_a_full_datagram() {
        let slab = PacketSlab::new();
        assert_eq!(slab.buf.len(), RECV_SLAB_SIZE);
        assert_eq!(slab.size, 0);
        assert!(slab.bytes().is_empty());
    }

    #[test]
    fn reset_clears_datagram_state() {
        let mut slab = PacketSlab::new();
        slab.size = 100;
        slab.recv_utime = 12345;
        slab.data_offset = 10;
        slab.data_size = 90;
        slab.channel = Some(ChannelName::new("T").unwrap());
        slab.reset();
        assert_eq!(slab.size, 0);
        assert_eq!(slab.recv_utime, 0);
        assert_eq!(slab.data_size, 0);
        assert!(slab.channel.is_none());
        assert!(slab.ticket.is_none());
    }

    #[test]
    fn queue_cycles_descriptors_fifo() {
        let mut queue = SlabQueue::with_slabs(3);
        assert_eq!(queue.len(), 3);

        let a = queue.pop().unwrap();
        let _b = queue.pop().unwrap();
        assert_eq!(queue.len(), 1);

        queue.push(a);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_drains_to_empty() {
        let mut queue = SlabQueue::with_slabs(2);
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
