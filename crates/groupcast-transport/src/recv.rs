//! The receive engine: slab checkout, datagram classification, and
//! fragment reassembly.
//!
//! The engine is deliberately socket-free. The transport reads one
//! datagram at a time, checks out a slab, and feeds it to [`RecvEngine::ingest`];
//! the engine classifies it and either completes a [`Message`], absorbs it
//! into an in-progress reassembly, or discards it. All ring and slab
//! bookkeeping lives here, which keeps the whole receive path unit-testable
//! without a network.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use groupcast_core::constants::{LONG_HEADER_SIZE, MTU, RECV_SLAB_SIZE, SHORT_HEADER_SIZE};
use groupcast_core::types::ChannelName;
use groupcast_core::wire::{self, LongHeader, PacketKind};

use crate::config::UdpmConfig;
use crate::fragment::{FragBuf, FragBufStore};
use crate::msg::Message;
use crate::ring::{RingBuffer, SlabTicket};
use crate::slab::{PacketSlab, SlabQueue};

/// Minimum interval between health reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Kernel receive buffers below this are considered too small for large
/// fragmented messages.
const SMALL_KERNEL_RBUF: usize = 256 * 1024;

/// Outcome of ingesting one datagram.
#[derive(Debug)]
pub(crate) enum Ingest {
    /// A complete message is ready for the caller.
    Complete(Message),
    /// The datagram was absorbed into an in-progress reassembly.
    Incomplete,
    /// The datagram contributed nothing.
    Discarded,
}

/// Receive-side counters, reset by each health report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportStats {
    /// Complete messages surfaced since the last report.
    pub received: u64,
    /// Datagrams discarded as malformed or unprocessable.
    pub discarded_bad: u64,
    /// Smallest observed fraction of free ring capacity, in `[0, 1]`.
    pub low_watermark: f64,
}

pub(crate) struct RecvEngine {
    ring: RingBuffer,
    free: SlabQueue,
    /// Slabs whose consumers are done but whose ring charge is not yet
    /// the oldest live allocation. Keyed by ticket so flushes happen in
    /// allocation order.
    pending: BTreeMap<SlabTicket, PacketSlab>,
    store: FragBufStore,
    returns_tx: mpsc::UnboundedSender<PacketSlab>,
    returns_rx: mpsc::UnboundedReceiver<PacketSlab>,
    received: u64,
    discarded_bad: u64,
    low_watermark: f64,
    last_report: Instant,
    kernel_rbuf_size: usize,
    warned_small_rbuf: bool,
}

impl RecvEngine {
    pub fn new(config: &UdpmConfig, kernel_rbuf_size: usize) -> Self {
        let (returns_tx, returns_rx) = mpsc::unbounded_channel();
        Self {
            ring: RingBuffer::new(config.ringbuf_size),
            free: SlabQueue::with_slabs(config.recv_slabs),
            pending: BTreeMap::new(),
            store: FragBufStore::new(config.frag_max_bytes, config.frag_max_count),
            returns_tx,
            returns_rx,
            received: 0,
            discarded_bad: 0,
            low_watermark: 1.0,
            last_report: Instant::now(),
            kernel_rbuf_size,
            warned_small_rbuf: false,
        }
    }

    /// Check out a slab for the next datagram.
    ///
    /// Returns `None` when the descriptor pool or the ring is exhausted,
    /// in which case the caller drops the datagram and records it with
    /// [`RecvEngine::note_dropped`].
    pub fn checkout(&mut self) -> Option<PacketSlab> {
        self.reclaim();

        let avail = self.ring.available_fraction();
        if avail < self.low_watermark {
            self.low_watermark = avail;
        }

        let mut slab = self.free.pop()?;
        match self.ring.alloc(RECV_SLAB_SIZE) {
            Some(ticket) => {
                slab.ticket = Some(ticket);
                Some(slab)
            }
            None => {
                self.free.push(slab);
                None
            }
        }
    }

    /// Record a datagram dropped for lack of buffer space.
    pub fn note_dropped(&mut self) {
        self.discarded_bad += 1;
    }

    /// Pull back slabs whose messages have been dropped by the consumer.
    fn reclaim(&mut self) {
        while let Ok(slab) = self.returns_rx.try_recv() {
            self.retire(slab);
        }
    }

    /// Mark a slab's datagram done and flush ring releases in FIFO order.
    ///
    /// A slab whose ticket is not yet the oldest live allocation waits in
    /// `pending` until every older consumer has let go.
    fn retire(&mut self, slab: PacketSlab) {
        let ticket = slab
            .ticket
            .expect("a retired slab always carries its ring ticket");
        self.pending.insert(ticket, slab);

        while let Some(oldest) = self.ring.oldest() {
            let Some(mut slab) = self.pending.remove(&oldest) else {
                break;
            };
            self.ring
                .release(oldest)
                .expect("ticket was just observed at the ring head");
            slab.reset();
            self.free.push(slab);
        }
    }

    /// Classify and process one received datagram.
    pub fn ingest(&mut self, slab: PacketSlab) -> Ingest {
        if slab.size < SHORT_HEADER_SIZE {
            return self.discard_bad(slab);
        }
        match wire::classify(slab.bytes()) {
            Ok(PacketKind::Short) => self.ingest_short(slab),
            Ok(PacketKind::Long) => self.ingest_fragment(slab),
            Err(_) => self.discard_bad(slab),
        }
    }

    fn discard_bad(&mut self, slab: PacketSlab) -> Ingest {
        self.discarded_bad += 1;
        self.retire(slab);
        Ingest::Discarded
    }

    /// Single-datagram path: the slab itself becomes the message.
    fn ingest_short(&mut self, mut slab: PacketSlab) -> Ingest {
        let (name, consumed) = match wire::parse_channel(&slab.bytes()[SHORT_HEADER_SIZE..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(sender = %slab.from, error = %e, "bad channel in short datagram");
                return self.discard_bad(slab);
            }
        };
        let channel = ChannelName::new(name).expect("parse_channel validated the name");

        slab.channel = Some(channel);
        slab.data_offset = SHORT_HEADER_SIZE + consumed;
        slab.data_size = slab.size - slab.data_offset;

        // Give the unused tail of the slab's charge back to the ring so a
        // held message only costs its datagram.
        let ticket = slab.ticket.expect("a checked-out slab carries its ticket");
        self.ring.shrink_last(ticket, slab.size);

        self.received += 1;
        Ingest::Complete(Message::from_slab(slab, self.returns_tx.clone()))
    }

    /// Fragment path: copy into the per-sender reassembly, completing the
    /// message when the last fragment lands.
    fn ingest_fragment(&mut self, slab: PacketSlab) -> Ingest {
        let header = match LongHeader::parse(slab.bytes()) {
            Ok(header) => header,
            Err(_) => return self.discard_bad(slab),
        };
        let from = slab.from;
        let total_size = header.msg_size as usize;

        // A resident reassembly that does not match this fragment's
        // message is stale; the sender has moved on.
        let is_stale = match self.store.lookup(&from) {
            Some(resident) => {
                resident.seqno != header.seqno || resident.total_size() != total_size
            }
            None => false,
        };
        if is_stale {
            let stale = self
                .store
                .remove(&from)
                .expect("resident reassembly was just looked up");
            debug!(
                sender = %from,
                missing = stale.fragments_remaining,
                "dropping stale reassembly"
            );
        }

        if total_size > MTU {
            debug!(sender = %from, declared = total_size, "rejecting huge message");
            return self.discard_bad(slab);
        }

        let mut body_offset = LONG_HEADER_SIZE;
        if header.fragment_no == 0 {
            // Fragment 0 always carries the channel, so the payload window
            // starts after it whether or not this arrival starts the
            // reassembly.
            let (name, consumed) = match wire::parse_channel(&slab.bytes()[LONG_HEADER_SIZE..]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(sender = %from, error = %e, "bad channel in fragment 0");
                    return self.discard_bad(slab);
                }
            };
            body_offset += consumed;

            if !self.store.contains(&from) {
                self.warn_if_kernel_rbuf_small(total_size);
                let channel = ChannelName::new(name).expect("parse_channel validated the name");
                self.store.insert(FragBuf::new(
                    from,
                    channel,
                    header.seqno,
                    total_size,
                    header.fragments_in_msg,
                    slab.recv_utime,
                ));
            }
        } else if !self.store.contains(&from) {
            // Fragment 0 was lost or we joined mid-message; without it
            // there is no channel to deliver to.
            self.retire(slab);
            return Ingest::Discarded;
        }

        let offset = header.fragment_offset as usize;
        let body_len = slab.size - body_offset;

        enum Step {
            OutOfRange,
            Incomplete,
            Complete,
        }

        // The just-created reassembly can itself be evicted when the
        // store bounds are very tight.
        if !self.store.contains(&from) {
            self.retire(slab);
            return Ingest::Discarded;
        }

        let step = {
            let fragbuf = self
                .store
                .lookup(&from)
                .expect("reassembly presence was just checked");
            if offset + body_len > fragbuf.total_size() {
                Step::OutOfRange
            } else {
                fragbuf.payload[offset..offset + body_len]
                    .copy_from_slice(&slab.bytes()[body_offset..]);
                // Completion is arrival-counted: a duplicate fragment
                // decrements again rather than being deduplicated.
                fragbuf.fragments_remaining = fragbuf.fragments_remaining.saturating_sub(1);
                if fragbuf.fragments_remaining > 0 {
                    Step::Incomplete
                } else {
                    Step::Complete
                }
            }
        };

        match step {
            Step::OutOfRange => {
                debug!(
                    sender = %from,
                    offset,
                    body_len,
                    "dropping fragment outside the declared message size"
                );
                self.store.remove(&from);
                self.discard_bad(slab)
            }
            Step::Incomplete => {
                self.retire(slab);
                Ingest::Incomplete
            }
            Step::Complete => {
                let fragbuf = self
                    .store
                    .remove(&from)
                    .expect("completed reassembly is resident");
                // The slab is released before the reassembled payload
                // escapes to the caller.
                self.retire(slab);
                self.received += 1;
                Ingest::Complete(Message::from_fragments(
                    fragbuf.channel.as_str().to_owned(),
                    fragbuf.first_utime,
                    fragbuf.payload,
                ))
            }
        }
    }

    fn warn_if_kernel_rbuf_small(&mut self, message_size: usize) {
        if self.warned_small_rbuf
            || self.kernel_rbuf_size == 0
            || self.kernel_rbuf_size >= SMALL_KERNEL_RBUF
            || message_size <= self.kernel_rbuf_size
        {
            return;
        }
        self.warned_small_rbuf = true;
        warn!(
            kernel_rbuf = self.kernel_rbuf_size,
            message_size,
            "large fragmented messages with a small kernel receive buffer; \
             datagram loss is likely"
        );
    }

    /// Emit a rate-limited health line when datagrams were discarded or
    /// the ring ran low, then reset the counters.
    pub fn maybe_report(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_report) < REPORT_INTERVAL {
            return;
        }
        if self.discarded_bad == 0 && self.low_watermark >= 0.5 {
            return;
        }

        let total = self.received + self.discarded_bad;
        let loss_pct = if total > 0 {
            self.discarded_bad as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        warn!(
            loss = %format_args!("{loss_pct:.1}%"),
            errors = self.discarded_bad,
            buf_avail = %format_args!("{:.1}%", self.low_watermark * 100.0),
            "receive health"
        );

        self.received = 0;
        self.discarded_bad = 0;
        self.low_watermark = self.ring.available_fraction();
        self.last_report = now;
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            received: self.received,
            discarded_bad: self.discarded_bad,
            low_watermark: self.low_watermark,
        }
    }
}
