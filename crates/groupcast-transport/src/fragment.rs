//! Reassembly state for fragmented messages.
//!
//! Each sender endpoint may have at most one message in reassembly at a
//! time; a newer message from the same sender displaces the older one.
//! The store is bounded both in aggregate payload bytes and in resident
//! count, evicting the oldest reassembly (by first-datagram timestamp)
//! when either bound is exceeded.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use tracing::debug;

use groupcast_core::types::ChannelName;

/// State of one in-progress reassembly.
#[derive(Debug)]
pub struct FragBuf {
    pub from: SocketAddrV4,
    pub channel: ChannelName,
    pub seqno: u32,
    /// Contiguous payload buffer, allocated at the declared total size.
    pub payload: Vec<u8>,
    /// Decremented once per fragment arrival; 0 means complete.
    pub fragments_remaining: u16,
    /// Timestamp of the first datagram of this message, carried into the
    /// completed message.
    pub first_utime: i64,
}

impl FragBuf {
    pub fn new(
        from: SocketAddrV4,
        channel: ChannelName,
        seqno: u32,
        total_size: usize,
        fragments_in_msg: u16,
        first_utime: i64,
    ) -> Self {
        Self {
            from,
            channel,
            seqno,
            payload: vec![0u8; total_size],
            fragments_remaining: fragments_in_msg,
            first_utime,
        }
    }

    /// Declared payload size of the message under reassembly.
    pub fn total_size(&self) -> usize {
        self.payload.len()
    }
}

/// Bounded collection of in-progress reassemblies, keyed by sender.
#[derive(Debug)]
pub struct FragBufStore {
    bufs: HashMap<SocketAddrV4, FragBuf>,
    total_bytes: usize,
    max_bytes: usize,
    max_count: usize,
}

impl FragBufStore {
    pub fn new(max_bytes: usize, max_count: usize) -> Self {
        Self {
            bufs: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            max_count,
        }
    }

    pub fn lookup(&mut self, from: &SocketAddrV4) -> Option<&mut FragBuf> {
        self.bufs.get_mut(from)
    }

    pub fn contains(&self, from: &SocketAddrV4) -> bool {
        self.bufs.contains_key(from)
    }

    /// Insert a reassembly, evicting as needed to restore the bounds.
    ///
    /// Any resident reassembly for the same sender is displaced first;
    /// then the oldest reassemblies are evicted while the store exceeds
    /// either bound.
    pub fn insert(&mut self, fragbuf: FragBuf) {
        if let Some(old) = self.remove(&fragbuf.from) {
            debug!(
                sender = %old.from,
                channel = %old.channel,
                missing = old.fragments_remaining,
                "displacing reassembly from the same sender"
            );
        }
        self.total_bytes += fragbuf.total_size();
        self.bufs.insert(fragbuf.from, fragbuf);

        while self.total_bytes > self.max_bytes || self.bufs.len() > self.max_count {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    pub fn remove(&mut self, from: &SocketAddrV4) -> Option<FragBuf> {
        let fragbuf = self.bufs.remove(from)?;
        self.total_bytes -= fragbuf.total_size();
        Some(fragbuf)
    }

    /// Evict the reassembly with the oldest first-datagram timestamp.
    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .bufs
            .values()
            .min_by_key(|fb| fb.first_utime)
            .map(|fb| fb.from);
        match oldest {
            Some(from) => {
                if let Some(evicted) = self.remove(&from) {
                    debug!(
                        sender = %evicted.from,
                        channel = %evicted.channel,
                        missing = evicted.fragments_remaining,
                        "evicting oldest reassembly to restore store bounds"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Aggregate declared payload bytes of resident reassemblies.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sender(host: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, host), 7667)
    }

    fn fragbuf(host: u8, seqno: u32, total: usize, utime: i64) -> FragBuf {
        FragBuf::new(
            sender(host),
            ChannelName::new("T").unwrap(),
            seqno,
            total,
            4,
            utime,
        )
    }

    #[test]
    fn lookup_finds_resident_reassembly() {
        let mut store = FragBufStore::new(1 << 20, 10);
        store.insert(fragbuf(1, 5, 4000, 100));

        let found = store.lookup(&sender(1)).unwrap();
        assert_eq!(found.seqno, 5);
        assert!(store.lookup(&sender(2)).is_none());
    }

    #[test]
    fn tracks_total_bytes_across_insert_and_remove() {
        let mut store = FragBufStore::new(1 << 20, 10);
        store.insert(fragbuf(1, 1, 4000, 100));
        store.insert(fragbuf(2, 1, 6000, 101));
        assert_eq!(store.total_bytes(), 10_000);
        assert_eq!(store.len(), 2);

        store.remove(&sender(1)).unwrap();
        assert_eq!(store.total_bytes(), 6000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_sender_displaces_older_reassembly() {
        let mut store = FragBufStore::new(1 << 20, 10);
        store.insert(fragbuf(1, 1, 4000, 100));
        store.insert(fragbuf(1, 2, 8000, 200));

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 8000);
        assert_eq!(store.lookup(&sender(1)).unwrap().seqno, 2);
    }

    #[test]
    fn byte_bound_evicts_oldest_first() {
        let mut store = FragBufStore::new(10_000, 10);
        store.insert(fragbuf(1, 1, 4000, 300)); // newest
        store.insert(fragbuf(2, 1, 4000, 100)); // oldest
        store.insert(fragbuf(3, 1, 4000, 200));

        // 12_000 > 10_000: the reassembly with the oldest first_utime goes.
        assert_eq!(store.len(), 2);
        assert!(store.lookup(&sender(2)).is_none());
        assert!(store.lookup(&sender(1)).is_some());
        assert!(store.lookup(&sender(3)).is_some());
        assert!(store.total_bytes() <= 10_000);
    }

    #[test]
    fn count_bound_evicts_oldest_first() {
        let mut store = FragBufStore::new(1 << 20, 2);
        store.insert(fragbuf(1, 1, 100, 10));
        store.insert(fragbuf(2, 1, 100, 20));
        store.insert(fragbuf(3, 1, 100, 30));

        assert_eq!(store.len(), 2);
        assert!(store.lookup(&sender(1)).is_none());
    }

    #[test]
    fn bounds_hold_over_many_inserts() {
        let mut store = FragBufStore::new(50_000, 8);
        for i in 0..100u8 {
            store.insert(fragbuf(i, 1, 1000 + i as usize * 100, i as i64));
            assert!(store.total_bytes() <= 50_000);
            assert!(store.len() <= 8);
        }
    }

    #[test]
    fn zero_size_reassembly_is_accepted() {
        let mut store = FragBufStore::new(1000, 4);
        store.insert(fragbuf(1, 1, 0, 5));
        assert_eq!(store.total_bytes(), 0);
        assert_eq!(store.len(), 1);
    }
}
