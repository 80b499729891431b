//! Host-side transport channel
//!
//! A bounded multi-producer ring buffer with the same reserve/submit
//! protocol as the kernel's BPF ring buffer map. The simulator and the tests
//! drive the capture handlers against it.
//!
//! Every record starts with an 8-byte header word:
//!
//! ```text
//! bit 63      committed (0 while the producer is still writing)
//! bit 62      discarded (padding or abandoned slot)
//! bits 0..32  payload length in bytes
//! ```
//!
//! Records are 8-byte aligned and never straddle the end of the buffer; a
//! producer that would wrap first claims the tail as a discarded padding
//! record. Producers claim space by advancing `producer_pos` with a
//! compare-and-swap, bounded by `consumer_pos`. The consumer zeroes what it
//! has read before releasing it, so a zero header always means "not yet
//! published".

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use bytes::BytesMut;
use gtp5g_common::{constants::EVENT_RECORD_SIZE, EventSink, EventSlot, GtpEvent};

use crate::clock::monotonic_ns;

const HEADER_SIZE: u64 = 8;
const COMMIT_BIT: u64 = 1 << 63;
const DISCARD_BIT: u64 = 1 << 62;
const LEN_MASK: u64 = u32::MAX as u64;

/// Smallest accepted ring size in bytes
///
/// Large enough for one event record to be at most half the ring.
pub const MIN_RING_SIZE: usize = 256;

#[inline]
fn round_up_8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Shared ring buffer, handed to every producer
pub struct RingChannel {
    words: Box<[AtomicU64]>,
    capacity: u64,
    mask: u64,
    producer_pos: AtomicU64,
    consumer_pos: AtomicU64,
    dropped: AtomicU64,
    created_ns: u64,
}

impl RingChannel {
    /// Create a channel of `byte_size` bytes
    ///
    /// Returns the producer handle and the single consumer. The buffer is
    /// freed once both are dropped.
    pub fn open(byte_size: usize) -> Result<(Arc<RingChannel>, RingConsumer)> {
        if !byte_size.is_power_of_two() {
            bail!("Ring size must be a power of two, got {}", byte_size);
        }
        if byte_size < MIN_RING_SIZE {
            bail!("Ring size must be at least {} bytes, got {}", MIN_RING_SIZE, byte_size);
        }

        let words = (0..byte_size / 8)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let channel = Arc::new(RingChannel {
            words,
            capacity: byte_size as u64,
            mask: byte_size as u64 - 1,
            producer_pos: AtomicU64::new(0),
            consumer_pos: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            created_ns: monotonic_ns(),
        });

        let consumer = RingConsumer {
            channel: Arc::clone(&channel),
        };

        Ok((channel, consumer))
    }

    /// Reserve a writable slot of exactly `size` bytes
    ///
    /// Never blocks. Returns `None` and counts a drop when there is not
    /// enough free space. Records (header included) larger than half the
    /// ring are always refused: a record plus the padding in front of it
    /// must fit in an empty ring wherever the cursor sits.
    pub fn reserve(&self, size: usize) -> Option<Slot<'_>> {
        if size == 0 || size as u64 > LEN_MASK {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let total = round_up_8(HEADER_SIZE + size as u64);
        if total > self.max_record() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut pos = self.producer_pos.load(Ordering::Relaxed);
        let pad = loop {
            let to_end = self.capacity - (pos & self.mask);
            let pad = if total > to_end { to_end } else { 0 };
            let end = pos + pad + total;

            let consumed = self.consumer_pos.load(Ordering::Acquire);
            if end.saturating_sub(consumed) > self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            match self.producer_pos.compare_exchange_weak(
                pos,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break pad,
                Err(current) => pos = current,
            }
        };

        if pad > 0 {
            let pad_word = self.word_index(pos);
            self.words[pad_word].store(COMMIT_BIT | DISCARD_BIT | (pad - HEADER_SIZE), Ordering::Release);
        }

        Some(Slot {
            channel: self,
            header: self.word_index(pos + pad),
            len: size,
            done: false,
        })
    }

    /// Largest record, header included, a reservation can claim
    #[inline]
    fn max_record(&self) -> u64 {
        self.capacity / 2
    }

    #[inline]
    fn word_index(&self, pos: u64) -> usize {
        ((pos & self.mask) / 8) as usize
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Number of reservations that failed for lack of space
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Bytes reserved but not yet consumed, headers and padding included
    pub fn pending_bytes(&self) -> u64 {
        let consumed = self.consumer_pos.load(Ordering::Acquire);
        self.producer_pos.load(Ordering::Acquire).saturating_sub(consumed)
    }

    /// CLOCK_MONOTONIC reading taken when the channel was opened
    pub fn created_ns(&self) -> u64 {
        self.created_ns
    }
}

/// A reserved region of the ring
///
/// Invisible to the consumer until [`Slot::submit`]. Dropping an
/// unsubmitted slot discards it.
pub struct Slot<'a> {
    channel: &'a RingChannel,
    header: usize,
    len: usize,
    done: bool,
}

impl Slot<'_> {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.len
    }

    /// Copy `src` into the slot
    ///
    /// Bytes past `src` are zero; bytes of `src` past the slot length are
    /// ignored.
    pub fn write(&mut self, src: &[u8]) {
        let n = src.len().min(self.len);
        let words = (self.len + 7) / 8;

        for i in 0..words {
            let mut raw = [0u8; 8];
            let start = i * 8;
            if start < n {
                let end = (start + 8).min(n);
                raw[..end - start].copy_from_slice(&src[start..end]);
            }
            self.channel.words[self.header + 1 + i].store(u64::from_le_bytes(raw), Ordering::Relaxed);
        }
    }

    /// Publish the record
    pub fn submit(mut self) {
        self.commit(0);
    }

    /// Release the slot without publishing anything
    pub fn discard(mut self) {
        self.commit(DISCARD_BIT);
    }

    fn commit(&mut self, flags: u64) {
        self.done = true;
        self.channel.words[self.header].store(COMMIT_BIT | flags | self.len as u64, Ordering::Release);
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.commit(DISCARD_BIT);
        }
    }
}

/// The reading side of a [`RingChannel`]
pub struct RingConsumer {
    channel: Arc<RingChannel>,
}

impl RingConsumer {
    /// Read the next published record into `out`
    ///
    /// Returns `false` when the oldest record is still being written or the
    /// ring is empty. Discarded records are skipped.
    pub fn read_into(&mut self, out: &mut BytesMut) -> bool {
        let ring = &*self.channel;

        loop {
            let pos = ring.consumer_pos.load(Ordering::Relaxed);
            let header_word = ring.word_index(pos);
            let header = ring.words[header_word].load(Ordering::Acquire);

            if header & COMMIT_BIT == 0 {
                return false;
            }

            let len = header & LEN_MASK;
            let total = round_up_8(HEADER_SIZE + len);
            let discarded = header & DISCARD_BIT != 0;

            if !discarded {
                out.clear();
                out.reserve(len as usize);
                let mut remaining = len as usize;
                let mut word = header_word + 1;
                while remaining > 0 {
                    let raw = ring.words[word].load(Ordering::Relaxed).to_le_bytes();
                    let take = remaining.min(8);
                    out.extend_from_slice(&raw[..take]);
                    remaining -= take;
                    word += 1;
                }
            }

            for word in &ring.words[header_word..header_word + (total / 8) as usize] {
                word.store(0, Ordering::Relaxed);
            }
            ring.consumer_pos.store(pos + total, Ordering::Release);

            if !discarded {
                return true;
            }
        }
    }

    /// Producer handle of the channel being read
    pub fn channel(&self) -> &Arc<RingChannel> {
        &self.channel
    }
}

impl EventSink for RingChannel {
    type Slot<'a> = Slot<'a>;

    fn reserve(&self) -> Option<Slot<'_>> {
        RingChannel::reserve(self, EVENT_RECORD_SIZE)
    }
}

impl EventSlot for Slot<'_> {
    fn fill(&mut self, event: &GtpEvent) {
        self.write(&event.encode());
    }

    fn publish(self) {
        self.submit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_open_validates_size() {
        assert!(RingChannel::open(1000).is_err());
        assert!(RingChannel::open(32).is_err());
        let (channel, _consumer) = RingChannel::open(1 << 12).unwrap();
        assert_eq!(channel.capacity(), 4096);
        assert_eq!(channel.dropped(), 0);
        assert_eq!(channel.pending_bytes(), 0);
    }

    #[test]
    fn test_submit_then_read() {
        let (channel, mut consumer) = RingChannel::open(1024).unwrap();
        let mut out = BytesMut::new();

        assert!(!consumer.read_into(&mut out));

        let mut slot = channel.reserve(5).unwrap();
        assert_eq!(slot.size(), 5);
        slot.write(b"hello");
        slot.submit();

        assert!(consumer.read_into(&mut out));
        assert_eq!(&out[..], b"hello");
        assert!(!consumer.read_into(&mut out));
        assert_eq!(channel.pending_bytes(), 0);
    }

    #[test]
    fn test_unsubmitted_slot_is_invisible_and_blocks_later_records() {
        let (channel, mut consumer) = RingChannel::open(1024).unwrap();
        let mut out = BytesMut::new();

        let mut first = channel.reserve(8).unwrap();
        let mut second = channel.reserve(8).unwrap();
        second.write(b"second!!");
        second.submit();

        // The older record is still in flight
        assert!(!consumer.read_into(&mut out));

        first.write(b"first!!!");
        first.submit();

        assert!(consumer.read_into(&mut out));
        assert_eq!(&out[..], b"first!!!");
        assert!(consumer.read_into(&mut out));
        assert_eq!(&out[..], b"second!!");
    }

    #[test]
    fn test_dropped_slot_is_discarded() {
        let (channel, mut consumer) = RingChannel::open(1024).unwrap();
        let mut out = BytesMut::new();

        {
            let mut abandoned = channel.reserve(16).unwrap();
            abandoned.write(&[0xAA; 16]);
        }
        channel.reserve(4).unwrap().discard();
        let mut kept = channel.reserve(3).unwrap();
        kept.write(b"abc");
        kept.submit();

        assert!(consumer.read_into(&mut out));
        assert_eq!(&out[..], b"abc");
        assert!(!consumer.read_into(&mut out));
    }

    #[test]
    fn test_full_ring_drops_until_drained() {
        // 64 bytes of payload + 8 byte header = 72 bytes per record
        let (channel, mut consumer) = RingChannel::open(256).unwrap();
        let mut out = BytesMut::new();

        for _ in 0..3 {
            channel.reserve(64).unwrap().submit();
        }
        assert!(channel.reserve(64).is_none());
        assert_eq!(channel.dropped(), 1);

        assert!(consumer.read_into(&mut out));
        assert_eq!(out.len(), 64);
        assert!(channel.reserve(64).is_some());
    }

    #[test]
    fn test_oversized_reservation_fails() {
        let (channel, _consumer) = RingChannel::open(256).unwrap();
        // 8 byte header + 128 exceeds half the ring
        assert!(channel.reserve(128).is_none());
        assert!(channel.reserve(0).is_none());
        assert!(channel.reserve(usize::MAX).is_none());
        assert!(channel.reserve(LEN_MASK as usize + 1).is_none());
        assert_eq!(channel.dropped(), 4);
        assert_eq!(channel.pending_bytes(), 0);

        assert!(channel.reserve(120).is_some());
    }

    #[test]
    fn test_half_ring_record_fits_empty_ring_at_any_offset() {
        let (channel, mut consumer) = RingChannel::open(1024).unwrap();
        let mut out = BytesMut::new();
        let largest = channel.capacity() / 2 - HEADER_SIZE as usize;

        for round in 0..64usize {
            // Move the cursor to a different offset each round
            let filler = 8 * (round % 16 + 1);
            channel.reserve(filler).unwrap().submit();
            assert!(consumer.read_into(&mut out));
            assert_eq!(channel.pending_bytes(), 0);

            let mut slot = channel
                .reserve(largest)
                .unwrap_or_else(|| panic!("round {}: empty ring refused {} bytes", round, largest));
            slot.write(&[round as u8; 8]);
            slot.submit();

            assert!(consumer.read_into(&mut out));
            assert_eq!(out.len(), largest);
            assert_eq!(out[0], round as u8);
        }

        assert!(channel.reserve(largest + 1).is_none());
        assert_eq!(channel.dropped(), 1);
    }

    #[test]
    fn test_smallest_ring_holds_an_event() {
        assert!(RingChannel::open(MIN_RING_SIZE / 2).is_err());

        let (channel, mut consumer) = RingChannel::open(MIN_RING_SIZE).unwrap();
        let mut out = BytesMut::new();

        for _ in 0..10 {
            let slot = EventSink::reserve(&*channel).unwrap();
            slot.publish();
            assert!(consumer.read_into(&mut out));
            assert_eq!(out.len(), EVENT_RECORD_SIZE);
        }
        assert_eq!(channel.dropped(), 0);
    }

    #[test]
    fn test_records_survive_wrap_around() {
        let (channel, mut consumer) = RingChannel::open(256).unwrap();
        let mut out = BytesMut::new();

        for round in 0u8..50 {
            let payload = [round; 40];
            let mut slot = channel.reserve(payload.len()).unwrap();
            slot.write(&payload);
            slot.submit();

            assert!(consumer.read_into(&mut out));
            assert_eq!(&out[..], &payload[..]);
        }
        assert_eq!(channel.dropped(), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 20_000;

        let (channel, mut consumer) = RingChannel::open(1 << 12).unwrap();

        let reader = thread::spawn(move || {
            let mut out = BytesMut::new();
            let mut last_seq = vec![None::<u32>; PRODUCERS as usize];
            let mut received = 0u64;
            loop {
                if consumer.read_into(&mut out) {
                    assert_eq!(out.len(), 8);
                    let producer = u32::from_le_bytes([out[0], out[1], out[2], out[3]]) as usize;
                    let seq = u32::from_le_bytes([out[4], out[5], out[6], out[7]]);
                    if let Some(prev) = last_seq[producer] {
                        assert!(seq > prev, "producer {} went from {} to {}", producer, prev, seq);
                    }
                    last_seq[producer] = Some(seq);
                    received += 1;
                } else if received + consumer.channel().dropped()
                    == (PRODUCERS * PER_PRODUCER) as u64
                {
                    return received;
                } else {
                    thread::yield_now();
                }
            }
        });

        thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let channel = &channel;
                scope.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        if let Some(mut slot) = channel.reserve(8) {
                            let mut payload = [0u8; 8];
                            payload[..4].copy_from_slice(&producer.to_le_bytes());
                            payload[4..].copy_from_slice(&seq.to_le_bytes());
                            slot.write(&payload);
                            slot.submit();
                        }
                    }
                });
            }
        });

        let received = reader.join().unwrap();
        assert_eq!(received + channel.dropped(), (PRODUCERS * PER_PRODUCER) as u64);
        assert!(received > 0);
    }
}
