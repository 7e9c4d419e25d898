//! Bounded multi-producer, single-consumer slot channel.
//!
//! The channel is a ring of fixed-size slots plus two counters:
//!
//! * `write_count`, the number of slots ever claimed, bumped by producers
//!   with a compare-and-swap that also enforces the capacity bound. The bump
//!   is what hands a producer its slot; two producers can never receive the
//!   same ticket.
//! * `read_count`, the number of slots ever consumed, written only by the
//!   single [`ChannelReader`].
//!
//! Slot `i` of ticket `t` is `t % capacity`. Every slot also carries a stamp:
//! it equals `t` while the slot is free for ticket `t`, becomes `t + 1` once
//! the producer holding `t` has published, and `t + capacity` once the reader
//! has consumed it. The reader therefore never mistakes a claimed but still
//! unwritten slot for a finished record.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{LoggerError, Result};
use crate::record::RECORD_HEADER_BYTES;
use crate::stream::Destination;

/// Bytes in one slot unless a different size is chosen.
pub const DEFAULT_SLOT_SIZE: usize = 16 * 1024;

/// Smallest slot that still fits a header and a short argument.
pub const MIN_SLOT_SIZE: usize = RECORD_HEADER_BYTES + 14;

/// What the consumer needs besides the encoded bytes.
#[derive(Debug, Clone)]
pub struct SlotHeader {
    pub destination: Destination,
    pub template: &'static str,
}

/// One record's worth of storage.
pub struct Slot<const SLOT: usize> {
    /// Set by the producer, taken by the consumer.
    pub header: Option<SlotHeader>,
    pub bytes: [u8; SLOT],
}

#[repr(align(64))]
struct Padded<T>(T);

struct SlotCell<const SLOT: usize> {
    stamp: AtomicU64,
    slot: UnsafeCell<Slot<SLOT>>,
}

// SAFETY: access to `slot` is serialised by the stamp protocol described in
// the module docs; `Slot` itself is `Send`.
unsafe impl<const SLOT: usize> Sync for SlotCell<SLOT> {}

impl<const SLOT: usize> SlotCell<SLOT> {
    fn new(stamp: u64) -> Self {
        Self {
            stamp: AtomicU64::new(stamp),
            slot: UnsafeCell::new(Slot { header: None, bytes: [0u8; SLOT] }),
        }
    }
}

/// The slot ring shared by producers and the reader.
pub struct Channel<const SLOT: usize = DEFAULT_SLOT_SIZE> {
    slots: Box<[SlotCell<SLOT>]>,
    write_count: Padded<AtomicU64>,
    read_count: Padded<AtomicU64>,
    reader_taken: AtomicBool,
}

impl<const SLOT: usize> Channel<SLOT> {
    /// Creates a channel of `capacity` slots of `SLOT` bytes each.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(LoggerError::InvalidCapacity { capacity });
        }
        if SLOT < MIN_SLOT_SIZE {
            return Err(LoggerError::InvalidSlotSize { size: SLOT, minimum: MIN_SLOT_SIZE });
        }
        let slots = (0..capacity as u64).map(SlotCell::new).collect();
        Ok(Self {
            slots,
            write_count: Padded(AtomicU64::new(0)),
            read_count: Padded(AtomicU64::new(0)),
            reader_taken: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn write_count(&self) -> u64 {
        self.write_count.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read_count.0.load(Ordering::Acquire)
    }

    /// Slots claimed but not yet consumed.
    #[inline]
    pub fn next_unread_gap(&self) -> u64 {
        self.write_count().saturating_sub(self.read_count())
    }

    #[inline]
    fn cell(&self, ticket: u64) -> &SlotCell<SLOT> {
        &self.slots[(ticket % self.slots.len() as u64) as usize]
    }

    /// Claims the next slot, calling `wait` while the channel is full.
    ///
    /// The gap check and the increment of `write_count` are one
    /// compare-and-swap, so at most `capacity - 1` slots are ever claimed
    /// ahead of the reader no matter how many producers race here. One slot
    /// of headroom always stays free.
    ///
    /// # Arguments
    ///
    /// * `wait` - Called once per retry while the channel is full. Yield or
    ///   sleep here; the claim has no timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use background_logger::channel::{Channel, Consume};
    /// let channel = Arc::new(Channel::<64>::new(4).unwrap());
    /// let mut reader = channel.take_reader().unwrap();
    ///
    /// let mut writer = channel.claim_slot(std::thread::yield_now);
    /// writer.slot().bytes[0] = 42;
    /// assert!(matches!(reader.consume_next(), Consume::Pending));
    /// drop(writer);
    ///
    /// match reader.consume_next() {
    ///     Consume::Ready(slot) => assert_eq!(slot.bytes[0], 42),
    ///     _ => unreachable!(),
    /// }
    /// reader.advance_read_count();
    /// assert_eq!(channel.next_unread_gap(), 0);
    /// ```
    pub fn claim_slot(&self, mut wait: impl FnMut()) -> SlotWriter<'_, SLOT> {
        let limit = self.capacity() as u64 - 1;
        let mut ticket = self.write_count.0.load(Ordering::Acquire);
        loop {
            if ticket.saturating_sub(self.read_count()) >= limit {
                wait();
                ticket = self.write_count.0.load(Ordering::Acquire);
                continue;
            }
            match self.write_count.0.compare_exchange_weak(
                ticket,
                ticket + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => ticket = current,
            }
        }
        let cell = self.cell(ticket);
        // The reader stamps a slot free before it publishes the new read
        // count, so this only spins if that order is ever broken.
        while cell.stamp.load(Ordering::Acquire) != ticket {
            wait();
        }
        SlotWriter { cell, ticket }
    }

    /// Calls `wait` until every claimed slot has been consumed. Gives up and
    /// returns `false` as soon as `wait` does.
    pub fn drain(&self, mut wait: impl FnMut() -> bool) -> bool {
        while self.write_count() != self.read_count() {
            if !wait() {
                return false;
            }
        }
        true
    }

    /// Hands out the single reader. Returns `None` while another reader is alive.
    pub fn take_reader(self: &Arc<Self>) -> Option<ChannelReader<SLOT>> {
        if self.reader_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(ChannelReader { read: self.read_count(), channel: Arc::clone(self) })
    }
}

/// Exclusive access to a claimed slot. Dropping it publishes the slot.
pub struct SlotWriter<'a, const SLOT: usize> {
    cell: &'a SlotCell<SLOT>,
    ticket: u64,
}

impl<const SLOT: usize> SlotWriter<'_, SLOT> {
    /// The ticket this slot was claimed with.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn slot(&mut self) -> &mut Slot<SLOT> {
        // SAFETY: the stamp equalled our ticket, so the reader has released
        // the slot and no other producer holds this ticket.
        unsafe { &mut *self.cell.slot.get() }
    }
}

impl<const SLOT: usize> Drop for SlotWriter<'_, SLOT> {
    fn drop(&mut self) {
        self.cell.stamp.store(self.ticket + 1, Ordering::Release);
    }
}

/// Result of one [`ChannelReader::consume_next`] attempt.
pub enum Consume<'a, const SLOT: usize> {
    /// The next slot is published and may be read.
    Ready(&'a mut Slot<SLOT>),
    /// The next slot is claimed but its producer is still writing.
    Pending,
    /// Nothing has been claimed past the read count.
    Empty,
}

/// The channel's only reader.
pub struct ChannelReader<const SLOT: usize = DEFAULT_SLOT_SIZE> {
    channel: Arc<Channel<SLOT>>,
    read: u64,
}

impl<const SLOT: usize> ChannelReader<SLOT> {
    pub fn channel(&self) -> &Arc<Channel<SLOT>> {
        &self.channel
    }

    pub fn read_count(&self) -> u64 {
        self.read
    }

    /// Looks at slot `read_count % capacity`.
    ///
    /// # Returns
    ///
    /// * `Ready` - the slot is published. It stays valid until
    ///   [`advance_read_count`](Self::advance_read_count) releases it.
    /// * `Pending` - a producer claimed it and is still writing.
    /// * `Empty` - nothing is claimed past the read count.
    ///
    /// Calling again without advancing returns the same slot.
    pub fn consume_next(&mut self) -> Consume<'_, SLOT> {
        let channel = &*self.channel;
        if channel.write_count() <= self.read {
            return Consume::Empty;
        }
        let cell = channel.cell(self.read);
        if cell.stamp.load(Ordering::Acquire) != self.read + 1 {
            return Consume::Pending;
        }
        // SAFETY: stamp `read + 1` means the producer published and will not
        // touch the slot again until it is released by advance_read_count.
        Consume::Ready(unsafe { &mut *cell.slot.get() })
    }

    /// Releases the slot returned by the last `Ready` and bumps the read
    /// count. Does nothing if that slot is not published.
    pub fn advance_read_count(&mut self) {
        let channel = &*self.channel;
        let cell = channel.cell(self.read);
        if cell.stamp.load(Ordering::Acquire) != self.read + 1 {
            debug_assert!(false, "advance_read_count without a ready slot");
            return;
        }
        cell.stamp.store(self.read + channel.capacity() as u64, Ordering::Release);
        self.read += 1;
        channel.read_count.0.store(self.read, Ordering::Release);
    }
}

impl<const SLOT: usize> Drop for ChannelReader<SLOT> {
    fn drop(&mut self) {
        self.channel.reader_taken.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SlotHeader {
        SlotHeader { destination: Destination::Stdout, template: "%d" }
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(matches!(Channel::<64>::new(1), Err(LoggerError::InvalidCapacity { capacity: 1 })));
        assert!(matches!(Channel::<4>::new(8), Err(LoggerError::InvalidSlotSize { size: 4, .. })));
    }

    #[test]
    fn test_claim_publish_consume() {
        let channel = Arc::new(Channel::<64>::new(4).unwrap());
        let mut reader = channel.take_reader().unwrap();
        assert!(matches!(reader.consume_next(), Consume::Empty));

        {
            let mut writer = channel.claim_slot(|| panic!("slot should be free"));
            assert_eq!(writer.ticket(), 0);
            let slot = writer.slot();
            slot.header = Some(header());
            slot.bytes[0] = 42;
            // not yet published
            assert!(matches!(reader.consume_next(), Consume::Pending));
        }

        match reader.consume_next() {
            Consume::Ready(slot) => {
                assert_eq!(slot.bytes[0], 42);
                assert!(slot.header.take().is_some());
            }
            _ => panic!("slot should be ready"),
        }
        assert_eq!(channel.next_unread_gap(), 1);
        reader.advance_read_count();
        assert_eq!(channel.next_unread_gap(), 0);
        assert_eq!(reader.read_count(), 1);
        assert!(matches!(reader.consume_next(), Consume::Empty));
    }

    #[test]
    fn test_wraps_around_in_order() {
        let channel = Arc::new(Channel::<32>::new(3).unwrap());
        let mut reader = channel.take_reader().unwrap();
        for round in 0u8..10 {
            drop({
                let mut writer = channel.claim_slot(|| panic!("slot should be free"));
                writer.slot().bytes[0] = round;
                writer
            });
            match reader.consume_next() {
                Consume::Ready(slot) => assert_eq!(slot.bytes[0], round),
                _ => panic!("slot should be ready"),
            }
            reader.advance_read_count();
        }
        assert_eq!(channel.write_count(), 10);
        assert_eq!(channel.read_count(), 10);
    }

    #[test]
    fn test_single_reader() {
        let channel = Arc::new(Channel::<32>::new(2).unwrap());
        let reader = channel.take_reader().unwrap();
        assert!(channel.take_reader().is_none());
        drop(reader);
        assert!(channel.take_reader().is_some());
    }

    #[test]
    fn test_claim_blocks_while_full() {
        let channel = Arc::new(Channel::<32>::new(4).unwrap());
        for _ in 0..3 {
            drop(channel.claim_slot(|| panic!("slot should be free")));
        }
        assert_eq!(channel.next_unread_gap(), 3);

        // Full apart from the headroom slot: the reader frees one on the
        // third wait.
        let mut reader = channel.take_reader().unwrap();
        let mut waits = 0;
        let writer = channel.claim_slot(|| {
            waits += 1;
            if waits == 3 {
                assert!(matches!(reader.consume_next(), Consume::Ready(_)));
                reader.advance_read_count();
            }
        });
        assert_eq!(waits, 3);
        assert_eq!(writer.ticket(), 3);
        assert_eq!(channel.next_unread_gap(), 3);
    }

    #[test]
    fn test_capacity_two_allows_one_in_flight() {
        let channel = Arc::new(Channel::<32>::new(2).unwrap());
        let mut reader = channel.take_reader().unwrap();
        drop(channel.claim_slot(|| panic!("slot should be free")));

        let mut waits = 0;
        drop(channel.claim_slot(|| {
            waits += 1;
            assert!(matches!(reader.consume_next(), Consume::Ready(_)));
            reader.advance_read_count();
        }));
        assert_eq!(waits, 1);
        assert_eq!(channel.write_count(), 2);
        assert_eq!(channel.read_count(), 1);
    }
}
