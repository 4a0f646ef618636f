//! An arena-backed queue of outgoing packets, tracking each one through its
//! QoS acknowledgment handshake.
//!
//! The queue owns a single borrowed `&mut [u8]` buffer and splits it into
//! two regions that grow toward each other: serialized packet bytes
//! accumulate from the low end (`curr` marks the next free byte), and
//! fixed-width records describing those packets accumulate from the high
//! end (`queue_tail` marks the lowest-addressed record slot). Every record
//! is read and written field-by-field through plain slice indexing; the
//! buffer is never reinterpreted through a pointer cast.
#![warn(missing_docs)]

extern crate mqtt_core as mqtt;

use std::convert::TryFrom;
use std::time::{Duration, Instant};

use crate::mqtt::{Error, Type};

/// Lifecycle of a queued message.
///
/// `Unsent` messages are waiting for their first write attempt.
/// `AwaitingAck` messages have been written in full and are waiting for
/// the acknowledgment that terminates their QoS handshake. `Complete`
/// messages are done and only remain in the arena until [`MessageQueue::clean`]
/// reclaims their slot.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum State {
    /// Registered but not yet written to the transport.
    Unsent,
    /// Written in full; waiting for a matching acknowledgment.
    AwaitingAck,
    /// Acknowledged (or, for QoS 0, written) and ready to be reclaimed.
    Complete,
}

impl State {
    fn to_u8(self) -> u8 {
        match self {
            State::Unsent => 0,
            State::AwaitingAck => 1,
            State::Complete => 2,
        }
    }

    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Unsent,
            1 => State::AwaitingAck,
            _ => State::Complete,
        }
    }
}

/// A decoded view of one queue record.
///
/// Returned by value from [`MessageQueue::get`] and [`MessageQueue::find`];
/// mutate the underlying record through `MessageQueue`'s setters rather
/// than through this struct.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    /// Offset of this record's payload bytes within the arena.
    pub start: usize,
    /// Length of this record's payload bytes.
    pub size: usize,
    /// Control packet type of the queued message.
    pub control_type: Type,
    /// Packet identifier, or 0 for packet types that carry none (PINGREQ,
    /// DISCONNECT).
    pub packet_id: u16,
    /// Current lifecycle state.
    pub state: State,
    /// Bytes of this record's payload already written to the transport.
    /// Lets a partial non-blocking write resume on the next tick instead
    /// of restarting the packet from byte 0.
    pub sent: usize,
    /// Time the message was last written in full, if ever.
    pub time_sent: Option<Instant>,
}

const RECORD_SIZE: usize = 24;
const NO_TIME_SENT: u64 = u64::MAX;

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(b)
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

/// An outgoing message queue backed by a single caller-provided buffer.
///
/// The buffer is divided at two cursors: `curr` is the first free payload
/// byte (growing up from 0) and `queue_tail` is the first record slot
/// (growing down from the buffer's length). Records are indexed
/// oldest-first even though they are physically stored high-to-low:
/// `get(0)` is always the longest-queued message still resident.
pub struct MessageQueue<'a> {
    mem: &'a mut [u8],
    curr: usize,
    queue_tail: usize,
    epoch: Instant,
}

impl<'a> MessageQueue<'a> {
    /// Zeroes `mem` and binds it as a fresh, empty arena.
    pub fn init(mem: &'a mut [u8]) -> Self {
        for b in mem.iter_mut() {
            *b = 0;
        }
        let len = mem.len();
        MessageQueue {
            mem,
            curr: 0,
            queue_tail: len,
            epoch: Instant::now(),
        }
    }

    /// Resumes an existing arena without re-zeroing it, given the cursor
    /// pair and epoch saved from a prior [`MessageQueue::cursors`] /
    /// [`MessageQueue::epoch`] call.
    ///
    /// A `MessageQueue` borrows its arena for its own lifetime, so a
    /// caller that holds the arena as a long-lived owned buffer (a
    /// `Client`, say) cannot keep a `MessageQueue` alive across calls
    /// without a self-referential struct. `attach`/`cursors` let it
    /// reconstruct a queue view on demand instead, at the cost of
    /// threading the cursor pair and epoch through itself.
    pub fn attach(mem: &'a mut [u8], curr: usize, queue_tail: usize, epoch: Instant) -> Self {
        MessageQueue {
            mem,
            curr,
            queue_tail,
            epoch,
        }
    }

    /// The current cursor pair, to be saved and passed back to
    /// [`MessageQueue::attach`] once this borrow of the arena ends.
    pub fn cursors(&self) -> (usize, usize) {
        (self.curr, self.queue_tail)
    }

    /// The reference instant [`Record::time_sent`] values are relative
    /// to. Stable for the lifetime of the arena.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Total arena size in bytes.
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Bytes available for a further payload plus one more record slot.
    pub fn remaining(&self) -> usize {
        self.queue_tail - self.curr
    }

    /// Number of records currently resident.
    pub fn length(&self) -> usize {
        (self.mem.len() - self.queue_tail) / RECORD_SIZE
    }

    fn record_offset(&self, i: usize) -> Option<usize> {
        if i >= self.length() {
            return None;
        }
        Some(self.mem.len() - (i + 1) * RECORD_SIZE)
    }

    /// Reserves `payload_size` payload bytes and one record slot for a new
    /// message of `control_type`/`packet_id`, and returns the payload
    /// region to write the serialized packet into.
    ///
    /// The new record starts in state [`State::Unsent`]. Fails with
    /// [`Error::MemoryExhausted`] if the arena cannot fit both the
    /// payload and the record.
    pub fn register(
        &mut self,
        payload_size: usize,
        control_type: Type,
        packet_id: u16,
    ) -> Result<&mut [u8], Error> {
        if self.remaining() < payload_size + RECORD_SIZE {
            log::debug!(
                "message queue exhausted: need {} bytes, {} remaining",
                payload_size + RECORD_SIZE,
                self.remaining()
            );
            return Err(Error::MemoryExhausted);
        }

        let start = self.curr;
        self.curr += payload_size;
        self.queue_tail -= RECORD_SIZE;
        let off = self.queue_tail;

        put_u32(self.mem, off, start as u32);
        put_u32(self.mem, off + 4, payload_size as u32);
        put_u16(self.mem, off + 8, packet_id);
        self.mem[off + 10] = control_type as u8;
        self.mem[off + 11] = State::Unsent.to_u8();
        put_u32(self.mem, off + 12, 0);
        put_u64(self.mem, off + 16, NO_TIME_SENT);

        log::trace!(
            "registered {:?} id={} ({} bytes, {} resident)",
            control_type,
            packet_id,
            payload_size,
            self.length()
        );

        Ok(&mut self.mem[start..start + payload_size])
    }

    /// Decodes the `i`-th record, oldest first.
    pub fn get(&self, i: usize) -> Option<Record> {
        let off = self.record_offset(i)?;
        Some(self.decode_record(off))
    }

    fn decode_record(&self, off: usize) -> Record {
        let start = get_u32(self.mem, off) as usize;
        let size = get_u32(self.mem, off + 4) as usize;
        let packet_id = get_u16(self.mem, off + 8);
        let control_type =
            Type::try_from(self.mem[off + 10]).expect("record holds a valid control type");
        let state = State::from_u8(self.mem[off + 11]);
        let sent = get_u32(self.mem, off + 12) as usize;
        let raw_time_sent = get_u64(self.mem, off + 16);
        let time_sent = if raw_time_sent == NO_TIME_SENT {
            None
        } else {
            Some(self.epoch + Duration::from_millis(raw_time_sent))
        };
        Record {
            start,
            size,
            control_type,
            packet_id,
            state,
            sent,
            time_sent,
        }
    }

    /// The serialized payload bytes of the `i`-th record.
    pub fn payload(&self, i: usize) -> Option<&[u8]> {
        let record = self.get(i)?;
        Some(&self.mem[record.start..record.start + record.size])
    }

    /// The serialized payload bytes of the `i`-th record, mutable.
    ///
    /// Used to flip the DUP flag in a PUBLISH's fixed-header byte on
    /// retransmission without re-registering the message.
    pub fn payload_mut(&mut self, i: usize) -> Option<&mut [u8]> {
        let record = self.get(i)?;
        Some(&mut self.mem[record.start..record.start + record.size])
    }

    /// Sets the `i`-th record's state.
    pub fn set_state(&mut self, i: usize, state: State) {
        if let Some(off) = self.record_offset(i) {
            self.mem[off + 11] = state.to_u8();
        }
    }

    /// Records how many of the `i`-th record's payload bytes have been
    /// written to the transport so far, letting a partial non-blocking
    /// write resume on the next tick instead of restarting the packet.
    pub fn set_sent(&mut self, i: usize, sent: usize) {
        if let Some(off) = self.record_offset(i) {
            put_u32(self.mem, off + 12, sent as u32);
        }
    }

    /// Marks the `i`-th record as just written in full, recording `now`
    /// as its `time_sent` and transitioning it to [`State::AwaitingAck`].
    pub fn mark_sent(&mut self, i: usize, now: Instant) {
        if let Some(off) = self.record_offset(i) {
            let millis = now.saturating_duration_since(self.epoch).as_millis() as u64;
            put_u32(self.mem, off + 12, 0);
            put_u64(self.mem, off + 16, millis);
            self.mem[off + 11] = State::AwaitingAck.to_u8();
        }
    }

    /// Clears `time_sent` and moves the `i`-th record back to
    /// [`State::Unsent`], for retransmission after a response timeout.
    pub fn mark_unsent(&mut self, i: usize) {
        if let Some(off) = self.record_offset(i) {
            put_u32(self.mem, off + 12, 0);
            put_u64(self.mem, off + 16, NO_TIME_SENT);
            self.mem[off + 11] = State::Unsent.to_u8();
        }
    }

    /// Finds an `AwaitingAck` record matching `control_type` and
    /// `packet_id`, oldest first.
    pub fn find(&self, control_type: Type, packet_id: u16) -> Option<usize> {
        (0..self.length()).find(|&i| {
            let off = self.record_offset(i).expect("index within bounds");
            self.mem[off + 10] == control_type as u8
                && State::from_u8(self.mem[off + 11]) == State::AwaitingAck
                && get_u16(self.mem, off + 8) == packet_id
        })
    }

    /// Compacts the arena from the head: while the oldest record is
    /// `Complete`, discards it and its payload bytes, sliding the
    /// remaining payloads and records to close the gap.
    pub fn clean(&mut self) {
        while self.length() > 0 {
            let head_off = self.record_offset(0).expect("length() > 0");
            if State::from_u8(self.mem[head_off + 11]) != State::Complete {
                break;
            }
            let removed = self.decode_record(head_off);

            self.mem
                .copy_within(removed.start + removed.size..self.curr, removed.start);
            self.curr -= removed.size;

            for i in 1..self.length() {
                let off = self.record_offset(i).expect("index within bounds");
                let new_start = get_u32(self.mem, off) as usize - removed.size;
                put_u32(self.mem, off, new_start as u32);
            }

            self.mem
                .copy_within(self.queue_tail..head_off, self.queue_tail + RECORD_SIZE);
            self.queue_tail += RECORD_SIZE;

            log::trace!(
                "compacted {:?} id={}, {} resident",
                removed.control_type,
                removed.packet_id,
                self.length()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_reserves_payload_and_record() {
        let mut buf = [0u8; 128];
        let mut q = MessageQueue::init(&mut buf);
        assert_eq!(q.length(), 0);

        let payload = q.register(4, Type::PUBLISH, 1).unwrap();
        payload.copy_from_slice(b"abcd");

        assert_eq!(q.length(), 1);
        let r = q.get(0).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.size, 4);
        assert_eq!(r.state, State::Unsent);
        assert_eq!(r.packet_id, 1);
        assert_eq!(q.payload(0).unwrap(), b"abcd");
    }

    #[test]
    fn register_fails_when_exhausted() {
        let mut buf = [0u8; RECORD_SIZE + 4];
        let mut q = MessageQueue::init(&mut buf);
        assert!(q.register(4, Type::PUBLISH, 1).is_ok());
        assert!(matches::matches!(
            q.register(1, Type::PUBLISH, 2),
            Err(Error::MemoryExhausted)
        ));
    }

    #[test]
    fn mark_sent_preserves_time_sent_and_resets_partial_progress() {
        let mut buf = [0u8; 128];
        let mut q = MessageQueue::init(&mut buf);
        q.register(4, Type::PUBLISH, 1).unwrap();
        q.set_sent(0, 3);
        let now = q.epoch() + Duration::from_millis(500);
        q.mark_sent(0, now);

        let r = q.get(0).unwrap();
        assert_eq!(r.state, State::AwaitingAck);
        assert_eq!(r.sent, 0, "mark_sent resets the partial-write counter");
        assert_eq!(r.time_sent, Some(now));

        q.mark_unsent(0);
        let r = q.get(0).unwrap();
        assert_eq!(r.state, State::Unsent);
        assert_eq!(r.time_sent, None);
    }

    #[test]
    fn find_matches_awaiting_ack_only() {
        let mut buf = [0u8; 256];
        let mut q = MessageQueue::init(&mut buf);
        q.register(2, Type::PUBLISH, 7).unwrap();
        assert_eq!(q.find(Type::PUBLISH, 7), None);
        q.mark_sent(0, Instant::now());
        assert_eq!(q.find(Type::PUBLISH, 7), Some(0));
        assert_eq!(q.find(Type::PUBLISH, 8), None);
        q.set_state(0, State::Complete);
        assert_eq!(q.find(Type::PUBLISH, 7), None);
    }

    #[test]
    fn clean_compacts_only_from_the_head() {
        let mut buf = [0u8; 256];
        let mut q = MessageQueue::init(&mut buf);
        q.register(3, Type::PUBLISH, 1).unwrap().copy_from_slice(b"one");
        q.register(3, Type::PUBLISH, 2).unwrap().copy_from_slice(b"two");
        q.register(5, Type::PUBLISH, 3).unwrap().copy_from_slice(b"three");

        q.set_state(0, State::Complete);
        q.set_state(2, State::Complete);
        q.clean();

        assert_eq!(q.length(), 2);
        let head = q.get(0).unwrap();
        assert_eq!(head.packet_id, 2);
        assert_eq!(head.start, 0);
        assert_eq!(q.payload(0).unwrap(), b"two");
        let tail = q.get(1).unwrap();
        assert_eq!(tail.packet_id, 3);
        assert_eq!(tail.state, State::Complete);
        assert_eq!(q.payload(1).unwrap(), b"three");

        q.set_state(0, State::Complete);
        q.clean();
        assert_eq!(q.length(), 0);
        assert_eq!(q.remaining(), q.capacity());
    }

    #[test]
    fn invariant_sizes_account_for_the_whole_arena() {
        let mut buf = [0u8; 256];
        let mut q = MessageQueue::init(&mut buf);
        q.register(10, Type::PUBLISH, 1).unwrap();
        q.register(20, Type::PUBLISH, 2).unwrap();
        let resident_payload: usize = (0..q.length()).map(|i| q.get(i).unwrap().size).sum();
        assert_eq!(
            resident_payload + q.remaining() + q.length() * RECORD_SIZE,
            q.capacity()
        );
    }
}
