//! Outbound and inbound byte-stream buffers.
//!
//! Modeled on the bookkeeping shape of `shadow-shadow/src/lib/tcp/src/buffer.rs`'s `SendQueue`/
//! `RecvQueue` (a queue of segments plus `start_seq`/`end_seq` markers), but simplified to plain
//! non-wrapping byte offsets: spec.md's data model tracks `out_i`/`out_ack_i`/`inc_i`/
//! `inc_read_i` as byte *counts*, not 32-bit wire sequence numbers subject to wraparound, so there
//! is no need for the teacher's `Seq`/`SeqRange` modular-arithmetic wrapper type here.

use std::collections::BTreeMap;

use bytes::Bytes;

/// The sender side of a TCP byte stream: all bytes ever handed to `sendall`, plus how much of
/// that has been put on the wire (`out_i`) and how much of that has been acknowledged
/// (`out_ack_i`).
#[derive(Debug, Default)]
pub struct SendBuffer {
    data: Vec<u8>,
    out_i: usize,
    out_ack_i: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly-written application bytes to the end of the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn out_i(&self) -> usize {
        self.out_i
    }

    pub fn out_ack_i(&self) -> usize {
        self.out_ack_i
    }

    /// Bytes in the half-open range `[start, end)`, to be carried by an outgoing data segment.
    pub fn slice(&self, start: usize, end: usize) -> Bytes {
        Bytes::copy_from_slice(&self.data[start..end])
    }

    /// Mark bytes up to (exclusive) `to` as sent at least once. `to` must not exceed `len()`.
    pub fn advance_out_i(&mut self, to: usize) {
        debug_assert!(to <= self.data.len());
        debug_assert!(to >= self.out_i);
        self.out_i = to;
    }

    /// Rewind the "sent" marker back to the last acknowledged byte, so the next `sendall` pass
    /// re-emits everything that was in flight when a loss was declared.
    pub fn rewind_to_ack(&mut self) {
        self.out_i = self.out_ack_i;
    }

    /// Record an ACK for byte offset `ack_num`. Returns the number of newly-acknowledged bytes if
    /// this is a *new* ACK (`ack_num > out_ack_i`), or `None` if it's a duplicate or stale ACK.
    pub fn ack(&mut self, ack_num: usize) -> Option<u32> {
        if ack_num > self.out_ack_i {
            let new_bytes = (ack_num - self.out_ack_i) as u32;
            self.out_ack_i = ack_num;
            Some(new_bytes)
        } else {
            None
        }
    }

    pub fn is_fully_acked(&self) -> bool {
        self.out_ack_i >= self.data.len()
    }
}

/// The receive side of a TCP byte stream: a reassembly buffer that accepts segments arriving
/// out of order (tracked in `holes`) and promotes them into `contiguous` (a prefix of the stream,
/// `inbound[0..inc_i)`) as gaps are filled, plus `inc_read_i` tracking how much of that prefix the
/// application has consumed via `recv()`.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    contiguous: Vec<u8>,
    inc_read_i: usize,
    /// Segments that arrived ahead of `inc_i`, keyed by their starting offset.
    holes: BTreeMap<usize, Bytes>,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-order byte count: the length of the contiguous prefix received so far.
    pub fn inc_i(&self) -> usize {
        self.contiguous.len()
    }

    pub fn inc_read_i(&self) -> usize {
        self.inc_read_i
    }

    /// Place `payload` at `[seq_num, seq_num + payload.len())`. Returns the number of bytes this
    /// added to the contiguous prefix (0 if the segment was a pure duplicate, or if it extended
    /// only the out-of-order hole set without closing a gap at `inc_i`).
    pub fn insert(&mut self, seq_num: usize, payload: Bytes) -> usize {
        if payload.is_empty() {
            return 0;
        }

        let inc_i_before = self.contiguous.len();
        let end = seq_num + payload.len();

        if end <= inc_i_before {
            // entirely duplicate data already delivered into the contiguous prefix
            return 0;
        }

        if seq_num > inc_i_before {
            // ahead of the next expected byte: stash as a hole, keeping the larger segment if we
            // already have an overlapping one starting at the same offset
            self.holes
                .entry(seq_num)
                .and_modify(|existing| {
                    if payload.len() > existing.len() {
                        *existing = payload.clone();
                    }
                })
                .or_insert(payload);
        } else {
            // overlaps or abuts the contiguous prefix: append the new tail
            let skip = inc_i_before - seq_num;
            self.contiguous.extend_from_slice(&payload[skip..]);
        }

        self.drain_holes();
        self.contiguous.len() - inc_i_before
    }

    /// After `contiguous` grows, pull in any buffered holes that are now contiguous with it.
    fn drain_holes(&mut self) {
        loop {
            let inc_i = self.contiguous.len();
            let Some((&start, _)) = self.holes.first_key_value() else {
                break;
            };
            if start > inc_i {
                break;
            }
            let (start, chunk) = self.holes.pop_first().unwrap();
            if start + chunk.len() <= inc_i {
                // stale, already covered
                continue;
            }
            let skip = inc_i - start;
            self.contiguous.extend_from_slice(&chunk[skip..]);
        }
    }

    /// Bytes available to be delivered to the application: `[inc_read_i, inc_i)`. Advances
    /// `inc_read_i` to `inc_i`.
    pub fn take_readable(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.contiguous[self.inc_read_i..]);
        self.inc_read_i = self.contiguous.len();
        out
    }

    pub fn has_readable(&self) -> bool {
        self.inc_read_i < self.contiguous.len()
    }
}
