// SPDX-License-Identifier: BSD-3-Clause
//! The RX protocol state machine.
//!
//! Bytes arrive from the transport in arbitrary chunks and are staged in a
//! circular [`RxRing`] before the PARSE/DATA loop drains them. PARSE
//! accumulates the 16-byte header; DATA absorbs a known frame's payload
//! into the local memory region (inbound `REQUEST|WRITE`) or nowhere at all
//! (an out-of-bounds payload is still consumed off the wire so the parser
//! stays in sync with the peer, it's just not written anywhere — "discard
//! but credit accounted"). One-sided READ, in either direction, is not
//! serviced; both `REQUEST|READ` and `RESPONSE|READ` are fatal.

use std::collections::VecDeque;

use crate::header::{FrameType, Header, HEADER_SIZE};
use crate::mr::MemoryRegion;
use crate::ring::WqRing;
use crate::wqe::Status;

/// A framed response staged for transmission by the TX scheduler, built in
/// reply to an inbound request this flow must service.
pub struct PendingResponse {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Queued for the caller to relay to the peer's flow-control layer after a
/// response completion bumps `cq_head`: the peer's `bump` handler wants the
/// current `wq_tail`/`cq_head` so it can recompute sendable credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArxUpdate {
    pub wq_tail: u32,
    pub cq_head: u32,
}

/// The circular receive buffer bytes are staged in before parsing.
pub struct RxRing {
    buf: Vec<u8>,
    cap: usize,
    head: usize,
    len: usize,
}

impl RxRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= HEADER_SIZE, "RX ring must hold at least one header");
        Self {
            buf: vec![0u8; capacity],
            cap: capacity,
            head: 0,
            len: 0,
        }
    }

    pub fn free_len(&self) -> usize {
        self.cap - self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn tail(&self) -> usize {
        (self.head + self.cap - self.len) % self.cap
    }

    /// Append as many of `bytes` as fit, via a two-segment copy when the
    /// write wraps past the end of the backing array. Returns the number of
    /// bytes actually admitted.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free_len());
        let first = (self.cap - self.head).min(n);
        self.buf[self.head..self.head + first].copy_from_slice(&bytes[..first]);
        if n > first {
            self.buf[..n - first].copy_from_slice(&bytes[first..n]);
        }
        self.head = (self.head + n) % self.cap;
        self.len += n;
        n
    }

    /// Copy `out.len()` unconsumed bytes starting at the current tail into
    /// `out`, without consuming them. Caller must have checked
    /// `out.len() <= self.len()`.
    fn peek(&self, out: &mut [u8]) {
        let tail = self.tail();
        let first = (self.cap - tail).min(out.len());
        out[..first].copy_from_slice(&self.buf[tail..tail + first]);
        if out.len() > first {
            out[first..].copy_from_slice(&self.buf[..out.len() - first]);
        }
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.len -= n;
    }
}

/// What an absorbed payload's bytes should be written to, if anything.
enum PayloadTarget {
    /// Write into the local memory region at this offset as bytes arrive.
    MemoryRegion(u32),
    /// The frame is out of bounds; consume the bytes and drop them.
    Discard,
}

enum ParseState {
    Header {
        have: usize,
        buf: [u8; HEADER_SIZE],
    },
    Payload {
        header: Header,
        consumed: u32,
        target: PayloadTarget,
    },
}

impl Default for ParseState {
    fn default() -> Self {
        ParseState::Header {
            have: 0,
            buf: [0u8; HEADER_SIZE],
        }
    }
}

/// The RX state machine for one flow: a staging ring plus the current
/// PARSE/DATA position.
pub struct RxEngine {
    ring: RxRing,
    state: ParseState,
}

impl RxEngine {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: RxRing::new(ring_capacity),
            state: ParseState::default(),
        }
    }

    pub fn free_len(&self) -> usize {
        self.ring.free_len()
    }

    /// Stage inbound bytes. Returns how many bytes were admitted; a caller
    /// whose transport can't hold back would treat a short return as
    /// backpressure.
    pub fn stage(&mut self, bytes: &[u8]) -> usize {
        self.ring.push(bytes)
    }

    /// Drain as much of the staged bytes as currently form complete or
    /// partial frames, applying payloads to `mr`, completing matching local
    /// WQEs in `wq` (queuing an [`ArxUpdate`] onto `arx_updates` for each
    /// completion), and queuing replies for inbound requests onto `outbox`.
    /// Panics via [`protocol_violation`] on an unparseable header or an id
    /// mismatch against the expected completion — there is no recoverable
    /// `Result` case for either, since both mean the peer and this flow have
    /// lost sync on the wire.
    pub fn drive(
        &mut self,
        mr: &mut MemoryRegion,
        wq: &mut WqRing,
        outbox: &mut VecDeque<PendingResponse>,
        arx_updates: &mut VecDeque<ArxUpdate>,
    ) {
        loop {
            match &mut self.state {
                ParseState::Header { have, buf } => {
                    let need = HEADER_SIZE - *have;
                    let take = self.ring.len().min(need);
                    if take == 0 {
                        return;
                    }
                    let mut tmp = [0u8; HEADER_SIZE];
                    self.ring.peek(&mut tmp[..take]);
                    buf[*have..*have + take].copy_from_slice(&tmp[..take]);
                    self.ring.consume(take);
                    *have += take;

                    if *have < HEADER_SIZE {
                        return;
                    }

                    let header = match Header::decode(buf) {
                        Some(h) => h,
                        None => protocol_violation("unrecognised frame type byte"),
                    };
                    self.dispatch_header(header, mr, wq, outbox, arx_updates);
                }
                ParseState::Payload {
                    header,
                    consumed,
                    target,
                } => {
                    let need = (header.length - *consumed) as usize;
                    if need == 0 {
                        let header = *header;
                        self.finish_payload(header, mr, wq, outbox, arx_updates);
                        continue;
                    }
                    let take = self.ring.len().min(need);
                    if take == 0 {
                        return;
                    }
                    let mut tmp = vec![0u8; take];
                    self.ring.peek(&mut tmp);
                    self.ring.consume(take);

                    if let PayloadTarget::MemoryRegion(loff) = target {
                        mr.write_at(*loff + *consumed, &tmp);
                    }
                    *consumed += take as u32;

                    if *consumed == header.length {
                        let header = *header;
                        self.finish_payload(header, mr, wq, outbox, arx_updates);
                    }
                }
            }
        }
    }

    fn dispatch_header(
        &mut self,
        header: Header,
        mr: &mut MemoryRegion,
        wq: &mut WqRing,
        outbox: &mut VecDeque<PendingResponse>,
        arx_updates: &mut VecDeque<ArxUpdate>,
    ) {
        if !header.frame_type.has_payload() {
            self.finish_payload(header, mr, wq, outbox, arx_updates);
            return;
        }

        let target = match header.frame_type {
            FrameType::RequestWrite => {
                if mr.in_bounds(header.offset, header.length) {
                    PayloadTarget::MemoryRegion(header.offset)
                } else {
                    PayloadTarget::Discard
                }
            }
            FrameType::ResponseRead => protocol_violation("one-sided READ is not serviced"),
            FrameType::RequestRead | FrameType::ResponseWrite => unreachable!("no payload"),
        };

        self.state = ParseState::Payload {
            header,
            consumed: 0,
            target,
        };
    }

    /// A frame (header plus, if any, its now-fully-absorbed payload) is
    /// complete. Apply its effect and reset to PARSE for the next header.
    fn finish_payload(
        &mut self,
        header: Header,
        mr: &mut MemoryRegion,
        wq: &mut WqRing,
        outbox: &mut VecDeque<PendingResponse>,
        arx_updates: &mut VecDeque<ArxUpdate>,
    ) {
        match header.frame_type {
            FrameType::RequestRead => protocol_violation("one-sided READ is not serviced"),
            FrameType::RequestWrite => {
                let in_bounds = mr.in_bounds(header.offset, header.length);
                outbox.push_back(PendingResponse {
                    header: Header {
                        frame_type: FrameType::ResponseWrite,
                        status: if in_bounds { 0 } else { 1 },
                        id: header.id,
                        length: 0,
                        offset: 0,
                    },
                    payload: Vec::new(),
                });
            }
            FrameType::ResponseWrite => {
                self.complete_local_wqe(header, wq, arx_updates);
            }
            FrameType::ResponseRead => protocol_violation("one-sided READ is not serviced"),
        }

        self.state = ParseState::default();
    }

    /// Find the first WQE in `[cq_head, wq_tail)` whose status is still
    /// `RESP_PENDING`, skipping forward over any entry already terminalized
    /// out of band (e.g. by [`WqRing::terminalise_oob_at_wq_tail`]), apply
    /// the response to it, and queue an [`ArxUpdate`] reporting the new
    /// `wq_tail`/`cq_head` for the peer's flow-control layer.
    fn complete_local_wqe(&self, header: Header, wq: &mut WqRing, arx_updates: &mut VecDeque<ArxUpdate>) {
        while wq.cq_head() != wq.wq_tail() && wq.entry(wq.cq_head()).status != Status::RespPending {
            wq.advance_cq_head();
        }
        if wq.cq_head() == wq.wq_tail() {
            protocol_violation("no RESP_PENDING entry to complete");
        }
        let entry = wq.entry(wq.cq_head());
        if entry.id != header.id {
            protocol_violation("response id does not match expected completion");
        }
        let status = if header.status == 0 { Status::Success } else { Status::OutOfBounds };
        wq.entry_mut(wq.cq_head()).status = status;
        wq.advance_cq_head();

        arx_updates.push_back(ArxUpdate {
            wq_tail: wq.wq_tail(),
            cq_head: wq.cq_head(),
        });
    }
}

/// A protocol violation is fatal: there is no recovery path, the flow must
/// be torn down. Surfaced as a panic rather than a `Result` variant.
fn protocol_violation(reason: &str) -> ! {
    panic!("protocol violation: {reason}")
}
