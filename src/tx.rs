// SPDX-License-Identifier: BSD-3-Clause
//! The TX scheduler.
//!
//! Alternates strictly between the request side (outgoing WQEs drawn from
//! `[wq_tail, wq_head)`) and the response side (replies queued by the RX
//! state machine for inbound requests this flow must service), tracked by
//! a single side bit. A frame in progress is resumed byte-for-byte across
//! `drive` calls via [`TxProgress`]; the one hard rule is that a header is
//! never split across two `push` calls.

use std::collections::VecDeque;

use crate::header::{FrameType, Header, HEADER_SIZE};
use crate::mr::MemoryRegion;
use crate::ring::WqRing;
use crate::rx::PendingResponse;
use crate::transport::TxSink;
use crate::wqe::{OpType, Status, Wqe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Response,
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Request => Side::Response,
        Side::Response => Side::Request,
    }
}

struct InFlight {
    frame: Vec<u8>,
    sent: usize,
    side: Side,
    /// The WQ ring slot this frame was built from, for `Side::Request`.
    wqe_offset: Option<u32>,
}

/// Where the scheduler is within the current frame, if any. Resuming a
/// partial frame means picking `sent` back up where it left off rather than
/// re-choosing a side or rebuilding the frame.
enum TxProgress {
    Idle,
    InFlight(InFlight),
}

pub struct TxScheduler {
    next_side: Side,
    progress: TxProgress,
}

impl Default for TxScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TxScheduler {
    pub fn new() -> Self {
        Self {
            next_side: Side::Request,
            progress: TxProgress::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.progress, TxProgress::Idle)
    }

    /// Push as many bytes as `sink` currently has room for, across as many
    /// frames as fit. Returns the number of frames fully transmitted.
    pub fn drive(
        &mut self,
        mr: &MemoryRegion,
        wq: &mut WqRing,
        outbox: &mut VecDeque<PendingResponse>,
        sink: &mut dyn TxSink,
    ) -> usize {
        let mut completed = 0;

        loop {
            if self.is_idle() {
                if !self.start_next(mr, wq, outbox) {
                    break;
                }
                if self.is_idle() {
                    // start_next short-circuited an out-of-bounds WQE
                    // without producing a frame; try the next slot.
                    continue;
                }
            }

            let TxProgress::InFlight(inflight) = &mut self.progress else {
                unreachable!("checked above")
            };

            if inflight.sent == 0 && sink.free_txbuf_len() < HEADER_SIZE {
                // Header atomicity: wait until the whole header fits in a
                // single push before starting this frame.
                break;
            }

            let pushed = sink.push(&inflight.frame[inflight.sent..]);
            if pushed == 0 {
                break;
            }
            inflight.sent += pushed;

            if inflight.sent == inflight.frame.len() {
                self.finish_current(wq);
                completed += 1;
            }
        }

        completed
    }

    /// Pick the next frame to send, preferring `self.next_side` but falling
    /// back to the other side if it has nothing ready, so one empty side
    /// never stalls the other. Returns `false` if neither side has work.
    fn start_next(&mut self, mr: &MemoryRegion, wq: &mut WqRing, outbox: &mut VecDeque<PendingResponse>) -> bool {
        for side in [self.next_side, opposite(self.next_side)] {
            match side {
                Side::Request => {
                    if wq.pending_tx_len() == 0 {
                        continue;
                    }
                    let offset = wq.wq_tail();
                    let entry = *wq.entry(offset);
                    if !entry.in_bounds(mr.len()) {
                        wq.terminalise_oob_at_wq_tail();
                        self.next_side = opposite(side);
                        return true;
                    }
                    self.progress = TxProgress::InFlight(InFlight {
                        frame: build_request_frame(&entry, mr),
                        sent: 0,
                        side: Side::Request,
                        wqe_offset: Some(offset),
                    });
                    self.next_side = opposite(side);
                    return true;
                }
                Side::Response => {
                    if let Some(resp) = outbox.pop_front() {
                        let mut frame = resp.header.encode(None).to_vec();
                        frame.extend_from_slice(&resp.payload);
                        self.progress = TxProgress::InFlight(InFlight {
                            frame,
                            sent: 0,
                            side: Side::Response,
                            wqe_offset: None,
                        });
                        self.next_side = opposite(side);
                        return true;
                    }
                }
            }
        }
        false
    }

    fn finish_current(&mut self, wq: &mut WqRing) {
        if let TxProgress::InFlight(inflight) = std::mem::replace(&mut self.progress, TxProgress::Idle) {
            if inflight.side == Side::Request {
                let offset = inflight.wqe_offset.expect("request frames always carry their WQ offset");
                wq.entry_mut(offset).status = Status::RespPending;
                wq.advance_wq_tail();
            }
        }
    }
}

fn build_request_frame(entry: &Wqe, mr: &MemoryRegion) -> Vec<u8> {
    let (frame_type, payload) = match entry.ty {
        OpType::Write => (FrameType::RequestWrite, mr.read_at(entry.loff, entry.len).to_vec()),
        OpType::Read => (FrameType::RequestRead, Vec::new()),
    };
    let header = Header {
        frame_type,
        status: 0,
        id: entry.id,
        length: entry.len,
        offset: entry.roff,
    };
    let mut frame = header.encode(None).to_vec();
    frame.extend_from_slice(&payload);
    frame
}
