// SPDX-License-Identifier: BSD-3-Clause
//! The integration point: one `Flow` owns a memory region, a work-queue
//! ring, an RX state machine, and a TX scheduler, and exposes the external
//! interface a caller (app thread plus dataplane thread) drives.
//!
//! Everything mutable lives behind a single [`spin::Mutex`]. A design
//! where the app-side producer posts WQEs without taking the per-flow
//! lock, relying on a write-barrier-then-bump protocol across two address
//! spaces, has no safe non-`unsafe` expression within a single Rust
//! process — the producer and the dataplane would be racing on the same
//! `Vec<Wqe>` — so this crate takes the same lock on both paths. The
//! contract callers observe (ordering, rejection rules, bounds checks) is
//! unchanged; see DESIGN.md.

use std::collections::VecDeque;

use log::*;
use spin::Mutex;

use crate::error::{Error, Result};
use crate::mr::MemoryRegion;
use crate::ring::WqRing;
use crate::rx::{PendingResponse, RxEngine};
use crate::transport::{SendNotify, TxSink};
use crate::tx::TxScheduler;
use crate::wqe::{OpType, Wqe};

pub use crate::rx::ArxUpdate;

struct FlowInner {
    mr: MemoryRegion,
    wq: WqRing,
    rx: RxEngine,
    outbox: VecDeque<PendingResponse>,
    tx: TxScheduler,
    arx_updates: VecDeque<ArxUpdate>,
}

/// One RDMA-over-TCP flow: a memory region plus the ring/RX/TX state that
/// moves bytes in and out of it.
pub struct Flow {
    inner: Mutex<FlowInner>,
}

impl Flow {
    pub fn new(mr_len: u32, wq_entries: u32, rx_ring_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FlowInner {
                mr: MemoryRegion::new(mr_len),
                wq: WqRing::new(wq_entries),
                rx: RxEngine::new(rx_ring_capacity),
                outbox: VecDeque::new(),
                tx: TxScheduler::new(),
                arx_updates: VecDeque::new(),
            }),
        }
    }

    /// Post a local WRITE: send `len` bytes from local offset `loff` to the
    /// peer's memory region at `roff`. If this is the only outstanding WQE
    /// (the work queue was empty before the post), `notify` is told the
    /// newly sendable byte count so the caller can drive its rate/queue
    /// manager — an empty-to-nonempty transition is the only time the TX
    /// side isn't already being driven by something else.
    pub fn post_write(&self, len: u32, loff: u32, roff: u32, notify: &mut dyn SendNotify) -> Result<u32> {
        let mut inner = self.inner.lock();
        let mr_len = inner.mr.len();
        let out = inner.wq.post(OpType::Write, mr_len, len, loff, roff)?;
        trace!("posted WRITE id={} len={len} loff={loff} roff={roff}", out.id);
        if out.wq_was_empty {
            notify.notify_more_sendable(len as usize);
        }
        Ok(out.id)
    }

    /// Issuing a one-sided READ from this side is not implemented by this
    /// build. Callers get a clear error rather than a silently wrong
    /// result.
    pub fn post_read(&self, _len: u32, _loff: u32, _roff: u32) -> Result<u32> {
        warn!("post_read called but one-sided READ is unimplemented");
        Err(Error::InvalidArgument)
    }

    /// Drain up to `max` completed WQEs, advancing `cq_tail`.
    pub fn poll_completions(&self, max: usize) -> Vec<Wqe> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        inner.wq.poll_completions(&mut out, max);
        out
    }

    /// Read `len` bytes at local offset `loff` out of this flow's own
    /// memory region. No wire operation is involved: a flow's local memory
    /// is ordinary application memory the app already owns, exactly as on
    /// real RDMA hardware — this isn't the one-sided READ op, just local
    /// access.
    pub fn read_local(&self, loff: u32, len: u32) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.mr.read_at(loff, len).to_vec()
    }

    /// Stage bytes into this flow's own memory region at local offset
    /// `loff`, e.g. to fill a send buffer before calling
    /// [`Flow::post_write`].
    pub fn write_local(&self, loff: u32, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.mr.write_at(loff, data);
    }

    /// The dataplane-side bump handler, exposed directly for callers that
    /// manage their own producer-side cursor bookkeeping out of band
    /// instead of going through [`Flow::post_write`]. Notifies the same way
    /// `post_write` does on an empty-to-nonempty transition.
    pub fn bump(&self, new_wq_head: u32, new_cq_tail: u32, notify: &mut dyn SendNotify) -> Result<()> {
        let mut inner = self.inner.lock();
        let out = inner.wq.bump(new_wq_head, new_cq_tail)?;
        if out.wq_was_empty {
            notify.notify_more_sendable(out.wq_head_advanced_by as usize);
        }
        Ok(())
    }

    /// Feed inbound bytes from the transport. Stages them into the RX ring
    /// and drives the PARSE/DATA loop as far as currently possible,
    /// applying payloads, completing matched local WQEs (queuing an
    /// [`ArxUpdate`] for each completion), and queuing replies. Returns how
    /// many bytes were admitted into the RX ring.
    pub fn on_rx_bytes(&self, bytes: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let staged = inner.rx.stage(bytes);

        let FlowInner { mr, wq, rx, outbox, arx_updates, .. } = &mut *inner;
        rx.drive(mr, wq, outbox, arx_updates);

        debug!("processed inbound bytes: staged={staged}");
        staged
    }

    /// Push as much queued TX work onto `sink` as it currently has room
    /// for. Returns the number of whole frames transmitted.
    pub fn drive_tx(&self, sink: &mut dyn TxSink) -> usize {
        let mut inner = self.inner.lock();
        let FlowInner { mr, wq, outbox, tx, .. } = &mut *inner;
        tx.drive(mr, wq, outbox, sink)
    }

    /// Drain queued RX-credit notifications for relay to the peer.
    pub fn drain_arx_updates(&self) -> Vec<ArxUpdate> {
        let mut inner = self.inner.lock();
        inner.arx_updates.drain(..).collect()
    }
}
