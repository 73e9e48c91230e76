// SPDX-License-Identifier: BSD-3-Clause
//! The work-queue/completion-queue ring discipline.
//!
//! The four cursors `cq_tail <= cq_head <= wq_tail <= wq_head` (cyclically,
//! modulo `ring_size`) partition the ring into completed / unacked /
//! pending-transmit / free regions. This module owns that partition and
//! the two operations that move its boundaries: the app-side producer API
//! (`post`, `poll_completions`) and the dataplane-side `bump` handler.

use crate::error::{Error, Result};
use crate::wqe::{OpType, Status, Wqe, WQE_SIZE};

/// Forward (cyclic) distance from `from` to `to`, both already reduced
/// modulo `ring_size`.
fn dist(from: u32, to: u32, ring_size: u32) -> u32 {
    (to + ring_size - from) % ring_size
}

/// Outcome of a successful producer `post`.
pub struct PostOutcome {
    pub id: u32,
    /// Whether the work queue was empty (`wq_tail == wq_head`) before this
    /// post — the caller should drive the TX scheduler in this case, since
    /// an empty-to-nonempty transition is the only time the scheduler isn't
    /// already being driven by something else.
    pub wq_was_empty: bool,
}

/// Outcome of a successful `bump`.
pub struct BumpOutcome {
    /// Whether the work queue was empty before the bump was applied.
    pub wq_was_empty: bool,
    /// How far `wq_head` moved forward, in ring bytes.
    pub wq_head_advanced_by: u32,
}

/// The work-queue ring: a flat array of [`Wqe`] slots plus the four cursors
/// that partition it.
pub struct WqRing {
    entries: Vec<Wqe>,
    ring_size: u32,
    cq_tail: u32,
    cq_head: u32,
    wq_tail: u32,
    wq_head: u32,
}

impl WqRing {
    pub fn new(num_entries: u32) -> Self {
        assert!(num_entries > 0, "ring must have at least one WQE slot");
        Self {
            entries: vec![Wqe::new(0, OpType::Write, 0, 0, 0); num_entries as usize],
            ring_size: num_entries * WQE_SIZE,
            cq_tail: 0,
            cq_head: 0,
            wq_tail: 0,
            wq_head: 0,
        }
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn wq_tail(&self) -> u32 {
        self.wq_tail
    }

    pub fn wq_head(&self) -> u32 {
        self.wq_head
    }

    pub fn cq_head(&self) -> u32 {
        self.cq_head
    }

    pub fn cq_tail(&self) -> u32 {
        self.cq_tail
    }

    fn index(&self, offset: u32) -> usize {
        (offset / WQE_SIZE) as usize
    }

    pub fn entry(&self, offset: u32) -> &Wqe {
        &self.entries[self.index(offset)]
    }

    pub fn entry_mut(&mut self, offset: u32) -> &mut Wqe {
        let idx = self.index(offset);
        &mut self.entries[idx]
    }

    fn advance(&self, offset: u32) -> u32 {
        dist(0, offset + WQE_SIZE, self.ring_size)
    }

    /// Advance `wq_tail` by one WQE (the scheduler has finished framing the
    /// entry at the old `wq_tail`).
    pub fn advance_wq_tail(&mut self) {
        self.wq_tail = self.advance(self.wq_tail);
    }

    /// Advance `cq_head` by one WQE (a response was matched and applied).
    pub fn advance_cq_head(&mut self) {
        self.cq_head = self.advance(self.cq_head);
    }

    /// Bytes currently occupied by pending-transmit WQEs (`[wq_tail, wq_head)`).
    pub fn pending_tx_len(&self) -> u32 {
        dist(self.wq_tail, self.wq_head, self.ring_size)
    }

    /// Bytes currently occupied by unacked WQEs (`[cq_head, wq_tail)`).
    pub fn unacked_len(&self) -> u32 {
        dist(self.cq_head, self.wq_tail, self.ring_size)
    }

    /// Backs `post_read`/`post_write`. Writes a new WQE at the producer's
    /// notion of `wq_head`, then immediately runs the bump handler to
    /// publish it (in this single-process crate the "upcall" to the
    /// dataplane is this same call, under the same lock — see DESIGN.md
    /// for why this collapses the two steps a cross-address-space design
    /// would keep separate).
    pub fn post(&mut self, ty: OpType, mr_len: u32, len: u32, loff: u32, roff: u32) -> Result<PostOutcome> {
        if loff.checked_add(len).is_none_or(|end| end > mr_len) {
            return Err(Error::InvalidArgument);
        }

        let wq_len_app = dist(self.wq_tail, self.wq_head, self.ring_size);
        let cq_len_app = dist(self.cq_tail, self.cq_head, self.ring_size);
        if wq_len_app + cq_len_app >= self.ring_size {
            return Err(Error::QueueFull);
        }

        let slot = self.wq_head;
        let new_wq_head = self.advance(slot);

        // Write the entry, then publish the new head. In the source this
        // ordering is enforced with an explicit write memory barrier; here
        // the whole flow (this function) runs under the per-flow lock, so
        // the write is visible to any reader of `self` before `bump`
        // applies the cursor move.
        *self.entry_mut(slot) = Wqe::new(slot, ty, len, loff, roff);

        let wq_was_empty_before = self.wq_tail == self.wq_head;
        match self.bump(new_wq_head, self.cq_tail) {
            Ok(_) => Ok(PostOutcome {
                id: slot,
                wq_was_empty: wq_was_empty_before,
            }),
            Err(e) => {
                // Roll back: the slot write is harmless because wq_head was
                // never advanced past it, so it remains part of the free
                // region and will simply be overwritten by the next post.
                Err(e)
            }
        }
    }

    /// Copies up to `max` completed WQEs out starting at `cq_tail`,
    /// advancing it. Asking the dataplane to publish more completions first
    /// is the caller's responsibility, since that requires driving the RX
    /// state machine, which this module doesn't own.
    pub fn poll_completions(&mut self, out: &mut Vec<Wqe>, max: usize) -> usize {
        let mut n = 0;
        while n < max && self.cq_tail != self.cq_head {
            out.push(*self.entry(self.cq_tail));
            self.cq_tail = self.advance(self.cq_tail);
            n += 1;
        }
        n
    }

    /// The dataplane-side bump handler. Validates that the proposed cursors
    /// only extend the pending/completed regions forward, then applies
    /// them.
    ///
    /// The rejection rule — reject any bump that does not extend the
    /// pending/completed regions forward without swallowing an intermediate
    /// cursor — is encoded here as two distance checks against the *old*
    /// cursor values:
    ///
    /// - `new_wq_head` must lie within the current free region, i.e. its
    ///   forward distance from the old `wq_head` must not exceed the
    ///   forward distance from the old `wq_head` to `cq_tail` (moving past
    ///   that would walk into the completed-or-unacked region and swallow
    ///   `cq_head`, which sits strictly between `cq_tail` and `wq_tail`).
    /// - `new_cq_tail` must lie within the current completed region, i.e.
    ///   its forward distance from the old `cq_tail` must not exceed the
    ///   distance from `cq_tail` to `cq_head` (moving past that would drain
    ///   completions the dataplane hasn't posted yet).
    ///
    /// Both checks are anchored on the pre-bump cursor values, so they
    /// compose without needing a combined check: `wq_head`'s bound never
    /// approaches `cq_head` from the far side, and `cq_tail`'s bound never
    /// approaches `wq_tail`.
    ///
    /// `dist(wq_head, cq_tail)` alone can't tell "nothing occupied" from
    /// "ring_size occupied" apart: both reduce to the same residue mod
    /// `ring_size`. A freshly constructed ring has all four cursors at 0,
    /// which is exactly that degenerate point, so it's special-cased below.
    /// It can only mean genuinely empty here: the completed, unacked, and
    /// pending-tx regions are each individually bounded below `ring_size`,
    /// so all four cursors coinciding can't also be the fully-wrapped-full
    /// point for any of them.
    pub fn bump(&mut self, new_wq_head: u32, new_cq_tail: u32) -> Result<BumpOutcome> {
        if new_wq_head >= self.ring_size || new_cq_tail >= self.ring_size {
            return Err(Error::BumpRejected);
        }

        let free_room = if self.wq_tail == self.wq_head && self.cq_tail == self.cq_head {
            self.ring_size
        } else {
            dist(self.wq_head, self.cq_tail, self.ring_size)
        };
        if dist(self.wq_head, new_wq_head, self.ring_size) > free_room {
            return Err(Error::BumpRejected);
        }

        let completed_room = dist(self.cq_tail, self.cq_head, self.ring_size);
        if dist(self.cq_tail, new_cq_tail, self.ring_size) > completed_room {
            return Err(Error::BumpRejected);
        }

        let wq_was_empty = self.wq_tail == self.wq_head;
        let wq_head_advanced_by = dist(self.wq_head, new_wq_head, self.ring_size);
        self.wq_head = new_wq_head;
        self.cq_tail = new_cq_tail;

        Ok(BumpOutcome {
            wq_was_empty,
            wq_head_advanced_by,
        })
    }

    /// Terminalise the WQE at `wq_tail` as `OUT_OF_BOUNDS` without
    /// transmitting it, and advance `wq_tail` past it. `cq_head` is left
    /// alone: this entry sits in the unacked region until a later response
    /// completion skips forward over it, the same as any other entry whose
    /// response hasn't been matched yet.
    pub fn terminalise_oob_at_wq_tail(&mut self) {
        let slot = self.wq_tail;
        self.entry_mut(slot).status = Status::OutOfBounds;
        self.advance_wq_tail();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(entries: u32) -> WqRing {
        WqRing::new(entries)
    }

    #[test]
    fn post_write_assigns_offset_as_id() {
        let mut r = ring(4);
        let out = r.post(OpType::Write, 1024, 64, 0, 0).unwrap();
        assert_eq!(out.id, 0);
        assert!(out.wq_was_empty);

        let out2 = r.post(OpType::Write, 1024, 64, 64, 64).unwrap();
        assert_eq!(out2.id, WQE_SIZE);
    }

    #[test]
    fn rejects_out_of_bounds() {
        let mut r = ring(4);
        let err = r.post(OpType::Write, 1024, 64, 1000, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument));
    }

    #[test]
    fn queue_full_after_ring_size_posts_without_drain() {
        let mut r = ring(4);
        for _ in 0..4 {
            r.post(OpType::Write, 1024, 8, 0, 0).unwrap();
        }
        let err = r.post(OpType::Write, 1024, 8, 0, 0).unwrap_err();
        assert!(matches!(err, Error::QueueFull));
    }

    #[test]
    fn bump_rejects_wq_head_into_occupied_region() {
        let mut r = ring(4);
        for _ in 0..3 {
            r.post(OpType::Write, 1024, 8, 0, 0).unwrap();
        }
        // Three of four slots are now used (wq_head at 3*WQE_SIZE), leaving
        // one slot of free room. A bump asking for two slots' worth of
        // additional free room must be rejected.
        let err = r.bump(WQE_SIZE, 0).unwrap_err();
        assert!(matches!(err, Error::BumpRejected));
    }

    #[test]
    fn bump_accepts_extending_pending_region() {
        let mut r = ring(4);
        // Manually stage two entries worth of space without going through
        // post (post already bumps); verify a direct bump call accepts a
        // forward move within the free region.
        let out = r.bump(WQE_SIZE, 0).unwrap();
        assert!(out.wq_was_empty);
        assert_eq!(r.wq_head(), WQE_SIZE);
    }

    #[test]
    fn poll_completions_drains_fifo() {
        let mut r = ring(4);
        r.post(OpType::Write, 1024, 8, 0, 0).unwrap();
        r.post(OpType::Write, 1024, 8, 8, 0).unwrap();

        // Fast-forward the dataplane side directly for this unit test:
        // move wq_tail/cq_head past both entries as if they'd been sent
        // and acked, landing in the completed region.
        r.advance_wq_tail();
        r.advance_wq_tail();
        r.advance_cq_head();
        r.advance_cq_head();

        let mut out = Vec::new();
        let n = r.poll_completions(&mut out, 10);
        assert_eq!(n, 2);
        assert_eq!(out[0].id, 0);
        assert_eq!(out[1].id, WQE_SIZE);
    }
}
