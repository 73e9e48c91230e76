// SPDX-License-Identifier: BSD-3-Clause
//! The out-of-scope collaborators, named only by contract.
//!
//! Neither trait here is implemented by this crate: connection setup, the
//! reliable byte-stream transport, and rate/queue management all live
//! below this layer. A caller wires a concrete transport (io_uring, plain
//! TCP, a test double) in.

/// A reliable, in-order, flow-controlled byte pipe.
pub trait TxSink {
    /// Push up to `bytes.len()` bytes onto the outbound stream. Returns how
    /// many bytes were actually admitted; this may be a strict prefix
    /// (including zero), in which case the caller must resume with the
    /// remainder later. `push` must never admit part of a header — callers
    /// only ever pass a header as a single `push` call.
    fn push(&mut self, bytes: &[u8]) -> usize;

    /// The transport's current unfilled TX budget in bytes.
    fn free_txbuf_len(&self) -> usize;
}

/// The rate/queue manager upcall made when the bump handler discovers the
/// transport's sendable-byte estimate grew.
pub trait SendNotify {
    fn notify_more_sendable(&mut self, delta_bytes: usize);
}

impl SendNotify for () {
    fn notify_more_sendable(&mut self, _delta_bytes: usize) {}
}
