// SPDX-License-Identifier: BSD-3-Clause
use std::fmt;

/// Errors returned by the ring discipline, RX state machine, and TX scheduler.
///
/// A protocol violation (a mismatched response id or an unrecognized header
/// type) is not a variant here: it is a fatal condition with no recovery
/// path, and is surfaced as a panic from [`crate::rx`] rather than threaded
/// through `Result`.
#[derive(Debug)]
pub enum Error {
    /// Bad offset/length, or an operation not supported by this build
    /// (currently: issuing a one-sided READ from this side).
    InvalidArgument,

    /// No free work-queue slot; the app-visible pending byte count has
    /// reached the ring size.
    QueueFull,

    /// The dataplane rejected a bump because it would violate cursor
    /// ordering. Always a logic bug in the caller.
    BumpRejected,

    /// A peer-requested WRITE's `loff + len` exceeded the memory region.
    /// The WQE was terminalised `OUT_OF_BOUNDS`; this variant is only
    /// returned from APIs that check bounds before queuing.
    OutOfBounds,

    /// The transport-level upcall failed (e.g. the bump notification could
    /// not be delivered).
    TransportError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidArgument => "invalid argument",
                Self::QueueFull => "work queue full",
                Self::BumpRejected => "bump rejected: cursor ordering violated",
                Self::OutOfBounds => "offset + length exceeds memory region",
                Self::TransportError => "transport upcall failed",
            }
        )
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
