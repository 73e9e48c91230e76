// SPDX-License-Identifier: BSD-3-Clause
//! A user-space RDMA-over-TCP data plane core: ring discipline, an RX
//! protocol state machine, and a TX scheduler, for flows whose connection
//! setup and byte transport live elsewhere (see [`transport`]).
//!
//! The three pieces line up with the wire they share:
//!
//! - [`ring`]: the four-cursor work-queue/completion-queue ring and the
//!   app-facing post/poll/bump contract.
//! - [`rx`]: the PARSE/DATA loop that turns inbound bytes into completed
//!   local WQEs and queued replies.
//! - [`tx`]: the scheduler that frames outgoing WQEs and queued replies
//!   onto the transport, alternating strictly between the two.
//!
//! [`flow::Flow`] wires the three together behind a per-flow lock.

pub mod error;
pub mod flow;
pub mod header;
pub mod mr;
pub mod ring;
pub mod rx;
pub mod transport;
pub mod tx;
pub mod wqe;

pub use error::{Error, Result};
pub use flow::{ArxUpdate, Flow};
pub use header::{FrameType, Header, HEADER_SIZE};
pub use mr::MemoryRegion;
pub use transport::{SendNotify, TxSink};
pub use wqe::{OpType, Status, Wqe, WQE_SIZE};
