// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Framed, transaction-multiplexed transport and session supervisor for a
//! Thread/802.15.4 network co-processor talking Spinel-over-HDLC.
//!
//! The crate is laid out as one small, independently testable module per
//! component of the transport (byte I/O, framing, the wire codec, the
//! transaction matcher, the outbound store, the pump, control-plane
//! dispatch, the session supervisor, the reset hook) plus [`driver`], which
//! wires them all together behind [`driver::Driver`]. Nothing here assumes a
//! real scheduler underneath it: every suspension point is a plain
//! non-blocking call the caller retries after a wakeup, so the same code
//! runs on bare metal or in a host test.
#![cfg_attr(not(test), no_std)]

pub mod byteio;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod events;
pub mod fifo;
pub mod firmware;
pub mod hdlc;
pub mod mailbox;
pub mod outbound;
pub mod properties;
pub mod pump;
pub mod reset;
pub mod spinel;
pub mod supervisor;
pub mod transaction;

pub use byteio::{ByteIo, SerialSink};
pub use dispatch::{Dispatch, Signal};
pub use driver::{Config, Driver, PumpAction, ResponseMeta, MTU};
pub use error::{Error, Result};
pub use events::{CallbackPool, CallbackSlot, Capabilities, Event, NoCapabilities, ScanResult};
pub use firmware::BootloaderChannel;
pub use outbound::{Handle, OutboundStore};
pub use properties::{Command, NetRole};
pub use pump::SecurityFlags;
pub use reset::{LoopbackReset, ResetHook};
pub use spinel::{Packer, Unpacker, Value};
pub use supervisor::{ResetPolicy, SessionState};
pub use transaction::{Route, TransactionMatcher};
