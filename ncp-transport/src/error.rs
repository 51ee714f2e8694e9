// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error surface shared by every component in this crate.
//!
//! Kept as a flat `Copy` enum in the style of the teacher's driver tasks
//! (e.g. `ResponseCode` in `stm32h7-usart`) rather than a boxed error chain:
//! every variant here is something a caller is expected to match on and
//! react to, not just display.

use core::fmt;

/// Surface of C5–C9 and upward, per spec §7.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A caller-supplied argument was invalid (bad length, bad flag combo).
    InvalidArgs,
    /// The driver was asked to do something that doesn't make sense in its
    /// current session state (e.g. submit a datagram while Uninitialized).
    InvalidState,
    /// A spinel decode or argument-unpack mismatch.
    Parse,
    /// The outbound store has no room and the wait deadline elapsed, or a
    /// caller-supplied buffer was too small.
    NoBuffers,
    /// A request's deadline elapsed with no matching response (timeout).
    NoFrameReceived,
    /// The NCP replied with a non-OK last-status for this request.
    Failed(u32),
    /// The requested property/command is gated by a disabled config option.
    DisabledFeature,
    /// Recognized but unimplemented.
    NotImplemented,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgs => f.write_str("invalid arguments"),
            Error::InvalidState => f.write_str("invalid session state"),
            Error::Parse => f.write_str("parse error"),
            Error::NoBuffers => f.write_str("no buffers available"),
            Error::NoFrameReceived => f.write_str("timed out waiting for a response"),
            Error::Failed(status) => write!(f, "NCP rejected request, status={status}"),
            Error::DisabledFeature => f.write_str("feature disabled by configuration"),
            Error::NotImplemented => f.write_str("not implemented"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
