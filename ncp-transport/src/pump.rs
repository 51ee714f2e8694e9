// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C7: the data-plane pump.
//!
//! Owns the stall flag and the pump-event dedup flag (spec §4.7, §8
//! invariant 4); the actual send-one-message work (framing, obtaining a
//! transaction id, awaiting last-status) lives in [`crate::driver`] since it
//! needs the outbound store, transaction matcher, and byte I/O together.
//! This module is deliberately generic over that via a closure, the same
//! shape as [`crate::hdlc::encode`] and [`crate::byteio::tx_put_blocking`].

use crate::mailbox::StickyFlag;

/// Security flag bits (spec §3): modulate per-message security during a
/// provisional join.
pub const THREAD_STARTED: u32 = 1 << 0;
pub const INSECURE_PORTS_ENABLED: u32 = 1 << 1;
pub const INSECURE_SOURCE_PORT_OPEN: u32 = 1 << 2;
pub const SECURE_MESSAGE_SEEN_ON_INSECURE_PORT: u32 = 1 << 3;

#[derive(Default)]
pub struct SecurityFlags(u32);

impl SecurityFlags {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn is_set(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// True while the device is provisionally joining: Thread has started
    /// but no insecure source port has been opened for it yet.
    pub fn is_provisional_join(&self) -> bool {
        self.is_set(THREAD_STARTED) && !self.is_set(INSECURE_SOURCE_PORT_OPEN)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue emptied out normally.
    Drained { sent: usize },
    /// Stopped because the pump is stalled.
    Stalled { sent: usize },
    /// Stopped because `send_one` failed; the caller should free the
    /// current message and, if the queue is still non-empty, re-post a
    /// pump event.
    SendFailed { sent: usize, error: crate::error::Error },
}

/// The pump's own state: whether draining is currently suppressed, and the
/// dedup flag guaranteeing at most one pump event is ever resident in the
/// task mailbox.
pub struct Pump {
    stalled: bool,
    event_pending: StickyFlag,
}

impl Pump {
    pub fn new() -> Self {
        Self {
            stalled: false,
            event_pending: StickyFlag::new(),
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Attempts to post a pump event (fresh outbound arrival, or stall
    /// lifted). Returns `true` if the caller should actually post to the
    /// task mailbox — `false` means one is already resident.
    pub fn request_wake(&mut self) -> bool {
        self.event_pending.try_post()
    }

    /// Clears the dedup flag at the start of handling a pump event, so that
    /// a re-post triggered mid-handling (e.g. by `send_one` freeing a
    /// waiter) results in exactly one more event rather than being dropped.
    pub fn begin_handling(&mut self) {
        self.event_pending.clear();
    }

    pub fn has_event_pending(&self) -> bool {
        self.event_pending.is_set()
    }

    /// Drains the outbound queue: while it's non-empty and the pump isn't
    /// stalled, calls `send_one` for the oldest message.
    pub fn drain(
        &mut self,
        mut queue_is_empty: impl FnMut() -> bool,
        mut send_one: impl FnMut() -> Result<(), crate::error::Error>,
    ) -> DrainOutcome {
        let mut sent = 0usize;
        loop {
            if self.stalled {
                return DrainOutcome::Stalled { sent };
            }
            if queue_is_empty() {
                return DrainOutcome::Drained { sent };
            }
            match send_one() {
                Ok(()) => sent += 1,
                Err(error) => return DrainOutcome::SendFailed { sent, error },
            }
        }
    }
}

impl Default for Pump {
    fn default() -> Self {
        Self::new()
    }
}

/// Which command/key pair a message should be sent with, per spec §4.7 step
/// 3.
pub fn select_stream(secure: bool, legacy: bool) -> (crate::properties::Command, u32) {
    use crate::properties::{
        Command, KEY_IPV6_DATAGRAM_STREAM_INSECURE, KEY_IPV6_DATAGRAM_STREAM_SECURE,
        KEY_VENDOR_LEGACY_STREAM,
    };
    if legacy {
        (Command::VendorPropValueSet, KEY_VENDOR_LEGACY_STREAM)
    } else if secure {
        (Command::PropValueSet, KEY_IPV6_DATAGRAM_STREAM_SECURE)
    } else {
        (Command::PropValueSet, KEY_IPV6_DATAGRAM_STREAM_INSECURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn dedup_flag_allows_exactly_one_resident_event() {
        let mut pump = Pump::new();
        assert!(pump.request_wake());
        assert!(!pump.request_wake());
        pump.begin_handling();
        assert!(pump.request_wake());
    }

    #[test]
    fn drain_stops_on_stall_without_consuming_queue() {
        let mut pump = Pump::new();
        pump.set_stalled(true);
        let mut queue = 3;
        let outcome = pump.drain(
            || queue == 0,
            || {
                queue -= 1;
                Ok(())
            },
        );
        assert_eq!(outcome, DrainOutcome::Stalled { sent: 0 });
        assert_eq!(queue, 3);
    }

    #[test]
    fn drain_runs_until_queue_empty() {
        let mut pump = Pump::new();
        let mut queue = 3;
        let outcome = pump.drain(
            || queue == 0,
            || {
                queue -= 1;
                Ok(())
            },
        );
        assert_eq!(outcome, DrainOutcome::Drained { sent: 3 });
    }

    #[test]
    fn drain_stops_on_send_failure() {
        let mut pump = Pump::new();
        let mut queue = 3;
        let outcome = pump.drain(
            || queue == 0,
            || {
                queue -= 1;
                if queue == 1 {
                    Err(Error::NoFrameReceived)
                } else {
                    Ok(())
                }
            },
        );
        assert_eq!(
            outcome,
            DrainOutcome::SendFailed {
                sent: 1,
                error: Error::NoFrameReceived
            }
        );
        assert_eq!(queue, 1);
    }

    #[test]
    fn provisional_join_window() {
        let mut flags = SecurityFlags::new();
        assert!(!flags.is_provisional_join());
        flags.set(THREAD_STARTED);
        assert!(flags.is_provisional_join());
        flags.set(INSECURE_SOURCE_PORT_OPEN);
        assert!(!flags.is_provisional_join());
    }
}
