// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification bits and sticky dedup flags.
//!
//! The teacher's tasks (e.g. `stm32h7-usart`'s `main.rs`) are driven by a
//! kernel that delivers a bitmask of pending notifications to `hl::recv`,
//! and tasks set/clear individual bits with `sys_irq_control` and friends.
//! This crate has no such kernel underneath it, so [`Mailbox`] reimplements
//! just the part of that model this driver needs: a lock-free `AtomicU32` of
//! pending notification bits that an interrupt source and a task can share
//! without a mutex (spec §9's "ISR <-> task sharing" design note).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Byte arrived in the receive FIFO; the task should drain it through the
/// framer.
pub const RX: u32 = 1 << 0;
/// A deadline tracked by the supervisor/matcher/store has elapsed.
pub const TIMER: u32 = 1 << 1;
/// The data-plane pump should run (outbound traffic arrived or stall lifted).
pub const PUMP: u32 = 1 << 2;
/// A response to the single in-flight request has been matched. This is the
/// "private response mailbox" from spec §4.1/§5: when set, `await_response`
/// treats it specially rather than folding it into ordinary task dispatch.
pub const RESPONSE: u32 = 1 << 3;

/// A set of pending notification bits, postable from any context and
/// drainable from the driver task.
#[derive(Default)]
pub struct Mailbox {
    bits: AtomicU32,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Sets `bits`. Safe to call from an interrupt source.
    pub fn post(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    /// Returns the bits masked by `mask`, clearing only those bits.
    pub fn take(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask
    }

    /// Non-destructively checks whether any bit in `mask` is pending.
    pub fn peek(&self, mask: u32) -> bool {
        self.bits.load(Ordering::Acquire) & mask != 0
    }
}

/// A lock-free "is an event of this kind already resident" flag.
///
/// This is the coordination primitive spec §4.7/§9 calls the "pump-event
/// dedup" pattern: `try_post` is a `fetch_or`-based test-and-set that tells
/// the caller whether it actually needs to enqueue/post a new event, and
/// `clear` is called unconditionally at the start of handling that event.
/// The invariant this preserves (spec §8 invariant 4) is that the flag reads
/// "set" if and only if an event is resident.
#[derive(Default)]
pub struct StickyFlag {
    set: AtomicBool,
}

impl StickyFlag {
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Attempts to post the event. Returns `true` if this call transitioned
    /// the flag from clear to set (i.e. the caller should actually post/
    /// enqueue the event); returns `false` if an event was already resident.
    pub fn try_post(&self) -> bool {
        !self.set.swap(true, Ordering::AcqRel)
    }

    /// Clears the flag. Called when the posted event is taken off the
    /// mailbox and begins running, *before* the handler does anything that
    /// might re-post — this is what lets a re-post that happens mid-handling
    /// result in exactly one more event instead of being silently dropped.
    pub fn clear(&self) {
        self.set.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_take_only_clears_masked_bits() {
        let mb = Mailbox::new();
        mb.post(RX | PUMP);
        assert_eq!(mb.take(RX), RX);
        assert!(mb.peek(PUMP));
        assert!(!mb.peek(RX));
    }

    #[test]
    fn sticky_flag_dedups() {
        let f = StickyFlag::new();
        assert!(f.try_post());
        // A second post while the first is still resident is a no-op from
        // the caller's point of view: at most one event is ever resident.
        assert!(!f.try_post());
        f.clear();
        assert!(f.try_post());
    }
}
