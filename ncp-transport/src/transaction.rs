// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C5: the transaction matcher.
//!
//! Only one request is ever outstanding on the driver task (spec §5), so
//! this is a single `Option<Pending>` rather than a table. `next_tid` cycles
//! through `2..=14`; `0` is reserved and `15` is reserved, `1` is the
//! "don't care" identifier used by fire-and-forget requests (spec §4.5).

use crate::spinel::TID_DONT_CARE;

const TID_MIN: u8 = 2;
const TID_MAX: u8 = 14;

/// How a freshly decoded frame should be routed once checked against the
/// pending request, if any.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Matches the pending request and its (command, key) pair: a success
    /// response.
    Success,
    /// Matches the pending request's tid but not its (command, key) pair
    /// (typically a last-status conveying a rejection).
    Failure,
    /// Does not belong to the pending request; route to control-plane
    /// dispatch.
    Dispatch,
}

struct Pending {
    tid: u8,
    command: u32,
    key: u32,
    deadline: u64,
    ignore_timeout: bool,
}

pub struct TransactionMatcher {
    next: u8,
    pending: Option<Pending>,
}

impl TransactionMatcher {
    pub fn new() -> Self {
        Self {
            next: TID_MIN,
            pending: None,
        }
    }

    /// Draws the next rolling transaction identifier. Never returns 0
    /// (reserved), 1 (don't-care), or 15 (reserved) — spec §8 invariant 2.
    pub fn next_tid(&mut self) -> u8 {
        let tid = self.next;
        self.next = if self.next >= TID_MAX {
            TID_MIN
        } else {
            self.next + 1
        };
        tid
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Registers a new pending request. Fails if one is already pending —
    /// the driver task only ever has one request in flight.
    pub fn begin(
        &mut self,
        tid: u8,
        command: u32,
        key: u32,
        now: u64,
        timeout_ticks: u64,
        ignore_timeout: bool,
    ) -> Result<(), crate::error::Error> {
        if self.pending.is_some() {
            return Err(crate::error::Error::InvalidState);
        }
        self.pending = Some(Pending {
            tid,
            command,
            key,
            deadline: now.saturating_add(timeout_ticks),
            ignore_timeout,
        });
        Ok(())
    }

    /// Abandons the pending request without a match (used by recovery).
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Routes a decoded frame. Consumes the pending request on a match.
    pub fn on_frame(&mut self, frame_tid: u8, command: u32, key: u32) -> Route {
        let matched = match &self.pending {
            None => return Route::Dispatch,
            Some(p) => {
                let tid_matches = p.tid != TID_DONT_CARE && frame_tid == p.tid;
                let dont_care_pair_matches =
                    p.tid == TID_DONT_CARE && command == p.command && key == p.key;
                if !tid_matches && !dont_care_pair_matches {
                    return Route::Dispatch;
                }
                command == p.command && key == p.key
            }
        };
        self.pending = None;
        if matched {
            Route::Success
        } else {
            Route::Failure
        }
    }

    /// Checks whether the pending request's deadline has elapsed. Returns
    /// `Some(ignore_timeout)` and clears the pending request if so.
    pub fn poll_timeout(&mut self, now: u64) -> Option<bool> {
        let timed_out = self.pending.as_ref().is_some_and(|p| now >= p.deadline);
        if timed_out {
            let ignore = self.pending.take().unwrap().ignore_timeout;
            Some(ignore)
        } else {
            None
        }
    }
}

impl Default for TransactionMatcher {
    fn default() -> Self {
        Self::new()
    }
}
