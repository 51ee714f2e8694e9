// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C10: the reset/GPIO hook.
//!
//! The narrowest possible surface (spec §4.10) the supervisor drives to
//! hard-reset the NCP and pick application-vs-bootloader boot mode. Kept as
//! a trait, the same decoupling `byteio::SerialSink` uses, so the supervisor
//! is host-testable against an in-memory fake.

/// Hold time for the reset pulse and settling delay afterward, in the same
/// tick units the rest of the crate uses for deadlines.
pub const RESET_HOLD_TICKS: u64 = 10;
pub const RESET_SETTLE_TICKS: u64 = 50;

pub trait ResetHook {
    fn set_reset(&mut self, asserted: bool);
    fn set_bootloader_mode(&mut self, enabled: bool);

    /// Drives a reset pulse: asserts reset, selects boot mode, holds, then
    /// releases and waits out the settling delay. `sleep` is a caller-
    /// supplied blocking delay so this trait stays agnostic of the clock.
    fn pulse_reset(&mut self, in_bootloader: bool, mut sleep: impl FnMut(u64)) {
        self.set_bootloader_mode(in_bootloader);
        self.set_reset(true);
        sleep(RESET_HOLD_TICKS);
        self.set_reset(false);
        sleep(RESET_SETTLE_TICKS);
    }
}

/// An in-memory loopback implementation for host tests (spec's
/// "Supplementary structure": a std-only fake standing in for real GPIO).
#[derive(Default)]
pub struct LoopbackReset {
    pub reset_asserted: bool,
    pub bootloader_mode: bool,
    pub pulse_count: usize,
    pub slept_ticks: u64,
}

impl LoopbackReset {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResetHook for LoopbackReset {
    fn set_reset(&mut self, asserted: bool) {
        self.reset_asserted = asserted;
        if asserted {
            self.pulse_count += 1;
        }
    }

    fn set_bootloader_mode(&mut self, enabled: bool) {
        self.bootloader_mode = enabled;
    }
}
