// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C9: the session supervisor.
//!
//! Owns the top-level state machine (spec §4.9) and nothing else; the
//! actual I/O (enabling/disabling the byte adapter, issuing a property
//! request, pulsing reset) is supplied by the caller as closures, the same
//! decoupling [`crate::hdlc::encode`] and [`crate::byteio::tx_put_blocking`]
//! use. This keeps the state machine itself host-testable without a real
//! NCP or serial port.

use ringbuf::{ringbuf, ringbuf_entry};

use crate::error::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    ResetRecovery,
    HostSleep,
}

/// Whether `Initialize` may try the fast re-establishment path before
/// falling back to a hard reset (spec §4.9, config option
/// `initialize-without-reset`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetPolicy {
    MaySkip,
    Always,
}

pub const DEFAULT_RESET_ATTEMPTS: u8 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    ReestablishOk,
    ReestablishFailed,
    ResetAttempt(u8),
    Initialized,
    RecoveryStarted,
    RecoveryAlreadyActive,
    HostSleepEntered,
    HostSleepDeferred,
    Finalized,
}

ringbuf!(SUPERVISOR_TRACE, Trace, 16, Trace::Initialized);

fn trace(t: Trace) {
    ringbuf_entry!(SUPERVISOR_TRACE, t);
}

pub struct Supervisor {
    state: SessionState,
}

impl Supervisor {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Brings the session from `Uninitialized` to `Initialized` (spec
    /// §4.9). If `policy` is `MaySkip` and the host did not just cold-boot,
    /// tries `probe_net_role` over an already-enabled link first; only on
    /// its failure (or when the policy forbids skipping) does it fall back
    /// to up to `attempts` reset-and-verify cycles.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        &mut self,
        policy: ResetPolicy,
        cold_boot: bool,
        attempts: u8,
        mut enable_io: impl FnMut(),
        mut disable_io: impl FnMut(),
        mut probe_net_role: impl FnMut() -> Result<(), Error>,
        mut pulse_reset_app_mode: impl FnMut(),
        mut await_reset_announcement: impl FnMut() -> Result<(), Error>,
    ) -> Result<(), Error> {
        if policy == ResetPolicy::MaySkip && !cold_boot {
            enable_io();
            if probe_net_role().is_ok() {
                trace(Trace::ReestablishOk);
                self.state = SessionState::Initialized;
                return Ok(());
            }
            trace(Trace::ReestablishFailed);
        }

        for attempt in 0..attempts {
            trace(Trace::ResetAttempt(attempt));
            disable_io();
            pulse_reset_app_mode();
            enable_io();
            if await_reset_announcement().is_ok() {
                trace(Trace::Initialized);
                self.state = SessionState::Initialized;
                return Ok(());
            }
        }

        Err(Error::NoFrameReceived)
    }

    /// Spec §4.9: best-effort offline notice, disable the link, go
    /// `Uninitialized` unconditionally.
    pub fn finalize(&mut self, mut send_power_offline: impl FnMut(), mut disable_io: impl FnMut()) {
        send_power_offline();
        disable_io();
        trace(Trace::Finalized);
        self.state = SessionState::Uninitialized;
    }

    /// Idempotent: returns `true` the first time this call actually moves
    /// the session into `ResetRecovery`, which is the caller's cue to post
    /// exactly one recovery event (spec §4.9, §8 scenario S4).
    pub fn initiate_recovery(&mut self) -> bool {
        if self.state == SessionState::ResetRecovery {
            trace(Trace::RecoveryAlreadyActive);
            return false;
        }
        trace(Trace::RecoveryStarted);
        self.state = SessionState::ResetRecovery;
        true
    }

    /// Called once the client's recovery callback has finished
    /// reinitializing and rehydrating NCP state.
    pub fn recovery_complete(&mut self) {
        self.state = SessionState::Initialized;
    }

    /// Spec §4.9 host-sleep entry. `try_disable_io` reports whether the
    /// link was actually quiesced (empty FIFO, no frame mid-decode); on
    /// failure the caller is expected to retry, since the NCP may still
    /// send one more frame before settling.
    pub fn enter_host_sleep(
        &mut self,
        mut send_low_power: impl FnMut(),
        mut try_disable_io: impl FnMut() -> bool,
    ) -> bool {
        send_low_power();
        if try_disable_io() {
            trace(Trace::HostSleepEntered);
            self.state = SessionState::HostSleep;
            true
        } else {
            trace(Trace::HostSleepDeferred);
            false
        }
    }

    pub fn exit_host_sleep(&mut self, mut enable_io: impl FnMut()) {
        enable_io();
        self.state = SessionState::Initialized;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
