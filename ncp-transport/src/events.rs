// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event delivery, pending-flag aggregation, and the callback-buffer pool.
//!
//! Spec's Design Notes re-architect the source's function-pointer struct as
//! "a capability-set parameter... variants can also be tagged messages
//! delivered on an outbound event channel". This crate supports both: every
//! event is queued on [`Dispatch`], and a caller either polls it directly
//! via `poll_event`, or drains it through a [`Capabilities`] implementation
//! via `crate::driver::Driver::drain_events`, whichever fits its control
//! flow.

use core::sync::atomic::{AtomicU32, Ordering};

pub const ROLE_CHANGED: u32 = 1 << 0;
pub const IPV6_ADDRESS_TABLE_CHANGED: u32 = 1 << 1;
pub const IPV6_MULTICAST_ADDRESS_TABLE_CHANGED: u32 = 1 << 2;
pub const CHILD_TABLE_CHANGED: u32 = 1 << 3;

/// Aggregate of pending control-plane changes (spec §4.8's "pending flags").
/// Every update that transitions the aggregate from zero to non-zero should
/// post exactly one [`Event::StateChanged`].
#[derive(Default)]
pub struct PendingFlags(AtomicU32);

impl PendingFlags {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Sets `bits`. Returns `true` if this call transitioned the aggregate
    /// from zero to non-zero — the caller should post a state-changed event
    /// exactly then.
    pub fn post(&self, bits: u32) -> bool {
        let prev = self.0.fetch_or(bits, Ordering::AcqRel);
        prev == 0 && bits != 0
    }

    /// Atomically reads the aggregate and clears it.
    pub fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    pub pan_id: u16,
    pub channel: u8,
    pub rssi: i8,
}

/// Tagged variant replacing the source's duck-typed callback-buffer union
/// (Design Notes).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallbackSlot {
    Free,
    ScanResult(ScanResult),
    LegacyUla([u8; 8]),
}

/// A small fixed pool of typed slots (spec §3 default 4) used to hand
/// content from the inbound decode path to deferred post-processing.
pub struct CallbackPool<const N: usize> {
    slots: [CallbackSlot; N],
}

impl<const N: usize> CallbackPool<N> {
    pub fn new() -> Self {
        Self {
            slots: [CallbackSlot::Free; N],
        }
    }

    pub fn alloc(&mut self, value: CallbackSlot) -> Result<usize, crate::error::Error> {
        let idx = self
            .slots
            .iter()
            .position(|s| matches!(s, CallbackSlot::Free))
            .ok_or(crate::error::Error::NoBuffers)?;
        self.slots[idx] = value;
        Ok(idx)
    }

    /// Takes the slot's contents, returning it to `Free`.
    pub fn take(&mut self, idx: usize) -> Result<CallbackSlot, crate::error::Error> {
        let slot = self.slots.get_mut(idx).ok_or(crate::error::Error::InvalidArgs)?;
        Ok(core::mem::replace(slot, CallbackSlot::Free))
    }
}

impl<const N: usize> Default for CallbackPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A semantic notification posted to the event queue (spec §6's
/// subscription list).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The pending-flags aggregate transitioned from zero to non-zero;
    /// carries the flag bits as of the transition, for callers that poll
    /// instead of reading `take_pending_flags` themselves.
    StateChanged(u32),
    /// `net-role` changed; current role follows in the same dispatch call,
    /// readable via `Dispatch::net_role`.
    RoleChanged,
    /// A legacy-ULA prefix arrived; contents are in the named callback
    /// slot.
    LegacyUla(usize),
    /// A scan result arrived; contents are in the named callback slot.
    ScanResult(usize),
    ScanComplete,
    /// The supervisor should initiate reset recovery.
    Recovery,
    LegacyWake,
    /// An inbound IPv6 datagram is ready; call `Dispatch::take_inbound`.
    InboundDatagram,
}

/// Capability set a caller may implement to be called back directly from
/// the event drain, instead of polling [`Event`]s. Every method is a no-op
/// by default so a caller only overrides what it cares about.
pub trait Capabilities {
    fn on_state_changed(&mut self, _flags: u32) {}
    fn on_legacy_ula(&mut self, _prefix: [u8; 8]) {}
    fn on_reset_recovery(&mut self) {}
    fn on_legacy_wake(&mut self) {}
}

/// A [`Capabilities`] implementation that does nothing, for drivers with no
/// registered client.
pub struct NoCapabilities;
impl Capabilities for NoCapabilities {}
