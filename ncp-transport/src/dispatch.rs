// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C8: control-plane dispatch.
//!
//! Classifies a frame the transaction matcher didn't claim by (command,
//! key) and turns it into pending-flag updates, callback-buffer entries, and
//! queued [`Event`]s. Runs entirely on the driver task, on the framer's call
//! stack — handlers here must never issue a synchronous request (spec §4.8:
//! "must not issue requests themselves, to avoid recursive framer entry").

use ringbuf::{ringbuf, ringbuf_entry};

use crate::error::Error;
use crate::events::{
    CallbackPool, CallbackSlot, Event, PendingFlags, ScanResult, CHILD_TABLE_CHANGED,
    IPV6_ADDRESS_TABLE_CHANGED, IPV6_MULTICAST_ADDRESS_TABLE_CHANGED, ROLE_CHANGED,
};
use crate::mailbox::StickyFlag;
use crate::properties::{self, NetRole};
use crate::spinel::Unpacker;

const MAX_INBOUND_DATAGRAM: usize = 1280;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    RoleChanged(u32),
    LegacyUla,
    ScanBeacon,
    ScanComplete,
    LastStatus(u32),
    ResetStatus(u32),
    DecodeFailure,
    DebugStream(usize),
}

ringbuf!(DISPATCH_TRACE, Trace, 16, Trace::LastStatus(0));

fn trace(t: Trace) {
    ringbuf_entry!(DISPATCH_TRACE, t);
}

/// Something the caller (normally [`crate::driver::Driver`]) must act on
/// beyond queuing an event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    NeedsRecovery,
}

pub struct Dispatch<const CB: usize, const EVQ: usize> {
    net_role: Option<NetRole>,
    pending: PendingFlags,
    callbacks: CallbackPool<CB>,
    events: heapless::Deque<Event, EVQ>,
    decode_failure: StickyFlag,
    inbound: heapless::Vec<u8, MAX_INBOUND_DATAGRAM>,
    inbound_secure: bool,
    inbound_ready: bool,
    log_ncp_logs: bool,
}

impl<const CB: usize, const EVQ: usize> Dispatch<CB, EVQ> {
    pub fn new(log_ncp_logs: bool) -> Self {
        Self {
            net_role: None,
            pending: PendingFlags::new(),
            callbacks: CallbackPool::new(),
            events: heapless::Deque::new(),
            decode_failure: StickyFlag::new(),
            inbound: heapless::Vec::new(),
            inbound_secure: false,
            inbound_ready: false,
            log_ncp_logs,
        }
    }

    pub fn net_role(&self) -> Option<NetRole> {
        self.net_role
    }

    fn push_event(&mut self, event: Event) -> Result<(), Error> {
        self.events.push_back(event).map_err(|_| Error::NoBuffers)
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn take_pending_flags(&self) -> u32 {
        self.pending.take()
    }

    pub fn take_callback_slot(&mut self, idx: usize) -> Result<CallbackSlot, Error> {
        self.callbacks.take(idx)
    }

    /// Marks the HDLC/spinel decode-failure sticky (spec §7: "the
    /// dispatcher drops the frame, sets a decode-failure sticky"). Returns
    /// `true` the first time it's set since the last clear, matching the
    /// "error-handler runs once" scenario in spec §8 S6.
    pub fn mark_decode_failure(&mut self) -> bool {
        trace(Trace::DecodeFailure);
        self.decode_failure.try_post()
    }

    pub fn clear_decode_failure(&mut self) {
        self.decode_failure.clear();
    }

    /// Posts the recovery event. Called by the driver after
    /// `Supervisor::initiate_recovery` reports it actually transitioned the
    /// session, so that recovery is delivered at most once per episode.
    pub fn push_recovery(&mut self) -> Result<(), Error> {
        self.push_event(Event::Recovery)
    }

    fn post_pending(&mut self, bits: u32) -> Result<(), Error> {
        if self.pending.post(bits) {
            self.push_event(Event::StateChanged(bits))?;
        }
        Ok(())
    }

    /// Handles a `property-value-is` frame (spec §4.8). Returns a signal the
    /// caller must act on, if any.
    pub fn handle_value_is(
        &mut self,
        key: u32,
        args: &mut Unpacker<'_>,
    ) -> Result<Option<Signal>, Error> {
        match key {
            properties::KEY_LAST_STATUS => {
                let status = args.packed_uint()?;
                trace(Trace::LastStatus(status));
                if properties::is_reset_status(status) {
                    trace(Trace::ResetStatus(status));
                    return Ok(Some(Signal::NeedsRecovery));
                }
                Ok(None)
            }
            properties::KEY_NET_ROLE => {
                let role = NetRole::from_wire(args.packed_uint()?).ok_or(Error::Parse)?;
                trace(Trace::RoleChanged(key));
                self.net_role = Some(role);
                self.push_event(Event::RoleChanged)?;
                self.post_pending(ROLE_CHANGED)?;
                Ok(None)
            }
            properties::KEY_VENDOR_LEGACY_ULA_PREFIX => {
                let prefix: [u8; 8] = args.rest().try_into().map_err(|_| Error::Parse)?;
                trace(Trace::LegacyUla);
                let idx = self.callbacks.alloc(CallbackSlot::LegacyUla(prefix))?;
                self.push_event(Event::LegacyUla(idx))?;
                Ok(None)
            }
            properties::KEY_MAC_SCAN_STATE => {
                trace(Trace::ScanComplete);
                self.push_event(Event::ScanComplete)?;
                Ok(None)
            }
            properties::KEY_CHILD_TABLE => {
                self.post_pending(CHILD_TABLE_CHANGED)?;
                Ok(None)
            }
            properties::KEY_IPV6_ADDRESS_TABLE => {
                self.post_pending(IPV6_ADDRESS_TABLE_CHANGED)?;
                Ok(None)
            }
            properties::KEY_IPV6_MULTICAST_ADDRESS_TABLE => {
                self.post_pending(IPV6_MULTICAST_ADDRESS_TABLE_CHANGED)?;
                Ok(None)
            }
            properties::KEY_DEBUG_STREAM => {
                if self.log_ncp_logs {
                    trace(Trace::DebugStream(args.remaining()));
                }
                Ok(None)
            }
            properties::KEY_VENDOR_LEGACY_WAKE => {
                self.push_event(Event::LegacyWake)?;
                Ok(None)
            }
            properties::KEY_IPV6_DATAGRAM_STREAM_SECURE => {
                self.accept_inbound(args, true)?;
                Ok(None)
            }
            properties::KEY_IPV6_DATAGRAM_STREAM_INSECURE => {
                self.accept_inbound(args, false)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Handles a `property-value-inserted` frame (spec §4.8).
    pub fn handle_value_inserted(&mut self, key: u32, args: &mut Unpacker<'_>) -> Result<(), Error> {
        if key == properties::KEY_MAC_SCAN_BEACON {
            trace(Trace::ScanBeacon);
            let pan_id = args.u16()?;
            let channel = args.u8()?;
            let rssi = args.i8()?;
            let idx = self.callbacks.alloc(CallbackSlot::ScanResult(ScanResult {
                pan_id,
                channel,
                rssi,
            }))?;
            self.push_event(Event::ScanResult(idx))?;
        }
        Ok(())
    }

    fn accept_inbound(&mut self, args: &mut Unpacker<'_>, secure: bool) -> Result<(), Error> {
        let payload = args.rest();
        self.inbound.clear();
        self.inbound
            .extend_from_slice(payload)
            .map_err(|_| Error::NoBuffers)?;
        self.inbound_secure = secure;
        self.inbound_ready = true;
        self.push_event(Event::InboundDatagram)
    }

    /// Takes the most recently received inbound datagram, if any, along
    /// with whether it arrived secure. Spec §4.8: arriving secure on an
    /// insecure port is the caller's cue to set
    /// `secure-message-seen-on-insecure-port`.
    pub fn take_inbound(&mut self) -> Option<(&[u8], bool)> {
        if self.inbound_ready {
            self.inbound_ready = false;
            Some((&self.inbound, self.inbound_secure))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spinel::Packer;

    fn encode_packed_uint(value: u32) -> heapless::Vec<u8, 8> {
        let mut out = heapless::Vec::new();
        crate::spinel::pack_uint(value, |b| out.push(b).map_err(|_| Error::NoBuffers)).unwrap();
        out
    }

    #[test]
    fn role_change_posts_event_and_aggregates_once() {
        let mut d: Dispatch<4, 8> = Dispatch::new(false);
        let encoded = encode_packed_uint(3); // router
        let mut args = Unpacker::new(&encoded);
        d.handle_value_is(properties::KEY_NET_ROLE, &mut args).unwrap();
        assert_eq!(d.net_role(), Some(NetRole::Router));
        assert_eq!(d.poll_event(), Some(Event::RoleChanged));
        assert_eq!(d.poll_event(), Some(Event::StateChanged(ROLE_CHANGED)));
        assert_eq!(d.take_pending_flags(), ROLE_CHANGED);
        assert_eq!(d.take_pending_flags(), 0);
    }

    #[test]
    fn reset_range_last_status_signals_recovery() {
        let mut d: Dispatch<4, 8> = Dispatch::new(false);
        let encoded = encode_packed_uint(0x72);
        let mut args = Unpacker::new(&encoded);
        let signal = d.handle_value_is(properties::KEY_LAST_STATUS, &mut args).unwrap();
        assert_eq!(signal, Some(Signal::NeedsRecovery));
    }

    #[test]
    fn legacy_ula_goes_through_callback_slot() {
        let mut d: Dispatch<4, 8> = Dispatch::new(false);
        let prefix = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut buf = [0u8; 8];
        let mut packer = Packer::new(&mut buf);
        packer.eui64(&prefix).unwrap();
        let len = packer.finish().len();
        let mut args = Unpacker::new(&buf[..len]);

        d.handle_value_is(properties::KEY_VENDOR_LEGACY_ULA_PREFIX, &mut args)
            .unwrap();
        let Some(Event::LegacyUla(idx)) = d.poll_event() else {
            panic!("expected LegacyUla event");
        };
        assert_eq!(
            d.take_callback_slot(idx).unwrap(),
            CallbackSlot::LegacyUla(prefix)
        );
    }

    #[test]
    fn inbound_datagram_is_buffered_for_pickup() {
        let mut d: Dispatch<4, 8> = Dispatch::new(false);
        let payload = [0xaa; 40];
        let mut args = Unpacker::new(&payload);
        d.handle_value_is(properties::KEY_IPV6_DATAGRAM_STREAM_SECURE, &mut args)
            .unwrap();
        assert_eq!(d.poll_event(), Some(Event::InboundDatagram));
        let (bytes, secure) = d.take_inbound().unwrap();
        assert_eq!(bytes, &payload);
        assert!(secure);
        assert!(d.take_inbound().is_none());
    }

    #[test]
    fn decode_failure_sticky_fires_once() {
        let mut d: Dispatch<4, 8> = Dispatch::new(false);
        assert!(d.mark_decode_failure());
        assert!(!d.mark_decode_failure());
        d.clear_decode_failure();
        assert!(d.mark_decode_failure());
    }
}
