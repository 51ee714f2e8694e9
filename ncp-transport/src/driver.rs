// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The top-level `Driver` wiring C1 through C10 together.
//!
//! Mirrors how the teacher's tasks assemble a bunch of small, independently
//! testable modules behind one `main.rs` loop: every component above this
//! file is usable and tested on its own; `Driver` is purely glue, matching
//! the component diagram in spec §2 (byte I/O -> FIFO -> framer -> codec,
//! fanning out to the transaction matcher or the control-plane dispatch).
//!
//! There is no real scheduler underneath this crate, so `Driver` does not
//! block: callers drive it cooperatively. `poll_io` should be called
//! whenever `mailbox::RX`, `mailbox::RESPONSE`, or `mailbox::TIMER` is
//! pending; `pump_once` whenever `mailbox::PUMP` is pending. Sending an
//! outbound datagram is itself a request/response round trip, so it is
//! split the same way a plain property request is: `pump_once` begins the
//! send, and the caller's own event loop feeds the response back in via
//! `finish_pump` once `take_response` reports it.

use core::cell::RefCell;

use num_traits::FromPrimitive;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::byteio::{self, ByteIo, SerialSink};
use crate::dispatch::{Dispatch, Signal};
use crate::error::Error;
use crate::events::Event;
use crate::fifo::{self, RxConsumer};
use crate::hdlc::{self, Decoder};
use crate::mailbox::Mailbox;
use crate::outbound::{Handle, OutboundStore};
use crate::properties::{self, Command};
use crate::pump::{Pump, SecurityFlags, INSECURE_SOURCE_PORT_OPEN, SECURE_MESSAGE_SEEN_ON_INSECURE_PORT};
use crate::reset::ResetHook;
use crate::spinel::{self, Packer, Unpacker};
use crate::supervisor::{SessionState, Supervisor};
use crate::transaction::{Route, TransactionMatcher};

/// Default MTU (spec §3); also the largest frame this driver will decode or
/// encode.
pub const MTU: usize = 1280;
const MAX_FRAME: usize = MTU + 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    PumpSendFailed(u32),
    PumpDatagramRejected(u32),
}

ringbuf!(DRIVER_TRACE, Trace, 16, Trace::PumpSendFailed(0));

fn trace(t: Trace) {
    ringbuf_entry!(DRIVER_TRACE, t);
}

/// Init-time configuration (spec §6's options table). Sizes spec lists as
/// configuration (`message-queue-size`, `tx-ring-buffer-size`) are const
/// generics on [`Driver`] instead, since this is a `no_std` crate with no
/// heap allocator — see `DESIGN.md`.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub enable_border_router: bool,
    pub enable_ftd: bool,
    pub legacy_alarm_support: bool,
    pub spinel_vendor_support: bool,
    pub legacy_credential_recovery: bool,
    pub uart_baud: u32,
    pub initialize_without_reset: bool,
    pub log_ncp_logs: bool,
    pub near_full_threshold: usize,
    pub request_timeout_ticks: u64,
    pub reset_attempts: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_border_router: false,
            enable_ftd: false,
            legacy_alarm_support: false,
            spinel_vendor_support: false,
            legacy_credential_recovery: false,
            uart_baud: 115_200,
            initialize_without_reset: true,
            log_ncp_logs: false,
            near_full_threshold: 32,
            request_timeout_ticks: 3_000,
            reset_attempts: crate::supervisor::DEFAULT_RESET_ATTEMPTS,
        }
    }
}

/// What `Driver::take_response` hands back once a pending request's
/// response (or its timeout) has arrived.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResponseMeta {
    pub command: u32,
    pub key: u32,
    pub failed: bool,
    pub timed_out: bool,
}

/// Outcome of one `pump_once` call. A pump send is a full request/response
/// round trip, so `Began` only means the frame went out and the matcher is
/// now armed; the caller learns the actual result later through
/// `take_response`/`finish_pump`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PumpAction {
    Began,
    NothingToSend,
    Stalled,
    AlreadyInFlight,
    SendFailed(Error),
}

/// Tracks the two-step provisional-join send (open the insecure source port
/// first, then send the datagram) versus an ordinary single-step send.
#[derive(Copy, Clone, Debug)]
enum PumpPhase {
    Idle,
    AwaitingPortOpen(Handle),
    AwaitingSend(Handle),
}

/// The command a successful response to `command` carries, per Spinel
/// convention: gets and sets are both acked via `PropValueIs`, inserts and
/// removes via their own echo command. A failed request of any kind is
/// acked via `PropValueIs` with `KEY_LAST_STATUS` instead, which is why the
/// transaction matcher's tid-matched-but-pair-mismatched case (spec §4.5) is
/// the ordinary shape of a rejection, not a protocol error.
fn expected_response_command(command: Command) -> u32 {
    match command {
        Command::PropValueGet
        | Command::PropValueSet
        | Command::VendorPropValueGet
        | Command::VendorPropValueSet => Command::PropValueIs as u32,
        Command::PropValueInsert => Command::PropValueInserted as u32,
        Command::PropValueRemove => Command::PropValueRemoved as u32,
        other => other as u32,
    }
}

fn trigger_recovery<const CB: usize, const EVQ: usize>(
    supervisor: &mut Supervisor,
    dispatch: &mut Dispatch<CB, EVQ>,
) {
    if supervisor.initiate_recovery() {
        let _ = dispatch.push_recovery();
    }
}

/// Classifies and routes one fully decoded frame (spec §4.5, §4.8). Free of
/// `self` so it can be shared between the ordinary receive path and the
/// drain-while-transmitting path without the borrow checker treating every
/// field of `Driver` as in use at once.
fn process_frame<const DECODE_N: usize, const CB: usize, const EVQ: usize>(
    frame: &[u8],
    matcher: &mut TransactionMatcher,
    dispatch: &mut Dispatch<CB, EVQ>,
    supervisor: &mut Supervisor,
    response_scratch: &mut heapless::Vec<u8, DECODE_N>,
    last_response: &mut Option<ResponseMeta>,
) -> Result<(), Error> {
    if frame.is_empty() {
        return Err(Error::Parse);
    }
    let header = frame[0];
    let tid = spinel::header_tid(header);
    let (command, used1) = spinel::unpack_uint(&frame[1..])?;
    let (key, used2) = spinel::unpack_uint(&frame[1 + used1..])?;
    let args = &frame[1 + used1 + used2..];

    match matcher.on_frame(tid, command, key) {
        route @ (Route::Success | Route::Failure) => {
            if key == properties::KEY_LAST_STATUS {
                let mut unpacker = Unpacker::new(args);
                if let Ok(Some(Signal::NeedsRecovery)) = dispatch.handle_value_is(key, &mut unpacker) {
                    trigger_recovery(supervisor, dispatch);
                }
            }
            response_scratch.clear();
            response_scratch
                .extend_from_slice(args)
                .map_err(|_| Error::NoBuffers)?;
            *last_response = Some(ResponseMeta {
                command,
                key,
                failed: matches!(route, Route::Failure),
                timed_out: false,
            });
            Ok(())
        }
        Route::Dispatch => {
            let mut unpacker = Unpacker::new(args);
            match Command::from_u32(command) {
                Some(Command::PropValueIs) => {
                    if let Some(Signal::NeedsRecovery) =
                        dispatch.handle_value_is(key, &mut unpacker)?
                    {
                        trigger_recovery(supervisor, dispatch);
                    }
                    Ok(())
                }
                Some(Command::PropValueInserted) => {
                    dispatch.handle_value_inserted(key, &mut unpacker)
                }
                _ => Ok(()),
            }
        }
    }
}

/// Feeds one received byte through the framer, then, for a completed
/// frame, through [`process_frame`]. Decode errors set the decode-failure
/// sticky and trigger recovery (spec §7, §8 scenario S6).
fn feed_byte<const DECODE_N: usize, const CB: usize, const EVQ: usize>(
    decoder: &mut Decoder<DECODE_N>,
    matcher: &mut TransactionMatcher,
    dispatch: &mut Dispatch<CB, EVQ>,
    supervisor: &mut Supervisor,
    response_scratch: &mut heapless::Vec<u8, DECODE_N>,
    last_response: &mut Option<ResponseMeta>,
    byte: u8,
) {
    match decoder.push(byte) {
        Some(Ok(frame)) => {
            let mut owned: heapless::Vec<u8, DECODE_N> = heapless::Vec::new();
            if owned.extend_from_slice(frame).is_err() {
                return;
            }
            let _ = process_frame(
                &owned,
                matcher,
                dispatch,
                supervisor,
                response_scratch,
                last_response,
            );
        }
        Some(Err(_)) => {
            dispatch.mark_decode_failure();
            trigger_recovery(supervisor, dispatch);
        }
        None => {}
    }
}

/// Parses an IPv6 fixed header (spec §4.7 step 2) looking for a TCP source
/// port to open as an insecure assisting port during a provisional join.
fn parse_ipv6_tcp_source_port(datagram: &[u8]) -> Option<u16> {
    const IPV6_HEADER_LEN: usize = 40;
    const NEXT_HEADER_OFFSET: usize = 6;
    const TCP_PROTOCOL: u8 = 6;
    if datagram.len() < IPV6_HEADER_LEN + 2 || datagram[NEXT_HEADER_OFFSET] != TCP_PROTOCOL {
        return None;
    }
    Some(u16::from_be_bytes([
        datagram[IPV6_HEADER_LEN],
        datagram[IPV6_HEADER_LEN + 1],
    ]))
}

/// Transaction id the init handshake's net-role probe tags its request
/// with. Deliberately outside the transaction matcher's purview (armed only
/// by `begin_request`), since triggering `trigger_recovery` on a stray
/// reset-range last-status this early would be premature.
const PROBE_TID: u8 = 2;

/// Drains `rx` through `decoder` until a frame satisfies `accept` or
/// `deadline_elapsed` fires. Used by the init handshake's net-role probe
/// and reset-announcement wait (spec §4.9), which run before the session is
/// `Initialized` and so bypass the transaction matcher and `process_frame`.
fn await_frame<'q, const RXN: usize, const DECODE_N: usize>(
    rx: &mut RxConsumer<'q, RXN>,
    decoder: &mut Decoder<DECODE_N>,
    mut accept: impl FnMut(&[u8]) -> bool,
    mut deadline_elapsed: impl FnMut() -> bool,
) -> Result<(), Error> {
    loop {
        while let Some(byte) = rx.get() {
            if let Some(Ok(frame)) = decoder.push(byte) {
                if accept(frame) {
                    return Ok(());
                }
            }
        }
        if deadline_elapsed() {
            return Err(Error::NoFrameReceived);
        }
    }
}

/// Byte-I/O primitives the init/reset handshake and finalize/host-sleep
/// transitions need. Bundled behind a `RefCell` wherever it's handed to more
/// than one of [`Supervisor`]'s closures at once: those closures coexist as
/// live borrows for the duration of the call even though only one of them
/// ever actually runs.
struct InitIo<'a, 'q, S, const RXN: usize, const DECODE_N: usize> {
    sink: &'a mut S,
    rx: &'a mut RxConsumer<'q, RXN>,
    decoder: &'a mut Decoder<DECODE_N>,
}

impl<'a, 'q, S: SerialSink, const RXN: usize, const DECODE_N: usize> InitIo<'a, 'q, S, RXN, DECODE_N> {
    fn set_rx_enabled(&mut self, enabled: bool) {
        self.sink.set_rx_interrupt_enabled(enabled);
    }

    fn io_quiescent(&self) -> bool {
        self.rx.is_empty() && self.decoder.is_idle()
    }

    /// Sends a bare `property-value-get` for `net-role` tagged `PROBE_TID`
    /// and waits for a reply carrying that tid (spec §4.9's fast
    /// re-establishment probe).
    fn probe_net_role(&mut self, mut deadline_elapsed: impl FnMut() -> bool) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        let payload_len = {
            let mut packer = Packer::new(&mut buf);
            packer.u8(spinel::header(0, PROBE_TID))?;
            packer.packed_uint(Command::PropValueGet as u32)?;
            packer.packed_uint(properties::KEY_NET_ROLE)?;
            packer.finish().len()
        };
        let sink: &mut S = &mut *self.sink;
        hdlc::encode(&buf[..payload_len], |b| {
            byteio::tx_put_blocking(sink, b, || {}, &mut deadline_elapsed)
        })?;
        await_frame(
            self.rx,
            self.decoder,
            |frame| !frame.is_empty() && spinel::header_tid(frame[0]) == PROBE_TID,
            deadline_elapsed,
        )
    }

    /// Waits for the NCP's reset announcement: any frame carrying a
    /// last-status in the reset range (spec §4.9, §7).
    fn await_reset_announcement(&mut self, deadline_elapsed: impl FnMut() -> bool) -> Result<(), Error> {
        await_frame(
            self.rx,
            self.decoder,
            |frame| {
                if frame.len() < 2 {
                    return false;
                }
                let Ok((command, used1)) = spinel::unpack_uint(&frame[1..]) else {
                    return false;
                };
                let Ok((key, used2)) = spinel::unpack_uint(&frame[1 + used1..]) else {
                    return false;
                };
                if command != Command::PropValueIs as u32 || key != properties::KEY_LAST_STATUS {
                    return false;
                }
                let mut unpacker = Unpacker::new(&frame[1 + used1 + used2..]);
                matches!(unpacker.packed_uint(), Ok(status) if properties::is_reset_status(status))
            },
            deadline_elapsed,
        )
    }

    /// Best-effort `host-power-state` notice (spec §4.9 calls finalize's
    /// and host-sleep entry's notice "best-effort"); a send failure is
    /// swallowed rather than blocking the state transition.
    fn send_power_state(&mut self, value: u32, mut deadline_elapsed: impl FnMut() -> bool) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        let payload_len = {
            let mut packer = Packer::new(&mut buf);
            packer.u8(spinel::header(0, spinel::TID_DONT_CARE))?;
            packer.packed_uint(Command::PropValueSet as u32)?;
            packer.packed_uint(properties::KEY_HOST_POWER_STATE)?;
            packer.packed_uint(value)?;
            packer.finish().len()
        };
        let sink: &mut S = &mut *self.sink;
        hdlc::encode(&buf[..payload_len], |b| {
            byteio::tx_put_blocking(sink, b, || {}, &mut deadline_elapsed)
        })
    }
}

/// Ties together C1-C10. `'q` is the receive FIFO's backing queue lifetime
/// (spec §4.2); `RXN` its capacity; `DECODE_N` the max decoded frame size;
/// `CAP`/`MAX_MSGS` the outbound store's byte budget and message count;
/// `CB`/`EVQ` the callback pool size and event queue depth.
pub struct Driver<
    'q,
    S: SerialSink,
    R: ResetHook,
    const RXN: usize,
    const DECODE_N: usize,
    const CAP: usize,
    const MAX_MSGS: usize,
    const CB: usize,
    const EVQ: usize,
> {
    sink: S,
    reset_hook: R,
    byteio: ByteIo<'q, RXN>,
    rx: RxConsumer<'q, RXN>,
    decoder: Decoder<DECODE_N>,
    matcher: TransactionMatcher,
    store: OutboundStore<CAP, MAX_MSGS>,
    pump: Pump,
    phase: PumpPhase,
    dispatch: Dispatch<CB, EVQ>,
    supervisor: Supervisor,
    security: SecurityFlags,
    mailbox: Mailbox,
    config: Config,
    response_scratch: heapless::Vec<u8, DECODE_N>,
    last_response: Option<ResponseMeta>,
}

impl<
        'q,
        S: SerialSink,
        R: ResetHook,
        const RXN: usize,
        const DECODE_N: usize,
        const CAP: usize,
        const MAX_MSGS: usize,
        const CB: usize,
        const EVQ: usize,
    > Driver<'q, S, R, RXN, DECODE_N, CAP, MAX_MSGS, CB, EVQ>
{
    pub fn new(
        sink: S,
        reset_hook: R,
        queue: &'q mut heapless::spsc::Queue<u8, RXN>,
        config: Config,
    ) -> Self {
        let (rx_producer, rx_consumer) = fifo::split(queue);
        Self {
            sink,
            reset_hook,
            byteio: ByteIo::new(rx_producer, config.near_full_threshold),
            rx: rx_consumer,
            decoder: Decoder::new(),
            matcher: TransactionMatcher::new(),
            store: OutboundStore::new(),
            pump: Pump::new(),
            phase: PumpPhase::Idle,
            dispatch: Dispatch::new(config.log_ncp_logs),
            supervisor: Supervisor::new(),
            security: SecurityFlags::new(),
            mailbox: Mailbox::new(),
            config,
            response_scratch: heapless::Vec::new(),
            last_response: None,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn session_state(&self) -> SessionState {
        self.supervisor.state()
    }

    pub fn security_flags(&mut self) -> &mut SecurityFlags {
        &mut self.security
    }

    pub fn reset_hook(&mut self) -> &mut R {
        &mut self.reset_hook
    }

    /// Runs spec §4.9's init handshake through [`Supervisor::initialize`].
    /// When `policy` is `MaySkip` and the host did not just cold-boot, tries
    /// the fast net-role probe over an already-enabled link first; only on
    /// its failure (or when the policy forbids skipping) does it fall back
    /// to up to `Config::reset_attempts` reset-and-verify cycles, each one
    /// pulsing reset in application mode and awaiting the NCP's reset
    /// announcement. `sleep` backs the reset pulse's hold/settle delays.
    pub fn initialize(
        &mut self,
        policy: crate::supervisor::ResetPolicy,
        cold_boot: bool,
        mut sleep: impl FnMut(u64),
        mut probe_deadline_elapsed: impl FnMut() -> bool,
        mut announce_deadline_elapsed: impl FnMut() -> bool,
    ) -> Result<(), Error> {
        let attempts = self.config.reset_attempts;
        let io = RefCell::new(InitIo {
            sink: &mut self.sink,
            rx: &mut self.rx,
            decoder: &mut self.decoder,
        });
        let reset_hook = &mut self.reset_hook;

        self.supervisor.initialize(
            policy,
            cold_boot,
            attempts,
            || io.borrow_mut().set_rx_enabled(true),
            || io.borrow_mut().set_rx_enabled(false),
            || io.borrow_mut().probe_net_role(&mut probe_deadline_elapsed),
            || reset_hook.pulse_reset(false, &mut sleep),
            || io.borrow_mut().await_reset_announcement(&mut announce_deadline_elapsed),
        )
    }

    /// Spec §4.9 finalize: best-effort offline notice, then unconditionally
    /// disables the link.
    pub fn finalize(&mut self, mut deadline_elapsed: impl FnMut() -> bool) {
        let io = RefCell::new(InitIo {
            sink: &mut self.sink,
            rx: &mut self.rx,
            decoder: &mut self.decoder,
        });
        self.supervisor.finalize(
            || {
                let _ = io
                    .borrow_mut()
                    .send_power_state(properties::HOST_POWER_STATE_OFFLINE, &mut deadline_elapsed);
            },
            || io.borrow_mut().set_rx_enabled(false),
        );
    }

    /// Spec §4.9 host-sleep entry. Reports whether the link was actually
    /// quiesced (empty FIFO, no frame mid-decode); on `false` the caller is
    /// expected to retry, since the NCP may still send one more frame before
    /// settling.
    pub fn enter_host_sleep(&mut self, mut deadline_elapsed: impl FnMut() -> bool) -> bool {
        let io = RefCell::new(InitIo {
            sink: &mut self.sink,
            rx: &mut self.rx,
            decoder: &mut self.decoder,
        });
        self.supervisor.enter_host_sleep(
            || {
                let _ = io
                    .borrow_mut()
                    .send_power_state(properties::HOST_POWER_STATE_LOW_POWER, &mut deadline_elapsed);
            },
            || {
                let mut guard = io.borrow_mut();
                if guard.io_quiescent() {
                    guard.set_rx_enabled(false);
                    true
                } else {
                    false
                }
            },
        )
    }

    pub fn exit_host_sleep(&mut self) {
        let sink = &mut self.sink;
        self.supervisor.exit_host_sleep(|| sink.set_rx_interrupt_enabled(true));
    }

    /// Asserts or lifts pump stall (spec §4.7: an external signal, e.g. the
    /// radio layer's own backpressure, that suppresses draining without
    /// discarding queued datagrams). Lifting stall does not itself re-post a
    /// pump wake; the caller is expected to do that alongside clearing
    /// stall, the same way `repost_if_nonempty` does for other transitions.
    pub fn set_pump_stalled(&mut self, stalled: bool) {
        self.pump.set_stalled(stalled);
        if !stalled {
            self.repost_if_nonempty();
        }
    }

    pub fn is_pump_stalled(&self) -> bool {
        self.pump.is_stalled()
    }

    /// Called from interrupt context with one freshly-received byte.
    pub fn rx_isr(&mut self, byte: u8) {
        self.byteio
            .rx_isr(&mut self.sink, &self.mailbox, self.matcher.is_pending(), byte);
    }

    /// Drains the receive FIFO through the framer and codec, matching
    /// responses, dispatching unsolicited frames, and polling the
    /// transaction deadline.
    pub fn poll_io(&mut self, now: u64) {
        while let Some(byte) = self.rx.get() {
            feed_byte(
                &mut self.decoder,
                &mut self.matcher,
                &mut self.dispatch,
                &mut self.supervisor,
                &mut self.response_scratch,
                &mut self.last_response,
                byte,
            );
        }
        self.byteio.maybe_unmask(&mut self.sink, &self.rx);

        if let Some(ignore_timeout) = self.matcher.poll_timeout(now) {
            self.last_response = Some(ResponseMeta {
                command: 0,
                key: 0,
                failed: true,
                timed_out: true,
            });
            if !ignore_timeout {
                trigger_recovery(&mut self.supervisor, &mut self.dispatch);
            }
        }
    }

    /// Takes the outcome of the most recently completed request, if any.
    /// If a pump send is in flight, pass the result on to `finish_pump`.
    pub fn take_response(&mut self) -> Option<ResponseMeta> {
        self.last_response.take()
    }

    /// A view onto the taken response's argument bytes (valid until the
    /// next `poll_io` call decodes another frame).
    pub fn response_args(&self) -> Unpacker<'_> {
        Unpacker::new(&self.response_scratch)
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.dispatch.poll_event()
    }

    pub fn take_callback_slot(&mut self, idx: usize) -> Result<crate::events::CallbackSlot, Error> {
        self.dispatch.take_callback_slot(idx)
    }

    /// Takes the most recently received inbound datagram, if any. A
    /// datagram arriving secure while the insecure source port is still
    /// open sets `secure-message-seen-on-insecure-port` (spec §4.8), which
    /// forces security on every subsequent outbound send (spec §8
    /// invariant 5, `begin_send`).
    pub fn take_inbound(&mut self) -> Option<(&[u8], bool)> {
        let (bytes, secure) = self.dispatch.take_inbound()?;
        if secure && self.security.is_set(INSECURE_SOURCE_PORT_OPEN) {
            self.security.set(SECURE_MESSAGE_SEEN_ON_INSECURE_PORT);
        }
        Some((bytes, secure))
    }

    /// Drains queued events through `caps`, an alternative to polling
    /// `poll_event` directly (spec's Design Notes: "a capability-set
    /// parameter"). Events with no corresponding callback are dropped.
    pub fn drain_events(&mut self, caps: &mut impl crate::events::Capabilities) {
        while let Some(event) = self.dispatch.poll_event() {
            match event {
                Event::StateChanged(flags) => caps.on_state_changed(flags),
                Event::LegacyUla(idx) => {
                    if let Ok(crate::events::CallbackSlot::LegacyUla(prefix)) =
                        self.dispatch.take_callback_slot(idx)
                    {
                        caps.on_legacy_ula(prefix);
                    }
                }
                Event::Recovery => caps.on_reset_recovery(),
                Event::LegacyWake => caps.on_legacy_wake(),
                Event::RoleChanged | Event::ScanResult(_) | Event::ScanComplete | Event::InboundDatagram => {}
            }
        }
    }

    /// Sends a request frame and arms the transaction matcher. Only one
    /// request may be pending at a time (spec §5).
    pub fn begin_request(
        &mut self,
        command: Command,
        key: u32,
        encode_args: impl FnOnce(&mut Packer) -> Result<(), Error>,
        dont_care: bool,
        now: u64,
        mut tx_deadline_elapsed: impl FnMut() -> bool,
    ) -> Result<(), Error> {
        if self.matcher.is_pending() {
            return Err(Error::InvalidState);
        }
        let tid = if dont_care {
            spinel::TID_DONT_CARE
        } else {
            self.matcher.next_tid()
        };
        let header = spinel::header(0, tid);

        let mut buf = [0u8; MAX_FRAME];
        let payload_len = {
            let mut packer = Packer::new(&mut buf);
            packer.u8(header)?;
            packer.packed_uint(command as u32)?;
            packer.packed_uint(key)?;
            encode_args(&mut packer)?;
            packer.finish().len()
        };

        let sink = &mut self.sink;
        let rx = &mut self.rx;
        let decoder = &mut self.decoder;
        let matcher = &mut self.matcher;
        let dispatch = &mut self.dispatch;
        let supervisor = &mut self.supervisor;
        let response_scratch = &mut self.response_scratch;
        let last_response = &mut self.last_response;

        hdlc::encode(&buf[..payload_len], |b| {
            byteio::tx_put_blocking(
                sink,
                b,
                || {
                    while let Some(byte) = rx.get() {
                        feed_byte(
                            decoder,
                            matcher,
                            dispatch,
                            supervisor,
                            response_scratch,
                            last_response,
                            byte,
                        );
                    }
                },
                &mut tx_deadline_elapsed,
            )
        })?;

        self.matcher.begin(
            tid,
            expected_response_command(command),
            key,
            now,
            self.config.request_timeout_ticks,
            dont_care,
        )
    }

    /// Submits an outbound IPv6 datagram (spec §4.7's source: the upper
    /// stack) and requests a pump wake.
    pub fn submit_datagram(&mut self, payload: &[u8], secure: bool, legacy: bool) -> Result<Handle, Error> {
        if payload.len() > MTU {
            return Err(Error::InvalidArgs);
        }
        let handle = self.store.try_allocate(0, payload.len(), secure, legacy)?;
        self.store.append(handle, payload)?;
        self.repost_if_nonempty();
        Ok(handle)
    }

    fn repost_if_nonempty(&mut self) {
        if !self.store.is_empty() && self.pump.request_wake() {
            self.mailbox.post(crate::mailbox::PUMP);
        }
    }

    fn read_datagram(&self, handle: Handle, buf: &mut [u8; MTU]) -> Result<usize, Error> {
        let len = self.store.used_len(handle)?;
        let bytes = self.store.read(handle, 0, len)?;
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn begin_send(
        &mut self,
        handle: Handle,
        now: u64,
        tx_deadline_elapsed: &mut impl FnMut() -> bool,
    ) -> Result<(), Error> {
        let secure = self.store.is_secure(handle)? || self.security.is_set(SECURE_MESSAGE_SEEN_ON_INSECURE_PORT);
        let legacy = self.store.is_legacy(handle)?;
        let mut payload = [0u8; MTU];
        let len = self.read_datagram(handle, &mut payload)?;
        let (command, key) = crate::pump::select_stream(secure, legacy);
        self.begin_request(
            command,
            key,
            |packer| packer.data(&payload[..len]),
            false,
            now,
            tx_deadline_elapsed,
        )?;
        self.phase = PumpPhase::AwaitingSend(handle);
        Ok(())
    }

    /// Begins draining the outbound queue (spec §4.7). Under stall, or
    /// while a previous send is still awaiting its response, this is a
    /// no-op; the caller re-enters once `mailbox::PUMP` fires again or
    /// `finish_pump` clears the in-flight state.
    pub fn pump_once(&mut self, now: u64, mut tx_deadline_elapsed: impl FnMut() -> bool) -> PumpAction {
        self.pump.begin_handling();
        if self.pump.is_stalled() {
            return PumpAction::Stalled;
        }
        if !matches!(self.phase, PumpPhase::Idle) {
            return PumpAction::AlreadyInFlight;
        }
        let Some(handle) = self.store.oldest() else {
            return PumpAction::NothingToSend;
        };

        let needs_port_open = self.security.is_provisional_join() && {
            let mut payload = [0u8; MTU];
            self.read_datagram(handle, &mut payload)
                .ok()
                .and_then(|len| parse_ipv6_tcp_source_port(&payload[..len]))
                .is_some()
        };

        let result = if needs_port_open {
            let mut payload = [0u8; MTU];
            let len = match self.read_datagram(handle, &mut payload) {
                Ok(len) => len,
                Err(e) => return self.fail_pump_send(handle, e),
            };
            let port = match parse_ipv6_tcp_source_port(&payload[..len]) {
                Some(port) => port,
                None => return self.fail_pump_send(handle, Error::Parse),
            };
            let outcome = self.begin_request(
                Command::PropValueInsert,
                properties::KEY_ASSISTING_PORTS,
                |packer| packer.u16(port),
                true,
                now,
                &mut tx_deadline_elapsed,
            );
            if outcome.is_ok() {
                self.phase = PumpPhase::AwaitingPortOpen(handle);
            }
            outcome
        } else {
            self.begin_send(handle, now, &mut tx_deadline_elapsed)
        };

        match result {
            Ok(()) => PumpAction::Began,
            Err(error) => self.fail_pump_send(handle, error),
        }
    }

    fn fail_pump_send(&mut self, handle: Handle, error: Error) -> PumpAction {
        trace(Trace::PumpSendFailed(match error {
            Error::Failed(status) => status,
            _ => u32::MAX,
        }));
        let _ = self.store.free(handle, || {});
        self.repost_if_nonempty();
        PumpAction::SendFailed(error)
    }

    /// Delivers the response to an in-flight pump send (spec §4.7 steps
    /// 4-5). For the port-open half of a provisional join, the outcome is
    /// ignored (best-effort) and the datagram send begins next; for the
    /// datagram send itself, the message is freed either way and, if the
    /// last-status was not OK, only logged.
    pub fn finish_pump(&mut self, now: u64, meta: ResponseMeta, mut tx_deadline_elapsed: impl FnMut() -> bool) {
        match core::mem::replace(&mut self.phase, PumpPhase::Idle) {
            PumpPhase::Idle => {}
            PumpPhase::AwaitingPortOpen(handle) => {
                self.security.set(INSECURE_SOURCE_PORT_OPEN);
                if let Err(error) = self.begin_send(handle, now, &mut tx_deadline_elapsed) {
                    let _ = self.fail_pump_send(handle, error);
                }
            }
            PumpPhase::AwaitingSend(handle) => {
                // A matched response to a PropValueSet/PropValueInsert send is
                // expected to be a last-status wrapper, which the matcher
                // always reports as `Route::Failure` (its command/key differ
                // from the request's). `failed` alone is therefore not "the
                // send failed" — decode the status and compare to OK.
                let rejected = meta.timed_out
                    || if meta.key == properties::KEY_LAST_STATUS {
                        !matches!(self.response_args().packed_uint(), Ok(properties::STATUS_OK))
                    } else {
                        meta.failed
                    };
                if rejected {
                    trace(Trace::PumpDatagramRejected(meta.key));
                }
                let _ = self.store.free(handle, || {});
                self.repost_if_nonempty();
            }
        }
    }
}
