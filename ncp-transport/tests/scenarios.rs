// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Black-box scenario tests driving `Driver` only through its public API,
//! with wire bytes built and decoded by hand the way a real NCP's UART
//! traffic would look. Exercises spec §8's scenarios S1 (request/response),
//! S2 (unsolicited role change), S3 (stall), S4 (timeout -> recovery), S5
//! (outbound store overflow then release), and S6 (HDLC decode error ->
//! recovery).

use ncp_transport::reset::LoopbackReset;
use ncp_transport::{properties, spinel, Command, Config, Driver, Error, Event, PumpAction, ResponseMeta, SerialSink, SessionState};

struct FakeSink {
    ready: bool,
    sent: std::vec::Vec<u8>,
}

impl SerialSink for FakeSink {
    fn tx_ready(&mut self) -> bool {
        self.ready
    }
    fn tx_put(&mut self, byte: u8) {
        self.sent.push(byte);
    }
    fn set_rx_interrupt_enabled(&mut self, _enabled: bool) {}
}

type TestDriver<'q> = Driver<'q, FakeSink, LoopbackReset, 512, 512, 4096, 8, 4, 8>;

fn new_driver(queue: &mut heapless::spsc::Queue<u8, 512>) -> TestDriver<'_> {
    Driver::new(
        FakeSink {
            ready: true,
            sent: std::vec::Vec::new(),
        },
        LoopbackReset::new(),
        queue,
        Config::default(),
    )
}

fn push_packed(out: &mut std::vec::Vec<u8>, value: u32) {
    spinel::pack_uint(value, |b| {
        out.push(b);
        Ok(())
    })
    .unwrap();
}

/// Builds a complete, HDLC-framed Spinel response frame.
fn response_frame(tid: u8, command: u32, key: u32, args: &[u8]) -> std::vec::Vec<u8> {
    let mut raw = std::vec::Vec::new();
    raw.push(spinel::header(0, tid));
    push_packed(&mut raw, command);
    push_packed(&mut raw, key);
    raw.extend_from_slice(args);

    let mut framed = std::vec::Vec::new();
    ncp_transport::hdlc::encode(&raw, |b| {
        framed.push(b);
        Ok(())
    })
    .unwrap();
    framed
}

fn feed(driver: &mut TestDriver<'_>, bytes: &[u8]) {
    for &b in bytes {
        driver.rx_isr(b);
    }
}

fn utf8_arg(s: &str) -> std::vec::Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

fn packed_uint_arg(value: u32) -> std::vec::Vec<u8> {
    let mut out = std::vec::Vec::new();
    push_packed(&mut out, value);
    out
}

#[test]
fn s1_request_response_round_trip() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    driver
        .begin_request(Command::PropValueGet, properties::KEY_NCP_VERSION, |_| Ok(()), false, 0, || false)
        .unwrap();

    // The matcher drew tid 2 (the first non-reserved value); the NCP's ack
    // to a get is always `PropValueIs` carrying the requested key back.
    let frame = response_frame(2, Command::PropValueIs as u32, properties::KEY_NCP_VERSION, &utf8_arg("OPENTHREAD/1.0"));
    feed(&mut driver, &frame);
    driver.poll_io(0);

    let meta = driver.take_response().expect("a response should have matched");
    assert_eq!(
        meta,
        ResponseMeta {
            command: Command::PropValueIs as u32,
            key: properties::KEY_NCP_VERSION,
            failed: false,
            timed_out: false,
        }
    );
    assert_eq!(driver.response_args().utf8().unwrap(), "OPENTHREAD/1.0");
    assert!(driver.poll_event().is_none(), "a matched response must not also reach control-plane dispatch");
}

#[test]
fn s2_unsolicited_role_change_reaches_dispatch_not_the_matcher() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    // No request is pending, so this is routed purely by (command, key).
    let frame = response_frame(0, Command::PropValueIs as u32, properties::KEY_NET_ROLE, &packed_uint_arg(3));
    feed(&mut driver, &frame);
    driver.poll_io(0);

    assert!(driver.take_response().is_none(), "an unsolicited frame must not be delivered to a request awaiter");
    assert_eq!(driver.poll_event(), Some(Event::RoleChanged));
    assert_eq!(driver.poll_event(), Some(Event::StateChanged(ncp_transport::events::ROLE_CHANGED)));
    assert!(driver.poll_event().is_none());
}

#[test]
fn s3_outbound_datagram_with_stall() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    driver.set_pump_stalled(true);
    driver.submit_datagram(&[1, 2, 3, 4], true, false).unwrap();

    assert_eq!(driver.pump_once(0, || false), PumpAction::Stalled);
    assert!(driver.is_pump_stalled());

    driver.set_pump_stalled(false);
    assert_eq!(driver.pump_once(0, || false), PumpAction::Began);

    // The datagram went out as a secure IPv6 stream set; ack it with a
    // last-status OK, the ordinary shape of a successful send.
    let frame = response_frame(2, Command::PropValueIs as u32, properties::KEY_LAST_STATUS, &packed_uint_arg(properties::STATUS_OK));
    feed(&mut driver, &frame);
    driver.poll_io(0);
    let meta = driver.take_response().unwrap();
    driver.finish_pump(0, meta, || false);

    // The store is now empty; a fresh send attempt finds nothing to do.
    assert_eq!(driver.pump_once(0, || false), PumpAction::NothingToSend);
}

#[test]
fn s4_transaction_timeout_triggers_recovery() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    driver
        .begin_request(Command::PropValueGet, properties::KEY_NET_ROLE, |_| Ok(()), false, 0, || false)
        .unwrap();
    assert_eq!(driver.session_state(), SessionState::Uninitialized);

    // Default request timeout is 3000 ticks; nothing ever arrives.
    driver.poll_io(3_000);

    let meta = driver.take_response().expect("a timeout should surface as a response");
    assert!(meta.timed_out);
    assert!(meta.failed);
    assert_eq!(driver.session_state(), SessionState::ResetRecovery);
    assert_eq!(driver.poll_event(), Some(Event::Recovery));
}

#[test]
fn s5_outbound_store_overflow_then_release() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    let payload = [0xaa_u8; 8];
    for _ in 0..8 {
        driver.submit_datagram(&payload, false, false).unwrap();
    }
    assert_eq!(driver.submit_datagram(&payload, false, false), Err(Error::NoBuffers));

    // Drain the oldest message and ack it, freeing a slot.
    assert_eq!(driver.pump_once(0, || false), PumpAction::Began);
    let frame = response_frame(2, Command::PropValueIs as u32, properties::KEY_LAST_STATUS, &packed_uint_arg(properties::STATUS_OK));
    feed(&mut driver, &frame);
    driver.poll_io(0);
    let meta = driver.take_response().unwrap();
    driver.finish_pump(0, meta, || false);

    driver.submit_datagram(&payload, false, false).expect("a freed slot should accept a new submission");
}

#[test]
fn s6_hdlc_decode_error_triggers_recovery_once() {
    let mut queue = heapless::spsc::Queue::new();
    let mut driver = new_driver(&mut queue);

    let mut frame = response_frame(0, Command::PropValueIs as u32, properties::KEY_NET_ROLE, &packed_uint_arg(3));
    // Corrupt a payload byte (not a flag byte) so the FCS check fails.
    let corrupt_at = frame.len() / 2;
    frame[corrupt_at] ^= 0xff;

    feed(&mut driver, &frame);
    driver.poll_io(0);

    assert_eq!(driver.session_state(), SessionState::ResetRecovery);
    assert_eq!(driver.poll_event(), Some(Event::Recovery));
    assert!(driver.take_response().is_none(), "a decode failure is not a matched response");
}
