// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C1: the byte I/O adapter between a physical (or simulated) serial port
//! and the receive FIFO (C2).
//!
//! This module owns none of the actual hardware; it is generic over a
//! [`SerialSink`] implementation the way the teacher's tasks are generic
//! over a PAC register block, so that the same logic drives a real UART in
//! an embedded build and an in-memory loopback in tests.

use crate::fifo::{self, RxConsumer, RxProducer};
use crate::mailbox::{self, Mailbox};

/// The narrow hardware seam this driver needs from a serial port: whether
/// the transmitter can accept another byte, how to hand it one, and how to
/// mask/unmask the receive interrupt.
pub trait SerialSink {
    fn tx_ready(&mut self) -> bool;
    fn tx_put(&mut self, byte: u8);
    fn set_rx_interrupt_enabled(&mut self, enabled: bool);
}

/// Ties the receive FIFO's producer half to interrupt masking and task
/// wakeup, per spec §4.1.
pub struct ByteIo<'q, const N: usize> {
    rx: RxProducer<'q, N>,
    near_full_threshold: usize,
    masked: bool,
    overflow_count: u32,
}

impl<'q, const N: usize> ByteIo<'q, N> {
    pub fn new(rx: RxProducer<'q, N>, near_full_threshold: usize) -> Self {
        Self {
            rx,
            near_full_threshold,
            masked: false,
            overflow_count: 0,
        }
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    /// Called from interrupt context with one freshly-received byte.
    ///
    /// Wakes the private response mailbox when `request_in_flight` is true
    /// (a synchronous request is awaiting its reply), otherwise the shared
    /// task mailbox — never both, matching spec §4.1.
    pub fn rx_isr(
        &mut self,
        sink: &mut dyn SerialSink,
        mailbox: &Mailbox,
        request_in_flight: bool,
        byte: u8,
    ) {
        match self.rx.put(byte) {
            Ok(()) => {
                mailbox.post(if request_in_flight {
                    mailbox::RESPONSE
                } else {
                    mailbox::RX
                });
            }
            Err(fifo::Overflow) => {
                self.overflow_count = self.overflow_count.saturating_add(1);
            }
        }

        if !self.masked && self.rx.near_full(self.near_full_threshold) {
            sink.set_rx_interrupt_enabled(false);
            self.masked = true;
        }
    }

    /// Called from the task after draining some bytes out of the FIFO. Once
    /// the FIFO has drained below `2 * near_full_threshold`, the receive
    /// interrupt is re-armed.
    pub fn maybe_unmask(&mut self, sink: &mut dyn SerialSink, consumer: &RxConsumer<'_, N>) {
        if self.masked && !consumer.near_full(2 * self.near_full_threshold) {
            sink.set_rx_interrupt_enabled(true);
            self.masked = false;
        }
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }
}

/// Transmit side: back-pressure is "spin until ready", bounded by a deadline
/// at the call site (spec §5's `tx_put` suspension point). While spinning,
/// the caller is expected to keep draining the receive FIFO to avoid a
/// mutual deadlock if the NCP has stalled waiting for us to read.
pub fn tx_put_blocking(
    sink: &mut dyn SerialSink,
    byte: u8,
    mut drain_rx: impl FnMut(),
    mut deadline_elapsed: impl FnMut() -> bool,
) -> Result<(), crate::error::Error> {
    while !sink.tx_ready() {
        drain_rx();
        if deadline_elapsed() {
            return Err(crate::error::Error::NoFrameReceived);
        }
    }
    sink.tx_put(byte);
    Ok(())
}
