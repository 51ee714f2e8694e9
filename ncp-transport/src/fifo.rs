// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C2: the receive FIFO between the serial interrupt source and the framer
//! task.
//!
//! This is a single-producer/single-consumer byte ring: the producer runs in
//! interrupt context (or whatever stands in for it — see [`crate::byteio`]),
//! the consumer runs on the driver task. `heapless::spsc::Queue` already gives
//! us a lock-free SPSC ring with no shared mutex between the two sides, which
//! is exactly the "avoid any lock shared between ISR and task" guidance in
//! spec §9; this module just layers the near-full watermark and overflow
//! counting spec §4.2 asks for on top of it.

use heapless::spsc::{Consumer, Producer, Queue};

pub const DEFAULT_CAPACITY: usize = 128;

/// Producer-side handle, used from the byte I/O adapter (C1).
pub struct RxProducer<'q, const N: usize> {
    inner: Producer<'q, u8, N>,
}

/// Consumer-side handle, used from the framer task.
pub struct RxConsumer<'q, const N: usize> {
    inner: Consumer<'q, u8, N>,
}

/// Splits a statically-allocated queue into its producer and consumer halves.
pub fn split<const N: usize>(q: &mut Queue<u8, N>) -> (RxProducer<'_, N>, RxConsumer<'_, N>) {
    let (p, c) = q.split();
    (RxProducer { inner: p }, RxConsumer { inner: c })
}

/// Returned by [`RxProducer::put`] when the FIFO has no room for another
/// byte. The byte is lost; the caller (the byte I/O adapter) counts this as
/// an overflow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Overflow;

impl<'q, const N: usize> RxProducer<'q, N> {
    /// Enqueues one received byte. Called from interrupt context.
    pub fn put(&mut self, byte: u8) -> Result<(), Overflow> {
        self.inner.enqueue(byte).map_err(|_| Overflow)
    }

    /// True once the queue holds at least `threshold` bytes. The byte I/O
    /// adapter uses this to decide when to mask further receive interrupts.
    pub fn near_full(&self, threshold: usize) -> bool {
        self.inner.len() >= threshold
    }
}

impl<'q, const N: usize> RxConsumer<'q, N> {
    /// Dequeues one byte, if any is available.
    pub fn get(&mut self) -> Option<u8> {
        self.inner.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Mirror of [`RxProducer::near_full`], usable from the consumer side so
    /// the task can decide when it is safe to re-arm the receive interrupt
    /// (the spec's "drops back below `near_full(2*threshold)`" hysteresis).
    pub fn near_full(&self, threshold: usize) -> bool {
        self.inner.len() >= threshold
    }
}
