// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A timer multiplexer.
//!
//! `Multitimer` lets you wrap a single underlying deadline clock and treat it
//! as multiple independent event timers. The independent event timers
//! correspond to variants of an enum type, to make it easy to tell them
//! apart.
//!
//! The expected usage model is:
//!
//! - Create an `enum` type naming your timers, and derive the `Enum` trait
//!   (from the `enum_map` crate) for it.
//!
//! - Create a `Multitimer<YourEnumType>`.
//!
//! - Use its API to configure your timers to your heart's content.
//!
//! - When the surrounding driver observes that time has passed (a clock tick,
//!   a wakeup, a poll), call `Multitimer::poll(now)`.
//!
//! - When you're ready to process timer events (which may or may not be
//!   immediately after the poll), call `Multitimer::iter_fired`.
//!
//! Unlike the original of this module, `Multitimer` does not reach out to any
//! global clock or scheduler itself: it only tracks deadlines and tells the
//! caller, via [`Multitimer::deadline`], what the next deadline it cares about
//! is. Driving an actual clock (a hardware timer, a host monotonic clock) is
//! the caller's job. This makes the type trivially testable and usable both
//! on bare metal and under `std`.
//!
//! **Note:** the `Multitimer` assumes that it has sole control of its
//! namespace of timers; nothing stops you from running two independent
//! `Multitimer`s against the same clock source.

#![cfg_attr(not(test), no_std)]

use enum_map::{EnumArray, EnumMap};

pub struct Multitimer<E: EnumArray<Timer>> {
    current_setting: Option<u64>,
    timers: EnumMap<E, Timer>,
}

impl<E: EnumArray<Timer> + Copy> Multitimer<E> {
    pub fn new() -> Self {
        Self {
            current_setting: None,
            timers: EnumMap::default(),
        }
    }

    /// The next deadline this multitimer would like to be woken at, if any.
    ///
    /// The caller is responsible for arranging a wakeup no later than this
    /// time and then calling [`Multitimer::poll`].
    pub fn deadline(&self) -> Option<u64> {
        self.current_setting
    }

    fn set_current(&mut self, deadline: Option<u64>) {
        self.current_setting = deadline;
    }

    /// Sets the timer chosen by `which` to go off at time `deadline`, with
    /// optional auto-repeat behavior. This replaces any prior setting for the
    /// timer and enables it.
    pub fn set_timer(
        &mut self,
        which: E,
        deadline: u64,
        repeat: Option<Repeat>,
    ) {
        // If the timer has previously fired without us noticing it, preserve
        // that across set.
        let fired_but_not_observed = self.timers[which].fired_but_not_observed;
        self.timers[which] = Timer {
            deadline: Some((deadline, repeat)),
            fired_but_not_observed,
        };

        match self.current_setting {
            Some(current) if deadline >= current => (),
            _ => {
                self.set_current(Some(deadline));
            }
        }
    }

    pub fn get_timer(&self, which: E) -> Option<(u64, Option<Repeat>)> {
        self.timers[which].deadline
    }

    pub fn clear_timer(&mut self, which: E) -> bool {
        let former_setting = self.timers[which].deadline.take();

        if let Some((former_dl, _)) = former_setting {
            // See if this timer could be responsible for our earliest
            // setting; if so, recompute it.
            if self.current_setting == Some(former_dl) {
                let new_earliest = self
                    .timers
                    .values()
                    .filter_map(|timer| timer.deadline)
                    .map(|(dl, _repeat)| dl)
                    .min();
                self.set_current(new_earliest);
            }
        }

        former_setting.is_some()
    }

    /// Advances the multitimer's notion of time to `now`, marking any timer
    /// whose deadline has passed as fired.
    ///
    /// This will mark the timers as having fired; you can read out the fired
    /// timers (destructively) using `iter_fired()`.
    pub fn poll(&mut self, now: u64) {
        // As a premature optimization, we'll keep track of the new earliest
        // deadline after the timers have fired and only make one pass over
        // the table.
        let mut new_earliest = None;

        for timer in self.timers.values_mut() {
            if let Some((d, r)) = timer.deadline {
                if d <= now {
                    if let Some(kind) = r {
                        let next = match kind {
                            Repeat::AfterWake(period) => {
                                now.saturating_add(period)
                            }
                            Repeat::AfterDeadline(period) => {
                                d.saturating_add(period)
                            }
                        };
                        timer.deadline = Some((next, r));
                    } else {
                        timer.deadline = None;
                    }
                    timer.fired_but_not_observed = true;
                }
                if let Some((new_d, _)) = timer.deadline {
                    new_earliest = Some(if let Some(earliest) = new_earliest {
                        new_d.min(earliest)
                    } else {
                        new_d
                    });
                }
            }
        }

        self.set_current(new_earliest);
    }

    /// Returns an iterator over all timers that have fired since the last time
    /// they were observed through this function. A timer may have fired more
    /// than once; that information is lost.
    ///
    /// Timers that have fired will appear in the order given by their `Enum`
    /// implementation, which in practice means declaration order.
    ///
    /// If you drop the iterator before it's exhausted, any timers you didn't
    /// observe will appear next time you call this.
    pub fn iter_fired(&mut self) -> impl Iterator<Item = E> + '_ {
        self.timers.iter_mut().filter_map(move |(e, timer)| {
            if core::mem::replace(&mut timer.fired_but_not_observed, false) {
                Some(e)
            } else {
                None
            }
        })
    }
}

impl<E: EnumArray<Timer> + Copy> Default for Multitimer<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Default)]
pub struct Timer {
    deadline: Option<(u64, Option<Repeat>)>,
    fired_but_not_observed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Repeat {
    AfterWake(u64),
    AfterDeadline(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    use enum_map::Enum;

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
    enum Timers {
        A,
        B,
    }

    #[test]
    fn nothing_fired() {
        let mut uut = Multitimer::<Timers>::new();

        assert!(uut.iter_fired().next().is_none());
    }

    #[test]
    fn setting_timer_propagates() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 1234, None);

        assert_eq!(uut.deadline(), Some(1234));
    }

    #[test]
    fn earlier_timer_overrides() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 1234, None);
        uut.set_timer(Timers::B, 12, None);

        assert_eq!(uut.deadline(), Some(12));
    }

    #[test]
    fn clear_timer_resets_undertimer() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 1234, None);
        uut.set_timer(Timers::B, 12, None);
        uut.clear_timer(Timers::B);

        assert_eq!(uut.deadline(), Some(1234));
    }

    #[test]
    fn clear_all_timers_disables() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 1234, None);
        uut.set_timer(Timers::B, 12, None);
        uut.clear_timer(Timers::A);
        uut.clear_timer(Timers::B);

        assert_eq!(uut.deadline(), None);
    }

    #[test]
    fn basic_firing_behavior() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 1234, None);
        uut.set_timer(Timers::B, 12, None);

        // The time hasn't yet reached our earliest deadline, so polling
        // should be a no-op.
        uut.poll(0);
        assert_eq!(uut.iter_fired().next(), None);

        uut.poll(11);
        assert_eq!(uut.iter_fired().next(), None);

        uut.poll(100);
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::B]);

        uut.poll(10_000);
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::A]);

        // Neither timer resets, so, we shouldn't see further events.
        uut.poll(10_000_000);
        assert_eq!(uut.iter_fired().next(), None);
    }

    #[test]
    fn repeat() {
        let mut uut = Multitimer::<Timers>::new();

        // Timer A will go off at 1234, 2234, 3234, ...
        uut.set_timer(Timers::A, 1234, Some(Repeat::AfterDeadline(1000)));
        // Timer B will go off at 12, and then every 2000 ticks _after the
        // firing was observed._
        uut.set_timer(Timers::B, 12, Some(Repeat::AfterWake(2000)));

        uut.poll(0);
        assert_eq!(uut.iter_fired().next(), None);

        uut.poll(11);
        assert_eq!(uut.iter_fired().next(), None);

        uut.poll(100);
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::B]);

        assert_eq!(
            uut.get_timer(Timers::B),
            Some((100 + 2000, Some(Repeat::AfterWake(2000)))),
        );

        uut.poll(1300);
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::A]);

        assert_eq!(
            uut.get_timer(Timers::A),
            Some((2234, Some(Repeat::AfterDeadline(1000)))),
        );

        uut.poll(2234);
        assert_eq!(
            uut.iter_fired().collect::<Vec<_>>(),
            [Timers::A, Timers::B],
        );
    }

    #[test]
    fn clear_and_reset() {
        let mut uut = Multitimer::<Timers>::new();

        uut.set_timer(Timers::A, 10, None);
        uut.set_timer(Timers::B, 20, None);

        assert_eq!(uut.deadline(), Some(10));

        uut.clear_timer(Timers::A);
        uut.set_timer(Timers::A, 15, None);

        assert_eq!(uut.deadline(), Some(15));

        uut.poll(16);
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::A]);

        uut.set_timer(Timers::A, 18, None);
        assert_eq!(uut.deadline(), Some(18));
    }
}
