// SPDX-License-Identifier: Apache-2.0

//! Monotonic millisecond clock built on a 16-bit free-running counter.
//!
//! The counter runs at 7812.5 Hz and wraps every 2000 counts, so one overflow ("tick") is exactly
//! 256 ms. The overflow interrupt extends it in software through [`TimeBase::on_overflow`].
//!
//! Before interrupts can be trusted (startup), the `raw_*` functions provide fixed busy-wait
//! windows by polling the counter and its overflow flag directly.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{config::TICK_PERIOD_SHIFT, hal::FreeRunningCounter};

/// Source of monotonic milliseconds
pub trait Monotonic {
    /// Milliseconds since the clock was started. Wraps at [`u32::MAX`].
    fn now_ms(&self) -> u32;
}

/// Convert a counter value to milliseconds into the current period.
///
/// Multiplies by 1.0234375 / 8 (~0.128 ms per count) with rounding, using only shifts and adds.
pub const fn ticks_to_ms(ticks: u16) -> u32 {
    let t = ticks as u32;
    (((t + (t >> 1)) >> 6) + t + 4) >> 3
}

/// State touched by the overflow interrupt
struct TimeState<C> {
    /// Counter hardware, installed by [`TimeBase::init`]
    counter: Option<C>,
    /// Overflows serviced since [`TimeBase::start`]
    overflows: u32,
}

/// Millisecond clock and coarse tick counter.
///
/// Lives in a `static` in the firmware so the overflow interrupt can reach it.
pub struct TimeBase<C> {
    /// Interrupt-shared state
    state: Mutex<RefCell<TimeState<C>>>,
}

impl<C> TimeBase<C> {
    /// Time base with no counter and zero overflows
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(TimeState {
                counter: None,
                overflows: 0,
            })),
        }
    }
}

impl<C> Default for TimeBase<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: FreeRunningCounter> TimeBase<C> {
    /// Install the counter. Its overflow interrupt stays disabled until [`start`](Self::start).
    pub fn init(&self, mut counter: C) {
        counter.unlisten();
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.counter = Some(counter);
            state.overflows = 0;
        });
    }

    /// Synchronise on the next counter step, zero everything and enable the overflow interrupt
    pub fn start(&self) {
        let Some(first) = self.with_counter(|c| c.count()) else {
            warn!("time base started before a counter was installed");
            return;
        };
        while self.with_counter(|c| c.count()) == Some(first) {}

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.overflows = 0;
            if let Some(counter) = state.counter.as_mut() {
                counter.restart();
                counter.clear_overflow();
                counter.listen();
            }
        });
        debug!("time base running");
    }

    /// Disable the overflow interrupt. The hardware counter keeps running, but time is no
    /// longer extended past the current period.
    pub fn stop(&self) {
        self.with_counter(|c| c.unlisten());
    }

    /// Overflow interrupt handler
    pub fn on_overflow(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.overflows = state.overflows.wrapping_add(1);
            if let Some(counter) = state.counter.as_mut() {
                counter.clear_overflow();
            }
        });
    }

    /// An overflow has been latched and not yet serviced
    pub fn overflow_pending(&self) -> bool {
        self.with_counter(|c| c.overflow_flagged()).unwrap_or(false)
    }

    /// Milliseconds since [`start`](Self::start)
    pub fn now(&self) -> u32 {
        let (overflows, ticks, flagged) = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let overflows = state.overflows;
            match state.counter.as_mut() {
                Some(counter) => {
                    let ticks = counter.count();
                    (overflows, ticks, counter.overflow_flagged())
                }
                None => (overflows, 0, false),
            }
        });

        // The counter wrapped but the interrupt has not run yet
        let overflows = if flagged && ticks < C::TOP {
            overflows.wrapping_add(1)
        } else {
            overflows
        };

        (overflows << TICK_PERIOD_SHIFT).wrapping_add(ticks_to_ms(ticks))
    }

    /// Overflows serviced since [`start`](Self::start), for coarse polling
    pub fn tick_number(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).overflows)
    }

    /// Busy-wait for at least `duration` milliseconds
    pub fn ms_wait(&self, duration: u32) {
        let start = self.now();
        loop {
            let now = self.now();
            if now < start {
                // Clock rolled over: wait out whatever is left
                let waited = u32::MAX - start;
                self.ms_wait(duration.saturating_sub(waited).saturating_sub(1));
                return;
            }
            if now - start >= duration {
                return;
            }
        }
    }

    /// Busy-wait until the next overflow has been serviced
    pub fn tick_wait(&self) {
        let first = self.tick_number();
        while self.tick_number() == first {}
    }

    /// Start a one-period window (256 ms) that does not rely on the overflow interrupt
    pub fn raw_timer_start(&self) {
        self.with_counter(|c| {
            c.restart();
            c.clear_overflow();
        });
    }

    /// The window opened by [`raw_timer_start`](Self::raw_timer_start) has elapsed
    pub fn raw_timer_ended(&self) -> bool {
        self.with_counter(|c| c.overflow_flagged()).unwrap_or(true)
    }

    /// Busy-wait for `ticks` counter steps without relying on the overflow interrupt
    pub fn raw_wait(&self, ticks: u16) {
        self.raw_timer_start();
        let Some(mut then) = self.with_counter(|c| c.count()) else {
            return;
        };
        for _ in 0..ticks {
            loop {
                match self.with_counter(|c| c.count()) {
                    Some(now) if now == then => continue,
                    Some(now) => {
                        then = now;
                        break;
                    }
                    None => return,
                }
            }
        }
    }

    /// Run `f` against the installed counter, if any
    fn with_counter<R>(&self, f: impl FnOnce(&mut C) -> R) -> Option<R> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).counter.as_mut().map(f))
    }
}

impl<C: FreeRunningCounter> Monotonic for TimeBase<C> {
    fn now_ms(&self) -> u32 {
        self.now()
    }
}
