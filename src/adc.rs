// SPDX-License-Identifier: Apache-2.0

//! Interrupt-driven current/voltage sampling.
//!
//! The ADC alternates between the two channels on every completed conversion. The conversion
//! complete interrupt calls [`AdcEngine::on_conversion_complete`], which folds the sample into
//! that channel's moving average and charge accumulator. The main loop reads results through
//! the remaining methods, each of which holds a short critical section.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    config::{
        ACCUMULATE_ROUNDING, ACCUMULATE_SHIFT, AVERAGE_SHIFT, AVERAGE_WINDOW, CHANNELS, SAMPLE_MAX,
    },
    hal::AdcSequencer,
};

/// Analog inputs, in conversion order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Channel {
    /// Battery current sense
    Current = 0,
    /// Battery voltage sense
    Voltage = 1,
}

impl Channel {
    /// Position of this channel's state
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Channel converted after this one
    pub const fn other(self) -> Self {
        match self {
            Self::Current => Self::Voltage,
            Self::Voltage => Self::Current,
        }
    }
}

/// Moving average and charge accumulator for one channel.
///
/// The average is kept as the sum of the last [`AVERAGE_WINDOW`] samples to preserve
/// precision. The accumulator integrates the bias-corrected sum, with [`ACCUMULATE_SHIFT`] bits
/// of precision dropped so that a whole discharge fits in 32 bits.
#[derive(Debug, Clone)]
pub struct ChannelAccumulator {
    /// Last [`AVERAGE_WINDOW`] samples
    store: [u16; AVERAGE_WINDOW],
    /// Next slot of `store` to overwrite, modulo the window
    cursor: u8,
    /// Sum of everything in `store`
    average: u16,
    /// Value of `average` with no signal on the line
    bias: u16,
    /// Bias-corrected integral of `average`, never below zero
    accumulated: u32,
}

impl ChannelAccumulator {
    /// Empty window, no bias, nothing accumulated
    pub const fn new() -> Self {
        Self {
            store: [0; AVERAGE_WINDOW],
            cursor: 0,
            average: 0,
            bias: 0,
            accumulated: 0,
        }
    }

    /// Fold a new sample into the window and the accumulator
    pub fn push(&mut self, sample: u16) {
        let sample = sample.min(SAMPLE_MAX);
        let slot = usize::from(self.cursor) & (AVERAGE_WINDOW - 1);

        self.average -= self.store[slot];
        self.store[slot] = sample;
        self.average += sample;

        if self.bias <= self.average {
            let add = (self.average - self.bias + ACCUMULATE_ROUNDING) >> ACCUMULATE_SHIFT;
            self.accumulated = self.accumulated.saturating_add(u32::from(add));
        } else {
            let sub = (self.bias - self.average + ACCUMULATE_ROUNDING) >> ACCUMULATE_SHIFT;
            self.accumulated = self.accumulated.saturating_sub(u32::from(sub));
        }

        self.cursor = self.cursor.wrapping_add(1);
    }

    /// Take the current average as the zero-signal bias and restart accumulation
    pub fn calibrate(&mut self) {
        self.bias = self.average;
        self.accumulated = 0;
    }

    /// Running sum of the window
    pub fn average(&self) -> u16 {
        self.average
    }

    /// Calibrated zero-signal sum
    pub fn bias(&self) -> u16 {
        self.bias
    }

    /// Accumulated bias-corrected value
    pub fn accumulated(&self) -> u32 {
        self.accumulated
    }

    /// Bias-corrected average at native ADC resolution, rounded. A bias above the live average
    /// reads as zero.
    pub fn reading(&self) -> u16 {
        scale_reading(self.average, self.bias)
    }
}

impl Default for ChannelAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `bias` from a window sum and bring it back to sample resolution
fn scale_reading(average: u16, bias: u16) -> u16 {
    (average.saturating_sub(bias) + (1 << (AVERAGE_SHIFT - 1))) >> AVERAGE_SHIFT
}

/// State touched by the conversion complete interrupt
struct AdcShared<A> {
    /// Sequencer hardware, installed by [`AdcEngine::init`]
    hw: Option<A>,
    /// Per-channel averages, indexed by [`Channel::index`]
    channels: [ChannelAccumulator; CHANNELS],
    /// Conversions completed since last consumed
    pending: u8,
}

/// Owner of the ADC and of everything its interrupt updates.
///
/// Lives in a `static` in the firmware so the interrupt handler can reach it.
pub struct AdcEngine<A> {
    /// Interrupt-shared state
    shared: Mutex<RefCell<AdcShared<A>>>,
}

impl<A> AdcEngine<A> {
    /// Engine with no hardware and zeroed state
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(AdcShared {
                hw: None,
                channels: [ChannelAccumulator::new(), ChannelAccumulator::new()],
                pending: 0,
            })),
        }
    }
}

impl<A> Default for AdcEngine<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AdcSequencer> AdcEngine<A> {
    /// Install the sequencer and zero all channel state
    pub fn init(&self, hw: A) {
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);
            shared.hw = Some(hw);
            shared.channels = [ChannelAccumulator::new(), ChannelAccumulator::new()];
            shared.pending = 0;
        });
    }

    /// Begin free-running conversions, starting with the current channel
    pub fn start(&self) {
        if self.with_hw(|hw| hw.start(Channel::Current)).is_none() {
            warn!("ADC started before a sequencer was installed");
        }
    }

    /// Halt conversions and power the ADC down
    pub fn stop(&self) {
        self.with_hw(|hw| hw.stop());
    }

    /// A completed conversion is waiting for [`on_conversion_complete`](Self::on_conversion_complete)
    pub fn conversion_pending(&self) -> bool {
        self.with_hw(|hw| hw.conversion_pending()).unwrap_or(false)
    }

    /// Conversion complete handler. Constant-time; must run before the next conversion ends.
    pub fn on_conversion_complete(&self) {
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);
            let shared = &mut *shared;
            let Some(hw) = shared.hw.as_mut() else {
                return;
            };
            if !hw.conversion_pending() {
                return;
            }

            let channel = hw.active_channel();
            let sample = hw.result();
            shared.channels[channel.index()].push(sample);
            shared.pending = shared.pending.saturating_add(1);
            hw.select(channel.other());

            #[cfg(feature = "trace_conversions")]
            trace!("{:?} sample {} -> sum {}", channel, sample, shared.channels[channel.index()].average());
        });
    }

    /// Consume `rounds` full rounds (one conversion per channel each) if that many have
    /// completed. Nothing is consumed when it returns `false`.
    pub fn is_updated(&self, rounds: u8) -> bool {
        let needed = u16::from(rounds) << 1;
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);
            let pending = u16::from(shared.pending);
            if pending >= needed {
                // needed <= pending, so the difference still fits the counter
                shared.pending = (pending - needed) as u8;
                true
            } else {
                false
            }
        })
    }

    /// Conversions completed and not yet consumed
    pub fn pending_conversions(&self) -> u8 {
        critical_section::with(|cs| self.shared.borrow_ref(cs).pending)
    }

    /// Capture `channel`'s current average as its zero-signal bias. Also clears its
    /// accumulator and the round counter. Only valid while no signal is present on the line.
    pub fn calibrate_bias(&self, channel: Channel) {
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);
            shared.channels[channel.index()].calibrate();
            shared.pending = 0;
        });
        debug!("{:?} bias calibrated", channel);
    }

    /// Bias-corrected moving average of `channel`, at native ADC resolution
    pub fn reading(&self, channel: Channel) -> u16 {
        let (average, bias) = critical_section::with(|cs| {
            let shared = self.shared.borrow_ref(cs);
            let chan = &shared.channels[channel.index()];
            (chan.average(), chan.bias())
        });
        scale_reading(average, bias)
    }

    /// Accumulated charge on the current channel. Already bias-corrected.
    pub fn accumulated_charge(&self) -> u32 {
        critical_section::with(|cs| {
            self.shared.borrow_ref(cs).channels[Channel::Current.index()].accumulated()
        })
    }

    /// Run `f` against the installed sequencer, if any
    fn with_hw<R>(&self, f: impl FnOnce(&mut A) -> R) -> Option<R> {
        critical_section::with(|cs| self.shared.borrow_ref_mut(cs).hw.as_mut().map(f))
    }

    /// Overwrite the charge accumulator
    #[cfg(test)]
    pub(crate) fn preset_charge(&self, charge: u32) {
        critical_section::with(|cs| {
            self.shared.borrow_ref_mut(cs).channels[Channel::Current.index()].accumulated = charge;
        });
    }
}
