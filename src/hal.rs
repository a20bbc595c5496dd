// SPDX-License-Identifier: Apache-2.0

//! Hardware seams used by the core.
//!
//! Each trait is the register-level contract the measurement engine, time base and interlock
//! need from one peripheral. The firmware binary implements them for the RP2040; the test
//! suite implements them with simulated hardware.

use embedded_hal::{digital::OutputPin, i2c::I2c};

use crate::adc::Channel;

/// Two-channel ADC running free, with one interrupt per completed conversion
pub trait AdcSequencer {
    /// Power up and start continuous conversions, beginning with `first`. The conversion
    /// complete interrupt is enabled.
    fn start(&mut self, first: Channel);
    /// Halt conversions and power down. No conversion complete interrupt may remain pending.
    fn stop(&mut self);
    /// A completed conversion is waiting to be read
    fn conversion_pending(&mut self) -> bool;
    /// Channel whose conversion just completed
    fn active_channel(&mut self) -> Channel;
    /// Fetch the completed conversion, normalized to
    /// [`SAMPLE_BITS`](crate::config::SAMPLE_BITS), and acknowledge its interrupt
    fn result(&mut self) -> u16;
    /// Select the channel for the next conversion
    fn select(&mut self, channel: Channel);
}

/// 16-bit counter running from 0 to [`TOP`](Self::TOP) and wrapping, with a latched overflow
/// flag
pub trait FreeRunningCounter {
    /// Highest value the counter reaches before it wraps to zero
    const TOP: u16;

    /// Live counter value
    fn count(&mut self) -> u16;
    /// Overflow flag, latched by hardware until cleared
    fn overflow_flagged(&mut self) -> bool;
    /// Clear the latched overflow flag
    fn clear_overflow(&mut self);
    /// Restart counting from zero
    fn restart(&mut self);
    /// Enable the overflow interrupt
    fn listen(&mut self);
    /// Disable the overflow interrupt. The counter keeps running.
    fn unlisten(&mut self);
}

/// Comparator-style fault input: a live level plus an edge latched by hardware
pub trait TripSignal {
    /// Fault condition currently present
    fn is_tripped(&mut self) -> bool;
    /// A fault edge has been latched since the last [`clear_edge`](Self::clear_edge)
    fn edge_latched(&mut self) -> bool;
    /// Clear the latched edge
    fn clear_edge(&mut self);
    /// Let a latched edge raise an interrupt
    fn enable_interrupt(&mut self);
    /// Stop a latched edge from raising an interrupt
    fn disable_interrupt(&mut self);
}

/// What caused the last device reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum ResetCause {
    /// Power-on, brown-out or reset pin
    PowerOn,
    /// The watchdog expired
    Watchdog,
}

/// Processor services used by the main loop
pub trait Cpu {
    /// Start the watchdog. It must be fed from then on.
    fn start_watchdog(&mut self);
    /// Feed the watchdog
    fn feed_watchdog(&mut self);
    /// Idle until any interrupt is pending. Called with interrupts masked; a pending interrupt
    /// still ends the wait.
    fn wait_for_interrupt(&mut self);
    /// Stop doing anything until the watchdog (or a power cycle) resets the device
    fn halt(&mut self) -> !;
}

/// Peripheral types making up one board
pub trait Board {
    /// Current and voltage sampling ADC
    type Adc: AdcSequencer;
    /// Time base counter
    type Counter: FreeRunningCounter;
    /// Over-current comparator
    type OverCurrent: TripSignal;
    /// Low-power detector
    type LowPower: TripSignal;
    /// Main power FET enable (high = power applied)
    type PowerEnable: OutputPin;
    /// Lamp reset line (low = held in reset)
    type LampReset: OutputPin;
    /// Link to the lamp expander
    type Expander: I2c;
}
