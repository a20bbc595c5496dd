//! Battery protection and lamp control for a bicycle light, running on an
//! [RP2040](https://www.raspberrypi.com/documentation/microcontrollers/rp2040.html).
//!
//! The light measures battery current and voltage continuously, refuses to start or shuts down
//! on over-current and under-voltage, sequences main power safely, and drives the lamp through
//! an MCP23008 I/O expander. This library holds everything that does not touch RP2040
//! registers directly, so it can be tested on a PC; the firmware binary in `src/main.rs` wires
//! it to the chip.
//!
//! ## Layout
//!
//! - [`adc`]: interrupt-driven current/voltage sampling, moving averages and charge accumulation.
//! - [`time`]: millisecond clock extended from a 16-bit free-running counter.
//! - [`detect`]: over-current and low-power detector wrappers.
//! - [`power`]: main power FET and lamp reset outputs.
//! - [`interlock`]: fault policy and the safety lines shared with the detector interrupt.
//! - [`lamp`]: MCP23008 lamp driver with switch debouncing.
//! - [`controller`]: the startup sequence and steady-state loop.
//! - [`hal`]: traits the board has to implement.
//!
//! ## Crate features
//!
//! - `trace_conversions`: Logs every completed ADC conversion. Very noisy! See
//!   [`adc::AdcEngine::on_conversion_complete`].
//! - `trace_rounds`: Logs charge, current and voltage every time a measurement round is
//!   evaluated.
//!
//! ## Sharing with interrupts
//!
//! [`adc::AdcEngine`], [`time::TimeBase`] and [`interlock::Interlock`] are built with `const fn
//! new()` so the firmware can keep them in `static`s. Their interrupt handlers and the main loop
//! only touch them through short [`critical_section`]s.
//!
//! ```ignore
//! static ADC: AdcEngine<RpAdc> = AdcEngine::new();
//!
//! #[interrupt]
//! fn ADC_IRQ_FIFO() {
//!     ADC.on_conversion_complete();
//! }
//! ```

// Copyright 2024 Bike light firmware contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

#[macro_use]
mod fmt;

pub mod adc;
pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod hal;
pub mod interlock;
pub mod lamp;
pub mod power;
pub mod time;

#[cfg(test)]
mod sim;
