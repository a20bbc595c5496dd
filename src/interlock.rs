// SPDX-License-Identifier: Apache-2.0

//! Fault policy and the safety lines shared with the detector interrupt.
//!
//! Every fault is handled where it is detected: its [`Response`] is applied to the power stage
//! straight away, the fault is latched, and the caller heads for a halt. Nothing here ever
//! turns power back on.

use core::cell::{Cell, RefCell};

use critical_section::Mutex;

use crate::{
    config::{CHARGE_CEILING, CURRENT_LIMIT, VOLTAGE_FLOOR},
    detect::Detector,
    error::Error,
    hal::Board,
    power::PowerStage,
};

/// Conditions that stop the light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Fault {
    /// The previous reset was caused by the watchdog
    WatchdogReset,
    /// Over-current signalled before power was applied
    OverCurrentAtBoot,
    /// Over-current during the post power-up settle window
    OverCurrentOnPowerUp,
    /// Low power signalled right after power-up
    LowPowerOnPowerUp,
    /// Accumulated charge reached its ceiling
    ChargeBudgetSpent,
    /// Instantaneous current reached its limit
    CurrentLimit,
    /// Instantaneous voltage fell below its floor
    UnderVoltage,
    /// Over-current detector interrupt
    OverCurrentTrip,
    /// Low-power detector interrupt
    LowPowerTrip,
    /// A power stage output could not be driven
    OutputPin,
}

impl Fault {
    /// What to do with the power stage when this fault is detected
    pub const fn response(self) -> Response {
        match self {
            Self::WatchdogReset | Self::OverCurrentAtBoot => Response::Refuse,
            Self::CurrentLimit => Response::CutPower,
            Self::OverCurrentOnPowerUp | Self::OverCurrentTrip | Self::OutputPin => {
                Response::CutPowerThenReset
            }
            Self::LowPowerOnPowerUp
            | Self::ChargeBudgetSpent
            | Self::UnderVoltage
            | Self::LowPowerTrip => Response::Shutdown,
        }
    }
}

/// Power stage actions taken on a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Response {
    /// Power was never applied; leave everything as it is
    Refuse,
    /// Remove power and nothing else, as fast as possible
    CutPower,
    /// Remove power, then put the lamp driver in reset
    CutPowerThenReset,
    /// Controlled shutdown: lamp driver into reset, then remove power
    Shutdown,
}

/// One evaluated measurement round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Accumulated bias-corrected charge
    pub charge: u32,
    /// Instantaneous current reading
    pub current: u16,
    /// Instantaneous voltage reading
    pub voltage: u16,
}

impl Measurement {
    /// First threshold this round violates, checked in order charge, current, voltage
    pub fn assess(&self) -> Option<Fault> {
        if self.charge >= CHARGE_CEILING {
            Some(Fault::ChargeBudgetSpent)
        } else if self.current >= CURRENT_LIMIT {
            Some(Fault::CurrentLimit)
        } else if self.voltage < VOLTAGE_FLOOR {
            Some(Fault::UnderVoltage)
        } else {
            None
        }
    }
}

/// Detectors and outputs the interlock acts on
pub struct SafetyLines<B: Board> {
    /// Over-current comparator
    pub over_current: Detector<B::OverCurrent>,
    /// Low-power detector
    pub low_power: Detector<B::LowPower>,
    /// Power FET and lamp reset
    pub power: PowerStage<B::PowerEnable, B::LampReset>,
}

impl<B: Board> SafetyLines<B> {
    /// Bundle the lines together
    pub fn new(
        over_current: Detector<B::OverCurrent>,
        low_power: Detector<B::LowPower>,
        power: PowerStage<B::PowerEnable, B::LampReset>,
    ) -> Self {
        Self {
            over_current,
            low_power,
            power,
        }
    }

    /// Apply `response`. Every step is attempted even if an earlier one failed.
    pub fn respond(&mut self, response: Response) {
        let result = match response {
            Response::Refuse => Ok(()),
            Response::CutPower => self.power.cut(),
            Response::CutPowerThenReset => {
                let cut = self.power.cut();
                let reset = self.power.hold_lamp_in_reset();
                cut.and(reset)
            }
            Response::Shutdown => {
                let reset = self.power.hold_lamp_in_reset();
                let cut = self.power.cut();
                reset.and(cut)
            }
        };
        if let Err(err) = result {
            error!("{:?} incomplete: {}", response, err);
        }
    }
}

/// Safety lines plus the latched fault, shared between the main loop and the detector
/// interrupt.
///
/// Lives in a `static` in the firmware.
pub struct Interlock<B: Board> {
    /// Installed lines
    lines: Mutex<RefCell<Option<SafetyLines<B>>>>,
    /// First fault seen
    fault: Mutex<Cell<Option<Fault>>>,
}

impl<B: Board> Interlock<B> {
    /// Interlock with nothing installed and no fault
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(RefCell::new(None)),
            fault: Mutex::new(Cell::new(None)),
        }
    }

    /// Hand over the safety lines and clear any latched fault
    pub fn install(&self, lines: SafetyLines<B>) {
        critical_section::with(|cs| {
            *self.lines.borrow_ref_mut(cs) = Some(lines);
            self.fault.borrow(cs).set(None);
        });
    }

    /// Run `f` against the safety lines. `None` if they were never installed.
    pub fn with<R>(&self, f: impl FnOnce(&mut SafetyLines<B>) -> R) -> Option<R> {
        critical_section::with(|cs| self.lines.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Switch main power on. Failure is reported as [`Fault::OutputPin`] without acting on it.
    pub fn apply_power(&self) -> Result<(), Fault> {
        match self.with(|lines| lines.power.apply()) {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => {
                error!("power enable: {}", err);
                Err(Fault::OutputPin)
            }
            None => Err(Fault::OutputPin),
        }
    }

    /// Let the lamp driver out of reset
    pub fn release_lamp(&self) -> Result<(), Error> {
        self.with(|lines| lines.power.release_lamp_reset())
            .unwrap_or(Ok(()))
    }

    /// Apply `fault`'s response and latch it. Only the first fault is kept.
    pub fn trip(&self, fault: Fault) -> Fault {
        let first = critical_section::with(|cs| {
            if let Some(lines) = self.lines.borrow_ref_mut(cs).as_mut() {
                lines.respond(fault.response());
            }
            let latched = self.fault.borrow(cs);
            let first = latched.get().unwrap_or(fault);
            latched.set(Some(first));
            first
        });
        error!("{:?}: {:?}", fault, fault.response());
        first
    }

    /// Fault latched by [`trip`](Self::trip), if any
    pub fn latched_fault(&self) -> Option<Fault> {
        critical_section::with(|cs| self.fault.borrow(cs).get())
    }

    /// Detector interrupt handler. Trips the interlock for an armed detector with a pending
    /// trip, over-current first, and returns the fault. The caller halts afterwards.
    pub fn on_detector_interrupt(&self) -> Option<Fault> {
        let fault = self.with(|lines| {
            if lines.over_current.is_armed() && lines.over_current.trip_pending() {
                lines.over_current.acknowledge();
                Some(Fault::OverCurrentTrip)
            } else if lines.low_power.is_armed() && lines.low_power.trip_pending() {
                lines.low_power.acknowledge();
                Some(Fault::LowPowerTrip)
            } else {
                None
            }
        })??;
        Some(self.trip(fault))
    }

    /// An armed detector has a trip waiting for its interrupt
    pub fn interrupt_pending(&self) -> bool {
        self.with(|lines| {
            (lines.over_current.is_armed() && lines.over_current.trip_pending())
                || (lines.low_power.is_armed() && lines.low_power.trip_pending())
        })
        .unwrap_or(false)
    }
}

impl<B: Board> Default for Interlock<B> {
    fn default() -> Self {
        Self::new()
    }
}
