// SPDX-License-Identifier: Apache-2.0

//! Lamp control through an MCP23008 I/O expander.
//!
//! The expander reads the three lamp switches (on/off, brighter, dimmer) and drives the lamp
//! enable, an indicator LED and the chip-select and up/down lines of a digital rheostat that
//! sets lamp brightness. The rheostat has no read-back, so its position is tracked in software
//! and re-established by sweeping it all the way down.
//!
//! A full sweep is several hundred register writes, far longer than the watchdog timeout at the
//! expander's bus clock. Every operation that can sweep takes a `feed` callback, called once per
//! rheostat step.

use embedded_hal::i2c::I2c;

use crate::{
    config::{LAMP_IDLE_MS, LAMP_LOCKOUT_MS, RHEOSTAT_MAX, RHEOSTAT_SWEEP_STEPS, STEP_LOCKOUT_SHIFT},
    error::Error,
    time::Monotonic,
};

/// 7-bit bus address (A2..A0 tied low)
pub const EXPANDER_ADDRESS: u8 = 0b0010_0000;

/// MCP23008 register addresses
#[allow(missing_docs)]
pub mod reg {
    pub const IODIR: u8 = 0x00;
    pub const IPOL: u8 = 0x01;
    pub const GPINTEN: u8 = 0x02;
    pub const DEFVAL: u8 = 0x03;
    pub const INTCON: u8 = 0x04;
    pub const IOCON: u8 = 0x05;
    pub const GPPU: u8 = 0x06;
    pub const INTF: u8 = 0x07;
    pub const INTCAP: u8 = 0x08;
    pub const GPIO: u8 = 0x09;
    pub const OLAT: u8 = 0x0A;
}

/// Indicator LED output, active low
pub const LED: u8 = 0b0000_0001;
/// On/off switch input, active low
pub const SWITCH_ON_OFF: u8 = 0b0000_0010;
/// Brighter switch input, active low
pub const SWITCH_UP: u8 = 0b0000_0100;
/// Dimmer switch input, active low
pub const SWITCH_DOWN: u8 = 0b0000_1000;
/// All switch inputs
pub const SWITCHES: u8 = SWITCH_ON_OFF | SWITCH_UP | SWITCH_DOWN;
/// Rheostat chip select, active low
pub const RHEOSTAT_NCS: u8 = 0b0001_0000;
/// Rheostat direction, high = up
pub const RHEOSTAT_UP: u8 = 0b0010_0000;
/// Lamp enable output
pub const LAMP_ENABLE: u8 = 0b1000_0000;

/// Pin directions: switches and the unused pin are inputs
const IODIR_INPUTS: u8 = 0b0100_1110;
/// Output latch after reset: LED off, rheostat deselected, lamp off
const LATCH_INITIAL: u8 = LED | RHEOSTAT_NCS;

/// On/off state of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum LightState {
    /// Not lit
    Off,
    /// Lit
    On,
}

/// Driver for the expander and everything hanging off it
pub struct LampDriver<I> {
    /// Expander link
    bus: I,
    /// Indicator LED
    led: LightState,
    /// Lamp enable
    lamp: LightState,
    /// Idle value of the output latch
    latch: u8,
    /// Software copy of the rheostat wiper position, 0..=[`RHEOSTAT_MAX`]
    rheostat: u8,
}

impl<I: I2c> LampDriver<I> {
    /// Driver with the lamp assumed off and the rheostat at its lowest position
    pub fn new(bus: I) -> Self {
        Self {
            bus,
            led: LightState::Off,
            lamp: LightState::Off,
            latch: LATCH_INITIAL,
            rheostat: 0,
        }
    }

    /// Lamp enable state
    pub fn lamp(&self) -> LightState {
        self.lamp
    }

    /// Tracked rheostat position
    pub fn rheostat(&self) -> u8 {
        self.rheostat
    }

    /// Turn everything off and set up the pin directions and pull-ups
    pub fn short_init(&mut self) -> Result<(), Error> {
        self.latch = LATCH_INITIAL;
        self.led = LightState::Off;
        self.lamp = LightState::Off;

        self.write_latch(self.latch)?;
        self.write_reg(reg::IODIR, IODIR_INPUTS)?;
        self.write_reg(reg::GPPU, SWITCHES)
    }

    /// [`short_init`](Self::short_init) plus switch change interrupts
    pub fn full_init(&mut self) -> Result<(), Error> {
        self.write_reg(reg::IOCON, 0)?;
        self.short_init()?;

        self.write_reg(reg::GPINTEN, SWITCHES)?;
        // Interrupt whenever a switch differs from its released level
        self.write_reg(reg::DEFVAL, SWITCHES)?;
        self.write_reg(reg::INTCON, SWITCHES)?;

        // Drop anything captured before we were listening
        let mut captured = [0u8; 1];
        self.read_regs(reg::INTCAP, &mut captured)?;
        info!("lamp expander initialized");
        Ok(())
    }

    /// Step the rheostat down `steps` times, calling `feed` after each step
    pub fn power_down(&mut self, steps: u8, feed: &mut impl FnMut()) -> Result<(), Error> {
        for _ in 0..steps {
            let mut latch = self.latch | RHEOSTAT_NCS | RHEOSTAT_UP;
            self.write_latch(latch)?; // deselected, direction up

            latch &= !RHEOSTAT_NCS;
            self.write_latch(latch)?; // select while up: no step

            latch &= !RHEOSTAT_UP;
            self.write_latch(latch)?; // falling U/nD: one step down

            latch |= RHEOSTAT_UP;
            self.write_latch(latch)?;

            self.write_latch(self.latch)?;

            self.rheostat = self.rheostat.saturating_sub(1);
            feed();
        }
        Ok(())
    }

    /// Step the rheostat up `steps` times, calling `feed` after each step
    pub fn power_up(&mut self, steps: u8, feed: &mut impl FnMut()) -> Result<(), Error> {
        for _ in 0..steps {
            let mut latch = self.latch & !RHEOSTAT_NCS;
            self.write_latch(latch)?; // select while down: no step

            latch |= RHEOSTAT_UP;
            self.write_latch(latch)?; // rising U/nD: one step up

            self.write_latch(self.latch)?;

            if self.rheostat < RHEOSTAT_MAX {
                self.rheostat += 1;
            }
            feed();
        }
        Ok(())
    }

    /// Poll the switches and act on them.
    ///
    /// `last_change` is the time of the last applied switch action and is updated here.
    /// `feed` is called through any rheostat steps. Returns whether a switch changed the lamp.
    pub fn poll<T: Monotonic>(
        &mut self,
        clock: &T,
        last_change: &mut u32,
        feed: &mut impl FnMut(),
    ) -> Result<bool, Error> {
        let mut flagged = [0u8; 1];
        self.read_regs(reg::INTF, &mut flagged)?;

        let mut toggled = false;
        let mut stepped = false;
        if flagged[0] != 0 {
            // INTCAP then GPIO: pins at the interrupt, and now
            let mut pins = [0u8; 2];
            self.read_regs(reg::INTCAP, &mut pins)?;
            let [captured, live] = pins;

            let action = self.process_switches(captured, clock.now_ms(), last_change, feed)?;
            toggled |= action == SwitchAction::Toggled;
            stepped |= action == SwitchAction::Stepped;
            if captured != live {
                let action = self.process_switches(live, clock.now_ms(), last_change, feed)?;
                toggled |= action == SwitchAction::Toggled;
                stepped |= action == SwitchAction::Stepped;
            }
        }

        let quiet = clock.now_ms().wrapping_sub(*last_change);
        if quiet > LAMP_LOCKOUT_MS {
            // Long enough since the last change that this can't be mistaken for a switch action
            match (self.lamp, self.rheostat) {
                (LightState::Off, r) if r > 0 => self.power_down(RHEOSTAT_SWEEP_STEPS, feed)?,
                (LightState::On, 0) => self.power_up(1, feed)?,
                _ => {}
            }
        }
        if quiet > LAMP_IDLE_MS && self.lamp == LightState::Off {
            trace!("lamp idle and off");
        }

        if toggled {
            self.latch = RHEOSTAT_NCS;
            if self.lamp == LightState::On {
                self.latch |= LAMP_ENABLE;
            }
            if self.led == LightState::Off {
                self.latch |= LED;
            }
            self.write_latch(self.latch)?;
        }

        Ok(toggled || stepped)
    }

    /// Act on one snapshot of the switch inputs
    fn process_switches(
        &mut self,
        pins: u8,
        now: u32,
        last_change: &mut u32,
        feed: &mut impl FnMut(),
    ) -> Result<SwitchAction, Error> {
        if pins & SWITCH_ON_OFF == 0 {
            match (self.lamp, self.rheostat) {
                (LightState::Off, r) if r > 0 => {
                    self.lamp = LightState::On;
                    self.power_down(RHEOSTAT_SWEEP_STEPS, feed)?;
                    self.power_up(1, feed)?;
                    *last_change = now;
                    debug!("lamp on");
                    return Ok(SwitchAction::Toggled);
                }
                (LightState::On, 0) => {
                    self.lamp = LightState::Off;
                    self.power_down(RHEOSTAT_SWEEP_STEPS, feed)?;
                    *last_change = now;
                    debug!("lamp off");
                    return Ok(SwitchAction::Toggled);
                }
                _ => {}
            }
        } else if now.wrapping_sub(*last_change) > u32::from(self.rheostat) << STEP_LOCKOUT_SHIFT {
            // Steps repeat faster at the bottom of the range
            if pins & SWITCH_UP == 0 {
                self.power_up(1, feed)?;
                *last_change = now;
                debug!("lamp brighter: {}", self.rheostat);
                return Ok(SwitchAction::Stepped);
            } else if pins & SWITCH_DOWN == 0 {
                self.power_down(1, feed)?;
                *last_change = now;
                debug!("lamp dimmer: {}", self.rheostat);
                return Ok(SwitchAction::Stepped);
            }
        }
        Ok(SwitchAction::None)
    }

    /// Write the output latch
    fn write_latch(&mut self, value: u8) -> Result<(), Error> {
        self.write_reg(reg::OLAT, value)
    }

    /// Write one register
    fn write_reg(&mut self, address: u8, value: u8) -> Result<(), Error> {
        self.bus
            .write(EXPANDER_ADDRESS, &[address, value])
            .map_err(Error::bus)
    }

    /// Read consecutive registers starting at `address`.
    ///
    /// Pointer write and read are separate transfers; the expander is unreliable with a
    /// repeated start at low bus clocks.
    fn read_regs(&mut self, address: u8, out: &mut [u8]) -> Result<(), Error> {
        self.bus
            .write(EXPANDER_ADDRESS, &[address])
            .map_err(Error::bus)?;
        self.bus.read(EXPANDER_ADDRESS, out).map_err(Error::bus)
    }
}

/// Outcome of processing one switch snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchAction {
    /// Nothing applied
    None,
    /// Lamp switched on or off
    Toggled,
    /// Brightness stepped
    Stepped,
}
