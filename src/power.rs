// SPDX-License-Identifier: Apache-2.0

//! Main power FET and lamp reset outputs.

use embedded_hal::digital::OutputPin;

use crate::error::Error;

/// The two outputs that decide whether the lamp can draw current
pub struct PowerStage<F, R> {
    /// Main power FET enable, high = on
    enable: F,
    /// Lamp reset, low = held in reset
    lamp_reset: R,
    /// Last commanded FET state
    applied: bool,
}

impl<F: OutputPin, R: OutputPin> PowerStage<F, R> {
    /// Take the outputs and put them in the safe boot state: power off, lamp held in reset
    pub fn new(enable: F, lamp_reset: R) -> Result<Self, Error> {
        let mut stage = Self {
            enable,
            lamp_reset,
            applied: true,
        };
        stage.cut()?;
        stage.hold_lamp_in_reset()?;
        Ok(stage)
    }

    /// Switch main power on
    pub fn apply(&mut self) -> Result<(), Error> {
        self.enable.set_high().map_err(Error::pin)?;
        self.applied = true;
        Ok(())
    }

    /// Switch main power off
    pub fn cut(&mut self) -> Result<(), Error> {
        self.enable.set_low().map_err(Error::pin)?;
        self.applied = false;
        Ok(())
    }

    /// Main power was last switched on
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Hold the lamp driver in reset
    pub fn hold_lamp_in_reset(&mut self) -> Result<(), Error> {
        self.lamp_reset.set_low().map_err(Error::pin)
    }

    /// Let the lamp driver run
    pub fn release_lamp_reset(&mut self) -> Result<(), Error> {
        self.lamp_reset.set_high().map_err(Error::pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Line, OutputLog, SimPin};

    #[test]
    fn boots_safe() {
        let log = OutputLog::new();
        let stage = PowerStage::new(
            SimPin::new(Line::PowerEnable, &log),
            SimPin::new(Line::LampReset, &log),
        )
        .unwrap();
        assert!(!stage.is_applied());
        assert_eq!(
            log.events(),
            [(Line::PowerEnable, false), (Line::LampReset, false)]
        );
    }

    #[test]
    fn tracks_power_state() {
        let log = OutputLog::new();
        let mut stage = PowerStage::new(
            SimPin::new(Line::PowerEnable, &log),
            SimPin::new(Line::LampReset, &log),
        )
        .unwrap();
        stage.apply().unwrap();
        assert!(stage.is_applied());
        assert!(log.level(Line::PowerEnable));
        stage.cut().unwrap();
        assert!(!stage.is_applied());
        assert!(!log.level(Line::PowerEnable));
    }

    #[test]
    fn pin_failures_surface() {
        let log = OutputLog::new();
        let mut stage = PowerStage::new(
            SimPin::new(Line::PowerEnable, &log),
            SimPin::new(Line::LampReset, &log),
        )
        .unwrap();
        log.fail_writes(true);
        assert!(matches!(stage.apply(), Err(Error::Pin(_))));
        assert!(!stage.is_applied());
    }
}
