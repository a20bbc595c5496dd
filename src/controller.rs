// SPDX-License-Identifier: Apache-2.0

//! Startup sequencing and steady-state monitoring.
//!
//! [`Controller`] is the main loop. It walks the light from power-on through bias calibration
//! and power-up into steady state, and from any stage into [`State::ShuttingDown`] when a fault
//! is found. There is no way back: a shut down light waits for the watchdog.

use crate::{
    adc::{AdcEngine, Channel},
    config::{
        CALIBRATION_ROUNDS, PRE_CALIBRATION_WAITS, PRE_CALIBRATION_WAIT_TICKS,
        REACTIVE_ROUNDS, RHEOSTAT_SWEEP_STEPS, STEADY_ROUNDS,
    },
    hal::{Board, Cpu, ResetCause},
    interlock::{Fault, Interlock, Measurement},
    lamp::LampDriver,
    time::TimeBase,
};

/// Controller lifecycle. Each state names the work the next [`Controller::step`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum State {
    /// Nothing powered; reset cause not yet checked
    PoweredDown,
    /// Waiting for the analog rails, then capturing the current channel bias
    CalibratingBias,
    /// Power applied, over-current polled through the settle window
    ApplyingPower,
    /// One-shot low-power check
    ConfirmingLowPower,
    /// Detectors armed, measurements evaluated while the lamp runs
    SteadyState,
    /// Terminal. The fault's response has been applied.
    ShuttingDown(Fault),
}

/// Main loop state machine
pub struct Controller<'a, B: Board, U> {
    /// Current and voltage sampling
    adc: &'a AdcEngine<B::Adc>,
    /// Millisecond clock
    time: &'a TimeBase<B::Counter>,
    /// Detectors and power stage
    interlock: &'a Interlock<B>,
    /// Lamp expander
    lamp: LampDriver<B::Expander>,
    /// Watchdog and sleep
    cpu: U,
    /// Why the device last reset
    reset_cause: ResetCause,
    /// Where we are
    state: State,
    /// Rounds between measurement evaluations
    cadence: u8,
    /// Tick number seen by the last coarse poll
    last_tick: u32,
    /// Time of the last applied lamp switch action
    last_lamp_change: u32,
}

impl<'a, B: Board, U: Cpu> Controller<'a, B, U> {
    /// Controller in [`State::PoweredDown`]. The shared cells must already hold their hardware.
    pub fn new(
        adc: &'a AdcEngine<B::Adc>,
        time: &'a TimeBase<B::Counter>,
        interlock: &'a Interlock<B>,
        lamp: LampDriver<B::Expander>,
        cpu: U,
        reset_cause: ResetCause,
    ) -> Self {
        Self {
            adc,
            time,
            interlock,
            lamp,
            cpu,
            reset_cause,
            state: State::PoweredDown,
            cadence: STEADY_ROUNDS,
            last_tick: 0,
            last_lamp_change: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Lamp driver
    pub fn lamp(&self) -> &LampDriver<B::Expander> {
        &self.lamp
    }

    /// Processor services
    pub fn cpu(&self) -> &U {
        &self.cpu
    }

    /// Do the current state's work and move on. Returns the new state.
    pub fn step(&mut self) -> State {
        let next = match self.state {
            State::PoweredDown => self.check_reset_cause(),
            State::CalibratingBias => self.calibrate(),
            State::ApplyingPower => self.apply_power(),
            State::ConfirmingLowPower => self.confirm_low_power(),
            State::SteadyState => self.monitor(),
            State::ShuttingDown(fault) => State::ShuttingDown(fault),
        };
        if next != self.state {
            info!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
        next
    }

    /// Step until a fault, then halt
    pub fn run(mut self) -> ! {
        loop {
            if let State::ShuttingDown(fault) = self.step() {
                error!("halted: {:?}", fault);
                self.cpu.halt();
            }
        }
    }

    /// Trip the interlock and enter the terminal state
    fn shut_down(&mut self, fault: Fault) -> State {
        State::ShuttingDown(self.interlock.trip(fault))
    }

    /// Refuse to run after a watchdog reset, otherwise start the watchdog and let the analog
    /// rails settle
    fn check_reset_cause(&mut self) -> State {
        if self.reset_cause == ResetCause::Watchdog {
            return self.shut_down(Fault::WatchdogReset);
        }
        self.cpu.start_watchdog();

        for _ in 0..PRE_CALIBRATION_WAITS {
            self.cpu.feed_watchdog();
            self.time.raw_wait(PRE_CALIBRATION_WAIT_TICKS);
        }
        State::CalibratingBias
    }

    /// Fill the moving averages, then take the current channel's bias. The voltage channel
    /// sees diode leakage before power is applied, so it is left uncalibrated.
    fn calibrate(&mut self) -> State {
        self.adc.start();
        while !self.adc.is_updated(CALIBRATION_ROUNDS) {
            self.cpu.feed_watchdog();
        }
        self.adc.stop();
        self.adc.calibrate_bias(Channel::Current);

        if self.over_current_pending() {
            return self.shut_down(Fault::OverCurrentAtBoot);
        }
        State::ApplyingPower
    }

    /// Apply power and poll for over-current through one timer period
    fn apply_power(&mut self) -> State {
        self.time.raw_timer_start();
        if let Err(fault) = self.interlock.apply_power() {
            return self.shut_down(fault);
        }

        loop {
            if self.over_current_pending() {
                return self.shut_down(Fault::OverCurrentOnPowerUp);
            }
            self.cpu.feed_watchdog();
            if self.time.raw_timer_ended() {
                break;
            }
        }

        self.interlock.with(|lines| lines.over_current.arm());
        State::ConfirmingLowPower
    }

    /// Check the battery once with power applied, then bring the lamp up
    fn confirm_low_power(&mut self) -> State {
        let tripped = self
            .interlock
            .with(|lines| lines.low_power.trip_pending())
            .unwrap_or(true);
        if tripped {
            return self.shut_down(Fault::LowPowerOnPowerUp);
        }
        self.interlock.with(|lines| lines.low_power.arm());

        self.time.start();
        self.adc.start();
        if let Err(err) = self.interlock.release_lamp() {
            warn!("lamp reset: {}", err);
        }
        let cpu = &mut self.cpu;
        if let Err(err) = self.lamp.full_init().and_then(|()| {
            self.lamp
                .power_down(RHEOSTAT_SWEEP_STEPS, &mut || cpu.feed_watchdog())
        }) {
            warn!("lamp init: {}", err);
        }
        self.last_lamp_change = self.time.now();
        self.last_tick = self.time.tick_number();
        self.cadence = STEADY_ROUNDS;
        State::SteadyState
    }

    /// One pass of the steady-state loop
    fn monitor(&mut self) -> State {
        self.cpu.feed_watchdog();
        self.sleep();

        // Already acted on by the detector interrupt
        if let Some(fault) = self.interlock.latched_fault() {
            return State::ShuttingDown(fault);
        }

        if self.adc.is_updated(self.cadence) {
            let round = Measurement {
                charge: self.adc.accumulated_charge(),
                current: self.adc.reading(Channel::Current),
                voltage: self.adc.reading(Channel::Voltage),
            };
            #[cfg(feature = "trace_rounds")]
            debug!(
                "charge {} current {} voltage {}",
                round.charge, round.current, round.voltage
            );
            if let Some(fault) = round.assess() {
                return self.shut_down(fault);
            }
            self.poll_lamp();
        } else {
            let tick = self.time.tick_number();
            if tick != self.last_tick {
                self.last_tick = tick;
                self.poll_lamp();
            }
        }
        State::SteadyState
    }

    /// Let the lamp driver act on its switches and pick the next measurement cadence
    fn poll_lamp(&mut self) {
        let cpu = &mut self.cpu;
        match self
            .lamp
            .poll(self.time, &mut self.last_lamp_change, &mut || cpu.feed_watchdog())
        {
            Ok(true) => self.cadence = REACTIVE_ROUNDS,
            Ok(false) => self.cadence = STEADY_ROUNDS,
            Err(err) => warn!("lamp poll: {}", err),
        }
    }

    /// Idle until an interrupt, unless one is already pending
    fn sleep(&mut self) {
        let (adc, time, interlock) = (self.adc, self.time, self.interlock);
        let cpu = &mut self.cpu;
        critical_section::with(|_| {
            let pending = adc.conversion_pending()
                || time.overflow_pending()
                || interlock.interrupt_pending();
            if !pending {
                cpu.wait_for_interrupt();
            }
        });
    }

    /// Over-current present or latched. Treated as present if the detector is missing.
    fn over_current_pending(&self) -> bool {
        self.interlock
            .with(|lines| lines.over_current.trip_pending())
            .unwrap_or(true)
    }
}
