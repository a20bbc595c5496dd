//! Interrupt handlers, plus the `static` cells they share with the main loop.

use bike_light_controller::{adc::AdcEngine, interlock::Interlock, time::TimeBase};
use defmt::error;
use rp2040_hal::pac::interrupt;

use crate::board::{self, PwmCounter, RpAdc, RpBoard};

/// Current and voltage sampling
pub static ADC: AdcEngine<RpAdc> = AdcEngine::new();
/// Millisecond clock
pub static TIME: TimeBase<PwmCounter> = TimeBase::new();
/// Detectors and power stage
pub static INTERLOCK: Interlock<RpBoard> = Interlock::new();

/// ADC FIFO reached one entry
#[interrupt]
fn ADC_IRQ_FIFO() {
    ADC.on_conversion_complete();
}

/// Time base wrapped
#[interrupt]
fn PWM_IRQ_WRAP() {
    TIME.on_overflow();
}

/// Over-current or low-power edge. Power is already off when this halts.
#[interrupt]
fn IO_IRQ_BANK0() {
    if let Some(fault) = INTERLOCK.on_detector_interrupt() {
        error!("{} from detector interrupt, halting", fault);
        board::halt();
    }
}
