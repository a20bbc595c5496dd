//! Bike light firmware for the RP2040: battery protection, power sequencing and lamp control.
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![doc(html_playground_url = "https://play.rust-lang.org/")]
#![warn(missing_docs)]

#[cfg(target_os = "none")]
mod board;
#[cfg(target_os = "none")]
mod interrupt;

/// Hardware setup and entry point
#[cfg(target_os = "none")]
mod firmware {
    use bike_light_controller::{
        controller::Controller,
        detect::{Detector, DetectorKind},
        hal::ResetCause,
        interlock::SafetyLines,
        lamp::LampDriver,
        power::PowerStage,
    };
    use cortex_m::singleton;
    use defmt::{info, warn};
    #[allow(unused_imports)]
    use defmt_rtt as _;
    #[allow(unused_imports)]
    use panic_probe as _;
    use rp2040_hal::{
        adc::AdcPin,
        clocks::init_clocks_and_plls,
        entry,
        fugit::RateExtU32,
        gpio::{FunctionI2C, PinState, Pins, PullUp},
        i2c::I2C,
        pac,
        pwm::Slices,
        Adc, Sio, Watchdog,
    };

    use crate::{
        board::{ActiveLowTrip, PwmCounter, RpAdc, RpCpu},
        interrupt::{ADC, INTERLOCK, TIME},
    };

    /// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
    #[link_section = ".boot2"]
    #[used]
    pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    /// External high-speed crystal on the pico board is 12Mhz
    pub const XOSC_FREQ_HZ: u32 = 12_000_000;
    /// System clock runs from the crystal divided by 8. The time base divider depends on it.
    pub const SYS_CLOCK_FREQ: u32 = 1_500_000;
    /// Expander bus clock, slow enough for long switch wiring
    pub const EXPANDER_BUS_FREQ_HZ: u32 = 16_000;

    /// Hardware setup, then hand over to the controller
    #[entry]
    fn main() -> ! {
        info!("Bike light startup");
        let mut pac = pac::Peripherals::take().unwrap();
        // Must be read before anything else touches the watchdog
        let reset_cause = if pac.WATCHDOG.reason().read().timer().bit_is_set() {
            ResetCause::Watchdog
        } else {
            ResetCause::PowerOn
        };
        let mut watchdog = Watchdog::new(pac.WATCHDOG);
        let sio = Sio::new(pac.SIO);

        let mut clocks = init_clocks_and_plls(
            XOSC_FREQ_HZ,
            pac.XOSC,
            pac.CLOCKS,
            pac.PLL_SYS,
            pac.PLL_USB,
            &mut pac.RESETS,
            &mut watchdog,
        )
        .ok()
        .unwrap();
        clocks
            .system_clock
            .configure_clock(&clocks.reference_clock, SYS_CLOCK_FREQ.Hz())
            .unwrap_or_else(|err| {
                warn!(
                    "Unable to downscale clock speed: {}\nTime base will run at the wrong rate",
                    err
                )
            });
        let pins = Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );

        // Power off and lamp in reset before anything else
        let power = PowerStage::new(
            pins.gpio16.into_push_pull_output_in_state(PinState::Low),
            pins.gpio17.into_push_pull_output_in_state(PinState::Low),
        )
        .unwrap();
        let over_current = Detector::new(
            DetectorKind::OverCurrent,
            ActiveLowTrip::new(pins.gpio2.into_pull_up_input()),
        );
        let low_power = Detector::new(
            DetectorKind::LowPower,
            ActiveLowTrip::new(pins.gpio3.into_pull_up_input()),
        );
        INTERLOCK.install(SafetyLines::new(over_current, low_power, power));

        // Current and voltage sampling
        let adc = singleton!(: Adc = Adc::new(pac.ADC, &mut pac.RESETS)).unwrap();
        let current = AdcPin::new(pins.gpio26.into_floating_input()).unwrap();
        let voltage = AdcPin::new(pins.gpio27.into_floating_input()).unwrap();
        ADC.init(RpAdc::new(adc, current, voltage));

        // Time base
        let pwm_slices = Slices::new(pac.PWM, &mut pac.RESETS);
        TIME.init(PwmCounter::new(pwm_slices.pwm0));

        // Lamp expander
        let expander = I2C::i2c0(
            pac.I2C0,
            pins.gpio4.reconfigure::<FunctionI2C, PullUp>(),
            pins.gpio5.reconfigure::<FunctionI2C, PullUp>(),
            EXPANDER_BUS_FREQ_HZ.Hz(),
            &mut pac.RESETS,
            &clocks.system_clock,
        );

        unsafe {
            pac::NVIC::unmask(pac::Interrupt::ADC_IRQ_FIFO);
            pac::NVIC::unmask(pac::Interrupt::PWM_IRQ_WRAP);
            pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
        }

        Controller::new(
            &ADC,
            &TIME,
            &INTERLOCK,
            LampDriver::new(expander),
            RpCpu::new(watchdog),
            reset_cause,
        )
        .run()
    }
}

/// Host builds only exist so the library tests can run; the firmware needs the RP2040.
#[cfg(not(target_os = "none"))]
fn main() {}
