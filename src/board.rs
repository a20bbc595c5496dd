//! RP2040 implementations of the [`hal`](bike_light_controller::hal) traits.

use bike_light_controller::{
    adc::Channel,
    config::WATCHDOG_TIMEOUT_MS,
    hal::{AdcSequencer, Board, Cpu, FreeRunningCounter, TripSignal},
};
use defmt::warn;
use embedded_hal::digital::InputPin;
use rp2040_hal::{
    adc::{AdcFifo, AdcPin},
    fugit::ExtU32,
    gpio::{
        bank0::{Gpio16, Gpio17, Gpio2, Gpio26, Gpio27, Gpio3, Gpio4, Gpio5},
        FunctionI2C, FunctionSioInput, FunctionSioOutput, Interrupt, Pin, PinId, PullDown,
        PullNone, PullUp,
    },
    i2c::I2C,
    pac,
    pwm::{FreeRunning, Pwm0, Slice},
    Adc, Watchdog,
};

/// ADC clock divider: 48 MHz / (1 + 9999) = 4.8 kHz conversion rate
pub const ADC_CLOCK_DIVIDER: u16 = 9_999;
/// Time base PWM divider: 1.5 MHz / 192 = 7812.5 Hz
pub const PWM_DIVIDER: u8 = 192;
/// Each GPIO has four bits in the `INTR` registers, eight GPIOs per register
const INTR_BITS_PER_PIN: usize = 4;
/// Position of the edge-low bit within a GPIO's `INTR` bits
const INTR_EDGE_LOW_BIT: usize = 2;

/// Battery current sense input
pub type CurrentPin = AdcPin<Pin<Gpio26, FunctionSioInput, PullNone>>;
/// Battery voltage sense input
pub type VoltagePin = AdcPin<Pin<Gpio27, FunctionSioInput, PullNone>>;

/// ADC ownership as conversions start and stop
enum AdcMode {
    /// Not converting
    Idle(&'static mut Adc),
    /// Free-running round robin into the FIFO
    Running(AdcFifo<'static, u16>),
}

/// Round-robin FIFO sampling of the current and voltage inputs.
///
/// The hardware alternates channels by itself; [`select`](AdcSequencer::select) only records
/// which channel the next FIFO entry belongs to. A FIFO overrun loses samples and with them that
/// pairing, so an overrun restarts the round robin from the current channel.
pub struct RpAdc {
    /// `None` only while switching modes
    mode: Option<AdcMode>,
    /// ADC0
    current: CurrentPin,
    /// ADC1
    voltage: VoltagePin,
    /// Channel of the oldest FIFO entry
    next: Channel,
}

impl RpAdc {
    /// Idle ADC with both inputs attached
    pub fn new(adc: &'static mut Adc, current: CurrentPin, voltage: VoltagePin) -> Self {
        Self {
            mode: Some(AdcMode::Idle(adc)),
            current,
            voltage,
            next: Channel::Current,
        }
    }
}

impl AdcSequencer for RpAdc {
    fn start(&mut self, first: Channel) {
        let adc = match self.mode.take() {
            Some(AdcMode::Idle(adc)) => adc,
            Some(AdcMode::Running(fifo)) => fifo.stop(),
            None => return,
        };
        let builder = match first {
            Channel::Current => adc.build_fifo().set_channel(&mut self.current),
            Channel::Voltage => adc.build_fifo().set_channel(&mut self.voltage),
        };
        let fifo = builder
            .round_robin((&self.current, &self.voltage))
            .clock_divider(ADC_CLOCK_DIVIDER, 0)
            .enable_interrupt(1)
            .start();
        self.next = first;
        self.mode = Some(AdcMode::Running(fifo));
    }

    fn stop(&mut self) {
        // Stopping drains the FIFO, which also clears the interrupt
        self.mode = match self.mode.take() {
            Some(AdcMode::Running(fifo)) => Some(AdcMode::Idle(fifo.stop())),
            other => other,
        };
    }

    fn conversion_pending(&mut self) -> bool {
        let overrun = match self.mode.as_mut() {
            Some(AdcMode::Running(fifo)) => fifo.is_over(),
            _ => false,
        };
        if overrun {
            warn!("ADC FIFO overrun, restarting conversions");
            if let Some(AdcMode::Running(fifo)) = self.mode.as_mut() {
                fifo.clear_over();
            }
            self.start(Channel::Current);
            return false;
        }
        match self.mode.as_mut() {
            Some(AdcMode::Running(fifo)) => fifo.len() > 0,
            _ => false,
        }
    }

    fn active_channel(&mut self) -> Channel {
        self.next
    }

    fn result(&mut self) -> u16 {
        match self.mode.as_mut() {
            // 12-bit conversions, normalized to 10 bits
            Some(AdcMode::Running(fifo)) => fifo.read() >> 2,
            _ => 0,
        }
    }

    fn select(&mut self, channel: Channel) {
        self.next = channel;
    }
}

/// PWM slice 0 counting 0..=1999, 256 ms per wrap
pub struct PwmCounter {
    /// Free-running slice
    slice: Slice<Pwm0, FreeRunning>,
}

impl PwmCounter {
    /// Configure `slice` for the time base and start it counting
    pub fn new(mut slice: Slice<Pwm0, FreeRunning>) -> Self {
        slice.disable_interrupt();
        slice.set_div_int(PWM_DIVIDER);
        slice.set_top(Self::TOP);
        slice.enable();
        Self { slice }
    }
}

impl FreeRunningCounter for PwmCounter {
    const TOP: u16 = bike_light_controller::config::TIMER_TOP;

    fn count(&mut self) -> u16 {
        self.slice.get_counter()
    }

    fn overflow_flagged(&mut self) -> bool {
        self.slice.has_overflown()
    }

    fn clear_overflow(&mut self) {
        self.slice.clear_interrupt();
    }

    fn restart(&mut self) {
        self.slice.set_counter(0);
    }

    fn listen(&mut self) {
        self.slice.enable_interrupt();
    }

    fn unlisten(&mut self) {
        self.slice.disable_interrupt();
    }
}

/// Active-low fault input with a falling-edge interrupt
pub struct ActiveLowTrip<I: PinId> {
    /// Pulled-up input
    pin: Pin<I, FunctionSioInput, PullUp>,
}

impl<I: PinId> ActiveLowTrip<I> {
    /// Wrap `pin` and discard any edge latched before now
    pub fn new(mut pin: Pin<I, FunctionSioInput, PullUp>) -> Self {
        pin.set_interrupt_enabled(Interrupt::EdgeLow, false);
        pin.clear_interrupt(Interrupt::EdgeLow);
        Self { pin }
    }
}

impl<I: PinId> TripSignal for ActiveLowTrip<I> {
    fn is_tripped(&mut self) -> bool {
        // An unreadable input counts as tripped
        self.pin.is_low().unwrap_or(true)
    }

    fn edge_latched(&mut self) -> bool {
        // Raw status: the edge latches whether or not its interrupt is enabled
        let num = usize::from(self.pin.id().num);
        let pins_per_reg = 32 / INTR_BITS_PER_PIN;
        // SAFETY: read-only access to a status register, no other side effects
        let raw = unsafe { (*pac::IO_BANK0::ptr()).intr(num / pins_per_reg).read().bits() };
        raw & (1 << (INTR_BITS_PER_PIN * (num % pins_per_reg) + INTR_EDGE_LOW_BIT)) != 0
    }

    fn clear_edge(&mut self) {
        self.pin.clear_interrupt(Interrupt::EdgeLow);
    }

    fn enable_interrupt(&mut self) {
        self.pin.set_interrupt_enabled(Interrupt::EdgeLow, true);
    }

    fn disable_interrupt(&mut self) {
        self.pin.set_interrupt_enabled(Interrupt::EdgeLow, false);
    }
}

/// Stop everything and wait for the watchdog or a power cycle
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Watchdog and sleep control of core 0
pub struct RpCpu {
    /// Hardware watchdog, started on request
    watchdog: Watchdog,
}

impl RpCpu {
    /// Take the watchdog. It stays stopped until [`Cpu::start_watchdog`].
    pub fn new(watchdog: Watchdog) -> Self {
        Self { watchdog }
    }
}

impl Cpu for RpCpu {
    fn start_watchdog(&mut self) {
        self.watchdog.start((WATCHDOG_TIMEOUT_MS * 1_000).micros());
    }

    fn feed_watchdog(&mut self) {
        self.watchdog.feed();
    }

    fn wait_for_interrupt(&mut self) {
        cortex_m::asm::wfi();
    }

    fn halt(&mut self) -> ! {
        halt()
    }
}

/// The bike light board
pub struct RpBoard;

impl Board for RpBoard {
    type Adc = RpAdc;
    type Counter = PwmCounter;
    type OverCurrent = ActiveLowTrip<Gpio2>;
    type LowPower = ActiveLowTrip<Gpio3>;
    type PowerEnable = Pin<Gpio16, FunctionSioOutput, PullDown>;
    type LampReset = Pin<Gpio17, FunctionSioOutput, PullDown>;
    type Expander = I2C<
        pac::I2C0,
        (
            Pin<Gpio4, FunctionI2C, PullUp>,
            Pin<Gpio5, FunctionI2C, PullUp>,
        ),
    >;
}
