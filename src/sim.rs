// SPDX-License-Identifier: Apache-2.0

//! Simulated hardware for the host test suite.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{Arc, Mutex},
    vec::Vec,
};

use embedded_hal::{
    digital::{self, OutputPin},
    i2c::{self, I2c, Operation},
};

use crate::{
    adc::{AdcEngine, Channel},
    config::TIMER_TOP,
    hal::{AdcSequencer, Board, Cpu, FreeRunningCounter, TripSignal},
    interlock::Interlock,
    lamp::{reg, EXPANDER_ADDRESS, SWITCHES},
    time::{Monotonic, TimeBase},
};

/// Input levels seen by a [`SimAdc`]
#[derive(Clone)]
pub struct AdcLevels {
    /// Level per channel
    levels: Rc<Cell<[u16; 2]>>,
    /// Conversions to drop before the next result
    lost: Rc<Cell<u32>>,
}

impl AdcLevels {
    /// Level every following conversion of `channel` returns
    pub fn set(&self, channel: Channel, level: u16) {
        let mut levels = self.levels.get();
        levels[channel.index()] = level;
        self.levels.set(levels);
    }

    /// Drop the next conversion, as a FIFO overrun does. The hardware still moves on to the
    /// other channel.
    pub fn lose_conversion(&self) {
        self.lost.set(self.lost.get() + 1);
    }
}

/// ADC that completes a conversion whenever asked
pub struct SimAdc {
    /// Shared with the test
    levels: AdcLevels,
    /// Converting
    running: bool,
    /// Channel the hardware converts next
    converting: Channel,
    /// Channel recorded by the last [`select`](AdcSequencer::select)
    tag: Channel,
}

impl SimAdc {
    /// Stopped ADC, plus the handle that sets its input levels
    pub fn new() -> (Self, AdcLevels) {
        let levels = AdcLevels {
            levels: Rc::new(Cell::new([0; 2])),
            lost: Rc::new(Cell::new(0)),
        };
        let adc = Self {
            levels: levels.clone(),
            running: false,
            converting: Channel::Current,
            tag: Channel::Current,
        };
        (adc, levels)
    }
}

impl AdcSequencer for SimAdc {
    fn start(&mut self, first: Channel) {
        self.converting = first;
        self.tag = first;
        self.levels.lost.set(0);
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn conversion_pending(&mut self) -> bool {
        self.running
    }

    fn active_channel(&mut self) -> Channel {
        self.tag
    }

    fn result(&mut self) -> u16 {
        for _ in 0..self.levels.lost.replace(0) {
            self.converting = self.converting.other();
        }
        let sample = self.levels.levels.get()[self.converting.index()];
        self.converting = self.converting.other();
        sample
    }

    fn select(&mut self, channel: Channel) {
        self.tag = channel;
    }
}

/// State behind a [`SimCounter`]
struct CounterModel {
    /// Live value, 0..=[`TIMER_TOP`]
    count: u16,
    /// Counts added on every read
    step: u16,
    /// Overflow flag
    flagged: bool,
    /// Overflow interrupt enabled
    listening: bool,
    /// Counts since creation
    elapsed: u64,
}

/// Counter that moves `step` counts every time it is read
#[derive(Clone)]
pub struct SimCounter(Arc<Mutex<CounterModel>>);

impl SimCounter {
    /// Counter at zero, moving `step` counts per read
    pub fn new(step: u16) -> Self {
        Self(Arc::new(Mutex::new(CounterModel {
            count: 0,
            step,
            flagged: false,
            listening: false,
            elapsed: 0,
        })))
    }

    /// Lock the model
    fn model(&self) -> std::sync::MutexGuard<'_, CounterModel> {
        self.0.lock().unwrap()
    }

    /// Counts added on every following read
    pub fn set_step(&self, step: u16) {
        self.model().step = step;
    }

    /// Jump to `count` with the overflow flag forced to `flagged`
    pub fn set(&self, count: u16, flagged: bool) {
        let mut model = self.model();
        model.count = count;
        model.flagged = flagged;
    }

    /// Let `counts` counter steps pass
    pub fn advance(&self, counts: u16) {
        let mut model = self.model();
        let period = u32::from(TIMER_TOP) + 1;
        let next = u32::from(model.count) + u32::from(counts);
        if next >= period {
            model.flagged = true;
        }
        model.count = (next % period) as u16;
        model.elapsed += u64::from(counts);
    }

    /// Counter steps since creation
    pub fn elapsed(&self) -> u64 {
        self.model().elapsed
    }

    /// Overflow interrupt enabled
    pub fn listening(&self) -> bool {
        self.model().listening
    }

    /// Overflow flag set and not cleared
    pub fn flagged(&self) -> bool {
        self.model().flagged
    }
}

impl FreeRunningCounter for SimCounter {
    const TOP: u16 = TIMER_TOP;

    fn count(&mut self) -> u16 {
        let step = self.model().step;
        self.advance(step);
        self.model().count
    }

    fn overflow_flagged(&mut self) -> bool {
        self.flagged()
    }

    fn clear_overflow(&mut self) {
        self.model().flagged = false;
    }

    fn restart(&mut self) {
        self.model().count = 0;
    }

    fn listen(&mut self) {
        self.model().listening = true;
    }

    fn unlisten(&mut self) {
        self.model().listening = false;
    }
}

/// State behind a [`SimTrip`]
#[derive(Default)]
struct TripModel {
    /// Fault present
    level: bool,
    /// Edge latched
    edge: bool,
    /// Edge interrupt enabled
    interrupt: bool,
}

/// Fault input whose edge latches on every rising trip
#[derive(Clone, Default)]
pub struct SimTrip(Rc<RefCell<TripModel>>);

impl SimTrip {
    /// Untripped input, nothing latched
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the fault level. Going tripped latches an edge.
    pub fn set_level(&self, tripped: bool) {
        let mut model = self.0.borrow_mut();
        if tripped && !model.level {
            model.edge = true;
        }
        model.level = tripped;
    }

    /// Edge interrupt enabled
    pub fn interrupt_enabled(&self) -> bool {
        self.0.borrow().interrupt
    }
}

impl TripSignal for SimTrip {
    fn is_tripped(&mut self) -> bool {
        self.0.borrow().level
    }

    fn edge_latched(&mut self) -> bool {
        self.0.borrow().edge
    }

    fn clear_edge(&mut self) {
        self.0.borrow_mut().edge = false;
    }

    fn enable_interrupt(&mut self) {
        self.0.borrow_mut().interrupt = true;
    }

    fn disable_interrupt(&mut self) {
        self.0.borrow_mut().interrupt = false;
    }
}

/// Digital outputs driven by the power stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Main power FET enable
    PowerEnable,
    /// Lamp reset, active low
    LampReset,
}

/// State behind an [`OutputLog`]
#[derive(Default)]
struct LogModel {
    /// Every write, in order
    events: Vec<(Line, bool)>,
    /// Writes fail
    failing: bool,
}

/// Every level written to a [`SimPin`], in order
#[derive(Clone, Default)]
pub struct OutputLog(Rc<RefCell<LogModel>>);

impl OutputLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line and level written so far
    pub fn events(&self) -> Vec<(Line, bool)> {
        self.0.borrow().events.clone()
    }

    /// Last level written to `line`, low if never written
    pub fn level(&self, line: Line) -> bool {
        self.0
            .borrow()
            .events
            .iter()
            .rev()
            .find(|(l, _)| *l == line)
            .map_or(false, |&(_, level)| level)
    }

    /// Make every following write fail
    pub fn fail_writes(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

/// Output that records its writes in an [`OutputLog`]
pub struct SimPin {
    /// What this pin drives
    line: Line,
    /// Shared record
    log: OutputLog,
}

impl SimPin {
    /// Pin driving `line`, recorded in `log`
    pub fn new(line: Line, log: &OutputLog) -> Self {
        Self {
            line,
            log: log.clone(),
        }
    }

    /// Record a level, unless the log is failing writes
    fn write(&mut self, level: bool) -> Result<(), digital::ErrorKind> {
        let mut model = self.log.0.borrow_mut();
        if model.failing {
            return Err(digital::ErrorKind::Other);
        }
        model.events.push((self.line, level));
        Ok(())
    }
}

impl digital::ErrorType for SimPin {
    type Error = digital::ErrorKind;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

/// State behind a [`SimExpander`]
struct ExpanderModel {
    /// Register file, indexed by address
    regs: [u8; 11],
    /// Register address of the next transferred byte
    pointer: u8,
    /// Input pin levels
    inputs: u8,
    /// Every value written to the output latch
    latch_history: Vec<u8>,
    /// Bus transfers attempted
    transfers: usize,
    /// Transfers fail
    failing: bool,
}

impl ExpanderModel {
    /// Pin levels: latch on outputs, inputs elsewhere
    fn gpio(&self) -> u8 {
        let iodir = self.regs[usize::from(reg::IODIR)];
        (self.regs[usize::from(reg::OLAT)] & !iodir) | (self.inputs & iodir)
    }

    /// Read one register, with the side effects the chip has
    fn read(&mut self, address: u8) -> u8 {
        match address {
            reg::INTF => {
                if self.regs[usize::from(reg::INTF)] == 0 {
                    let changed = (self.gpio() ^ self.regs[usize::from(reg::DEFVAL)])
                        & self.regs[usize::from(reg::INTCON)]
                        & self.regs[usize::from(reg::GPINTEN)];
                    if changed != 0 {
                        self.regs[usize::from(reg::INTF)] = changed;
                        self.regs[usize::from(reg::INTCAP)] = self.gpio();
                    }
                }
                self.regs[usize::from(reg::INTF)]
            }
            reg::INTCAP => {
                self.regs[usize::from(reg::INTF)] = 0;
                self.regs[usize::from(reg::INTCAP)]
            }
            reg::GPIO => {
                self.regs[usize::from(reg::INTF)] = 0;
                self.gpio()
            }
            other => self.regs[usize::from(other)],
        }
    }

    /// Write one register. Writes to GPIO land in the latch.
    fn write(&mut self, address: u8, value: u8) {
        if address == reg::OLAT || address == reg::GPIO {
            self.latch_history.push(value);
            self.regs[usize::from(reg::OLAT)] = value;
        } else if usize::from(address) < self.regs.len() {
            self.regs[usize::from(address)] = value;
        }
    }
}

/// MCP23008 register model with three switches on its inputs
#[derive(Clone)]
pub struct SimExpander(Rc<RefCell<ExpanderModel>>);

impl SimExpander {
    /// Expander in its power-on state with all switches released
    pub fn new() -> Self {
        let mut regs = [0; 11];
        regs[usize::from(reg::IODIR)] = 0xFF;
        Self(Rc::new(RefCell::new(ExpanderModel {
            regs,
            pointer: 0,
            inputs: SWITCHES,
            latch_history: Vec::new(),
            transfers: 0,
            failing: false,
        })))
    }

    /// Raw register content
    pub fn register(&self, address: u8) -> u8 {
        self.0.borrow().regs[usize::from(address)]
    }

    /// Hold the given switches down (active low), releasing any others
    pub fn press(&self, switches: u8) {
        self.0.borrow_mut().inputs = SWITCHES & !switches;
    }

    /// Release every switch
    pub fn release(&self) {
        self.0.borrow_mut().inputs = SWITCHES;
    }

    /// Values written to the output latch since the last
    /// [`clear_latch_history`](Self::clear_latch_history)
    pub fn latch_history(&self) -> Vec<u8> {
        self.0.borrow().latch_history.clone()
    }

    /// Forget the recorded latch values
    pub fn clear_latch_history(&self) {
        self.0.borrow_mut().latch_history.clear();
    }

    /// Make every following transfer fail
    pub fn fail_transfers(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }

    /// Bus transfers attempted so far, failed ones included
    pub fn transfers(&self) -> usize {
        self.0.borrow().transfers
    }
}

impl i2c::ErrorType for SimExpander {
    type Error = i2c::ErrorKind;
}

impl I2c for SimExpander {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut model = self.0.borrow_mut();
        model.transfers += 1;
        if model.failing {
            return Err(i2c::ErrorKind::Bus);
        }
        if address != EXPANDER_ADDRESS {
            return Err(i2c::ErrorKind::NoAcknowledge(
                i2c::NoAcknowledgeSource::Address,
            ));
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    if let Some((&pointer, data)) = bytes.split_first() {
                        model.pointer = pointer;
                        for &value in data {
                            let address = model.pointer;
                            model.write(address, value);
                            model.pointer = address + 1;
                        }
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        let address = model.pointer;
                        *byte = model.read(address);
                        model.pointer = address + 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Millisecond clock set by hand
pub struct SimClock(Cell<u32>);

impl SimClock {
    /// Clock reading `now`
    pub fn new(now: u32) -> Self {
        Self(Cell::new(now))
    }

    /// Jump to `now`
    pub fn set(&self, now: u32) {
        self.0.set(now);
    }

    /// Let `ms` milliseconds pass
    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Monotonic for SimClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

/// Board assembled from the simulated peripherals
pub struct SimBoard;

impl Board for SimBoard {
    type Adc = SimAdc;
    type Counter = SimCounter;
    type OverCurrent = SimTrip;
    type LowPower = SimTrip;
    type PowerEnable = SimPin;
    type LampReset = SimPin;
    type Expander = SimExpander;
}

/// Counter steps that pass between two interrupt services
const COUNTS_PER_SERVICE: u16 = 50;

/// What the rest of the board looked like when the watchdog was fed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedMark {
    /// [`SimExpander::transfers`] so far, zero if no expander is watched
    pub expander_transfers: usize,
    /// Over-current edge interrupt enabled, if an over-current input is watched
    pub over_current_armed: Option<bool>,
    /// [`SimCounter::elapsed`] so far
    pub counter_elapsed: u64,
}

/// Processor that delivers pending interrupts whenever the firmware feeds the watchdog or idles
pub struct SimCpu<'a> {
    /// Serviced on every feed and sleep
    adc: &'a AdcEngine<SimAdc>,
    /// Receives overflows
    time: &'a TimeBase<SimCounter>,
    /// Receives detector interrupts
    interlock: &'a Interlock<SimBoard>,
    /// Advanced between services
    counter: SimCounter,
    /// Expander traffic recorded at each feed
    expander: Option<SimExpander>,
    /// Over-current input recorded at each feed
    over_current: Option<SimTrip>,
    /// [`Cpu::start_watchdog`] was called
    pub watchdog_started: bool,
    /// Board state at every feed, in order
    pub feeds: Vec<FeedMark>,
    /// Times the firmware idled
    pub sleeps: u32,
}

impl<'a> SimCpu<'a> {
    /// Processor servicing the given cells, with nothing watched
    pub fn new(
        adc: &'a AdcEngine<SimAdc>,
        time: &'a TimeBase<SimCounter>,
        interlock: &'a Interlock<SimBoard>,
        counter: SimCounter,
    ) -> Self {
        Self {
            adc,
            time,
            interlock,
            counter,
            expander: None,
            over_current: None,
            watchdog_started: false,
            feeds: Vec::new(),
            sleeps: 0,
        }
    }

    /// Record `expander` traffic and the `over_current` interrupt state in every [`FeedMark`]
    pub fn watching(mut self, expander: &SimExpander, over_current: &SimTrip) -> Self {
        self.expander = Some(expander.clone());
        self.over_current = Some(over_current.clone());
        self
    }

    /// One conversion per channel, some counter progress and any detector interrupt
    fn service(&mut self) {
        self.adc.on_conversion_complete();
        self.adc.on_conversion_complete();
        self.counter.advance(COUNTS_PER_SERVICE);
        if self.counter.listening() && self.counter.flagged() {
            self.time.on_overflow();
        }
        self.interlock.on_detector_interrupt();
    }
}

impl Cpu for SimCpu<'_> {
    fn start_watchdog(&mut self) {
        self.watchdog_started = true;
    }

    fn feed_watchdog(&mut self) {
        self.feeds.push(FeedMark {
            expander_transfers: self.expander.as_ref().map_or(0, SimExpander::transfers),
            over_current_armed: self.over_current.as_ref().map(SimTrip::interrupt_enabled),
            counter_elapsed: self.counter.elapsed(),
        });
        self.service();
    }

    fn wait_for_interrupt(&mut self) {
        self.sleeps += 1;
        self.service();
    }

    fn halt(&mut self) -> ! {
        panic!("halted");
    }
}
