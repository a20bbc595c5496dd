// SPDX-License-Identifier: Apache-2.0

//! Build-time constants for the measurement engine, time base and interlock.
//!
//! Nothing here is adjustable at runtime. The ADC shifts encode a precision/headroom trade-off
//! for 10-bit samples held in 16-bit sums and a 32-bit charge accumulator, so they must change
//! together if the sample width ever does.

/// Number of analog channels sampled in each round (current, then voltage)
pub const CHANNELS: usize = 2;

/// Width of a normalized ADC sample in bits
pub const SAMPLE_BITS: u32 = 10;
/// Largest normalized ADC sample
pub const SAMPLE_MAX: u16 = (1 << SAMPLE_BITS) - 1;

/// Moving average depth expressed as a shift amount
pub const AVERAGE_SHIFT: u32 = 4;
/// Moving average depth in samples
pub const AVERAGE_WINDOW: usize = 1 << AVERAGE_SHIFT;

/// Extra precision dropped from the running sum before it is accumulated (divide by 8)
pub const ACCUMULATE_SHIFT: u32 = 3;
/// Added before [`ACCUMULATE_SHIFT`] so the division rounds to nearest
pub const ACCUMULATE_ROUNDING: u16 = 1 << (ACCUMULATE_SHIFT - 1);

/// Top value of the 16-bit free-running timer. One period is 2000 counts.
pub const TIMER_TOP: u16 = 1999;
/// Timer period in milliseconds, as a shift applied to the overflow count
pub const TICK_PERIOD_SHIFT: u32 = 8;

/// Number of raw waits making up the pre-calibration settle interval (~2 s)
pub const PRE_CALIBRATION_WAITS: u8 = 20;
/// Timer counts per pre-calibration raw wait (~100 ms)
pub const PRE_CALIBRATION_WAIT_TICKS: u16 = 781;
/// Rounds that must complete before channel bias is captured
pub const CALIBRATION_ROUNDS: u8 = 64;

/// Rounds between measurement evaluations while nothing is happening
pub const STEADY_ROUNDS: u8 = 32;
/// Rounds between measurement evaluations right after the lamp changed
pub const REACTIVE_ROUNDS: u8 = 1;

/// Accumulated charge at or above which the light shuts down
pub const CHARGE_CEILING: u32 = 1_574_075;
/// Instantaneous current reading at or above which power is cut immediately
pub const CURRENT_LIMIT: u16 = 21;
/// Instantaneous voltage reading below which the light shuts down
pub const VOLTAGE_FLOOR: u16 = 600;

/// Watchdog timeout once the startup reset-cause check has passed
pub const WATCHDOG_TIMEOUT_MS: u32 = 500;

/// Down steps needed to sweep the rheostat to its lowest position from anywhere
pub const RHEOSTAT_SWEEP_STEPS: u8 = 96;
/// Highest rheostat position tracked in software
pub const RHEOSTAT_MAX: u8 = 31;
/// Brightness step lockout is `rheostat << STEP_LOCKOUT_SHIFT` milliseconds
pub const STEP_LOCKOUT_SHIFT: u32 = 3;
/// Quiet time after which the lamp rheostat is brought back to a consistent position
pub const LAMP_LOCKOUT_MS: u32 = 1_000;
/// Quiet time after which an idle, switched-off lamp is checked
pub const LAMP_IDLE_MS: u32 = 10_000;
