// SPDX-License-Identifier: Apache-2.0

//! Logging macros that pick the right backend for the build target.
//!
//! Firmware images (`target_os = "none"`) log through [defmt](https://docs.rs/defmt) over RTT.
//! Hosted builds, mainly `cargo test`, go through the [`log`](https://docs.rs/log) facade so
//! that the core can be exercised without a defmt global logger. Format strings must therefore
//! stick to `{}` and `{:?}` placeholders understood by both.
#![allow(unused_macros)]

#[cfg(target_os = "none")]
macro_rules! trace {
    ($($arg:tt)*) => { ::defmt::trace!($($arg)*) };
}

#[cfg(not(target_os = "none"))]
macro_rules! trace {
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}

#[cfg(target_os = "none")]
macro_rules! debug {
    ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
}

#[cfg(not(target_os = "none"))]
macro_rules! debug {
    ($($arg:tt)*) => { ::log::debug!($($arg)*) };
}

#[cfg(target_os = "none")]
macro_rules! info {
    ($($arg:tt)*) => { ::defmt::info!($($arg)*) };
}

#[cfg(not(target_os = "none"))]
macro_rules! info {
    ($($arg:tt)*) => { ::log::info!($($arg)*) };
}

#[cfg(target_os = "none")]
macro_rules! warn {
    ($($arg:tt)*) => { ::defmt::warn!($($arg)*) };
}

#[cfg(not(target_os = "none"))]
macro_rules! warn {
    ($($arg:tt)*) => { ::log::warn!($($arg)*) };
}

#[cfg(target_os = "none")]
macro_rules! error {
    ($($arg:tt)*) => { ::defmt::error!($($arg)*) };
}

#[cfg(not(target_os = "none"))]
macro_rules! error {
    ($($arg:tt)*) => { ::log::error!($($arg)*) };
}
