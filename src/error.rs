// SPDX-License-Identifier: Apache-2.0

//! Peripheral driver errors.
//!
//! These cover failures talking to outputs and the lamp expander. Electrical faults are not
//! errors: see [`Fault`](crate::interlock::Fault).

use core::fmt;

use embedded_hal::{digital, i2c};

/// Errors returned by the output and expander drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A digital output refused to change state
    Pin(digital::ErrorKind),
    /// A transfer to the lamp expander failed
    Bus(i2c::ErrorKind),
}

impl Error {
    /// Wrap any [`digital::Error`]
    pub fn pin<E: digital::Error>(err: E) -> Self {
        Self::Pin(err.kind())
    }

    /// Wrap any [`i2c::Error`]
    pub fn bus<E: i2c::Error>(err: E) -> Self {
        Self::Bus(err.kind())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin(kind) => write!(f, "output pin fault: {kind:?}"),
            Self::Bus(kind) => write!(f, "lamp expander bus fault: {kind:?}"),
        }
    }
}

#[cfg(target_os = "none")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Pin(kind) => defmt::write!(fmt, "output pin fault: {}", defmt::Debug2Format(kind)),
            Self::Bus(kind) => {
                defmt::write!(fmt, "lamp expander bus fault: {}", defmt::Debug2Format(kind))
            }
        }
    }
}
