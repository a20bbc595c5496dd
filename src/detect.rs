// SPDX-License-Identifier: Apache-2.0

//! Over-current and low-power detectors.

use crate::hal::TripSignal;

/// Which fault a detector watches for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum DetectorKind {
    /// Comparator on the current sense line
    OverCurrent,
    /// Battery low-power signal
    LowPower,
}

/// Thin wrapper over a [`TripSignal`].
///
/// Detectors start out polled only. Once the system is past its switching transients they are
/// [armed](Self::arm), after which a latched edge raises the detector interrupt.
pub struct Detector<S> {
    /// What is being detected
    kind: DetectorKind,
    /// Input hardware
    signal: S,
    /// Edge interrupt enabled
    armed: bool,
}

impl<S: TripSignal> Detector<S> {
    /// Wrap `signal` with its interrupt disabled
    pub fn new(kind: DetectorKind, mut signal: S) -> Self {
        signal.disable_interrupt();
        Self {
            kind,
            signal,
            armed: false,
        }
    }

    /// What is being detected
    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    /// Fault condition present right now (level)
    pub fn tripped(&mut self) -> bool {
        self.signal.is_tripped()
    }

    /// Fault present now or latched since the last acknowledge
    pub fn trip_pending(&mut self) -> bool {
        self.signal.edge_latched() || self.signal.is_tripped()
    }

    /// Switch from polling to interrupt-driven detection
    pub fn arm(&mut self) {
        if !self.armed {
            self.signal.enable_interrupt();
            self.armed = true;
            info!("{:?} detection armed", self.kind);
        }
    }

    /// Edge interrupt enabled
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Clear the latched edge
    pub fn acknowledge(&mut self) {
        self.signal.clear_edge();
    }
}
