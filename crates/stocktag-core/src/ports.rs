//! # Hardware Ports
//!
//! Interfaces the coordination engine uses to reach the physical device.
//! Drivers implement these traits; the engine never talks to a pin or a
//! reader directly.
//!
//! All methods are synchronous and may block. The engine calls them from
//! a blocking thread with a timeout, so implementations do not need to be
//! async-aware, only `Send + Sync`.

use std::fmt;

/// Raw identifier of a detected tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagId(pub Vec<u8>);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Contactless tag reader/writer.
pub trait TagSensor: Send + Sync {
    /// Returns the id of the tag in the field, if any.
    fn detect(&self) -> Option<TagId>;

    /// Writes `data` into `slot` of the tag in the field. Returns false if no
    /// tag answered or the write was rejected.
    fn write(&self, slot: u8, data: &str) -> bool;

    /// Reads the text stored in `slot`, trimmed of block padding.
    fn read(&self, slot: u8) -> Option<String>;
}

/// A single on/off input such as a push button.
pub trait DiscreteInput: Send + Sync {
    /// Returns true while the input is active (pressed).
    fn read(&self) -> bool;
}

/// Small text display.
pub trait DisplayPanel: Send + Sync {
    /// Replaces the screen contents with `lines`, top to bottom.
    fn show_lines(&self, lines: &[String]);
}

/// Audible feedback.
pub trait Buzzer: Send + Sync {
    /// Sounds for `duration_ms` milliseconds.
    fn pulse(&self, duration_ms: u64);
}

// =============================================================================
// Edge Detection
// =============================================================================

/// Turns a sampled input level into discrete presses.
///
/// A held button reports one press on the inactive → active transition and
/// nothing while it stays down.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sample and returns true on a rising edge.
    pub fn rising(&mut self, level: bool) -> bool {
        let edge = level && !self.last;
        self.last = level;
        edge
    }

    /// Samples `input` and returns true on a rising edge.
    pub fn poll(&mut self, input: &dyn DiscreteInput) -> bool {
        self.rising(input.read())
    }
}
