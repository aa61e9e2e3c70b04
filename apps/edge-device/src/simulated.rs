//! Console-driven stand-ins for the device hardware.
//!
//! Commands are read line by line from stdin:
//!
//! | command       | effect                                   |
//! |---------------|------------------------------------------|
//! | `tag <id>`    | present a tag holding `<id>`             |
//! | `blank`       | present a tag with an empty data slot    |
//! | `remove`      | take the tag away                        |
//! | `mode`        | press the mode button                    |
//! | `+` / `-`     | press increment / decrement              |
//! | `ok` / `x`    | press confirm / cancel                   |

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use stocktag_core::{Buzzer, DiscreteInput, DisplayPanel, TagId, TagSensor};
use stocktag_sync::{HardwarePorts, QuantityButtons};

/// How long a typed press stays active, longer than any poll interval.
const PRESS_WINDOW: Duration = Duration::from_millis(400);

/// A button that reads as held for a short window after each press.
#[derive(Default)]
pub struct MomentaryInput {
    pressed_at: Mutex<Option<Instant>>,
}

impl MomentaryInput {
    pub fn press(&self) {
        *self.pressed_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

impl DiscreteInput for MomentaryInput {
    fn read(&self) -> bool {
        let pressed_at = *self.pressed_at.lock().unwrap_or_else(PoisonError::into_inner);
        pressed_at.is_some_and(|at| at.elapsed() < PRESS_WINDOW)
    }
}

#[derive(Default)]
struct TagField {
    present: Option<TagId>,
    slots: HashMap<u8, String>,
}

/// Tag reader holding at most one tag.
#[derive(Default)]
pub struct SimulatedTagSensor {
    field: Mutex<TagField>,
}

impl SimulatedTagSensor {
    fn lock(&self) -> std::sync::MutexGuard<'_, TagField> {
        self.field.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn present(&self, slot: u8, data: Option<&str>) {
        let mut field = self.lock();
        let serial = data.map(|d| d.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b))));
        field.present = Some(TagId(serial.unwrap_or(0).to_be_bytes().to_vec()));
        field.slots.clear();
        if let Some(data) = data {
            field.slots.insert(slot, data.to_string());
        }
    }

    pub fn remove(&self) {
        self.lock().present = None;
    }
}

impl TagSensor for SimulatedTagSensor {
    fn detect(&self) -> Option<TagId> {
        self.lock().present.clone()
    }

    fn write(&self, slot: u8, data: &str) -> bool {
        let mut field = self.lock();
        if field.present.is_none() {
            return false;
        }
        field.slots.insert(slot, data.to_string());
        true
    }

    fn read(&self, slot: u8) -> Option<String> {
        let field = self.lock();
        field.present.as_ref()?;
        field.slots.get(&slot).cloned()
    }
}

pub struct LogDisplay;

impl DisplayPanel for LogDisplay {
    fn show_lines(&self, lines: &[String]) {
        info!(target: "display", "{}", lines.join(" | "));
    }
}

pub struct LogBuzzer;

impl Buzzer for LogBuzzer {
    fn pulse(&self, duration_ms: u64) {
        info!(target: "buzzer", duration_ms, "Beep");
    }
}

/// Every simulated collaborator, driven by [`SimulatedPanel::spawn_console`].
#[derive(Clone)]
pub struct SimulatedPanel {
    sensor: Arc<SimulatedTagSensor>,
    mode: Arc<MomentaryInput>,
    decrement: Arc<MomentaryInput>,
    increment: Arc<MomentaryInput>,
    confirm: Arc<MomentaryInput>,
    cancel: Arc<MomentaryInput>,
    tag_slot: u8,
}

impl SimulatedPanel {
    pub fn new(tag_slot: u8) -> Self {
        SimulatedPanel {
            sensor: Arc::default(),
            mode: Arc::default(),
            decrement: Arc::default(),
            increment: Arc::default(),
            confirm: Arc::default(),
            cancel: Arc::default(),
            tag_slot,
        }
    }

    pub fn ports(&self) -> HardwarePorts {
        HardwarePorts {
            tag_sensor: self.sensor.clone(),
            mode_button: self.mode.clone(),
            buttons: QuantityButtons {
                decrement: self.decrement.clone(),
                increment: self.increment.clone(),
                confirm: self.confirm.clone(),
                cancel: self.cancel.clone(),
            },
            display: Arc::new(LogDisplay),
            buzzer: Arc::new(LogBuzzer),
        }
    }

    fn apply(&self, line: &str) {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("tag"), Some(id)) => self.sensor.present(self.tag_slot, Some(id)),
            (Some("blank"), None) => self.sensor.present(self.tag_slot, None),
            (Some("remove"), None) => self.sensor.remove(),
            (Some("mode"), None) => self.mode.press(),
            (Some("+"), None) => self.increment.press(),
            (Some("-"), None) => self.decrement.press(),
            (Some("ok"), None) => self.confirm.press(),
            (Some("x"), None) => self.cancel.press(),
            (None, _) => {}
            _ => warn!(command = %line, "Unknown console command"),
        }
    }

    /// Reads commands from stdin on a dedicated thread until EOF.
    pub fn spawn_console(&self) {
        let panel = self.clone();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => panel.apply(line.trim()),
                    Err(e) => {
                        warn!(error = %e, "Console input closed");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_visible_then_released() {
        let input = MomentaryInput::default();
        assert!(!input.read());
        input.press();
        assert!(input.read());
        std::thread::sleep(PRESS_WINDOW + Duration::from_millis(20));
        assert!(!input.read());
    }

    #[test]
    fn test_console_commands_drive_tag_sensor() {
        let panel = SimulatedPanel::new(8);
        panel.apply("tag P-100");
        assert!(panel.sensor.detect().is_some());
        assert_eq!(panel.sensor.read(8).as_deref(), Some("P-100"));

        assert!(panel.sensor.write(8, "P-200"));
        assert_eq!(panel.sensor.read(8).as_deref(), Some("P-200"));

        panel.apply("remove");
        assert!(panel.sensor.detect().is_none());
        assert!(!panel.sensor.write(8, "P-300"));

        panel.apply("blank");
        assert!(panel.sensor.read(8).is_none());
    }

    #[test]
    fn test_button_commands() {
        let panel = SimulatedPanel::new(8);
        panel.apply("ok");
        panel.apply("bogus command");
        assert!(panel.confirm.read());
        assert!(!panel.cancel.read());
    }
}
