//! # Hardware Access
//!
//! Bundles the device's collaborators and runs every call against them on the
//! blocking pool, bounded by the hardware timeout.
//!
//! ```text
//! ┌──────────────────┐  spawn_blocking + timeout  ┌──────────────────────┐
//! │ async duty       │ ─────────────────────────► │ TagSensor / inputs / │
//! │ (polling, loop)  │ ◄───── result or ───────── │ display / buzzer     │
//! └──────────────────┘      HardwareTimeout       └──────────────────────┘
//! ```
//!
//! A collaborator that hangs keeps its blocking thread, but the duty that
//! called it gets a [`SyncError::HardwareTimeout`] and carries on with its
//! next cycle. Each collaborator has a single-permit gate: while an earlier
//! call is still stuck inside it, new calls wait on the gate and time out
//! without parking another blocking thread. Other collaborators are
//! unaffected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use stocktag_core::{Button, Buzzer, DiscreteInput, DisplayPanel, TagId, TagSensor};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Ports
// =============================================================================

/// The four buttons used while choosing a quantity.
#[derive(Clone)]
pub struct QuantityButtons {
    pub decrement: Arc<dyn DiscreteInput>,
    pub increment: Arc<dyn DiscreteInput>,
    pub confirm: Arc<dyn DiscreteInput>,
    pub cancel: Arc<dyn DiscreteInput>,
}

impl QuantityButtons {
    fn input(&self, button: Button) -> &Arc<dyn DiscreteInput> {
        match button {
            Button::Decrement => &self.decrement,
            Button::Increment => &self.increment,
            Button::Confirm => &self.confirm,
            Button::Cancel => &self.cancel,
        }
    }
}

/// Every collaborator the device talks to.
#[derive(Clone)]
pub struct HardwarePorts {
    pub tag_sensor: Arc<dyn TagSensor>,
    pub mode_button: Arc<dyn DiscreteInput>,
    pub buttons: QuantityButtons,
    pub display: Arc<dyn DisplayPanel>,
    pub buzzer: Arc<dyn Buzzer>,
}

// =============================================================================
// Bounded Caller
// =============================================================================

/// One outstanding call per collaborator.
#[derive(Clone)]
struct Gates {
    tag_sensor: Arc<Semaphore>,
    mode_button: Arc<Semaphore>,
    buttons: Arc<Semaphore>,
    display: Arc<Semaphore>,
    buzzer: Arc<Semaphore>,
}

impl Gates {
    fn new() -> Self {
        Gates {
            tag_sensor: Arc::new(Semaphore::new(1)),
            mode_button: Arc::new(Semaphore::new(1)),
            buttons: Arc::new(Semaphore::new(1)),
            display: Arc::new(Semaphore::new(1)),
            buzzer: Arc::new(Semaphore::new(1)),
        }
    }
}

/// Runs collaborator calls off the async workers with a time bound.
#[derive(Clone)]
pub struct Hardware {
    ports: HardwarePorts,
    timeout: Duration,
    gates: Gates,
}

impl Hardware {
    pub fn new(ports: HardwarePorts, timeout: Duration) -> Self {
        Hardware {
            ports,
            timeout,
            gates: Gates::new(),
        }
    }

    pub fn ports(&self) -> &HardwarePorts {
        &self.ports
    }

    fn timed_out(&self, operation: &'static str) -> SyncError {
        SyncError::HardwareTimeout {
            operation,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Runs `call` on the blocking pool while holding `gate`.
    ///
    /// Waiting for the gate counts against the timeout. The permit moves into
    /// the blocking closure, so it is released only when the collaborator
    /// actually returns.
    ///
    /// ## Errors
    /// - [`SyncError::HardwareTimeout`] if the gate or the call does not come
    ///   free in time
    /// - [`SyncError::Internal`] if it panicked
    async fn call<T, F>(
        &self,
        gate: &Arc<Semaphore>,
        operation: &'static str,
        call: F,
    ) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let gate = gate.clone();
        let bounded = async move {
            let permit = gate
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Internal(format!("hardware gate closed: {e}")))?;

            let task = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                call()
            });
            task.await.map_err(|e| {
                SyncError::Internal(format!("hardware call '{operation}' failed: {e}"))
            })
        };

        match tokio::time::timeout(self.timeout, bounded).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, "Collaborator did not answer in time");
                Err(self.timed_out(operation))
            }
        }
    }

    // =========================================================================
    // Tag Sensor
    // =========================================================================

    pub async fn detect_tag(&self) -> SyncResult<Option<TagId>> {
        let sensor = self.ports.tag_sensor.clone();
        self.call(&self.gates.tag_sensor, "tag_detect", move || sensor.detect())
            .await
    }

    pub async fn read_slot(&self, slot: u8) -> SyncResult<Option<String>> {
        let sensor = self.ports.tag_sensor.clone();
        self.call(&self.gates.tag_sensor, "tag_read", move || sensor.read(slot))
            .await
    }

    pub async fn write_slot(&self, slot: u8, data: String) -> SyncResult<bool> {
        let sensor = self.ports.tag_sensor.clone();
        self.call(&self.gates.tag_sensor, "tag_write", move || sensor.write(slot, &data))
            .await
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    pub async fn read_mode_button(&self) -> SyncResult<bool> {
        let input = self.ports.mode_button.clone();
        self.call(&self.gates.mode_button, "mode_button", move || input.read()).await
    }

    /// Reads the quantity buttons in [`Button::POLL_ORDER`].
    pub async fn read_buttons(&self) -> SyncResult<[bool; 4]> {
        let buttons = self.ports.buttons.clone();
        self.call(&self.gates.buttons, "buttons", move || {
            Button::POLL_ORDER.map(|button| buttons.input(button).read())
        })
        .await
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Shows `lines`. Failures are logged and otherwise ignored.
    pub async fn show(&self, lines: Vec<String>) {
        let display = self.ports.display.clone();
        let shown = self
            .call(&self.gates.display, "display", move || display.show_lines(&lines))
            .await;
        if let Err(e) = shown {
            warn!(error = %e, "Display update failed");
        }
    }

    /// Pulses the buzzer. Failures are logged and otherwise ignored.
    pub async fn pulse(&self, duration_ms: u64) {
        let buzzer = self.ports.buzzer.clone();
        let pulsed = self
            .call(&self.gates.buzzer, "buzzer", move || buzzer.pulse(duration_ms))
            .await;
        if let Err(e) = pulsed {
            warn!(error = %e, "Buzzer pulse failed");
        }
    }
}

// =============================================================================
// Test Doubles
// =============================================================================


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    #[tokio::test]
    async fn test_reads_buttons_in_poll_order() {
        let rig = FakeRig::new();
        rig.increment.set(true);
        rig.cancel.set(true);

        let levels = rig.hardware().read_buttons().await.unwrap();
        assert_eq!(levels, [false, true, false, true]);
    }

    #[tokio::test]
    async fn test_tag_read_and_write() {
        let rig = FakeRig::new();
        let hardware = rig.hardware();
        assert!(hardware.detect_tag().await.unwrap().is_none());

        rig.sensor.place_tag(&[0xde, 0xad], 8, "P-100");
        assert_eq!(hardware.detect_tag().await.unwrap(), Some(TagId(vec![0xde, 0xad])));
        assert_eq!(hardware.read_slot(8).await.unwrap().as_deref(), Some("P-100"));

        assert!(hardware.write_slot(8, "P-200".into()).await.unwrap());
        assert_eq!(hardware.read_slot(8).await.unwrap().as_deref(), Some("P-200"));
    }

    #[tokio::test]
    async fn test_slow_collaborator_times_out() {
        let rig = FakeRig::new();
        let mut ports = rig.ports();
        ports.mode_button = Arc::new(StuckInput(Duration::from_millis(300)));
        let hardware = Hardware::new(ports, Duration::from_millis(50));

        let err = hardware.read_mode_button().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::HardwareTimeout { operation: "mode_button", timeout_ms: 50 }
        ));
    }

    #[tokio::test]
    async fn test_outputs_reach_collaborators() {
        let rig = FakeRig::new();
        let hardware = rig.hardware();

        hardware.show(vec!["Widget".into(), "Qty: 1".into()]).await;
        hardware.pulse(150).await;

        assert_eq!(rig.display.last().unwrap(), vec!["Widget", "Qty: 1"]);
        assert_eq!(rig.buzzer.count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_share_a_collaborator() {
        let rig = FakeRig::new();
        let hardware = rig.hardware();

        tokio::join!(
            hardware.show(vec!["first".into()]),
            hardware.show(vec!["second".into()]),
        );
        assert_eq!(rig.display.frames.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hung_collaborator_holds_one_thread() {
        let rig = FakeRig::new();
        let hung = Arc::new(HungInput::default());
        let mut ports = rig.ports();
        ports.mode_button = hung.clone();
        let hardware = Hardware::new(ports, Duration::from_millis(20));

        for _ in 0..25 {
            let err = hardware.read_mode_button().await.unwrap_err();
            assert!(matches!(err, SyncError::HardwareTimeout { operation: "mode_button", .. }));
        }
        assert_eq!(hung.entered.load(std::sync::atomic::Ordering::SeqCst), 1);

        // The other collaborators keep answering.
        rig.increment.set(true);
        assert_eq!(hardware.read_buttons().await.unwrap(), [false, true, false, false]);
        assert!(hardware.detect_tag().await.unwrap().is_none());

        // Once the stuck call returns, the gate opens again.
        hung.release.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), async {
            while hardware.read_mode_button().await.is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(hung.entered.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }
}
