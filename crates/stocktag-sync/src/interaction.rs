//! # Interaction Controller
//!
//! Drives one quantity selection at a time after a successful product lookup.
//!
//! ```text
//! ┌──────┐  begin_interaction(products)  ┌──────────────────────────────┐
//! │ Idle │ ─────────────────────────────►│ Active(quantity, product)    │
//! └──────┘                               │                              │
//!    ▲                                   │ every poll tick:             │
//!    │                                   │   [−] [+] → display          │
//!    │       Confirm: store + publish    │   [✓] → InventoryIn/Out      │
//!    └────── Cancel / shutdown ───────── │   [✗] → nothing              │
//!                                        └──────────────────────────────┘
//! ```
//!
//! A lookup response that arrives while an interaction is active is refused.
//! Presses are rising edges, so a held button counts once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stocktag_core::validation::{validate_non_empty, validate_quantity};
use stocktag_core::{
    Button, CoreError, EdgeDetector, InteractionStep, InventoryItem, Mode, ModeStateMachine,
    Product, QuantitySelector, StockDirection,
};
use stocktag_db::{LocalStore, ID_FIELD, INVENTORY};

use crate::error::SyncResult;
use crate::hardware::Hardware;
use crate::protocol::{Envelope, ProductList};
use crate::transport::LinkHandle;

/// How an interaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// A stock movement of this quantity was recorded and published.
    Committed(u32),
    /// Confirmed while the device was in Tag Write; nothing was emitted.
    Discarded,
    /// Cancelled by the operator or by shutdown.
    Cancelled,
}

/// Tunables of the interaction loop.
#[derive(Debug, Clone, Copy)]
pub struct InteractionSettings {
    pub poll_interval: Duration,
    pub confirm_pulse_ms: u64,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        InteractionSettings {
            poll_interval: Duration::from_millis(200),
            confirm_pulse_ms: 150,
        }
    }
}

/// Owner of the (at most one) running interaction.
#[derive(Clone)]
pub struct InteractionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    active: AtomicBool,
    modes: Arc<ModeStateMachine>,
    link: LinkHandle,
    store: Arc<LocalStore>,
    hardware: Hardware,
    settings: InteractionSettings,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<InteractionOutcome>>>,
}

impl InteractionController {
    pub fn new(
        modes: Arc<ModeStateMachine>,
        link: LinkHandle,
        store: Arc<LocalStore>,
        hardware: Hardware,
        settings: InteractionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        InteractionController {
            inner: Arc::new(ControllerInner {
                active: AtomicBool::new(false),
                modes,
                link,
                store,
                hardware,
                settings,
                shutdown,
                task: Mutex::new(None),
            }),
        }
    }

    /// Returns true while an interaction is running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Starts an interaction for the first product of `list`.
    ///
    /// Returns false, leaving the controller idle or the running interaction
    /// untouched, when the list is empty or an interaction is already active.
    pub fn begin_interaction(&self, list: ProductList) -> bool {
        if let Err(e) = validate_non_empty("products", &list.products) {
            warn!(error = %e, "Ignoring lookup response");
            return false;
        }
        let Some(product) = list.products.into_iter().next() else {
            return false;
        };

        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(product_id = %product.id, "Interaction already active, dropping lookup response");
            return false;
        }

        info!(product_id = %product.id, name = %product.name, "Interaction started");

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.run(product).await;
            inner.active.store(false, Ordering::SeqCst);
            outcome
        });

        *self.inner.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        true
    }

    /// Waits up to `timeout` for the current interaction to finish.
    ///
    /// Returns its outcome, or `None` when nothing was running or the wait
    /// timed out.
    pub async fn join(&self, timeout: Duration) -> Option<InteractionOutcome> {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(error = %e, "Interaction task failed");
                None
            }
            Err(_) => {
                warn!(?timeout, "Interaction did not stop in time");
                None
            }
        }
    }
}

impl ControllerInner {
    async fn run(&self, product: Product) -> InteractionOutcome {
        let mut selector = QuantitySelector::new();
        let mut edges = [EdgeDetector::new(); 4];

        self.show_quantity(&product, selector.quantity()).await;

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(product_id = %product.id, "Interaction cancelled by shutdown");
                    return InteractionOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let levels = match self.hardware.read_buttons().await {
                Ok(levels) => levels,
                Err(e) => {
                    warn!(error = %e, "Button poll failed");
                    continue;
                }
            };

            for ((button, edge), level) in Button::POLL_ORDER.iter().zip(edges.iter_mut()).zip(levels) {
                if !edge.rising(level) {
                    continue;
                }

                match selector.press(*button) {
                    InteractionStep::Continue(quantity) => {
                        self.show_quantity(&product, quantity).await;
                    }
                    InteractionStep::Confirmed(quantity) => {
                        return self.confirm(&product, quantity).await;
                    }
                    InteractionStep::Cancelled => {
                        info!(product_id = %product.id, "Interaction cancelled");
                        self.hardware
                            .show(vec![product.name.clone(), "Cancelled".into()])
                            .await;
                        return InteractionOutcome::Cancelled;
                    }
                }
            }
        }
    }

    async fn confirm(&self, product: &Product, quantity: u32) -> InteractionOutcome {
        let direction = match self.modes.current_mode() {
            Mode::InventoryIn => StockDirection::In,
            Mode::InventoryOut => StockDirection::Out,
            Mode::TagWrite => {
                warn!(product_id = %product.id, quantity, "Confirmed in Tag Write mode, nothing recorded");
                return InteractionOutcome::Discarded;
            }
        };

        let item = match Self::movement(product, quantity, direction) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, product_id = %product.id, "Rejecting stock movement");
                return InteractionOutcome::Discarded;
            }
        };

        if let Err(e) = self.record(&item).await {
            warn!(error = %e, item_id = %item.id, "Failed to record stock movement locally");
        }

        if let Err(e) = self
            .link
            .publish(Envelope::inventory(direction, vec![item]))
            .await
        {
            warn!(error = %e, product_id = %product.id, "Failed to publish stock movement");
        }

        info!(product_id = %product.id, quantity, ?direction, "Stock movement confirmed");

        self.hardware.pulse(self.settings.confirm_pulse_ms).await;
        self.hardware
            .show(vec![product.name.clone(), format!("Saved: {quantity}")])
            .await;

        InteractionOutcome::Committed(quantity)
    }

    fn movement(
        product: &Product,
        quantity: u32,
        direction: StockDirection,
    ) -> SyncResult<InventoryItem> {
        let quantity = i64::from(quantity);
        validate_quantity(quantity).map_err(CoreError::from)?;
        Ok(InventoryItem::new(product.id.clone(), quantity, direction))
    }

    /// Keeps the movement in the local `inventory` collection so the next
    /// snapshot carries it.
    async fn record(&self, item: &InventoryItem) -> SyncResult<()> {
        let value = serde_json::to_value(item)?;
        self.store.upsert(INVENTORY, &[value], ID_FIELD).await?;
        Ok(())
    }

    async fn show_quantity(&self, product: &Product, quantity: u32) {
        self.hardware
            .show(vec![product.name.clone(), format!("Qty: {quantity}")])
            .await;
    }
}
