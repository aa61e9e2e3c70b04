//! # Inbound Dispatcher
//!
//! Routes decoded envelopes from the link to the duty that handles them.
//!
//! | action / kind              | handler                                   |
//! |----------------------------|-------------------------------------------|
//! | product_lookup / response  | `InteractionController::begin_interaction` |
//! | sync / response            | `SyncEngine::merge`                       |
//! | tag_write / request        | arm the pending write, force Tag Write    |
//! | anything else              | logged and dropped                        |
//!
//! No handler failure stops the loop; only shutdown or a closed feed does.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stocktag_core::validation::validate_product_id;
use stocktag_core::{Action, MessageKind, Mode, ModeStateMachine, Status};

use crate::hardware::Hardware;
use crate::interaction::InteractionController;
use crate::protocol::{Envelope, Payload};
use crate::sync_engine::SyncEngine;
use crate::transport::LinkHandle;

// =============================================================================
// Pending Tag Write
// =============================================================================

/// Product id waiting to be written onto the next tag scanned in Tag Write.
#[derive(Debug, Clone, Default)]
pub struct PendingWrite(Arc<Mutex<Option<String>>>);

impl PendingWrite {
    pub fn set(&self, product_id: String) {
        *self.lock() = Some(product_id);
    }

    pub fn get(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Clears the target if it is still `product_id`.
    pub fn clear_if(&self, product_id: &str) {
        let mut pending = self.lock();
        if pending.as_deref() == Some(product_id) {
            *pending = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// What the dispatcher did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    InteractionStarted,
    InteractionRejected,
    Merged,
    TagWriteArmed(String),
    Failed,
    Ignored,
}

/// Consumes the link's inbound feed.
pub struct InboundDispatcher {
    inbound_rx: mpsc::Receiver<Envelope>,
    interaction: InteractionController,
    sync: SyncEngine,
    modes: Arc<ModeStateMachine>,
    pending: PendingWrite,
    link: LinkHandle,
    hardware: Hardware,
    shutdown: CancellationToken,
}

impl InboundDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inbound_rx: mpsc::Receiver<Envelope>,
        interaction: InteractionController,
        sync: SyncEngine,
        modes: Arc<ModeStateMachine>,
        pending: PendingWrite,
        link: LinkHandle,
        hardware: Hardware,
        shutdown: CancellationToken,
    ) -> Self {
        InboundDispatcher {
            inbound_rx,
            interaction,
            sync,
            modes,
            pending,
            link,
            hardware,
            shutdown,
        }
    }

    /// Routing loop. Ends on shutdown or when the link drops the feed.
    pub async fn run(mut self) {
        info!("Inbound dispatcher started");

        loop {
            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.inbound_rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let label = envelope.label();
            let routed = self.dispatch(envelope).await;
            debug!(message = %label, ?routed, "Envelope dispatched");
        }

        info!("Inbound dispatcher stopped");
    }

    /// Routes a single envelope.
    pub async fn dispatch(&self, envelope: Envelope) -> Routed {
        match (envelope.action, envelope.kind, envelope.payload) {
            (Action::ProductLookup, MessageKind::Response, Payload::LookupResponse(list)) => {
                if envelope.status == Some(Status::Error) {
                    warn!(message_id = %envelope.message_id, "Lookup failed on the server");
                    return Routed::Ignored;
                }
                if self.interaction.begin_interaction(list) {
                    Routed::InteractionStarted
                } else {
                    Routed::InteractionRejected
                }
            }

            (Action::Sync, MessageKind::Response, Payload::Sync(snapshot)) => {
                match self.sync.merge(snapshot).await {
                    Ok(()) => Routed::Merged,
                    Err(e) => {
                        error!(error = %e, message_id = %envelope.message_id, "Snapshot merge failed");
                        Routed::Failed
                    }
                }
            }

            (Action::TagWrite, MessageKind::Request, Payload::TagWrite(target)) => {
                let product_id = match validate_product_id(&target.product_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, "Rejecting tag write request");
                        return Routed::Failed;
                    }
                };

                self.pending.set(product_id.clone());
                let previous = self.modes.force(Mode::TagWrite);
                info!(%product_id, %previous, "Tag write requested");

                if previous != Mode::TagWrite {
                    if let Err(e) = self.link.publish(Envelope::mode_switch(Mode::TagWrite)).await {
                        warn!(error = %e, "Failed to publish mode change");
                    }
                }
                self.hardware
                    .show(vec![Mode::TagWrite.to_string(), product_id.clone()])
                    .await;

                Routed::TagWriteArmed(product_id)
            }

            (action, kind, _) => {
                debug!(%action, %kind, "No handler for inbound envelope");
                Routed::Ignored
            }
        }
    }
}
