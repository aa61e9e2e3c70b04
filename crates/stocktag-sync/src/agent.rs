//! # Device Coordinator
//!
//! Builds the shared [`DeviceContext`], spawns one task per duty, and stops
//! them all on shutdown.
//!
//! ## Duties
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Coordinator::start                              │
//! │                                                                         │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐               │
//! │   │ LinkManager  │   │  Inbound     │   │ SyncEngine   │               │
//! │   │ (socket)     │──►│  Dispatcher  │──►│ timer + merge│               │
//! │   └──────▲───────┘   └──────┬───────┘   └──────────────┘               │
//! │          │                  │ lookup response                           │
//! │          │                  ▼                                           │
//! │   ┌──────┴───────┐   ┌──────────────┐                                  │
//! │   │ SensorPoller │   │ Interaction  │                                  │
//! │   │ mode button  │   │ (on demand)  │                                  │
//! │   │ tag scans    │   └──────────────┘                                  │
//! │   └──────────────┘                                                      │
//! │                                                                         │
//! │   shutdown(): cancel token → every duty exits at its next await        │
//! │               → bounded join of every task                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup
//! 1. Spawn the link and the dispatcher
//! 2. Push a snapshot and wait (bounded) for the server's reconciliation
//! 3. Spawn the sync timer and the sensor poller

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stocktag_core::validation::validate_product_id;
use stocktag_core::{EdgeDetector, Mode, ModeStateMachine, Status, TagId};
use stocktag_db::LocalStore;

use crate::config::DeviceConfig;
use crate::error::SyncResult;
use crate::hardware::{Hardware, HardwarePorts};
use crate::inbound::{InboundDispatcher, PendingWrite};
use crate::interaction::{InteractionController, InteractionSettings};
use crate::protocol::Envelope;
use crate::sync_engine::SyncEngine;
use crate::transport::{LinkHandle, LinkManager};

// =============================================================================
// Device Context
// =============================================================================

/// Shared state handed to every duty.
#[derive(Clone)]
pub struct DeviceContext {
    pub config: Arc<DeviceConfig>,
    pub modes: Arc<ModeStateMachine>,
    pub store: Arc<LocalStore>,
    pub link: LinkHandle,
    pub hardware: Hardware,
    pub pending: PendingWrite,
    pub shutdown: CancellationToken,
}

impl DeviceContext {
    /// Shows the current mode on the display.
    async fn show_mode(&self) {
        let mode = self.modes.current_mode();
        self.hardware.show(vec!["Mode".into(), mode.to_string()]).await;
    }

    /// Shows `mode` and tells the server about it.
    async fn announce_mode(&self, mode: Mode) {
        self.hardware.show(vec!["Mode".into(), mode.to_string()]).await;
        if let Err(e) = self.link.publish(Envelope::mode_switch(mode)).await {
            warn!(error = %e, %mode, "Failed to publish mode change");
        }
    }
}

// =============================================================================
// Sensor Poller
// =============================================================================

/// Polls the mode button and the tag sensor.
pub struct SensorPoller {
    context: DeviceContext,
    interaction: InteractionController,
    mode_edge: EdgeDetector,
    last_tag: Option<TagId>,
}

impl SensorPoller {
    pub fn new(context: DeviceContext, interaction: InteractionController) -> Self {
        SensorPoller {
            context,
            interaction,
            mode_edge: EdgeDetector::new(),
            last_tag: None,
        }
    }

    pub async fn run(mut self) {
        let poll_interval = self.context.config.hardware_poll_interval();
        info!(?poll_interval, "Sensor polling started");

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.context.shutdown.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        info!("Sensor polling stopped");
    }

    /// One polling cycle. Hardware failures are logged and the cycle ends.
    pub async fn poll_once(&mut self) {
        match self.context.hardware.read_mode_button().await {
            Ok(level) => {
                if self.mode_edge.rising(level) {
                    let mode = self.context.modes.advance();
                    info!(%mode, "Mode button pressed");
                    self.context.announce_mode(mode).await;
                }
            }
            Err(e) => warn!(error = %e, "Mode button poll failed"),
        }

        let detected = match self.context.hardware.detect_tag().await {
            Ok(detected) => detected,
            Err(e) => {
                warn!(error = %e, "Tag detection failed");
                return;
            }
        };

        // A tag left in the field is handled once.
        if detected == self.last_tag {
            return;
        }
        self.last_tag = detected.clone();

        if let Some(tag) = detected {
            self.on_tag(tag).await;
        }
    }

    async fn on_tag(&self, tag: TagId) {
        let mode = self.context.modes.current_mode();
        debug!(%tag, %mode, "Tag detected");

        if mode.is_inventory() {
            self.lookup(tag).await;
        } else {
            self.write_pending(tag).await;
        }
    }

    async fn lookup(&self, tag: TagId) {
        if self.interaction.is_active() {
            debug!(%tag, "Interaction active, ignoring scan");
            return;
        }

        let slot = self.context.config.hardware.tag_slot;
        let data = match self.context.hardware.read_slot(slot).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!(%tag, slot, "Tag slot could not be read");
                return;
            }
            Err(e) => {
                warn!(error = %e, %tag, "Tag read failed");
                return;
            }
        };

        let product_id = match validate_product_id(&data) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, %tag, "Tag holds no usable product id");
                self.context
                    .hardware
                    .show(vec!["Unknown tag".into(), tag.to_string()])
                    .await;
                return;
            }
        };

        info!(%product_id, "Looking up scanned product");
        if let Err(e) = self
            .context
            .link
            .publish(Envelope::lookup_request(product_id))
            .await
        {
            warn!(error = %e, "Failed to publish lookup request");
        }
    }

    async fn write_pending(&self, tag: TagId) {
        let Some(product_id) = self.context.pending.get() else {
            debug!(%tag, "No pending tag write");
            self.context
                .hardware
                .show(vec![Mode::TagWrite.to_string(), "Nothing to write".into()])
                .await;
            return;
        };

        let slot = self.context.config.hardware.tag_slot;
        let written = match self
            .context
            .hardware
            .write_slot(slot, product_id.clone())
            .await
        {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, %tag, "Tag write failed");
                false
            }
        };

        let status = if written { Status::Success } else { Status::Error };
        info!(%product_id, %tag, ?status, "Tag write finished");

        if let Err(e) = self
            .context
            .link
            .publish(Envelope::tag_write_response(product_id.clone(), status))
            .await
        {
            warn!(error = %e, "Failed to publish tag write result");
        }

        if !written {
            self.context
                .hardware
                .show(vec![Mode::TagWrite.to_string(), "Write failed".into()])
                .await;
            return;
        }

        self.context.pending.clear_if(&product_id);
        match self.context.modes.transition_to(Mode::TagWrite.successor()) {
            Ok(mode) => self.context.announce_mode(mode).await,
            Err(e) => warn!(error = %e, "Mode not advanced after tag write"),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owns every running duty of the device.
pub struct Coordinator {
    context: DeviceContext,
    interaction: InteractionController,
    sync: SyncEngine,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    reconciled: bool,
}

impl Coordinator {
    /// Starts every duty.
    ///
    /// ## Errors
    /// [`crate::SyncError`] configuration errors if `config` does not
    /// validate. Nothing is spawned in that case.
    pub async fn start(
        config: DeviceConfig,
        store: Arc<LocalStore>,
        ports: HardwarePorts,
    ) -> SyncResult<Self> {
        config.validate()?;

        info!(
            device_id = %config.device_id(),
            url = %config.link.server_url,
            "Starting device coordinator"
        );

        let shutdown = CancellationToken::new();
        let (link_manager, link, inbound_rx) = LinkManager::new(config.link_config(), shutdown.clone());

        let context = DeviceContext {
            hardware: Hardware::new(ports, config.hardware_timeout()),
            config: Arc::new(config),
            modes: Arc::new(ModeStateMachine::new()),
            store,
            link,
            pending: PendingWrite::default(),
            shutdown,
        };

        let interaction = InteractionController::new(
            context.modes.clone(),
            context.link.clone(),
            context.store.clone(),
            context.hardware.clone(),
            InteractionSettings {
                poll_interval: context.config.interaction_poll_interval(),
                confirm_pulse_ms: context.config.hardware.confirm_pulse_ms,
            },
            context.shutdown.clone(),
        );

        let sync = SyncEngine::new(
            context.store.clone(),
            context.link.clone(),
            context.config.sync_interval(),
            context.shutdown.clone(),
        );

        let dispatcher = InboundDispatcher::new(
            inbound_rx,
            interaction.clone(),
            sync.clone(),
            context.modes.clone(),
            context.pending.clone(),
            context.link.clone(),
            context.hardware.clone(),
            context.shutdown.clone(),
        );

        let mut tasks = vec![
            ("link", tokio::spawn(link_manager.run())),
            ("dispatcher", tokio::spawn(dispatcher.run())),
        ];

        context.show_mode().await;

        let reconcile_timeout = context.config.reconcile_timeout();
        let reconciled = match sync.push_and_wait(reconcile_timeout).await {
            Ok(true) => {
                info!("Local store reconciled with server");
                true
            }
            Ok(false) => {
                warn!(?reconcile_timeout, "No reconciliation from server, continuing with local data");
                false
            }
            Err(e) => {
                error!(error = %e, "Startup sync failed");
                false
            }
        };

        tasks.push(("sync", tokio::spawn(sync.clone().run())));
        tasks.push((
            "sensors",
            tokio::spawn(SensorPoller::new(context.clone(), interaction.clone()).run()),
        ));

        info!("Device coordinator running");

        Ok(Coordinator {
            context,
            interaction,
            sync,
            tasks,
            reconciled,
        })
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn interaction(&self) -> &InteractionController {
        &self.interaction
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    /// Whether the startup reconciliation arrived in time.
    pub fn reconciled(&self) -> bool {
        self.reconciled
    }

    /// Signals every duty to stop and waits up to `join_timeout` for each.
    ///
    /// Returns true if every duty stopped in time. Stragglers are aborted.
    pub async fn shutdown(self, join_timeout: Duration) -> bool {
        info!("Shutting down device coordinator");
        self.context.shutdown.cancel();

        let mut clean = true;

        if self.interaction.is_active() && self.interaction.join(join_timeout).await.is_none() {
            clean = false;
        }

        for (name, task) in self.tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(join_timeout, task).await {
                Ok(Ok(())) => debug!(duty = name, "Duty stopped"),
                Ok(Err(e)) => {
                    error!(duty = name, error = %e, "Duty failed");
                    clean = false;
                }
                Err(_) => {
                    warn!(duty = name, ?join_timeout, "Duty did not stop in time, aborting");
                    abort.abort();
                    clean = false;
                }
            }
        }

        info!(clean, "Device coordinator stopped");
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::fake::{FakeRig, StuckInput};
    use crate::protocol::{Payload, ProductList, ProductRef};
    use chrono::Utc;
    use futures_util::{SinkExt, StreamExt};
    use stocktag_core::{Product, SyncSnapshot};
    use stocktag_db::{Database, DbConfig, INVENTORY, PRODUCTS};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    const SLOT: u8 = 8;

    async fn memory_store() -> Arc<LocalStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Arc::new(LocalStore::new(db))
    }

    fn test_config(url: &str) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.link.server_url = url.to_string();
        config.hardware.tag_slot = SLOT;
        config.hardware.poll_interval_ms = 10;
        config.interaction.poll_interval_ms = 10;
        config.sync.interval_secs = 3600;
        config.sync.reconcile_timeout_secs = 2;
        config
    }

    async fn poller_harness(
        hardware: Hardware,
    ) -> (SensorPoller, DeviceContext, mpsc::Receiver<Envelope>) {
        let (link, outbound) = LinkHandle::detached(32);
        let store = memory_store().await;
        let context = DeviceContext {
            config: Arc::new(test_config("ws://127.0.0.1:9/ws")),
            modes: Arc::new(ModeStateMachine::new()),
            store: store.clone(),
            link: link.clone(),
            hardware: hardware.clone(),
            pending: PendingWrite::default(),
            shutdown: CancellationToken::new(),
        };
        let interaction = InteractionController::new(
            context.modes.clone(),
            link,
            store,
            hardware,
            InteractionSettings::default(),
            context.shutdown.clone(),
        );
        (SensorPoller::new(context.clone(), interaction), context, outbound)
    }

    fn product_id_of(envelope: &Envelope) -> &str {
        match &envelope.payload {
            Payload::LookupRequest(r) | Payload::TagWrite(r) => &r.product_id,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mode_button_advances_once_per_press() {
        let rig = FakeRig::new();
        let (mut poller, context, mut outbound) = poller_harness(rig.hardware()).await;

        rig.mode_button.set(true);
        poller.poll_once().await;
        poller.poll_once().await;
        rig.mode_button.set(false);
        poller.poll_once().await;

        assert_eq!(context.modes.current_mode(), Mode::InventoryOut);
        let envelope = outbound.recv().await.unwrap();
        assert_eq!(
            envelope.payload,
            Payload::ModeSwitch(crate::protocol::ModeChange {
                mode: Mode::InventoryOut
            })
        );
        assert!(outbound.try_recv().is_err());
        assert_eq!(rig.display.last().unwrap(), vec!["Mode", "Inventory Out"]);
    }

    #[tokio::test]
    async fn test_scan_publishes_lookup_once_per_tag() {
        let rig = FakeRig::new();
        let (mut poller, _context, mut outbound) = poller_harness(rig.hardware()).await;

        rig.sensor.place_tag(&[1, 2, 3, 4], SLOT, "P-100");
        poller.poll_once().await;
        poller.poll_once().await;

        let envelope = outbound.recv().await.unwrap();
        assert_eq!(envelope.label(), "product_lookup/request");
        assert_eq!(product_id_of(&envelope), "P-100");
        assert!(outbound.try_recv().is_err());

        // Taking the tag away and presenting it again is a new scan.
        rig.sensor.remove_tag();
        poller.poll_once().await;
        rig.sensor.place_tag(&[1, 2, 3, 4], SLOT, "P-100");
        poller.poll_once().await;
        assert_eq!(outbound.recv().await.unwrap().label(), "product_lookup/request");
    }

    #[tokio::test]
    async fn test_blank_tag_is_not_looked_up() {
        let rig = FakeRig::new();
        let (mut poller, _context, mut outbound) = poller_harness(rig.hardware()).await;

        rig.sensor.place_tag(&[9], SLOT, "   ");
        poller.poll_once().await;

        assert!(outbound.try_recv().is_err());
        assert_eq!(rig.display.last().unwrap()[0], "Unknown tag");
    }

    #[tokio::test]
    async fn test_tag_write_success_returns_to_inventory_in() {
        let rig = FakeRig::new();
        let (mut poller, context, mut outbound) = poller_harness(rig.hardware()).await;
        context.modes.force(Mode::TagWrite);
        context.pending.set("P-77".into());

        rig.sensor.place_tag(&[7], SLOT, "");
        poller.poll_once().await;

        assert_eq!(
            rig.sensor.writes.lock().unwrap().clone(),
            vec![(SLOT, "P-77".to_string())]
        );

        let response = outbound.recv().await.unwrap();
        assert_eq!(response.label(), "tag_write/response");
        assert_eq!(response.status, Some(Status::Success));
        assert_eq!(product_id_of(&response), "P-77");

        assert_eq!(outbound.recv().await.unwrap().label(), "mode_switch/request");
        assert_eq!(context.modes.current_mode(), Mode::InventoryIn);
        assert!(context.pending.get().is_none());
    }

    #[tokio::test]
    async fn test_tag_write_failure_keeps_target() {
        let rig = FakeRig::new();
        rig.sensor
            .reject_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (mut poller, context, mut outbound) = poller_harness(rig.hardware()).await;
        context.modes.force(Mode::TagWrite);
        context.pending.set("P-77".into());

        rig.sensor.place_tag(&[7], SLOT, "");
        poller.poll_once().await;

        let response = outbound.recv().await.unwrap();
        assert_eq!(response.status, Some(Status::Error));
        assert!(outbound.try_recv().is_err());
        assert_eq!(context.modes.current_mode(), Mode::TagWrite);
        assert_eq!(context.pending.get().as_deref(), Some("P-77"));
    }

    #[tokio::test]
    async fn test_scan_without_pending_write_does_nothing() {
        let rig = FakeRig::new();
        let (mut poller, context, mut outbound) = poller_harness(rig.hardware()).await;
        context.modes.force(Mode::TagWrite);

        rig.sensor.place_tag(&[7], SLOT, "P-1");
        poller.poll_once().await;

        assert!(outbound.try_recv().is_err());
        assert!(rig.sensor.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stuck_mode_button_does_not_stop_scanning() {
        let rig = FakeRig::new();
        let mut ports = rig.ports();
        ports.mode_button = Arc::new(StuckInput(Duration::from_millis(200)));
        let hardware = Hardware::new(ports, Duration::from_millis(30));
        let (mut poller, _context, mut outbound) = poller_harness(hardware).await;

        rig.sensor.place_tag(&[5], SLOT, "P-5");
        poller.poll_once().await;

        assert_eq!(product_id_of(&outbound.recv().await.unwrap()), "P-5");
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let rig = FakeRig::new();
        let result = Coordinator::start(test_config("http://nope"), memory_store().await, rig.ports()).await;
        assert!(result.err().map(|e| e.is_config_error()).unwrap_or(false));
    }

    // =========================================================================
    // End to end against a local server
    // =========================================================================

    async fn next_envelope(ws: &mut WebSocketStream<TcpStream>) -> Envelope {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
                .await
                .expect("server waited too long for a frame");
            match frame {
                Some(Ok(WsMessage::Text(text))) => return Envelope::from_json(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    }

    async fn reply(ws: &mut WebSocketStream<TcpStream>, envelope: Envelope) {
        ws.send(WsMessage::Text(envelope.to_json().unwrap().into()))
            .await
            .unwrap();
    }

    fn widget(id: &str) -> Product {
        Product {
            id: id.into(),
            name: "Widget".into(),
            price: 4.5,
            quantity: 12,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scan_to_stock_movement_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let rig = FakeRig::new();
        let store = memory_store().await;

        let starting = tokio::spawn(Coordinator::start(
            test_config(&format!("ws://127.0.0.1:{port}/ws")),
            store.clone(),
            rig.ports(),
        ));

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Startup reconciliation.
        let request = next_envelope(&mut ws).await;
        assert_eq!(request.label(), "sync/request");
        let mut response = Envelope::sync_request(SyncSnapshot::new(vec![widget("P-1")], vec![]));
        response.kind = stocktag_core::MessageKind::Response;
        reply(&mut ws, response).await;

        let coordinator = starting.await.unwrap().unwrap();
        assert!(coordinator.reconciled());
        assert_eq!(store.count(PRODUCTS).await.unwrap(), 1);

        // Scan → lookup.
        rig.sensor.place_tag(&[0xab], SLOT, "P-1");
        let lookup = next_envelope(&mut ws).await;
        assert_eq!(lookup.label(), "product_lookup/request");
        assert_eq!(
            lookup.payload,
            Payload::LookupRequest(ProductRef {
                product_id: "P-1".into()
            })
        );

        let mut found = Envelope::lookup_request("P-1");
        found.kind = stocktag_core::MessageKind::Response;
        found.status = Some(Status::Success);
        found.payload = Payload::LookupResponse(ProductList {
            products: vec![widget("P-1")],
        });
        reply(&mut ws, found).await;

        // Wait for the interaction, then choose 2 and confirm.
        while !coordinator.interaction().is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        FakeRig::press(&rig.increment, Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        FakeRig::press(&rig.confirm, Duration::from_millis(50)).await;

        let movement = next_envelope(&mut ws).await;
        assert_eq!(movement.label(), "inventory_in/request");
        match movement.payload {
            Payload::Inventory(batch) => {
                assert_eq!(batch.inventory_items.len(), 1);
                assert_eq!(batch.inventory_items[0].quantity, 2);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(store.count(INVENTORY).await.unwrap(), 1);

        assert!(coordinator.shutdown(Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_shutdown_while_offline_is_bounded() {
        // Nothing listens on this port: the link keeps backing off.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let rig = FakeRig::new();
        let mut config = test_config(&format!("ws://127.0.0.1:{port}/ws"));
        config.sync.reconcile_timeout_secs = 0;

        let coordinator = Coordinator::start(config, memory_store().await, rig.ports())
            .await
            .unwrap();
        assert!(!coordinator.reconciled());

        // Scans still work offline; the lookup waits in the link buffer.
        rig.sensor.place_tag(&[1], SLOT, "P-1");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.shutdown(Duration::from_secs(2)),
        )
        .await
        .unwrap();
        assert!(stopped);
    }
}
