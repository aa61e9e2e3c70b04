//! # Sync Engine
//!
//! Periodic full-state exchange with the remote inventory service.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │  every `interval` (whether or not the link is up)                      │
//! │                                                                        │
//! │  LocalStore ──read──► SyncSnapshot ──publish──► sync/request           │
//! │                                                                        │
//! │  sync/response ──dispatcher──► merge() ──upsert by id──► LocalStore    │
//! │                                   │                                    │
//! │                                   └──► merge counter (push_and_wait)   │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Merging is last-received-wins per record id. Nothing is ever deleted by a
//! merge.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stocktag_core::{InventoryItem, Product, SyncSnapshot};
use stocktag_db::{LocalStore, ID_FIELD, INVENTORY, PRODUCTS};

use crate::error::{SyncError, SyncResult};
use crate::protocol::Envelope;
use crate::transport::LinkHandle;

/// Pushes snapshots on a timer and merges the ones the server sends back.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<LocalStore>,
    link: LinkHandle,
    interval: Duration,
    merges: Arc<watch::Sender<u64>>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        link: LinkHandle,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (merges, _) = watch::channel(0u64);
        SyncEngine {
            store,
            link,
            interval,
            merges: Arc::new(merges),
            shutdown,
        }
    }

    /// Reads both collections into a snapshot.
    ///
    /// Records that no longer decode are skipped by the store with a warning.
    pub async fn build_snapshot(&self) -> SyncResult<SyncSnapshot> {
        let products = self.store.read_as::<Product>(PRODUCTS).await?;
        let items = self.store.read_as::<InventoryItem>(INVENTORY).await?;
        Ok(SyncSnapshot::new(products, items))
    }

    /// Publishes the current snapshot.
    pub async fn push(&self) -> SyncResult<()> {
        let snapshot = self.build_snapshot().await?;
        debug!(
            products = snapshot.products.len(),
            inventory_items = snapshot.inventory_items.len(),
            "Pushing snapshot"
        );
        self.link.publish(Envelope::sync_request(snapshot)).await
    }

    /// Upserts every record of `snapshot` by id.
    pub async fn merge(&self, snapshot: SyncSnapshot) -> SyncResult<()> {
        let products = snapshot
            .products
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let items = snapshot
            .inventory_items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        let products_outcome = self.store.upsert(PRODUCTS, &products, ID_FIELD).await?;
        let items_outcome = self.store.upsert(INVENTORY, &items, ID_FIELD).await?;

        info!(
            products_inserted = products_outcome.inserted,
            products_replaced = products_outcome.replaced,
            items_inserted = items_outcome.inserted,
            items_replaced = items_outcome.replaced,
            "Snapshot merged"
        );

        self.merges.send_modify(|count| *count += 1);
        Ok(())
    }

    /// Pushes a snapshot and waits up to `timeout` for the next merge.
    ///
    /// Returns true if a reconciliation arrived in time.
    pub async fn push_and_wait(&self, timeout: Duration) -> SyncResult<bool> {
        // Subscribing marks the current count as seen.
        let mut merged = self.merges.subscribe();

        self.push().await?;

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(SyncError::ShuttingDown),
            result = tokio::time::timeout(timeout, merged.changed()) => Ok(matches!(result, Ok(Ok(())))),
        }
    }

    /// Number of snapshots merged so far.
    pub fn merge_count(&self) -> u64 {
        *self.merges.borrow()
    }

    /// Timer loop. The first push happens one interval after start.
    pub async fn run(self) {
        info!(interval = ?self.interval, "Sync timer started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.push().await {
                        Ok(()) => {}
                        Err(SyncError::ShuttingDown) => break,
                        Err(e) => warn!(error = %e, "Snapshot push failed"),
                    }
                }
            }
        }

        info!("Sync timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use chrono::Utc;
    use serde_json::json;
    use stocktag_core::StockDirection;
    use stocktag_db::{Database, DbConfig};
    use tokio::sync::mpsc;

    async fn engine(interval: Duration) -> (SyncEngine, Arc<LocalStore>, mpsc::Receiver<Envelope>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = Arc::new(LocalStore::new(db));
        let (link, outbound) = LinkHandle::detached(16);
        let engine = SyncEngine::new(store.clone(), link, interval, CancellationToken::new());
        (engine, store, outbound)
    }

    fn product(id: &str, name: &str, quantity: i64) -> Product {
        Product {
            id: id.into(),
            name: name.into(),
            price: 2.0,
            quantity,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_reads_both_collections() {
        let (engine, store, _) = engine(Duration::from_secs(60)).await;
        engine
            .merge(SyncSnapshot::new(
                vec![product("P-1", "Widget", 5)],
                vec![InventoryItem::new("P-1", 2, StockDirection::In)],
            ))
            .await
            .unwrap();

        // A stored product that no longer decodes is left out.
        store
            .insert(
                PRODUCTS,
                &json!({"id": "P-x", "name": "Bad", "price": "n/a", "quantity": 1, "timestamp": "t"}),
            )
            .await
            .unwrap();

        let snapshot = engine.build_snapshot().await.unwrap();
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.inventory_items.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_replaces_and_adds() {
        let (engine, _, _) = engine(Duration::from_secs(60)).await;
        engine
            .merge(SyncSnapshot::new(
                vec![product("P-1", "Widget", 5), product("P-2", "Gadget", 1)],
                vec![],
            ))
            .await
            .unwrap();

        engine
            .merge(SyncSnapshot::new(
                vec![product("P-1", "Widget v2", 9), product("P-3", "Gizmo", 4)],
                vec![],
            ))
            .await
            .unwrap();

        let snapshot = engine.build_snapshot().await.unwrap();
        assert_eq!(snapshot.products.len(), 3);
        assert_eq!(snapshot.products[0].name, "Widget v2");
        assert_eq!(snapshot.products[0].quantity, 9);

        // Records the second snapshot did not mention are left as they were.
        let untouched = snapshot.products.iter().find(|p| p.id == "P-2").unwrap();
        assert_eq!(untouched.name, "Gadget");
        assert_eq!(untouched.quantity, 1);
        assert!(snapshot.products.iter().any(|p| p.id == "P-3"));
        assert_eq!(engine.merge_count(), 2);
    }

    #[tokio::test]
    async fn test_push_publishes_sync_request() {
        let (engine, _, mut outbound) = engine(Duration::from_secs(60)).await;
        engine
            .merge(SyncSnapshot::new(vec![product("P-1", "Widget", 5)], vec![]))
            .await
            .unwrap();

        engine.push().await.unwrap();
        let envelope = outbound.recv().await.unwrap();
        assert_eq!(envelope.label(), "sync/request");
        match envelope.payload {
            Payload::Sync(snapshot) => assert_eq!(snapshot.products[0].id, "P-1"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_push_and_wait_times_out_without_reply() {
        let (engine, _, _outbound) = engine(Duration::from_secs(60)).await;
        let reconciled = engine
            .push_and_wait(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!reconciled);
    }

    #[tokio::test]
    async fn test_push_and_wait_sees_merge() {
        let (engine, _, mut outbound) = engine(Duration::from_secs(60)).await;

        let responder = engine.clone();
        tokio::spawn(async move {
            outbound.recv().await.unwrap();
            responder
                .merge(SyncSnapshot::new(vec![product("P-9", "Remote", 3)], vec![]))
                .await
                .unwrap();
        });

        assert!(engine.push_and_wait(Duration::from_secs(2)).await.unwrap());
        assert_eq!(engine.build_snapshot().await.unwrap().products[0].id, "P-9");
    }

    #[tokio::test]
    async fn test_timer_pushes_until_shutdown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = Arc::new(LocalStore::new(db));
        let (link, mut outbound) = LinkHandle::detached(16);
        let shutdown = CancellationToken::new();
        let engine = SyncEngine::new(store, link, Duration::from_millis(20), shutdown.clone());

        let task = tokio::spawn(engine.run());
        for _ in 0..2 {
            let envelope = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(envelope.label(), "sync/request");
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
